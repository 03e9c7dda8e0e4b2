//! Row batches: the column-major unit of work handed from the tokenizer to
//! the column workers.

use std::sync::Arc;

use crate::cell::{Cell, CellSource, RawCell};

/// A column-major bundle of up to `batch_size` rows of cells, shared
/// read-only across the tokenizer (producer) and every column worker
/// (consumers) via `Arc`.
///
/// A batch is recyclable once every column worker has dropped its `Arc`
/// clone; because every consumer's clone is a strong reference, this falls
/// out of `Arc`'s own ref-counting; no separate "release" protocol is
/// needed.
pub struct RowBatch {
    /// The whole input stream, read once up front (see `SPEC_FULL.md`,
    /// resolved design choice 2). Cells that didn't need materialization
    /// index directly into this.
    pub(crate) main: Arc<[u8]>,
    /// Per-batch string pool: written only by the tokenizer while
    /// producing this batch, read-only afterwards.
    pub(crate) pool: Vec<u8>,
    /// `columns[col][row]` is the cell for that column/row in this batch.
    pub(crate) columns: Vec<Vec<RawCell>>,
    /// Number of rows actually present (may be less than the nominal batch
    /// size for the final batch of a column).
    pub(crate) num_rows: usize,
    /// Absolute row index (0-based, header excluded) of `columns[_][0]`.
    pub(crate) first_row_index: u64,
    /// Set on the terminal batch of the stream.
    pub(crate) is_last: bool,
}

impl RowBatch {
    /// Number of rows present in this batch.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Absolute row index of the first row in this batch.
    pub fn first_row_index(&self) -> u64 {
        self.first_row_index
    }

    /// Whether this is the terminal batch (end-of-stream sentinel).
    pub fn is_last(&self) -> bool {
        self.is_last
    }

    /// Resolves the cell at `(col, row)` to its actual bytes.
    pub fn cell(&self, col: usize, row: usize) -> Cell<'_> {
        let raw = self.columns[col][row];
        let buf = match raw.source {
            CellSource::Main => &self.main[raw.begin as usize..raw.end as usize],
            CellSource::Pool => &self.pool[raw.begin as usize..raw.end as usize],
        };
        Cell {
            buf,
            was_quoted: raw.was_quoted,
        }
    }

    /// All cells of one column in this batch, as a plain slice-friendly
    /// iterator.
    pub fn column_cells(&self, col: usize) -> impl Iterator<Item = Cell<'_>> + '_ {
        (0..self.num_rows).map(move |row| self.cell(col, row))
    }
}

/// Mutable producer-side accumulator for one in-progress batch.
///
/// Owned exclusively by the tokenizer. `begin_batch` / `push_cell` /
/// `materialize` / `is_full` are its contract; `take` freezes the
/// accumulated cells into a shareable [`RowBatch`].
pub(crate) struct BatchBuilder {
    main: Arc<[u8]>,
    pool: Vec<u8>,
    columns: Vec<Vec<RawCell>>,
    batch_size: usize,
    first_row_index: u64,
    rows_started: usize,
}

impl BatchBuilder {
    pub fn new(main: Arc<[u8]>, num_columns: usize, batch_size: usize) -> Self {
        BatchBuilder {
            main,
            pool: Vec::new(),
            columns: vec![Vec::with_capacity(batch_size); num_columns],
            batch_size,
            first_row_index: 0,
            rows_started: 0,
        }
    }

    /// Resets the cell count to zero and the string pool to empty, keeping
    /// the allocation. Called after a batch is shipped.
    pub fn begin_batch(&mut self, first_row_index: u64) {
        for col in &mut self.columns {
            col.clear();
        }
        self.pool.clear();
        self.first_row_index = first_row_index;
        self.rows_started = 0;
    }

    /// Appends a cell directly referencing the shared input buffer.
    pub fn push_cell_from_main(&mut self, col: usize, begin: u32, end: u32, was_quoted: bool) {
        self.columns[col].push(RawCell {
            source: CellSource::Main,
            begin,
            end,
            was_quoted,
        });
    }

    /// Copies `bytes` into the pool and appends a cell referencing the
    /// copy. Used when a cell is not a contiguous subrange of the input
    /// (doubled quotes needing collapse, or a cell reassembled after
    /// trimming whitespace inside quotes).
    pub fn materialize(&mut self, col: usize, bytes: &[u8], was_quoted: bool) {
        let begin = self.pool.len() as u32;
        self.pool.extend_from_slice(bytes);
        let end = self.pool.len() as u32;
        self.columns[col].push(RawCell {
            source: CellSource::Pool,
            begin,
            end,
            was_quoted,
        });
    }

    /// Pads a short row with an empty, unquoted cell (`allow_missing_columns`).
    pub fn push_empty_cell(&mut self, col: usize) {
        self.columns[col].push(RawCell {
            source: CellSource::Main,
            begin: 0,
            end: 0,
            was_quoted: false,
        });
    }

    pub fn note_row_started(&mut self) {
        self.rows_started += 1;
    }

    /// A batch is "full" when any column has reached `batch_size` cells.
    pub fn is_full(&self) -> bool {
        self.columns.iter().any(|c| c.len() >= self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.rows_started == 0
    }

    /// Freezes the accumulated cells into a shareable batch. Does not reset
    /// internal state; call `begin_batch` afterwards.
    pub fn take(&self, is_last: bool) -> Arc<RowBatch> {
        Arc::new(RowBatch {
            main: self.main.clone(),
            pool: self.pool.clone(),
            columns: self.columns.clone(),
            num_rows: self.rows_started,
            first_row_index: self.first_row_index,
            is_last,
        })
    }
}
