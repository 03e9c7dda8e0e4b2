//! The byte-slice abstraction at the bottom of the pipeline.
//!
//! Unlike the teacher's `Cell<'a> { buf: &'a [u8] }`, a cell here is an
//! index `(source, begin, end)` into whichever buffer a [`RowBatch`] owns,
//! not a Rust borrow. Batches are passed between threads wrapped in `Arc`,
//! so a self-referential `&[u8]` would not work; resolving the index
//! against its owning batch happens lazily at the point of use.
//!
//! [`RowBatch`]: crate::batch::RowBatch

/// Which of a batch's two buffers a [`RawCell`] indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellSource {
    /// The shared input buffer, read once up front for the whole stream.
    Main,
    /// The batch's private string pool, used when a cell's bytes are not a
    /// contiguous subrange of the input (doubled quotes, or trimming that
    /// would otherwise require tracking two independent offsets).
    Pool,
}

/// An index into one of a batch's buffers, plus the quoted flag.
///
/// Invariant: `0 <= begin <= end`. Never owns memory.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawCell {
    pub source: CellSource,
    pub begin: u32,
    pub end: u32,
    pub was_quoted: bool,
}

/// A single field of a single row, resolved to its actual bytes.
///
/// Constructed on demand from a [`RawCell`] plus the [`RowBatch`] that owns
/// it; its lifetime is tied to that batch, which is what the spec means by
/// "lifetime = lifetime of the underlying buffer for the duration of the
/// current batch".
///
/// [`RowBatch`]: crate::batch::RowBatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell<'a> {
    /// The field's raw bytes, as they appeared in the source (still quoted
    /// and un-escaped if `was_quoted` is set and the field needed
    /// dequoting).
    pub buf: &'a [u8],
    /// Whether the field was wrapped in quotes in the source. Distinguishes
    /// an empty quoted field (`""`) from an empty unquoted field, which
    /// matters for null-literal comparison.
    pub was_quoted: bool,
}

impl<'a> Cell<'a> {
    /// True if this cell should be treated as null for the given column:
    /// the bytes match `null_literal` and the cell was not quoted.
    ///
    /// An empty quoted cell (`""`) never compares equal to the null
    /// literal, even when `null_literal` is the empty string.
    pub fn is_null(&self, null_literal: Option<&[u8]>) -> bool {
        match null_literal {
            Some(lit) => !self.was_quoted && self.buf == lit,
            None => false,
        }
    }
}
