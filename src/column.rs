//! The per-column inference engine: tries each candidate parser in
//! turn, demoting and replaying cached batches on the first parse failure,
//! until a candidate survives through end-of-stream.
//!
//! This is the heart of the crate: the tokenizer and the channel exist to
//! keep this module fed with batches, and everything downstream of a
//! column (the caller's sink) only ever sees values produced by whichever
//! candidate this engine ultimately commits to.

use std::sync::Arc;

use crate::batch::RowBatch;
use crate::cell::Cell;
use crate::error::ReadError;
use crate::parsers::{LeafError, LeafParser, StringParser};
use crate::value::Sink;

/// Which parser a column ended up committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommittedParser {
    /// Index into the column's candidate list.
    Candidate(usize),
    /// Every cell ever seen in this column was null; the designated
    /// null-column fallback was used instead of whichever candidate
    /// happened to be first (every candidate trivially "succeeds" against
    /// an all-null column, so the first-in-list candidate is not a
    /// meaningful answer).
    NullFallback,
}

#[derive(Debug)]
enum ParserState {
    /// No batch has been seen yet.
    Fresh,
    /// Currently trialing `candidate`; every cached batch has parsed under
    /// it so far. Stays in this state until end-of-stream (closed into
    /// `Committed`) or a parse failure (demoted to the next candidate).
    Trying { candidate: usize },
    /// End-of-stream was reached while `Trying`; locked in for good.
    Committed(CommittedParser),
    /// Terminal: either every candidate failed, or the sink rejected a
    /// write, or a committed parser failed on a later batch (impossible in
    /// practice, since commit only happens at end-of-stream, but handled
    /// defensively). Holds a human-readable reason for introspection.
    Failed(String),
}

/// One column's inference state, independent of every other column.
///
/// Construct one per column, then feed it every batch in order (including
/// batches where this column has no cells of interest — still needed to
/// learn that end-of-stream was reached). Not `Send`-bound itself, but
/// designed to be owned and driven entirely by a single worker thread per
/// spec.md's concurrency model: one `ColumnWorker` never needs to be
/// shared.
pub struct ColumnWorker {
    name: String,
    col_index: usize,
    candidates: Vec<Box<dyn LeafParser>>,
    null_parser: Option<Box<dyn LeafParser>>,
    null_literal: Option<Vec<u8>>,
    forced: bool,
    state: ParserState,
    saw_non_null: bool,
    /// Every batch received so far while not yet committed, kept alive via
    /// `Arc` so a demotion can replay them through the next candidate
    /// without re-reading from the channel.
    replay: Vec<Arc<RowBatch>>,
}

impl ColumnWorker {
    /// Builds a worker trying `candidates` in order. Unless `forced` is
    /// set, a [`StringParser`] is appended automatically if the list
    /// doesn't already end in one, so that every non-forced column always
    /// has an infallible last resort.
    pub fn new(
        name: String,
        col_index: usize,
        mut candidates: Vec<Box<dyn LeafParser>>,
        forced: bool,
        null_parser: Option<Box<dyn LeafParser>>,
        null_literal: Option<Vec<u8>>,
    ) -> Self {
        if !forced && candidates.last().map(|p| p.name()) != Some("string") {
            candidates.push(Box::new(StringParser));
        }
        ColumnWorker {
            name,
            col_index,
            candidates,
            null_parser,
            null_literal,
            forced,
            state: ParserState::Fresh,
            saw_non_null: false,
            replay: Vec::new(),
        }
    }

    /// The name of the parser currently committed to, if any.
    pub fn committed_type(&self) -> Option<CommittedParser> {
        match self.state {
            ParserState::Committed(which) => Some(which),
            _ => None,
        }
    }

    fn column_cells<'b>(&self, batch: &'b RowBatch) -> Vec<Cell<'b>> {
        batch.column_cells(self.col_index).collect()
    }

    fn has_non_null(&self, batch: &RowBatch) -> bool {
        batch
            .column_cells(self.col_index)
            .any(|c| !c.is_null(self.null_literal.as_deref()))
    }

    /// Feeds one batch through this column's state machine, writing
    /// whatever committed (or currently-trialed) candidate produces into
    /// `sink`. Must be called with every batch, in stream order, including
    /// the terminal batch (`batch.is_last()`), so that end-of-stream
    /// closure can happen.
    pub fn process_batch(
        &mut self,
        batch: Arc<RowBatch>,
        sink: &mut dyn Sink,
    ) -> Result<(), ReadError> {
        if let ParserState::Failed(_) = self.state {
            return Err(ReadError::AbortedByPeer);
        }

        if self.has_non_null(&batch) {
            self.saw_non_null = true;
        }

        match self.state {
            ParserState::Committed(which) => self.run_committed(which, &batch, sink)?,
            ParserState::Fresh | ParserState::Trying { .. } => {
                let start = match self.state {
                    ParserState::Fresh => 0,
                    ParserState::Trying { candidate } => candidate,
                    _ => unreachable!(),
                };
                self.replay.push(batch.clone());
                self.try_from(start, sink)?;
            }
            ParserState::Failed(_) => unreachable!("checked above"),
        }

        if batch.is_last() {
            self.close_at_eof()?;
        }
        Ok(())
    }

    /// Once committed, later batches (there normally are none, since
    /// commit only happens on the terminal batch) are parsed straight
    /// through with no caching; a failure here is unrecoverable.
    fn run_committed(
        &mut self,
        which: CommittedParser,
        batch: &RowBatch,
        sink: &mut dyn Sink,
    ) -> Result<(), ReadError> {
        let candidate: &dyn LeafParser = match which {
            CommittedParser::Candidate(id) => self.candidates[id].as_ref(),
            CommittedParser::NullFallback => match &self.null_parser {
                Some(p) => p.as_ref(),
                None => return Ok(()),
            },
        };
        let cells = self.column_cells(batch);
        match candidate.try_parse_batch(
            &cells,
            self.null_literal.as_deref(),
            sink,
            batch.first_row_index(),
        ) {
            Ok(_) => Ok(()),
            Err(LeafError::SinkFailure(e)) => {
                let err = ReadError::SinkWriteFailure {
                    column: self.name.clone(),
                    message: e.0.clone(),
                };
                self.state = ParserState::Failed(err.to_string());
                Err(err)
            }
            Err(LeafError::ParseFailure { at_index }) => {
                let value = String::from_utf8_lossy(cells[at_index].buf).into_owned();
                let err = ReadError::NoParserMatched {
                    row: batch.first_row_index() + at_index as u64,
                    column: self.name.clone(),
                    value,
                };
                self.state = ParserState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    /// Tries candidates starting at `start`, replaying every cached batch
    /// against each one, until a candidate survives the whole cache or the
    /// list is exhausted.
    fn try_from(&mut self, start: usize, sink: &mut dyn Sink) -> Result<(), ReadError> {
        let mut id = start;
        // The most recent parse failure observed during replay: the
        // absolute row index and the raw cell text that failed. Carried
        // across demotions so that whichever branch ultimately gives up
        // (forced-parser failure, or candidate list exhaustion) reports the
        // real failing row/value rather than a placeholder.
        let mut last_failure: Option<(u64, String)> = None;
        loop {
            if id >= self.candidates.len() {
                let (row, value) = last_failure.unwrap_or_else(|| {
                    (
                        self.replay.first().map(|b| b.first_row_index()).unwrap_or(0),
                        String::new(),
                    )
                });
                let err = ReadError::NoParserMatched {
                    row,
                    column: self.name.clone(),
                    value,
                };
                self.state = ParserState::Failed(err.to_string());
                return Err(err);
            }

            sink.truncate_and_reopen().map_err(|e| {
                let err = ReadError::SinkWriteFailure {
                    column: self.name.clone(),
                    message: e.0.clone(),
                };
                self.state = ParserState::Failed(err.to_string());
                err
            })?;

            let mut failed_at: Option<(u64, String)> = None;
            for batch in &self.replay {
                let cells = batch
                    .column_cells(self.col_index)
                    .collect::<Vec<_>>();
                match self.candidates[id].try_parse_batch(
                    &cells,
                    self.null_literal.as_deref(),
                    sink,
                    batch.first_row_index(),
                ) {
                    Ok(_) => {}
                    Err(LeafError::ParseFailure { at_index }) => {
                        let value = String::from_utf8_lossy(cells[at_index].buf).into_owned();
                        failed_at = Some((batch.first_row_index() + at_index as u64, value));
                        break;
                    }
                    Err(LeafError::SinkFailure(e)) => {
                        let err = ReadError::SinkWriteFailure {
                            column: self.name.clone(),
                            message: e.0.clone(),
                        };
                        self.state = ParserState::Failed(err.to_string());
                        return Err(err);
                    }
                }
            }

            if failed_at.is_none() {
                if self.forced || id == self.candidates.len() - 1 {
                    // Forced, or the parser of last resort: no further
                    // candidate could ever be tried, so there is nothing
                    // left to falsify — commit now rather than waiting for
                    // end-of-stream.
                    self.commit(id);
                } else {
                    if id > start {
                        log::debug!(
                            "column {:?} settled on candidate {} ({})",
                            self.name,
                            id,
                            self.candidates[id].name()
                        );
                    }
                    self.state = ParserState::Trying { candidate: id };
                }
                return Ok(());
            }
            if id + 1 < self.candidates.len() {
                log::debug!(
                    "column {:?} demoted from {} to {}",
                    self.name,
                    self.candidates[id].name(),
                    self.candidates[id + 1].name()
                );
            }
            if self.forced {
                let (row, value) = failed_at.expect("checked above");
                let err = ReadError::NoParserMatched {
                    row,
                    column: self.name.clone(),
                    value,
                };
                self.state = ParserState::Failed(err.to_string());
                return Err(err);
            }
            last_failure = failed_at;
            id += 1;
        }
    }

    /// Locks in `candidate` for good: every row since row 0 parsed under it
    /// without falsification, and there is no more data (or no more
    /// candidates) that could change that. Applies the all-null override
    /// and frees the replay cache.
    fn commit(&mut self, candidate: usize) {
        if !self.saw_non_null && self.null_parser.is_some() {
            // Every candidate trivially parses an all-null column, since
            // null cells bypass the type check entirely; the writes
            // already on the sink are correct regardless of which
            // candidate produced them, so only the label changes.
            self.state = ParserState::Committed(CommittedParser::NullFallback);
        } else {
            self.state = ParserState::Committed(CommittedParser::Candidate(candidate));
        }
        self.replay.clear();
    }

    fn close_at_eof(&mut self) -> Result<(), ReadError> {
        match self.state {
            ParserState::Trying { candidate } => {
                self.commit(candidate);
                Ok(())
            }
            ParserState::Fresh => {
                // Zero-row column (header-only stream, or every candidate
                // was rejected-as-unneeded... in practice just means no
                // cell was ever seen). Commit to the first candidate
                // arbitrarily; nothing was ever written.
                self.commit(0);
                Ok(())
            }
            ParserState::Committed(_) => Ok(()),
            ParserState::Failed(_) => Err(ReadError::AbortedByPeer),
        }
    }
}
