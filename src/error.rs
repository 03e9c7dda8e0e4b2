//! Error types surfaced by the reader.

use std::fmt;

use thiserror::Error;

/// Errors that can terminate a read.
///
/// Every worker (tokenizer or column) publishes its first error into a
/// shared slot (see [`crate::reader`]); the orchestrator surfaces exactly
/// one of these and never returns a partial result.
#[derive(Error, Debug)]
pub enum ReadError {
    /// A quoted field was never closed before EOF (or a bare `\r\n` ended
    /// the buffer while still inside a quote).
    #[error("unterminated quoted field")]
    MalformedQuotedField,

    /// A byte other than the delimiter, a newline, or an allowed space
    /// followed a closing quote.
    #[error("unexpected byte {byte:#04x} after closing quote")]
    JunkAfterClosingQuote {
        /// The offending byte.
        byte: u8,
    },

    /// A data row had fewer cells than the header width and
    /// `allow_missing_columns` was not set.
    #[error("row {row} has {actual} columns, expected {expected}")]
    TooFewColumns {
        /// Zero-based data row index.
        row: u64,
        /// Width established by the header (or first data row).
        expected: usize,
        /// Width actually observed.
        actual: usize,
    },

    /// A data row had more cells than the header width and
    /// `ignore_excess_columns` was not set.
    #[error("row {row} has {actual} columns, expected {expected}")]
    TooManyColumns {
        /// Zero-based data row index.
        row: u64,
        /// Width established by the header (or first data row).
        expected: usize,
        /// Width actually observed.
        actual: usize,
    },

    /// Header legalization/validation rejected the header row, or it
    /// contained duplicate or empty names after legalization.
    #[error("invalid header: {0}")]
    HeaderInvalid(String),

    /// Every candidate parser for a column failed at some row; there is no
    /// further fallback (string, the parser of last resort, is infallible,
    /// so this should only occur for a `forced_parser` column).
    #[error("no parser matched row {row}, column {column:?}: {value:?}")]
    NoParserMatched {
        /// Absolute row index of the failing cell.
        row: u64,
        /// Column name.
        column: String,
        /// The raw cell text that failed to parse (lossily decoded).
        value: String,
    },

    /// A caller-supplied sink rejected a write.
    #[error("sink write failed for column {column:?}: {message}")]
    SinkWriteFailure {
        /// Column name.
        column: String,
        /// Message from the sink.
        message: String,
    },

    /// This worker stopped because another worker failed first.
    #[error("aborted because another worker failed")]
    AbortedByPeer,

    /// The upstream byte stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by a [`crate::value::Sink`] implementation.
///
/// Carried as a plain message rather than a boxed `dyn Error` so that
/// `Sink` stays object-safe without requiring callers to pick an error
/// type; callers that need richer diagnostics can embed them in the
/// message.
#[derive(Debug, Clone)]
pub struct SinkError(pub String);

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SinkError {}

impl SinkError {
    /// Builds a `SinkError` from any `Display`-able message.
    pub fn new(message: impl fmt::Display) -> Self {
        SinkError(message.to_string())
    }
}
