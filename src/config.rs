//! Caller-resolved configuration.
//!
//! The core only ever consumes already-resolved option values. These
//! types are that resolved form — plain structs, not a builder — callers
//! (or a builder living outside this crate) populate them directly.

use std::sync::Arc;

use crate::parsers::LeafParser;

/// Tokenizer-level options.
#[derive(Clone, Copy)]
pub struct TokenizerOptions {
    /// Byte separating fields. Default `,`.
    pub delimiter: u8,
    /// Byte delimiting quoted fields; doubled inside a quoted field is a
    /// literal. Default `"`.
    pub quote: u8,
    /// If true, the first non-skipped, non-empty row is the header.
    pub has_header_row: bool,
    /// Number of data rows to discard before emitting.
    pub skip_rows: u64,
    /// Maximum number of data rows to emit, if capped.
    pub num_rows: Option<u64>,
    /// Rows whose raw form is exactly a line ending are dropped.
    pub ignore_empty_lines: bool,
    /// Trim ASCII spaces outside quotes.
    pub ignore_surrounding_spaces: bool,
    /// Trim ASCII spaces inside quotes, after unquoting.
    pub trim: bool,
    /// Short rows are padded with empty, unquoted cells instead of erroring.
    pub allow_missing_columns: bool,
    /// Long rows are truncated instead of erroring.
    pub ignore_excess_columns: bool,
    /// Nominal number of rows per batch handed to column workers.
    pub batch_size: usize,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        TokenizerOptions {
            delimiter: b',',
            quote: b'"',
            has_header_row: true,
            skip_rows: 0,
            num_rows: None,
            ignore_empty_lines: false,
            ignore_surrounding_spaces: false,
            trim: false,
            allow_missing_columns: false,
            ignore_excess_columns: false,
            batch_size: 1024,
        }
    }
}

/// Header resolution and per-column overrides.
#[derive(Default)]
pub struct HeaderOptions {
    /// Explicit header names, overriding file headers or supplying absent
    /// ones entirely (used verbatim when `has_header_row` is false).
    pub headers: Option<Vec<String>>,
    /// Per-ordinal (0-based) override, applied after `headers`/the file
    /// header.
    pub header_for_index: Vec<(usize, String)>,
    /// Post-processes each raw header name before validation.
    pub header_legalizer: Option<Arc<dyn Fn(&str) -> String + Send + Sync>>,
    /// Rejects (returns `false` for) a legalized header name.
    pub header_validator: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
}

/// Per-column parser and null-handling overrides.
#[derive(Default)]
pub struct ColumnOptions {
    /// Ordered candidate list used for every column unless overridden.
    /// Empty means "use the crate-default candidate order".
    pub parsers: Vec<&'static str>,
    /// Forces a column's parser by header name, suppressing inference.
    pub parser_for_name: Vec<(String, &'static str)>,
    /// Forces a column's parser by 0-based ordinal, suppressing inference.
    /// Consulted after `parser_for_name`.
    pub parser_for_index: Vec<(usize, &'static str)>,
    /// Default null literal applied to every column unless overridden.
    pub null_value_literal: Option<Vec<u8>>,
    /// Per-name null literal override, consulted before the index override
    /// and the default.
    pub null_literal_for_name: Vec<(String, Vec<u8>)>,
    /// Per-index null literal override.
    pub null_literal_for_index: Vec<(usize, Vec<u8>)>,
    /// Parser committed to when a column is all-null. Defaults to string.
    pub null_parser: Option<&'static str>,
    /// Pluggable numeric parser for the float candidate.
    pub custom_double_parser: Option<Arc<dyn Fn(&[u8]) -> Option<f64> + Send + Sync>>,
    /// Pluggable timezone resolver for offset-less timestamps.
    pub custom_timezone_parser: Option<Arc<dyn Fn(&str) -> Option<i64> + Send + Sync>>,
}

/// Top-level, fully-resolved read configuration.
#[derive(Default)]
pub struct ReaderOptions {
    pub tokenizer: TokenizerOptions,
    pub headers: HeaderOptions,
    pub columns: ColumnOptions,
    /// Parallel tokenizer + one thread per column, vs. a single cooperative
    /// loop.
    pub concurrent: bool,
}

impl ReaderOptions {
    /// Resolves the forced parser name for a column, by name first, then by
    /// ordinal.
    pub(crate) fn forced_parser_for(&self, name: &str, index: usize) -> Option<&'static str> {
        self.columns
            .parser_for_name
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| *p)
            .or_else(|| {
                self.columns
                    .parser_for_index
                    .iter()
                    .find(|(i, _)| *i == index)
                    .map(|(_, p)| *p)
            })
    }

    /// Resolves the null literal for a column, by name first, then by
    /// ordinal, then the default.
    pub(crate) fn null_literal_for(&self, name: &str, index: usize) -> Option<Vec<u8>> {
        self.columns
            .null_literal_for_name
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, lit)| lit.clone())
            .or_else(|| {
                self.columns
                    .null_literal_for_index
                    .iter()
                    .find(|(i, _)| *i == index)
                    .map(|(_, lit)| lit.clone())
            })
            .or_else(|| self.columns.null_value_literal.clone())
    }
}
