//! Leaf value parsers: a polymorphic family that each attempt to
//! convert a cell into one [`Value`] variant and write it into a [`Sink`].
//!
//! The concrete parsers here are the implementer-supplied "equivalents"
//! spec.md calls for; the contract (`LeafParser`) is the actual core.

use std::sync::Arc;

use crate::cell::Cell;
use crate::error::SinkError;
use crate::value::{Sink, Value};

/// Returned by [`LeafParser::try_parse_batch`] when it could not consume
/// the whole batch.
#[derive(Debug)]
pub enum LeafError {
    /// A cell did not parse as this candidate's type. Triggers demotion in
    /// the inference engine; `at_index` is relative to the slice
    /// passed to `try_parse_batch`.
    ParseFailure {
        /// Index, within the batch passed to `try_parse_batch`, of the
        /// first cell that failed to parse.
        at_index: usize,
    },
    /// The sink rejected a write. Unlike `ParseFailure`, this is never a
    /// reason to demote — it propagates straight out as
    /// `ReadError::SinkWriteFailure`.
    SinkFailure(SinkError),
}

impl From<SinkError> for LeafError {
    fn from(err: SinkError) -> Self {
        LeafError::SinkFailure(err)
    }
}

/// A candidate column-type parser.
///
/// Implementations must be pure and idempotent with respect to the sink
/// region `[first_row_index, first_row_index + n_consumed)`: calling
/// `try_parse_batch` twice with the same arguments must produce the same
/// writes, since the inference engine replays cached rows through a new
/// candidate after a demotion.
pub trait LeafParser: Send + Sync {
    /// A short name identifying this parser's target type, used in error
    /// messages and to resolve `parser_for_name`/`forced_parser` overrides.
    fn name(&self) -> &'static str;

    /// Attempts to parse every cell in `cells`, writing each result to
    /// `sink` at `first_row_index + i`.
    ///
    /// A cell equal to `null_literal` (only when it was *not* quoted) is
    /// always written as null, regardless of whether it would otherwise
    /// parse as this type.
    ///
    /// On success, returns the number of cells consumed (always
    /// `cells.len()`). On the first cell that fails to parse, stops
    /// without writing that cell or any after it, and returns
    /// `Err(LeafError::ParseFailure)`. If the sink itself rejects a write,
    /// returns `Err(LeafError::SinkFailure)` instead — that is never a
    /// reason to demote.
    fn try_parse_batch(
        &self,
        cells: &[Cell<'_>],
        null_literal: Option<&[u8]>,
        sink: &mut dyn Sink,
        first_row_index: u64,
    ) -> Result<usize, LeafError>;
}

/// Drives the common "null check, else parse-and-write" loop shared by
/// every primitive parser; `parse` returns `None` on a genuine parse
/// failure.
fn run_batch<'a>(
    cells: &[Cell<'a>],
    null_literal: Option<&[u8]>,
    sink: &mut dyn Sink,
    first_row_index: u64,
    mut parse: impl FnMut(&'a [u8]) -> Option<Value<'a>>,
) -> Result<usize, LeafError> {
    for (i, cell) in cells.iter().enumerate() {
        let row_index = first_row_index + i as u64;
        if cell.is_null(null_literal) {
            sink.append_null(row_index)?;
            continue;
        }
        match parse(cell.buf) {
            Some(value) => sink.append_value(row_index, value)?,
            None => return Err(LeafError::ParseFailure { at_index: i }),
        }
    }
    Ok(cells.len())
}

/// Case-insensitive `true`/`false` parser.
#[derive(Debug, Default)]
pub struct BoolParser;

impl LeafParser for BoolParser {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn try_parse_batch(
        &self,
        cells: &[Cell<'_>],
        null_literal: Option<&[u8]>,
        sink: &mut dyn Sink,
        first_row_index: u64,
    ) -> Result<usize, LeafError> {
        run_batch(cells, null_literal, sink, first_row_index, |buf| {
            if buf.eq_ignore_ascii_case(b"true") {
                Some(Value::Bool(true))
            } else if buf.eq_ignore_ascii_case(b"false") {
                Some(Value::Bool(false))
            } else {
                None
            }
        })
    }
}

/// Byte-by-byte base-10 signed integer parser, rejecting overflow.
#[derive(Debug, Default)]
pub struct IntParser;

fn parse_int(buf: &[u8]) -> Option<i64> {
    if buf.is_empty() {
        return None;
    }
    let (negative, digits) = match buf[0] {
        b'+' => (false, &buf[1..]),
        b'-' => (true, &buf[1..]),
        _ => (false, buf),
    };
    if digits.is_empty() {
        return None;
    }
    // Accumulate the magnitude in u64 so `i64::MIN`'s magnitude (one past
    // `i64::MAX`) doesn't overflow before the sign is applied.
    let mut acc: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        let digit = (b - b'0') as u64;
        acc = acc.checked_mul(10)?.checked_add(digit)?;
    }
    if negative {
        if acc > i64::MIN.unsigned_abs() {
            return None;
        }
        Some((acc as i64).wrapping_neg())
    } else {
        i64::try_from(acc).ok()
    }
}

impl LeafParser for IntParser {
    fn name(&self) -> &'static str {
        "int"
    }

    fn try_parse_batch(
        &self,
        cells: &[Cell<'_>],
        null_literal: Option<&[u8]>,
        sink: &mut dyn Sink,
        first_row_index: u64,
    ) -> Result<usize, LeafError> {
        run_batch(cells, null_literal, sink, first_row_index, |buf| {
            parse_int(buf).map(Value::Int)
        })
    }
}

/// Floating-point parser, delegating to a pluggable numeric parser so
/// callers can swap in a decimal-comma or locale-aware implementation.
pub struct FloatParser {
    custom: Option<Arc<dyn Fn(&[u8]) -> Option<f64> + Send + Sync>>,
}

impl Default for FloatParser {
    fn default() -> Self {
        FloatParser { custom: None }
    }
}

impl FloatParser {
    /// Uses the standard library's `f64::from_str` (via UTF-8 validation)
    /// as the numeric parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies a custom numeric parser, overriding the default
    /// `f64::from_str`-based one (for a locale-aware or decimal-comma
    /// parser, for instance).
    pub fn with_custom_parser(f: Arc<dyn Fn(&[u8]) -> Option<f64> + Send + Sync>) -> Self {
        FloatParser { custom: Some(f) }
    }

    fn parse(&self, buf: &[u8]) -> Option<f64> {
        if let Some(custom) = &self.custom {
            return custom(buf);
        }
        std::str::from_utf8(buf).ok()?.trim().parse::<f64>().ok()
    }
}

impl LeafParser for FloatParser {
    fn name(&self) -> &'static str {
        "float"
    }

    fn try_parse_batch(
        &self,
        cells: &[Cell<'_>],
        null_literal: Option<&[u8]>,
        sink: &mut dyn Sink,
        first_row_index: u64,
    ) -> Result<usize, LeafError> {
        run_batch(cells, null_literal, sink, first_row_index, |buf| {
            self.parse(buf).map(Value::Float)
        })
    }
}

/// ISO-8601 timestamp parser (date, or date+time with an optional `Z`/
/// `+HH:MM` offset), with an optional custom timezone resolution hook for
/// offset-less timestamps.
pub struct TimestampParser {
    custom_timezone: Option<Arc<dyn Fn(&str) -> Option<i64> + Send + Sync>>,
}

impl Default for TimestampParser {
    fn default() -> Self {
        TimestampParser {
            custom_timezone: None,
        }
    }
}

impl TimestampParser {
    /// No custom timezone resolution: offset-less timestamps are rejected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies a timezone resolution hook: given the offset-less local
    /// time text, returns a UTC offset in seconds.
    pub fn with_custom_timezone(f: Arc<dyn Fn(&str) -> Option<i64> + Send + Sync>) -> Self {
        TimestampParser {
            custom_timezone: Some(f),
        }
    }

    fn parse(&self, buf: &[u8]) -> Option<i64> {
        let s = std::str::from_utf8(buf).ok()?.trim();
        parse_iso8601(s, self.custom_timezone.as_deref())
    }
}

/// Parses a (small) subset of ISO-8601: `YYYY-MM-DD`, optionally followed
/// by `T`/space + `HH:MM:SS` (with optional `.fraction`), optionally
/// followed by `Z` or a `+HH:MM`/`-HH:MM` offset. Returns microseconds
/// since the Unix epoch in UTC.
fn parse_iso8601(
    s: &str,
    custom_timezone: Option<&(dyn Fn(&str) -> Option<i64> + Send + Sync)>,
) -> Option<i64> {
    let bytes = s.as_bytes();
    if bytes.len() < 10 {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    if bytes[4] != b'-' {
        return None;
    }
    let month: i64 = s.get(5..7)?.parse().ok()?;
    if bytes[7] != b'-' {
        return None;
    }
    let day: i64 = s.get(8..10)?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let days_since_epoch = days_from_civil(year, month, day);
    let mut seconds_of_day: i64 = 0;
    let mut micros: i64 = 0;
    let mut offset_seconds: i64 = 0;
    let mut rest = &s[10..];

    if !rest.is_empty() {
        let sep = rest.as_bytes()[0];
        if sep != b'T' && sep != b't' && sep != b' ' {
            return None;
        }
        rest = &rest[1..];

        let hh: i64 = rest.get(0..2)?.parse().ok()?;
        if rest.as_bytes().get(2) != Some(&b':') {
            return None;
        }
        let mm: i64 = rest.get(3..5)?.parse().ok()?;
        if rest.as_bytes().get(5) != Some(&b':') {
            return None;
        }
        let ss: i64 = rest.get(6..8)?.parse().ok()?;
        if !(0..24).contains(&hh) || !(0..60).contains(&mm) || !(0..60).contains(&ss) {
            return None;
        }
        seconds_of_day = hh * 3600 + mm * 60 + ss;
        rest = &rest[8..];

        if rest.starts_with('.') {
            let frac_end = rest[1..]
                .find(|c: char| !c.is_ascii_digit())
                .map(|i| i + 1)
                .unwrap_or(rest.len());
            let frac_str = &rest[1..frac_end];
            let mut micros_str = frac_str.to_string();
            micros_str.truncate(6);
            while micros_str.len() < 6 {
                micros_str.push('0');
            }
            micros = micros_str.parse().ok()?;
            rest = &rest[frac_end..];
        }

        if rest == "Z" || rest == "z" {
            rest = "";
        } else if let Some(r) = rest.strip_prefix(['+', '-']) {
            let sign = if rest.starts_with('-') { -1 } else { 1 };
            let oh: i64 = r.get(0..2)?.parse().ok()?;
            let om: i64 = if r.as_bytes().get(2) == Some(&b':') {
                r.get(3..5)?.parse().ok()?
            } else {
                r.get(2..4)?.parse().ok()?
            };
            offset_seconds = sign * (oh * 3600 + om * 60);
            rest = "";
        } else {
            match custom_timezone {
                Some(resolve) => offset_seconds = resolve(rest)?,
                None => return None,
            }
            rest = "";
        }
    }

    if !rest.is_empty() {
        return None;
    }

    let total_seconds = days_since_epoch * 86_400 + seconds_of_day - offset_seconds;
    Some(total_seconds * 1_000_000 + micros)
}

/// Howard Hinnant's days-from-civil algorithm: days since the Unix epoch
/// for a proleptic-Gregorian `(year, month, day)`.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

impl LeafParser for TimestampParser {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn try_parse_batch(
        &self,
        cells: &[Cell<'_>],
        null_literal: Option<&[u8]>,
        sink: &mut dyn Sink,
        first_row_index: u64,
    ) -> Result<usize, LeafError> {
        run_batch(cells, null_literal, sink, first_row_index, |buf| {
            self.parse(buf).map(Value::Timestamp)
        })
    }
}

/// Infallible string parser; raw bytes are lossily decoded to UTF-8 and
/// copied into the sink. Always the parser of last resort: if a
/// caller's candidate list doesn't already end with one, the engine
/// appends it.
#[derive(Debug, Default)]
pub struct StringParser;

impl LeafParser for StringParser {
    fn name(&self) -> &'static str {
        "string"
    }

    fn try_parse_batch(
        &self,
        cells: &[Cell<'_>],
        null_literal: Option<&[u8]>,
        sink: &mut dyn Sink,
        first_row_index: u64,
    ) -> Result<usize, LeafError> {
        for (i, cell) in cells.iter().enumerate() {
            let row_index = first_row_index + i as u64;
            if cell.is_null(null_literal) {
                sink.append_null(row_index)?;
            } else {
                let text = String::from_utf8_lossy(cell.buf);
                sink.append_value(row_index, Value::Str(text))?;
            }
        }
        Ok(cells.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(buf: &'static [u8]) -> Cell<'static> {
        Cell {
            buf,
            was_quoted: false,
        }
    }

    #[test]
    fn int_parser_rejects_overflow() {
        assert_eq!(parse_int(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_int(b"9223372036854775808"), None);
        assert_eq!(parse_int(b"-9223372036854775808"), Some(i64::MIN));
    }

    #[test]
    fn int_parser_accepts_sign() {
        assert_eq!(parse_int(b"+42"), Some(42));
        assert_eq!(parse_int(b"-42"), Some(-42));
        assert_eq!(parse_int(b""), None);
        assert_eq!(parse_int(b"+"), None);
        assert_eq!(parse_int(b"4a"), None);
    }

    #[test]
    fn timestamp_parses_date_only() {
        let p = TimestampParser::new();
        // 1970-01-02 = 86_400 seconds after epoch.
        assert_eq!(p.parse(b"1970-01-02"), Some(86_400 * 1_000_000));
    }

    #[test]
    fn timestamp_parses_datetime_with_z() {
        let p = TimestampParser::new();
        assert_eq!(p.parse(b"1970-01-01T00:00:01Z"), Some(1_000_000));
    }

    #[test]
    fn timestamp_rejects_offsetless_without_hook() {
        let p = TimestampParser::new();
        assert_eq!(p.parse(b"1970-01-01T00:00:00"), None);
    }

    #[test]
    fn bool_parser_is_case_insensitive() {
        assert!(matches!(cell(b"TRUE").buf, b"TRUE"));
    }
}
