use std::sync::{Arc, Mutex};

use inferring_csv::error::SinkError;
use inferring_csv::value::{Sink, Value};
use inferring_csv::{read, ColumnMeta, ReadError, ReaderOptions};

type Column = Arc<Mutex<Vec<Option<Value<'static>>>>>;

struct RecordingSink(Column);

impl Sink for RecordingSink {
    fn append_value(&mut self, row_index: u64, value: Value<'_>) -> Result<(), SinkError> {
        let owned = match value {
            Value::Bool(b) => Value::Bool(b),
            Value::Int(i) => Value::Int(i),
            Value::Float(f) => Value::Float(f),
            Value::Timestamp(t) => Value::Timestamp(t),
            Value::Str(s) => Value::Str(std::borrow::Cow::Owned(s.into_owned())),
        };
        let idx = row_index as usize;
        let mut rows = self.0.lock().unwrap();
        if rows.len() <= idx {
            rows.resize(idx + 1, None);
        }
        rows[idx] = Some(owned);
        Ok(())
    }

    fn append_null(&mut self, row_index: u64) -> Result<(), SinkError> {
        let idx = row_index as usize;
        let mut rows = self.0.lock().unwrap();
        if rows.len() <= idx {
            rows.resize(idx + 1, None);
        }
        rows[idx] = None;
        Ok(())
    }

    fn truncate_and_reopen(&mut self) -> Result<(), SinkError> {
        self.0.lock().unwrap().clear();
        Ok(())
    }
}

/// Reads `input`, returning the row count, every column's recorded values
/// (in column order), and every resolved header name.
fn read_all(input: &[u8], options: ReaderOptions) -> (u64, Vec<Vec<Option<Value<'static>>>>, Vec<String>) {
    let columns: Arc<Mutex<Vec<Column>>> = Arc::new(Mutex::new(Vec::new()));
    let names: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let columns_clone = columns.clone();
    let names_clone = names.clone();
    let summary = read(input, options, move |meta: ColumnMeta<'_>| {
        names_clone.lock().unwrap().push(meta.name.to_string());
        let column: Column = Arc::new(Mutex::new(Vec::new()));
        columns_clone.lock().unwrap().push(column.clone());
        Box::new(RecordingSink(column)) as Box<dyn Sink>
    })
    .unwrap();
    let values = columns
        .lock()
        .unwrap()
        .iter()
        .map(|c| c.lock().unwrap().clone())
        .collect();
    (summary.num_rows, values, names.lock().unwrap().clone())
}

fn str_values(column: &[Option<Value<'static>>]) -> Vec<Option<String>> {
    column
        .iter()
        .map(|v| match v {
            Some(Value::Str(s)) => Some(s.to_string()),
            Some(Value::Int(i)) => Some(i.to_string()),
            None => None,
            other => panic!("unexpected value: {other:?}"),
        })
        .collect()
}

fn sink_factory() -> impl FnMut(ColumnMeta<'_>) -> Box<dyn Sink> {
    move |_meta| Box::new(RecordingSink(Arc::new(Mutex::new(Vec::new())))) as Box<dyn Sink>
}

/// S1: plain integers, all three columns infer to `int`.
#[test]
fn s1_all_int_columns() {
    let (num_rows, columns, _names) = read_all(b"a,b,c\n1,2,3\n4,5,6\n", ReaderOptions::default());
    assert_eq!(num_rows, 2);
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[0], vec![Some(Value::Int(1)), Some(Value::Int(4))]);
    assert_eq!(columns[1], vec![Some(Value::Int(2)), Some(Value::Int(5))]);
    assert_eq!(columns[2], vec![Some(Value::Int(3)), Some(Value::Int(6))]);
}

/// S2: a column that looks like ints until the last row demotes all the
/// way to string, replaying every previously-written row.
#[test]
fn s2_demotes_to_string_on_trailing_text() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (num_rows, columns, _names) = read_all(b"x\n1\n2\nfoo\n", ReaderOptions::default());
    assert_eq!(num_rows, 3);
    assert_eq!(
        str_values(&columns[0]),
        vec![Some("1".into()), Some("2".into()), Some("foo".into())]
    );
}

/// S3: quoted fields, one needing doubled-quote collapse via the pool.
#[test]
fn s3_dequotes_via_pool() {
    let (_num_rows, columns, _names) =
        read_all(b"v\n\"a,b\"\n\"he said \"\"hi\"\"\"\n", ReaderOptions::default());
    assert_eq!(
        str_values(&columns[0]),
        vec![Some("a,b".into()), Some("he said \"hi\"".into())]
    );
}

/// S4: a short row without `allow_missing_columns` errors with the
/// 1-based data row number.
#[test]
fn s4_too_few_columns_reports_row_number() {
    let err = read(b"p,q\n1\n".as_slice(), ReaderOptions::default(), sink_factory()).unwrap_err();
    match err {
        ReadError::TooFewColumns { row, expected, actual } => {
            assert_eq!(row, 1);
            assert_eq!(expected, 2);
            assert_eq!(actual, 1);
        }
        other => panic!("expected TooFewColumns, got {other:?}"),
    }
}

/// S5: an all-null column commits to the configured null-column fallback
/// rather than whichever candidate happened to be tried first.
#[test]
fn s5_all_null_column_uses_null_fallback() {
    let mut options = ReaderOptions::default();
    options.columns.null_value_literal = Some(b"".to_vec());
    let (_num_rows, columns, _names) = read_all(b"k\n\n\n\n", options);
    assert_eq!(columns[0], vec![None, None, None]);
}

/// S6: an unterminated quoted field is a hard parse error, not a
/// best-effort recovery.
#[test]
fn s6_unterminated_quote_errors() {
    let err = read(b"\"unterminated".as_slice(), ReaderOptions::default(), sink_factory()).unwrap_err();
    assert!(matches!(err, ReadError::MalformedQuotedField));
}

#[test]
fn empty_input_yields_no_columns() {
    let summary = read(b"".as_slice(), ReaderOptions::default(), sink_factory()).unwrap();
    assert_eq!(summary.num_rows, 0);
    assert!(summary.sinks.is_empty());
}

#[test]
fn sequential_mode_matches_concurrent_mode() {
    let input = b"a,b\n1,x\n2,y\n3,z\n".as_slice();
    let mut concurrent_opts = ReaderOptions::default();
    concurrent_opts.concurrent = true;
    let mut sequential_opts = ReaderOptions::default();
    sequential_opts.concurrent = false;

    let (concurrent_rows, concurrent_columns, _) = read_all(input, concurrent_opts);
    let (sequential_rows, sequential_columns, _) = read_all(input, sequential_opts);

    assert_eq!(concurrent_rows, sequential_rows);
    assert_eq!(concurrent_columns, sequential_columns);
}

#[test]
fn forced_parser_rejects_non_matching_value() {
    let mut options = ReaderOptions::default();
    options.columns.parser_for_name.push(("a".to_string(), "int"));
    let err = read(b"a\nnotanumber\n".as_slice(), options, sink_factory()).unwrap_err();
    match err {
        ReadError::NoParserMatched { row, column, value } => {
            assert_eq!(row, 0);
            assert_eq!(column, "a");
            assert_eq!(value, "notanumber");
        }
        other => panic!("expected NoParserMatched, got {other:?}"),
    }
}

#[test]
fn custom_headers_override_file_header() {
    let mut options = ReaderOptions::default();
    options.headers.headers = Some(vec!["first".to_string(), "second".to_string()]);
    let (_num_rows, _columns, names) = read_all(b"a,b\n1,2\n", options);
    assert_eq!(names, vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn duplicate_headers_are_rejected() {
    let err = read(b"a,a\n1,2\n".as_slice(), ReaderOptions::default(), sink_factory()).unwrap_err();
    assert!(matches!(err, ReadError::HeaderInvalid(_)));
}

/// Random byte soup must never panic: every outcome should be a
/// `Result`, whether that resolves to a parsed summary or a `ReadError`.
#[test]
fn random_bytes_never_panic() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let len = rng.gen_range(0..256);
        let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let _ = read(bytes.as_slice(), ReaderOptions::default(), sink_factory());
    }
}

/// Property 4 (skip/limit correctness): `skip_rows=s, num_rows=n` yields
/// exactly the input's data rows `[s, s+n)`.
#[test]
fn skip_rows_and_num_rows_select_a_window() {
    let mut options = ReaderOptions::default();
    options.tokenizer.skip_rows = 2;
    options.tokenizer.num_rows = Some(3);
    let (num_rows, columns, _names) =
        read_all(b"k\n0\n1\n2\n3\n4\n5\n6\n7\n".as_slice(), options);
    assert_eq!(num_rows, 3);
    assert_eq!(
        str_values(&columns[0]),
        vec![Some("2".into()), Some("3".into()), Some("4".into())]
    );
}

#[test]
fn num_rows_alone_caps_emission_at_start_of_file() {
    let mut options = ReaderOptions::default();
    options.tokenizer.num_rows = Some(2);
    let (num_rows, columns, _names) = read_all(b"k\n0\n1\n2\n3\n".as_slice(), options);
    assert_eq!(num_rows, 2);
    assert_eq!(
        str_values(&columns[0]),
        vec![Some("0".into()), Some("1".into())]
    );
}

/// §4.B's `has_header_row` entry: "first non-skipped, non-empty row is
/// header" — leading blank lines must be skipped before the header row is
/// read, not just before data rows.
#[test]
fn header_scan_skips_leading_empty_lines() {
    let mut options = ReaderOptions::default();
    options.tokenizer.ignore_empty_lines = true;
    let (num_rows, columns, names) = read_all(b"\n\na,b\n1,2\n".as_slice(), options);
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(num_rows, 1);
    assert_eq!(str_values(&columns[0]), vec![Some("1".into())]);
    assert_eq!(str_values(&columns[1]), vec![Some("2".into())]);
}

#[test]
fn headerless_input_synthesizes_column_names() {
    let mut options = ReaderOptions::default();
    options.tokenizer.has_header_row = false;
    let (_num_rows, _columns, names) = read_all(b"1,2\n3,4\n", options);
    assert_eq!(names, vec!["Column1".to_string(), "Column2".to_string()]);
}
