//! The reader orchestrator: resolves headers, resolves per-column
//! configuration, constructs sinks, spawns workers (or drives them
//! cooperatively), and surfaces the first failure.

use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use crate::batch::BatchBuilder;
use crate::channel::{build_channels, checked_recv, AbortFlag, ErrorSlot};
use crate::column::ColumnWorker;
use crate::config::{ColumnOptions, HeaderOptions, ReaderOptions, TokenizerOptions};
use crate::error::ReadError;
use crate::parsers::{BoolParser, FloatParser, IntParser, LeafParser, StringParser, TimestampParser};
use crate::tokenizer::Tokenizer;
use crate::value::Sink;

/// Default candidate order when the caller doesn't supply one: the
/// cheapest-to-falsify types first, string (the parser of last resort)
/// appended automatically by [`ColumnWorker::new`].
const DEFAULT_PARSER_ORDER: &[&str] = &["bool", "int", "float", "timestamp"];

/// Describes one resolved column, passed to the caller's sink factory.
pub struct ColumnMeta<'a> {
    /// 0-based ordinal.
    pub index: usize,
    /// Final, legalized, validated header name.
    pub name: &'a str,
    /// The name of the parser this column will try first (its
    /// `forced_parser` if one was configured, else the first candidate in
    /// its inference order).
    pub first_parser: &'static str,
}

/// Result of a completed read.
pub struct ReadSummary {
    /// Total data rows read (after `skip_rows`/`num_rows` and header
    /// exclusion).
    pub num_rows: u64,
    /// The very sink instances the caller's factory constructed, in
    /// column order.
    pub sinks: Vec<Box<dyn Sink>>,
}

/// Reads `input` to completion per `options`, calling `make_sink` once per
/// resolved column to obtain its destination.
pub fn read<R: Read>(
    mut input: R,
    options: ReaderOptions,
    mut make_sink: impl FnMut(ColumnMeta<'_>) -> Box<dyn Sink>,
) -> Result<ReadSummary, ReadError> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;
    let main: Arc<[u8]> = Arc::from(raw);

    let (header_names, data_start) = resolve_header(&main, &options.tokenizer, &options.headers)?;
    let num_columns = header_names.len();

    if num_columns == 0 {
        return Ok(ReadSummary {
            num_rows: 0,
            sinks: Vec::new(),
        });
    }

    let mut workers = Vec::with_capacity(num_columns);
    let mut sinks = Vec::with_capacity(num_columns);
    for (index, name) in header_names.iter().enumerate() {
        let forced_name = options.forced_parser_for(name, index);
        let null_literal = options.null_literal_for(name, index);
        let (candidates, forced) = build_candidates(&options.columns, forced_name);
        let first_parser = candidates
            .first()
            .map(|p| p.name())
            .unwrap_or("string");
        let null_parser_name = options.columns.null_parser.unwrap_or("string");
        let null_parser = Some(make_parser(null_parser_name, &options.columns));

        workers.push(ColumnWorker::new(
            name.clone(),
            index,
            candidates,
            forced,
            null_parser,
            null_literal,
        ));
        sinks.push(make_sink(ColumnMeta {
            index,
            name,
            first_parser,
        }));
    }

    let tokenizer = Tokenizer::new(main, data_start, num_columns, options.tokenizer);

    log::debug!(
        "starting read: {num_columns} columns, concurrent={}",
        options.concurrent
    );
    let num_rows = if options.concurrent {
        run_concurrent(tokenizer, workers, &mut sinks)?
    } else {
        run_sequential(tokenizer, workers, &mut sinks)?
    };

    Ok(ReadSummary { num_rows, sinks })
}

/// Header resolution.
fn resolve_header(
    main: &Arc<[u8]>,
    tok_opts: &TokenizerOptions,
    header_opts: &HeaderOptions,
) -> Result<(Vec<String>, usize), ReadError> {
    let (mut names, data_start) = if main.is_empty() {
        (Vec::new(), 0)
    } else {
        let mut peek = Tokenizer::new(main.clone(), 0, 0, *tok_opts);
        let row = peek.scan_raw_row()?;
        if tok_opts.has_header_row {
            let names = row
                .into_iter()
                .map(|(bytes, _)| String::from_utf8_lossy(&bytes).into_owned())
                .collect();
            (names, peek.position())
        } else {
            let width = row.len();
            let names = (1..=width).map(|i| format!("Column{i}")).collect();
            (names, 0)
        }
    };

    if let Some(explicit) = &header_opts.headers {
        names = explicit.clone();
    }

    if let Some(legalizer) = &header_opts.header_legalizer {
        for n in &mut names {
            *n = legalizer(n);
        }
    }
    if let Some(validator) = &header_opts.header_validator {
        for n in &names {
            if !validator(n) {
                return Err(ReadError::HeaderInvalid(format!(
                    "header {n:?} rejected by validator"
                )));
            }
        }
    }

    for (index, override_name) in &header_opts.header_for_index {
        if let Some(slot) = names.get_mut(*index) {
            *slot = override_name.clone();
        }
    }

    let mut seen = HashSet::with_capacity(names.len());
    for n in &names {
        if n.is_empty() {
            return Err(ReadError::HeaderInvalid("empty header name".to_string()));
        }
        if !seen.insert(n.as_str()) {
            return Err(ReadError::HeaderInvalid(format!("duplicate header {n:?}")));
        }
    }

    Ok((names, data_start))
}

/// Builds a column's candidate list, honoring a forced parser if one was
/// resolved for it.
fn build_candidates(
    column_opts: &ColumnOptions,
    forced_name: Option<&'static str>,
) -> (Vec<Box<dyn LeafParser>>, bool) {
    if let Some(name) = forced_name {
        return (vec![make_parser(name, column_opts)], true);
    }
    let order: &[&str] = if column_opts.parsers.is_empty() {
        DEFAULT_PARSER_ORDER
    } else {
        &column_opts.parsers
    };
    let candidates = order.iter().map(|name| make_parser(name, column_opts)).collect();
    (candidates, false)
}

fn make_parser(name: &str, column_opts: &ColumnOptions) -> Box<dyn LeafParser> {
    match name {
        "bool" => Box::new(BoolParser),
        "int" => Box::new(IntParser),
        "float" => match &column_opts.custom_double_parser {
            Some(f) => Box::new(FloatParser::with_custom_parser(f.clone())),
            None => Box::new(FloatParser::new()),
        },
        "timestamp" => match &column_opts.custom_timezone_parser {
            Some(f) => Box::new(TimestampParser::with_custom_timezone(f.clone())),
            None => Box::new(TimestampParser::new()),
        },
        "string" => Box::new(StringParser),
        other => {
            log::warn!("unknown parser name {other:?}, falling back to string");
            Box::new(StringParser)
        }
    }
}

/// Parallel execution: one tokenizer thread, one thread per column, all
/// sharing the abort flag.
fn run_concurrent(
    tokenizer: Tokenizer,
    mut workers: Vec<ColumnWorker>,
    sinks: &mut [Box<dyn Sink>],
) -> Result<u64, ReadError> {
    let num_columns = workers.len();
    let (senders, receivers) = build_channels(num_columns, 2);
    let abort = AbortFlag::new();
    let error_slot = ErrorSlot::new();

    let tokenizer_rows = std::thread::scope(|scope| {
        let tok_abort = abort.clone();
        let tok_error_slot = error_slot.clone();
        let tok_handle = scope.spawn(move || match tokenizer.run(&senders, &tok_abort) {
            Ok(n) => Some(n),
            Err(e) => {
                tok_error_slot.set_first(e, &tok_abort);
                None
            }
        });

        let mut col_handles = Vec::with_capacity(num_columns);
        for ((worker, receiver), sink) in workers.drain(..).zip(receivers).zip(sinks.iter_mut()) {
            let col_abort = abort.clone();
            let col_error_slot = error_slot.clone();
            col_handles.push(scope.spawn(move || {
                run_column_worker(worker, receiver, sink.as_mut(), &col_abort, &col_error_slot);
            }));
        }

        let rows = tok_handle.join().unwrap();
        for handle in col_handles {
            handle.join().unwrap();
        }
        rows
    });

    match error_slot.take() {
        Some(err) => Err(err),
        None => {
            let rows = tokenizer_rows.unwrap_or(0);
            log::debug!("concurrent read finished: {rows} rows");
            Ok(rows)
        }
    }
}

fn run_column_worker(
    mut worker: ColumnWorker,
    receiver: std::sync::mpsc::Receiver<Arc<crate::batch::RowBatch>>,
    sink: &mut dyn Sink,
    abort: &AbortFlag,
    error_slot: &ErrorSlot,
) {
    loop {
        let batch = match checked_recv(&receiver, abort) {
            Ok(batch) => batch,
            Err(e) => {
                error_slot.set_first(e, abort);
                return;
            }
        };
        let is_last = batch.is_last();
        if let Err(e) = worker.process_batch(batch, sink) {
            error_slot.set_first(e, abort);
            return;
        }
        if is_last {
            return;
        }
    }
}

/// Single-threaded cooperative execution: tokenizer and every column
/// worker take turns draining one batch at a time, no channel needed.
fn run_sequential(
    mut tokenizer: Tokenizer,
    mut workers: Vec<ColumnWorker>,
    sinks: &mut [Box<dyn Sink>],
) -> Result<u64, ReadError> {
    let mut builder = BatchBuilder::new(tokenizer.main(), tokenizer.num_columns(), tokenizer.batch_size());
    let mut first_row_of_batch = 0u64;
    let mut rows_emitted = 0u64;
    builder.begin_batch(first_row_of_batch);

    loop {
        let is_last = tokenizer.fill_batch(&mut builder)?;
        let batch = builder.take(is_last);
        rows_emitted += batch.num_rows() as u64;

        for (worker, sink) in workers.iter_mut().zip(sinks.iter_mut()) {
            worker.process_batch(batch.clone(), sink.as_mut())?;
        }

        if is_last {
            break;
        }
        first_row_of_batch += batch.num_rows() as u64;
        builder.begin_batch(first_row_of_batch);
    }

    Ok(rows_emitted)
}
