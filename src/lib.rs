//! `inferring-csv` is a high-throughput CSV reader that infers each
//! column's type independently and writes every column to its own sink
//! concurrently.
//!
//! # Primary Focuses
//!
//! - **Column-concurrent**: one thread tokenizes the input; one further
//!   thread per column tries that column's candidate parsers in turn,
//!   independently of every other column.
//! - **Zero-copy where possible**: an unquoted cell is a byte range into
//!   the input buffer; only doubled-quote collapsing or whitespace
//!   trimming inside a quoted field needs an allocation.
//! - **Speculative type inference**: a column tries `bool`, `int`,
//!   `float`, `timestamp`, then `string` in order, replaying already-seen
//!   batches against the next candidate whenever the current one is
//!   falsified by a later cell.
//!
//! # Example
//!
//! ```
//! use inferring_csv::{read, ColumnMeta, ReaderOptions};
//! use inferring_csv::value::{Sink, Value};
//! use inferring_csv::error::SinkError;
//!
//! struct Printer(String);
//! impl Sink for Printer {
//!     fn append_value(&mut self, row: u64, value: Value<'_>) -> Result<(), SinkError> {
//!         println!("{}[{row}] = {value:?}", self.0);
//!         Ok(())
//!     }
//!     fn append_null(&mut self, row: u64) -> Result<(), SinkError> {
//!         println!("{}[{row}] = null", self.0);
//!         Ok(())
//!     }
//!     fn truncate_and_reopen(&mut self) -> Result<(), SinkError> {
//!         Ok(())
//!     }
//! }
//!
//! let input = b"a,b\n1,2\n3,4\n".as_slice();
//! let summary = read(input, ReaderOptions::default(), |meta: ColumnMeta<'_>| {
//!     Box::new(Printer(meta.name.to_string())) as Box<dyn Sink>
//! })
//! .unwrap();
//! assert_eq!(summary.num_rows, 2);
//! ```

mod batch;
mod cell;
mod channel;
mod column;
mod config;
pub mod error;
pub mod parsers;
mod reader;
mod tokenizer;
pub mod value;

pub use batch::RowBatch;
pub use cell::Cell;
pub use column::CommittedParser;
pub use config::{ColumnOptions, HeaderOptions, ReaderOptions, TokenizerOptions};
pub use error::ReadError;
pub use reader::{read, ColumnMeta, ReadSummary};
pub use value::{Sink, Value};
