//! StreamHouse Result Materialization
//!
//! Turns the changelog produced by a continuous SQL statement into something a
//! terminal can show. Every row event is kept in two bounded views:
//!
//! - **Changelog**: the raw, append-only event history (`+I`, `-U`, `+U`, `-D`)
//! - **Table**: the current state obtained by replaying inserts and retractions
//!
//! ```text
//!  result page ──► RowConverter ──► Row ──► MaterializedResults::append
//!                                              │
//!                          ┌───────────────────┴───────────────────┐
//!                          ▼                                       ▼
//!                   changelog (FIFO)                  table (FIFO) + key index
//!                          │                                       │
//!                          └──────────► ResultsCursor ◄────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use streamhouse_results::{Field, FieldType, MaterializedResults, Operation, Row};
//!
//! let results = MaterializedResults::new(vec!["count".to_string()], 100);
//! let one = Row::new(Operation::Insert, vec![Field::atomic(FieldType::Integer, "1")]);
//! let retract = Row::new(Operation::Delete, vec![Field::atomic(FieldType::Integer, "1")]);
//!
//! assert!(results.append(vec![one, retract]));
//! assert_eq!(results.table_size(), 0);
//! assert_eq!(results.changelog_size(), 2);
//! ```
//!
//! Capacity pressure is not an error: once either view exceeds its capacity the
//! oldest entry is dropped.

mod arena;
pub mod converter;
mod error;
mod materialized;
mod types;

pub use converter::{
    decode_results_page, field_converter, FieldConverter, ResultsPage, RowConverter,
};
pub use error::ResultsError;
pub use materialized::{MaterializedResults, ResultsCursor, OPERATION_HEADER};
pub use types::*;

/// Result type for result decoding operations
pub type Result<T> = std::result::Result<T, ResultsError>;
