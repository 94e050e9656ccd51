//! StreamHouse SQL Shell
//!
//! Interactive client for continuous SQL statements. A statement is submitted
//! to a [`StatementStore`](statement::StatementStore), followed by the
//! [`StatementController`](controller::StatementController) until it finishes,
//! and its results are materialized with `streamhouse-results` for display.
//!
//! ## Architecture
//!
//! ```text
//!   Repl ──► Shell ──► StatementController ──► StatementStore
//!                          │        ▲             ├─ RestStatementStore (HTTP)
//!                          │        │             └─ FakeStatementStore (in-process)
//!                          ▼        │
//!                    listener task ─┘ (InputSource: cancel / detach keys)
//! ```
//!
//! While a statement is running:
//! - **Enter** detaches: the prompt returns and the statement keeps running
//! - **Ctrl-C / Ctrl-D / Ctrl-Q / Esc** cancels: the statement is stopped remotely

pub mod config;
pub mod controller;
pub mod fake_store;
pub mod format;
pub mod input;
pub mod repl;
pub mod rest_client;
pub mod statement;

pub use controller::{StatementController, StatementOutcome};
pub use statement::{
    ApplicationHost, Statement, StatementError, StatementPhase, StatementStore,
};
