//! # Diag Exec
//!
//! The execution engine: runs resolved diagnostic commands as isolated
//! child processes under a bounded worker pool, with per-command timeout,
//! retry, bounded output capture, and cooperative cancellation.
//!
//! One failing, hanging, or panicking command never takes down the batch;
//! every command produces an `ExecutionResult`, and results come back in
//! input order. REST entries are delegated to a caller-supplied
//! [`RestFetcher`]; without one they are recorded as skipped.

mod child;
pub mod engine;
pub mod rest;
pub mod types;

pub use engine::execute;
pub use rest::RestFetcher;
pub use types::{CommandOutcome, ExecOptions, ExecutionResult};
