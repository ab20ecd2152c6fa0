//! # Diag Run
//!
//! The run orchestrator: drives one support-bundle run through its stages
//! (resolve, execute and collect logs in parallel, package, clean) with
//! the fatality rules of the error taxonomy, and guarantees the working
//! directory is gone on every exit path.

mod manifest;
pub mod orchestrator;

pub use orchestrator::{Orchestrator, RunOptions, RunState, RunSummary};
