//! # Diag Common
//!
//! Shared types for the support bundle collector:
//! - Error taxonomy (`DiagError`) and the `DiagResult` alias
//! - The ordered, thread-safe run `Report`
//! - Caller-supplied substitution parameters (`RunParams`)

pub mod errors;
pub mod params;
pub mod report;

pub use errors::{DiagError, DiagResult};
pub use params::RunParams;
pub use report::{Report, ReportEntry, Severity};
