//! # Diag Version
//!
//! Version matching for the command catalog.
//!
//! A catalog entry carries a set of version ranges, each pairing a
//! comparator expression (e.g. `>=5.0.0 <6.0.0`) with a payload (a command
//! or URL template). Resolution against a target version yields exactly one
//! payload, `NoMatch` (the capability does not exist for that version), or
//! `Ambiguous` (a catalog-integrity defect: overlapping ranges are rejected
//! at validation time instead of silently taking the first match).

pub mod range;
pub mod version;

pub use range::{resolve, validate_ranges, Comparator, Op, Resolution, VersionRange};
pub use version::{Version, VersionError};
