//! # Diag Catalog
//!
//! The command catalog: a YAML-described set of diagnostic commands and
//! REST calls, each carrying version ranges and optional per-OS variants.
//!
//! Loading validates the whole catalog up front (unique ids, parseable
//! comparator expressions, mutually exclusive ranges per entry). The
//! resolver then turns the catalog plus a target OS, product version, and
//! substitution parameters into concrete `ResolvedCommand`s, recording
//! entries that do not apply instead of dropping them silently.

pub mod config;
pub mod resolver;
mod validation;

pub use config::{Catalog, CatalogEntry, Category, OsId, VersionedTemplate};
pub use resolver::{resolve, Invocation, ResolveOutcome, ResolvedCommand, SkippedEntry};
