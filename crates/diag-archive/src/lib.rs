//! # Diag Archive
//!
//! Working-directory lifecycle and bundle packaging. [`WorkDir`] owns the
//! run's temporary tree and guarantees its removal on every exit path;
//! [`pack`] zips the tree into the final bundle.

pub mod pack;
pub mod workdir;

pub use pack::pack;
pub use workdir::WorkDir;
