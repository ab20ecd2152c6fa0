//! Bundle manifest written into the working directory before packaging.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use diag_common::{DiagError, DiagResult};

#[derive(Debug, Serialize)]
pub(crate) struct CommandCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct Manifest {
    pub tool_version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub product_version: String,
    pub os: String,
    pub commands: CommandCounts,
    pub logs_collected: usize,
}

impl Manifest {
    pub(crate) async fn write(&self, working_dir: &Path) -> DiagResult<()> {
        let path = working_dir.join("manifest.json");
        let body = serde_json::to_vec_pretty(self).map_err(|err| {
            DiagError::resource("serialize", path.display().to_string(), err.to_string())
        })?;
        tokio::fs::write(&path, body).await.map_err(|err| {
            DiagError::resource("write", path.display().to_string(), err.to_string())
        })
    }
}
