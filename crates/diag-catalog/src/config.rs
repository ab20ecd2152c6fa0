//! Catalog file model and loading.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Target operating system for per-OS command variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsId {
    Linux,
    Mac,
    Windows,
}

impl OsId {
    /// Detect the OS this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::Mac
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

impl fmt::Display for OsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linux => "linux",
            Self::Mac => "mac",
            Self::Windows => "windows",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for OsId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "mac" | "macos" | "darwin" => Ok(Self::Mac),
            "windows" | "win" => Ok(Self::Windows),
            other => Err(format!("unknown os: {other}")),
        }
    }
}

/// What kind of invocation an entry produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A REST call against the product's HTTP API.
    Rest,
    /// A system command executed as a child process.
    Syscall,
}

impl Category {
    /// Default output subdirectory for entries that do not name one.
    pub fn default_subdir(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Syscall => "syscall",
        }
    }

    /// Default output file extension for entries that do not name one.
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Rest => ".json",
            Self::Syscall => ".txt",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rest => f.write_str("rest"),
            Self::Syscall => f.write_str("syscall"),
        }
    }
}

/// A comparator expression paired with the template it selects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedTemplate {
    /// Comparator expression, e.g. `>=5.0.0 <6.0.0`.
    pub range: String,
    /// Command line or URL path template with `{{KEY}}` placeholders.
    pub template: String,
}

/// One diagnostic command or REST call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Unique identifier; also names the output file.
    pub id: String,
    pub category: Category,
    /// Output subdirectory inside the working directory.
    /// Defaults per category.
    #[serde(default)]
    pub subdir: Option<String>,
    /// Output file extension. Defaults per category.
    #[serde(default)]
    pub extension: Option<String>,
    /// Additional attempts after a failure.
    #[serde(default)]
    pub retries: u32,
    /// Version-selected templates used when no OS variant applies.
    #[serde(default)]
    pub versions: Vec<VersionedTemplate>,
    /// Per-OS template overrides. When the target OS has an entry here it
    /// replaces `versions` entirely.
    #[serde(default)]
    pub os: HashMap<OsId, Vec<VersionedTemplate>>,
}

impl CatalogEntry {
    /// The template set that applies on `os`.
    pub fn templates_for(&self, os: OsId) -> &[VersionedTemplate] {
        match self.os.get(&os) {
            Some(variants) => variants,
            None => &self.versions,
        }
    }

    pub fn subdir(&self) -> &str {
        self.subdir
            .as_deref()
            .unwrap_or_else(|| self.category.default_subdir())
    }

    pub fn extension(&self) -> &str {
        self.extension
            .as_deref()
            .unwrap_or_else(|| self.category.default_extension())
    }
}

/// The full catalog, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Load and validate a catalog from a YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        Self::load_from_string(&content)
            .with_context(|| format!("Failed to load catalog file: {}", path.display()))
    }

    /// Load and validate a catalog from YAML text.
    pub fn load_from_string(content: &str) -> Result<Self> {
        let catalog: Self =
            serde_yaml::from_str(content).context("Failed to parse catalog YAML")?;
        catalog.validate().context("Catalog validation failed")?;
        debug!(entries = catalog.entries.len(), "Catalog loaded");
        Ok(catalog)
    }

    /// Structural validation: unique ids, parseable ranges, mutually
    /// exclusive range sets per entry.
    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_catalog(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_catalog() {
        let yaml = r#"
entries:
  - id: cluster_health
    category: rest
    versions:
      - range: ">=5.0.0"
        template: "/_cluster/health"
"#;
        let catalog = Catalog::load_from_string(yaml).unwrap();
        assert_eq!(catalog.entries.len(), 1);
        let entry = &catalog.entries[0];
        assert_eq!(entry.subdir(), "rest");
        assert_eq!(entry.extension(), ".json");
        assert_eq!(entry.retries, 0);
    }

    #[test]
    fn test_os_variant_selection() {
        let yaml = r#"
entries:
  - id: netstat
    category: syscall
    versions:
      - range: ">=0.0.0"
        template: "netstat -an"
    os:
      linux:
        - range: ">=0.0.0"
          template: "ss -plant"
"#;
        let catalog = Catalog::load_from_string(yaml).unwrap();
        let entry = &catalog.entries[0];
        assert_eq!(entry.templates_for(OsId::Linux)[0].template, "ss -plant");
        assert_eq!(entry.templates_for(OsId::Mac)[0].template, "netstat -an");
        assert_eq!(entry.extension(), ".txt");
    }

    #[test]
    fn test_explicit_overrides_win() {
        let yaml = r#"
entries:
  - id: hot_threads
    category: rest
    subdir: threads
    extension: .txt
    retries: 2
    versions:
      - range: ">=5.0.0"
        template: "/_nodes/hot_threads"
"#;
        let entry = &Catalog::load_from_string(yaml).unwrap().entries[0];
        assert_eq!(entry.subdir(), "threads");
        assert_eq!(entry.extension(), ".txt");
        assert_eq!(entry.retries, 2);
    }

    #[test]
    fn test_load_rejects_bad_yaml() {
        assert!(Catalog::load_from_string("entries: [not a map]").is_err());
    }

    #[test]
    fn test_os_parse() {
        assert_eq!("macOS".parse::<OsId>().unwrap(), OsId::Mac);
        assert_eq!("LINUX".parse::<OsId>().unwrap(), OsId::Linux);
        assert!("plan9".parse::<OsId>().is_err());
    }

    #[test]
    fn test_shipped_default_catalog_is_valid() {
        let yaml = include_str!("../../../config/diag-catalog.yml");
        let catalog = Catalog::load_from_string(yaml).unwrap();
        assert!(!catalog.entries.is_empty());
    }
}
