//! Caller-supplied substitution parameters for catalog templates.

use std::collections::HashMap;
use std::path::PathBuf;

/// Runtime values substituted into catalog templates.
///
/// Templates reference these as `{{PID}}`, `{{HOME}}`, or `{{<KEY>}}` for
/// any extra entry. The orchestrator adds `{{OUTPUT_DIR}}` before resolving.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Target process id, if the product process was located.
    pub pid: Option<u32>,
    /// Product home/installation directory.
    pub home: Option<PathBuf>,
    /// Additional named substitutions.
    pub extra: HashMap<String, String>,
}

impl RunParams {
    /// Flatten into a placeholder-name -> value map.
    pub fn substitutions(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(pid) = self.pid {
            map.insert("PID".to_string(), pid.to_string());
        }
        if let Some(ref home) = self.home {
            map.insert("HOME".to_string(), home.display().to_string());
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }
}
