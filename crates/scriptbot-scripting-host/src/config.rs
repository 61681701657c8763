use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Extra host type prefixes sandboxed scripts may import
    #[serde(default)]
    pub allow: Vec<String>,

    /// Host type prefixes sandboxed scripts may never import
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Directory that relative script names are resolved against
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Reload scripts when their files change on disk (default: false)
    #[serde(default)]
    pub hot_reload: bool,

    /// Hot reload scan interval in milliseconds (default: 1000ms)
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,

    /// Operation budget for one evaluation or handler call (default: unlimited)
    #[serde(default)]
    pub max_operations: Option<u64>,

    /// Handler calls slower than this are logged as warnings (default: 1000ms)
    #[serde(default = "default_slow_handler_warn")]
    pub slow_handler_warn_ms: u64,
}

fn default_hot_reload_interval() -> u64 {
    1000
}

fn default_slow_handler_warn() -> u64 {
    1000
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            sandbox: SandboxConfig::default(),
            hot_reload: false,
            hot_reload_interval_ms: default_hot_reload_interval(),
            max_operations: None,
            slow_handler_warn_ms: default_slow_handler_warn(),
        }
    }
}

impl ScriptingConfig {
    /// Resolve a configured script name against the script directory
    pub fn resolve_script(&self, name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        match &self.script_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        }
    }

    pub fn hot_reload_interval(&self) -> Duration {
        Duration::from_millis(self.hot_reload_interval_ms)
    }

    pub fn slow_handler_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_handler_warn_ms)
    }
}
