use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use scriptbot_scripting_host::ScriptingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

fn default_bot_name() -> String {
    paths::APP_NAME.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,

    #[serde(default)]
    pub scripting: ScriptingConfig,

    /// Servers by name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            scripting: ScriptingConfig::default(),
            servers: BTreeMap::new(),
        }
    }
}

impl BotConfig {
    pub fn config_path() -> Option<PathBuf> {
        paths::config_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = Self::config_path().ok_or(ConfigLoadError::NoConfigDir)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!(target: "scriptbot", "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigLoadError> {
        let path = Self::config_path().ok_or(ConfigLoadError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigLoadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!(target: "scriptbot", "Saved config to {}", path.display());
        Ok(())
    }
}

/// One IRC server the bot may connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Servers are disabled until explicitly enabled
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub nickname: String,
    /// Tried on the first nickname collision (default: the nickname)
    pub alt_nickname: Option<String>,
    /// Default: the nickname
    pub username: Option<String>,
    /// Default: the nickname
    pub realname: Option<String>,
    pub bind_ip: Option<String>,
    /// Channels joined once the server is ready
    pub autojoin: Vec<String>,
    /// Script files, relative to the script directory
    pub scripts: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "irc.quakenet.org".to_string(),
            port: 6667,
            ssl: false,
            nickname: "scriptbot".to_string(),
            alt_nickname: None,
            username: None,
            realname: None,
            bind_ip: None,
            autojoin: Vec::new(),
            scripts: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn alt_nickname(&self) -> &str {
        self.alt_nickname.as_deref().unwrap_or(&self.nickname)
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nickname)
    }

    /// `irc://host:port` or `ircs://host:port`
    pub fn uri(&self) -> String {
        let scheme = if self.ssl { "ircs" } else { "irc" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_server_defaults() {
        let server: ServerConfig = toml::from_str("").unwrap();
        assert!(!server.enabled);
        assert_eq!(server.to_string(), "irc.quakenet.org:6667");
        assert_eq!(server.alt_nickname(), "scriptbot");
        assert_eq!(server.username(), "scriptbot");
        assert_eq!(server.uri(), "irc://irc.quakenet.org:6667");
    }

    #[test]
    fn test_parse_full_config() {
        let config: BotConfig = toml::from_str(
            r##"
            name = "helper"

            [scripting]
            script_dir = "/srv/scripts"
            max_operations = 100000

            [scripting.sandbox]
            deny = ["scriptbot::version"]

            [servers.quakenet]
            enabled = true
            nickname = "helper"
            alt_nickname = "helper`"
            ssl = true
            port = 6697
            autojoin = ["#help"]
            scripts = ["greeter.lua", "dice.rhai"]
            "##,
        )
        .unwrap();

        assert_eq!(config.name, "helper");
        assert_eq!(config.scripting.max_operations, Some(100000));
        assert_eq!(config.scripting.sandbox.deny, vec!["scriptbot::version"]);

        let server = &config.servers["quakenet"];
        assert!(server.enabled);
        assert_eq!(server.alt_nickname(), "helper`");
        assert_eq!(server.uri(), "ircs://irc.quakenet.org:6697");
        assert_eq!(server.scripts, vec!["greeter.lua", "dice.rhai"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BotConfig::default();
        config.servers.insert("local".to_string(), ServerConfig::default());
        config.save_to(&path).unwrap();

        let loaded = BotConfig::load_from(&path).unwrap();
        assert_eq!(loaded.name, "scriptbot");
        assert_eq!(loaded.servers["local"], ServerConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            BotConfig::load_from(&dir.path().join("nope.toml")),
            Err(ConfigLoadError::NotFound(_))
        ));
    }
}
