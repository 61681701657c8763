use std::sync::Arc;

use crate::config::ScriptingConfig;
use crate::sandbox::SandboxPolicy;

pub const BOT_NAME: &str = "scriptbot";
pub const BOT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a connection's scripting components need from the rest of the
/// bot. Built once per connection and handed to the script host, which
/// passes it on to each script and to the callback bridge.
#[derive(Debug, Clone)]
pub struct BotContext {
    pub bot_name: String,
    pub version: String,
    /// Name of the configured server this context belongs to
    pub server_name: String,
    pub scripting: Arc<ScriptingConfig>,
    pub sandbox: Arc<SandboxPolicy>,
}

impl BotContext {
    pub fn new(server_name: impl Into<String>, scripting: ScriptingConfig) -> Self {
        let sandbox = SandboxPolicy::from(&scripting.sandbox);
        Self {
            bot_name: BOT_NAME.to_string(),
            version: BOT_VERSION.to_string(),
            server_name: server_name.into(),
            scripting: Arc::new(scripting),
            sandbox: Arc::new(sandbox),
        }
    }
}
