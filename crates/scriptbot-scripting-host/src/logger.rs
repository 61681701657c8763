use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

/// Logger bound to one script, tagged `<server>><file name>`
#[derive(Clone)]
pub struct ScriptLogger {
    tag: Arc<str>,
}

impl ScriptLogger {
    pub fn new(server_name: &str, file_name: &str) -> Self {
        Self {
            tag: Arc::from(format!("{}>{}", server_name, file_name)),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn info(&self, message: impl fmt::Display) {
        info!(target: "scripting", script = %self.tag, "{}", message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        debug!(target: "scripting", script = %self.tag, "{}", message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        warn!(target: "scripting", script = %self.tag, "{}", message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        error!(target: "scripting", script = %self.tag, "{}", message);
    }
}

impl fmt::Debug for ScriptLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScriptLogger").field(&self.tag).finish()
    }
}
