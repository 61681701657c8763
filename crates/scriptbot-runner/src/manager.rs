use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use scriptbot_scripting_host::{ReloadSignal, ScriptingConfig};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{BotConfig, ServerConfig};
use crate::paths;
use crate::server::Server;
use crate::session::SessionFactory;

/// Owns every configured server of the bot
pub struct ServerManager {
    bot_name: String,
    scripting: ScriptingConfig,
    factory: Arc<dyn SessionFactory>,
    servers: BTreeMap<String, Arc<Server>>,
}

impl ServerManager {
    pub fn new(
        bot_name: impl Into<String>,
        mut scripting: ScriptingConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        if scripting.script_dir.is_none() {
            scripting.script_dir = paths::default_script_dir();
        }
        Self {
            bot_name: bot_name.into(),
            scripting,
            factory,
            servers: BTreeMap::new(),
        }
    }

    /// Manager with every server of the configuration loaded (not started)
    pub fn from_config(config: &BotConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let mut manager = Self::new(config.name.clone(), config.scripting.clone(), factory);
        for (name, server) in &config.servers {
            manager.load_server(name, server.clone());
        }
        manager
    }

    pub fn scripting(&self) -> &ScriptingConfig {
        &self.scripting
    }

    /// Add a server. Returns `None` if one with that name is already loaded.
    pub fn load_server(&mut self, name: &str, config: ServerConfig) -> Option<Arc<Server>> {
        if self.servers.contains_key(name) {
            warn!(target: "scriptbot", "Server {} is already loaded", name);
            return None;
        }

        let server = Arc::new(
            Server::new(name, config, self.scripting.clone(), self.factory.clone())
                .with_bot_name(self.bot_name.clone()),
        );
        self.servers.insert(name.to_string(), server.clone());
        debug!(target: "scriptbot", "Loaded server {}", name);
        Some(server)
    }

    pub fn server(&self, name: &str) -> Option<Arc<Server>> {
        self.servers.get(name).cloned()
    }

    /// Servers in name order
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.values().cloned().collect()
    }

    /// Start every server. Returns how many started.
    pub fn begin_all(&self) -> usize {
        self.servers.values().filter(|server| server.begin()).count()
    }

    /// Stop every running server. Returns how many stopped.
    pub fn stop_all(&self, reason: &str) -> usize {
        self.servers
            .values()
            .filter(|server| server.stop(reason))
            .count()
    }

    /// Reload the scripts of every running server
    pub fn rehash_all(&self) -> usize {
        self.servers.values().filter(|server| server.rehash()).count()
    }

    pub fn poll_changes_all(&self) {
        for server in self.servers.values() {
            let result = server.poll_changes();
            if result.has_changes() {
                debug!(
                    target: "scriptbot",
                    "[{}] Hot reload: {} changed, {} removed",
                    server.name(),
                    result.changed.len(),
                    result.removed.len()
                );
            }
        }
    }

    /// Drive the servers until `shutdown` completes: rehash on every reload
    /// signal and poll for changed scripts when hot reload is on. Every
    /// server is stopped before returning.
    pub async fn run(
        &self,
        mut reload_rx: watch::Receiver<Option<ReloadSignal>>,
        shutdown: impl Future<Output = ()>,
    ) {
        let started = self.begin_all();
        info!(
            target: "scriptbot",
            "Started {} of {} server(s)",
            started,
            self.servers.len()
        );

        let hot_reload = self.scripting.hot_reload;
        let mut poll = tokio::time::interval(self.scripting.hot_reload_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut reload_open = true;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "scriptbot", "Shutdown requested");
                    break;
                }
                changed = reload_rx.changed(), if reload_open => {
                    if changed.is_err() {
                        reload_open = false;
                        continue;
                    }
                    let signal = *reload_rx.borrow_and_update();
                    if let Some(signal) = signal {
                        let rehashed = self.rehash_all();
                        info!(
                            target: "scriptbot",
                            "Rehashed {} server(s) (signal at {})",
                            rehashed,
                            signal.received_at.format("%H:%M:%S")
                        );
                    }
                }
                _ = poll.tick(), if hot_reload => {
                    self.poll_changes_all();
                }
            }
        }

        let stopped = self.stop_all("Shutting down");
        info!(target: "scriptbot", "Stopped {} server(s)", stopped);
    }
}
