use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use scriptbot_protocol::{
    Callback, CallbackEvent, CallbackId, CallbackKind, EventData, ProtocolSession, SessionError,
};
use scriptbot_scripting_host::script_scanner::ScanResult;
use scriptbot_scripting_host::{BotContext, CallbackBridge, ScriptHost, ScriptingConfig};
use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::config::ServerConfig;
use crate::nick::NickTracker;
use crate::session::SessionFactory;

/// Callbacks the server itself listens to, next to whatever scripts bind
const SERVER_CALLBACKS: &[CallbackKind] = &[
    CallbackKind::ServerReady,
    CallbackKind::NickInUse,
    CallbackKind::Numeric,
    CallbackKind::DataIn,
    CallbackKind::DataOut,
    CallbackKind::DebugInfo,
];

/// Numeric sent by the server once registration is complete
const RPL_WELCOME: u16 = 1;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is not enabled")]
    Disabled,
    #[error("server has already been started")]
    AlreadyStarted,
    #[error("server has been stopped")]
    Stopped,
    #[error("failed to create session: {0:#}")]
    Session(anyhow::Error),
    #[error("failed to connect: {0}")]
    Connect(#[from] SessionError),
}

struct Running {
    session: Arc<dyn ProtocolSession>,
    host: Arc<ScriptHost>,
    bridge: CallbackBridge,
    listeners: Vec<(CallbackKind, CallbackId)>,
    started_at: DateTime<Utc>,
}

impl Running {
    fn teardown(&self) {
        self.bridge.clear();
        self.host.unload();
        for (kind, id) in &self.listeners {
            self.session.callbacks().del_callback(*kind, *id);
        }
    }
}

enum ServerState {
    Uninitialized,
    Running(Running),
    Stopped,
}

/// One configured IRC server: its session, scripts and callback bridge.
///
/// `Uninitialized` → [`Server::begin`] → running → [`Server::stop`] →
/// stopped. A stopped server cannot be started again.
pub struct Server {
    name: String,
    bot_name: Option<String>,
    config: ServerConfig,
    scripting: ScriptingConfig,
    factory: Arc<dyn SessionFactory>,
    state: Mutex<ServerState>,
    nick: Arc<Mutex<NickTracker>>,
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        config: ServerConfig,
        scripting: ScriptingConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let nick = NickTracker::new(config.nickname.clone(), config.alt_nickname());
        Self {
            name: name.into(),
            bot_name: None,
            config,
            scripting,
            factory,
            state: Mutex::new(ServerState::Uninitialized),
            nick: Arc::new(Mutex::new(nick)),
        }
    }

    /// Name scripts see through `scriptbot::version`
    pub fn with_bot_name(mut self, bot_name: impl Into<String>) -> Self {
        self.bot_name = Some(bot_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), ServerState::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.lock_state(), ServerState::Stopped)
    }

    pub fn session(&self) -> Option<Arc<dyn ProtocolSession>> {
        match &*self.lock_state() {
            ServerState::Running(running) => Some(running.session.clone()),
            _ => None,
        }
    }

    pub fn host(&self) -> Option<Arc<ScriptHost>> {
        match &*self.lock_state() {
            ServerState::Running(running) => Some(running.host.clone()),
            _ => None,
        }
    }

    /// When the running session was started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &*self.lock_state() {
            ServerState::Running(running) => Some(running.started_at),
            _ => None,
        }
    }

    /// Start the server. Returns false if it did not start.
    pub fn begin(&self) -> bool {
        match self.try_begin() {
            Ok(()) => true,
            Err(ServerError::Disabled) => {
                info!(target: "scriptbot", "[{}] Server not enabled, aborting.", self.name);
                false
            }
            Err(e) => {
                error!(target: "scriptbot", "[{}] Unable to start server: {}", self.name, e);
                false
            }
        }
    }

    pub fn try_begin(&self) -> Result<(), ServerError> {
        let mut state = self.lock_state();
        match *state {
            ServerState::Running(_) => return Err(ServerError::AlreadyStarted),
            ServerState::Stopped => return Err(ServerError::Stopped),
            ServerState::Uninitialized => {}
        }
        if !self.config.enabled {
            return Err(ServerError::Disabled);
        }

        info!(target: "scriptbot", "[{}] Starting server {}", self.name, self.config.uri());
        let session = self
            .factory
            .create(&self.name, &self.config)
            .map_err(ServerError::Session)?;

        let mut ctx = BotContext::new(self.name.clone(), self.scripting.clone());
        if let Some(bot_name) = &self.bot_name {
            ctx.bot_name = bot_name.clone();
        }
        let host = ScriptHost::new(ctx);

        for name in &self.config.scripts {
            let path = self.scripting.resolve_script(name);
            if !path.is_file() {
                warn!(
                    target: "scriptbot",
                    "[{}] Configured script not found: {}",
                    self.name,
                    path.display()
                );
                continue;
            }
            // load errors are logged by the host
            let _ = host.load_script(&path, None);
        }

        self.nick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();

        let listener: Arc<dyn Callback> = Arc::new(ServerListener {
            name: self.name.clone(),
            session: Arc::downgrade(&session),
            nick: self.nick.clone(),
            autojoin: self.config.autojoin.clone(),
        });
        let listeners: Vec<(CallbackKind, CallbackId)> = SERVER_CALLBACKS
            .iter()
            .filter(|kind| session.callbacks().supports(**kind))
            .filter_map(|kind| {
                session
                    .callbacks()
                    .add_callback(*kind, listener.clone())
                    .ok()
                    .map(|id| (*kind, id))
            })
            .collect();

        let bridge = CallbackBridge::attach(session.clone(), &host);
        let running = Running {
            session,
            host,
            bridge,
            listeners,
            started_at: Utc::now(),
        };

        if let Err(e) = running.session.connect() {
            running.teardown();
            return Err(ServerError::Connect(e));
        }

        info!(
            target: "scriptbot",
            "[{}] Server started with {} script(s)",
            self.name,
            running.host.script_count()
        );
        *state = ServerState::Running(running);
        Ok(())
    }

    /// Quit the session and unload every script. Returns false if the
    /// server was not running.
    pub fn stop(&self, reason: &str) -> bool {
        let previous = {
            let mut state = self.lock_state();
            if !matches!(*state, ServerState::Running(_)) {
                return false;
            }
            std::mem::replace(&mut *state, ServerState::Stopped)
        };
        let ServerState::Running(running) = previous else {
            return false;
        };

        running.session.quit(reason);
        running.teardown();

        let uptime = Utc::now() - running.started_at;
        info!(
            target: "scriptbot",
            "[{}] Server stopped after {}s: {}",
            self.name,
            uptime.num_seconds(),
            reason
        );
        true
    }

    /// Reload every script on this server. Returns false if it is not
    /// running.
    pub fn rehash(&self) -> bool {
        match self.host() {
            Some(host) => {
                host.reload_all();
                true
            }
            None => false,
        }
    }

    /// Hot reload check for this server's scripts
    pub fn poll_changes(&self) -> ScanResult {
        self.host()
            .map(|host| host.poll_changes())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Keeps the connection itself healthy: autojoin, nickname collisions and
/// protocol traffic logging
struct ServerListener {
    name: String,
    session: Weak<dyn ProtocolSession>,
    nick: Arc<Mutex<NickTracker>>,
    autojoin: Vec<String>,
}

impl Callback for ServerListener {
    fn on_event(&self, event: &CallbackEvent) {
        match &event.data {
            EventData::ServerReady => {
                let Some(session) = self.session.upgrade() else {
                    return;
                };
                info!(target: "scriptbot", "[{}] Server ready", self.name);
                for channel in &self.autojoin {
                    session.join_channel(channel);
                }
            }
            EventData::NickInUse { nickname } => {
                let Some(session) = self.session.upgrade() else {
                    return;
                };
                let next = self
                    .nick
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_nick_in_use(nickname);
                info!(
                    target: "scriptbot",
                    "[{}] Nickname {} in use, trying {}",
                    self.name,
                    nickname,
                    next
                );
                session.set_nickname(&next);
            }
            EventData::Numeric { numeric, .. } if *numeric == RPL_WELCOME => {
                self.nick
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .got_welcome();
            }
            EventData::DataIn { data } => {
                trace!(target: "irc", "[{}] [ IN] {}", self.name, data);
            }
            EventData::DataOut { data, .. } => {
                trace!(target: "irc", "[{}] [OUT] {}", self.name, data);
            }
            EventData::DebugInfo { level, data } => {
                trace!(target: "irc", "[{}] {}: {}", self.name, level, data);
            }
            _ => {}
        }
    }
}
