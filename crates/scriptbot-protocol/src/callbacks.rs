use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::session::SessionError;
use crate::types::{ChannelClientInfo, ChannelInfo, ClientInfo};

// ============================================================================
// Callback catalog
// ============================================================================

/// Every kind of callback a protocol session can deliver.
///
/// [`CallbackKind::ALL`] is the catalog that consumers walk to discover
/// which callbacks exist, and [`CallbackKind::method_name`] is the name under
/// which scripts bind to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallbackKind {
    ServerReady,
    ConnectError,
    SocketClosed,
    Numeric,
    NickInUse,
    DataIn,
    DataOut,
    DebugInfo,
    ChannelMessage,
    ChannelAction,
    ChannelNotice,
    ChannelJoin,
    ChannelPart,
    ChannelQuit,
    ChannelKick,
    ChannelTopic,
    PrivateMessage,
    PrivateAction,
    PrivateNotice,
    NickChanged,
    Quit,
}

impl CallbackKind {
    pub const ALL: &'static [CallbackKind] = &[
        CallbackKind::ServerReady,
        CallbackKind::ConnectError,
        CallbackKind::SocketClosed,
        CallbackKind::Numeric,
        CallbackKind::NickInUse,
        CallbackKind::DataIn,
        CallbackKind::DataOut,
        CallbackKind::DebugInfo,
        CallbackKind::ChannelMessage,
        CallbackKind::ChannelAction,
        CallbackKind::ChannelNotice,
        CallbackKind::ChannelJoin,
        CallbackKind::ChannelPart,
        CallbackKind::ChannelQuit,
        CallbackKind::ChannelKick,
        CallbackKind::ChannelTopic,
        CallbackKind::PrivateMessage,
        CallbackKind::PrivateAction,
        CallbackKind::PrivateNotice,
        CallbackKind::NickChanged,
        CallbackKind::Quit,
    ];

    /// The event name scripts bind to
    pub fn method_name(self) -> &'static str {
        match self {
            CallbackKind::ServerReady => "onServerReady",
            CallbackKind::ConnectError => "onConnectError",
            CallbackKind::SocketClosed => "onSocketClosed",
            CallbackKind::Numeric => "onNumeric",
            CallbackKind::NickInUse => "onNickInUse",
            CallbackKind::DataIn => "onDataIn",
            CallbackKind::DataOut => "onDataOut",
            CallbackKind::DebugInfo => "onDebugInfo",
            CallbackKind::ChannelMessage => "onChannelMessage",
            CallbackKind::ChannelAction => "onChannelAction",
            CallbackKind::ChannelNotice => "onChannelNotice",
            CallbackKind::ChannelJoin => "onChannelJoin",
            CallbackKind::ChannelPart => "onChannelPart",
            CallbackKind::ChannelQuit => "onChannelQuit",
            CallbackKind::ChannelKick => "onChannelKick",
            CallbackKind::ChannelTopic => "onChannelTopic",
            CallbackKind::PrivateMessage => "onPrivateMessage",
            CallbackKind::PrivateAction => "onPrivateAction",
            CallbackKind::PrivateNotice => "onPrivateNotice",
            CallbackKind::NickChanged => "onNickChanged",
            CallbackKind::Quit => "onQuit",
        }
    }

    pub fn from_method_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.method_name() == name)
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

// ============================================================================
// Callback events
// ============================================================================

/// Payload of a callback, one variant per [`CallbackKind`]
#[derive(Debug, Clone)]
pub enum EventData {
    ServerReady,
    ConnectError {
        message: String,
    },
    SocketClosed,
    Numeric {
        numeric: u16,
        tokens: Vec<String>,
    },
    NickInUse {
        nickname: String,
    },
    DataIn {
        data: String,
    },
    DataOut {
        data: String,
        /// True when the line was generated by the session itself
        from_parser: bool,
    },
    DebugInfo {
        level: u8,
        data: String,
    },
    ChannelMessage {
        channel: ChannelInfo,
        client: ChannelClientInfo,
        message: String,
        host: String,
    },
    ChannelAction {
        channel: ChannelInfo,
        client: ChannelClientInfo,
        message: String,
        host: String,
    },
    ChannelNotice {
        channel: ChannelInfo,
        client: ChannelClientInfo,
        message: String,
        host: String,
    },
    ChannelJoin {
        channel: ChannelInfo,
        client: ChannelClientInfo,
    },
    ChannelPart {
        channel: ChannelInfo,
        client: ChannelClientInfo,
        reason: String,
    },
    ChannelQuit {
        channel: ChannelInfo,
        client: ChannelClientInfo,
        reason: String,
    },
    ChannelKick {
        channel: ChannelInfo,
        kicked: ChannelClientInfo,
        kicker: Option<ChannelClientInfo>,
        reason: String,
        host: String,
    },
    ChannelTopic {
        channel: ChannelInfo,
        is_join_topic: bool,
    },
    PrivateMessage {
        message: String,
        host: String,
    },
    PrivateAction {
        message: String,
        host: String,
    },
    PrivateNotice {
        message: String,
        host: String,
    },
    NickChanged {
        client: ClientInfo,
        old_nickname: String,
    },
    Quit {
        client: ClientInfo,
        reason: String,
    },
}

impl EventData {
    pub fn kind(&self) -> CallbackKind {
        match self {
            EventData::ServerReady => CallbackKind::ServerReady,
            EventData::ConnectError { .. } => CallbackKind::ConnectError,
            EventData::SocketClosed => CallbackKind::SocketClosed,
            EventData::Numeric { .. } => CallbackKind::Numeric,
            EventData::NickInUse { .. } => CallbackKind::NickInUse,
            EventData::DataIn { .. } => CallbackKind::DataIn,
            EventData::DataOut { .. } => CallbackKind::DataOut,
            EventData::DebugInfo { .. } => CallbackKind::DebugInfo,
            EventData::ChannelMessage { .. } => CallbackKind::ChannelMessage,
            EventData::ChannelAction { .. } => CallbackKind::ChannelAction,
            EventData::ChannelNotice { .. } => CallbackKind::ChannelNotice,
            EventData::ChannelJoin { .. } => CallbackKind::ChannelJoin,
            EventData::ChannelPart { .. } => CallbackKind::ChannelPart,
            EventData::ChannelQuit { .. } => CallbackKind::ChannelQuit,
            EventData::ChannelKick { .. } => CallbackKind::ChannelKick,
            EventData::ChannelTopic { .. } => CallbackKind::ChannelTopic,
            EventData::PrivateMessage { .. } => CallbackKind::PrivateMessage,
            EventData::PrivateAction { .. } => CallbackKind::PrivateAction,
            EventData::PrivateNotice { .. } => CallbackKind::PrivateNotice,
            EventData::NickChanged { .. } => CallbackKind::NickChanged,
            EventData::Quit { .. } => CallbackKind::Quit,
        }
    }
}

/// A single callback invocation: when it happened and what it carries
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub date: DateTime<Utc>,
    pub data: EventData,
}

impl CallbackEvent {
    pub fn new(date: DateTime<Utc>, data: EventData) -> Self {
        Self { date, data }
    }

    pub fn now(data: EventData) -> Self {
        Self::new(Utc::now(), data)
    }

    pub fn kind(&self) -> CallbackKind {
        self.data.kind()
    }
}

// ============================================================================
// Callback registration
// ============================================================================

/// Receiver of callback events.
///
/// Callbacks are invoked synchronously on the session's thread, in
/// registration order.
pub trait Callback: Send + Sync {
    fn on_event(&self, event: &CallbackEvent);
}

impl<F> Callback for F
where
    F: Fn(&CallbackEvent) + Send + Sync,
{
    fn on_event(&self, event: &CallbackEvent) {
        self(event)
    }
}

/// Handle returned by [`CallbackManager::add_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

type Registered = Vec<(CallbackId, Arc<dyn Callback>)>;

/// Per-session registry of callbacks, keyed by [`CallbackKind`]
pub struct CallbackManager {
    catalog: Vec<CallbackKind>,
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<CallbackKind, Registered>>,
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackManager {
    /// Manager supporting every kind in [`CallbackKind::ALL`]
    pub fn new() -> Self {
        Self::with_catalog(CallbackKind::ALL.to_vec())
    }

    /// Manager supporting only the given kinds
    pub fn with_catalog(catalog: Vec<CallbackKind>) -> Self {
        Self {
            catalog,
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(BTreeMap::new()),
        }
    }

    /// The callback kinds this session can deliver
    pub fn catalog(&self) -> &[CallbackKind] {
        &self.catalog
    }

    pub fn supports(&self, kind: CallbackKind) -> bool {
        self.catalog.contains(&kind)
    }

    pub fn add_callback(
        &self,
        kind: CallbackKind,
        callback: Arc<dyn Callback>,
    ) -> Result<CallbackId, SessionError> {
        if !self.supports(kind) {
            return Err(SessionError::UnsupportedCallback(kind));
        }

        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(kind).or_default().push((id, callback));
        debug!(target: "irc", "Registered callback {:?} for {}", id, kind);
        Ok(id)
    }

    /// Register one callback for several kinds at once
    pub fn add_callbacks(
        &self,
        kinds: &[CallbackKind],
        callback: Arc<dyn Callback>,
    ) -> Result<Vec<(CallbackKind, CallbackId)>, SessionError> {
        kinds
            .iter()
            .map(|kind| {
                self.add_callback(*kind, callback.clone())
                    .map(|id| (*kind, id))
            })
            .collect()
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn del_callback(&self, kind: CallbackKind, id: CallbackId) -> bool {
        let mut callbacks = self.lock();
        let Some(registered) = callbacks.get_mut(&kind) else {
            return false;
        };

        let before = registered.len();
        registered.retain(|(existing, _)| *existing != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            callbacks.remove(&kind);
        }
        removed
    }

    pub fn count(&self, kind: CallbackKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Deliver an event to every callback registered for its kind.
    ///
    /// The registered set is copied before delivery so callbacks may add or
    /// remove callbacks while running.
    pub fn dispatch(&self, event: &CallbackEvent) {
        let targets: Vec<Arc<dyn Callback>> = self
            .lock()
            .get(&event.kind())
            .map(|registered| registered.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in targets {
            callback.on_event(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<CallbackKind, Registered>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
