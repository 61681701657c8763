//! Forwards protocol callbacks into the script host
//!
//! One forwarder is registered per callback kind the session's catalog
//! reports. A forwarder turns the typed event payload into script values,
//! always starting with the connection handle and the event time in
//! milliseconds, and hands them to [`ScriptHost::call_bound`] under the
//! kind's method name (e.g. `onChannelMessage`).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use scriptbot_protocol::{
    Callback, CallbackEvent, CallbackId, CallbackKind, ChannelClientInfo, EventData,
    ProtocolSession,
};
use tracing::{debug, warn};

use crate::handles::{ChannelHandle, ClientHandle, ConnectionHandle};
use crate::host::ScriptHost;
use crate::value::Value;

struct Forwarder {
    kind: CallbackKind,
    session: Weak<dyn ProtocolSession>,
    host: Weak<ScriptHost>,
}

impl PartialEq for Forwarder {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && Weak::ptr_eq(&self.host, &other.host)
            && std::ptr::addr_eq(self.session.as_ptr(), other.session.as_ptr())
    }
}

impl Eq for Forwarder {}

impl Hash for Forwarder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.host.as_ptr().hash(state);
    }
}

impl fmt::Display for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "forwarder<{}>", self.kind.method_name())
    }
}

impl Callback for Forwarder {
    fn on_event(&self, event: &CallbackEvent) {
        let (Some(session), Some(host)) = (self.session.upgrade(), self.host.upgrade()) else {
            return;
        };

        let timestamp = event.date.timestamp_millis();
        let connection = ConnectionHandle::handle(session.clone());
        let client =
            |info: &ChannelClientInfo| Value::Handle(ClientHandle::in_channel(session.clone(), info.clone()));

        let mut args = vec![Value::Handle(connection.clone()), Value::Int(timestamp)];
        let mut command = None;

        match &event.data {
            EventData::ServerReady | EventData::SocketClosed => {}
            EventData::ConnectError { message } => args.push(message.as_str().into()),
            EventData::Numeric { numeric, tokens } => {
                args.push(Value::Int(i64::from(*numeric)));
                args.push(tokens.iter().map(String::as_str).collect::<Vec<_>>().into());
            }
            EventData::NickInUse { nickname } => args.push(nickname.as_str().into()),
            EventData::DataIn { data } => args.push(data.as_str().into()),
            EventData::DataOut { data, from_parser } => {
                args.push(data.as_str().into());
                args.push(Value::Bool(*from_parser));
            }
            EventData::DebugInfo { level, data } => {
                args.push(Value::Int(i64::from(*level)));
                args.push(data.as_str().into());
            }
            EventData::ChannelMessage {
                channel,
                client: sender,
                message,
                host: hostmask,
            } => {
                let channel = ChannelHandle::handle(session.clone(), channel.clone());
                let sender_handle = ClientHandle::in_channel(session.clone(), sender.clone());
                args.push(Value::Handle(channel.clone()));
                args.push(Value::Handle(sender_handle.clone()));
                args.push(message.as_str().into());
                args.push(hostmask.as_str().into());
                command = Some((channel, sender_handle, message.as_str()));
            }
            EventData::ChannelAction {
                channel,
                client: sender,
                message,
                host: hostmask,
            }
            | EventData::ChannelNotice {
                channel,
                client: sender,
                message,
                host: hostmask,
            } => {
                args.push(Value::Handle(ChannelHandle::handle(session.clone(), channel.clone())));
                args.push(client(sender));
                args.push(message.as_str().into());
                args.push(hostmask.as_str().into());
            }
            EventData::ChannelJoin { channel, client: joined } => {
                args.push(Value::Handle(ChannelHandle::handle(session.clone(), channel.clone())));
                args.push(client(joined));
            }
            EventData::ChannelPart {
                channel,
                client: left,
                reason,
            }
            | EventData::ChannelQuit {
                channel,
                client: left,
                reason,
            } => {
                args.push(Value::Handle(ChannelHandle::handle(session.clone(), channel.clone())));
                args.push(client(left));
                args.push(reason.as_str().into());
            }
            EventData::ChannelKick {
                channel,
                kicked,
                kicker,
                reason,
                host: hostmask,
            } => {
                args.push(Value::Handle(ChannelHandle::handle(session.clone(), channel.clone())));
                args.push(client(kicked));
                args.push(kicker.as_ref().map_or(Value::Null, client));
                args.push(reason.as_str().into());
                args.push(hostmask.as_str().into());
            }
            EventData::ChannelTopic {
                channel,
                is_join_topic,
            } => {
                args.push(Value::Handle(ChannelHandle::handle(session.clone(), channel.clone())));
                args.push(Value::Bool(*is_join_topic));
            }
            EventData::PrivateMessage {
                message,
                host: hostmask,
            }
            | EventData::PrivateAction {
                message,
                host: hostmask,
            }
            | EventData::PrivateNotice {
                message,
                host: hostmask,
            } => {
                args.push(message.as_str().into());
                args.push(hostmask.as_str().into());
            }
            EventData::NickChanged {
                client: changed,
                old_nickname,
            } => {
                args.push(Value::Handle(ClientHandle::handle(session.clone(), changed.clone())));
                args.push(old_nickname.as_str().into());
            }
            EventData::Quit {
                client: quitter,
                reason,
            } => {
                args.push(Value::Handle(ClientHandle::handle(session.clone(), quitter.clone())));
                args.push(reason.as_str().into());
            }
        }

        host.call_bound(self.kind.method_name(), &args);

        if let Some((channel, sender, line)) = command {
            host.dispatch_command(connection, timestamp, channel, sender, line);
        }
    }
}

/// The forwarders of one connection
pub struct CallbackBridge {
    session: Arc<dyn ProtocolSession>,
    registered: Mutex<Vec<(CallbackKind, CallbackId)>>,
}

impl CallbackBridge {
    /// Register a forwarder for every callback kind the session supports
    pub fn attach(session: Arc<dyn ProtocolSession>, host: &Arc<ScriptHost>) -> Self {
        let mut registered = Vec::new();
        for &kind in session.callbacks().catalog() {
            let forwarder = Forwarder {
                kind,
                session: Arc::downgrade(&session),
                host: Arc::downgrade(host),
            };
            let name = forwarder.to_string();
            match session.callbacks().add_callback(kind, Arc::new(forwarder)) {
                Ok(id) => registered.push((kind, id)),
                Err(e) => warn!(target: "scripting", "Failed to register {}: {}", name, e),
            }
        }

        debug!(
            target: "scripting",
            "[{}] Callback bridge attached {} forwarder(s)",
            session.server_name(),
            registered.len()
        );

        Self {
            session,
            registered: Mutex::new(registered),
        }
    }

    pub fn forwarder_count(&self) -> usize {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Remove every forwarder from the session
    pub fn clear(&self) {
        let registered = std::mem::take(
            &mut *self
                .registered
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (kind, id) in registered {
            self.session.callbacks().del_callback(kind, id);
        }
    }
}

impl Drop for CallbackBridge {
    fn drop(&mut self) {
        self.clear();
    }
}
