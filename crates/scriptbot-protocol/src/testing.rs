//! In-memory session for tests
//!
//! [`RecordingSession`] records every outgoing operation instead of writing
//! to a socket, and [`RecordingSession::emit`] delivers callback events the
//! same way a real session would.

use std::sync::{Mutex, PoisonError};

use crate::callbacks::{CallbackEvent, CallbackManager, EventData};
use crate::session::{ProtocolSession, SessionError};

/// An operation performed on a [`RecordingSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    Connect,
    Quit(String),
    Disconnect(String),
    Join(String),
    Part(String, String),
    Message(String, String),
    Action(String, String),
    Notice(String, String),
    Raw(String),
    Nick(String),
}

pub struct RecordingSession {
    server_name: String,
    nickname: Mutex<String>,
    ops: Mutex<Vec<SessionOp>>,
    callbacks: CallbackManager,
}

impl RecordingSession {
    pub fn new(server_name: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            nickname: Mutex::new(nickname.into()),
            ops: Mutex::new(Vec::new()),
            callbacks: CallbackManager::new(),
        }
    }

    /// Deliver an event to the registered callbacks
    pub fn emit(&self, data: EventData) {
        self.callbacks.dispatch(&CallbackEvent::now(data));
    }

    pub fn ops(&self) -> Vec<SessionOp> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Raw lines sent so far, in order
    pub fn raw_lines(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SessionOp::Raw(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, op: SessionOp) {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).push(op);
    }
}

impl ProtocolSession for RecordingSession {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn connect(&self) -> Result<(), SessionError> {
        self.record(SessionOp::Connect);
        Ok(())
    }

    fn quit(&self, reason: &str) {
        self.record(SessionOp::Quit(reason.to_string()));
    }

    fn disconnect(&self, reason: &str) {
        self.record(SessionOp::Disconnect(reason.to_string()));
    }

    fn join_channel(&self, channel: &str) {
        self.record(SessionOp::Join(channel.to_string()));
    }

    fn part_channel(&self, channel: &str, reason: &str) {
        self.record(SessionOp::Part(channel.to_string(), reason.to_string()));
    }

    fn send_message(&self, target: &str, text: &str) {
        self.record(SessionOp::Message(target.to_string(), text.to_string()));
    }

    fn send_action(&self, target: &str, text: &str) {
        self.record(SessionOp::Action(target.to_string(), text.to_string()));
    }

    fn send_notice(&self, target: &str, text: &str) {
        self.record(SessionOp::Notice(target.to_string(), text.to_string()));
    }

    fn send_raw(&self, line: &str) {
        self.record(SessionOp::Raw(line.to_string()));
    }

    fn nickname(&self) -> String {
        self.nickname
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_nickname(&self, nickname: &str) {
        *self.nickname.lock().unwrap_or_else(PoisonError::into_inner) = nickname.to_string();
        self.record(SessionOp::Nick(nickname.to_string()));
    }

    fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }
}
