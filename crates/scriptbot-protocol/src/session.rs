use thiserror::Error;

use crate::callbacks::{CallbackKind, CallbackManager};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("callback kind {0} is not supported by this session")]
    UnsupportedCallback(CallbackKind),
    #[error("session is not connected")]
    NotConnected,
    #[error("failed to send: {0}")]
    Send(String),
}

/// One live connection to an IRC server.
///
/// Implemented by the protocol library. The scripting host only needs the
/// operations below plus the session's [`CallbackManager`]; everything else
/// about the wire protocol stays behind this trait.
pub trait ProtocolSession: Send + Sync {
    /// Name of the configured server this session belongs to
    fn server_name(&self) -> &str;

    fn connect(&self) -> Result<(), SessionError>;

    /// Send QUIT with a reason and close the connection
    fn quit(&self, reason: &str);

    /// Close the connection without a QUIT
    fn disconnect(&self, reason: &str);

    fn join_channel(&self, channel: &str);

    fn part_channel(&self, channel: &str, reason: &str);

    fn send_message(&self, target: &str, text: &str);

    fn send_action(&self, target: &str, text: &str);

    fn send_notice(&self, target: &str, text: &str);

    fn send_raw(&self, line: &str);

    /// The nickname the session currently uses
    fn nickname(&self) -> String;

    fn set_nickname(&self, nickname: &str);

    fn callbacks(&self) -> &CallbackManager;
}
