/// Protocol seam for scriptbot
///
/// This crate holds the pieces the scripting host needs from an IRC protocol
/// library: the session trait, the callback catalog and the callback manager.
/// Keeping them here lets the host and the runner depend on the protocol layer
/// without depending on any concrete connection implementation.
pub mod callbacks;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use callbacks::{Callback, CallbackEvent, CallbackId, CallbackKind, CallbackManager, EventData};
pub use session::{ProtocolSession, SessionError};
pub use types::{irc_eq_ignore_case, irc_to_lower, ChannelClientInfo, ChannelInfo, ClientInfo};
