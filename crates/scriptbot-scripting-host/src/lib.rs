/// Script hosting core for scriptbot
///
/// This crate loads Lua and sandboxed Rhai scripts for one IRC connection,
/// lets them bind handlers to protocol events and commands, and forwards the
/// connection's callbacks to those handlers. Scripts only see the `bot` and
/// `irc` globals and the handles passed to their handlers.
pub mod api;
pub mod binding;
pub mod bridge;
pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handles;
pub mod host;
pub mod logger;
pub mod reload;
pub mod sandbox;
pub mod script;
pub mod script_scanner;
pub mod value;

pub use binding::{BindingRegistry, BindingToken, BoundHandler, Callable, ScriptRef};
pub use bridge::CallbackBridge;
pub use command::{CommandBinding, CommandRegistry};
pub use config::{SandboxConfig, ScriptingConfig};
pub use context::BotContext;
pub use engine::{Global, ScriptEngine};
pub use error::{EvalFailure, HostCallError, InvokeError, ScriptError};
pub use host::ScriptHost;
pub use logger::ScriptLogger;
pub use reload::{setup_reload_signal, ReloadSignal};
pub use sandbox::SandboxPolicy;
pub use script::Script;
pub use value::{HostHandle, HostObject, Value};
