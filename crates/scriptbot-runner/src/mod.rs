pub mod config;
pub mod logging;
mod manager;
mod nick;
pub mod paths;
mod server;
mod session;

pub use config::{BotConfig, ConfigLoadError, ServerConfig};
pub use logging::init_logging;
pub use manager::ServerManager;
pub use nick::NickTracker;
pub use server::{Server, ServerError};
pub use session::SessionFactory;
