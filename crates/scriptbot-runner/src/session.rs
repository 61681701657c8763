use std::sync::Arc;

use scriptbot_protocol::ProtocolSession;

use crate::config::ServerConfig;

/// Creates protocol sessions for configured servers.
///
/// The concrete IRC library lives behind this seam. Closures with the same
/// signature implement it, which is what tests use.
pub trait SessionFactory: Send + Sync {
    fn create(
        &self,
        server_name: &str,
        config: &ServerConfig,
    ) -> anyhow::Result<Arc<dyn ProtocolSession>>;
}

impl<F> SessionFactory for F
where
    F: Fn(&str, &ServerConfig) -> anyhow::Result<Arc<dyn ProtocolSession>> + Send + Sync,
{
    fn create(
        &self,
        server_name: &str,
        config: &ServerConfig,
    ) -> anyhow::Result<Arc<dyn ProtocolSession>> {
        self(server_name, config)
    }
}
