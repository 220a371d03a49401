//! The [`Engine`] and per connection context.
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::{
    config::Config,
    pool::BufferPool,
    registry::ConnectionRegistry,
    statement::ConnectionId,
};

/// Root of the engine, owned by the connection acceptor.
///
/// Shared state lives here and is handed to every accepted [`Connection`].
///
/// ```
/// use stmtwire::{Config, Engine};
///
/// let engine = Engine::new(Config::default());
/// let conn = engine.accept();
/// assert!(engine.registry().is_registered(conn.id()));
/// drop(conn);
/// assert_eq!(engine.registry().connection_count(), 0);
/// ```
#[derive(Debug)]
pub struct Engine {
    registry: Arc<ConnectionRegistry>,
    pool: Arc<BufferPool>,
    config: Arc<Config>,
    next_id: AtomicU32,
}

impl Engine {
    pub fn new(config: Config) -> Engine {
        Self::with_registry(config, Arc::new(ConnectionRegistry::new()))
    }

    /// Engine configured from environment, see [`Config::from_env`].
    pub fn from_env() -> Engine {
        Self::new(Config::from_env())
    }

    /// Engine sharing an existing registry.
    pub fn with_registry(config: Config, registry: Arc<ConnectionRegistry>) -> Engine {
        let pool = BufferPool::new(config.blob_pool_capacity, config.blob_buffer_size);
        Self { registry, pool, config: Arc::new(config), next_id: AtomicU32::new(1) }
    }

    /// Register a new connection.
    pub fn accept(&self) -> Connection {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.register_connection(id);
        Connection {
            id,
            registry: Arc::clone(&self.registry),
            pool: Arc::clone(&self.pool),
            config: Arc::clone(&self.config),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// An accepted connection, unregistered on drop.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    pool: Arc<BufferPool>,
    config: Arc<Config>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.registry.unregister_connection(self.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connections_get_distinct_ids() {
        let engine = Engine::new(Config::default());
        let a = engine.accept();
        let b = engine.accept();
        assert_ne!(a.id(), b.id());
        assert_eq!(engine.registry().connection_count(), 2);
        drop(a);
        assert!(engine.registry().is_registered(b.id()));
        assert_eq!(engine.registry().connection_count(), 1);
    }

    #[test]
    fn shared_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Engine::with_registry(Config::default().blob_pool_capacity(4), Arc::clone(&registry));
        let conn = engine.accept();
        assert!(registry.is_registered(conn.id()));
    }
}
