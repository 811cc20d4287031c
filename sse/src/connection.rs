use crate::transport::Connection;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Correlation id of one logical connection tunneled through a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Worker-side registry of the real connections opened on behalf of clients.
///
/// Owns every connection it holds: removing an entry releases it, and dropping
/// the registry releases all of them.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `id`, releasing any connection it replaces.
    pub fn register(&mut self, id: ConnectionId, connection: Connection) {
        if let Some(previous) = self.connections.insert(id.clone(), connection) {
            warn!("Replacing connection already registered as {}", id);
            previous.release();
        }
    }

    /// Release and remove the connection registered as `id`.
    /// Returns false when no such connection exists.
    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some(connection) => {
                connection.release();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Release every registered connection.
    pub fn clear(&mut self) {
        for (id, connection) in self.connections.drain() {
            debug!("Releasing connection {}", id);
            connection.release();
        }
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use crate::transport::Transport;
    use events::{ReadyState, SourceOptions};

    fn open(transport: &FakeTransport) -> Connection {
        transport
            .connect("http://localhost/events", SourceOptions::new())
            .unwrap()
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn unregister_releases_the_connection() {
        let transport = FakeTransport::new();
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();

        registry.register(id.clone(), open(&transport));
        assert!(registry.contains(&id));

        assert!(registry.unregister(&id));
        assert!(registry.is_empty());
        assert!(transport.source(0).is_released());
        assert!(!registry.unregister(&id));
    }

    #[test]
    fn registering_the_same_id_releases_the_previous_connection() {
        let transport = FakeTransport::new();
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::from("dup");

        registry.register(id.clone(), open(&transport));
        registry.register(id, open(&transport));

        assert_eq!(registry.len(), 1);
        assert!(transport.source(0).is_released());
        assert!(!transport.source(1).is_released());
    }

    #[test]
    fn dropping_the_registry_releases_everything() {
        let transport = FakeTransport::new();
        let mut registry = ConnectionRegistry::new();
        registry.register(ConnectionId::new(), open(&transport));
        registry.register(ConnectionId::new(), open(&transport));

        drop(registry);

        assert!(transport.sources().iter().all(|s| s.is_released()));
        assert_eq!(transport.source(1).ready_state(), ReadyState::Closed);
    }
}
