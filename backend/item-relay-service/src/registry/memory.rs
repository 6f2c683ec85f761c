use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConnectionRegistry, RegistryResult};
use crate::models::Connection;

#[derive(Default)]
struct Tables {
    connections: HashMap<String, Connection>,
    /// request_id -> connection ids
    by_request: HashMap<String, BTreeSet<String>>,
}

impl Tables {
    fn remove(&mut self, connection_id: &str) -> Option<Connection> {
        let previous = self.connections.remove(connection_id)?;
        if let Some(ids) = self.by_request.get_mut(&previous.request_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                self.by_request.remove(&previous.request_id);
            }
        }
        Some(previous)
    }
}

/// Registry held in process memory, primary map plus request-id index
#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    tables: RwLock<Tables>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.connections.is_empty()
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn register(&self, connection: &Connection) -> RegistryResult<()> {
        let mut tables = self.tables.write().await;
        // Overwrite must drop the old index entry if the request id changed.
        tables.remove(&connection.connection_id);

        tables
            .by_request
            .entry(connection.request_id.clone())
            .or_default()
            .insert(connection.connection_id.clone());
        tables
            .connections
            .insert(connection.connection_id.clone(), connection.clone());
        Ok(())
    }

    async fn unregister(&self, connection_id: &str) -> RegistryResult<()> {
        self.tables.write().await.remove(connection_id);
        Ok(())
    }

    async fn find_by_request_id(&self, request_id: &str) -> RegistryResult<Vec<Connection>> {
        let tables = self.tables.read().await;
        let found = tables
            .by_request
            .get(request_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(found)
    }

    async fn get(&self, connection_id: &str) -> RegistryResult<Option<Connection>> {
        Ok(self.tables.read().await.connections.get(connection_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_many_connections_share_request_id() {
        let registry = InMemoryConnectionRegistry::new();
        registry.register(&Connection::new("c1", "R1")).await.unwrap();
        registry.register(&Connection::new("c2", "R1")).await.unwrap();
        registry.register(&Connection::new("c3", "R2")).await.unwrap();

        let found = registry.find_by_request_id("R1").await.unwrap();
        let ids: Vec<_> = found.iter().map(|c| c.connection_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_find_unknown_request_is_empty() {
        let registry = InMemoryConnectionRegistry::new();
        assert!(registry.find_by_request_id("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_overwrites_and_reindexes() {
        let registry = InMemoryConnectionRegistry::new();
        registry.register(&Connection::new("c1", "R1")).await.unwrap();
        registry.register(&Connection::new("c1", "R2")).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert!(registry.find_by_request_id("R1").await.unwrap().is_empty());
        assert_eq!(registry.find_by_request_id("R2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_keeps_hosting_instance() {
        let registry = InMemoryConnectionRegistry::new();
        registry
            .register(&Connection::new("c1", "R1").hosted_on("node-a"))
            .await
            .unwrap();
        registry
            .register(&Connection::new("c1", "R1").hosted_on("node-b"))
            .await
            .unwrap();

        let found = registry.find_by_request_id("R1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance_id, "node-b");
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = InMemoryConnectionRegistry::new();
        registry.register(&Connection::new("c1", "R1")).await.unwrap();
        registry.register(&Connection::new("c2", "R1")).await.unwrap();

        registry.unregister("c1").await.unwrap();
        registry.unregister("c1").await.unwrap();

        assert!(registry.get("c1").await.unwrap().is_none());
        assert!(registry.get("c2").await.unwrap().is_some());
        assert_eq!(registry.find_by_request_id("R1").await.unwrap().len(), 1);
    }
}
