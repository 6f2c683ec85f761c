/// Connection registry
///
/// Durable mapping of connection id to the request id it waits on. Many
/// connections may share one request id; lookups by request id go through a
/// secondary index.
pub mod memory;
pub mod postgres;

pub use memory::InMemoryConnectionRegistry;
pub use postgres::PgConnectionRegistry;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Connection;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Insert or overwrite the record for `connection.connection_id`.
    async fn register(&self, connection: &Connection) -> RegistryResult<()>;

    /// Remove a connection. Removing an unknown id is not an error.
    async fn unregister(&self, connection_id: &str) -> RegistryResult<()>;

    /// All connections waiting on `request_id`; empty when nobody listens.
    async fn find_by_request_id(&self, request_id: &str) -> RegistryResult<Vec<Connection>>;

    async fn get(&self, connection_id: &str) -> RegistryResult<Option<Connection>>;
}
