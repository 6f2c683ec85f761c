/// Item persistence
///
/// The store is an external key-value collaborator keyed by item id. Two
/// backends are provided:
/// - `InMemoryItemStore`: ordered map, used in tests and local runs
/// - `PgItemStore`: PostgreSQL table with a JSONB document column
pub mod memory;
pub mod postgres;

pub use memory::InMemoryItemStore;
pub use postgres::PgItemStore;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::Item;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("{0}")]
    Backend(String),
}

/// One page of a scan, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// Id of the last returned item when more items remain
    pub last_key: Option<String>,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Item>>;

    /// Insert or overwrite the item with the same id.
    async fn put(&self, item: &Item) -> StoreResult<()>;

    /// Shallow-merge `changes` into an existing item and return the result.
    ///
    /// The `id` field of `changes` is ignored. Returns `None` when no item
    /// with `id` exists.
    async fn merge(&self, id: &str, changes: &Item) -> StoreResult<Option<Item>>;

    /// Delete an item, returning the previous value.
    async fn delete(&self, id: &str) -> StoreResult<Option<Item>>;

    /// Read up to `limit` items with ids strictly after `start_after`.
    async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage>;
}

pub(crate) fn require_id(item: &Item) -> StoreResult<&str> {
    crate::models::item_id(item)
        .ok_or_else(|| StoreError::InvalidItem("item has no string `id` field".to_string()))
}
