use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use super::{require_id, ItemStore, ScanPage, StoreError, StoreResult};
use crate::models::{Item, ID_FIELD};

/// PostgreSQL-backed item store
///
/// Each item is one row: `id` primary key plus the whole document as JSONB.
#[derive(Clone)]
pub struct PgItemStore {
    pool: PgPool,
    table: String,
}

impl PgItemStore {
    /// `table` must already be validated as a plain SQL identifier.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, document JSONB NOT NULL)",
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        debug!(table = %self.table, "Item table ready");
        Ok(())
    }
}

fn into_item(document: Json<Value>) -> StoreResult<Item> {
    match document.0 {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidItem(format!(
            "stored document is not an object: {}",
            other
        ))),
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Item>> {
        let sql = format!("SELECT document FROM {} WHERE id = $1", self.table);
        let row = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(into_item).transpose()
    }

    async fn put(&self, item: &Item) -> StoreResult<()> {
        let id = require_id(item)?;
        let sql = format!(
            "INSERT INTO {} (id, document) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document",
            self.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(Json(Value::Object(item.clone())))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn merge(&self, id: &str, changes: &Item) -> StoreResult<Option<Item>> {
        let mut patch = changes.clone();
        patch.remove(ID_FIELD);

        let sql = format!(
            "UPDATE {} SET document = document || $2 WHERE id = $1 RETURNING document",
            self.table
        );
        let row = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(id)
            .bind(Json(Value::Object(patch)))
            .fetch_optional(&self.pool)
            .await?;

        row.map(into_item).transpose()
    }

    async fn delete(&self, id: &str) -> StoreResult<Option<Item>> {
        let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING document", self.table);
        let row = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(into_item).transpose()
    }

    async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage> {
        // One extra row tells us whether another page exists.
        let sql = format!(
            "SELECT id, document FROM {} WHERE ($1::TEXT IS NULL OR id > $1) ORDER BY id LIMIT $2",
            self.table
        );
        let mut rows = sqlx::query_as::<_, (String, Json<Value>)>(&sql)
            .bind(start_after)
            .bind(limit as i64 + 1)
            .fetch_all(&self.pool)
            .await?;

        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let last_key = if has_more {
            rows.last().map(|(id, _)| id.clone())
        } else {
            None
        };

        let items = rows
            .into_iter()
            .map(|(_, document)| into_item(document))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(ScanPage { items, last_key })
    }
}
