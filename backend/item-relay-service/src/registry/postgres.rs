use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{ConnectionRegistry, RegistryResult};
use crate::models::Connection;

type ConnectionRow = (String, String, String, DateTime<Utc>);

fn from_row((connection_id, request_id, instance_id, created_at): ConnectionRow) -> Connection {
    Connection {
        connection_id,
        request_id,
        instance_id,
        created_at,
    }
}

/// Registry stored in PostgreSQL with an index on `request_id`
#[derive(Clone)]
pub struct PgConnectionRegistry {
    pool: PgPool,
    table: String,
}

impl PgConnectionRegistry {
    /// `table` must already be validated as a plain SQL identifier.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub async fn ensure_schema(&self) -> RegistryResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                connection_id TEXT PRIMARY KEY, \
                request_id TEXT NOT NULL, \
                instance_id TEXT NOT NULL DEFAULT '', \
                created_at TIMESTAMPTZ NOT NULL)",
            table = self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        // Tables created before instance ownership existed.
        let column = format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS instance_id TEXT NOT NULL DEFAULT ''",
            table = self.table
        );
        sqlx::query(&column).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_request_id_idx ON {table} (request_id)",
            table = self.table
        );
        sqlx::query(&index).execute(&self.pool).await?;

        debug!(table = %self.table, "Connection table ready");
        Ok(())
    }
}

#[async_trait]
impl ConnectionRegistry for PgConnectionRegistry {
    async fn register(&self, connection: &Connection) -> RegistryResult<()> {
        let sql = format!(
            "INSERT INTO {} (connection_id, request_id, instance_id, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (connection_id) DO UPDATE \
             SET request_id = EXCLUDED.request_id, instance_id = EXCLUDED.instance_id, \
             created_at = EXCLUDED.created_at",
            self.table
        );
        sqlx::query(&sql)
            .bind(&connection.connection_id)
            .bind(&connection.request_id)
            .bind(&connection.instance_id)
            .bind(connection.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unregister(&self, connection_id: &str) -> RegistryResult<()> {
        let sql = format!("DELETE FROM {} WHERE connection_id = $1", self.table);
        sqlx::query(&sql)
            .bind(connection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_request_id(&self, request_id: &str) -> RegistryResult<Vec<Connection>> {
        let sql = format!(
            "SELECT connection_id, request_id, instance_id, created_at FROM {} WHERE request_id = $1 \
             ORDER BY connection_id",
            self.table
        );
        let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(request_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn get(&self, connection_id: &str) -> RegistryResult<Option<Connection>> {
        let sql = format!(
            "SELECT connection_id, request_id, instance_id, created_at FROM {} WHERE connection_id = $1",
            self.table
        );
        let row = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(connection_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(from_row))
    }
}
