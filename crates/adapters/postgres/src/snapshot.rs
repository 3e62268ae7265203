//! 全量快照读取

use std::sync::Arc;

use async_trait::async_trait;
use mirror_errors::AppResult;
use mirror_ports::SnapshotSource;
use mirror_query::{Record, TablePolicy, TableSchema};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;

use crate::executor::quote_ident;
use crate::retry::map_sqlx_error;

/// 读取整张表的 `to_jsonb(row)` 表示
pub struct PgSnapshotSource {
    pool: PgPool,
    policy: Arc<TablePolicy>,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool, policy: Arc<TablePolicy>) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshotSource {
    async fn load_table(&self, schema: &TableSchema) -> AppResult<Vec<Record>> {
        let physical = self.policy.physical_name(schema.name());
        let sql = format!("SELECT to_jsonb(t) FROM {} t", quote_ident(&physical));

        let rows: Vec<Json<Record>> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to load snapshot", e))?;

        debug!(table = schema.name(), physical = %physical, rows = rows.len(), "Snapshot loaded");
        Ok(rows.into_iter().map(|Json(record)| record).collect())
    }
}
