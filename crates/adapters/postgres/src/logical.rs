//! 逻辑复制槽变更源
//!
//! 通过 SQL 接口读取 wal2json 输出：`peek` 拉取但不消费，
//! 整批应用后再以 `get_changes(upto_lsn)` 消费，
//! 因此进程在确认前退出时未确认的事务会被重新投递

use async_trait::async_trait;
use mirror_errors::{AppError, AppResult};
use mirror_ports::{ChangeBatch, ChangeSource};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::connection::check_connection;
use crate::retry::map_sqlx_error;
use crate::wal2json;

/// 逻辑复制槽配置
#[derive(Debug, Clone)]
pub struct LogicalSlotConfig {
    pub slot_name: String,
    /// 单次最多拉取的变更数（按整事务截断）
    pub batch_size: u32,
    /// `schema.table` 形式的物理表名
    pub tables: Vec<String>,
}

/// 基于 wal2json 的 PostgreSQL 变更源
pub struct PgLogicalSource {
    pool: PgPool,
    config: LogicalSlotConfig,
    add_tables: String,
}

impl PgLogicalSource {
    pub fn new(pool: PgPool, config: LogicalSlotConfig) -> Self {
        let add_tables = config.tables.join(",");
        Self {
            pool,
            config,
            add_tables,
        }
    }

    pub fn slot_name(&self) -> &str {
        &self.config.slot_name
    }

    /// 解码参数：格式 v2，包含事务边界、主键和列类型，只输出镜像表
    pub fn plugin_options(&self) -> [(&'static str, &str); 5] {
        [
            ("format-version", "2"),
            ("include-transaction", "true"),
            ("include-pk", "true"),
            ("include-types", "true"),
            ("add-tables", self.add_tables.as_str()),
        ]
    }

    async fn slot_exists(&self) -> AppResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_replication_slots WHERE slot_name = $1)")
            .bind(&self.config.slot_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to look up replication slot", e))
    }
}

#[async_trait]
impl ChangeSource for PgLogicalSource {
    async fn connect(&self) -> AppResult<()> {
        check_connection(&self.pool).await?;

        if self.config.tables.is_empty() {
            return Err(AppError::config("no mirrored tables to stream"));
        }

        if !self.slot_exists().await? {
            sqlx::query("SELECT pg_create_logical_replication_slot($1::name, 'wal2json')")
                .bind(&self.config.slot_name)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("Failed to create replication slot", e))?;
            info!(slot = %self.config.slot_name, "Logical replication slot created");
        }

        info!(
            slot = %self.config.slot_name,
            tables = %self.add_tables,
            "Change source connected"
        );
        Ok(())
    }

    async fn poll(&self) -> AppResult<ChangeBatch> {
        let options = self.plugin_options();
        let mut query = sqlx::query_as::<_, (String, String)>(
            "SELECT lsn::text, data FROM pg_logical_slot_peek_changes($1::name, NULL, $2, \
             $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&self.config.slot_name)
        .bind(i32::try_from(self.config.batch_size).unwrap_or(i32::MAX));
        for (name, value) in options {
            query = query.bind(name).bind(value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to peek changes", e))?;

        let checkpoint = rows.last().map(|(lsn, _)| lsn.clone());
        let entries = rows
            .iter()
            .filter_map(|(lsn, data)| wal2json::decode(lsn, data).map_err(AppError::from).transpose())
            .collect::<Vec<_>>();

        if !rows.is_empty() {
            debug!(
                slot = %self.config.slot_name,
                messages = rows.len(),
                changes = entries.len(),
                checkpoint = ?checkpoint,
                "Peeked changes"
            );
        }

        Ok(ChangeBatch { entries, checkpoint })
    }

    async fn ack(&self, checkpoint: &str) -> AppResult<()> {
        let options = self.plugin_options();
        let mut query = sqlx::query(
            "SELECT count(*) FROM pg_logical_slot_get_changes($1::name, $2::pg_lsn, NULL, \
             $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&self.config.slot_name)
        .bind(checkpoint);
        for (name, value) in options {
            query = query.bind(name).bind(value);
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to acknowledge changes", e))?;

        debug!(slot = %self.config.slot_name, checkpoint, "Changes acknowledged");
        Ok(())
    }

    async fn release(&self) -> AppResult<()> {
        // 连接池与查询执行器共用，复制槽保留以便下次启动
        info!(slot = %self.config.slot_name, "Change source released");
        Ok(())
    }
}
