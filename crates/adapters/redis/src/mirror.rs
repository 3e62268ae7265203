//! Redis 镜像存储
//!
//! 表 `t` 的全部镜像记录保存在 hash `{prefix}:mirror:{t}` 中。
//! 单条写入是一条 `HSET`/`HDEL`，整表替换先写临时 hash 再 `RENAME`

use async_trait::async_trait;
use mirror_errors::{AppError, AppResult};
use mirror_ports::MirrorStore;
use mirror_query::Record;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::connection::{check_connection, map_redis_error};

/// 整表替换时单条 HSET 携带的字段数
const REPLACE_CHUNK: usize = 1000;

/// Redis 镜像存储
#[derive(Clone)]
pub struct RedisMirrorStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisMirrorStore {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    /// 表对应的 hash 键
    pub fn table_key(&self, table: &str) -> String {
        table_key(&self.key_prefix, table)
    }
}

pub fn table_key(prefix: &str, table: &str) -> String {
    format!("{}:mirror:{}", prefix, table)
}

fn staging_key(prefix: &str, table: &str) -> String {
    format!("{}:mirror:{}:staging", prefix, table)
}

fn parse_record(table: &str, raw: &str) -> AppResult<Record> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::decode(format!("Corrupt mirror record in {}: {}", table, e)))
}

#[async_trait]
impl MirrorStore for RedisMirrorStore {
    async fn upsert(&self, table: &str, key: &str, row: &Record) -> AppResult<()> {
        let payload = serde_json::to_string(row)
            .map_err(|e| AppError::internal(format!("Failed to serialize row: {}", e)))?;
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(self.table_key(table), key, payload)
            .await
            .map_err(|e| map_redis_error("Redis upsert failed", e))
    }

    async fn remove(&self, table: &str, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(self.table_key(table), key)
            .await
            .map_err(|e| map_redis_error("Redis remove failed", e))
    }

    async fn clear(&self, table: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.table_key(table))
            .await
            .map_err(|e| map_redis_error("Redis clear failed", e))
    }

    async fn replace_all(&self, table: &str, rows: Vec<(String, Record)>) -> AppResult<()> {
        let key = self.table_key(table);
        let staging = staging_key(&self.key_prefix, table);

        let mut items = Vec::with_capacity(rows.len());
        for (field, row) in &rows {
            let payload = serde_json::to_string(row)
                .map_err(|e| AppError::internal(format!("Failed to serialize row: {}", e)))?;
            items.push((field.as_str(), payload));
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        if items.is_empty() {
            pipe.del(&key).ignore();
        } else {
            pipe.del(&staging).ignore();
            for chunk in items.chunks(REPLACE_CHUNK) {
                pipe.hset_multiple(&staging, chunk).ignore();
            }
            pipe.rename(&staging, &key).ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("Redis replace failed", e))?;

        debug!(table, key = %key, rows = rows.len(), "Mirror table replaced");
        Ok(())
    }

    async fn load(&self, table: &str) -> AppResult<Vec<Record>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .hvals(self.table_key(table))
            .await
            .map_err(|e| map_redis_error("Redis load failed", e))?;
        values.iter().map(|raw| parse_record(table, raw)).collect()
    }

    async fn get(&self, table: &str, key: &str) -> AppResult<Option<Record>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .hget(self.table_key(table), key)
            .await
            .map_err(|e| map_redis_error("Redis get failed", e))?;
        value.map(|raw| parse_record(table, &raw)).transpose()
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        check_connection(&mut conn).await
    }
}
