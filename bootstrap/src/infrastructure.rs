//! 基础设施资源管理
//!
//! 按配置建立 PostgreSQL 连接池、（启用时）Redis 连接，并构造表策略

use std::sync::Arc;

use mirror_adapter_postgres::{
    LogicalSlotConfig, PgLogicalSource, PgSnapshotSource, RelationalExecutor, connect_with_deadline,
    database_collation, is_byte_order_collation,
};
use mirror_adapter_redis::{RedisMirrorStore, connect_manager};
use mirror_common::RetryConfig;
use mirror_config::AppConfig;
use mirror_errors::{AppError, AppResult};
use mirror_ports::MirrorStore;
use mirror_query::{TablePolicy, TableSchema};
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tracing::{info, warn};

/// 连接池状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: u32,
    pub active: u32,
}

/// 基础设施资源容器
pub struct Infrastructure {
    config: AppConfig,
    postgres_pool: PgPool,
    /// `system.use_redis=false` 时为 None，整个进程不接触 Redis
    redis_conn: Option<ConnectionManager>,
    policy: Arc<TablePolicy>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源
    ///
    /// PostgreSQL 在 `connect_timeout_secs` 内连不上即失败；
    /// 启用 Redis 时 Redis 不可达同样失败
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        let policy = Arc::new(build_policy(&config)?);

        let retry_config = RetryConfig::default();
        let postgres_pool = connect_with_deadline(&config.database, &retry_config).await?;
        info!(
            max_connections = config.database.max_connections,
            "PostgreSQL connection pool created"
        );

        let redis_conn = if config.system.use_redis {
            warn_on_collation(&postgres_pool).await;
            let conn = connect_manager(&config.redis).await?;
            info!("Redis connection created");
            Some(conn)
        } else {
            info!("Redis disabled, queries use the relational store only");
            None
        };

        Ok(Self {
            config,
            postgres_pool,
            redis_conn,
            policy,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn postgres_pool(&self) -> PgPool {
        self.postgres_pool.clone()
    }

    pub fn policy(&self) -> Arc<TablePolicy> {
        self.policy.clone()
    }

    pub fn has_redis(&self) -> bool {
        self.redis_conn.is_some()
    }

    pub fn relational_executor(&self) -> RelationalExecutor {
        RelationalExecutor::new(self.postgres_pool.clone(), self.policy.clone())
    }

    /// Redis 镜像存储（未启用 Redis 时为 None）
    pub fn mirror_store(&self) -> Option<Arc<dyn MirrorStore>> {
        self.redis_conn.clone().map(|conn| {
            Arc::new(RedisMirrorStore::new(conn, self.config.redis.key_prefix.clone()))
                as Arc<dyn MirrorStore>
        })
    }

    pub fn change_source(&self) -> PgLogicalSource {
        PgLogicalSource::new(
            self.postgres_pool.clone(),
            LogicalSlotConfig {
                slot_name: self.config.sync.slot_name.clone(),
                batch_size: self.config.sync.batch_size,
                tables: slot_tables(&self.config, &self.policy),
            },
        )
    }

    pub fn snapshot_source(&self) -> PgSnapshotSource {
        PgSnapshotSource::new(self.postgres_pool.clone(), self.policy.clone())
    }

    pub fn postgres_pool_status(&self) -> PoolStatus {
        let size = self.postgres_pool.size();
        let idle = self.postgres_pool.num_idle() as u32;
        PoolStatus {
            size,
            idle,
            active: size.saturating_sub(idle),
        }
    }

    /// 检查 Redis 连接状态，未启用时返回 None
    pub async fn check_redis_connection(&self) -> Option<bool> {
        let store = self.mirror_store()?;
        Some(store.ping().await.is_ok())
    }
}

/// 缓存侧按字节序比较字符串，与非 C 排序规则的数据库排序/范围结果可能不同
async fn warn_on_collation(pool: &PgPool) {
    match database_collation(pool).await {
        Ok(collation) if is_byte_order_collation(&collation) => {
            info!(collation = %collation, "Database collation compatible with cache ordering");
        }
        Ok(collation) => {
            warn!(
                collation = %collation,
                "Database collation is not byte-ordered, cache-backed string sorts and ranges may differ from PostgreSQL"
            );
        }
        Err(e) => warn!(error = %e, "Failed to read database collation"),
    }
}

/// 由 `sync` 配置构造表策略
pub fn build_policy(config: &AppConfig) -> AppResult<TablePolicy> {
    let mirrored = config
        .sync
        .mirrored_tables
        .iter()
        .map(|name| TableSchema::new(name).with_primary_key(config.sync.primary_key_of(name)));
    let excluded = config.sync.excluded_tables.iter().map(TableSchema::new);

    TablePolicy::new(config.database.table_prefix.clone(), mirrored, excluded)
        .map_err(|e| AppError::config(e.to_string()))
}

/// 复制槽输出的表：`schema.physical_table`
pub fn slot_tables(config: &AppConfig, policy: &TablePolicy) -> Vec<String> {
    policy
        .mirrored_tables()
        .into_iter()
        .map(|schema| format!("{}.{}", config.database.schema, policy.physical_name(schema.name())))
        .collect()
}
