//! 查询路由
//!
//! 每次调用读取一次开关快照：两个 Redis 开关都打开、调用方没有强制走数据库、
//! 表属于镜像表且查询不含预加载时走缓存，其余情况走关系库。
//! 缓存不可达且允许降级时，告警后改用关系库重新执行。

use std::fmt;
use std::sync::Arc;

use mirror_common::Paged;
use mirror_config::SystemConfig;
use mirror_errors::{AppError, AppResult};
use mirror_ports::QueryExecutor;
use mirror_query::{from_record, Query, Record, TablePolicy, TableSchema};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// 路由开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingFlags {
    pub use_redis: bool,
    pub use_redis_service: bool,
    pub fallback_to_relational: bool,
}

impl From<&SystemConfig> for RoutingFlags {
    fn from(config: &SystemConfig) -> Self {
        Self {
            use_redis: config.use_redis,
            use_redis_service: config.use_redis_service,
            fallback_to_relational: config.cache_fallback,
        }
    }
}

/// 可在运行时修改的共享开关，修改从下一次调用开始生效
#[derive(Debug, Clone, Default)]
pub struct FlagsHandle(Arc<RwLock<RoutingFlags>>);

impl FlagsHandle {
    pub fn new(flags: RoutingFlags) -> Self {
        Self(Arc::new(RwLock::new(flags)))
    }

    pub fn get(&self) -> RoutingFlags {
        *self.0.read()
    }

    pub fn set(&self, flags: RoutingFlags) {
        *self.0.write() = flags;
    }

    pub fn update(&self, f: impl FnOnce(&mut RoutingFlags)) {
        f(&mut self.0.write());
    }
}

/// 单次调用选项
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// 强制走关系库
    pub force_relational: bool,
}

impl QueryOptions {
    pub fn relational() -> Self {
        Self {
            force_relational: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Relational,
    Cache,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Cache => "cache",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct QueryRouter {
    relational: Arc<dyn QueryExecutor>,
    cache: Option<Arc<dyn QueryExecutor>>,
    policy: Arc<TablePolicy>,
    flags: FlagsHandle,
}

impl QueryRouter {
    pub fn new(
        relational: Arc<dyn QueryExecutor>,
        cache: Option<Arc<dyn QueryExecutor>>,
        policy: Arc<TablePolicy>,
        flags: FlagsHandle,
    ) -> Self {
        Self {
            relational,
            cache,
            policy,
            flags,
        }
    }

    pub fn flags(&self) -> &FlagsHandle {
        &self.flags
    }

    pub fn policy(&self) -> &Arc<TablePolicy> {
        &self.policy
    }

    /// 根据当前开关决定后端
    pub fn route(&self, table: &str, query: &Query, options: QueryOptions) -> Backend {
        let flags = self.flags.get();
        let cache_route = flags.use_redis
            && flags.use_redis_service
            && !options.force_relational
            && self.cache.is_some()
            && self.policy.is_mirrored(table)
            && !query.requires_relational();
        if cache_route {
            Backend::Cache
        } else {
            Backend::Relational
        }
    }

    pub async fn execute(
        &self,
        table: &str,
        query: &Query,
        options: QueryOptions,
    ) -> AppResult<Paged<Record>> {
        let schema = self.policy.schema(table);
        let backend = self.route(table, query, options);

        match (backend, &self.cache) {
            (Backend::Cache, Some(cache)) => match cache.execute(&schema, query).await {
                Ok(paged) => {
                    record_query(cache.backend());
                    Ok(paged)
                }
                Err(e) if e.is_unavailable() && self.flags.get().fallback_to_relational => {
                    warn!(
                        table,
                        error = %e,
                        "Cache unavailable, falling back to relational store"
                    );
                    metrics::counter!("mirror_query_fallback_total").increment(1);
                    self.run_relational(&schema, query).await
                }
                Err(e) => Err(e),
            },
            _ => self.run_relational(&schema, query).await,
        }
    }

    /// 执行查询并反序列化为领域类型
    pub async fn find<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        options: QueryOptions,
    ) -> AppResult<Paged<T>> {
        self.execute(table, query, options)
            .await?
            .try_map(from_record::<T>)
            .map_err(|e| AppError::decode(format!("Failed to convert {} row: {}", table, e)))
    }

    async fn run_relational(&self, schema: &TableSchema, query: &Query) -> AppResult<Paged<Record>> {
        let paged = self.relational.execute(schema, query).await?;
        record_query(self.relational.backend());
        debug!(table = schema.name(), total = paged.total, "Relational query executed");
        Ok(paged)
    }
}

fn record_query(backend: &'static str) {
    metrics::counter!("mirror_query_total", "backend" => backend).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_query::{Preload, TableSchema};

    struct Noop(&'static str);

    #[async_trait::async_trait]
    impl QueryExecutor for Noop {
        fn backend(&self) -> &'static str {
            self.0
        }

        async fn execute(&self, _: &TableSchema, _: &Query) -> AppResult<Paged<Record>> {
            Ok(Paged::empty())
        }
    }

    fn router(flags: RoutingFlags) -> QueryRouter {
        let policy = TablePolicy::new(
            "",
            vec![TableSchema::new("sys_user")],
            vec![TableSchema::new("sys_log")],
        )
        .unwrap();
        QueryRouter::new(
            Arc::new(Noop("postgres")),
            Some(Arc::new(Noop("redis"))),
            Arc::new(policy),
            FlagsHandle::new(flags),
        )
    }

    fn enabled() -> RoutingFlags {
        RoutingFlags {
            use_redis: true,
            use_redis_service: true,
            fallback_to_relational: true,
        }
    }

    #[test]
    fn test_route_requires_both_switches() {
        let q = Query::new();
        assert_eq!(router(enabled()).route("sys_user", &q, QueryOptions::default()), Backend::Cache);

        let mut flags = enabled();
        flags.use_redis_service = false;
        assert_eq!(router(flags).route("sys_user", &q, QueryOptions::default()), Backend::Relational);

        let mut flags = enabled();
        flags.use_redis = false;
        assert_eq!(router(flags).route("sys_user", &q, QueryOptions::default()), Backend::Relational);
    }

    #[test]
    fn test_route_by_table_and_query() {
        let r = router(enabled());
        let q = Query::new();
        assert_eq!(r.route("sys_log", &q, QueryOptions::default()), Backend::Relational);
        assert_eq!(r.route("unknown", &q, QueryOptions::default()), Backend::Relational);
        assert_eq!(r.route("sys_user", &q, QueryOptions::relational()), Backend::Relational);

        let preloaded = Query::new().preload(Preload::has_many("roles", "sys_role", "user_id").unwrap());
        assert_eq!(r.route("sys_user", &preloaded, QueryOptions::default()), Backend::Relational);
    }

    #[test]
    fn test_flag_updates_apply_to_next_call() {
        let r = router(enabled());
        let q = Query::new();
        assert_eq!(r.route("sys_user", &q, QueryOptions::default()), Backend::Cache);
        r.flags().update(|f| f.use_redis_service = false);
        assert_eq!(r.route("sys_user", &q, QueryOptions::default()), Backend::Relational);
    }

    #[test]
    fn test_flags_from_system_config() {
        let config = SystemConfig {
            use_redis: true,
            use_redis_service: false,
            cache_fallback: true,
        };
        let flags = RoutingFlags::from(&config);
        assert!(flags.use_redis);
        assert!(!flags.use_redis_service);
        assert!(flags.fallback_to_relational);
    }
}
