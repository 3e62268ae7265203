//! 缓存执行器：读出镜像表全部记录，在进程内求值

use std::sync::Arc;

use async_trait::async_trait;
use mirror_common::Paged;
use mirror_errors::{AppError, AppResult};
use mirror_ports::{MirrorStore, QueryExecutor};
use mirror_query::{eval, Query, QueryError, Record, TablePolicy, TableSchema};
use tracing::debug;

pub struct CacheExecutor {
    store: Arc<dyn MirrorStore>,
    policy: Arc<TablePolicy>,
}

impl CacheExecutor {
    pub fn new(store: Arc<dyn MirrorStore>, policy: Arc<TablePolicy>) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl QueryExecutor for CacheExecutor {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn execute(&self, schema: &TableSchema, query: &Query) -> AppResult<Paged<Record>> {
        if !self.policy.is_mirrored(schema.name()) {
            return Err(AppError::validation(format!(
                "table {} is not mirrored",
                schema.name()
            )));
        }
        if query.requires_relational() {
            return Err(QueryError::UnsupportedFeature {
                feature: "preload",
                backend: "cache",
            }
            .into());
        }
        query.validate(schema).map_err(AppError::from)?;

        let records = self.store.load(schema.name()).await?;
        let scanned = records.len();
        let paged = eval::evaluate(records, query, schema)?;

        debug!(
            table = schema.name(),
            scanned,
            total = paged.total,
            returned = paged.rows.len(),
            "Cache query evaluated"
        );
        Ok(paged)
    }
}
