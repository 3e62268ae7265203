//! QueryExecutor trait 定义

use async_trait::async_trait;
use mirror_common::Paged;
use mirror_errors::AppResult;
use mirror_query::{Query, Record, TableSchema};

/// 查询执行器
///
/// 关系库与缓存两种实现，对同一查询返回相同顺序的同一页结果
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// 后端名称，用于日志和指标
    fn backend(&self) -> &'static str;

    /// 执行查询，返回当前页和匹配总数
    async fn execute(&self, schema: &TableSchema, query: &Query) -> AppResult<Paged<Record>>;
}
