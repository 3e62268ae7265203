//! MirrorStore trait 定义

use async_trait::async_trait;
use mirror_errors::AppResult;
use mirror_query::Record;

/// 镜像记录存储
///
/// 表名为逻辑表名，键为主键字符串。每个写操作对单条记录是原子的，
/// 重复执行结果不变
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// 写入整行
    async fn upsert(&self, table: &str, key: &str, row: &Record) -> AppResult<()>;

    /// 删除一行，不存在时不报错
    async fn remove(&self, table: &str, key: &str) -> AppResult<()>;

    /// 清空一张表
    async fn clear(&self, table: &str) -> AppResult<()>;

    /// 用给定数据整体替换一张表，读者不会看到中间状态
    async fn replace_all(&self, table: &str, rows: Vec<(String, Record)>) -> AppResult<()>;

    /// 读取一张表的全部记录
    async fn load(&self, table: &str) -> AppResult<Vec<Record>>;

    /// 按主键读取
    async fn get(&self, table: &str, key: &str) -> AppResult<Option<Record>>;

    /// 连通性检查
    async fn ping(&self) -> AppResult<()>;
}
