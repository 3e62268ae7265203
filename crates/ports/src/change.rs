//! 变更流与快照 trait 定义

use std::fmt;

use async_trait::async_trait;
use mirror_errors::{AppError, AppResult};
use mirror_query::{Record, TableSchema};
use serde::{Deserialize, Serialize};

/// 行变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
    /// 整表清空
    Truncate,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
            ChangeOperation::Truncate => "truncate",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解码后的单条行变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// 物理表名（不含 schema）
    pub table: String,
    pub operation: ChangeOperation,
    /// 主键列（Delete 时来自旧行标识）
    pub key: Record,
    /// 新行镜像，Delete / Truncate 时为 None
    ///
    /// Update 时可能缺少未修改的 TOAST 列，应用方需与已有记录合并
    pub row: Option<Record>,
    /// 流中位置
    pub position: String,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: Record, position: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOperation::Insert,
            key: Record::new(),
            row: Some(row),
            position: position.into(),
        }
    }

    pub fn update(table: impl Into<String>, row: Record, position: impl Into<String>) -> Self {
        Self {
            operation: ChangeOperation::Update,
            ..Self::insert(table, row, position)
        }
    }

    pub fn delete(table: impl Into<String>, key: Record, position: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOperation::Delete,
            key,
            row: None,
            position: position.into(),
        }
    }

    pub fn truncate(table: impl Into<String>, position: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOperation::Truncate,
            key: Record::new(),
            row: None,
            position: position.into(),
        }
    }

    /// 计算镜像键所用的列：优先新行，其次主键列
    pub fn key_source(&self) -> &Record {
        self.row.as_ref().unwrap_or(&self.key)
    }
}

/// 一次拉取的结果
///
/// 条目按提交顺序排列；解码失败的条目以 `Err` 出现，由读取方记录并跳过
#[derive(Debug, Default)]
pub struct ChangeBatch {
    pub entries: Vec<Result<ChangeEvent, AppError>>,
    /// 整批应用完成后确认的位置；None 表示没有可确认的内容
    pub checkpoint: Option<String>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.checkpoint.is_none()
    }
}

/// 变更流来源
///
/// 拉取不移动位置，只有 `ack` 之后已确认的变更才会被丢弃，
/// 因此连接中断后重新拉取会重放未确认的部分
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// 建立连接，并确保流的保留位置存在
    async fn connect(&self) -> AppResult<()>;

    /// 拉取下一批变更
    async fn poll(&self) -> AppResult<ChangeBatch>;

    /// 确认到给定位置为止的变更已应用
    async fn ack(&self, checkpoint: &str) -> AppResult<()>;

    /// 释放连接
    async fn release(&self) -> AppResult<()>;
}

/// 全量快照来源
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// 读取一张表的全部行
    async fn load_table(&self, schema: &TableSchema) -> AppResult<Vec<Record>>;
}
