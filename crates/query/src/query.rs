//! 查询：谓词（AND）、排序、分页、预加载

use mirror_common::PageInfo;
use serde_json::Value;

use crate::error::QueryError;
use crate::predicate::{Operator, Predicate, checked_field};
use crate::table::TableSchema;

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// 排序键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// 分页描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// 返回全部匹配行
    All,
    Offset { offset: u64, limit: u64 },
    Page(PageInfo),
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest::Page(PageInfo::default())
    }
}

impl PageRequest {
    /// 归一化为 (offset, limit)，None 表示不分页
    pub fn window(&self) -> Option<(u64, u64)> {
        match self {
            PageRequest::All => None,
            PageRequest::Offset { offset, limit } => Some((*offset, *limit)),
            PageRequest::Page(info) => info.window(),
        }
    }
}

/// 预加载关系类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadKind {
    /// 本行的 `foreign_key` 指向关联表主键 `id`，挂载为对象
    BelongsTo,
    /// 关联表的 `foreign_key` 指向本行 `id`，挂载为数组
    HasMany,
}

/// 关联实体预加载（仅关系库后端支持）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preload {
    /// 挂载到结果行上的字段名
    pub name: String,
    /// 关联表（逻辑名）
    pub table: String,
    pub foreign_key: String,
    pub kind: PreloadKind,
}

impl Preload {
    pub fn belongs_to(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            name: checked_field(name.into())?,
            table: checked_field(table.into())?,
            foreign_key: checked_field(foreign_key.into())?,
            kind: PreloadKind::BelongsTo,
        })
    }

    pub fn has_many(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            name: checked_field(name.into())?,
            table: checked_field(table.into())?,
            foreign_key: checked_field(foreign_key.into())?,
            kind: PreloadKind::HasMany,
        })
    }
}

/// 规范化的查询
///
/// 可选输入只有在非空时才产生谓词，不会生成恒真/恒假条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub predicates: Vec<Predicate>,
    pub sort: Vec<SortKey>,
    pub page: PageRequest,
    pub preloads: Vec<Preload>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不分页的全量查询
    pub fn all() -> Self {
        Self {
            page: PageRequest::All,
            ..Default::default()
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// 字符串子串匹配，去除首尾空白后为空则忽略
    pub fn contains_opt(mut self, field: &str, value: Option<&str>) -> Result<Self, QueryError> {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.predicates.push(Predicate::contains(field, value)?);
        }
        Ok(self)
    }

    /// 字符串精确匹配，去除首尾空白后为空则忽略
    pub fn eq_str_opt(mut self, field: &str, value: Option<&str>) -> Result<Self, QueryError> {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.predicates.push(Predicate::eq(field, value)?);
        }
        Ok(self)
    }

    /// 数值/枚举相等，None 表示未设置
    pub fn eq_opt<T: Into<Value>>(mut self, field: &str, value: Option<T>) -> Result<Self, QueryError> {
        if let Some(value) = value {
            self.predicates.push(Predicate::eq(field, value)?);
        }
        Ok(self)
    }

    /// 集合匹配，空切片表示未设置
    pub fn in_opt<T: Into<Value> + Clone>(mut self, field: &str, values: &[T]) -> Result<Self, QueryError> {
        if !values.is_empty() {
            self.predicates
                .push(Predicate::is_in(field, values.iter().cloned())?);
        }
        Ok(self)
    }

    /// 区间匹配，两端都未设置则忽略
    pub fn range_opt<T: Into<Value>>(
        mut self,
        field: &str,
        lower: Option<T>,
        upper: Option<T>,
    ) -> Result<Self, QueryError> {
        if lower.is_some() || upper.is_some() {
            self.predicates.push(Predicate::range(
                field,
                lower.map(Into::into),
                upper.map(Into::into),
            )?);
        }
        Ok(self)
    }

    /// 由字符串操作符追加谓词（调用方动态构造时使用）
    pub fn where_op(mut self, field: &str, operator: &str, value: Value) -> Result<Self, QueryError> {
        let operator: Operator = operator.parse()?;
        self.predicates.push(Predicate::new(field, operator, value)?);
        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Result<Self, QueryError> {
        self.sort.push(SortKey {
            field: checked_field(field.to_string())?,
            direction,
        });
        Ok(self)
    }

    pub fn order_asc(self, field: &str) -> Result<Self, QueryError> {
        self.order_by(field, SortDirection::Asc)
    }

    pub fn order_desc(self, field: &str) -> Result<Self, QueryError> {
        self.order_by(field, SortDirection::Desc)
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    pub fn page_info(self, info: PageInfo) -> Self {
        self.page(PageRequest::Page(info))
    }

    pub fn offset_limit(self, offset: u64, limit: u64) -> Self {
        self.page(PageRequest::Offset { offset, limit })
    }

    pub fn preload(mut self, preload: Preload) -> Self {
        self.preloads.push(preload);
        self
    }

    /// 是否需要只有关系库才支持的能力
    pub fn requires_relational(&self) -> bool {
        !self.preloads.is_empty()
    }

    /// 查询引用到的全部字段
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.predicates
            .iter()
            .map(Predicate::field)
            .chain(self.sort.iter().map(|key| key.field.as_str()))
    }

    /// 按表声明的字段集合校验
    pub fn validate(&self, schema: &TableSchema) -> Result<(), QueryError> {
        for field in self.fields() {
            if !schema.has_field(field) {
                return Err(QueryError::UnsupportedField {
                    table: schema.name().to_string(),
                    field: field.to_string(),
                });
            }
        }
        for preload in &self.preloads {
            if preload.kind == PreloadKind::BelongsTo && !schema.has_field(&preload.foreign_key) {
                return Err(QueryError::UnsupportedField {
                    table: schema.name().to_string(),
                    field: preload.foreign_key.clone(),
                });
            }
        }
        Ok(())
    }

    /// 排序键加上主键兜底，保证分页结果确定
    pub fn effective_sort(&self, schema: &TableSchema) -> Vec<SortKey> {
        let mut keys = self.sort.clone();
        for pk in schema.primary_key() {
            if !keys.iter().any(|key| &key.field == pk) {
                keys.push(SortKey {
                    field: pk.clone(),
                    direction: SortDirection::Asc,
                });
            }
        }
        keys
    }
}
