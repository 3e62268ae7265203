//! 表划分策略
//!
//! 每张配置过的表只属于"镜像"或"排除"之一，划分是静态配置

use std::collections::{BTreeSet, HashMap};

use crate::error::QueryError;
use crate::predicate::checked_field;

/// 表结构描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    primary_key: Vec<String>,
    /// 允许查询的字段；None 表示不限制
    fields: Option<BTreeSet<String>>,
}

impl TableSchema {
    /// 主键默认 `id`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: vec!["id".to_string()],
            fields: None,
        }
    }

    pub fn with_primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if !columns.is_empty() {
            self.primary_key = columns;
        }
        self
    }

    pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn has_field(&self, field: &str) -> bool {
        match &self.fields {
            Some(fields) => fields.contains(field) || self.primary_key.iter().any(|pk| pk == field),
            None => true,
        }
    }
}

/// 表分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableClass {
    /// 参与变更流同步，可以走缓存查询
    Mirrored,
    /// 只走关系库
    Excluded,
    /// 未配置，按非镜像处理
    Unlisted,
}

/// 镜像 / 排除表划分
#[derive(Debug, Clone, Default)]
pub struct TablePolicy {
    table_prefix: String,
    mirrored: HashMap<String, TableSchema>,
    excluded: HashMap<String, TableSchema>,
}

impl TablePolicy {
    /// 创建表策略，同一张表出现在两个列表中时返回错误
    pub fn new(
        table_prefix: impl Into<String>,
        mirrored: impl IntoIterator<Item = TableSchema>,
        excluded: impl IntoIterator<Item = TableSchema>,
    ) -> Result<Self, QueryError> {
        let mut policy = Self {
            table_prefix: table_prefix.into(),
            ..Default::default()
        };

        for schema in mirrored {
            let name = checked_field(schema.name.clone()).map_err(|_| QueryError::InvalidTable(schema.name.clone()))?;
            if policy.mirrored.insert(name.clone(), schema).is_some() {
                return Err(QueryError::InvalidTable(format!("{} listed twice", name)));
            }
        }
        for schema in excluded {
            let name = checked_field(schema.name.clone()).map_err(|_| QueryError::InvalidTable(schema.name.clone()))?;
            if policy.mirrored.contains_key(&name) || policy.excluded.contains_key(&name) {
                return Err(QueryError::InvalidTable(format!(
                    "{} must be either mirrored or excluded, not both",
                    name
                )));
            }
            policy.excluded.insert(name, schema);
        }

        Ok(policy)
    }

    pub fn classify(&self, table: &str) -> TableClass {
        if self.mirrored.contains_key(table) {
            TableClass::Mirrored
        } else if self.excluded.contains_key(table) {
            TableClass::Excluded
        } else {
            TableClass::Unlisted
        }
    }

    pub fn is_mirrored(&self, table: &str) -> bool {
        self.classify(table) == TableClass::Mirrored
    }

    /// 表结构；未配置的表使用默认主键 `id`
    pub fn schema(&self, table: &str) -> TableSchema {
        self.mirrored
            .get(table)
            .or_else(|| self.excluded.get(table))
            .cloned()
            .unwrap_or_else(|| TableSchema::new(table))
    }

    pub fn mirrored_schema(&self, table: &str) -> Option<&TableSchema> {
        self.mirrored.get(table)
    }

    /// 全部镜像表，按名称排序
    pub fn mirrored_tables(&self) -> Vec<&TableSchema> {
        let mut tables: Vec<_> = self.mirrored.values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// 逻辑表名 → 物理表名
    pub fn physical_name(&self, table: &str) -> String {
        if self.table_prefix.is_empty() {
            table.to_string()
        } else {
            format!("{}_{}", self.table_prefix, table)
        }
    }

    /// 物理表名 → 逻辑表名（仅限配置过的表）
    pub fn logical_name<'a>(&'a self, physical: &str) -> Option<&'a str> {
        let logical = if self.table_prefix.is_empty() {
            physical
        } else {
            physical
                .strip_prefix(self.table_prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))?
        };
        self.mirrored
            .get_key_value(logical)
            .or_else(|| self.excluded.get_key_value(logical))
            .map(|(name, _)| name.as_str())
    }

    /// 物理表名对应的镜像表结构，非镜像表返回 None
    pub fn mirrored_by_physical(&self, physical: &str) -> Option<&TableSchema> {
        self.logical_name(physical)
            .and_then(|logical| self.mirrored.get(logical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> TablePolicy {
        TablePolicy::new(
            "tb",
            [
                TableSchema::new("sys_user"),
                TableSchema::new("relation_menu_role").with_primary_key(["menu_id", "role_id"]),
            ],
            [TableSchema::new("sys_operation_log")],
        )
        .unwrap()
    }

    #[test]
    fn test_classify() {
        let policy = policy();
        assert_eq!(policy.classify("sys_user"), TableClass::Mirrored);
        assert_eq!(policy.classify("sys_operation_log"), TableClass::Excluded);
        assert_eq!(policy.classify("sys_unknown"), TableClass::Unlisted);
        assert!(!policy.is_mirrored("sys_operation_log"));
    }

    #[test]
    fn test_overlap_rejected() {
        let err = TablePolicy::new(
            "",
            [TableSchema::new("sys_user")],
            [TableSchema::new("sys_user")],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidTable(_)));
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let err = TablePolicy::new("", [TableSchema::new("bad-name")], []).unwrap_err();
        assert_eq!(err, QueryError::InvalidTable("bad-name".to_string()));
    }

    #[test]
    fn test_physical_and_logical_names() {
        let policy = policy();
        assert_eq!(policy.physical_name("sys_user"), "tb_sys_user");
        assert_eq!(policy.logical_name("tb_sys_user"), Some("sys_user"));
        assert_eq!(policy.logical_name("tb_sys_operation_log"), Some("sys_operation_log"));
        assert_eq!(policy.logical_name("sys_user"), None);
        assert_eq!(policy.logical_name("tbx_sys_user"), None);
        assert!(policy.mirrored_by_physical("tb_sys_operation_log").is_none());
        assert_eq!(
            policy.mirrored_by_physical("tb_relation_menu_role").unwrap().primary_key(),
            &["menu_id".to_string(), "role_id".to_string()]
        );
    }

    #[test]
    fn test_schema_defaults() {
        let policy = policy();
        assert_eq!(policy.schema("anything").primary_key(), &["id".to_string()]);
        assert_eq!(policy.mirrored_tables().len(), 2);
        assert_eq!(policy.mirrored_tables()[0].name(), "relation_menu_role");
    }
}
