//! 关系库查询执行器
//!
//! 查询在 `to_jsonb(t)` 行表示上执行，与缓存侧求值器的比较语义一致。
//! 字段名总是作为参数绑定，表名加双引号转义

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mirror_common::Paged;
use mirror_errors::{AppError, AppResult};
use mirror_ports::QueryExecutor;
use mirror_query::{
    Condition, Predicate, Preload, PreloadKind, Query, Record, SortDirection, SortKey, TablePolicy,
    TableSchema,
};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::retry::map_sqlx_error;

/// 双引号转义的标识符
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn push_source(qb: &mut QueryBuilder<'static, Postgres>, physical: &str) {
    qb.push("(SELECT to_jsonb(t) AS r FROM ");
    qb.push(quote_ident(physical));
    qb.push(" t) s WHERE 1=1");
}

fn push_field(qb: &mut QueryBuilder<'static, Postgres>, field: &str) {
    qb.push("r -> ");
    qb.push_bind(field.to_string());
}

fn push_predicate(qb: &mut QueryBuilder<'static, Postgres>, predicate: &Predicate) {
    qb.push(" AND ");
    match predicate.condition() {
        Condition::Eq(value) => {
            push_field(qb, predicate.field());
            qb.push(" = ");
            qb.push_bind(Json(value.clone()));
        }
        Condition::Contains(needle) => {
            qb.push("(jsonb_typeof(");
            push_field(qb, predicate.field());
            qb.push(") = 'string' AND strpos(r ->> ");
            qb.push_bind(predicate.field().to_string());
            qb.push(", ");
            qb.push_bind(needle.clone());
            qb.push(") > 0)");
        }
        Condition::In(values) if values.is_empty() => {
            qb.push("FALSE");
        }
        Condition::In(values) => {
            push_field(qb, predicate.field());
            qb.push(" IN (");
            let mut separated = qb.separated(", ");
            for value in values {
                separated.push_bind(Json(value.clone()));
            }
            separated.push_unseparated(")");
        }
        Condition::Range { lower, upper } => {
            qb.push("(TRUE");
            if let Some(lower) = lower {
                qb.push(" AND ");
                push_field(qb, predicate.field());
                qb.push(" >= ");
                qb.push_bind(Json(lower.clone()));
            }
            if let Some(upper) = upper {
                qb.push(" AND ");
                push_field(qb, predicate.field());
                qb.push(" <= ");
                qb.push_bind(Json(upper.clone()));
            }
            qb.push(")");
        }
    }
}

fn push_order(qb: &mut QueryBuilder<'static, Postgres>, keys: &[SortKey]) {
    for (i, key) in keys.iter().enumerate() {
        qb.push(if i == 0 { " ORDER BY " } else { ", " });
        push_field(qb, &key.field);
        qb.push(match key.direction {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        });
    }
}

/// 构造分页查询
pub fn build_select(physical: &str, schema: &TableSchema, query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT r FROM ");
    push_source(&mut qb, physical);
    for predicate in &query.predicates {
        push_predicate(&mut qb, predicate);
    }
    push_order(&mut qb, &query.effective_sort(schema));
    if let Some((offset, limit)) = query.page.window() {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
    }
    qb
}

/// 构造计数查询
pub fn build_count(physical: &str, query: &Query) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
    push_source(&mut qb, physical);
    for predicate in &query.predicates {
        push_predicate(&mut qb, predicate);
    }
    qb
}

/// 按关联字段批量加载
fn build_related(physical: &str, key_field: &str, values: Vec<Value>, order_by: &str) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT r FROM ");
    push_source(&mut qb, physical);
    qb.push(" AND ");
    push_field(&mut qb, key_field);
    qb.push(" = ANY(");
    qb.push_bind(values.into_iter().map(Json).collect::<Vec<_>>());
    qb.push("::jsonb[])");
    push_order(
        &mut qb,
        &[SortKey {
            field: order_by.to_string(),
            direction: SortDirection::Asc,
        }],
    );
    qb
}

/// 值的分组键（按 JSON 文本，区分类型）
fn group_key(value: &Value) -> String {
    value.to_string()
}

/// PostgreSQL 查询执行器
#[derive(Clone)]
pub struct RelationalExecutor {
    pool: PgPool,
    policy: Arc<TablePolicy>,
}

impl RelationalExecutor {
    pub fn new(pool: PgPool, policy: Arc<TablePolicy>) -> Self {
        Self { pool, policy }
    }

    async fn fetch_records(&self, mut qb: QueryBuilder<'static, Postgres>, context: &str) -> AppResult<Vec<Record>> {
        let rows: Vec<Json<Record>> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(context, e))?;
        Ok(rows.into_iter().map(|Json(record)| record).collect())
    }

    async fn attach(&self, schema: &TableSchema, rows: &mut [Record], preload: &Preload) -> AppResult<()> {
        let related = self.policy.schema(&preload.table);
        let related_pk = related
            .primary_key()
            .first()
            .cloned()
            .unwrap_or_else(|| "id".to_string());
        let own_pk = schema
            .primary_key()
            .first()
            .cloned()
            .unwrap_or_else(|| "id".to_string());

        // BelongsTo: 本行外键 -> 关联表主键；HasMany: 关联表外键 -> 本行主键
        let (local_field, remote_field) = match preload.kind {
            PreloadKind::BelongsTo => (preload.foreign_key.as_str(), related_pk.as_str()),
            PreloadKind::HasMany => (own_pk.as_str(), preload.foreign_key.as_str()),
        };

        let mut seen = HashMap::new();
        for row in rows.iter() {
            if let Some(value) = row.get(local_field).filter(|v| !v.is_null()) {
                seen.entry(group_key(value)).or_insert_with(|| value.clone());
            }
        }

        let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
        if !seen.is_empty() {
            let physical = self.policy.physical_name(&preload.table);
            let qb = build_related(&physical, remote_field, seen.into_values().collect(), &related_pk);
            for record in self.fetch_records(qb, "Failed to load preload").await? {
                if let Some(value) = record.get(remote_field) {
                    grouped.entry(group_key(value)).or_default().push(record);
                }
            }
        }

        for row in rows.iter_mut() {
            let matched = row
                .get(local_field)
                .and_then(|value| grouped.get(&group_key(value)));
            let attached = match preload.kind {
                PreloadKind::BelongsTo => matched
                    .and_then(|records| records.first())
                    .map(|record| Value::Object(record.clone()))
                    .unwrap_or(Value::Null),
                PreloadKind::HasMany => Value::Array(
                    matched
                        .map(|records| records.iter().cloned().map(Value::Object).collect())
                        .unwrap_or_default(),
                ),
            };
            row.insert(preload.name.clone(), attached);
        }

        debug!(
            table = schema.name(),
            preload = preload.name.as_str(),
            related = preload.table.as_str(),
            "Preload attached"
        );
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for RelationalExecutor {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, schema: &TableSchema, query: &Query) -> AppResult<Paged<Record>> {
        query.validate(schema).map_err(AppError::from)?;
        let physical = self.policy.physical_name(schema.name());

        let total: i64 = build_count(&physical, query)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to count rows", e))?;

        let mut rows = self
            .fetch_records(build_select(&physical, schema, query), "Failed to query rows")
            .await?;

        for preload in &query.preloads {
            self.attach(schema, &mut rows, preload).await?;
        }

        Ok(Paged::new(rows, total.max(0) as u64))
    }
}
