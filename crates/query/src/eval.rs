//! 进程内查询求值器
//!
//! 在一组记录上执行 [`Query`]，结果的过滤、排序、分页与 PostgreSQL 在
//! `to_jsonb(row)` 上执行同一查询时一致：
//!
//! - 比较使用 `jsonb` 的类型顺序 `null < string < number < boolean < array < object`
//! - 字段缺失等同 SQL NULL，升序排在最后，降序排在最前，且不匹配任何谓词
//! - 字符串按字节序比较（C collation）
//! - `Contains` 只匹配字符串值

use std::cmp::Ordering;

use mirror_common::Paged;
use serde_json::{Number, Value};

use crate::error::QueryError;
use crate::predicate::{Condition, Predicate};
use crate::query::{Query, SortDirection, SortKey};
use crate::record::Record;
use crate::table::TableSchema;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// jsonb 对象的键顺序：先比长度，再比字节
fn jsonb_key_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// 按 `jsonb` 规则比较两个值
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y.iter())
                .map(|(l, r)| compare_json(l, r))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()).then_with(|| {
            let mut left: Vec<_> = x.iter().collect();
            let mut right: Vec<_> = y.iter().collect();
            left.sort_by(|l, r| jsonb_key_order(l.0, r.0));
            right.sort_by(|l, r| jsonb_key_order(l.0, r.0));
            left.iter()
                .zip(right.iter())
                .map(|((lk, lv), (rk, rv))| {
                    jsonb_key_order(lk, rk).then_with(|| compare_json(lv, rv))
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// `jsonb` 相等：数值按大小比较（`1 = 1.0`）
pub fn json_eq(a: &Value, b: &Value) -> bool {
    compare_json(a, b).is_eq()
}

/// 单个谓词是否命中
pub fn matches_predicate(record: &Record, predicate: &Predicate) -> bool {
    let Some(value) = record.get(predicate.field()) else {
        return false;
    };

    match predicate.condition() {
        Condition::Eq(expected) => json_eq(value, expected),
        // 只匹配字符串：数值的文本形式在两端不一致（numeric 保留小数位）
        Condition::Contains(needle) => match value {
            Value::String(text) => text.contains(needle.as_str()),
            _ => false,
        },
        Condition::In(candidates) => candidates.iter().any(|c| json_eq(value, c)),
        Condition::Range { lower, upper } => {
            let above = lower
                .as_ref()
                .is_none_or(|lo| compare_json(value, lo).is_ge());
            let below = upper
                .as_ref()
                .is_none_or(|hi| compare_json(value, hi).is_le());
            above && below
        }
    }
}

/// 全部谓词（AND）是否命中；无谓词时恒为 true
pub fn matches(record: &Record, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| matches_predicate(record, p))
}

/// 单个排序键上的比较，缺失字段视为 NULL（大于任何值）
fn compare_field(a: &Record, b: &Record, key: &SortKey) -> Ordering {
    let ordering = match (a.get(&key.field), b.get(&key.field)) {
        (Some(x), Some(y)) => compare_json(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    match key.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// 按排序键依次比较
pub fn compare_records(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
    keys.iter()
        .map(|key| compare_field(a, b, key))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// 在记录集合上执行查询
///
/// 预加载只有关系库支持，这里直接拒绝
pub fn evaluate(
    records: impl IntoIterator<Item = Record>,
    query: &Query,
    schema: &TableSchema,
) -> Result<Paged<Record>, QueryError> {
    if query.requires_relational() {
        return Err(QueryError::UnsupportedFeature {
            feature: "preload",
            backend: "cache",
        });
    }
    query.validate(schema)?;

    let mut rows: Vec<Record> = records
        .into_iter()
        .filter(|record| matches(record, &query.predicates))
        .collect();

    let keys = query.effective_sort(schema);
    rows.sort_by(|a, b| compare_records(a, b, &keys));

    let total = rows.len() as u64;
    let rows = match query.page.window() {
        None => rows,
        Some((offset, limit)) => {
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            rows.into_iter().skip(offset).take(limit).collect()
        }
    };

    Ok(Paged::new(rows, total))
}
