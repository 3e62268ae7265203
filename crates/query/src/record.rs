//! 行记录：扁平的字段映射

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// 一行数据，与 PostgreSQL `to_jsonb(row)` 的结构一致
pub type Record = Map<String, Value>;

/// 字段的文本形式，对应 PostgreSQL 的 `->>` 运算
///
/// 字符串原样返回；null 返回 None
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 由主键列计算镜像键，多列主键用 `:` 连接
///
/// 任一主键列缺失或为 null 时返回 None
pub fn record_key(record: &Record, primary_key: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(primary_key.len());
    for column in primary_key {
        parts.push(value_text(record.get(column)?)?);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join(":"))
}

/// 转为业务结构体
pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(record))
}
