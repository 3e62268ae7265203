//! wal2json（format-version 2）消息解码
//!
//! 每条消息是一个 JSON 对象，`action` 取值：
//! `B`/`C` 事务边界，`I`/`U`/`D` 行变更，`T` 清空表，`M` 逻辑消息。
//! 列值被规范化为 `to_jsonb(row)` 的表示，使快照与增量数据一致

use mirror_errors::AppError;
use mirror_ports::ChangeEvent;
use mirror_query::Record;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed wal2json payload at {position}: {source}")]
    Json {
        position: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown wal2json action {action:?} at {position}")]
    UnknownAction { action: String, position: String },

    #[error("wal2json {action} message at {position} is missing {field}")]
    MissingField {
        action: String,
        position: String,
        field: &'static str,
    },
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        AppError::decode(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct Message {
    action: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    identity: Vec<Column>,
    /// `include-pk` 输出的主键列名（不含值）
    #[serde(default)]
    pk: Vec<PkColumn>,
}

#[derive(Debug, Deserialize)]
struct PkColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default)]
    value: Value,
}

/// 解码一条消息
///
/// 事务边界和逻辑消息返回 `Ok(None)`
pub fn decode(position: &str, data: &str) -> Result<Option<ChangeEvent>, DecodeError> {
    let message: Message = serde_json::from_str(data).map_err(|source| DecodeError::Json {
        position: position.to_string(),
        source,
    })?;

    let missing = |field: &'static str| DecodeError::MissingField {
        action: message.action.clone(),
        position: position.to_string(),
        field,
    };

    let event = match message.action.as_str() {
        "B" | "C" | "M" => return Ok(None),
        "I" | "U" => {
            let table = message.table.clone().ok_or_else(|| missing("table"))?;
            if message.columns.is_empty() {
                return Err(missing("columns"));
            }
            let row = to_record(&message.columns);
            let mut event = if message.action == "I" {
                ChangeEvent::insert(table, row, position)
            } else {
                ChangeEvent::update(table, row, position)
            };
            // 主键变化时 identity 携带旧键
            event.key = to_record(&message.identity);
            event
        }
        "D" => {
            let table = message.table.clone().ok_or_else(|| missing("table"))?;
            let key = delete_key(&message).ok_or_else(|| missing("identity"))?;
            ChangeEvent::delete(table, key, position)
        }
        "T" => {
            let table = message.table.clone().ok_or_else(|| missing("table"))?;
            ChangeEvent::truncate(table, position)
        }
        other => {
            return Err(DecodeError::UnknownAction {
                action: other.to_string(),
                position: position.to_string(),
            });
        }
    };

    Ok(Some(event))
}

/// 删除的主键：优先 `identity`，否则按 `pk` 列名从 `columns` 中取值
fn delete_key(message: &Message) -> Option<Record> {
    if !message.identity.is_empty() {
        return Some(to_record(&message.identity));
    }
    if message.pk.is_empty() {
        return None;
    }
    let key: Record = message
        .columns
        .iter()
        .filter(|column| message.pk.iter().any(|pk| pk.name == column.name))
        .map(|column| {
            (
                column.name.clone(),
                normalize_value(column.type_name.as_deref(), &column.value),
            )
        })
        .collect();
    (key.len() == message.pk.len()).then_some(key)
}

fn to_record(columns: &[Column]) -> Record {
    columns
        .iter()
        .map(|column| {
            (
                column.name.clone(),
                normalize_value(column.type_name.as_deref(), &column.value),
            )
        })
        .collect()
}

/// 按列类型把 wal2json 的值转换为 `to_jsonb` 的表示
pub fn normalize_value(type_name: Option<&str>, value: &Value) -> Value {
    let (Some(type_name), Value::String(text)) = (type_name, value) else {
        return value.clone();
    };

    if type_name.starts_with("timestamp") {
        Value::String(normalize_timestamp(text))
    } else if type_name == "json" || type_name == "jsonb" {
        serde_json::from_str(text).unwrap_or_else(|_| value.clone())
    } else {
        value.clone()
    }
}

/// `2024-01-02 03:04:05+08` -> `2024-01-02T03:04:05+08:00`
pub fn normalize_timestamp(text: &str) -> String {
    let mut out = text.replacen(' ', "T", 1);
    if let Some(t) = out.find('T') {
        if let Some(sign) = out[t..].rfind(['+', '-']) {
            let offset = &out[t + sign + 1..];
            if offset.len() == 2 && offset.bytes().all(|b| b.is_ascii_digit()) {
                out.push_str(":00");
            }
        }
    }
    out
}
