//! 谓词定义
//!
//! 操作符是封闭枚举，在构造查询时一次性解析，未知操作符立即拒绝

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::QueryError;

/// 谓词操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// 精确相等
    Eq,
    /// 区分大小写的子串匹配
    Contains,
    /// 属于给定集合
    In,
    /// 闭区间，上下界至少一个
    Range,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Contains => "contains",
            Operator::In => "in",
            Operator::Range => "range",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => Ok(Operator::Eq),
            "contains" | "like" => Ok(Operator::Contains),
            "in" => Ok(Operator::In),
            "range" | "between" => Ok(Operator::Range),
            _ => Err(QueryError::UnknownOperator(s.to_string())),
        }
    }
}

/// 操作符与其取值
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Contains(String),
    In(Vec<Value>),
    Range {
        lower: Option<Value>,
        upper: Option<Value>,
    },
}

impl Condition {
    pub fn operator(&self) -> Operator {
        match self {
            Condition::Eq(_) => Operator::Eq,
            Condition::Contains(_) => Operator::Contains,
            Condition::In(_) => Operator::In,
            Condition::Range { .. } => Operator::Range,
        }
    }
}

/// 单个过滤条件
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    field: String,
    condition: Condition,
}

impl Predicate {
    /// 由字段、已解析的操作符和 JSON 值构造
    ///
    /// - `Contains` 需要字符串
    /// - `In` 需要数组
    /// - `Range` 接受 `[lower, upper]` 或 `{"min": .., "max": ..}`，`null` 表示无界
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Result<Self, QueryError> {
        let field = checked_field(field.into())?;
        let invalid = |reason: &str| QueryError::InvalidValue {
            field: field.clone(),
            operator: operator.as_str(),
            reason: reason.to_string(),
        };

        let condition = match operator {
            Operator::Eq => Condition::Eq(value),
            Operator::Contains => match value {
                Value::String(s) => Condition::Contains(s),
                _ => return Err(invalid("expected a string")),
            },
            Operator::In => match value {
                Value::Array(items) => Condition::In(items),
                _ => return Err(invalid("expected an array")),
            },
            Operator::Range => {
                let (lower, upper) = match value {
                    Value::Array(mut items) if items.len() == 2 => {
                        let upper = items.pop();
                        let lower = items.pop();
                        (lower, upper)
                    }
                    Value::Object(mut map) => (map.remove("min"), map.remove("max")),
                    _ => return Err(invalid("expected [lower, upper] or {min, max}")),
                };
                let lower = lower.filter(|v| !v.is_null());
                let upper = upper.filter(|v| !v.is_null());
                if lower.is_none() && upper.is_none() {
                    return Err(invalid("at least one bound is required"));
                }
                Condition::Range { lower, upper }
            }
        };

        Ok(Self { field, condition })
    }

    /// 由字符串形式的操作符构造，未知操作符返回错误
    pub fn parse(field: impl Into<String>, operator: &str, value: Value) -> Result<Self, QueryError> {
        let operator = operator.parse::<Operator>()?;
        Self::new(field, operator, value)
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Result<Self, QueryError> {
        Self::new(field, Operator::Eq, value.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Result<Self, QueryError> {
        Self::new(field, Operator::Contains, Value::String(needle.into()))
    }

    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self, QueryError> {
        let values = values.into_iter().map(Into::into).collect();
        Self::new(field, Operator::In, Value::Array(values))
    }

    pub fn range(
        field: impl Into<String>,
        lower: Option<Value>,
        upper: Option<Value>,
    ) -> Result<Self, QueryError> {
        let lower = lower.unwrap_or(Value::Null);
        let upper = upper.unwrap_or(Value::Null);
        Self::new(field, Operator::Range, Value::Array(vec![lower, upper]))
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn operator(&self) -> Operator {
        self.condition.operator()
    }
}

/// 字段名：非空，仅字母、数字、下划线
pub(crate) fn checked_field(field: String) -> Result<String, QueryError> {
    let valid = !field.is_empty()
        && field.len() <= 63
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(field)
    } else {
        Err(QueryError::InvalidField(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_parse() {
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::Eq);
        assert_eq!("contains".parse::<Operator>().unwrap(), Operator::Contains);
        assert_eq!(" IN ".parse::<Operator>().unwrap(), Operator::In);
        assert_eq!("range".parse::<Operator>().unwrap(), Operator::Range);
        assert_eq!(
            ">=".parse::<Operator>().unwrap_err(),
            QueryError::UnknownOperator(">=".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_unknown_operator_at_construction() {
        let err = Predicate::parse("host", "startswith", json!("10.")).unwrap_err();
        assert!(matches!(err, QueryError::UnknownOperator(_)));
    }

    #[test]
    fn test_contains_requires_string() {
        assert!(Predicate::contains("host", "10.0").is_ok());
        let err = Predicate::new("host", Operator::Contains, json!(10)).unwrap_err();
        assert!(matches!(err, QueryError::InvalidValue { operator: "contains", .. }));
    }

    #[test]
    fn test_in_requires_array() {
        let p = Predicate::is_in("status", [1, 2]).unwrap();
        assert_eq!(p.condition(), &Condition::In(vec![json!(1), json!(2)]));
        assert!(Predicate::new("status", Operator::In, json!(1)).is_err());
    }

    #[test]
    fn test_range_forms() {
        let p = Predicate::new("age", Operator::Range, json!([18, null])).unwrap();
        assert_eq!(
            p.condition(),
            &Condition::Range {
                lower: Some(json!(18)),
                upper: None
            }
        );

        let p = Predicate::new("age", Operator::Range, json!({"max": 60})).unwrap();
        assert_eq!(
            p.condition(),
            &Condition::Range {
                lower: None,
                upper: Some(json!(60))
            }
        );

        assert!(Predicate::range("age", None, None).is_err());
    }

    #[test]
    fn test_field_names_are_checked() {
        assert!(Predicate::eq("login_name", "root").is_ok());
        assert!(matches!(
            Predicate::eq("name'; --", "x").unwrap_err(),
            QueryError::InvalidField(_)
        ));
        assert!(Predicate::eq("", "x").is_err());
    }
}
