//! 查询构造与翻译错误

use mirror_errors::AppError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("invalid field name: {0:?}")]
    InvalidField(String),

    #[error("unsupported field {field} for table {table}")]
    UnsupportedField { table: String, field: String },

    #[error("invalid value for {operator} on {field}: {reason}")]
    InvalidValue {
        field: String,
        operator: &'static str,
        reason: String,
    },

    #[error("{feature} is not supported by the {backend} backend")]
    UnsupportedFeature {
        feature: &'static str,
        backend: &'static str,
    },

    #[error("invalid table: {0}")]
    InvalidTable(String),
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError::validation(err.to_string())
    }
}
