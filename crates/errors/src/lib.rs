//! mirror-errors - 统一错误处理
//!
//! 基于 RFC 7807 Problem Details 规范

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用错误类型
///
/// 所有变体只携带字符串消息，便于在缓存、重试路径中克隆传递
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    /// 存储不可达（连接拒绝、超时、连接中断）
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// 变更流消息无法解码
    #[error("Decode error: {0}")]
    Decode(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// 是否为连接类错误（可以降级或重连）
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// 转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Internal(_) => 500,
            Self::Database(_) => 500,
            Self::Unavailable(_) => 503,
            Self::Config(_) => 500,
            Self::Decode(_) => 500,
        }
    }

    /// 面向调用方的消息
    ///
    /// 客户端错误原样返回；服务端错误只返回通用描述，
    /// 不暴露连接串、凭据等内部细节
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound(msg) | Self::Validation(msg) => msg.clone(),
            Self::Unavailable(_) => "Service temporarily unavailable, please retry later".to_string(),
            Self::Internal(_) | Self::Database(_) | Self::Config(_) | Self::Decode(_) => {
                "Request failed, please contact the administrator".to_string()
            }
        }
    }

    /// 转换为 Problem Details
    pub fn to_problem_details(&self) -> ProblemDetails {
        ProblemDetails {
            r#type: self.problem_type(),
            title: self.problem_title(),
            status: self.status_code(),
            detail: self.public_message(),
            instance: None,
        }
    }

    fn problem_type(&self) -> String {
        let slug = match self {
            Self::NotFound(_) => "not-found",
            Self::Validation(_) => "validation",
            Self::Internal(_) => "internal",
            Self::Database(_) => "database",
            Self::Unavailable(_) => "unavailable",
            Self::Config(_) => "config",
            Self::Decode(_) => "decode",
        };
        format!("about:blank#{}", slug)
    }

    fn problem_title(&self) -> String {
        match self {
            Self::NotFound(_) => "Resource Not Found".to_string(),
            Self::Validation(_) => "Validation Error".to_string(),
            Self::Internal(_) => "Internal Server Error".to_string(),
            Self::Database(_) => "Database Error".to_string(),
            Self::Unavailable(_) => "Service Unavailable".to_string(),
            Self::Config(_) => "Configuration Error".to_string(),
            Self::Decode(_) => "Decode Error".to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// RFC 7807 Problem Details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::not_found("x").status_code(), 404);
        assert_eq!(AppError::validation("x").status_code(), 400);
        assert_eq!(AppError::unavailable("x").status_code(), 503);
        assert_eq!(AppError::database("x").status_code(), 500);
    }

    #[test]
    fn test_public_message_hides_internal_details() {
        let err = AppError::database("connect postgres://admin:hunter2@db:5432/app failed");
        let details = err.to_problem_details();
        assert!(!details.detail.contains("hunter2"));
        assert!(!details.detail.contains("postgres://"));
        assert_eq!(details.status, 500);

        let err = AppError::unavailable("redis://:secret@cache:6379 refused");
        assert!(!err.public_message().contains("secret"));
    }

    #[test]
    fn test_client_errors_keep_message() {
        let err = AppError::validation("unsupported field: password");
        assert_eq!(err.public_message(), "unsupported field: password");
        assert_eq!(err.to_problem_details().title, "Validation Error");
    }

    #[test]
    fn test_is_unavailable() {
        assert!(AppError::unavailable("down").is_unavailable());
        assert!(!AppError::internal("boom").is_unavailable());
    }
}
