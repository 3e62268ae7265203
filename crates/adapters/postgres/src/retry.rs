//! sqlx 错误分类
//!
//! 连接类错误映射为 `Unavailable`，其余映射为 `Database`

use mirror_common::is_retryable_error;
use mirror_errors::AppError;

/// 连接断开、连不上或服务端正在停机
///
/// 序列化失败、死锁等事务级错误不算，连接本身仍可用
pub fn is_connectivity_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::PoolClosed => false,
        // 08xxx connection_exception，57P0x 停机/启动中
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => code.starts_with("08") || code.starts_with("57P0"),
            None => is_retryable_error(db_err.message()),
        },
        _ => is_retryable_error(&error.to_string()),
    }
}

/// 转换为 AppError，`context` 描述失败的操作
pub fn map_sqlx_error(context: &str, error: sqlx::Error) -> AppError {
    if is_connectivity_error(&error) {
        AppError::unavailable(format!("{}: {}", context, error))
    } else {
        AppError::database(format!("{}: {}", context, error))
    }
}
