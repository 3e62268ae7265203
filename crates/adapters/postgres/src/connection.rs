//! PostgreSQL 连接管理

use mirror_common::{RetryConfig, with_conditional_retry};
use mirror_config::DatabaseConfig;
use mirror_errors::{AppError, AppResult};
use secrecy::ExposeSecret;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use crate::retry::map_sqlx_error;

fn is_utf8(charset: &str) -> bool {
    matches!(charset.to_ascii_uppercase().as_str(), "UTF8" | "UTF-8")
}

/// 由配置生成连接参数
///
/// sqlx 只支持 UTF8 客户端编码，其他字符集视为配置错误
pub fn connect_options(config: &DatabaseConfig) -> AppResult<PgConnectOptions> {
    if !is_utf8(&config.charset) {
        return Err(AppError::config(format!(
            "unsupported client charset {}, only UTF8 is supported",
            config.charset
        )));
    }

    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .password(config.password.expose_secret())
        .database(&config.database)
        .options([
            ("client_encoding", "UTF8"),
            ("search_path", config.schema.as_str()),
        ]);

    Ok(if config.log_statements {
        options
    } else {
        options.disable_statement_logging()
    })
}

/// 创建 PostgreSQL 连接池
pub async fn create_pool(config: &DatabaseConfig) -> AppResult<PgPool> {
    let options = connect_options(config)?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.connect_timeout())
        .connect_with(options)
        .await
        .map_err(|e| map_sqlx_error("Failed to create pool", e))
}

/// 在 `connect_timeout` 时限内建立连接池
///
/// 时限内按 `retry` 重试连接类错误；超时后放弃并取消进行中的连接
pub async fn connect_with_deadline(config: &DatabaseConfig, retry: &RetryConfig) -> AppResult<PgPool> {
    let deadline = config.connect_timeout();
    info!(dsn = %config.redacted_dsn(), timeout_secs = deadline.as_secs(), "Connecting to PostgreSQL");

    let attempt = with_conditional_retry(
        retry,
        "postgres_connect",
        || create_pool(config),
        AppError::is_unavailable,
    );

    match tokio::time::timeout(deadline, attempt).await {
        Ok(result) => {
            let pool = result?;
            info!(dsn = %config.redacted_dsn(), "PostgreSQL connected");
            Ok(pool)
        }
        Err(_) => Err(AppError::unavailable(format!(
            "PostgreSQL {}:{} not reachable within {}s",
            config.host,
            config.port,
            deadline.as_secs()
        ))),
    }
}

/// 检查数据库连接
pub async fn check_connection(pool: &PgPool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("Database health check failed", e))?;
    Ok(())
}

/// 当前数据库的默认排序规则（`jsonb` 字符串比较使用它）
pub async fn database_collation(pool: &PgPool) -> AppResult<String> {
    sqlx::query_scalar("SELECT datcollate::text FROM pg_database WHERE datname = current_database()")
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error("Failed to read database collation", e))
}

/// 按字节序比较字符串的排序规则：`C`、`POSIX`、`C.UTF-8` 等
pub fn is_byte_order_collation(collation: &str) -> bool {
    let name = collation.split('.').next().unwrap_or_default();
    name.eq_ignore_ascii_case("C") || name.eq_ignore_ascii_case("POSIX")
}
