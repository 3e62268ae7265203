//! Redis 连接管理

use mirror_config::RedisConfig;
use mirror_errors::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use secrecy::ExposeSecret;
use tracing::info;

/// 连接类错误映射为 `Unavailable`
pub fn map_redis_error(context: &str, error: RedisError) -> AppError {
    if error.is_io_error()
        || error.is_connection_refusal()
        || error.is_timeout()
        || error.is_connection_dropped()
    {
        AppError::unavailable(format!("{}: {}", context, error))
    } else {
        AppError::internal(format!("{}: {}", context, error))
    }
}

/// 创建 Redis 连接管理器，超过 `connect_timeout_secs` 视为不可达
pub async fn create_connection_manager(config: &RedisConfig) -> AppResult<ConnectionManager> {
    let client = Client::open(config.url.expose_secret().as_str())
        .map_err(|e| AppError::config(format!("Invalid Redis url: {}", e)))?;

    let timeout = config.connect_timeout();
    match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
        Ok(result) => result.map_err(|e| map_redis_error("Failed to create Redis connection manager", e)),
        Err(_) => Err(AppError::unavailable(format!(
            "Redis not reachable within {}s",
            timeout.as_secs()
        ))),
    }
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> AppResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| map_redis_error("Redis health check failed", e))?;
    Ok(())
}

/// 启动时建立连接并 PING
pub async fn connect_manager(config: &RedisConfig) -> AppResult<ConnectionManager> {
    let mut conn = create_connection_manager(config).await?;
    check_connection(&mut conn).await?;
    info!(key_prefix = %config.key_prefix, "Redis reachable");
    Ok(conn)
}
