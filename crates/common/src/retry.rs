//! 指数退避
//!
//! 建立连接时有限次重试；变更流重连不限次数，只用退避间隔

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// 退避配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 最大尝试次数，`None` 表示不限
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// 不限次数，仅用于计算重连间隔
    pub fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// 第 `attempt` 次失败（从 0 开始）之后是否还能再试
    pub fn can_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt + 1 < max)
    }

    /// 第 `attempt` 次失败后的等待时间，封顶 `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        // inf 经 as 转换饱和为 u64::MAX
        Duration::from_millis((delay_ms as u64).min(self.max_delay.as_millis() as u64))
    }
}

/// 连接类错误的文本特征（sqlx / redis / io）
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "connection terminated",
    "could not connect",
    "server closed the connection",
    "timed out",
    "timeout",
    "too many connections",
    "the database system is starting up",
    "no route to host",
    "broken pipe",
    "unexpected eof",
];

/// 按错误文本判断是否为暂时性故障
pub fn is_retryable_error(error: &str) -> bool {
    let error = error.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|pattern| error.contains(pattern))
}

/// 执行 `operation`，失败且 `should_retry` 为真时按退避间隔重试
pub async fn with_conditional_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempts = attempt + 1, "Operation recovered");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !should_retry(&error) || !config.can_retry(attempt) {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                error = %error,
                "Operation failed"
            );
            return Err(error);
        }

        let delay = config.delay_for_attempt(attempt);
        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
