//! Metrics 模块
//!
//! Prometheus 记录器与连接池 / 读取器状态的定期采集

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use metrics_exporter_prometheus::PrometheusHandle;
use mirror_errors::{AppError, AppResult};
use mirror_sync::ReaderState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::infrastructure::{Infrastructure, PoolStatus};

/// Metrics 记录器
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// 安装全局 Prometheus 记录器，每个进程只能安装一次
    pub fn install() -> AppResult<Self> {
        let handle = mirror_telemetry::init_metrics()
            .map_err(|e| AppError::internal(format!("Failed to install Prometheus recorder: {}", e)))?;
        Ok(Self { handle })
    }

    /// 获取 Prometheus 格式的 metrics
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// 记录 PostgreSQL 连接池指标
pub fn record_postgres_pool_metrics(status: &PoolStatus) {
    gauge!("postgres_pool_size").set(status.size as f64);
    gauge!("postgres_pool_idle").set(status.idle as f64);
    gauge!("postgres_pool_active").set(status.active as f64);

    let utilization = if status.size > 0 {
        (status.active as f64 / status.size as f64) * 100.0
    } else {
        0.0
    };
    gauge!("postgres_pool_utilization").set(utilization);
}

/// 记录 Redis 连接状态
pub fn record_redis_connection_status(connected: bool) {
    gauge!("redis_connection_status").set(if connected { 1.0 } else { 0.0 });
}

/// 读取器状态：0 连接中，1 同步中，2 重连中，3 已停止
pub fn reader_state_value(state: &ReaderState) -> f64 {
    match state {
        ReaderState::Connecting => 0.0,
        ReaderState::Streaming => 1.0,
        ReaderState::Reconnecting { .. } => 2.0,
        ReaderState::Stopped => 3.0,
    }
}

pub fn record_reader_state(state: &ReaderState) {
    gauge!("mirror_reader_state").set(reader_state_value(state));
    let attempt = match state {
        ReaderState::Reconnecting { attempt } => *attempt,
        _ => 0,
    };
    gauge!("mirror_reader_reconnect_attempt").set(attempt as f64);
}

/// 连接池 Metrics 采集器
///
/// 定期采集 PostgreSQL 连接池、Redis 连接与读取器状态
pub struct PoolMetricsCollector {
    infra: Arc<Infrastructure>,
    reader_state: Option<watch::Receiver<ReaderState>>,
    interval: Duration,
}

impl PoolMetricsCollector {
    pub fn new(
        infra: Arc<Infrastructure>,
        reader_state: Option<watch::Receiver<ReaderState>>,
        interval: Duration,
    ) -> Self {
        Self {
            infra,
            reader_state,
            interval,
        }
    }

    /// 启动后台采集任务
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.collect().await,
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    async fn collect(&self) {
        let pool_status = self.infra.postgres_pool_status();
        record_postgres_pool_metrics(&pool_status);

        let redis_connected = self.infra.check_redis_connection().await;
        if let Some(connected) = redis_connected {
            record_redis_connection_status(connected);
        }

        if let Some(state) = &self.reader_state {
            record_reader_state(&state.borrow());
        }

        debug!(
            postgres_size = pool_status.size,
            postgres_idle = pool_status.idle,
            postgres_active = pool_status.active,
            redis_connected = ?redis_connected,
            "Pool metrics collected"
        );
    }
}
