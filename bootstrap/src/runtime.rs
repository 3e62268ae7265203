//! 服务运行时

use mirror_config::AppConfig;
use mirror_errors::AppResult;
use mirror_telemetry::{init_tracing, init_tracing_json};
use tracing::{info, warn};

use crate::metrics::MetricsRecorder;

/// 服务运行时配置
pub struct RuntimeConfig {
    pub config_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_dir: std::env::var("APP_CONFIG_DIR").unwrap_or_else(|_| "config".to_string()),
        }
    }
}

/// 初始化日志与指标
///
/// 生产环境输出 JSON 日志；`telemetry.metrics=true` 时安装 Prometheus 记录器
pub fn init_runtime(config: &AppConfig) -> AppResult<Option<MetricsRecorder>> {
    if config.is_production() {
        init_tracing_json(&config.telemetry.log_level);
    } else {
        init_tracing(&config.telemetry.log_level);
    }

    let recorder = if config.telemetry.metrics {
        Some(MetricsRecorder::install()?)
    } else {
        None
    };

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        metrics = recorder.is_some(),
        "Runtime initialized"
    );
    Ok(recorder)
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
