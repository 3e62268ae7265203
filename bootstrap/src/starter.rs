//! 服务启动器
//!
//! 启动顺序：
//! 1. 加载配置并初始化日志、指标
//! 2. 建立 PostgreSQL 连接（超时即失败），启用时探测 Redis
//! 3. 启用 Redis 且存在镜像表时：连接复制槽、全量同步、启动变更流读取器
//! 4. 构造查询路由、派生结果缓存、菜单树与字典查询
//! 5. 等待关闭信号，停止读取器并释放连接

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mirror_config::AppConfig;
use mirror_errors::{AppError, AppResult};
use mirror_ports::QueryExecutor;
use mirror_sync::{
    CacheExecutor, ChangeStreamReader, DerivedCaches, DictionaryLookup, FlagsHandle, MenuTreeLookup,
    QueryRouter, ReaderConfig, ReaderState, ReaderStats, RoutingFlags, SyncBootstrap,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::infrastructure::Infrastructure;
use crate::metrics::{MetricsRecorder, PoolMetricsCollector};
use crate::runtime::{RuntimeConfig, init_runtime, shutdown_signal};
use crate::shutdown::{ShutdownController, run_with_shutdown};

const METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// 运行中的同步服务
///
/// 对外提供查询路由、派生结果缓存、菜单树与字典查询；`stop` 停止后台任务
pub struct MirrorService {
    router: Arc<QueryRouter>,
    caches: Arc<DerivedCaches>,
    dictionary: Arc<DictionaryLookup>,
    menus: Arc<MenuTreeLookup>,
    reader: Option<JoinHandle<ReaderStats>>,
    reader_state: Option<watch::Receiver<ReaderState>>,
    collector: JoinHandle<()>,
    initial_sync: BTreeMap<String, usize>,
    shutdown: ShutdownController,
}

impl MirrorService {
    /// 建立连接并启动后台同步
    ///
    /// 启动期间收到关闭信号时返回 `Ok(None)`
    pub async fn start(
        config: AppConfig,
        shutdown: ShutdownController,
    ) -> AppResult<Option<Self>> {
        let infra = Arc::new(Infrastructure::from_config(config).await?);
        let config = infra.config();
        let policy = infra.policy();

        let relational: Arc<dyn QueryExecutor> = Arc::new(infra.relational_executor());
        let mut cache: Option<Arc<dyn QueryExecutor>> = None;
        let mut reader = None;
        let mut reader_state = None;
        let mut initial_sync = BTreeMap::new();

        match infra.mirror_store() {
            Some(store) if !policy.mirrored_tables().is_empty() => {
                let source = Arc::new(infra.change_source());
                let bootstrap = SyncBootstrap::new(
                    source.clone(),
                    Arc::new(infra.snapshot_source()),
                    store.clone(),
                    policy.clone(),
                );
                let Some(counts) = run_with_shutdown(&shutdown, || bootstrap.run()).await else {
                    return Ok(None);
                };
                initial_sync = counts?;

                let stream_reader = ChangeStreamReader::new(
                    source,
                    store.clone(),
                    policy.clone(),
                    ReaderConfig::from(&config.sync),
                );
                reader_state = Some(stream_reader.subscribe());
                reader = Some(stream_reader.spawn(shutdown.token()));
                cache = Some(Arc::new(CacheExecutor::new(store, policy.clone())));
            }
            Some(_) => {
                info!("No mirrored tables configured, change stream reader not started");
            }
            None => {}
        }

        let flags = FlagsHandle::new(RoutingFlags::from(&config.system));
        let router = Arc::new(QueryRouter::new(relational, cache, policy, flags));
        let caches = Arc::new(DerivedCaches::new(&config.memo));
        let dictionary = Arc::new(DictionaryLookup::new(router.clone(), caches.clone()));
        let menus = Arc::new(MenuTreeLookup::new(router.clone(), caches.clone()));

        let collector =
            PoolMetricsCollector::new(infra.clone(), reader_state.clone(), METRICS_INTERVAL)
                .start(shutdown.token());

        info!(
            app_name = %config.app_name,
            mirrored_tables = initial_sync.len(),
            use_redis = config.system.use_redis,
            use_redis_service = config.system.use_redis_service,
            "Mirror service started"
        );

        Ok(Some(Self {
            router,
            caches,
            dictionary,
            menus,
            reader,
            reader_state,
            collector,
            initial_sync,
            shutdown,
        }))
    }

    pub fn router(&self) -> Arc<QueryRouter> {
        self.router.clone()
    }

    pub fn caches(&self) -> Arc<DerivedCaches> {
        self.caches.clone()
    }

    pub fn dictionary(&self) -> Arc<DictionaryLookup> {
        self.dictionary.clone()
    }

    pub fn menus(&self) -> Arc<MenuTreeLookup> {
        self.menus.clone()
    }

    /// 启动同步写入的每表行数
    pub fn initial_sync(&self) -> &BTreeMap<String, usize> {
        &self.initial_sync
    }

    pub fn reader_state(&self) -> Option<watch::Receiver<ReaderState>> {
        self.reader_state.clone()
    }

    /// 停止读取器与采集任务，返回读取器统计
    pub async fn stop(self) -> Option<ReaderStats> {
        self.shutdown.shutdown();

        if let Err(e) = self.collector.await {
            warn!(error = %e, "Metrics collector task failed");
        }

        let handle = self.reader?;
        match handle.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!(error = %e, "Change stream reader task failed");
                None
            }
        }
    }
}

/// 同步服务入口
///
/// 加载配置、启动服务并阻塞到收到 Ctrl+C / SIGTERM
pub async fn run(runtime: RuntimeConfig) -> AppResult<()> {
    let config = AppConfig::load(&runtime.config_dir)
        .map_err(|e| AppError::config(e.to_string()))?;
    let recorder: Option<MetricsRecorder> = init_runtime(&config)?;

    info!("Starting {} service", config.app_name);

    let shutdown = ShutdownController::new();
    let signal = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.shutdown();
        })
    };

    let Some(service) = MirrorService::start(config, shutdown.clone()).await? else {
        info!("Shutdown requested during startup");
        return Ok(());
    };

    shutdown.wait().await;
    signal.abort();

    if let Some(stats) = service.stop().await {
        info!(
            applied = stats.applied,
            skipped = stats.skipped,
            discarded = stats.discarded,
            batches = stats.batches,
            "Change stream reader finished"
        );
    }
    if let Some(recorder) = recorder {
        tracing::debug!(metrics = %recorder.render(), "Final metrics snapshot");
    }

    info!("Service stopped");
    Ok(())
}
