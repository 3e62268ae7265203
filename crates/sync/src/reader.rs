//! 变更流读取器
//!
//! 单个后台任务按提交顺序把镜像表的行变更应用到镜像存储：
//! 拉取一批，逐条应用，整批成功后确认检查点。
//! 应用或拉取失败时进入重连状态，按指数退避重新连接，
//! 未确认的部分会被重放，存储写入都是幂等的。

use std::sync::Arc;
use std::time::Duration;

use mirror_common::RetryConfig;
use mirror_config::SyncConfig;
use mirror_errors::AppResult;
use mirror_ports::{ChangeBatch, ChangeEvent, ChangeOperation, ChangeSource, MirrorStore};
use mirror_query::{record_key, TablePolicy, TableSchema};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 读取器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Connecting,
    Streaming,
    /// 第 `attempt` 次重连（从 1 开始）
    Reconnecting { attempt: u32 },
    Stopped,
}

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// 已写入镜像存储的变更
    pub applied: u64,
    /// 解码失败或缺少主键而跳过的变更
    pub skipped: u64,
    /// 非镜像表的变更
    pub discarded: u64,
    /// 已确认的批次
    pub batches: u64,
}

/// 读取器配置
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// 没有新变更时的等待间隔
    pub poll_interval: Duration,
    /// 重连退避，读取器会一直重连直到被取消
    pub backoff: RetryConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            backoff: RetryConfig::unbounded(Duration::from_millis(500), Duration::from_secs(30)),
        }
    }
}

impl From<&SyncConfig> for ReaderConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            backoff: RetryConfig::unbounded(config.reconnect_initial(), config.reconnect_max()),
        }
    }
}

enum Outcome {
    Applied,
    Skipped,
    Discarded,
}

/// 一批处理结束后的去向
enum Step {
    Continue,
    Idle,
    Reconnect,
}

pub struct ChangeStreamReader {
    source: Arc<dyn ChangeSource>,
    store: Arc<dyn MirrorStore>,
    policy: Arc<TablePolicy>,
    config: ReaderConfig,
    state: watch::Sender<ReaderState>,
    stats: ReaderStats,
}

impl ChangeStreamReader {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn MirrorStore>,
        policy: Arc<TablePolicy>,
        config: ReaderConfig,
    ) -> Self {
        let (state, _) = watch::channel(ReaderState::Connecting);
        Self {
            source,
            store,
            policy,
            config,
            state,
            stats: ReaderStats::default(),
        }
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<ReaderState> {
        self.state.subscribe()
    }

    /// 在后台任务中运行
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<ReaderStats> {
        tokio::spawn(self.run(shutdown))
    }

    /// 运行直到被取消
    ///
    /// 取消只打断拉取和等待；正在应用的批次会完成并确认
    pub async fn run(mut self, shutdown: CancellationToken) -> ReaderStats {
        info!("Change stream reader started");
        let mut attempt: u32 = 0;

        'session: while !shutdown.is_cancelled() {
            if attempt == 0 {
                self.set_state(ReaderState::Connecting);
            }

            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'session,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(()) => {
                    if attempt > 0 {
                        info!(attempt, "Change source reconnected");
                    }
                    attempt = 0;
                    self.set_state(ReaderState::Streaming);

                    loop {
                        let polled = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break 'session,
                            result = self.source.poll() => result,
                        };

                        let step = match polled {
                            Ok(batch) => self.process(batch).await,
                            Err(e) => {
                                warn!(error = %e, "Failed to poll change source");
                                Step::Reconnect
                            }
                        };

                        match step {
                            Step::Continue => {}
                            Step::Idle => {
                                tokio::select! {
                                    biased;
                                    _ = shutdown.cancelled() => break 'session,
                                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                                }
                            }
                            Step::Reconnect => break,
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Failed to connect change source");
                }
            }

            let delay = self.config.backoff.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            self.set_state(ReaderState::Reconnecting { attempt });
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before reconnect");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'session,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if let Err(e) = self.source.release().await {
            warn!(error = %e, "Failed to release change source");
        }
        self.set_state(ReaderState::Stopped);
        info!(
            applied = self.stats.applied,
            skipped = self.stats.skipped,
            discarded = self.stats.discarded,
            batches = self.stats.batches,
            "Change stream reader stopped"
        );
        self.stats
    }

    fn set_state(&self, state: ReaderState) {
        self.state.send_replace(state);
    }

    async fn process(&mut self, batch: ChangeBatch) -> Step {
        if batch.is_empty() {
            return Step::Idle;
        }
        let idle = batch.entries.is_empty();
        match self.apply_batch(batch).await {
            Ok(()) if idle => Step::Idle,
            Ok(()) => Step::Continue,
            Err(e) => {
                error!(error = %e, "Failed to apply change batch");
                Step::Reconnect
            }
        }
    }

    /// 应用一批变更并确认
    async fn apply_batch(&mut self, batch: ChangeBatch) -> AppResult<()> {
        let total = batch.entries.len();
        for entry in batch.entries {
            let outcome = match entry {
                Ok(event) => self.apply(&event).await?,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable change");
                    Outcome::Skipped
                }
            };
            match outcome {
                Outcome::Applied => {
                    self.stats.applied += 1;
                    metrics::counter!("mirror_changes_applied_total").increment(1);
                }
                Outcome::Skipped => {
                    self.stats.skipped += 1;
                    metrics::counter!("mirror_changes_skipped_total").increment(1);
                }
                Outcome::Discarded => {
                    self.stats.discarded += 1;
                    metrics::counter!("mirror_changes_discarded_total").increment(1);
                }
            }
        }

        if let Some(checkpoint) = &batch.checkpoint {
            self.source.ack(checkpoint).await?;
            self.stats.batches += 1;
            if total > 0 {
                debug!(changes = total, checkpoint = %checkpoint, "Change batch applied");
            }
        }
        Ok(())
    }

    async fn apply(&self, event: &ChangeEvent) -> AppResult<Outcome> {
        let Some(schema) = self.policy.mirrored_by_physical(&event.table) else {
            debug!(table = %event.table, operation = %event.operation, "Discarding change for unmirrored table");
            return Ok(Outcome::Discarded);
        };
        let table = schema.name();

        match event.operation {
            ChangeOperation::Insert | ChangeOperation::Update => {
                let Some(row) = &event.row else {
                    return Ok(skip(event, "row image missing"));
                };
                let Some(key) = record_key(row, schema.primary_key()) else {
                    return Ok(skip(event, "primary key missing"));
                };
                let old_key = previous_key(event, schema).filter(|old| *old != key);
                if event.operation == ChangeOperation::Insert {
                    self.store.upsert(table, &key, row).await?;
                } else {
                    // 未修改的 TOAST 列不在更新镜像中，沿用已有记录的值
                    let current = old_key.as_deref().unwrap_or(&key);
                    let mut merged = self.store.get(table, current).await?.unwrap_or_default();
                    merged.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                    self.store.upsert(table, &key, &merged).await?;
                }
                if let Some(old) = &old_key {
                    self.store.remove(table, old).await?;
                }
                Ok(Outcome::Applied)
            }
            ChangeOperation::Delete => {
                let Some(key) = record_key(event.key_source(), schema.primary_key()) else {
                    return Ok(skip(event, "primary key missing"));
                };
                self.store.remove(table, &key).await?;
                Ok(Outcome::Applied)
            }
            ChangeOperation::Truncate => {
                self.store.clear(table).await?;
                info!(table, position = %event.position, "Mirror table cleared by truncate");
                Ok(Outcome::Applied)
            }
        }
    }
}

/// 更新前的主键，主键被修改时用于删除旧记录
fn previous_key(event: &ChangeEvent, schema: &TableSchema) -> Option<String> {
    if event.key.is_empty() {
        None
    } else {
        record_key(&event.key, schema.primary_key())
    }
}

fn skip(event: &ChangeEvent, reason: &str) -> Outcome {
    warn!(
        table = %event.table,
        operation = %event.operation,
        position = %event.position,
        reason,
        "Skipping change"
    );
    Outcome::Skipped
}
