//! 测试用的内存数据库
//!
//! 同时充当关系库执行器、快照来源和变更源：每次写入修改表数据，
//! 并按提交顺序追加一条变更，位置为递增序号。复制槽在首次连接时创建。

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirror_common::{Paged, RetryConfig};
use mirror_errors::{AppError, AppResult};
use mirror_ports::{ChangeBatch, ChangeEvent, ChangeSource, QueryExecutor, SnapshotSource};
use mirror_query::{eval, Query, Record, TablePolicy, TableSchema};
use mirror_sync::ReaderConfig;
use parking_lot::Mutex;
use serde_json::Value;

pub fn record(value: Value) -> Record {
    serde_json::from_value(value).expect("object literal")
}

pub fn policy() -> Arc<TablePolicy> {
    Arc::new(
        TablePolicy::new(
            "tb",
            vec![
                TableSchema::new("sys_user"),
                TableSchema::new("relation_user_role").with_primary_key(["user_id", "role_id"]),
            ],
            vec![TableSchema::new("sys_operation_log")],
        )
        .expect("valid policy"),
    )
}

pub fn reader_config() -> ReaderConfig {
    ReaderConfig {
        poll_interval: Duration::from_millis(5),
        backoff: RetryConfig::unbounded(Duration::from_millis(5), Duration::from_millis(20)),
    }
}

#[derive(Default)]
struct State {
    tables: HashMap<String, BTreeMap<String, Record>>,
    log: Vec<(u64, ChangeEvent)>,
    acked: u64,
    slot_created: bool,
}

pub struct FakeDatabase {
    policy: Arc<TablePolicy>,
    state: Mutex<State>,
    batch_size: usize,
    /// 接下来失败的 ack 次数
    failing_acks: AtomicU32,
}

impl FakeDatabase {
    pub fn new(policy: Arc<TablePolicy>, batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            policy,
            state: Mutex::new(State::default()),
            batch_size,
            failing_acks: AtomicU32::new(0),
        })
    }

    pub fn fail_next_acks(&self, count: u32) {
        self.failing_acks.store(count, Ordering::SeqCst);
    }

    fn row_key(&self, table: &str, row: &Record) -> String {
        let schema = self.policy.schema(table);
        mirror_query::record_key(row, schema.primary_key()).expect("row has primary key")
    }

    fn append(state: &mut State, event: ChangeEvent) {
        let lsn = state.log.len() as u64 + 1;
        let event = ChangeEvent {
            position: lsn.to_string(),
            ..event
        };
        state.log.push((lsn, event));
    }

    pub fn insert(&self, table: &str, row: Value) {
        let row = record(row);
        let key = self.row_key(table, &row);
        let mut state = self.state.lock();
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key, row.clone());
        Self::append(
            &mut state,
            ChangeEvent::insert(self.policy.physical_name(table), row, ""),
        );
    }

    /// 更新整行；主键被修改时变更中带上旧主键
    pub fn update(&self, table: &str, old_key: Value, row: Value) {
        let row = record(row);
        let old_key = record(old_key);
        let old = self.row_key(table, &old_key);
        let key = self.row_key(table, &row);
        let mut state = self.state.lock();
        let rows = state.tables.entry(table.to_string()).or_default();
        rows.remove(&old);
        rows.insert(key, row.clone());
        let mut event = ChangeEvent::update(self.policy.physical_name(table), row, "");
        event.key = old_key;
        Self::append(&mut state, event);
    }

    /// 只修改部分列；变更只带主键和被修改的列（未修改的 TOAST 列不出现）
    pub fn update_columns(&self, table: &str, key: Value, changes: Value) {
        let mut image = record(key);
        let id = self.row_key(table, &image);
        image.extend(record(changes));
        let mut state = self.state.lock();
        if let Some(row) = state.tables.get_mut(table).and_then(|rows| rows.get_mut(&id)) {
            row.extend(image.clone());
        }
        Self::append(
            &mut state,
            ChangeEvent::update(self.policy.physical_name(table), image, ""),
        );
    }

    pub fn delete(&self, table: &str, key: Value) {
        let key = record(key);
        let id = self.row_key(table, &key);
        let mut state = self.state.lock();
        if let Some(rows) = state.tables.get_mut(table) {
            rows.remove(&id);
        }
        Self::append(
            &mut state,
            ChangeEvent::delete(self.policy.physical_name(table), key, ""),
        );
    }

    pub fn truncate(&self, table: &str) {
        let mut state = self.state.lock();
        state.tables.remove(table);
        Self::append(
            &mut state,
            ChangeEvent::truncate(self.policy.physical_name(table), ""),
        );
    }

    /// 追加一条无法解码的消息
    pub fn corrupt(&self) {
        let mut state = self.state.lock();
        let lsn = state.log.len() as u64 + 1;
        state.log.push((
            lsn,
            ChangeEvent::truncate("__corrupt__", lsn.to_string()),
        ));
    }

    pub fn rows(&self, table: &str) -> Vec<(String, Record)> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn head(&self) -> u64 {
        self.state.lock().log.len() as u64
    }

    pub fn acked(&self) -> u64 {
        self.state.lock().acked
    }

    /// 等待读取器确认全部已提交变更
    pub async fn wait_caught_up(&self) {
        let head = self.head();
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.acked() < head {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("reader caught up");
    }
}

#[async_trait]
impl ChangeSource for FakeDatabase {
    /// 首次连接创建复制槽，此前的变更不会投递
    async fn connect(&self) -> AppResult<()> {
        let mut state = self.state.lock();
        if !state.slot_created {
            state.slot_created = true;
            state.acked = state.log.len() as u64;
        }
        Ok(())
    }

    async fn poll(&self) -> AppResult<ChangeBatch> {
        let state = self.state.lock();
        let pending: Vec<_> = state
            .log
            .iter()
            .filter(|(lsn, _)| *lsn > state.acked)
            .take(self.batch_size)
            .collect();
        let checkpoint = pending.last().map(|(lsn, _)| lsn.to_string());
        let entries = pending
            .into_iter()
            .map(|(_, event)| {
                if event.table == "__corrupt__" {
                    Err(AppError::decode(format!("unparsable message at {}", event.position)))
                } else {
                    Ok(event.clone())
                }
            })
            .collect();
        Ok(ChangeBatch { entries, checkpoint })
    }

    async fn ack(&self, checkpoint: &str) -> AppResult<()> {
        let failing = self.failing_acks.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_acks.store(failing - 1, Ordering::SeqCst);
            return Err(AppError::unavailable("replication connection lost"));
        }
        let lsn: u64 = checkpoint
            .parse()
            .map_err(|_| AppError::internal("bad checkpoint"))?;
        let mut state = self.state.lock();
        state.acked = state.acked.max(lsn);
        Ok(())
    }

    async fn release(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SnapshotSource for FakeDatabase {
    async fn load_table(&self, schema: &TableSchema) -> AppResult<Vec<Record>> {
        Ok(self.rows(schema.name()).into_iter().map(|(_, row)| row).collect())
    }
}

/// 关系库执行器：直接在表数据上求值
pub struct FakeRelational(pub Arc<FakeDatabase>);

#[async_trait]
impl QueryExecutor for FakeRelational {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, schema: &TableSchema, query: &Query) -> AppResult<Paged<Record>> {
        let rows = self.0.rows(schema.name()).into_iter().map(|(_, row)| row);
        let mut plain = query.clone();
        plain.preloads.clear();
        Ok(eval::evaluate(rows, &plain, schema)?)
    }
}
