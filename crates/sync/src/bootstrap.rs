//! 启动同步
//!
//! 先连接变更源（复制槽从此刻开始保留之后提交的全部变更），
//! 再逐表全量加载并整表替换镜像内容。任一表失败则启动失败。
//! 快照与复制槽之间重叠的变更会在读取器启动后重放，写入幂等，最终收敛。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use mirror_errors::AppResult;
use mirror_ports::{ChangeSource, MirrorStore, SnapshotSource};
use mirror_query::{record_key, TablePolicy, TableSchema};
use tracing::{info, warn};

pub struct SyncBootstrap {
    source: Arc<dyn ChangeSource>,
    snapshot: Arc<dyn SnapshotSource>,
    store: Arc<dyn MirrorStore>,
    policy: Arc<TablePolicy>,
}

impl SyncBootstrap {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        snapshot: Arc<dyn SnapshotSource>,
        store: Arc<dyn MirrorStore>,
        policy: Arc<TablePolicy>,
    ) -> Self {
        Self {
            source,
            snapshot,
            store,
            policy,
        }
    }

    /// 执行全量同步，返回每张镜像表写入的行数
    pub async fn run(&self) -> AppResult<BTreeMap<String, usize>> {
        let started = Instant::now();
        self.source.connect().await?;

        let mut counts = BTreeMap::new();
        for schema in self.policy.mirrored_tables() {
            let rows = self.sync_table(schema).await?;
            counts.insert(schema.name().to_string(), rows);
        }

        info!(
            tables = counts.len(),
            rows = counts.values().sum::<usize>(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Initial mirror sync completed"
        );
        Ok(counts)
    }

    async fn sync_table(&self, schema: &TableSchema) -> AppResult<usize> {
        let records = self.snapshot.load_table(schema).await?;
        let loaded = records.len();

        let rows: Vec<_> = records
            .into_iter()
            .filter_map(|record| record_key(&record, schema.primary_key()).map(|key| (key, record)))
            .collect();

        if rows.len() < loaded {
            warn!(
                table = schema.name(),
                skipped = loaded - rows.len(),
                primary_key = ?schema.primary_key(),
                "Snapshot rows without primary key were not mirrored"
            );
        }

        let count = rows.len();
        self.store.replace_all(schema.name(), rows).await?;
        info!(table = schema.name(), rows = count, "Mirror table loaded");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryMirrorStore;
    use async_trait::async_trait;
    use mirror_errors::AppError;
    use mirror_ports::ChangeBatch;
    use mirror_query::Record;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Source {
        connected: Mutex<bool>,
    }

    #[async_trait]
    impl ChangeSource for Source {
        async fn connect(&self) -> AppResult<()> {
            *self.connected.lock() = true;
            Ok(())
        }
        async fn poll(&self) -> AppResult<ChangeBatch> {
            Ok(ChangeBatch::default())
        }
        async fn ack(&self, _: &str) -> AppResult<()> {
            Ok(())
        }
        async fn release(&self) -> AppResult<()> {
            Ok(())
        }
    }

    struct Tables {
        rows: HashMap<String, Vec<Record>>,
        source: Arc<Source>,
    }

    #[async_trait]
    impl SnapshotSource for Tables {
        async fn load_table(&self, schema: &TableSchema) -> AppResult<Vec<Record>> {
            assert!(*self.source.connected.lock(), "slot must exist before snapshot");
            self.rows
                .get(schema.name())
                .cloned()
                .ok_or_else(|| AppError::database(format!("relation {} does not exist", schema.name())))
        }
    }

    fn record(value: serde_json::Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn policy(tables: &[&str]) -> Arc<TablePolicy> {
        Arc::new(TablePolicy::new("", tables.iter().map(|t| TableSchema::new(*t)), Vec::new()).unwrap())
    }

    #[tokio::test]
    async fn test_replaces_each_mirrored_table() {
        let source = Arc::new(Source::default());
        let tables = Tables {
            rows: HashMap::from([
                ("sys_user".to_string(), vec![record(json!({"id": 1})), record(json!({"id": 2}))]),
                ("sys_menu".to_string(), vec![record(json!({"id": 1})), record(json!({"name": "orphan"}))]),
            ]),
            source: source.clone(),
        };
        let store = Arc::new(MemoryMirrorStore::new());
        store.upsert("sys_user", "99", &record(json!({"id": 99}))).await.unwrap();

        let counts = SyncBootstrap::new(source, Arc::new(tables), store.clone(), policy(&["sys_user", "sys_menu"]))
            .run()
            .await
            .unwrap();

        assert_eq!(counts.get("sys_user"), Some(&2));
        assert_eq!(counts.get("sys_menu"), Some(&1));
        assert!(store.snapshot("sys_user").iter().all(|(k, _)| k != "99"));
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_fatal() {
        let source = Arc::new(Source::default());
        let tables = Tables {
            rows: HashMap::new(),
            source: source.clone(),
        };
        let store = Arc::new(MemoryMirrorStore::new());
        let result = SyncBootstrap::new(source, Arc::new(tables), store, policy(&["sys_user"]))
            .run()
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));
    }
}
