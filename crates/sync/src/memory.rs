//! 进程内镜像存储
//!
//! 单进程部署和测试使用；`set_available(false)` 模拟存储不可达

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mirror_errors::{AppError, AppResult};
use mirror_ports::MirrorStore;
use mirror_query::Record;
use parking_lot::RwLock;

type Table = BTreeMap<String, Record>;

pub struct MemoryMirrorStore {
    tables: RwLock<HashMap<String, Table>>,
    available: AtomicBool,
}

impl Default for MemoryMirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMirrorStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::unavailable("memory mirror store is offline"))
        }
    }

    /// 一张表的记录数
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// 一张表的全部内容，按键排序
    pub fn snapshot(&self, table: &str) -> Vec<(String, Record)> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn upsert(&self, table: &str, key: &str, row: &Record) -> AppResult<()> {
        self.check()?;
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), row.clone());
        Ok(())
    }

    async fn remove(&self, table: &str, key: &str) -> AppResult<()> {
        self.check()?;
        if let Some(t) = self.tables.write().get_mut(table) {
            t.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, table: &str) -> AppResult<()> {
        self.check()?;
        self.tables.write().remove(table);
        Ok(())
    }

    async fn replace_all(&self, table: &str, rows: Vec<(String, Record)>) -> AppResult<()> {
        self.check()?;
        let replacement: Table = rows.into_iter().collect();
        self.tables.write().insert(table.to_string(), replacement);
        Ok(())
    }

    async fn load(&self, table: &str) -> AppResult<Vec<Record>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, table: &str, key: &str) -> AppResult<Option<Record>> {
        self.check()?;
        Ok(self.tables.read().get(table).and_then(|t| t.get(key).cloned()))
    }

    async fn ping(&self) -> AppResult<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: i64) -> Record {
        serde_json::from_value(json!({"id": id})).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_remove_are_idempotent() {
        let store = MemoryMirrorStore::new();
        store.upsert("t", "1", &row(1)).await.unwrap();
        store.upsert("t", "1", &row(1)).await.unwrap();
        assert_eq!(store.len("t"), 1);

        store.remove("t", "1").await.unwrap();
        store.remove("t", "1").await.unwrap();
        assert!(store.is_empty("t"));
    }

    #[tokio::test]
    async fn test_replace_all() {
        let store = MemoryMirrorStore::new();
        store.upsert("t", "9", &row(9)).await.unwrap();
        store
            .replace_all("t", vec![("1".to_string(), row(1)), ("2".to_string(), row(2))])
            .await
            .unwrap();
        let keys: Vec<_> = store.snapshot("t").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_offline_store_is_unavailable() {
        let store = MemoryMirrorStore::new();
        store.set_available(false);
        assert!(store.load("t").await.unwrap_err().is_unavailable());
        assert!(store.ping().await.is_err());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
