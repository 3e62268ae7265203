//! 派生结果缓存
//!
//! 菜单树、字典查询等计算结果的进程内缓存，带 TTL 与容量上限。
//! 写路径通过 `DerivedCaches::invalidate` 显式清空对应命名空间。
//!
//! 内部键带有代数：`flush` 先递增代数再清空，
//! 清空之前开始的计算即使稍后写入，也只会落在旧代数下，之后不可见。

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mirror_config::MemoConfig;
use mirror_errors::{AppError, AppResult};
use mirror_query::Record;
use moka::future::Cache as MokaCache;
use serde_json::Value;
use tracing::{debug, info};

pub struct Memoizer<K, V> {
    name: &'static str,
    cache: MokaCache<(u64, K), V>,
    generation: AtomicU64,
}

impl<K, V> Memoizer<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration, max_capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self {
            name,
            cache,
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let value = self.cache.get(&(self.generation(), key.clone())).await;
        if value.is_some() {
            debug!(memo = self.name, key = ?key, "Memo hit");
        }
        value
    }

    pub async fn set(&self, key: K, value: V) {
        self.cache.insert((self.generation(), key), value).await;
    }

    /// 命中直接返回，否则计算并缓存；同一键的并发计算只执行一次，失败不缓存
    pub async fn get_or_try_compute<F, Fut>(&self, key: K, compute: F) -> AppResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<V>>,
    {
        let name = self.name;
        self.cache
            .try_get_with((self.generation(), key), async move {
                debug!(memo = name, "Memo miss, computing");
                compute().await
            })
            .await
            .map_err(|e: Arc<AppError>| (*e).clone())
    }

    /// 清空全部条目
    pub fn flush(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
        debug!(memo = self.name, "Memo flushed");
    }

    /// 近似条目数（含尚未回收的旧代数条目）
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// 派生结果命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    MenuTree,
    DictByName,
    DictByNameAndKey,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Self::MenuTree, Self::DictByName, Self::DictByNameAndKey];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MenuTree => "menu_tree",
            Self::DictByName => "dict_by_name",
            Self::DictByNameAndKey => "dict_by_name_and_key",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 全部派生结果缓存，构造后以 `Arc` 注入使用方
pub struct DerivedCaches {
    pub menu_tree: Memoizer<String, Value>,
    pub dict_by_name: Memoizer<String, Arc<Vec<Record>>>,
    pub dict_by_name_and_key: Memoizer<(String, String), Record>,
}

impl DerivedCaches {
    pub fn new(config: &MemoConfig) -> Self {
        let ttl = config.ttl();
        Self {
            menu_tree: Memoizer::new(Namespace::MenuTree.as_str(), ttl, config.max_capacity),
            dict_by_name: Memoizer::new(Namespace::DictByName.as_str(), ttl, config.max_capacity),
            dict_by_name_and_key: Memoizer::new(
                Namespace::DictByNameAndKey.as_str(),
                ttl,
                config.max_capacity,
            ),
        }
    }

    pub fn invalidate(&self, namespace: Namespace) {
        match namespace {
            Namespace::MenuTree => self.menu_tree.flush(),
            Namespace::DictByName => self.dict_by_name.flush(),
            Namespace::DictByNameAndKey => self.dict_by_name_and_key.flush(),
        }
        info!(namespace = %namespace, "Derived cache invalidated");
    }

    pub fn invalidate_all(&self) {
        for namespace in Namespace::ALL {
            self.invalidate(namespace);
        }
    }
}

impl Default for DerivedCaches {
    fn default() -> Self {
        Self::new(&MemoConfig::default())
    }
}
