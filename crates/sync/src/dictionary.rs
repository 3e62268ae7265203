//! 字典查询
//!
//! 按字典名称查询字典数据，结果缓存在 `DerivedCaches` 中，
//! 字典或字典数据写入后由写路径调用 `on_dictionary_written` 清空

use std::sync::Arc;

use mirror_errors::{AppError, AppResult};
use mirror_query::{Predicate, Preload, Query, QueryError, Record};
use serde_json::Value;

use crate::memo::{DerivedCaches, Namespace};
use crate::router::{QueryOptions, QueryRouter};

pub const DICT_TABLE: &str = "sys_dict";
pub const DICT_DATA_TABLE: &str = "sys_dict_data";

pub struct DictionaryLookup {
    router: Arc<QueryRouter>,
    caches: Arc<DerivedCaches>,
}

impl DictionaryLookup {
    pub fn new(router: Arc<QueryRouter>, caches: Arc<DerivedCaches>) -> Self {
        Self { router, caches }
    }

    /// 指定名称字典下的全部数据，按 `sort` 升序，每行附带 `dict`
    pub async fn datas_by_dict_name(&self, name: &str) -> AppResult<Arc<Vec<Record>>> {
        self.caches
            .dict_by_name
            .get_or_try_compute(name.to_string(), || async {
                let ids = self.dict_ids(name).await?;
                if ids.is_empty() {
                    return Ok(Arc::new(Vec::new()));
                }
                let query = Query::all()
                    .filter(Predicate::is_in("dict_id", ids)?)
                    .order_asc("sort")?
                    .preload(dict_preload()?);
                let paged = self
                    .router
                    .execute(DICT_DATA_TABLE, &query, QueryOptions::default())
                    .await?;
                Ok(Arc::new(paged.rows))
            })
            .await
    }

    /// 指定字典名称与数据 key 的字典数据，存在多条时取最新创建的一条
    pub async fn data_by_dict_name_and_key(&self, name: &str, key: &str) -> AppResult<Record> {
        self.caches
            .dict_by_name_and_key
            .get_or_try_compute((name.to_string(), key.to_string()), || async {
                let ids = self.dict_ids(name).await?;
                if ids.is_empty() {
                    return Err(not_found(name, key));
                }
                let query = Query::new()
                    .filter(Predicate::is_in("dict_id", ids)?)
                    .filter(Predicate::eq("key", key)?)
                    .order_desc("created_at")?
                    .offset_limit(0, 1)
                    .preload(dict_preload()?);
                let paged = self
                    .router
                    .execute(DICT_DATA_TABLE, &query, QueryOptions::default())
                    .await?;
                paged.rows.into_iter().next().ok_or_else(|| not_found(name, key))
            })
            .await
    }

    /// 查不到时返回空记录
    pub async fn data_by_dict_name_and_key_or_default(&self, name: &str, key: &str) -> Record {
        self.data_by_dict_name_and_key(name, key)
            .await
            .unwrap_or_default()
    }

    /// 字典或字典数据发生写入
    pub fn on_dictionary_written(&self) {
        self.caches.invalidate(Namespace::DictByName);
        self.caches.invalidate(Namespace::DictByNameAndKey);
    }

    async fn dict_ids(&self, name: &str) -> AppResult<Vec<Value>> {
        let query = Query::all().filter(Predicate::eq("name", name)?);
        let paged = self
            .router
            .execute(DICT_TABLE, &query, QueryOptions::default())
            .await?;
        Ok(paged
            .rows
            .into_iter()
            .filter_map(|mut row| row.remove("id"))
            .collect())
    }
}

fn dict_preload() -> Result<Preload, QueryError> {
    Preload::belongs_to("dict", DICT_TABLE, "dict_id")
}

fn not_found(name: &str, key: &str) -> AppError {
    AppError::not_found(format!("dictionary data {}/{}", name, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{FlagsHandle, RoutingFlags};
    use async_trait::async_trait;
    use mirror_common::Paged;
    use mirror_ports::QueryExecutor;
    use mirror_query::{eval, TablePolicy, TableSchema};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 在固定数据上求值，预加载按外键挂上字典行
    struct Fixture {
        tables: HashMap<&'static str, Vec<Record>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryExecutor for Fixture {
        fn backend(&self) -> &'static str {
            "fixture"
        }

        async fn execute(&self, schema: &TableSchema, query: &Query) -> AppResult<Paged<Record>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rows = self.tables.get(schema.name()).cloned().unwrap_or_default();
            let mut plain = query.clone();
            plain.preloads.clear();
            let mut paged = eval::evaluate(rows, &plain, schema)?;
            for preload in &query.preloads {
                let related = self.tables.get(preload.table.as_str()).cloned().unwrap_or_default();
                for row in &mut paged.rows {
                    let parent = related
                        .iter()
                        .find(|r| r.get("id") == row.get(&preload.foreign_key))
                        .cloned()
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    row.insert(preload.name.clone(), parent);
                }
            }
            Ok(paged)
        }
    }

    fn record(value: Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn lookup() -> (DictionaryLookup, Arc<Fixture>) {
        let fixture = Arc::new(Fixture {
            tables: HashMap::from([
                (
                    DICT_TABLE,
                    vec![
                        record(json!({"id": 1, "name": "gender"})),
                        record(json!({"id": 2, "name": "status"})),
                    ],
                ),
                (
                    DICT_DATA_TABLE,
                    vec![
                        record(json!({"id": 10, "dict_id": 1, "key": "m", "val": "male", "sort": 2, "created_at": "2024-01-01T00:00:00"})),
                        record(json!({"id": 11, "dict_id": 1, "key": "f", "val": "female", "sort": 1, "created_at": "2024-01-01T00:00:00"})),
                        record(json!({"id": 12, "dict_id": 1, "key": "m", "val": "man", "sort": 3, "created_at": "2024-02-01T00:00:00"})),
                        record(json!({"id": 20, "dict_id": 2, "key": "on", "val": "enabled", "sort": 1, "created_at": "2024-01-01T00:00:00"})),
                    ],
                ),
            ]),
            calls: AtomicUsize::new(0),
        });
        let policy = TablePolicy::new("", Vec::new(), Vec::new()).unwrap();
        let router = QueryRouter::new(
            fixture.clone(),
            None,
            Arc::new(policy),
            FlagsHandle::new(RoutingFlags::default()),
        );
        (
            DictionaryLookup::new(Arc::new(router), Arc::new(DerivedCaches::default())),
            fixture,
        )
    }

    #[tokio::test]
    async fn test_datas_by_dict_name_sorted_with_dict() {
        let (lookup, _) = lookup();
        let rows = lookup.datas_by_dict_name("gender").await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(keys, vec![json!(11), json!(10), json!(12)]);
        assert_eq!(rows[0]["dict"]["name"], json!("gender"));

        assert!(lookup.datas_by_dict_name("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_data_by_name_and_key_picks_latest() {
        let (lookup, _) = lookup();
        let row = lookup.data_by_dict_name_and_key("gender", "m").await.unwrap();
        assert_eq!(row["val"], json!("man"));

        let err = lookup.data_by_dict_name_and_key("gender", "x").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(lookup.data_by_dict_name_and_key_or_default("status", "x").await.is_empty());
    }

    #[tokio::test]
    async fn test_results_memoized_until_written() {
        let (lookup, fixture) = lookup();
        lookup.datas_by_dict_name("gender").await.unwrap();
        let after_first = fixture.calls.load(Ordering::SeqCst);
        lookup.datas_by_dict_name("gender").await.unwrap();
        assert_eq!(fixture.calls.load(Ordering::SeqCst), after_first);

        lookup.on_dictionary_written();
        lookup.datas_by_dict_name("gender").await.unwrap();
        assert!(fixture.calls.load(Ordering::SeqCst) > after_first);
    }
}
