//! 菜单树查询
//!
//! 按用户缓存其角色可访问的菜单树；菜单或角色菜单关联写入后
//! 由写路径调用 `on_menu_written` 清空

use std::collections::HashMap;
use std::sync::Arc;

use mirror_errors::AppResult;
use mirror_query::{Predicate, Query, Record};
use serde_json::Value;
use tracing::debug;

use crate::memo::{DerivedCaches, Namespace};
use crate::router::{QueryOptions, QueryRouter};

pub const MENU_TABLE: &str = "sys_menu";
pub const MENU_ROLE_TABLE: &str = "relation_menu_role";

const RELATION_MENU_FIELD: &str = "sys_menu_id";
const RELATION_ROLE_FIELD: &str = "sys_role_id";
const PARENT_FIELD: &str = "parent_id";
const CHILDREN_FIELD: &str = "children";

pub struct MenuTreeLookup {
    router: Arc<QueryRouter>,
    caches: Arc<DerivedCaches>,
}

impl MenuTreeLookup {
    pub fn new(router: Arc<QueryRouter>, caches: Arc<DerivedCaches>) -> Self {
        Self { router, caches }
    }

    /// 用户的菜单树，按用户缓存
    ///
    /// 每个节点是菜单行加上 `children` 数组，同级按 `sort` 升序
    pub async fn menu_tree(&self, user_id: u64, role_id: u64) -> AppResult<Value> {
        self.caches
            .menu_tree
            .get_or_try_compute(user_id.to_string(), || async {
                let menus = self.role_menus(role_id).await?;
                debug!(user_id, role_id, menus = menus.len(), "Menu tree computed");
                Ok(Value::Array(build_menu_tree(menus)))
            })
            .await
    }

    /// 菜单或角色菜单关联发生写入
    pub fn on_menu_written(&self) {
        self.caches.invalidate(Namespace::MenuTree);
    }

    async fn role_menus(&self, role_id: u64) -> AppResult<Vec<Record>> {
        let relations = Query::all().filter(Predicate::eq(RELATION_ROLE_FIELD, role_id)?);
        let menu_ids: Vec<Value> = self
            .router
            .execute(MENU_ROLE_TABLE, &relations, QueryOptions::default())
            .await?
            .rows
            .into_iter()
            .filter_map(|mut row| row.remove(RELATION_MENU_FIELD))
            .collect();
        if menu_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::all()
            .filter(Predicate::is_in("id", menu_ids)?)
            .order_asc("sort")?;
        let paged = self
            .router
            .execute(MENU_TABLE, &query, QueryOptions::default())
            .await?;
        Ok(paged.rows)
    }
}

/// `parent_id` 为空或 0 的是顶级菜单
fn parent_key(menu: &Record) -> Option<String> {
    match menu.get(PARENT_FIELD) {
        None | Some(Value::Null) => None,
        Some(value) if value.as_u64() == Some(0) => None,
        Some(value) => Some(value.to_string()),
    }
}

/// 按 `parent_id` 嵌套，保持输入顺序
///
/// 父菜单不在集合内的节点不可达，被丢弃
pub fn build_menu_tree(menus: Vec<Record>) -> Vec<Value> {
    let mut grouped: HashMap<Option<String>, Vec<Record>> = HashMap::new();
    for menu in menus {
        grouped.entry(parent_key(&menu)).or_default().push(menu);
    }
    nest(None, &mut grouped)
}

// 每组只取一次，环状引用不会递归
fn nest(parent: Option<String>, grouped: &mut HashMap<Option<String>, Vec<Record>>) -> Vec<Value> {
    let Some(menus) = grouped.remove(&parent) else {
        return Vec::new();
    };
    menus
        .into_iter()
        .map(|mut menu| {
            let children = match menu.get("id") {
                Some(id) => nest(Some(id.to_string()), grouped),
                None => Vec::new(),
            };
            menu.insert(CHILDREN_FIELD.to_string(), Value::Array(children));
            Value::Object(menu)
        })
        .collect()
}
