//! 列表请求到查询的转换
//!
//! 字符串字段做子串匹配，数值/枚举字段做相等匹配，未填写的字段不产生谓词

use mirror_common::PageInfo;
use serde::Deserialize;

use crate::error::QueryError;
use crate::query::{Preload, Query};

/// 请求结构转为规范查询
pub trait ToQuery {
    /// 查询的逻辑表名
    fn table(&self) -> &'static str;

    fn to_query(&self) -> Result<Query, QueryError>;
}

/// 机器列表请求
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineFilter {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub login_name: String,
    #[serde(default)]
    pub creator: String,
    pub status: Option<u32>,
    #[serde(flatten)]
    pub page_info: PageInfo,
}

impl ToQuery for MachineFilter {
    fn table(&self) -> &'static str {
        "sys_machine"
    }

    fn to_query(&self) -> Result<Query, QueryError> {
        Ok(Query::new()
            .order_desc("created_at")?
            .contains_opt("host", Some(self.host.as_str()))?
            .contains_opt("login_name", Some(self.login_name.as_str()))?
            .contains_opt("creator", Some(self.creator.as_str()))?
            .eq_opt("status", self.status)?
            .page_info(self.page_info.clone()))
    }
}

/// 字典列表请求，结果附带字典数据
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictFilter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub status: Option<u32>,
    #[serde(flatten)]
    pub page_info: PageInfo,
}

impl ToQuery for DictFilter {
    fn table(&self) -> &'static str {
        "sys_dict"
    }

    fn to_query(&self) -> Result<Query, QueryError> {
        Ok(Query::new()
            .order_desc("created_at")?
            .contains_opt("name", Some(self.name.as_str()))?
            // 描述按精确匹配
            .eq_str_opt("desc", Some(self.desc.as_str()))?
            .eq_opt("status", self.status)?
            .preload(Preload::has_many("dict_datas", "sys_dict_data", "dict_id")?)
            .page_info(self.page_info.clone()))
    }
}

/// 字典数据列表请求，结果附带所属字典
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictDataFilter {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub val: String,
    #[serde(default)]
    pub attr: String,
    pub status: Option<u32>,
    pub dict_id: Option<u64>,
    #[serde(flatten)]
    pub page_info: PageInfo,
}

impl ToQuery for DictDataFilter {
    fn table(&self) -> &'static str {
        "sys_dict_data"
    }

    fn to_query(&self) -> Result<Query, QueryError> {
        Ok(Query::new()
            .order_desc("created_at")?
            .contains_opt("key", Some(self.key.as_str()))?
            .contains_opt("val", Some(self.val.as_str()))?
            .eq_str_opt("attr", Some(self.attr.as_str()))?
            .eq_opt("status", self.status)?
            .eq_opt("dict_id", self.dict_id)?
            .preload(Preload::belongs_to("dict", "sys_dict", "dict_id")?)
            .page_info(self.page_info.clone()))
    }
}

/// 消息列表请求
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFilter {
    /// 0 表示不限
    #[serde(default)]
    pub to_user_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: Option<u32>,
    pub status: Option<u32>,
    #[serde(flatten)]
    pub page_info: PageInfo,
}

impl ToQuery for MessageFilter {
    fn table(&self) -> &'static str {
        "sys_message"
    }

    fn to_query(&self) -> Result<Query, QueryError> {
        let to_user_id = (self.to_user_id != 0).then_some(self.to_user_id);
        Ok(Query::new()
            .order_desc("created_at")?
            .eq_opt("to_user_id", to_user_id)?
            .contains_opt("title", Some(self.title.as_str()))?
            .contains_opt("content", Some(self.content.as_str()))?
            .eq_opt("type", self.kind)?
            .eq_opt("status", self.status)?
            .page_info(self.page_info.clone()))
    }
}
