//! 通用类型定义

use serde::{Deserialize, Serialize};

fn default_page_num() -> u64 {
    1
}

fn default_page_size() -> u64 {
    10
}

/// 分页参数
///
/// `page_num` 从 1 开始；`no_pagination` 为 true 时返回全部数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default = "default_page_num")]
    pub page_num: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default)]
    pub no_pagination: bool,
}

impl Default for PageInfo {
    fn default() -> Self {
        Self {
            page_num: default_page_num(),
            page_size: default_page_size(),
            no_pagination: false,
        }
    }
}

impl PageInfo {
    pub fn new(page_num: u64, page_size: u64) -> Self {
        Self {
            page_num,
            page_size,
            no_pagination: false,
        }
    }

    /// 不分页
    pub fn all() -> Self {
        Self {
            no_pagination: true,
            ..Default::default()
        }
    }

    /// 归一化后的 (offset, limit)，不分页时为 None
    ///
    /// 非法的页码/页大小按默认值处理
    pub fn window(&self) -> Option<(u64, u64)> {
        if self.no_pagination {
            return None;
        }
        let page_num = self.page_num.max(1);
        let page_size = if self.page_size == 0 {
            default_page_size()
        } else {
            self.page_size
        };
        Some(((page_num - 1).saturating_mul(page_size), page_size))
    }
}

/// 分页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub rows: Vec<T>,
    /// 分页前的匹配总数
    pub total: u64,
}

impl<T> Paged<T> {
    pub fn new(rows: Vec<T>, total: u64) -> Self {
        Self { rows, total }
    }

    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            total: 0,
        }
    }

    /// 逐行转换，任一行失败则整体失败
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Paged<U>, E> {
        let rows = self.rows.into_iter().map(f).collect::<Result<Vec<_>, _>>()?;
        Ok(Paged {
            rows,
            total: self.total,
        })
    }

    pub fn total_pages(&self, page_size: u64) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(page_size)
    }
}
