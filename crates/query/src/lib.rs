//! mirror-query - 与后端无关的查询模型
//!
//! 谓词、排序、分页的统一表示，以及缓存侧使用的进程内求值器。
//! 模型中不包含任何 SQL 片段或 Redis 语法。

mod error;
pub mod eval;
pub mod filters;
mod predicate;
mod query;
mod record;
mod table;

pub use error::*;
pub use predicate::*;
pub use query::*;
pub use record::*;
pub use table::*;
