//! mirror-sync - 缓存同步与查询路由
//!
//! - 变更流读取：把镜像表的行变更按提交顺序应用到镜像存储
//! - 启动同步：先全量快照，再开始增量
//! - 查询路由：按配置和表分类选择关系库或缓存执行器
//! - 派生结果缓存：显式失效的进程内缓存，菜单树与字典查询使用

mod bootstrap;
mod cache_executor;
mod dictionary;
mod memo;
mod memory;
mod menu;
mod reader;
mod router;

pub use bootstrap::*;
pub use cache_executor::*;
pub use dictionary::*;
pub use memo::*;
pub use memory::*;
pub use menu::*;
pub use reader::*;
pub use router::*;
