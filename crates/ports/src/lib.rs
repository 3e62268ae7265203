//! ports - 抽象 trait 层
//!
//! 查询执行、镜像存储、变更流与快照的抽象接口

mod change;
mod executor;
mod mirror;

pub use change::*;
pub use executor::*;
pub use mirror::*;
