//! mirror-adapter-postgres - PostgreSQL 适配器
//!
//! 关系库查询执行、全量快照与基于逻辑复制槽的变更流

mod connection;
mod executor;
mod logical;
mod retry;
mod snapshot;
pub mod wal2json;

pub use connection::*;
pub use executor::*;
pub use logical::*;
pub use retry::*;
pub use snapshot::*;
