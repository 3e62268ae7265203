//! mirror-adapter-redis - Redis 适配器
//!
//! 镜像记录存储：每张表一个 hash，字段为主键，值为整行 JSON

mod connection;
mod mirror;

pub use connection::*;
pub use mirror::*;
