//! mirror-bootstrap - 同步服务启动骨架
//!
//! 基础设施装配、运行时初始化、指标采集与优雅关闭

mod infrastructure;
mod metrics;
mod runtime;
mod shutdown;
mod starter;

pub use infrastructure::*;
pub use metrics::*;
pub use runtime::*;
pub use shutdown::*;
pub use starter::*;
