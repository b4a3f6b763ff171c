//! 共享库
//!
//! 包含所有服务共用的配置、错误处理、数据库连接、工作单元（事务协调）、
//! 补偿日志以及可观测性等基础设施代码。

pub mod clock;
pub mod compensation;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod test_utils;
pub mod uow;
