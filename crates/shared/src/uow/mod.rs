//! 工作单元（事务协调）
//!
//! 让一个业务操作中的多个仓储写入共享同一个数据库事务：
//!
//! - [`TransactionBackend`]：可开启事务的存储后端（PostgreSQL、内存）
//! - [`TxContext`]：显式传递的事务作用域
//! - [`RepositoryRegistry`]：按名称注册的仓储工厂
//! - [`UnitOfWork`]：begin/commit/rollback 与 `run`

mod backend;
mod context;
mod registry;
mod unit_of_work;

pub use backend::{Binding, TransactionBackend, TxGuard, TxHandle};
pub use context::TxContext;
pub use registry::{RepositoryKey, RepositoryRegistry};
pub use unit_of_work::UnitOfWork;
