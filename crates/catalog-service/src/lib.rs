//! 目录服务
//!
//! 管理商品分类及其图片资源。
//!
//! ## 核心功能
//!
//! - **资源上传**：内容写入对象存储，记录以临时状态入库并带过期时间
//! - **资源转正**：归属对象在自己的事务中把临时资源转为永久资源
//! - **分类管理**：创建分类时插入记录并转正图片，失败时按补偿日志撤销
//! - **过期清理**：后台任务回收未被转正的过期资源
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `storage`: 对象存储（本地文件系统与内存实现）
//! - `service`: 业务服务层
//! - `worker`: 后台任务
//! - `state`: 服务装配

pub mod error;
pub mod models;
pub mod repository;
pub mod service;
pub mod state;
pub mod storage;
pub mod worker;

pub use error::{CatalogError, Result};
pub use models::*;
pub use service::{CategoryService, ResourceService, dto};
pub use state::CatalogState;
pub use worker::{Reaper, ReaperHandle, SweepReport};
