//! 服务层
//!
//! 实现资源生命周期和分类业务逻辑，通过工作单元协调仓储与对象存储。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `resource_service`: 资源上传、转正、删除
//! - `category_service`: 分类创建（补偿流水线）与删除

pub mod category_service;
pub mod dto;
pub mod resource_service;

pub use category_service::CategoryService;
pub use dto::*;
pub use resource_service::ResourceService;
