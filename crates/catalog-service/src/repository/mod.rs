//! 仓储层
//!
//! 提供资源和分类的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 仓储实例由工作单元按绑定（事务或连接池）创建，调用方不直接构造
//! - 事务边界由服务层通过 `UnitOfWork::run` 决定
//! - 定义 trait 接口以支持 mock 测试和内存实现

mod category_repo;
mod memory;
mod resource_repo;
mod traits;

use std::sync::Arc;

use storefront_shared::database::Database;
use storefront_shared::uow::UnitOfWork;

pub use category_repo::PgCategoryRepository;
pub use memory::{
    MemoryCategoryRepository, MemoryDatabase, MemoryResourceRepository, MemoryTables,
    MemoryTransaction, register_memory_repositories,
};
pub use resource_repo::PgResourceRepository;
pub use traits::*;

/// 在工作单元上注册 PostgreSQL 仓储
pub fn register_postgres_repositories(uow: &UnitOfWork<Database>) {
    uow.register_repository(RESOURCE_REPOSITORY, |binding| -> Arc<dyn ResourceRepository> {
        Arc::new(PgResourceRepository::new(binding))
    });
    uow.register_repository(CATEGORY_REPOSITORY, |binding| -> Arc<dyn CategoryRepository> {
        Arc::new(PgCategoryRepository::new(binding))
    });
}
