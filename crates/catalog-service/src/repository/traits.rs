//! 仓储 Trait 定义
//!
//! 服务层通过工作单元按键获取仓储，具体实现（PostgreSQL、内存）在启动时注册。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storefront_shared::uow::RepositoryKey;

use crate::error::Result;
use crate::models::{Category, NewCategory, Resource};

pub const RESOURCE_REPOSITORY: RepositoryKey<dyn ResourceRepository> =
    RepositoryKey::new("resources");

pub const CATEGORY_REPOSITORY: RepositoryKey<dyn CategoryRepository> =
    RepositoryKey::new("categories");

/// 资源仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn create(&self, resource: &Resource) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Resource>>;

    async fn list_by_owner(&self, owner_type: &str, owner_id: &str) -> Result<Vec<Resource>>;

    /// 全部资源可转正时一并转正，返回无法转正的资源 ID
    ///
    /// 可转正：未过期的临时资源，或已归属同一对象的永久资源。
    /// 返回值非空时不修改任何资源。
    async fn make_permanent(
        &self,
        ids: &[String],
        owner_id: &str,
        owner_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    /// 查询在 `before` 之前过期的临时资源，按过期时间升序
    async fn get_expired(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Resource>>;

    /// 在当前事务中锁定一个仍然过期的临时资源
    ///
    /// 资源已被转正、已被删除或正被其他事务锁定时返回 None。
    async fn claim_expired(&self, id: &str, before: DateTime<Utc>) -> Result<Option<Resource>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// 删除归属对象的所有资源，返回被删除的资源
    async fn delete_by_owner(&self, owner_type: &str, owner_id: &str) -> Result<Vec<Resource>>;
}

/// 分类仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// 插入分类，名称重复时返回 `CategoryNameTaken`
    async fn create(&self, category: &NewCategory) -> Result<Category>;

    async fn get(&self, id: i64) -> Result<Option<Category>>;

    async fn list(&self) -> Result<Vec<Category>>;

    async fn delete(&self, id: i64) -> Result<bool>;
}
