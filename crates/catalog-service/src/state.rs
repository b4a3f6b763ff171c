//! 服务装配
//!
//! 把工作单元、对象存储和时钟组装成完整的目录服务，
//! 进程入口和集成测试共用同一套装配逻辑。

use std::sync::Arc;

use storefront_shared::clock::Clock;
use storefront_shared::config::{ReaperConfig, ResourceConfig};
use storefront_shared::uow::{TransactionBackend, UnitOfWork};

use crate::service::{CategoryService, ResourceService};
use crate::storage::ObjectStore;
use crate::worker::Reaper;

pub struct CatalogState<B: TransactionBackend> {
    pub uow: Arc<UnitOfWork<B>>,
    pub store: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn Clock>,
    pub resources: Arc<ResourceService<B>>,
    pub categories: Arc<CategoryService<B>>,
}

impl<B: TransactionBackend> CatalogState<B> {
    /// 仓储需已在 `uow` 上注册
    pub fn new(
        uow: Arc<UnitOfWork<B>>,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        config: ResourceConfig,
    ) -> Self {
        let resources = Arc::new(ResourceService::new(
            uow.clone(),
            store.clone(),
            clock.clone(),
            config,
        ));
        let categories = Arc::new(CategoryService::new(uow.clone(), resources.clone()));

        Self {
            uow,
            store,
            clock,
            resources,
            categories,
        }
    }

    /// 创建共享同一工作单元和存储的清理任务
    pub fn reaper(&self, config: ReaperConfig) -> Reaper<B> {
        Reaper::new(self.uow.clone(), self.store.clone(), self.clock.clone(), config)
    }
}
