//! 分类服务
//!
//! 创建分类时在同一事务中插入分类并把上传的临时图片转正：
//!
//! 1. 插入分类记录 -> 2. 登记删除分类的补偿 -> 3. 转正图片 -> 4. 结算补偿
//!
//! 补偿在事务内结算，删除分类使用事务绑定的仓储。
//! 外层调用方复用同一事务并吞掉错误时，分类记录也不会残留。

use std::sync::Arc;

use storefront_shared::compensation::CompensationLog;
use storefront_shared::uow::{TransactionBackend, TxContext, UnitOfWork};
use tracing::{info, instrument};
use validator::Validate;

use crate::error::{CatalogError, Result};
use crate::models::{CATEGORY_OWNER_TYPE, Category, CategoryDetail, NewCategory};
use crate::repository::CATEGORY_REPOSITORY;
use crate::service::dto::CreateCategoryRequest;
use crate::service::resource_service::ResourceService;

pub struct CategoryService<B: TransactionBackend> {
    uow: Arc<UnitOfWork<B>>,
    resources: Arc<ResourceService<B>>,
}

impl<B: TransactionBackend> CategoryService<B> {
    pub fn new(uow: Arc<UnitOfWork<B>>, resources: Arc<ResourceService<B>>) -> Self {
        Self { uow, resources }
    }

    /// 创建分类并绑定图片
    #[instrument(skip_all, fields(name = %request.name, images = request.image_ids.len()))]
    pub async fn create_category(
        &self,
        ctx: &TxContext<B>,
        request: CreateCategoryRequest,
    ) -> Result<CategoryDetail> {
        request.validate()?;
        if request.name.trim().is_empty() {
            return Err(CatalogError::Validation("分类名称不能为空".to_string()));
        }

        let new = NewCategory {
            name: request.name.trim().to_string(),
            description: request.description,
            sort_order: request.sort_order,
        };
        let image_ids = request.image_ids;

        let detail = self
            .uow
            .run(ctx, |tx| async move {
                let mut compensations = CompensationLog::new("category_create");
                let result = self
                    .create_with_images(&tx, &new, &image_ids, &mut compensations)
                    .await;
                compensations.settle(result).await
            })
            .await?;

        info!(category_id = detail.category.id, "分类创建成功");
        Ok(detail)
    }

    async fn create_with_images(
        &self,
        tx: &TxContext<B>,
        new: &NewCategory,
        image_ids: &[String],
        log: &mut CompensationLog,
    ) -> Result<CategoryDetail> {
        let categories = self.uow.repository(tx, &CATEGORY_REPOSITORY)?;
        let category = categories.create(new).await?;

        let id = category.id;
        log.push(format!("删除分类 {}", id), move || async move {
            categories
                .delete(id)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        });

        let owner_id = id.to_string();
        self.resources
            .make_permanent(tx, image_ids, &owner_id, CATEGORY_OWNER_TYPE)
            .await?;
        let images = self
            .resources
            .list_by_owner(tx, CATEGORY_OWNER_TYPE, &owner_id)
            .await?;

        Ok(CategoryDetail { category, images })
    }

    pub async fn get_category(&self, ctx: &TxContext<B>, id: i64) -> Result<CategoryDetail> {
        let categories = self.uow.repository(ctx, &CATEGORY_REPOSITORY)?;
        let category = categories
            .get(id)
            .await?
            .ok_or(CatalogError::CategoryNotFound(id))?;
        let images = self
            .resources
            .list_by_owner(ctx, CATEGORY_OWNER_TYPE, &id.to_string())
            .await?;

        Ok(CategoryDetail { category, images })
    }

    pub async fn list_categories(&self, ctx: &TxContext<B>) -> Result<Vec<Category>> {
        let categories = self.uow.repository(ctx, &CATEGORY_REPOSITORY)?;
        categories.list().await
    }

    /// 删除分类及其图片，图片对象在事务提交后删除
    #[instrument(skip(self, ctx))]
    pub async fn delete_category(&self, ctx: &TxContext<B>, id: i64) -> Result<()> {
        self.uow
            .run(ctx, |tx| async move {
                let categories = self.uow.repository(&tx, &CATEGORY_REPOSITORY)?;
                if !categories.delete(id).await? {
                    return Err(CatalogError::CategoryNotFound(id));
                }
                let images = self
                    .resources
                    .delete_owned(&tx, CATEGORY_OWNER_TYPE, &id.to_string())
                    .await?;

                info!(category_id = id, images = images.len(), "分类已删除");
                Ok::<_, CatalogError>(())
            })
            .await
    }
}
