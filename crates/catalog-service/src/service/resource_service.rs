//! 资源服务
//!
//! 管理资源从上传到回收的生命周期：
//! - 上传：先写对象存储，再插入临时记录；插入失败时删除已写入的对象
//! - 转正：在归属对象的事务内把临时资源转为永久资源
//! - 删除：事务内删除记录，提交后再删除对象
//!
//! 上传的补偿动作只涉及对象存储，因此在事务结束之后统一结算，
//! 提交失败同样会触发补偿。

use std::collections::HashSet;
use std::sync::Arc;

use storefront_shared::clock::Clock;
use storefront_shared::compensation::CompensationLog;
use storefront_shared::config::ResourceConfig;
use storefront_shared::observability::metrics;
use storefront_shared::uow::{TransactionBackend, TxContext, UnitOfWork};
use tracing::{debug, info, instrument, warn};

use crate::error::{CatalogError, Result};
use crate::models::Resource;
use crate::repository::RESOURCE_REPOSITORY;
use crate::service::dto::{ResourceContent, UploadRequest};
use crate::storage::{ObjectStore, StorageError};

pub struct ResourceService<B: TransactionBackend> {
    uow: Arc<UnitOfWork<B>>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: ResourceConfig,
}

impl<B: TransactionBackend> ResourceService<B> {
    pub fn new(
        uow: Arc<UnitOfWork<B>>,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        config: ResourceConfig,
    ) -> Self {
        Self {
            uow,
            store,
            clock,
            config,
        }
    }

    /// 上传单个资源，返回临时资源记录
    #[instrument(skip_all, fields(original_name = %request.original_name, size = request.bytes.len()))]
    pub async fn upload(&self, ctx: &TxContext<B>, request: UploadRequest) -> Result<Resource> {
        self.validate_upload(&request)?;

        let mut compensations = CompensationLog::new("resource_upload");
        let log = &mut compensations;
        let request = &request;
        let result = self
            .uow
            .run(ctx, move |tx| async move { self.upload_one(&tx, request, log).await })
            .await;
        let result = compensations.settle(result).await;

        match &result {
            Ok(resource) => {
                metrics::record_resource_upload("succeeded", request.bytes.len() as u64);
                info!(resource_id = %resource.id, name = %resource.name, "资源上传成功");
            }
            Err(e) => {
                metrics::record_resource_upload("failed", request.bytes.len() as u64);
                warn!(error = %e, "资源上传失败");
            }
        }
        result
    }

    /// 批量上传，所有资源在同一事务中插入
    ///
    /// 第 k 个资源失败时，前 k-1 个已写入的对象被删除，记录随事务回滚。
    #[instrument(skip_all, fields(count = requests.len()))]
    pub async fn upload_batch(
        &self,
        ctx: &TxContext<B>,
        requests: Vec<UploadRequest>,
    ) -> Result<Vec<Resource>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        for request in &requests {
            self.validate_upload(request)?;
        }

        let total_bytes: u64 = requests.iter().map(|r| r.bytes.len() as u64).sum();
        let mut compensations = CompensationLog::new("resource_batch_upload");
        let log = &mut compensations;
        let requests = &requests;
        let result = self
            .uow
            .run(ctx, move |tx| async move {
                let mut uploaded = Vec::with_capacity(requests.len());
                for request in requests {
                    uploaded.push(self.upload_one(&tx, request, log).await?);
                }
                Ok::<_, CatalogError>(uploaded)
            })
            .await;
        let result = compensations.settle(result).await;

        let status = if result.is_ok() { "succeeded" } else { "failed" };
        metrics::record_resource_upload(status, total_bytes);
        if let Ok(resources) = &result {
            info!(count = resources.len(), "批量上传完成");
        }
        result
    }

    /// 将资源转正给归属对象
    ///
    /// 必须在归属对象的事务中调用，使转正与归属对象的写入一起提交或回滚。
    /// 任意一个资源不存在、已过期或已归属其他对象时返回 `ResourceUnavailable`。
    #[instrument(skip(self, ctx, ids), fields(count = ids.len()))]
    pub async fn make_permanent(
        &self,
        ctx: &TxContext<B>,
        ids: &[String],
        owner_id: &str,
        owner_type: &str,
    ) -> Result<()> {
        ctx.require_transaction()?;
        if owner_id.is_empty() || owner_type.is_empty() {
            return Err(CatalogError::Validation("归属对象不能为空".to_string()));
        }

        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let repo = self.uow.repository(ctx, &RESOURCE_REPOSITORY)?;
        let unavailable = repo
            .make_permanent(&ids, owner_id, owner_type, self.clock.now())
            .await?;

        if !unavailable.is_empty() {
            warn!(?unavailable, "部分资源无法转正，未转正任何资源");
            return Err(CatalogError::ResourceUnavailable(unavailable));
        }

        metrics::record_resource_promotion(owner_type, ids.len());
        debug!(count = ids.len(), "资源转正完成");
        Ok(())
    }

    /// 获取资源元数据和内容
    pub async fn get(&self, ctx: &TxContext<B>, id: &str) -> Result<ResourceContent> {
        let repo = self.uow.repository(ctx, &RESOURCE_REPOSITORY)?;
        let resource = repo
            .get(id)
            .await?
            .ok_or_else(|| CatalogError::ResourceNotFound(id.to_string()))?;
        let bytes = self.store.get(&resource.name).await?;

        Ok(ResourceContent { resource, bytes })
    }

    pub async fn list_by_owner(
        &self,
        ctx: &TxContext<B>,
        owner_type: &str,
        owner_id: &str,
    ) -> Result<Vec<Resource>> {
        let repo = self.uow.repository(ctx, &RESOURCE_REPOSITORY)?;
        repo.list_by_owner(owner_type, owner_id).await
    }

    /// 删除资源
    ///
    /// 记录在事务内删除，对象在事务提交后删除，对象删除失败只记录日志。
    #[instrument(skip(self, ctx))]
    pub async fn delete(&self, ctx: &TxContext<B>, id: &str) -> Result<()> {
        self.uow
            .run(ctx, |tx| async move {
                let repo = self.uow.repository(&tx, &RESOURCE_REPOSITORY)?;
                let resource = repo
                    .get(id)
                    .await?
                    .ok_or_else(|| CatalogError::ResourceNotFound(id.to_string()))?;

                repo.delete(id).await?;
                self.delete_payload_after_commit(&tx, &resource)?;
                Ok::<_, CatalogError>(())
            })
            .await
    }

    /// 在当前事务中删除归属对象的全部资源，对象在提交后删除
    pub async fn delete_owned(
        &self,
        ctx: &TxContext<B>,
        owner_type: &str,
        owner_id: &str,
    ) -> Result<Vec<Resource>> {
        ctx.require_transaction()?;
        let repo = self.uow.repository(ctx, &RESOURCE_REPOSITORY)?;
        let deleted = repo.delete_by_owner(owner_type, owner_id).await?;
        for resource in &deleted {
            self.delete_payload_after_commit(ctx, resource)?;
        }

        debug!(owner_type, owner_id, count = deleted.len(), "删除归属资源");
        Ok(deleted)
    }

    fn validate_upload(&self, request: &UploadRequest) -> Result<()> {
        if request.original_name.trim().is_empty() {
            return Err(CatalogError::Validation("文件名不能为空".to_string()));
        }
        if request.bytes.is_empty() {
            return Err(CatalogError::Validation("上传内容不能为空".to_string()));
        }
        if request.bytes.len() > self.config.max_upload_bytes {
            return Err(CatalogError::Validation(format!(
                "上传内容超过大小限制: {} > {}",
                request.bytes.len(),
                self.config.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// 写入对象并插入临时记录，对象写入成功后登记删除补偿
    async fn upload_one(
        &self,
        tx: &TxContext<B>,
        request: &UploadRequest,
        log: &mut CompensationLog,
    ) -> Result<Resource> {
        let ttl = chrono::Duration::from_std(self.config.temp_ttl())
            .map_err(|e| CatalogError::Internal(format!("临时资源有效期无效: {}", e)))?;
        let size_bytes = i64::try_from(request.bytes.len())
            .map_err(|_| CatalogError::Validation("上传内容过大".to_string()))?;
        let resource = Resource::new_temporary(
            &request.original_name,
            request.content_type.clone(),
            size_bytes,
            self.clock.now(),
            ttl,
        );

        self.store.upload(&resource.name, &request.bytes).await?;

        let store = self.store.clone();
        let name = resource.name.clone();
        log.push(format!("删除对象 {}", resource.name), move || async move {
            store.delete(&name).await.map_err(anyhow::Error::from)
        });

        let repo = self.uow.repository(tx, &RESOURCE_REPOSITORY)?;
        repo.create(&resource).await?;

        Ok(resource)
    }

    fn delete_payload_after_commit(&self, tx: &TxContext<B>, resource: &Resource) -> Result<()> {
        let store = self.store.clone();
        let name = resource.name.clone();
        tx.on_commit(format!("删除对象 {}", resource.name), move || async move {
            match store.delete(&name).await {
                Ok(()) => Ok(()),
                Err(StorageError::NotFound(_)) => {
                    debug!(name = %name, "对象已不存在");
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })?;
        Ok(())
    }
}
