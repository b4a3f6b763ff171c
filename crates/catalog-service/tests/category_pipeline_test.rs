//! 分类创建补偿流水线集成测试
//!
//! 分类记录写入后图片转正失败时，分类记录需被删除且只删除一次。

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use catalog_service::dto::CreateCategoryRequest;
use catalog_service::models::{CATEGORY_OWNER_TYPE, Category, NewCategory};
use catalog_service::repository::{
    CATEGORY_REPOSITORY, CategoryRepository, MemoryCategoryRepository,
};
use catalog_service::{CatalogError, ResourceState};
use common::{Harness, ctx, memory_harness, png};

/// 统计删除调用次数的分类仓储
struct CountingCategories {
    inner: MemoryCategoryRepository,
    deletes: Arc<AtomicUsize>,
}

#[async_trait]
impl CategoryRepository for CountingCategories {
    async fn create(&self, category: &NewCategory) -> catalog_service::Result<Category> {
        self.inner.create(category).await
    }

    async fn get(&self, id: i64) -> catalog_service::Result<Option<Category>> {
        self.inner.get(id).await
    }

    async fn list(&self) -> catalog_service::Result<Vec<Category>> {
        self.inner.list().await
    }

    async fn delete(&self, id: i64) -> catalog_service::Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }
}

fn count_category_deletes(h: &Harness) -> Arc<AtomicUsize> {
    let deletes = Arc::new(AtomicUsize::new(0));
    let counter = deletes.clone();
    let db = h.db.clone();
    h.state
        .uow
        .register_repository(CATEGORY_REPOSITORY, move |binding| -> Arc<dyn CategoryRepository> {
            Arc::new(CountingCategories {
                inner: MemoryCategoryRepository::new(binding, db.clone()),
                deletes: counter.clone(),
            })
        });
    deletes
}

fn request(name: &str, image_ids: Vec<String>) -> CreateCategoryRequest {
    CreateCategoryRequest {
        name: name.to_string(),
        description: Some("desc".to_string()),
        sort_order: 1,
        image_ids,
    }
}

#[tokio::test]
async fn test_create_category_promotes_images() {
    let (h, store) = memory_harness();
    let image = h.state.resources.upload(&ctx(), png("cover.png")).await.unwrap();

    let detail = h
        .state
        .categories
        .create_category(&ctx(), request("Shoes", vec![image.id.clone()]))
        .await
        .unwrap();

    assert_eq!(detail.category.name, "Shoes");
    assert_eq!(detail.images.len(), 1);
    assert_eq!(detail.images[0].state, ResourceState::Permanent);

    let stored = h.db.resource(&image.id).unwrap();
    assert!(stored.is_owned_by(&detail.category.id.to_string(), CATEGORY_OWNER_TYPE));
    assert!(store.contains(&image.name));

    let fetched = h
        .state
        .categories
        .get_category(&ctx(), detail.category.id)
        .await
        .unwrap();
    assert_eq!(fetched.images, detail.images);
}

#[tokio::test]
async fn test_promotion_failure_deletes_category_exactly_once() {
    let (h, _) = memory_harness();
    let deletes = count_category_deletes(&h);
    let image = h.state.resources.upload(&ctx(), png("cover.png")).await.unwrap();
    h.advance_minutes(61);

    let result = h
        .state
        .categories
        .create_category(&ctx(), request("Shoes", vec![image.id.clone()]))
        .await;

    assert!(matches!(
        result,
        Err(CatalogError::ResourceUnavailable(ids)) if ids == vec![image.id.clone()]
    ));
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
    assert!(h.db.snapshot().categories.is_empty());
    assert!(h.state.categories.list_categories(&ctx()).await.unwrap().is_empty());
    assert!(h.db.resource(&image.id).unwrap().is_temporary());
}

#[tokio::test]
async fn test_success_runs_no_compensation() {
    let (h, _) = memory_harness();
    let deletes = count_category_deletes(&h);

    h.state
        .categories
        .create_category(&ctx(), request("Shoes", Vec::new()))
        .await
        .unwrap();

    assert_eq!(deletes.load(Ordering::SeqCst), 0);
    assert_eq!(h.db.snapshot().categories.len(), 1);
}

#[tokio::test]
async fn test_duplicate_name_rejected() {
    let (h, _) = memory_harness();
    let deletes = count_category_deletes(&h);
    h.state
        .categories
        .create_category(&ctx(), request("Shoes", Vec::new()))
        .await
        .unwrap();

    let result = h
        .state
        .categories
        .create_category(&ctx(), request("Shoes", Vec::new()))
        .await;

    assert!(matches!(result, Err(CatalogError::CategoryNameTaken(name)) if name == "Shoes"));
    assert_eq!(deletes.load(Ordering::SeqCst), 0);
    assert_eq!(h.db.snapshot().categories.len(), 1);
}

#[tokio::test]
async fn test_reentrant_create_swallowed_error_leaves_no_row() {
    let (h, _) = memory_harness();
    let image = h.state.resources.upload(&ctx(), png("cover.png")).await.unwrap();
    h.advance_minutes(61);

    let categories = &h.state.categories;
    let image_id = image.id.clone();
    let begun_before = h.db.transactions_begun();
    h.state
        .uow
        .run(&ctx(), |tx| async move {
            categories
                .create_category(&tx, request("Kept", Vec::new()))
                .await?;
            // 内层失败被外层吞掉，外层事务继续提交
            let inner = categories
                .create_category(&tx, request("Shoes", vec![image_id]))
                .await;
            assert!(inner.is_err());
            Ok::<_, CatalogError>(())
        })
        .await
        .unwrap();

    assert_eq!(h.db.transactions_begun(), begun_before + 1);
    let names: Vec<String> = h
        .db
        .snapshot()
        .categories
        .values()
        .map(|c| c.name.clone())
        .collect();
    assert_eq!(names, vec!["Kept".to_string()]);
}

#[tokio::test]
async fn test_reentrant_partial_promotion_leaves_images_temporary() {
    let (h, _) = memory_harness();
    let fresh = h.state.resources.upload(&ctx(), png("fresh.png")).await.unwrap();

    let categories = &h.state.categories;
    let ids = vec![fresh.id.clone(), "missing".to_string()];
    h.state
        .uow
        .run(&ctx(), |tx| async move {
            let inner = categories.create_category(&tx, request("Shoes", ids)).await;
            assert!(matches!(
                inner,
                Err(CatalogError::ResourceUnavailable(ids)) if ids == vec!["missing".to_string()]
            ));
            Ok::<_, CatalogError>(())
        })
        .await
        .unwrap();

    assert!(h.db.snapshot().categories.is_empty());
    let stored = h.db.resource(&fresh.id).unwrap();
    assert_eq!(stored.state, ResourceState::Temporary);
    assert_eq!(stored.expires_at, fresh.expires_at);
    assert_eq!(stored.owner_id, None);
    assert_eq!(stored.owner_type, None);
}

#[tokio::test]
async fn test_reentrant_failure_rolls_back_outer_transaction() {
    let (h, _) = memory_harness();
    let categories = &h.state.categories;

    let result = h
        .state
        .uow
        .run(&ctx(), |tx| async move {
            categories
                .create_category(&tx, request("Outer", Vec::new()))
                .await?;
            categories
                .create_category(&tx, request("Inner", vec!["missing".to_string()]))
                .await?;
            Ok::<_, CatalogError>(())
        })
        .await;

    assert!(matches!(result, Err(CatalogError::ResourceUnavailable(_))));
    assert!(h.db.snapshot().categories.is_empty());
    assert_eq!(h.db.transactions_begun(), 1);
}

#[tokio::test]
async fn test_delete_category_removes_images_after_commit() {
    let (h, store) = memory_harness();
    let images = h
        .state
        .resources
        .upload_batch(&ctx(), vec![png("a.png"), png("b.png")])
        .await
        .unwrap();
    let ids = images.iter().map(|r| r.id.clone()).collect();
    let detail = h
        .state
        .categories
        .create_category(&ctx(), request("Shoes", ids))
        .await
        .unwrap();

    h.state
        .categories
        .delete_category(&ctx(), detail.category.id)
        .await
        .unwrap();

    assert!(h.db.snapshot().categories.is_empty());
    for image in &images {
        assert!(h.db.resource(&image.id).is_none());
        assert!(!store.contains(&image.name));
    }

    let missing = h
        .state
        .categories
        .get_category(&ctx(), detail.category.id)
        .await;
    assert!(matches!(missing, Err(CatalogError::CategoryNotFound(_))));
}
