//! 内存数据库与内存仓储
//!
//! 供测试和本地开发使用。事务开启时拍摄表快照，事务内的读写都作用于快照，
//! 写操作同时记入日志；提交时把日志重放到共享表上，回滚时直接丢弃。
//! 读后改写的操作会记下所读行的版本，提交时版本已变则整个事务失败。
//! 分类 ID 与 PostgreSQL 序列一样不受事务回滚影响。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use storefront_shared::error::{Result as SharedResult, SharedError};
use storefront_shared::uow::{Binding, TransactionBackend, UnitOfWork};

use super::traits::{CATEGORY_REPOSITORY, CategoryRepository, RESOURCE_REPOSITORY, ResourceRepository};
use crate::error::{CatalogError, Result};
use crate::models::{Category, NewCategory, Resource};

#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub resources: BTreeMap<String, Resource>,
    pub categories: BTreeMap<i64, Category>,
}

#[derive(Debug, Clone)]
enum MemoryOp {
    /// 提交时要求资源仍为读取时的版本
    ExpectResource {
        id: String,
        updated_at: DateTime<Utc>,
    },
    PutResource(Resource),
    DeleteResource(String),
    PutCategory(Category),
    DeleteCategory(i64),
}

impl MemoryOp {
    fn expect(resource: &Resource) -> Self {
        Self::ExpectResource {
            id: resource.id.clone(),
            updated_at: resource.updated_at,
        }
    }

    fn conflicts_with(&self, tables: &MemoryTables) -> bool {
        match self {
            Self::ExpectResource { id, updated_at } => tables
                .resources
                .get(id)
                .is_none_or(|current| current.updated_at != *updated_at),
            _ => false,
        }
    }

    fn apply(&self, tables: &mut MemoryTables) {
        match self {
            Self::ExpectResource { .. } => {}
            Self::PutResource(resource) => {
                tables.resources.insert(resource.id.clone(), resource.clone());
            }
            Self::DeleteResource(id) => {
                tables.resources.remove(id);
            }
            Self::PutCategory(category) => {
                tables.categories.insert(category.id, category.clone());
            }
            Self::DeleteCategory(id) => {
                tables.categories.remove(id);
            }
        }
    }
}

/// 内存事务
#[derive(Debug)]
pub struct MemoryTransaction {
    snapshot: MemoryTables,
    journal: Vec<MemoryOp>,
}

#[derive(Debug, Default)]
struct MemoryStats {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// 内存数据库
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<MemoryTables>>,
    next_category_id: Arc<AtomicI64>,
    stats: Arc<MemoryStats>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已提交数据的副本
    pub fn snapshot(&self) -> MemoryTables {
        self.tables.read().clone()
    }

    pub fn resource(&self, id: &str) -> Option<Resource> {
        self.tables.read().resources.get(id).cloned()
    }

    pub fn category(&self, id: i64) -> Option<Category> {
        self.tables.read().categories.get(&id).cloned()
    }

    pub fn transactions_begun(&self) -> usize {
        self.stats.begun.load(Ordering::SeqCst)
    }

    pub fn transactions_committed(&self) -> usize {
        self.stats.committed.load(Ordering::SeqCst)
    }

    pub fn transactions_rolled_back(&self) -> usize {
        self.stats.rolled_back.load(Ordering::SeqCst)
    }

    fn allocate_category_id(&self) -> i64 {
        self.next_category_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl TransactionBackend for MemoryDatabase {
    type Transaction = MemoryTransaction;
    type Connection = MemoryDatabase;

    async fn begin(&self) -> SharedResult<Self::Transaction> {
        self.stats.begun.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            snapshot: self.snapshot(),
            journal: Vec::new(),
        })
    }

    async fn commit(&self, tx: Self::Transaction) -> SharedResult<()> {
        let mut tables = self.tables.write();
        // 按日志顺序校验，事务内先写后读的行以本事务写入的版本为准
        let mut next = tables.clone();
        for op in &tx.journal {
            if op.conflicts_with(&next) {
                self.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
                return Err(SharedError::Internal("内存事务写冲突".to_string()));
            }
            op.apply(&mut next);
        }
        *tables = next;
        self.stats.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _tx: Self::Transaction) -> SharedResult<()> {
        self.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connection(&self) -> Self::Connection {
        self.clone()
    }
}

/// 内存仓储的读写入口
#[derive(Clone)]
struct MemoryStore {
    binding: Binding<MemoryDatabase>,
}

impl MemoryStore {
    async fn read<T>(&self, f: impl FnOnce(&MemoryTables) -> T) -> Result<T> {
        match &self.binding {
            Binding::Unscoped(db) => {
                let tables = db.tables.read();
                Ok(f(&tables))
            }
            Binding::Scoped(handle) => {
                let tx = handle.lock().await?;
                Ok(f(&tx.snapshot))
            }
        }
    }

    async fn write(&self, ops: Vec<MemoryOp>) -> Result<()> {
        match &self.binding {
            Binding::Unscoped(db) => {
                let mut tables = db.tables.write();
                for op in &ops {
                    op.apply(&mut tables);
                }
            }
            Binding::Scoped(handle) => {
                let mut tx = handle.lock().await?;
                for op in &ops {
                    op.apply(&mut tx.snapshot);
                }
                tx.journal.extend(ops);
            }
        }
        Ok(())
    }
}

// ==================== 资源仓储 ====================

pub struct MemoryResourceRepository {
    store: MemoryStore,
}

impl MemoryResourceRepository {
    pub fn new(binding: Binding<MemoryDatabase>) -> Self {
        Self {
            store: MemoryStore { binding },
        }
    }
}

#[async_trait]
impl ResourceRepository for MemoryResourceRepository {
    async fn create(&self, resource: &Resource) -> Result<()> {
        let exists = self
            .store
            .read(|t| t.resources.contains_key(&resource.id))
            .await?;
        if exists {
            return Err(CatalogError::Internal(format!("资源 ID 冲突: {}", resource.id)));
        }
        self.store
            .write(vec![MemoryOp::PutResource(resource.clone())])
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Resource>> {
        self.store.read(|t| t.resources.get(id).cloned()).await
    }

    async fn list_by_owner(&self, owner_type: &str, owner_id: &str) -> Result<Vec<Resource>> {
        self.store
            .read(|t| {
                let mut owned: Vec<Resource> = t
                    .resources
                    .values()
                    .filter(|r| r.is_owned_by(owner_id, owner_type))
                    .cloned()
                    .collect();
                owned.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
                owned
            })
            .await
    }

    async fn make_permanent(
        &self,
        ids: &[String],
        owner_id: &str,
        owner_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let (unavailable, ops) = self
            .store
            .read(|t| {
                let mut unavailable = Vec::new();
                let mut ops = Vec::new();
                for id in ids {
                    match t.resources.get(id) {
                        Some(r) if r.can_promote_to(owner_id, owner_type, now) => {
                            let mut promoted = r.clone();
                            promoted.promote(owner_id, owner_type, now);
                            ops.push(MemoryOp::expect(r));
                            ops.push(MemoryOp::PutResource(promoted));
                        }
                        _ => unavailable.push(id.clone()),
                    }
                }
                (unavailable, ops)
            })
            .await?;

        if unavailable.is_empty() {
            self.store.write(ops).await?;
        }
        Ok(unavailable)
    }

    async fn get_expired(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Resource>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        self.store
            .read(|t| {
                let mut expired: Vec<Resource> = t
                    .resources
                    .values()
                    .filter(|r| r.is_expired(before))
                    .cloned()
                    .collect();
                expired.sort_by_key(|r| r.expires_at);
                expired.truncate(limit);
                expired
            })
            .await
    }

    async fn claim_expired(&self, id: &str, before: DateTime<Utc>) -> Result<Option<Resource>> {
        let claimed = self
            .store
            .read(|t| t.resources.get(id).filter(|r| r.is_expired(before)).cloned())
            .await?;
        if let Some(resource) = &claimed {
            self.store
                .write(vec![MemoryOp::expect(resource)])
                .await?;
        }
        Ok(claimed)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let exists = self.store.read(|t| t.resources.contains_key(id)).await?;
        if exists {
            self.store
                .write(vec![MemoryOp::DeleteResource(id.to_string())])
                .await?;
        }
        Ok(exists)
    }

    async fn delete_by_owner(&self, owner_type: &str, owner_id: &str) -> Result<Vec<Resource>> {
        let owned = self.list_by_owner(owner_type, owner_id).await?;
        self.store
            .write(
                owned
                    .iter()
                    .flat_map(|r| [MemoryOp::expect(r), MemoryOp::DeleteResource(r.id.clone())])
                    .collect(),
            )
            .await?;
        Ok(owned)
    }
}

// ==================== 分类仓储 ====================

pub struct MemoryCategoryRepository {
    store: MemoryStore,
    ids: MemoryDatabase,
}

impl MemoryCategoryRepository {
    /// `database` 用于分配分类 ID，与绑定的事务无关
    pub fn new(binding: Binding<MemoryDatabase>, database: MemoryDatabase) -> Self {
        Self {
            store: MemoryStore { binding },
            ids: database,
        }
    }
}

#[async_trait]
impl CategoryRepository for MemoryCategoryRepository {
    async fn create(&self, category: &NewCategory) -> Result<Category> {
        let taken = self
            .store
            .read(|t| t.categories.values().any(|c| c.name == category.name))
            .await?;
        if taken {
            return Err(CatalogError::CategoryNameTaken(category.name.clone()));
        }

        let now = Utc::now();
        let created = Category {
            id: self.ids.allocate_category_id(),
            name: category.name.clone(),
            description: category.description.clone(),
            sort_order: category.sort_order,
            created_at: now,
            updated_at: now,
        };
        self.store
            .write(vec![MemoryOp::PutCategory(created.clone())])
            .await?;
        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<Category>> {
        self.store.read(|t| t.categories.get(&id).cloned()).await
    }

    async fn list(&self) -> Result<Vec<Category>> {
        self.store
            .read(|t| {
                let mut categories: Vec<Category> = t.categories.values().cloned().collect();
                categories.sort_by_key(|c| (c.sort_order, c.id));
                categories
            })
            .await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let exists = self.store.read(|t| t.categories.contains_key(&id)).await?;
        if exists {
            self.store.write(vec![MemoryOp::DeleteCategory(id)]).await?;
        }
        Ok(exists)
    }
}

/// 在工作单元上注册内存仓储
pub fn register_memory_repositories(uow: &UnitOfWork<MemoryDatabase>) {
    uow.register_repository(RESOURCE_REPOSITORY, |binding| -> Arc<dyn ResourceRepository> {
        Arc::new(MemoryResourceRepository::new(binding))
    });

    let database = uow.backend().clone();
    uow.register_repository(CATEGORY_REPOSITORY, move |binding| -> Arc<dyn CategoryRepository> {
        Arc::new(MemoryCategoryRepository::new(binding, database.clone()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use storefront_shared::uow::TxContext;

    fn setup() -> (UnitOfWork<MemoryDatabase>, MemoryDatabase) {
        let db = MemoryDatabase::new();
        let uow = UnitOfWork::new(db.clone());
        register_memory_repositories(&uow);
        (uow, db)
    }

    fn temporary(now: DateTime<Utc>) -> Resource {
        Resource::new_temporary("a.png", None, 1, now, Duration::hours(1))
    }

    #[tokio::test]
    async fn test_transaction_writes_isolated_until_commit() {
        let (uow, db) = setup();
        let now = Utc::now();
        let resource = temporary(now);

        let tx = uow.begin(&TxContext::background()).await.unwrap();
        let repo = uow.repository(&tx, &RESOURCE_REPOSITORY).unwrap();
        repo.create(&resource).await.unwrap();

        // 事务内可见，事务外不可见
        assert!(repo.get(&resource.id).await.unwrap().is_some());
        assert!(db.resource(&resource.id).is_none());

        uow.commit(&tx).await.unwrap();
        assert!(db.resource(&resource.id).is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let (uow, db) = setup();
        let tx = uow.begin(&TxContext::background()).await.unwrap();
        let categories = uow.repository(&tx, &CATEGORY_REPOSITORY).unwrap();
        let created = categories
            .create(&NewCategory {
                name: "Shoes".to_string(),
                description: None,
                sort_order: 0,
            })
            .await
            .unwrap();

        uow.rollback(&tx).await.unwrap();
        assert!(db.category(created.id).is_none());
        assert_eq!(db.transactions_rolled_back(), 1);
    }

    #[tokio::test]
    async fn test_make_permanent_is_all_or_nothing() {
        let (uow, _) = setup();
        let now = Utc::now();
        let repo = uow
            .repository(&TxContext::background(), &RESOURCE_REPOSITORY)
            .unwrap();

        let fresh = temporary(now);
        let expired = Resource::new_temporary("b.png", None, 1, now - Duration::hours(2), Duration::hours(1));
        repo.create(&fresh).await.unwrap();
        repo.create(&expired).await.unwrap();

        let unavailable = repo
            .make_permanent(
                &[fresh.id.clone(), expired.id.clone(), "missing".to_string()],
                "1",
                "category",
                now,
            )
            .await
            .unwrap();
        assert_eq!(unavailable, vec![expired.id.clone(), "missing".to_string()]);
        assert!(repo.get(&fresh.id).await.unwrap().unwrap().is_temporary());
        assert!(repo.get(&expired.id).await.unwrap().unwrap().is_temporary());

        let unavailable = repo
            .make_permanent(&[fresh.id.clone()], "1", "category", now)
            .await
            .unwrap();
        assert!(unavailable.is_empty());
        let stored = repo.get(&fresh.id).await.unwrap().unwrap();
        assert!(stored.is_permanent());
        assert!(stored.is_consistent());
    }

    #[tokio::test]
    async fn test_get_expired_orders_and_limits() {
        let (uow, _) = setup();
        let now = Utc::now();
        let repo = uow
            .repository(&TxContext::background(), &RESOURCE_REPOSITORY)
            .unwrap();

        let mut expected = Vec::new();
        for hours_ago in [5, 3, 4] {
            let r = Resource::new_temporary("x.bin", None, 1, now - Duration::hours(hours_ago), Duration::hours(1));
            repo.create(&r).await.unwrap();
            expected.push((hours_ago, r.id));
        }
        repo.create(&temporary(now)).await.unwrap();

        let expired = repo.get_expired(now, 2).await.unwrap();
        assert_eq!(expired.len(), 2);
        expected.sort_by_key(|(h, _)| std::cmp::Reverse(*h));
        assert_eq!(expired[0].id, expected[0].1);
        assert_eq!(expired[1].id, expected[1].1);
    }

    #[tokio::test]
    async fn test_category_name_unique_and_ids_not_reused() {
        let (uow, _) = setup();
        let repo = uow
            .repository(&TxContext::background(), &CATEGORY_REPOSITORY)
            .unwrap();
        let new = NewCategory {
            name: "Hats".to_string(),
            description: Some("Headwear".to_string()),
            sort_order: 1,
        };

        let first = repo.create(&new).await.unwrap();
        assert!(matches!(
            repo.create(&new).await,
            Err(CatalogError::CategoryNameTaken(name)) if name == "Hats"
        ));

        assert!(repo.delete(first.id).await.unwrap());
        let second = repo.create(&new).await.unwrap();
        assert!(second.id > first.id);
        assert!(!repo.delete(9999).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_conflicts_with_concurrent_promotion() {
        let (uow, db) = setup();
        let now = Utc::now();
        let expired = Resource::new_temporary("c.png", None, 1, now - Duration::hours(2), Duration::hours(1));
        let unscoped = uow
            .repository(&TxContext::background(), &RESOURCE_REPOSITORY)
            .unwrap();
        unscoped.create(&expired).await.unwrap();

        let tx = uow.begin(&TxContext::background()).await.unwrap();
        let scoped = uow.repository(&tx, &RESOURCE_REPOSITORY).unwrap();
        assert!(scoped.claim_expired(&expired.id, now).await.unwrap().is_some());
        assert!(scoped.delete(&expired.id).await.unwrap());

        // 声明之后资源被另一路径改写
        let mut changed = db.resource(&expired.id).unwrap();
        changed.promote("7", "category", now + Duration::seconds(1));
        db.tables.write().resources.insert(changed.id.clone(), changed);

        assert!(uow.commit(&tx).await.is_err());
        assert!(db.resource(&expired.id).unwrap().is_permanent());
    }

    #[tokio::test]
    async fn test_promotion_conflicts_with_concurrent_delete() {
        let (uow, db) = setup();
        let now = Utc::now();
        let resource = temporary(now);
        let unscoped = uow
            .repository(&TxContext::background(), &RESOURCE_REPOSITORY)
            .unwrap();
        unscoped.create(&resource).await.unwrap();

        let tx = uow.begin(&TxContext::background()).await.unwrap();
        let scoped = uow.repository(&tx, &RESOURCE_REPOSITORY).unwrap();
        let unavailable = scoped
            .make_permanent(&[resource.id.clone()], "1", "category", now)
            .await
            .unwrap();
        assert!(unavailable.is_empty());

        // 转正事务提交前资源已在别处删除
        assert!(unscoped.delete(&resource.id).await.unwrap());

        assert!(uow.commit(&tx).await.is_err());
        assert!(db.resource(&resource.id).is_none());
    }

    #[tokio::test]
    async fn test_create_then_promote_in_one_transaction_commits() {
        let (uow, db) = setup();
        let now = Utc::now();
        let resource = temporary(now);

        let tx = uow.begin(&TxContext::background()).await.unwrap();
        let repo = uow.repository(&tx, &RESOURCE_REPOSITORY).unwrap();
        repo.create(&resource).await.unwrap();
        let unavailable = repo
            .make_permanent(&[resource.id.clone()], "1", "category", now)
            .await
            .unwrap();
        assert!(unavailable.is_empty());
        uow.commit(&tx).await.unwrap();

        assert!(db.resource(&resource.id).unwrap().is_permanent());
    }
}
