//! 集成测试公共装配
//!
//! 内存数据库 + 内存对象存储 + 手动时钟，不依赖外部服务。

#![allow(dead_code)]

use std::sync::Arc;

use catalog_service::CatalogState;
use catalog_service::dto::UploadRequest;
use catalog_service::repository::{MemoryDatabase, register_memory_repositories};
use catalog_service::storage::{MemoryObjectStore, ObjectStore};
use chrono::{DateTime, Duration, TimeZone, Utc};
use storefront_shared::clock::ManualClock;
use storefront_shared::config::{ReaperConfig, ResourceConfig};
use storefront_shared::uow::{TxContext, UnitOfWork};

pub struct Harness {
    pub db: MemoryDatabase,
    pub clock: Arc<ManualClock>,
    pub state: CatalogState<MemoryDatabase>,
}

impl Harness {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let db = MemoryDatabase::new();
        let uow = Arc::new(UnitOfWork::new(db.clone()));
        register_memory_repositories(&uow);

        let clock = Arc::new(ManualClock::new(t0()));
        let state = CatalogState::new(uow, store, clock.clone(), ResourceConfig::default());
        Self { db, clock, state }
    }

    /// 时钟前进指定分钟数
    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }
}

/// 使用内存对象存储的装配
pub fn memory_harness() -> (Harness, Arc<MemoryObjectStore>) {
    let store = Arc::new(MemoryObjectStore::new());
    (Harness::new(store.clone()), store)
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn ctx() -> TxContext<MemoryDatabase> {
    TxContext::background()
}

pub fn png(name: &str) -> UploadRequest {
    UploadRequest::new(name, b"\x89PNG\r\n\x1a\n".to_vec()).with_content_type("image/png")
}

pub fn reaper_config() -> ReaperConfig {
    ReaperConfig {
        interval_secs: 3600,
        batch_size: 100,
        store_timeout_ms: 100,
        stop_timeout_secs: 1,
    }
}
