//! 内存对象存储
//!
//! 用于测试和本地开发，支持注入上传/删除失败来模拟存储故障。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ObjectStore, StorageError, validate_name};

const NO_LIMIT: usize = usize::MAX;

#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
    /// 剩余允许成功的上传次数，用尽后上传失败
    uploads_before_failure: AtomicUsize,
    fail_deletes: AtomicBool,
    delete_calls: AtomicUsize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            uploads_before_failure: AtomicUsize::new(NO_LIMIT),
            fail_deletes: AtomicBool::new(false),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// 再成功 `n` 次上传之后，后续上传全部失败
    pub fn fail_uploads_after(&self, n: usize) {
        self.uploads_before_failure.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 累计 delete 调用次数（含失败）
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_name(name)?;

        let allowed = self
            .uploads_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                NO_LIMIT => Some(NO_LIMIT),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(StorageError::Unavailable("injected upload failure".to_string()));
        }

        self.objects.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected delete failure".to_string()));
        }
        self.objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}
