//! 仓储注册表
//!
//! 按逻辑名称保存仓储工厂。工厂在启动时注册一次，之后每次查找都把
//! 工厂绑定到调用方当前的 [`Binding`]（事务内或共享连接）并返回新的仓储实例。
//!
//! ## 设计说明
//!
//! 键是带类型参数的 [`RepositoryKey<R>`]，查找结果直接是 `Arc<R>`，
//! 调用方不需要再做类型转换。注册表内部以类型擦除的方式存储工厂，
//! 查找时向下转型，名称相同但类型不同时返回 `RepositoryTypeMismatch`。
//!
//! ```ignore
//! pub const RESOURCES: RepositoryKey<dyn ResourceRepository> = RepositoryKey::new("resources");
//!
//! registry.register(RESOURCES, |binding| -> Arc<dyn ResourceRepository> {
//!     Arc::new(PgResourceRepository::new(binding))
//! });
//! let repo = registry.resolve(&RESOURCES, binding)?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::backend::{Binding, TransactionBackend};
use crate::error::{Result, SharedError};

/// 带类型的仓储键
pub struct RepositoryKey<R: ?Sized> {
    name: &'static str,
    _marker: PhantomData<fn() -> Arc<R>>,
}

impl<R: ?Sized> RepositoryKey<R> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<R: ?Sized> Clone for RepositoryKey<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: ?Sized> Copy for RepositoryKey<R> {}

impl<R: ?Sized> std::fmt::Debug for RepositoryKey<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RepositoryKey").field(&self.name).finish()
    }
}

type Factory<B, R> = Arc<dyn Fn(Binding<B>) -> Arc<R> + Send + Sync>;

struct Entry {
    repository_type: &'static str,
    factory: Box<dyn Any + Send + Sync>,
}

/// 仓储注册表
///
/// 启动阶段写入，运行阶段只读；读多写少，使用读写锁保护。
pub struct RepositoryRegistry<B: TransactionBackend> {
    entries: RwLock<HashMap<&'static str, Entry>>,
    _backend: PhantomData<fn() -> B>,
}

impl<B: TransactionBackend> Default for RepositoryRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: TransactionBackend> RepositoryRegistry<B> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            _backend: PhantomData,
        }
    }

    /// 注册仓储工厂
    ///
    /// 同名工厂已存在时会被替换。
    pub fn register<R, F>(&self, key: RepositoryKey<R>, factory: F)
    where
        R: ?Sized + Send + Sync + 'static,
        F: Fn(Binding<B>) -> Arc<R> + Send + Sync + 'static,
    {
        let factory: Factory<B, R> = Arc::new(factory);
        let entry = Entry {
            repository_type: std::any::type_name::<R>(),
            factory: Box::new(factory),
        };

        let previous = self.entries.write().insert(key.name(), entry);
        if previous.is_some() {
            warn!(repository = key.name(), "仓储工厂被重复注册，旧工厂已替换");
        } else {
            debug!(
                repository = key.name(),
                repository_type = std::any::type_name::<R>(),
                "注册仓储工厂"
            );
        }
    }

    /// 把工厂绑定到给定连接并返回仓储实例
    pub fn resolve<R>(&self, key: &RepositoryKey<R>, binding: Binding<B>) -> Result<Arc<R>>
    where
        R: ?Sized + Send + Sync + 'static,
    {
        let factory = {
            let entries = self.entries.read();
            let entry = entries
                .get(key.name())
                .ok_or_else(|| SharedError::RepositoryNotFound(key.name().to_string()))?;

            entry
                .factory
                .downcast_ref::<Factory<B, R>>()
                .cloned()
                .ok_or_else(|| SharedError::RepositoryTypeMismatch {
                    name: key.name().to_string(),
                    registered: entry.repository_type,
                    requested: std::any::type_name::<R>(),
                })?
        };

        Ok(factory(binding))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// 已注册的仓储名称
    pub fn registered_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.read().keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
