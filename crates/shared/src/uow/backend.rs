//! 事务后端抽象与事务句柄

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use uuid::Uuid;

use crate::compensation::DeferredAction;
use crate::error::{Result, SharedError};

/// 可开启事务的存储后端
///
/// PostgreSQL 连接池和测试用的内存数据库都实现此 trait，
/// 工作单元不关心具体的存储实现。
#[async_trait]
pub trait TransactionBackend: Send + Sync + 'static {
    /// 事务独占的连接
    type Transaction: Send + 'static;
    /// 无事务时使用的共享连接（通常是连接池）
    type Connection: Clone + Send + Sync + 'static;

    async fn begin(&self) -> Result<Self::Transaction>;

    async fn commit(&self, tx: Self::Transaction) -> Result<()>;

    async fn rollback(&self, tx: Self::Transaction) -> Result<()>;

    fn connection(&self) -> Self::Connection;
}

/// 锁定事务连接后得到的守卫，持有期间其他仓储无法使用同一事务
pub type TxGuard<B> = OwnedMappedMutexGuard<
    Option<<B as TransactionBackend>::Transaction>,
    <B as TransactionBackend>::Transaction,
>;

/// 活动事务的句柄
///
/// 句柄状态：活动（持有事务）→ 已结束（提交或回滚后事务被取出）。
/// 结束后任何锁定都返回 `TransactionNotStarted`。
pub struct TxHandle<B: TransactionBackend> {
    id: Uuid,
    tx: Arc<Mutex<Option<B::Transaction>>>,
    on_commit: Arc<SyncMutex<Vec<DeferredAction>>>,
}

impl<B: TransactionBackend> Clone for TxHandle<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            on_commit: self.on_commit.clone(),
        }
    }
}

impl<B: TransactionBackend> std::fmt::Debug for TxHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle").field("id", &self.id).finish()
    }
}

impl<B: TransactionBackend> TxHandle<B> {
    pub(crate) fn new(tx: B::Transaction) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx: Arc::new(Mutex::new(Some(tx))),
            on_commit: Arc::new(SyncMutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 锁定事务连接
    pub async fn lock(&self) -> Result<TxGuard<B>> {
        let guard: OwnedMutexGuard<Option<B::Transaction>> = self.tx.clone().lock_owned().await;
        OwnedMutexGuard::try_map(guard, |tx| tx.as_mut())
            .map_err(|_| SharedError::TransactionNotStarted)
    }

    /// 句柄是否仍持有未结束的事务
    pub async fn is_active(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    /// 取出事务，之后句柄进入已结束状态
    pub(crate) async fn take(&self) -> Option<B::Transaction> {
        self.tx.lock().await.take()
    }

    pub(crate) fn defer(&self, action: DeferredAction) {
        self.on_commit.lock().push(action);
    }

    pub(crate) fn take_deferred(&self) -> Vec<DeferredAction> {
        std::mem::take(&mut *self.on_commit.lock())
    }
}

/// 仓储绑定目标
///
/// 仓储工厂根据绑定决定语句在事务内执行还是直接使用共享连接。
pub enum Binding<B: TransactionBackend> {
    Unscoped(B::Connection),
    Scoped(TxHandle<B>),
}

impl<B: TransactionBackend> Clone for Binding<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Unscoped(conn) => Self::Unscoped(conn.clone()),
            Self::Scoped(handle) => Self::Scoped(handle.clone()),
        }
    }
}

impl<B: TransactionBackend> std::fmt::Debug for Binding<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unscoped(_) => f.write_str("Binding::Unscoped"),
            Self::Scoped(handle) => f.debug_tuple("Binding::Scoped").field(&handle.id()).finish(),
        }
    }
}

impl<B: TransactionBackend> Binding<B> {
    pub fn is_scoped(&self) -> bool {
        matches!(self, Self::Scoped(_))
    }
}
