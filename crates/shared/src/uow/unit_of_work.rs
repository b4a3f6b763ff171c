//! 工作单元
//!
//! 持有事务后端和仓储注册表，对外提供 begin/commit/rollback 以及
//! 包装整个事务生命周期的 [`UnitOfWork::run`]。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use super::backend::{Binding, TransactionBackend, TxHandle};
use super::context::TxContext;
use super::registry::{RepositoryKey, RepositoryRegistry};
use crate::error::{Result, SharedError};
use crate::observability::metrics;

pub struct UnitOfWork<B: TransactionBackend> {
    backend: B,
    registry: RepositoryRegistry<B>,
}

impl<B: TransactionBackend> UnitOfWork<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registry: RepositoryRegistry::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &RepositoryRegistry<B> {
        &self.registry
    }

    /// 注册仓储工厂，必须在首次查找该仓储之前完成
    pub fn register_repository<R, F>(&self, key: RepositoryKey<R>, factory: F)
    where
        R: ?Sized + Send + Sync + 'static,
        F: Fn(Binding<B>) -> Arc<R> + Send + Sync + 'static,
    {
        self.registry.register(key, factory);
    }

    /// 获取仓储实例
    ///
    /// 上下文携带事务时仓储绑定到该事务，否则绑定到共享连接。
    pub fn repository<R>(&self, ctx: &TxContext<B>, key: &RepositoryKey<R>) -> Result<Arc<R>>
    where
        R: ?Sized + Send + Sync + 'static,
    {
        let binding = match ctx.handle() {
            Some(handle) => Binding::Scoped(handle.clone()),
            None => Binding::Unscoped(self.backend.connection()),
        };
        self.registry.resolve(key, binding)
    }

    /// 开启事务，返回携带事务句柄的新上下文
    pub async fn begin(&self, ctx: &TxContext<B>) -> Result<TxContext<B>> {
        if ctx.in_transaction() {
            return Err(SharedError::TransactionAlreadyStarted);
        }
        if ctx.is_expired() {
            return Err(SharedError::DeadlineExceeded);
        }

        let tx = match ctx.deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline, self.backend.begin())
                .await
                .map_err(|_| SharedError::DeadlineExceeded)??,
            None => self.backend.begin().await?,
        };

        let handle = TxHandle::new(tx);
        debug!(tx_id = %handle.id(), "事务已开启");
        Ok(ctx.with_handle(handle))
    }

    /// 提交事务，成功后执行通过 `on_commit` 登记的动作
    pub async fn commit(&self, ctx: &TxContext<B>) -> Result<()> {
        let handle = ctx.require_transaction()?;
        let tx = handle
            .take()
            .await
            .ok_or(SharedError::TransactionNotStarted)?;
        let deferred = handle.take_deferred();

        if let Err(e) = self.backend.commit(tx).await {
            error!(tx_id = %handle.id(), error = %e, "事务提交失败");
            metrics::record_transaction("commit_failed");
            return Err(e);
        }

        debug!(tx_id = %handle.id(), "事务已提交");
        metrics::record_transaction("committed");

        for action in deferred {
            let label = action.label().to_string();
            if let Err(e) = action.execute().await {
                warn!(tx_id = %handle.id(), action = %label, error = %e, "提交后动作执行失败");
            }
        }

        Ok(())
    }

    /// 回滚事务，丢弃所有提交后动作
    pub async fn rollback(&self, ctx: &TxContext<B>) -> Result<()> {
        let handle = ctx.require_transaction()?;
        let tx = handle
            .take()
            .await
            .ok_or(SharedError::TransactionNotStarted)?;

        let discarded = handle.take_deferred().len();
        if discarded > 0 {
            debug!(tx_id = %handle.id(), discarded, "事务回滚，丢弃提交后动作");
        }

        let result = self.backend.rollback(tx).await;
        metrics::record_transaction("rolled_back");
        debug!(tx_id = %handle.id(), "事务已回滚");
        result
    }

    /// 在事务中执行回调
    ///
    /// - 上下文已携带事务时直接内联执行，不开启嵌套事务
    /// - 回调返回错误：回滚并原样返回该错误
    /// - 回调 panic：先回滚再继续抛出 panic
    /// - 超过上下文截止时间：回滚并返回 `DeadlineExceeded`
    /// - 回调成功：提交，提交失败时返回提交错误
    pub async fn run<T, E, F, Fut>(&self, ctx: &TxContext<B>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(TxContext<B>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<SharedError>,
    {
        let tx_ctx = match self.begin(ctx).await {
            Ok(tx_ctx) => tx_ctx,
            Err(SharedError::TransactionAlreadyStarted) => {
                debug!("上下文已存在事务，内联执行");
                return f(ctx.clone()).await;
            }
            Err(e) => return Err(e.into()),
        };

        let guarded = AssertUnwindSafe(f(tx_ctx.clone())).catch_unwind();
        let outcome = match tx_ctx.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("事务执行超过截止时间，回滚");
                    self.rollback_after_failure(&tx_ctx).await;
                    return Err(SharedError::DeadlineExceeded.into());
                }
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(value)) => {
                self.commit(&tx_ctx).await?;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.rollback_after_failure(&tx_ctx).await;
                Err(e)
            }
            Err(panic) => {
                error!("事务回调发生 panic，回滚后继续抛出");
                self.rollback_after_failure(&tx_ctx).await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// 回滚失败只记录日志，不覆盖原始错误
    async fn rollback_after_failure(&self, ctx: &TxContext<B>) {
        match self.rollback(ctx).await {
            Ok(()) => {}
            // 回调内部已经手动结束了事务
            Err(SharedError::TransactionNotStarted) => {}
            Err(e) => error!(error = %e, "事务回滚失败"),
        }
    }
}
