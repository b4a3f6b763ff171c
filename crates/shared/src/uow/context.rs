//! 事务上下文
//!
//! 显式传递的作用域对象：可选的事务句柄加可选的截止时间。
//! 调用链上的每一层都接收 `&TxContext`，不依赖任何隐式的任务本地状态。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::backend::{TransactionBackend, TxHandle};
use crate::compensation::DeferredAction;
use crate::error::{Result, SharedError};

pub struct TxContext<B: TransactionBackend> {
    handle: Option<TxHandle<B>>,
    deadline: Option<Instant>,
}

impl<B: TransactionBackend> Clone for TxContext<B> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            deadline: self.deadline,
        }
    }
}

impl<B: TransactionBackend> Default for TxContext<B> {
    fn default() -> Self {
        Self::background()
    }
}

impl<B: TransactionBackend> std::fmt::Debug for TxContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("tx", &self.handle.as_ref().map(TxHandle::id))
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl<B: TransactionBackend> TxContext<B> {
    /// 不带事务、不带截止时间的根上下文
    pub fn background() -> Self {
        Self {
            handle: None,
            deadline: None,
        }
    }

    /// 设置相对截止时间，已有更早的截止时间时保留更早者
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| d <= Instant::now())
    }

    pub fn handle(&self) -> Option<&TxHandle<B>> {
        self.handle.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.handle.is_some()
    }

    /// 要求上下文携带事务
    pub fn require_transaction(&self) -> Result<&TxHandle<B>> {
        self.handle.as_ref().ok_or(SharedError::TransactionNotStarted)
    }

    /// 登记事务提交成功后执行的动作，回滚时动作被丢弃
    pub fn on_commit<F, Fut>(&self, label: impl Into<String>, action: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = self.require_transaction()?;
        handle.defer(DeferredAction::new(label, action));
        Ok(())
    }

    pub(crate) fn with_handle(&self, handle: TxHandle<B>) -> Self {
        Self {
            handle: Some(handle),
            deadline: self.deadline,
        }
    }
}
