//! 补偿日志
//!
//! 一个业务操作同时包含事务写入和外部副作用（写文件存储、调用第三方）时，
//! 数据库回滚无法撤销已经发生的外部副作用。每完成一步就把对应的撤销动作
//! 压入 `CompensationLog`，操作失败时按相反顺序执行，成功时直接丢弃。
//!
//! ```ignore
//! let mut compensations = CompensationLog::new("upload_resource");
//! store.upload(&name, &bytes).await?;
//! compensations.push(format!("删除存储对象 {name}"), move || async move {
//!     store.delete(&name).await.map_err(anyhow::Error::from)
//! });
//! let result = repo.create(&resource).await;
//! compensations.settle(result).await
//! ```

use std::fmt::Display;
use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::observability::metrics;

/// 延迟执行的异步动作
///
/// 补偿动作和事务提交后的回调共用这一结构。
pub struct DeferredAction {
    label: String,
    action: Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>,
}

impl DeferredAction {
    pub fn new<F, Fut>(label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            action: Box::new(move || Box::pin(action())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn execute(self) -> anyhow::Result<()> {
        (self.action)().await
    }
}

impl std::fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// 补偿执行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindReport {
    pub attempted: usize,
    pub failed: usize,
}

/// 单个操作范围内的补偿日志
#[derive(Debug)]
pub struct CompensationLog {
    operation: &'static str,
    actions: Vec<DeferredAction>,
    settled: bool,
}

impl CompensationLog {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            actions: Vec::new(),
            settled: false,
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// 登记一个撤销动作，应在对应步骤成功之后立即调用
    pub fn push<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let action = DeferredAction::new(label, action);
        debug!(
            operation = self.operation,
            action = action.label(),
            "登记补偿动作"
        );
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 操作成功，丢弃所有撤销动作
    pub fn disarm(mut self) {
        self.settled = true;
        let discarded = std::mem::take(&mut self.actions).len();
        if discarded > 0 {
            debug!(operation = self.operation, discarded, "操作成功，补偿日志已清空");
        }
    }

    /// 按登记的相反顺序执行所有撤销动作
    ///
    /// 单个动作失败只记录日志，不中断后续动作，也不向上传播。
    pub async fn unwind(mut self) -> UnwindReport {
        self.settled = true;
        let actions = std::mem::take(&mut self.actions);
        let mut report = UnwindReport::default();

        for action in actions.into_iter().rev() {
            report.attempted += 1;
            let label = action.label().to_string();
            match action.execute().await {
                Ok(()) => {
                    debug!(operation = self.operation, action = %label, "补偿动作执行成功");
                    metrics::record_compensation(self.operation, "succeeded");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        operation = self.operation,
                        action = %label,
                        error = %e,
                        "补偿动作执行失败，需要人工或清理任务介入"
                    );
                    metrics::record_compensation(self.operation, "failed");
                }
            }
        }

        if report.attempted > 0 {
            warn!(
                operation = self.operation,
                attempted = report.attempted,
                failed = report.failed,
                "操作失败，已执行补偿"
            );
        }

        report
    }

    /// 根据操作结果结算：成功则清空，失败则执行补偿并原样返回错误
    pub async fn settle<T, E: Display>(self, result: Result<T, E>) -> Result<T, E> {
        match result {
            Ok(value) => {
                self.disarm();
                Ok(value)
            }
            Err(e) => {
                debug!(operation = self.operation, error = %e, "操作失败，开始补偿");
                self.unwind().await;
                Err(e)
            }
        }
    }
}

impl Drop for CompensationLog {
    fn drop(&mut self) {
        if !self.settled && !self.actions.is_empty() {
            warn!(
                operation = self.operation,
                pending = self.actions.len(),
                "补偿日志未结算即被丢弃，外部副作用可能残留"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> Arc<parking_lot::Mutex<Vec<&'static str>>> {
        Arc::new(parking_lot::Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_unwind_runs_in_reverse_order() {
        let calls = recorder();
        let mut log = CompensationLog::new("test");

        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            log.push(name, move || async move {
                calls.lock().push(name);
                Ok(())
            });
        }
        assert_eq!(log.len(), 3);

        let report = log.unwind().await;
        assert_eq!(report, UnwindReport { attempted: 3, failed: 0 });
        assert_eq!(*calls.lock(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_failed_action_does_not_stop_unwind() {
        let calls = recorder();
        let mut log = CompensationLog::new("test");

        let first = calls.clone();
        log.push("first", move || async move {
            first.lock().push("first");
            Ok(())
        });
        log.push("broken", || async { Err(anyhow::anyhow!("store unavailable")) });

        let report = log.unwind().await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(*calls.lock(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_settle_ok_discards_actions() {
        let calls = recorder();
        let mut log = CompensationLog::new("test");
        let c = calls.clone();
        log.push("undo", move || async move {
            c.lock().push("undo");
            Ok(())
        });

        let result: Result<i32, String> = log.settle(Ok(7)).await;
        assert_eq!(result, Ok(7));
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_settle_err_unwinds_and_keeps_error() {
        let calls = recorder();
        let mut log = CompensationLog::new("test");
        let c = calls.clone();
        log.push("undo", move || async move {
            c.lock().push("undo");
            Ok(())
        });

        let result: Result<(), String> = log.settle(Err("insert failed".to_string())).await;
        assert_eq!(result, Err("insert failed".to_string()));
        assert_eq!(*calls.lock(), vec!["undo"]);
    }

    #[tokio::test]
    async fn test_empty_log_settles_quietly() {
        let log = CompensationLog::new("noop");
        assert!(log.is_empty());
        let report = log.unwind().await;
        assert_eq!(report, UnwindReport::default());
    }
}
