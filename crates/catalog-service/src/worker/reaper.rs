//! 过期资源清理 Worker
//!
//! 定期扫描已过期的临时资源，先删除存储对象，再删除记录。
//!
//! - 每个资源在独立的短事务中处理，单个资源失败不影响其余资源
//! - 处理前在事务内重新锁定记录（PostgreSQL 使用 `FOR UPDATE SKIP LOCKED`），
//!   已被转正或正在被转正的资源会被跳过
//! - 删除存储对象有独立的超时，挂起的存储调用不会阻塞整轮扫描

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use storefront_shared::clock::Clock;
use storefront_shared::config::ReaperConfig;
use storefront_shared::observability::metrics;
use storefront_shared::uow::{TransactionBackend, TxContext, UnitOfWork};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{CatalogError, Result};
use crate::models::Resource;
use crate::repository::RESOURCE_REPOSITORY;
use crate::storage::{ObjectStore, StorageError};

/// 单轮扫描结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub reaped: usize,
    /// 锁定时已不再是过期临时资源
    pub skipped: usize,
    pub failed: usize,
}

enum ReapOutcome {
    Reaped,
    Skipped,
}

/// 过期资源清理 Worker
pub struct Reaper<B: TransactionBackend> {
    uow: Arc<UnitOfWork<B>>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
}

impl<B: TransactionBackend> Reaper<B> {
    pub fn new(
        uow: Arc<UnitOfWork<B>>,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            uow,
            store,
            clock,
            config,
        }
    }

    /// 启动后台循环
    pub fn start(self) -> ReaperHandle {
        let stop_timeout = self.config.stop_timeout();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });

        ReaperHandle {
            shutdown: shutdown_tx,
            task,
            stop_timeout,
        }
    }

    /// 主循环：按固定间隔扫描，收到停止信号后退出
    ///
    /// 停止信号只在两轮扫描之间处理，正在进行的扫描会先完成。
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.config.interval(),
            batch_size = self.config.batch_limit(),
            store_timeout = ?self.config.store_timeout(),
            "Reaper 已启动"
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为停止
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "过期资源扫描出错");
                    }
                    metrics::set_worker_last_run("reaper");
                }
            }
        }

        info!("Reaper 已停止");
    }

    /// 执行一轮扫描
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let now = self.clock.now();

        let repo = self
            .uow
            .repository(&TxContext::background(), &RESOURCE_REPOSITORY)?;
        let expired = repo.get_expired(now, self.config.batch_limit()).await?;

        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };
        if expired.is_empty() {
            debug!("没有过期资源");
            return Ok(report);
        }

        for resource in &expired {
            match self.reap_one(resource, now).await {
                Ok(ReapOutcome::Reaped) => report.reaped += 1,
                Ok(ReapOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        resource_id = %resource.id,
                        code = e.error_code(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "清理过期资源失败，下轮重试"
                    );
                }
            }
        }

        metrics::record_reaper_sweep(
            report.reaped,
            report.skipped,
            report.failed,
            started.elapsed().as_secs_f64(),
        );
        info!(
            scanned = report.scanned,
            reaped = report.reaped,
            skipped = report.skipped,
            failed = report.failed,
            "过期资源扫描完成"
        );
        Ok(report)
    }

    async fn reap_one(&self, candidate: &Resource, now: DateTime<Utc>) -> Result<ReapOutcome> {
        self.uow
            .run(&TxContext::background(), |tx| async move {
                let repo = self.uow.repository(&tx, &RESOURCE_REPOSITORY)?;
                let Some(resource) = repo.claim_expired(&candidate.id, now).await? else {
                    debug!(resource_id = %candidate.id, "资源已转正或正被处理，跳过");
                    return Ok(ReapOutcome::Skipped);
                };

                self.delete_payload(&resource).await?;
                repo.delete(&resource.id).await?;
                debug!(resource_id = %resource.id, name = %resource.name, "过期资源已清理");
                Ok::<_, CatalogError>(ReapOutcome::Reaped)
            })
            .await
    }

    async fn delete_payload(&self, resource: &Resource) -> Result<()> {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, self.store.delete(&resource.name)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(StorageError::NotFound(_))) => {
                warn!(resource_id = %resource.id, name = %resource.name, "存储对象已不存在，仅删除记录");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CatalogError::StorageTimeout(resource.name.clone())),
        }
    }
}

/// 运行中的 Reaper 句柄
///
/// `stop` 消耗句柄，因此只能调用一次。
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    stop_timeout: Duration,
}

impl ReaperHandle {
    /// 发送停止信号并等待循环退出
    ///
    /// 等待超过 `stop_timeout` 时终止任务并返回 `ReaperStopTimeout`。
    pub async fn stop(mut self) -> Result<()> {
        // 接收端已退出时发送失败，任务随后自然结束
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(self.stop_timeout, &mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CatalogError::Internal(format!("Reaper 任务异常退出: {}", e))),
            Err(_) => {
                self.task.abort();
                warn!(timeout = ?self.stop_timeout, "Reaper 未能按时停止，已终止任务");
                Err(CatalogError::ReaperStopTimeout(self.stop_timeout))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
