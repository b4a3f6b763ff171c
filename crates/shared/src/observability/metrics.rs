//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "uow_transactions_total",
        "Total number of unit-of-work transactions by outcome"
    );
    metrics::describe_counter!(
        "compensations_total",
        "Total number of executed compensating actions"
    );

    metrics::describe_counter!("resource_uploads_total", "Total number of resource uploads");
    metrics::describe_histogram!(
        "resource_upload_bytes",
        "Size of uploaded resource payloads in bytes"
    );
    metrics::describe_counter!(
        "resource_promotions_total",
        "Total number of resources promoted to permanent"
    );

    metrics::describe_counter!(
        "reaper_resources_total",
        "Total number of resources handled by the reaper by outcome"
    );
    metrics::describe_histogram!(
        "reaper_sweep_duration_seconds",
        "Reaper sweep duration in seconds"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录事务结果（committed / rolled_back / commit_failed）
#[inline]
pub fn record_transaction(outcome: &str) {
    metrics::counter!("uow_transactions_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录补偿动作执行结果
#[inline]
pub fn record_compensation(operation: &str, status: &str) {
    metrics::counter!(
        "compensations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录资源上传
#[inline]
pub fn record_resource_upload(status: &str, size_bytes: u64) {
    metrics::counter!("resource_uploads_total", "status" => status.to_string()).increment(1);
    if status == "success" {
        metrics::histogram!("resource_upload_bytes").record(size_bytes as f64);
    }
}

/// 记录资源转正
#[inline]
pub fn record_resource_promotion(owner_type: &str, count: usize) {
    metrics::counter!(
        "resource_promotions_total",
        "owner_type" => owner_type.to_string()
    )
    .increment(count as u64);
}

/// 记录一次清理扫描
#[inline]
pub fn record_reaper_sweep(reaped: usize, skipped: usize, failed: usize, duration_secs: f64) {
    metrics::counter!("reaper_resources_total", "outcome" => "reaped").increment(reaped as u64);
    metrics::counter!("reaper_resources_total", "outcome" => "skipped").increment(skipped as u64);
    metrics::counter!("reaper_resources_total", "outcome" => "failed").increment(failed as u64);
    metrics::histogram!("reaper_sweep_duration_seconds").record(duration_secs);
}

/// 更新后台任务最后运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
