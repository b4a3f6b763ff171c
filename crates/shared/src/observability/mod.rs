//! 可观测性初始化
//!
//! 日志、追踪和 Prometheus 指标共用一份配置，进程启动时调用一次 [`init`]。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use serde::Deserialize;

const UNNAMED_SERVICE: &str = "unknown-service";

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，写入日志字段、span 资源和指标的 `service` 标签
    pub service_name: String,

    /// OTLP gRPC 端点，为空时不导出 span
    pub otlp_endpoint: Option<String>,

    /// span 采样比例，取值 0.0 ~ 1.0
    pub trace_sample_ratio: f64,

    pub metrics_enabled: bool,
    pub metrics_port: u16,

    /// 未设置 `RUST_LOG` 时使用的过滤指令
    pub log_level: String,

    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: UNNAMED_SERVICE.to_string(),
            otlp_endpoint: None,
            trace_sample_ratio: 1.0,
            metrics_enabled: true,
            metrics_port: 9090,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// 配置文件未指定服务名时使用给定的服务名
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        if self.service_name.is_empty() || self.service_name == UNNAMED_SERVICE {
            self.service_name = service_name.to_string();
        }
        self
    }

    fn sample_ratio(&self) -> f64 {
        if self.trace_sample_ratio.is_nan() {
            return 1.0;
        }
        self.trace_sample_ratio.clamp(0.0, 1.0)
    }
}

/// 持有追踪 provider 与指标导出任务，drop 时刷新尚未导出的 span
pub struct ObservabilityGuard {
    service_name: String,
    _metrics: Option<metrics::MetricsHandle>,
    tracing: Option<tracing::TracingGuard>,
}

impl ObservabilityGuard {
    /// 不持有任何资源，测试中使用
    pub fn empty() -> Self {
        Self {
            service_name: String::new(),
            _metrics: None,
            tracing: None,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.tracing.take() {
            info!(service = %self.service_name, "正在关闭可观测性组件");
            drop(guard);
        }
    }
}

/// 先初始化日志与追踪，再按配置启动指标导出
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    let metrics_handle = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        metrics_port = config.metrics_enabled.then_some(config.metrics_port),
        otlp_endpoint = ?config.otlp_endpoint,
        sample_ratio = config.sample_ratio(),
        "可观测性初始化完成"
    );

    Ok(ObservabilityGuard {
        service_name: config.service_name.clone(),
        _metrics: metrics_handle,
        tracing: Some(tracing_guard),
    })
}
