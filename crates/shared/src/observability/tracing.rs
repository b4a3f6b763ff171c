//! 日志与分布式追踪
//!
//! 日志输出到 stdout，配置了 OTLP 端点时同时把 span 导出到采集器。

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// drop 时关闭 TracerProvider
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("关闭 TracerProvider 失败: {:?}", e);
        }
    }
}

pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let mut layers: Vec<BoxedLayer> = vec![output_layer(config.json_logs)];

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => {
            let provider = tracer_provider(config, endpoint)?;
            let tracer = provider.tracer(config.service_name.clone());
            layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
            Some(provider)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(
            std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(),
            &config.log_level,
        ))
        .try_init()?;

    Ok(TracingGuard { provider })
}

/// `RUST_LOG` 优先，其次是配置的级别，都不可用时退回 info
fn env_filter(rust_log: Option<&str>, log_level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(log_level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn output_layer(json: bool) -> BoxedLayer {
    if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    }
}

fn tracer_provider(config: &ObservabilityConfig, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
        config.sample_ratio(),
    )));

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(
            Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}
