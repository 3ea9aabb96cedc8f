//! Telemetry initialization.
//!
//! [`TelemetryGuard::init`] wires up the tracing subscriber (fmt layer,
//! optional OTLP layer) and the Prometheus listener, and flushes the
//! tracer provider on drop. The guard must outlive all traced code; the
//! lifecycle owner holds it for the life of `main`.

use tracing::info;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

use ncmcp_core::Settings;

use crate::error::{TelemetryError, TelemetryResult};

/// Observability settings, derived from the bridge configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP gRPC endpoint; `None` disables trace export entirely.
    pub otlp_endpoint: Option<String>,
    /// Trace sampling ratio (1.0 = always).
    pub sampling_ratio: f64,
    /// Prometheus listener port; `None` disables the exporter.
    pub prometheus_port: Option<u16>,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON log lines instead of the pretty format.
    pub json_logs: bool,
}

impl TelemetryConfig {
    /// Derive the telemetry block from the bridge settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            service_name: settings.otel_service_name.clone(),
            otlp_endpoint: settings.otel_exporter_otlp_endpoint.clone(),
            sampling_ratio: settings.otel_traces_sampler_arg,
            prometheus_port: settings.metrics_enabled.then_some(settings.metrics_port),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Guard owning the telemetry lifecycle. Dropping it flushes and shuts
/// down the tracer provider.
pub struct TelemetryGuard {
    config: TelemetryConfig,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
    _metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("service_name", &self.config.service_name)
            .field("otlp", &self.tracer_provider.is_some())
            .finish_non_exhaustive()
    }
}

impl TelemetryGuard {
    /// Initialize tracing, optional OTLP export, and the Prometheus
    /// listener.
    pub fn init(config: TelemetryConfig) -> TelemetryResult<Self> {
        let tracer_provider = config
            .otlp_endpoint
            .as_ref()
            .map(|endpoint| build_tracer_provider(&config, endpoint))
            .transpose()?;

        init_subscriber(&config, tracer_provider.as_ref())?;

        let metrics_handle = config
            .prometheus_port
            .map(|port| init_prometheus(port))
            .transpose()?;

        info!(
            service = %config.service_name,
            otlp = config.otlp_endpoint.is_some(),
            metrics_port = ?config.prometheus_port,
            "telemetry initialized"
        );

        Ok(Self {
            config,
            tracer_provider,
            _metrics_handle: metrics_handle,
        })
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = &self.tracer_provider {
            info!(service = %self.config.service_name, "flushing telemetry");
            if let Err(e) = provider.shutdown() {
                eprintln!("error shutting down tracer provider: {e}");
            }
        }
    }
}

fn init_subscriber(
    config: &TelemetryConfig,
    tracer_provider: Option<&opentelemetry_sdk::trace::SdkTracerProvider>,
) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::InvalidConfiguration(format!("invalid log level: {e}")))?;

    // Each layer combination needs its own full initialization path; the
    // subscriber type changes with every added layer.
    match (tracer_provider, config.json_logs) {
        (Some(provider), true) => {
            use opentelemetry::trace::TracerProvider;
            let otel_layer =
                tracing_opentelemetry::layer().with_tracer(provider.tracer("ncmcp-telemetry"));
            Registry::default()
                .with(env_filter)
                .with(otel_layer)
                .with(fmt::layer().with_target(true).json())
                .try_init()
                .map_err(|e| TelemetryError::Tracing(e.to_string()))
        }
        (Some(provider), false) => {
            use opentelemetry::trace::TracerProvider;
            let otel_layer =
                tracing_opentelemetry::layer().with_tracer(provider.tracer("ncmcp-telemetry"));
            Registry::default()
                .with(env_filter)
                .with(otel_layer)
                .with(fmt::layer().with_target(true))
                .try_init()
                .map_err(|e| TelemetryError::Tracing(e.to_string()))
        }
        (None, true) => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).json())
            .try_init()
            .map_err(|e| TelemetryError::Tracing(e.to_string())),
        (None, false) => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|e| TelemetryError::Tracing(e.to_string())),
    }
}

fn build_tracer_provider(
    config: &TelemetryConfig,
    endpoint: &str,
) -> TelemetryResult<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_sdk::Resource;

    let sampler = if (config.sampling_ratio - 1.0).abs() < f64::EPSILON {
        Sampler::AlwaysOn
    } else if config.sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sampling_ratio)
    };

    let resource = Resource::builder()
        .with_attributes(vec![opentelemetry::KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )])
        .build();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::OpenTelemetry(e.to_string()))?;

    Ok(SdkTracerProvider::builder()
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

fn init_prometheus(port: u16) -> TelemetryResult<metrics_exporter_prometheus::PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .map_err(|e| TelemetryError::InvalidConfiguration(format!("invalid metrics port: {e}")))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;

    info!(port, "Prometheus metrics endpoint started");
    Ok(handle)
}
