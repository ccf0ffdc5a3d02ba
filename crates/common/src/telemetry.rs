use crate::Environment;
use crate::config::env_parse;
use crate::logging::install_subscriber;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::attribute::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;

/// Export settings, from the standard `OTEL_*` variables where they exist.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    /// Fraction of root traces kept, `0.0..=1.0`
    pub sample_ratio: f64,
    pub metric_interval: Duration,
}

impl ExportSettings {
    pub fn from_env() -> Self {
        Self {
            sample_ratio: env_parse("OTEL_TRACES_SAMPLER_ARG", 1.0f64).clamp(0.0, 1.0),
            metric_interval: Duration::from_millis(env_parse(
                "OTEL_METRIC_EXPORT_INTERVAL",
                10_000u64,
            )),
        }
    }

    fn sampler(&self) -> Sampler {
        let root = if self.sample_ratio >= 1.0 {
            Sampler::AlwaysOn
        } else {
            Sampler::TraceIdRatioBased(self.sample_ratio)
        };
        Sampler::ParentBased(Box::new(root))
    }
}

/// Owns the OTLP trace and metric pipelines; dropping it flushes both.
///
/// The batch exporters run on the ambient Tokio runtime, which must outlive
/// the guard.
///
/// ```ignore
/// let _telemetry = TelemetryGuard::init("detection-worker", "http://otel-collector:4317", Environment::Production)?;
/// ```
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryGuard {
    /// Export traces and metrics to `endpoint`, then install the tracing
    /// subscriber (JSON in production, pretty otherwise) bridged to the tracer.
    pub fn init(
        service_name: &str,
        endpoint: &str,
        environment: Environment,
    ) -> anyhow::Result<Self> {
        let settings = ExportSettings::from_env();
        let resource = service_resource(service_name, environment);

        global::set_text_map_propagator(TraceContextPropagator::new());

        let tracer_provider = tracer_provider(endpoint, resource.clone(), &settings)?;
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = meter_provider(endpoint, resource, &settings)?;
        global::set_meter_provider(meter_provider.clone());

        let tracer = global::tracer(service_name.to_string());
        install_subscriber(environment, tracing_opentelemetry::layer().with_tracer(tracer));

        tracing::debug!(
            endpoint,
            sample_ratio = settings.sample_ratio,
            metric_interval_ms = settings.metric_interval.as_millis() as u64,
            "Telemetry export enabled"
        );

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }
}

fn service_resource(service_name: &str, environment: Environment) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, service_name.to_string()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.as_str()),
        ])
        .build()
}

fn tracer_provider(
    endpoint: &str,
    resource: Resource,
    settings: &ExportSettings,
) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(settings.sampler())
        .with_batch_exporter(exporter)
        .build())
}

fn meter_provider(
    endpoint: &str,
    resource: Resource,
    settings: &ExportSettings,
) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(settings.metric_interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("Failed to shutdown tracer provider: {:?}", e);
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("Failed to shutdown meter provider: {:?}", e);
        }
    }
}

/// Creates an info-level span and enters it.
#[macro_export]
macro_rules! span {
    ($name:literal) => {
        tracing::info_span!($name).entered()
    };
}

/// Creates a debug-level span and enters it.
#[macro_export]
macro_rules! span_debug {
    ($name:literal) => {
        tracing::debug_span!($name).entered()
    };
}
