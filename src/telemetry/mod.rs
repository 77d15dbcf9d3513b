//! Tracing setup for the notification client.
//!
//! Console output is plain text or JSON lines. When `otel.enabled` is set,
//! spans from the socket session, REST calls and the notification center are
//! also exported over OTLP/gRPC.
//!
//! | Variable | Effect | Default |
//! |----------|--------|---------|
//! | `RUST_LOG` | Overrides `logging.filter` | unset |
//! | `ARA__LOGGING__FORMAT` | `plain` or `json` | `plain` |
//! | `ARA__OTEL__ENABLED` | Export spans over OTLP | `false` |
//! | `ARA__OTEL__ENDPOINT` | Collector address | `http://localhost:4317` |
//! | `ARA__OTEL__SAMPLING_RATIO` | Fraction of traces kept | `1.0` |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig, OtelConfig};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("OTLP exporter: {0}")]
    Exporter(String),
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Flushes exported spans when dropped
pub struct TelemetryGuard {
    provider: Option<TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to flush spans: {}", e);
            }
        }
    }
}

/// Install the global subscriber; call once at startup
pub fn init_telemetry(
    logging: &LoggingConfig,
    otel: &OtelConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    // Exactly one of the two console layers is present
    let (json, plain) = match logging.format {
        LogFormat::Json => (Some(fmt::layer().json().with_current_span(true)), None),
        LogFormat::Plain => (None, Some(fmt::layer().with_target(false))),
    };

    let provider = otel.enabled.then(|| build_provider(otel)).transpose()?;
    let export = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(otel.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .with(export)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

    match &provider {
        Some(_) => tracing::info!(
            endpoint = %otel.endpoint,
            sampling_ratio = otel.sampling_ratio,
            "Exporting spans over OTLP"
        ),
        None => tracing::debug!(format = ?logging.format, "Console logging only"),
    }

    Ok(TelemetryGuard { provider })
}

fn build_provider(otel: &OtelConfig) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otel.endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let resource = Resource::new([
        KeyValue::new(SERVICE_NAME, otel.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ]);

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler_for(otel.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build())
}

fn sampler_for(ratio: f64) -> Sampler {
    match ratio {
        r if r >= 1.0 => Sampler::AlwaysOn,
        r if r > 0.0 => Sampler::TraceIdRatioBased(r),
        // Also covers NaN
        _ => Sampler::AlwaysOff,
    }
}
