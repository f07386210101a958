//! OTLP export behind the `telemetry` feature.

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider, ShouldSample};
use tracing_opentelemetry::OpenTelemetryLayer;

/// Ratio for spans outside the `sync.` namespace when
/// `OTEL_TRACES_SAMPLER_ARG` is unset or unparsable.
const DEFAULT_BACKGROUND_RATIO: f64 = 0.1;

/// Flushes and shuts down the tracer provider when dropped.
pub struct OtelGuard {
    provider: SdkTracerProvider,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("datawallet telemetry: OTLP shutdown failed: {e}");
        }
    }
}

/// Builds the OTLP layer for a registry, or `None` if export cannot start.
///
/// The batch exporter spawns onto the current Tokio runtime, so calling this
/// outside one returns `None` and the caller falls back to fmt-only output.
pub fn otel_layer<S>(service_name: &str) -> Option<(OpenTelemetryLayer<S, SdkTracer>, OtelGuard)>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    if tokio::runtime::Handle::try_current().is_err() {
        eprintln!("datawallet telemetry: no Tokio runtime, OTLP export disabled");
        return None;
    }

    let exporter = match SpanExporter::builder().with_tonic().build() {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("datawallet telemetry: OTLP exporter unavailable: {e}");
            return None;
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(SyncSampler::from_env())
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();
    global::set_tracer_provider(provider.clone());

    let layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("datawallet-sync"));
    Some((layer, OtelGuard { provider }))
}

/// Keeps whole synchronizations and thins out everything else.
///
/// A span is recorded when its parent was sampled, when it carries an error
/// status, or when its name starts with `sync.` (`sync.run`,
/// `sync.migration`, `sync.datawallet` and friends). Other root spans are
/// sampled by trace id at `background_ratio`.
#[derive(Debug, Clone)]
struct SyncSampler {
    background_ratio: f64,
}

impl SyncSampler {
    fn from_env() -> Self {
        let background_ratio = std::env::var("OTEL_TRACES_SAMPLER_ARG")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|r| (0.0..=1.0).contains(r))
            .unwrap_or(DEFAULT_BACKGROUND_RATIO);
        Self { background_ratio }
    }

    fn keep(trace_state: TraceState) -> SamplingResult {
        SamplingResult {
            decision: SamplingDecision::RecordAndSample,
            attributes: Vec::new(),
            trace_state,
        }
    }
}

impl ShouldSample for SyncSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        if let Some(parent) = parent_context.map(|cx| cx.span().span_context().clone()) {
            if parent.is_sampled() {
                return Self::keep(parent.trace_state().clone());
            }
        }

        let failed = attributes
            .iter()
            .any(|kv| kv.key.as_str() == "otel.status_code" && kv.value.as_str() == "ERROR");
        if failed || name.starts_with("sync.") {
            return Self::keep(TraceState::default());
        }

        Sampler::TraceIdRatioBased(self.background_ratio).should_sample(
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        )
    }
}
