//! Tracing bootstrap for the datawallet sync engine.
//!
//! [`init_tracing`] installs a `tracing_subscriber` registry with an
//! [`EnvFilter`] (honouring `RUST_LOG`) and a `fmt` layer. With the
//! `telemetry` feature enabled and standard OTel environment variables set,
//! spans are additionally exported over OTLP:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 RUST_LOG=datawallet_sync=debug my-app
//! ```
//!
//! `OTEL_SDK_DISABLED=true` turns export off regardless of the endpoint.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, otel_layer};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps exporters alive; drop it on shutdown to flush pending spans.
#[derive(Default)]
pub struct TracingGuard {
    #[cfg(feature = "telemetry")]
    _otel: Option<OtelGuard>,
}

/// Whether the environment asks for OTLP export.
///
/// `OTEL_SDK_DISABLED=true` wins. Otherwise an exporter endpoint, or an
/// `OTEL_TRACES_EXPORTER` other than `none`, turns export on.
pub fn otel_enabled() -> bool {
    let var = |name: &str| std::env::var(name).ok();

    if var("OTEL_SDK_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return false;
    }
    var("OTEL_EXPORTER_OTLP_ENDPOINT").is_some()
        || var("OTEL_TRACES_EXPORTER").is_some_and(|v| !v.eq_ignore_ascii_case("none"))
}

/// Install the global subscriber.
///
/// `default_directive` is used when `RUST_LOG` is unset (e.g. `"info"` or
/// `"datawallet_sync=debug,info"`). Calling this twice is harmless: the
/// second install is ignored.
pub fn init_tracing(service_name: &str, default_directive: &str) -> TracingGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));

    #[cfg(feature = "telemetry")]
    if otel_enabled() {
        if let Some((layer, guard)) = otel::otel_layer(service_name) {
            if registry.with(layer).try_init().is_err() {
                tracing::debug!("global subscriber already installed, keeping it");
            }
            return TracingGuard { _otel: Some(guard) };
        }
    }

    #[cfg(not(feature = "telemetry"))]
    let _ = service_name;

    if registry.try_init().is_err() {
        tracing::debug!("global subscriber already installed, keeping it");
    }
    TracingGuard::default()
}

/// Subscriber for tests: output goes through the libtest capture.
pub fn init_test_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// The span one synchronization of `identity` runs in.
///
/// Span names start with `sync.` so the exporter's sampler can classify them.
pub fn sync_span(identity: &str, scope: &str) -> tracing::Span {
    tracing::info_span!("sync.run", identity = %identity, scope = %scope)
}

/// The span one migration step runs in.
pub fn migration_span(axis: &'static str, version: u32) -> tracing::Span {
    tracing::info_span!("sync.migration", axis, version)
}
