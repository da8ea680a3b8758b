//! Tracing subscriber initialization.
//!
//! One fmt layer for structured terminal logs, plus an optional
//! OpenTelemetry bridge. The binary maps its `-q`/`-v` flags to the
//! `default_filter` string; `RUST_LOG` wins when set.
//!
//! ```no_run
//! // Logs only
//! worklens_observe::tracing_setup::init_tracing("warn", false).unwrap();
//!
//! // Logs plus span export to stdout
//! worklens_observe::tracing_setup::init_tracing("info", true).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

/// Provider handle kept for [`shutdown_tracing`]; spans buffered in the
/// exporter are lost if the process exits without flushing it.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global subscriber.
///
/// The OTel layer uses a stdout exporter, which is what a local single-user
/// deployment can actually consume; an OTLP endpoint would slot in here if
/// one existed.
pub fn init_tracing(
    default_filter: &str,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    // `Layer` is implemented for `Option<L>`, so the disabled case is a no-op
    // layer rather than a second registry arm.
    let otel_layer = enable_otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("worklens");

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Ok(())
}

/// Flush buffered spans and shut the tracer provider down.
///
/// No-op when OTel was never enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
