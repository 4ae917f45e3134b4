//! Telemetry SDK lifecycle: initialization, diagnostics, and shutdown.
//!
//! The SDK (a tracer provider, a meter provider, and the composite
//! propagator) is process-wide state with a strict lifecycle:
//!
//! 1. [`initialize_diagnostics`] (optional) must run before the SDK starts;
//!    once the SDK is up the diagnostics wiring cannot change.
//! 2. [`initialize_sdk`] builds and installs the providers. It is
//!    idempotent: a second call warns and keeps the running SDK. On a start
//!    failure the handle is left unset so a later attempt can retry.
//! 3. [`shutdown_sdk`] flushes and stops the providers. It is idempotent and
//!    best-effort: failures are logged, never returned, because it also
//!    runs from signal handlers where nothing can observe an error.
//!
//! Termination signals (SIGTERM/SIGINT) trigger a shutdown automatically
//! when a tokio runtime is available at initialization time.
//!
//! # Configuration
//!
//! [`SdkConfig`] follows the builder pattern. With no customization the SDK
//! exports spans through a stdout OTLP exporter, which suits short-lived
//! actions whose platform captures structured output:
//!
//! ```no_run
//! use action_otel_lite::sdk::{initialize_sdk, SdkConfig};
//!
//! initialize_sdk(SdkConfig::default());
//! ```
//!
//! Custom span processors and metric readers can be attached:
//!
//! ```no_run
//! use action_otel_lite::sdk::{initialize_sdk, SdkConfig};
//! use opentelemetry_sdk::trace::SimpleSpanProcessor;
//! use otlp_stdout_span_exporter::OtlpStdoutSpanExporter;
//!
//! let config = SdkConfig::builder()
//!     .with_span_processor(SimpleSpanProcessor::new(
//!         Box::new(OtlpStdoutSpanExporter::default()),
//!     ))
//!     .build();
//!
//! initialize_sdk(config);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use bon::Builder;
use opentelemetry::global;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::reader::MetricReader;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{
    BatchSpanProcessor, SdkTracerProvider, SimpleSpanProcessor, SpanProcessor,
    TracerProviderBuilder,
};
use opentelemetry_sdk::Resource;
use otlp_stdout_span_exporter::OtlpStdoutSpanExporter;
use tracing_subscriber::layer::SubscriberExt;

use crate::error::{Error, TelemetryError};
use crate::logging::{self, DiagnosticsConfig, Logger};
use crate::runtime::{is_development, runtime_resource};

static LOGGER: Logger = Logger::const_new("sdk");

static SDK: RwLock<Option<SdkHandle>> = RwLock::new(None);
static SHUTDOWN_HOOKS_REGISTERED: AtomicBool = AtomicBool::new(false);

struct SdkHandle {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

/// Built-in exporter presets, selecting the span processor and exporter
/// pair when no explicit span processor is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterPreset {
    /// OTLP records on stdout via a simple processor. Spans are delivered
    /// before the invocation returns; the default for actions.
    Stdout,

    /// OTLP over HTTP via a batch processor. Requires a reachable
    /// collector endpoint.
    Otlp,
}

type MeterBuilderOp = Box<dyn FnOnce(MeterProviderBuilder) -> MeterProviderBuilder + Send>;

/// Configuration for SDK initialization.
///
/// Use `SdkConfig::default()` for the standard action setup, or the builder
/// for custom processors, readers, propagators, resources, and presets.
#[derive(Builder)]
pub struct SdkConfig {
    #[builder(field)]
    provider_builder: TracerProviderBuilder,

    #[builder(field)]
    meter_builder_ops: Vec<MeterBuilderOp>,

    #[builder(field)]
    has_span_processor: bool,

    #[builder(field)]
    propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>,

    /// Exporter preset used when no explicit span processor was added.
    ///
    /// Default: [`ExporterPreset::Stdout`]
    pub preset: Option<ExporterPreset>,

    /// Custom resource for all signals.
    ///
    /// Default: `None` (inferred from the runtime environment)
    pub resource: Option<Resource>,

    /// Also print spans and events to the console. Defaults to the
    /// development-mode flag; adds overhead in production.
    pub enable_fmt_layer: Option<bool>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for SdkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkConfig")
            .field("has_span_processor", &self.has_span_processor)
            .field("metric_readers", &self.meter_builder_ops.len())
            .field("propagators", &self.propagators.len())
            .field("preset", &self.preset)
            .finish_non_exhaustive()
    }
}

/// Builder methods for span processors, metric readers, and propagators.
impl<S: sdk_config_builder::State> SdkConfigBuilder<S> {
    /// Add a span processor to the tracer provider. Can be called multiple
    /// times; adding one disables the exporter preset.
    pub fn with_span_processor<T>(mut self, processor: T) -> Self
    where
        T: SpanProcessor + 'static,
    {
        self.provider_builder = self.provider_builder.with_span_processor(processor);
        self.has_span_processor = true;
        self
    }

    /// Add a metric reader to the meter provider. Without any reader the
    /// meter provider records nothing, which keeps metrics opt-in.
    pub fn with_metric_reader<T>(mut self, reader: T) -> Self
    where
        T: MetricReader + 'static,
    {
        self.meter_builder_ops
            .push(Box::new(move |builder| builder.with_reader(reader)));
        self
    }

    /// Add a propagator. Multiple propagators are combined into a composite
    /// propagator. The default is the W3C trace-context propagator.
    pub fn with_propagator<T>(mut self, propagator: T) -> Self
    where
        T: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagators.push(Box::new(propagator));
        self
    }
}

/// Ensure the telemetry SDK is initialized.
///
/// # Errors
///
/// Fails with [`TelemetryError::SdkNotInitialized`] when it is not.
pub fn ensure_sdk_initialized() -> Result<(), TelemetryError> {
    if is_sdk_initialized() {
        Ok(())
    } else {
        Err(TelemetryError::SdkNotInitialized)
    }
}

/// Whether the telemetry SDK is currently initialized.
pub fn is_sdk_initialized() -> bool {
    SDK.read().map(|slot| slot.is_some()).unwrap_or(false)
}

/// Initialize the diagnostics channel.
///
/// Must be called before [`initialize_sdk`]; if the SDK is already started
/// this call warns and does nothing, since the wiring only takes effect
/// pre-start.
pub fn initialize_diagnostics(config: DiagnosticsConfig) {
    if is_sdk_initialized() {
        LOGGER.warn("telemetry SDK already initialized, skipping diagnostics initialization");
        return;
    }

    logging::set_diagnostics(config);
}

/// Initialize the telemetry SDK.
///
/// Idempotent: if an SDK is already running this call warns and keeps it.
/// Start failures are logged and leave the handle unset, so a subsequent
/// initialization attempt is possible.
pub fn initialize_sdk(config: SdkConfig) {
    if is_sdk_initialized() {
        LOGGER.warn("telemetry SDK already initialized, skipping telemetry initialization");
        return;
    }

    match build_sdk(config) {
        Ok(handle) => {
            if let Ok(mut slot) = SDK.write() {
                *slot = Some(handle);
            }
            LOGGER.info("telemetry SDK started successfully");
            register_shutdown_hooks();
        }
        Err(error) => {
            LOGGER.error(format!(
                "failed to start the telemetry SDK, the action won't emit telemetry data: {error}"
            ));
        }
    }
}

fn build_sdk(mut config: SdkConfig) -> Result<SdkHandle, Error> {
    if config.propagators.is_empty() {
        config
            .propagators
            .push(Box::new(TraceContextPropagator::new()));
    }

    let composite_propagator = TextMapCompositePropagator::new(config.propagators);
    global::set_text_map_propagator(composite_propagator);

    let mut provider_builder = config.provider_builder;
    if !config.has_span_processor {
        match config.preset.unwrap_or(ExporterPreset::Stdout) {
            ExporterPreset::Stdout => {
                let processor =
                    SimpleSpanProcessor::new(Box::new(OtlpStdoutSpanExporter::default()));
                provider_builder = provider_builder.with_span_processor(processor);
            }
            ExporterPreset::Otlp => {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .build()?;
                let processor = BatchSpanProcessor::builder(exporter).build();
                provider_builder = provider_builder.with_span_processor(processor);
            }
        }
    }

    let resource = config.resource.unwrap_or_else(runtime_resource);

    let tracer_provider = provider_builder.with_resource(resource.clone()).build();

    let meter_provider = config
        .meter_builder_ops
        .into_iter()
        .fold(SdkMeterProvider::builder().with_resource(resource), |b, op| {
            op(b)
        })
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    global::set_meter_provider(meter_provider.clone());

    install_subscriber(
        &tracer_provider,
        config.enable_fmt_layer.unwrap_or_else(is_development),
    );

    Ok(SdkHandle {
        tracer_provider,
        meter_provider,
    })
}

/// Install the tracing subscriber bridging `tracing` events into the
/// telemetry pipeline. Best-effort: a subscriber installed earlier in the
/// process (warm restarts, test harnesses) is kept.
fn install_subscriber(tracer_provider: &SdkTracerProvider, enable_fmt_layer: bool) {
    let tracer = tracer_provider.tracer(env!("CARGO_PKG_NAME"));
    let filter = tracing_subscriber::EnvFilter::new(logging::tracing_directive());

    let subscriber = tracing_subscriber::registry::Registry::default()
        .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
        .with(filter);

    let result = if enable_fmt_layer {
        tracing::subscriber::set_global_default(
            subscriber.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_ansi(false),
            ),
        )
    } else {
        tracing::subscriber::set_global_default(subscriber)
    };

    if result.is_err() {
        LOGGER.debug("a global tracing subscriber is already installed, keeping it");
    }
}

/// Register process-level shutdown hooks, at most once per process.
///
/// Requires an ambient tokio runtime; without one the hooks are skipped and
/// a later initialization may register them.
fn register_shutdown_hooks() {
    if SHUTDOWN_HOOKS_REGISTERED.swap(true, Ordering::SeqCst) {
        return;
    }

    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        LOGGER.debug("no async runtime available, termination hooks not registered");
        SHUTDOWN_HOOKS_REGISTERED.store(false, Ordering::SeqCst);
        return;
    };

    handle.spawn(async {
        if let Some(signal) = wait_for_termination().await {
            // The entrypoint normally shuts the SDK down when it finishes;
            // this is the fallback for killed processes.
            if is_sdk_initialized() {
                shutdown_sdk(Some(&format!("terminating process: {signal}")));
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_termination() -> Option<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok()?;
    let mut sigint = signal(SignalKind::interrupt()).ok()?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    Some(received)
}

#[cfg(not(unix))]
async fn wait_for_termination() -> Option<&'static str> {
    tokio::signal::ctrl_c().await.ok()?;
    Some("ctrl-c")
}

/// Shutdown the telemetry SDK.
///
/// Idempotent and best-effort. With no running SDK this logs a warning and
/// returns; shutdown failures are logged, never propagated.
pub fn shutdown_sdk(reason: Option<&str>) {
    let handle = SDK.write().ok().and_then(|mut slot| slot.take());

    let Some(handle) = handle else {
        LOGGER.warn("telemetry SDK not initialized, skipping telemetry shutdown");
        return;
    };

    LOGGER.info("shutting down the telemetry SDK, no more telemetry data will be emitted");
    if let Some(reason) = reason {
        LOGGER.info(format!("telemetry SDK shutdown reason: {reason}"));
    }

    let mut clean = true;

    if let Err(error) = handle.tracer_provider.shutdown() {
        clean = false;
        LOGGER.error(format!(
            "failed to shut down the tracer provider, spans may not be flushed: {error}"
        ));
    }

    if let Err(error) = handle.meter_provider.shutdown() {
        clean = false;
        LOGGER.error(format!(
            "failed to shut down the meter provider, metrics may not be flushed: {error}"
        ));
    }

    if clean {
        LOGGER.info("telemetry SDK shutdown successful");
    }
}

/// Drop the SDK handle without shutting the providers down. Intended for
/// tests that need a clean slate between runs.
pub fn reset_sdk() {
    if let Ok(mut slot) = SDK.write() {
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use sealed_test::prelude::*;

    #[sealed_test]
    fn ensure_fails_before_initialization() {
        assert!(matches!(
            ensure_sdk_initialized(),
            Err(TelemetryError::SdkNotInitialized)
        ));
        assert!(!is_sdk_initialized());
    }

    #[sealed_test]
    fn initialization_is_idempotent() {
        initialize_sdk(SdkConfig::default());
        assert!(is_sdk_initialized());

        // Second call warns and keeps the running SDK.
        initialize_sdk(SdkConfig::default());
        assert!(is_sdk_initialized());
        assert!(ensure_sdk_initialized().is_ok());
    }

    #[sealed_test]
    fn shutdown_is_idempotent_and_clears_the_handle() {
        initialize_sdk(SdkConfig::default());
        assert!(is_sdk_initialized());

        shutdown_sdk(Some("test teardown"));
        assert!(!is_sdk_initialized());

        // No handle left: warns instead of failing.
        shutdown_sdk(None);
        assert!(!is_sdk_initialized());
    }

    #[sealed_test]
    fn diagnostics_must_precede_the_sdk() {
        initialize_diagnostics(DiagnosticsConfig::new(LogLevel::Debug).with_export_logs(false));
        assert!(logging::diagnostics_snapshot().is_some());

        logging::reset_diagnostics();
        initialize_sdk(SdkConfig::default());

        // Too late now: the SDK is running.
        initialize_diagnostics(DiagnosticsConfig::new(LogLevel::Debug));
        assert!(logging::diagnostics_snapshot().is_none());
    }

    #[sealed_test]
    fn custom_processor_disables_preset() {
        let config = SdkConfig::builder()
            .with_span_processor(SimpleSpanProcessor::new(Box::new(
                OtlpStdoutSpanExporter::default(),
            )))
            .preset(ExporterPreset::Otlp)
            .build();

        assert!(config.has_span_processor);
        initialize_sdk(config);
        assert!(is_sdk_initialized());
    }

    #[sealed_test]
    fn config_defaults() {
        let config = SdkConfig::default();
        assert!(!config.has_span_processor);
        assert!(config.preset.is_none());
        assert!(config.resource.is_none());
        assert!(config.propagators.is_empty());
    }
}
