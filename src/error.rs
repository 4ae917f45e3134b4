//! Error types for action-otel-lite.
//!
//! The crate distinguishes precondition failures (telemetry machinery used
//! before it was initialized), configuration mistakes, setup-phase failures
//! that wrap an underlying cause, and integration patch failures. Errors from
//! wrapped handler functions are never converted into any of these;
//! they always propagate to the caller unchanged.

use thiserror::Error;

/// Boxed error type used by entrypoint handlers.
///
/// Matches the error shape of serverless runtime crates so setup failures and
/// handler failures can travel through the same return channel.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the telemetry machinery itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TelemetryError {
    /// The telemetry SDK has not been started for this process.
    #[error(
        "telemetry SDK not initialized: initialize it via an instrumented entrypoint \
         or `initialize_sdk` before using instrumentation"
    )]
    SdkNotInitialized,

    /// The global telemetry API (tracer + meter) has not been created.
    #[error(
        "global telemetry API not initialized: enable telemetry for this action and \
         instrument its entrypoint with `instrument_entrypoint`"
    )]
    ApiNotInitialized,

    /// Instrumentation helpers were requested while telemetry is disabled.
    #[error(
        "instrumentation helpers requested in an action without telemetry enabled: \
         set the `ENABLE_TELEMETRY` input parameter to `true`, otherwise \
         instrumentation will not work"
    )]
    TelemetryDisabled,

    /// Instrumentation helpers were requested outside any instrumented call.
    #[error("instrumentation helpers are only available inside an instrumented function")]
    NoInstrumentationContext,

    /// A span was requested but no span is active on the current context.
    #[error("no active span on the current context")]
    NoActiveSpan,

    /// An instrumented function was configured without a span name.
    #[error("span name is required and must not be empty")]
    MissingSpanName,

    /// Entrypoint telemetry setup failed before the handler could run.
    #[error("failed to instrument entrypoint: {source}")]
    EntrypointSetup {
        #[source]
        source: Error,
    },

    /// An integration patch hook failed; no further integrations were applied.
    #[error("failed to apply integration \"{name}\" to the telemetry configuration: {source}")]
    Integration {
        name: String,
        #[source]
        source: Error,
    },

    /// The lazy metrics factory could not run.
    #[error("failed to initialize metrics: {source}")]
    MetricsInit {
        #[source]
        source: Box<TelemetryError>,
    },

    /// A metrics registry was accessed from inside its own factory.
    #[error(
        "circular metrics initialization detected in `{registry}`: do not read metrics \
         inside the `define_metrics` factory, only create and return them"
    )]
    MetricsCycle { registry: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_and_missing_context_messages_differ() {
        let disabled = TelemetryError::TelemetryDisabled.to_string();
        let missing = TelemetryError::NoInstrumentationContext.to_string();
        assert_ne!(disabled, missing);
        assert!(disabled.contains("ENABLE_TELEMETRY"));
        assert!(missing.contains("instrumented function"));
    }

    #[test]
    fn integration_error_names_the_integration() {
        let err = TelemetryError::Integration {
            name: "commerce-webhooks".to_string(),
            source: "boom".into(),
        };
        let message = err.to_string();
        assert!(message.contains("commerce-webhooks"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn entrypoint_setup_preserves_cause() {
        let err = TelemetryError::EntrypointSetup {
            source: "telemetry init exploded".into(),
        };
        assert!(err.to_string().contains("telemetry init exploded"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
