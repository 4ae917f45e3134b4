//! Entrypoint instrumentation for runtime actions.
//!
//! [`instrument_entrypoint`] (and its async sibling) wrap the single
//! top-level handler of an action. Per invocation the wrapper:
//!
//! 1. derives the process-wide env flags from the inbound parameters
//!    (always, even when telemetry ends up disabled);
//! 2. passes through untouched when telemetry is disabled;
//! 3. runs the user's `initialize_telemetry` callback, wires diagnostics
//!    (which only take effect before the SDK starts), and initializes the
//!    SDK and the global telemetry API, all idempotently for warm
//!    containers;
//! 4. applies the configured integrations to patch the span and
//!    propagation configuration from the inbound request shape;
//! 5. infers the inbound trace-context carrier and makes the extracted
//!    context the root span's parent;
//! 6. hands off to the instrumentation core with a root span named
//!    `<actionName>/entrypoint` unless configured or patched otherwise.
//!
//! Setup failures (steps 3–5) are returned wrapped as an
//! entrypoint-instrumentation error with the original as source. Errors
//! from the handler itself pass through unchanged.
//!
//! # Example
//!
//! ```no_run
//! use action_otel_lite::entrypoint::{define_telemetry_config, instrument_entrypoint, TelemetryConfig};
//! use serde_json::{json, Value};
//!
//! fn main_handler(params: Value) -> Result<Value, action_otel_lite::Error> {
//!     Ok(json!({ "body": "ok" }))
//! }
//!
//! let config = define_telemetry_config(|_params, _is_development| {
//!     Ok(TelemetryConfig::default())
//! });
//!
//! let entrypoint = instrument_entrypoint(main_handler, config);
//! ```

use std::env;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt as _;
use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::Meter;
use opentelemetry::trace::{Link, SpanKind};
use opentelemetry::KeyValue;
use serde_json::Value;

use crate::api::{initialize_global_telemetry_api, TelemetryApiOverrides};
use crate::constants::{defaults, env_vars, params};
use crate::error::{Error, TelemetryError};
use crate::instrument::{instrument, instrument_async, InstrumentationConfig};
use crate::integrations::{apply_integrations, ConfigSnapshot, Integration};
use crate::logging::DiagnosticsConfig;
use crate::propagation::{get_propagated_context, PropagationConfig};
use crate::runtime::{is_development, is_telemetry_enabled, runtime_action_metadata};
use crate::sdk::{initialize_diagnostics, initialize_sdk, SdkConfig};
use crate::span::{Exception, SpanHandle};

/// What the user's `initialize_telemetry` callback produces: the SDK
/// configuration, optional tracer/meter overrides, and diagnostics wiring.
pub struct TelemetryConfig {
    pub sdk: SdkConfig,
    pub tracer: Option<BoxedTracer>,
    pub meter: Option<Meter>,
    pub diagnostics: Option<DiagnosticsConfig>,
}

impl TelemetryConfig {
    pub fn new(sdk: SdkConfig) -> Self {
        Self {
            sdk,
            tracer: None,
            meter: None,
            diagnostics: None,
        }
    }

    pub fn with_tracer(mut self, tracer: BoxedTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_meter(mut self, meter: Meter) -> Self {
        self.meter = Some(meter);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsConfig) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new(SdkConfig::default())
    }
}

type InitializeTelemetry = Box<dyn Fn(&Value, bool) -> Result<TelemetryConfig, Error> + Send + Sync>;
type SuccessPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type ResultHook = Arc<dyn Fn(&Value, &SpanHandle) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&Error, &SpanHandle) -> Option<Exception> + Send + Sync>;

/// Configuration for [`instrument_entrypoint`].
///
/// Created with [`define_telemetry_config`] and refined with the chainable
/// `with_*` methods.
pub struct EntrypointConfig {
    initialize_telemetry: InitializeTelemetry,
    integrations: Vec<Integration>,
    propagation: PropagationConfig,
    span_name: Option<String>,
    kind: Option<SpanKind>,
    attributes: Vec<KeyValue>,
    links: Vec<Link>,
    is_successful: Option<SuccessPredicate>,
    on_result: Option<ResultHook>,
    on_error: Option<ErrorHook>,
}

/// Helper to define the telemetry config for an entrypoint.
///
/// The callback runs at the start of every invocation, with the inbound
/// parameters and the development-mode flag, and returns the
/// [`TelemetryConfig`] to initialize the process with.
pub fn define_telemetry_config(
    initialize_telemetry: impl Fn(&Value, bool) -> Result<TelemetryConfig, Error>
        + Send
        + Sync
        + 'static,
) -> EntrypointConfig {
    EntrypointConfig {
        initialize_telemetry: Box::new(initialize_telemetry),
        integrations: Vec::new(),
        propagation: PropagationConfig::default(),
        span_name: None,
        kind: None,
        attributes: Vec::new(),
        links: Vec::new(),
        is_successful: None,
        on_result: None,
        on_error: None,
    }
}

impl EntrypointConfig {
    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.integrations.push(integration);
        self
    }

    pub fn with_integrations(mut self, integrations: impl IntoIterator<Item = Integration>) -> Self {
        self.integrations.extend(integrations);
        self
    }

    pub fn with_propagation(mut self, propagation: PropagationConfig) -> Self {
        self.propagation = propagation;
        self
    }

    /// Skip inbound context propagation for this entrypoint.
    pub fn skip_propagation(mut self) -> Self {
        self.propagation.skip = true;
        self
    }

    /// Explicit root span name, replacing `<actionName>/entrypoint`.
    pub fn with_span_name(mut self, span_name: impl Into<String>) -> Self {
        self.span_name = Some(span_name.into());
        self
    }

    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Replace the default success classification (see
    /// [`result_has_no_error_property`]).
    pub fn with_is_successful(
        mut self,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_successful = Some(Arc::new(predicate));
        self
    }

    pub fn with_on_result(
        mut self,
        hook: impl Fn(&Value, &SpanHandle) + Send + Sync + 'static,
    ) -> Self {
        self.on_result = Some(Arc::new(hook));
        self
    }

    pub fn with_on_error(
        mut self,
        hook: impl Fn(&Error, &SpanHandle) -> Option<Exception> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

/// Default success classification for entrypoints: actions commonly signal
/// failure by returning an object with an `error` property instead of
/// failing outright. Replace via
/// [`EntrypointConfig::with_is_successful`] when the convention doesn't
/// apply.
pub fn result_has_no_error_property(result: &Value) -> bool {
    !result
        .as_object()
        .is_some_and(|object| object.contains_key("error"))
}

fn stringify_param(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Derive the process-wide env flags from the inbound parameters.
/// Runs unconditionally, even when telemetry ends up disabled.
fn set_telemetry_env(inbound: &Value) {
    let enable = inbound
        .get(params::ENABLE_TELEMETRY)
        .map(stringify_param)
        .unwrap_or_else(|| "false".to_string())
        .to_lowercase();
    env::set_var(env_vars::ENABLE_TELEMETRY, enable);

    let log_level = inbound
        .get(params::LOG_LEVEL)
        .map(stringify_param)
        .unwrap_or_else(|| {
            if is_development() {
                "debug".to_string()
            } else {
                defaults::LOG_LEVEL.to_string()
            }
        });
    env::set_var(env_vars::LOG_LEVEL, log_level);

    // Don't leak details of the runtime environment unless asked to.
    if env::var(env_vars::RESOURCE_DETECTORS).is_err() {
        env::set_var(env_vars::RESOURCE_DETECTORS, "none");
    }
}

/// Telemetry setup and per-invocation config assembly. Everything in here
/// counts as the setup phase: failures are wrapped by the caller.
fn prepare_invocation(
    config: &EntrypointConfig,
    inbound: &Value,
) -> Result<InstrumentationConfig<Value, Value, Error>, Error> {
    let meta = runtime_action_metadata();

    let init = (config.initialize_telemetry)(inbound, meta.is_development)?;

    // Diagnostics only take effect when wired before the SDK starts.
    if let Some(diagnostics) = init.diagnostics {
        initialize_diagnostics(diagnostics);
    }

    initialize_sdk(init.sdk);
    initialize_global_telemetry_api(TelemetryApiOverrides {
        tracer: init.tracer,
        meter: init.meter,
    });

    let snapshot = ConfigSnapshot {
        span_name: config.span_name.clone(),
        attributes: config.attributes.clone(),
        links: config.links.clone(),
        propagation_skip: config.propagation.skip,
    };
    let patched = apply_integrations(&config.integrations, &snapshot, inbound)?;

    let propagation = PropagationConfig {
        skip: patched.propagation_skip,
        get_context_carrier: patched
            .get_context_carrier
            .or_else(|| config.propagation.get_context_carrier.clone()),
    };

    let span_name = patched.span_name.unwrap_or_else(|| {
        format!("{}/{}", meta.action_name, defaults::ENTRYPOINT_SPAN_NAME)
    });

    let mut call_config = InstrumentationConfig::<Value, Value, Error>::new(span_name)
        .with_base_context(move |args: &Value| get_propagated_context(args, &propagation));

    for attribute in patched.attributes {
        call_config = call_config.with_attribute(attribute);
    }
    for link in patched.links {
        call_config = call_config.with_link(link);
    }
    if let Some(kind) = config.kind.clone() {
        call_config = call_config.with_kind(kind);
    }

    call_config = match &config.is_successful {
        Some(predicate) => {
            let predicate = Arc::clone(predicate);
            call_config.with_is_successful(move |result: &Value| predicate(result))
        }
        None => call_config.with_is_successful(result_has_no_error_property),
    };

    if let Some(hook) = &config.on_result {
        let hook = Arc::clone(hook);
        call_config = call_config.with_on_result(move |result: &Value, span: &SpanHandle| {
            hook(result, span)
        });
    }

    call_config = match &config.on_error {
        Some(hook) => {
            let hook = Arc::clone(hook);
            call_config.with_on_error(move |error: &Error, span: &SpanHandle| hook(error, span))
        }
        None => call_config
            .with_on_error(|error: &Error, _span| Some(Exception::new("Error", error.to_string()))),
    };

    Ok(call_config)
}

fn setup_failed(source: Error) -> Error {
    Box::new(TelemetryError::EntrypointSetup { source })
}

/// Instruments the entrypoint of a runtime action.
///
/// To be used only with the action's `main` handler; nested functions take
/// [`instrument`](crate::instrument::instrument).
pub fn instrument_entrypoint<F>(
    f: F,
    config: EntrypointConfig,
) -> impl Fn(Value) -> Result<Value, Error>
where
    F: Fn(Value) -> Result<Value, Error>,
{
    move |inbound: Value| {
        set_telemetry_env(&inbound);

        if !is_telemetry_enabled() {
            // Passthrough if instrumentation is not enabled.
            return f(inbound);
        }

        // Setup happens at invocation time: runtime metadata and the
        // received parameters are not available earlier.
        let call_config = match prepare_invocation(&config, &inbound) {
            Ok(call_config) => call_config,
            Err(source) => return Err(setup_failed(source)),
        };

        // Errors from the handler itself bubble up unchanged.
        let wrapped = instrument(&f, call_config);
        wrapped(inbound)
    }
}

/// Instruments an asynchronous action entrypoint.
pub fn instrument_entrypoint_async<F, Fut>(
    f: F,
    config: EntrypointConfig,
) -> impl Fn(Value) -> BoxFuture<'static, Result<Value, Error>>
where
    F: Fn(Value) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Error>> + Send + 'static,
{
    let config = Arc::new(config);

    move |inbound: Value| {
        let f = f.clone();
        let config = Arc::clone(&config);

        async move {
            set_telemetry_env(&inbound);

            if !is_telemetry_enabled() {
                return f(inbound).await;
            }

            let call_config = match prepare_invocation(&config, &inbound) {
                Ok(call_config) => call_config,
                Err(source) => return Err(setup_failed(source)),
            };

            let wrapped = instrument_async(f, call_config);
            wrapped(inbound).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commerce::{commerce_webhooks, CommerceWebhooksConfig};
    use crate::integrations::InstrumentationPatch;
    use crate::sdk::is_sdk_initialized;
    use opentelemetry::trace::{Status, TraceId};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SimpleSpanProcessor};
    use sealed_test::prelude::*;
    use serde_json::json;

    const TRACE_ID: &str = "1234567890abcdef1234567890abcdef";
    const SPAN_ID: &str = "1234567890abcdef";

    fn handler(params: Value) -> Result<Value, Error> {
        Ok(json!({ "echo": params }))
    }

    fn test_config(exporter: &InMemorySpanExporter) -> EntrypointConfig {
        let exporter = exporter.clone();
        define_telemetry_config(move |_params, _is_development| {
            let sdk = SdkConfig::builder()
                .with_span_processor(SimpleSpanProcessor::new(Box::new(exporter.clone())))
                .build();
            Ok(TelemetryConfig::new(sdk))
        })
    }

    fn set_action_env() {
        env::set_var(env_vars::ACTION_NAME, "/ns/pkg/test-action");
        env::set_var(env_vars::NAMESPACE, "ns");
    }

    #[sealed_test]
    fn passthrough_when_disabled_still_sets_env() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(handler, test_config(&exporter));

        let result = entrypoint(json!({ "value": 1 })).unwrap();
        assert_eq!(result["echo"]["value"], 1);

        // Flags derived even though nothing was instrumented.
        assert_eq!(env::var(env_vars::ENABLE_TELEMETRY).unwrap(), "false");
        assert!(env::var(env_vars::LOG_LEVEL).is_ok());
        assert_eq!(env::var(env_vars::RESOURCE_DETECTORS).unwrap(), "none");

        assert!(!is_sdk_initialized());
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[sealed_test]
    fn instrumented_invocation_creates_root_span() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(handler, test_config(&exporter));

        let result = entrypoint(json!({ "ENABLE_TELEMETRY": true, "value": 7 })).unwrap();
        assert_eq!(result["echo"]["value"], 7);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "test-action/entrypoint");
        assert!(matches!(spans[0].status, Status::Ok));
    }

    #[sealed_test]
    fn enablement_flag_is_normalized_case_insensitively() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(handler, test_config(&exporter));

        entrypoint(json!({ "ENABLE_TELEMETRY": "TRUE" })).unwrap();
        assert_eq!(env::var(env_vars::ENABLE_TELEMETRY).unwrap(), "true");
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[sealed_test]
    fn warm_invocations_reuse_the_singletons() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(handler, test_config(&exporter));

        entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap();
        entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap();

        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
        assert!(is_sdk_initialized());
    }

    #[sealed_test]
    fn error_property_marks_the_root_span() {
        set_action_env();

        let failing = |_params: Value| -> Result<Value, Error> {
            Ok(json!({ "error": "declined", "statusCode": 400 }))
        };

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(failing, test_config(&exporter));

        // Nothing failed from the caller's point of view.
        let result = entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap();
        assert_eq!(result["error"], "declined");

        let spans = exporter.get_finished_spans().unwrap();
        assert!(matches!(spans[0].status, Status::Error { .. }));
    }

    #[sealed_test]
    fn non_object_results_never_trigger_the_heuristic() {
        set_action_env();

        let plain = |_params: Value| -> Result<Value, Error> { Ok(json!("error")) };

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(plain, test_config(&exporter));
        entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert!(matches!(spans[0].status, Status::Ok));
    }

    #[sealed_test]
    fn custom_success_predicate_replaces_the_heuristic() {
        set_action_env();

        let failing = |_params: Value| -> Result<Value, Error> {
            Ok(json!({ "error": "tolerated" }))
        };

        let exporter = InMemorySpanExporter::default();
        let config = test_config(&exporter).with_is_successful(|_result| true);
        let entrypoint = instrument_entrypoint(failing, config);

        entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert!(matches!(spans[0].status, Status::Ok));
    }

    #[sealed_test]
    fn setup_failure_is_wrapped_with_cause() {
        set_action_env();

        let config = define_telemetry_config(|_params, _is_development| {
            Err("telemetry init exploded".into())
        });
        let entrypoint = instrument_entrypoint(handler, config);

        let error = entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("failed to instrument entrypoint"));
        assert!(message.contains("telemetry init exploded"));
    }

    #[sealed_test]
    fn handler_errors_propagate_unchanged() {
        set_action_env();

        let failing = |_params: Value| -> Result<Value, Error> { Err("handler failed".into()) };

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(failing, test_config(&exporter));

        let error = entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap_err();
        assert_eq!(error.to_string(), "handler failed");

        let spans = exporter.get_finished_spans().unwrap();
        assert!(matches!(spans[0].status, Status::Error { .. }));
    }

    #[sealed_test]
    fn inbound_context_becomes_the_root_parent() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let entrypoint = instrument_entrypoint(handler, test_config(&exporter));

        entrypoint(json!({
            "ENABLE_TELEMETRY": true,
            "__ow_headers": {
                "traceparent": format!("00-{TRACE_ID}-{SPAN_ID}-01")
            }
        }))
        .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(
            spans[0].span_context.trace_id(),
            TraceId::from_hex(TRACE_ID).unwrap()
        );
    }

    #[sealed_test]
    fn explicit_span_name_wins_over_the_derived_one() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let config = test_config(&exporter).with_span_name("checkout");
        let entrypoint = instrument_entrypoint(handler, config);

        entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].name, "checkout");
    }

    #[sealed_test]
    fn integration_patches_apply_before_the_root_span() {
        set_action_env();

        let renamer = Integration::new("renamer", |ctx| {
            ctx.update_instrumentation_config(InstrumentationPatch {
                span_name: Some("patched-root".to_string()),
                ..Default::default()
            });
            Ok(())
        });

        let exporter = InMemorySpanExporter::default();
        let config = test_config(&exporter).with_integration(renamer);
        let entrypoint = instrument_entrypoint(handler, config);

        entrypoint(json!({ "ENABLE_TELEMETRY": true })).unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].name, "patched-root");
    }

    #[sealed_test]
    fn non_sampled_webhook_context_starts_a_linked_root_trace() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let config = test_config(&exporter)
            .with_integration(commerce_webhooks(CommerceWebhooksConfig::default()));
        let entrypoint = instrument_entrypoint(handler, config);

        entrypoint(json!({
            "ENABLE_TELEMETRY": true,
            "__ow_headers": {
                "traceparent": format!("00-{TRACE_ID}-{SPAN_ID}-00")
            }
        }))
        .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);

        // Fresh trace, linked to the non-sampled inbound one.
        assert_ne!(
            spans[0].span_context.trace_id(),
            TraceId::from_hex(TRACE_ID).unwrap()
        );
        let links = &spans[0].links.links;
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].span_context.trace_id(),
            TraceId::from_hex(TRACE_ID).unwrap()
        );
    }

    #[sealed_test]
    fn async_entrypoint_round_trip() {
        set_action_env();

        let exporter = InMemorySpanExporter::default();
        let config = test_config(&exporter);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let async_handler = |params: Value| async move {
                tokio::task::yield_now().await;
                Ok(json!({ "echo": params }))
            };

            let entrypoint = instrument_entrypoint_async(async_handler, config);
            let result = entrypoint(json!({ "ENABLE_TELEMETRY": true, "value": 3 }))
                .await
                .unwrap();
            assert_eq!(result["echo"]["value"], 3);
        });

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "test-action/entrypoint");
    }
}
