//! Function instrumentation and the ambient instrumentation context.
//!
//! [`instrument`] and [`instrument_async`] wrap a single-argument function so
//! that every call runs inside its own span, classified as OK or ERROR from
//! the function's outcome. While the wrapped function runs, an ambient
//! [`InstrumentationContext`] (tracer, meter, logger, current span, and a
//! pre-serialized propagation carrier) is reachable from anywhere in the call
//! graph through [`get_instrumentation_helpers`], with no parameter
//! threading.
//!
//! # Ambient context
//!
//! The helpers ride on the OpenTelemetry [`Context`]: the synchronous extent
//! of a call sees them through a context guard, and async continuations see
//! them because the wrapped future is polled under the same context. Two
//! interleaved invocations therefore never observe each other's helpers,
//! and code running after the wrapped function returns observes none.
//!
//! # Classification
//!
//! - An `Err` return marks the span ERROR and records the error as an
//!   exception event (the `on_error` hook may substitute its own record);
//!   the error then propagates to the caller unchanged.
//! - An `Ok` return is OK unless an `is_successful` predicate says
//!   otherwise; either way the value passes through untouched and the
//!   `on_result` hook observes it. Classification never alters control flow.
//! - A panic is recorded as a synthesized "Unknown Error" exception and
//!   resumed unchanged.
//!
//! # Example
//!
//! ```no_run
//! use action_otel_lite::instrument::{instrument, InstrumentationConfig};
//!
//! fn greet(name: String) -> Result<String, std::convert::Infallible> {
//!     Ok(format!("hi {name}"))
//! }
//!
//! let wrapped = instrument(greet, InstrumentationConfig::new("greet"));
//! ```
//!
//! # Panics
//!
//! Wrapping panics when the configured span name is empty. A call panics
//! when telemetry is enabled but the SDK or the global telemetry API has not
//! been initialized. Both are programming errors of the surrounding setup,
//! not runtime conditions a handler could recover from.

use std::any::type_name;
use std::backtrace::Backtrace;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt as _;
use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::Meter;
use opentelemetry::trace::{
    FutureExt as OtelFutureExt, Link, SpanKind, Status, TraceContextExt, Tracer as _,
};
use opentelemetry::{Context, KeyValue};

use crate::api::{get_global_telemetry_api, TelemetryApi};
use crate::error::TelemetryError;
use crate::logging::{scoped_logger, ActionLogger};
use crate::propagation::{serialize_context_into_carrier_with, ContextCarrier};
use crate::runtime::{is_telemetry_enabled, runtime_action_metadata};
use crate::sdk::ensure_sdk_initialized;
use crate::span::{Exception, SpanHandle};

const UNKNOWN_ERROR_CODE: i64 = -1;
const UNKNOWN_ERROR_NAME: &str = "Unknown Error";

/// Callback computing the base context for a span from the call arguments.
pub type BaseContextFn<T> = Box<dyn Fn(&T) -> Context + Send + Sync>;

/// Predicate deciding whether a non-error result counts as a success.
pub type SuccessPredicate<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;

/// Hook observing the result of an instrumented call and its span.
pub type ResultHook<R> = Box<dyn Fn(&R, &SpanHandle) + Send + Sync>;

/// Hook observing an error; may return the exception record to attach to
/// the span instead of the default one.
pub type ErrorHook<E> = Box<dyn Fn(&E, &SpanHandle) -> Option<Exception> + Send + Sync>;

/// Configuration for [`instrument`] and [`instrument_async`].
pub struct InstrumentationConfig<T, R, E> {
    pub(crate) span_name: String,
    pub(crate) kind: Option<SpanKind>,
    pub(crate) attributes: Vec<KeyValue>,
    pub(crate) links: Vec<Link>,
    pub(crate) get_base_context: Option<BaseContextFn<T>>,
    pub(crate) is_successful: Option<SuccessPredicate<R>>,
    pub(crate) on_result: Option<ResultHook<R>>,
    pub(crate) on_error: Option<ErrorHook<E>>,
}

impl<T, R, E> InstrumentationConfig<T, R, E> {
    /// Create a configuration with the given span name.
    pub fn new(span_name: impl Into<String>) -> Self {
        Self {
            span_name: span_name.into(),
            kind: None,
            attributes: Vec::new(),
            links: Vec::new(),
            get_base_context: None,
            is_successful: None,
            on_result: None,
            on_error: None,
        }
    }

    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Add a span attribute. Caller attributes win over the computed
    /// `self.name` / `action.name` defaults on key conflicts.
    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Compute the base context from the call arguments instead of using
    /// the ambient active context.
    pub fn with_base_context(
        mut self,
        get: impl Fn(&T) -> Context + Send + Sync + 'static,
    ) -> Self {
        self.get_base_context = Some(Box::new(get));
        self
    }

    pub fn with_is_successful(
        mut self,
        predicate: impl Fn(&R) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_successful = Some(Box::new(predicate));
        self
    }

    pub fn with_on_result(
        mut self,
        hook: impl Fn(&R, &SpanHandle) + Send + Sync + 'static,
    ) -> Self {
        self.on_result = Some(Box::new(hook));
        self
    }

    pub fn with_on_error(
        mut self,
        hook: impl Fn(&E, &SpanHandle) -> Option<Exception> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }
}

/// Ambient context of one instrumented call.
pub struct InstrumentationContext {
    api: Arc<TelemetryApi>,
    logger: ActionLogger,
    span: SpanHandle,
    carrier: ContextCarrier,
}

impl InstrumentationContext {
    /// The library-managed tracer.
    pub fn tracer(&self) -> &BoxedTracer {
        self.api.tracer()
    }

    /// The library-managed meter.
    pub fn meter(&self) -> &Meter {
        self.api.meter()
    }

    /// Logger scoped to `<actionName>/<spanName>`.
    pub fn logger(&self) -> &ActionLogger {
        &self.logger
    }

    /// The span of the current operation.
    pub fn current_span(&self) -> &SpanHandle {
        &self.span
    }

    /// Carrier holding the serialized active context, ready to hand to
    /// downstream services.
    pub fn context_carrier(&self) -> &ContextCarrier {
        &self.carrier
    }
}

/// Shared handle to the ambient instrumentation context.
pub type InstrumentationHelpers = Arc<InstrumentationContext>;

/// Access the helpers for the current instrumented operation.
///
/// # Errors
///
/// - [`TelemetryError::TelemetryDisabled`] when the invocation has no
///   telemetry enabled.
/// - [`TelemetryError::NoInstrumentationContext`] when called outside any
///   instrumented function.
pub fn get_instrumentation_helpers() -> Result<InstrumentationHelpers, TelemetryError> {
    if !is_telemetry_enabled() {
        return Err(TelemetryError::TelemetryDisabled);
    }

    Context::current()
        .get::<InstrumentationHelpers>()
        .cloned()
        .ok_or(TelemetryError::NoInstrumentationContext)
}

/// Instruments a synchronous function.
///
/// Returns a function with the same signature. When telemetry is disabled
/// for the invocation the wrapper is a pure passthrough; this is checked on
/// every call, since enablement is decided per invocation.
pub fn instrument<T, R, E, F>(
    f: F,
    config: InstrumentationConfig<T, R, E>,
) -> impl Fn(T) -> Result<R, E>
where
    F: Fn(T) -> Result<R, E>,
    E: Display,
{
    assert_span_name(&config.span_name);

    move |args: T| {
        if !is_telemetry_enabled() {
            return f(args);
        }

        let (cx, span) = start_call(&config, &args);
        let _guard = cx.attach();

        match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
            Ok(Ok(value)) => Ok(finish_ok(&config, value, &span)),
            Ok(Err(error)) => Err(finish_err(&config, error, &span)),
            Err(payload) => {
                finish_panic(&config.span_name, &span, payload.as_ref());
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Instruments an asynchronous function.
///
/// The ambient context set up for the call is visible across every `await`
/// in the wrapped future, and only there: interleaved invocations keep
/// their own contexts.
pub fn instrument_async<T, R, E, F, Fut>(
    f: F,
    config: InstrumentationConfig<T, R, E>,
) -> impl Fn(T) -> BoxFuture<'static, Result<R, E>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    assert_span_name(&config.span_name);
    let config = Arc::new(config);

    move |args: T| {
        let f = f.clone();
        let config = Arc::clone(&config);

        async move {
            if !is_telemetry_enabled() {
                return f(args).await;
            }

            let (cx, span) = start_call(config.as_ref(), &args);

            // Creating the future can already run user code.
            let future = match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
                Ok(future) => future,
                Err(payload) => {
                    finish_panic(&config.span_name, &span, payload.as_ref());
                    panic::resume_unwind(payload)
                }
            };

            match AssertUnwindSafe(future.with_context(cx)).catch_unwind().await {
                Ok(Ok(value)) => Ok(finish_ok(config.as_ref(), value, &span)),
                Ok(Err(error)) => Err(finish_err(config.as_ref(), error, &span)),
                Err(payload) => {
                    finish_panic(&config.span_name, &span, payload.as_ref());
                    panic::resume_unwind(payload)
                }
            }
        }
        .boxed()
    }
}

fn assert_span_name(span_name: &str) {
    if span_name.trim().is_empty() {
        panic!("{}", TelemetryError::MissingSpanName);
    }
}

/// Abort the invocation on a violated call-time precondition.
fn expect_telemetry_ready() -> Arc<TelemetryApi> {
    if let Err(error) = ensure_sdk_initialized() {
        panic!("{error}");
    }

    match get_global_telemetry_api() {
        Ok(api) => api,
        Err(error) => panic!("{error}"),
    }
}

/// Default attributes first, caller attributes appended last so caller
/// values win on conflicting keys.
fn merge_attributes(span_name: &str, action_name: &str, custom: &[KeyValue]) -> Vec<KeyValue> {
    let mut merged = vec![
        KeyValue::new("self.name", span_name.to_owned()),
        KeyValue::new("action.name", action_name.to_owned()),
    ];

    for attribute in custom {
        match merged.iter_mut().find(|kv| kv.key == attribute.key) {
            Some(existing) => *existing = attribute.clone(),
            None => merged.push(attribute.clone()),
        }
    }

    merged
}

/// Start the span for one call and assemble the context carrying both the
/// span and the ambient helpers.
fn start_call<T, R, E>(
    config: &InstrumentationConfig<T, R, E>,
    args: &T,
) -> (Context, SpanHandle) {
    let api = expect_telemetry_ready();
    let meta = runtime_action_metadata();

    let base_cx = config
        .get_base_context
        .as_ref()
        .map(|get| get(args))
        .unwrap_or_else(Context::current);

    let mut builder = api
        .tracer()
        .span_builder(config.span_name.clone())
        .with_attributes(merge_attributes(
            &config.span_name,
            &meta.action_name,
            &config.attributes,
        ));

    if let Some(kind) = &config.kind {
        builder = builder.with_kind(kind.clone());
    }
    if !config.links.is_empty() {
        builder = builder.with_links(config.links.clone());
    }

    let otel_span = api.tracer().build_with_context(builder, &base_cx);
    let span_cx = base_cx.with_span(otel_span);

    let mut carrier = ContextCarrier::new();
    serialize_context_into_carrier_with(&mut carrier, &span_cx);

    let span = SpanHandle::from_context(span_cx.clone());
    let helpers: InstrumentationHelpers = Arc::new(InstrumentationContext {
        api,
        logger: scoped_logger(format!("{}/{}", meta.action_name, config.span_name), false),
        span: span.clone(),
        carrier,
    });

    (span_cx.with_value(helpers), span)
}

fn finish_ok<T, R, E>(config: &InstrumentationConfig<T, R, E>, result: R, span: &SpanHandle) -> R {
    // Without a predicate the result counts as successful: it didn't fail.
    let successful = config
        .is_successful
        .as_ref()
        .map_or(true, |predicate| predicate(&result));

    if successful {
        span.set_status(Status::Ok);
    } else {
        span.set_status(Status::error("marked unsuccessful by result predicate"));
    }

    if let Some(hook) = &config.on_result {
        hook(&result, span);
    }

    span.end();
    result
}

fn finish_err<T, R, E: Display>(
    config: &InstrumentationConfig<T, R, E>,
    error: E,
    span: &SpanHandle,
) -> E {
    span.set_status(Status::error(error.to_string()));

    let exception = config
        .on_error
        .as_ref()
        .and_then(|hook| hook(&error, span))
        .unwrap_or_else(|| Exception::new(type_name::<E>(), error.to_string()));
    span.record_exception(exception);

    span.end();
    error
}

fn finish_panic(span_name: &str, span: &SpanHandle, payload: &(dyn std::any::Any + Send)) {
    let message = if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    };

    span.set_status(Status::error(message.clone()));
    span.record_exception(
        Exception::new(
            UNKNOWN_ERROR_NAME,
            format!("unhandled error at span \"{span_name}\": {message}"),
        )
        .with_code(UNKNOWN_ERROR_CODE)
        .with_stacktrace(Backtrace::force_capture().to_string()),
    );
    span.end();
}
