//! Span handles and active-span helpers.
//!
//! OpenTelemetry stores the active span inside a [`Context`]. A [`SpanHandle`]
//! wraps such a context and exposes the span operations instrumentation code
//! needs (status, events, exceptions) without borrowing from the context, so
//! it can be cloned into hooks and the ambient instrumentation helpers.

use std::borrow::Cow;

use opentelemetry::trace::{SpanContext, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};

use crate::error::TelemetryError;

/// A structured exception record attached to a span.
///
/// Mirrors the semantic-convention `exception` event. The `code` field is an
/// extension used when an error cannot be classified further.
#[derive(Debug, Clone)]
pub struct Exception {
    pub name: String,
    pub message: String,
    pub stacktrace: Option<String>,
    pub code: Option<i64>,
}

impl Exception {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stacktrace: None,
            code: None,
        }
    }

    pub fn with_stacktrace(mut self, stacktrace: impl Into<String>) -> Self {
        self.stacktrace = Some(stacktrace.into());
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    fn into_event_attributes(self) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new("exception.type", self.name),
            KeyValue::new("exception.message", self.message),
        ];

        if let Some(stacktrace) = self.stacktrace {
            attributes.push(KeyValue::new("exception.stacktrace", stacktrace));
        }
        if let Some(code) = self.code {
            attributes.push(KeyValue::new("exception.code", code));
        }

        attributes
    }
}

/// Cloneable handle to the span carried by a [`Context`].
#[derive(Debug, Clone)]
pub struct SpanHandle {
    cx: Context,
}

impl SpanHandle {
    pub(crate) fn from_context(cx: Context) -> Self {
        Self { cx }
    }

    /// The context this handle points into.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Immutable span identifiers (trace id, span id, trace flags).
    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn is_recording(&self) -> bool {
        self.cx.span().is_recording()
    }

    pub fn set_status(&self, status: Status) {
        self.cx.span().set_status(status);
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    /// Records a standard error as an exception event.
    pub fn record_error(&self, error: &dyn std::error::Error) {
        self.cx.span().record_error(error);
    }

    /// Records a structured [`Exception`] as an exception event.
    pub fn record_exception(&self, exception: Exception) {
        self.cx
            .span()
            .add_event("exception", exception.into_event_attributes());
    }

    pub fn end(&self) {
        self.cx.span().end();
    }
}

/// Returns a handle to the span active on the current context.
///
/// # Errors
///
/// Fails with [`TelemetryError::NoActiveSpan`] when no span is active.
pub fn get_active_span() -> Result<SpanHandle, TelemetryError> {
    try_get_active_span().ok_or(TelemetryError::NoActiveSpan)
}

/// Returns a handle to the active span, or `None` when there is none.
pub fn try_get_active_span() -> Option<SpanHandle> {
    let cx = Context::current();
    cx.has_active_span().then(|| SpanHandle::from_context(cx))
}

/// Adds an event to the active span.
///
/// # Errors
///
/// Fails with [`TelemetryError::NoActiveSpan`] when no span is active.
pub fn add_event_to_active_span(
    name: impl Into<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
) -> Result<(), TelemetryError> {
    let span = get_active_span()?;
    span.add_event(name, attributes);
    Ok(())
}

/// Adds an event to the active span if one exists. Returns whether it did.
pub fn try_add_event_to_active_span(
    name: impl Into<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
) -> bool {
    match try_get_active_span() {
        Some(span) => {
            span.add_event(name, attributes);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};

    fn remote_context() -> Context {
        let span_context = SpanContext::new(
            TraceId::from_hex("1234567890abcdef1234567890abcdef").unwrap(),
            SpanId::from_hex("1234567890abcdef").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        Context::current().with_remote_span_context(span_context)
    }

    #[test]
    fn no_active_span_outside_any_context() {
        assert!(try_get_active_span().is_none());
        assert!(matches!(
            get_active_span(),
            Err(TelemetryError::NoActiveSpan)
        ));
        assert!(!try_add_event_to_active_span("event", Vec::new()));
    }

    #[test]
    fn handle_exposes_span_identifiers() {
        let cx = remote_context();
        let _guard = cx.attach();

        let span = get_active_span().expect("span should be active");
        assert_eq!(
            span.span_context().trace_id(),
            TraceId::from_hex("1234567890abcdef1234567890abcdef").unwrap()
        );
        assert!(span.span_context().is_remote());
    }

    #[test]
    fn exception_event_attributes() {
        let exception = Exception::new("Unknown Error", "boom")
            .with_stacktrace("at main")
            .with_code(-1);

        let attributes = exception.into_event_attributes();
        let keys: Vec<_> = attributes.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "exception.type",
                "exception.message",
                "exception.stacktrace",
                "exception.code"
            ]
        );
    }
}
