//! Trace-context propagation across process boundaries.
//!
//! Serverless actions call each other through queues, webhooks, and plain
//! HTTP, so the active trace context has to travel as data. This module
//! serializes the context into a flat string map (the carrier) with the
//! globally configured propagator, and extracts it again on the other side.
//!
//! The instrumented entrypoint does not require callers to put the carrier
//! in one fixed place. [`infer_context_carrier`] looks, in order, at:
//!
//! 1. the `x-telemetry-context` header of web invocations,
//! 2. the `__telemetryContext` input parameter,
//! 3. `data.__telemetryContext` for event-wrapped payloads,
//! 4. the raw inbound headers (W3C headers propagate there naturally).
//!
//! A string value found in 1–3 is parsed as JSON before being used. Older
//! callers depend on this exact precedence order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use opentelemetry::{global, Context};
use serde_json::Value;

use crate::constants::{headers, params};
use crate::logging::Logger;

static LOGGER: Logger = Logger::const_new("propagation");

/// Flat string map carrying serialized trace context.
pub type ContextCarrier = HashMap<String, String>;

/// Injects the current context into the given carrier.
///
/// The carrier is mutated in place: keys unrelated to propagation are
/// preserved.
pub fn serialize_context_into_carrier(carrier: &mut ContextCarrier) {
    serialize_context_into_carrier_with(carrier, &Context::current());
}

/// Injects an explicit context into the given carrier.
pub fn serialize_context_into_carrier_with(carrier: &mut ContextCarrier, cx: &Context) {
    global::get_text_map_propagator(|propagator| propagator.inject_context(cx, carrier));
}

/// Serializes the current context into a fresh carrier.
pub fn current_context_carrier() -> ContextCarrier {
    let mut carrier = ContextCarrier::new();
    serialize_context_into_carrier(&mut carrier);
    carrier
}

/// Extracts a context from the carrier, merging onto the current context.
/// The carrier is not modified.
pub fn deserialize_context_from_carrier(carrier: &ContextCarrier) -> Context {
    deserialize_context_from_carrier_onto(carrier, &Context::current())
}

/// Extracts a context from the carrier, merging onto an explicit base.
pub fn deserialize_context_from_carrier_onto(carrier: &ContextCarrier, base: &Context) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract_with_context(base, carrier))
}

/// Result of a carrier lookup: where the carrier was found (if anywhere)
/// and which context extraction should merge onto.
#[derive(Clone, Default)]
pub struct CarrierLookup {
    pub carrier: Option<ContextCarrier>,
    pub base_context: Option<Context>,
}

impl fmt::Debug for CarrierLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierLookup")
            .field("carrier", &self.carrier)
            .field("has_base_context", &self.base_context.is_some())
            .finish()
    }
}

/// Callback resolving the carrier from the inbound parameters.
pub type CarrierProvider = Arc<dyn Fn(&Value) -> CarrierLookup + Send + Sync>;

/// Configuration related to context propagation for entrypoints.
#[derive(Clone, Default)]
pub struct PropagationConfig {
    /// Skip inbound context propagation entirely and start from the
    /// ambient active context.
    pub skip: bool,

    /// Override where the carrier is looked up. Defaults to
    /// [`infer_context_carrier`].
    pub get_context_carrier: Option<CarrierProvider>,
}

impl fmt::Debug for PropagationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationConfig")
            .field("skip", &self.skip)
            .field("custom_carrier", &self.get_context_carrier.is_some())
            .finish()
    }
}

/// Collects the string-valued entries of a JSON object into a carrier.
pub(crate) fn value_as_carrier(value: &Value) -> Option<ContextCarrier> {
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .filter_map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
            .collect(),
    )
}

/// Infers the context carrier from the given action parameters.
pub fn infer_context_carrier(params: &Value) -> CarrierLookup {
    let headers = params.get(params::HEADERS);

    let explicit = headers
        .and_then(|h| h.get(headers::TELEMETRY_CONTEXT))
        .or_else(|| params.get(params::TELEMETRY_CONTEXT))
        .or_else(|| params.get(params::DATA)?.get(params::TELEMETRY_CONTEXT));

    let carrier = match explicit {
        Some(Value::String(serialized)) => match serde_json::from_str(serialized) {
            Ok(carrier) => Some(carrier),
            Err(error) => {
                // A malformed explicit carrier falls through to the header
                // fallback instead of failing the invocation.
                LOGGER.warn(format!("ignoring malformed telemetry context: {error}"));
                None
            }
        },
        Some(value) => value_as_carrier(value),
        None => None,
    };

    // W3C context propagated over the wire ends up in the request headers;
    // the propagator picks the relevant keys out of them.
    let carrier = carrier.or_else(|| headers.and_then(value_as_carrier));

    CarrierLookup {
        carrier,
        base_context: Some(Context::current()),
    }
}

/// Retrieves the base context for an entrypoint span.
pub fn get_propagated_context(params: &Value, config: &PropagationConfig) -> Context {
    if config.skip {
        return Context::current();
    }

    let lookup = match &config.get_context_carrier {
        Some(provider) => provider(params),
        None => infer_context_carrier(params),
    };

    let base = lookup.base_context.unwrap_or_else(Context::current);
    match lookup.carrier {
        Some(carrier) => deserialize_context_from_carrier_onto(&carrier, &base),
        None => base,
    }
}
