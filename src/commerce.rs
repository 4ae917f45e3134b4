//! Integrations for commerce-platform events and webhooks.
//!
//! Commerce systems propagate trace context in two different shapes:
//! webhooks carry W3C headers on the HTTP request, while asynchronous events
//! bury the carrier in the event payload's `_metadata`. Both integrations
//! resolve the remote span context up front and patch the entrypoint
//! configuration accordingly.
//!
//! Webhook subscriptions may be log-only: the upstream system still
//! propagates context but marks it non-sampled for log correlation. With a
//! parent-based sampler the action's trace would silently vanish. The
//! webhook integration therefore starts a fresh root trace in that case and
//! links it to the inbound one, unless `ensure_sampling` is turned off.

use opentelemetry::trace::{Link, SpanContext, TraceContextExt};
use opentelemetry::{Context, KeyValue};

use crate::constants::params;
use crate::integrations::{Integration, InstrumentationPatch, PropagationPatch};
use crate::propagation::{deserialize_context_from_carrier, value_as_carrier, CarrierLookup};

/// Configuration for the commerce webhooks integration.
#[derive(Debug, Clone)]
pub struct CommerceWebhooksConfig {
    /// Create a sampled root trace even when the inbound context is
    /// non-sampled, linking to it for correlation. Disable only if action
    /// tracing should follow the upstream subscription configuration.
    pub ensure_sampling: bool,
}

impl Default for CommerceWebhooksConfig {
    fn default() -> Self {
        Self {
            ensure_sampling: true,
        }
    }
}

/// The remote span context carried by the extracted context, if any.
fn try_extract_remote_span_context(cx: &Context) -> Option<SpanContext> {
    let span = cx.span();
    let span_context = span.span_context();

    (span_context.is_remote() && span_context.is_valid()).then(|| span_context.clone())
}

/// Some backends still don't support span links, so the trace id also goes
/// into a link attribute.
fn link_to_remote(span_context: SpanContext) -> Link {
    let trace_id = span_context.trace_id().to_string();
    Link::new(
        span_context,
        vec![KeyValue::new("commerce.traceid", trace_id)],
        0,
    )
}

/// An integration with commerce eventing.
///
/// Events are delivered asynchronously, so the inbound trace is not part of
/// the same execution: propagation is skipped and the remote trace is only
/// linked.
pub fn commerce_events() -> Integration {
    Integration::new("commerce-events", |ctx| {
        let metadata = ctx
            .params
            .get(params::DATA)
            .and_then(|data| data.get("_metadata"))
            .ok_or("missing `data._metadata` in commerce event parameters")?;
        let carrier =
            value_as_carrier(metadata).ok_or("`data._metadata` is not a string map")?;

        let propagated = deserialize_context_from_carrier(&carrier);
        let span_context = try_extract_remote_span_context(&propagated);

        ctx.update_instrumentation_config(InstrumentationPatch {
            propagation: Some(PropagationPatch {
                skip: Some(true),
                get_context_carrier: None,
            }),
            links: Some(span_context.map(link_to_remote).into_iter().collect()),
            ..Default::default()
        });

        Ok(())
    })
}

/// An integration with commerce webhooks.
pub fn commerce_webhooks(config: CommerceWebhooksConfig) -> Integration {
    Integration::new("commerce-webhooks", move |ctx| {
        let headers = ctx
            .params
            .get(params::HEADERS)
            .ok_or("missing `__ow_headers` in webhook parameters")?;
        let carrier = value_as_carrier(headers).ok_or("`__ow_headers` is not a string map")?;

        let propagated = deserialize_context_from_carrier(&carrier);
        let span_context = try_extract_remote_span_context(&propagated);

        let should_create_new_root = config.ensure_sampling
            && matches!(&span_context, Some(sc) if !sc.is_sampled());

        let links = match (&span_context, should_create_new_root) {
            (Some(sc), true) => vec![link_to_remote(sc.clone())],
            _ => Vec::new(),
        };

        let base_context = propagated.clone();
        ctx.update_instrumentation_config(InstrumentationPatch {
            propagation: Some(PropagationPatch {
                skip: Some(should_create_new_root),
                get_context_carrier: Some(std::sync::Arc::new(move |_params| CarrierLookup {
                    carrier: Some(carrier.clone()),
                    base_context: Some(base_context.clone()),
                })),
            }),
            links: Some(links),
            ..Default::default()
        });

        Ok(())
    })
}
