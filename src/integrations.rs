//! Integration pipeline: pluggable configuration patches.
//!
//! An [`Integration`] is a named hook that rewrites the entrypoint's
//! instrumentation and propagation configuration based on the shape of the
//! inbound request, for example honoring an upstream system's sampling
//! decision. The pipeline applies integrations in list order; each hook sees
//! the frozen initial configuration and contributes patches that are
//! deep-merged into the accumulating result.
//!
//! Merge semantics are pinned here rather than delegated to a generic merge
//! helper: attribute maps merge key-wise (the patch wins on conflicts),
//! link lists replace wholesale, scalars replace when present.
//!
//! A hook failure aborts the pipeline immediately: no further integrations
//! run, and the error is rethrown wrapped with the failing integration's
//! name and the original error as its source.

use opentelemetry::trace::Link;
use opentelemetry::KeyValue;
use serde_json::Value;

use crate::error::{Error, TelemetryError};
use crate::propagation::CarrierProvider;

/// A named, stateless configuration-patch hook.
pub struct Integration {
    name: String,
    patch: Box<dyn Fn(&mut IntegrationContext<'_>) -> Result<(), Error> + Send + Sync>,
}

impl Integration {
    pub fn new(
        name: impl Into<String>,
        patch: impl Fn(&mut IntegrationContext<'_>) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            patch: Box::new(patch),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Integration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Frozen view of the initial instrumentation configuration, as it was
/// before any integration ran.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub span_name: Option<String>,
    pub attributes: Vec<KeyValue>,
    pub links: Vec<Link>,
    pub propagation_skip: bool,
}

/// Propagation fields of an [`InstrumentationPatch`].
#[derive(Clone, Default)]
pub struct PropagationPatch {
    pub skip: Option<bool>,
    pub get_context_carrier: Option<CarrierProvider>,
}

/// Partial configuration contributed by an integration hook.
///
/// Absent fields leave the accumulating configuration untouched.
#[derive(Clone, Default)]
pub struct InstrumentationPatch {
    pub span_name: Option<String>,
    pub attributes: Option<Vec<KeyValue>>,
    pub links: Option<Vec<Link>>,
    pub propagation: Option<PropagationPatch>,
}

/// What an integration hook gets to work with.
pub struct IntegrationContext<'a> {
    /// The inbound action parameters.
    pub params: &'a Value,

    /// The initial configuration as it was before any patch; never the
    /// accumulating one.
    pub instrumentation_config: &'a ConfigSnapshot,

    patches: Vec<InstrumentationPatch>,
}

impl IntegrationContext<'_> {
    /// Contribute a patch. May be called multiple times; patches merge in
    /// call order.
    pub fn update_instrumentation_config(&mut self, patch: InstrumentationPatch) {
        self.patches.push(patch);
    }
}

/// The configuration after all integrations have been applied.
#[derive(Clone, Default)]
pub struct PatchedConfig {
    pub span_name: Option<String>,
    pub attributes: Vec<KeyValue>,
    pub links: Vec<Link>,
    pub propagation_skip: bool,
    pub get_context_carrier: Option<CarrierProvider>,
}

impl std::fmt::Debug for PatchedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchedConfig")
            .field("span_name", &self.span_name)
            .field("attributes", &self.attributes)
            .field("links", &self.links)
            .field("propagation_skip", &self.propagation_skip)
            .field("get_context_carrier", &self.get_context_carrier.is_some())
            .finish()
    }
}

impl PatchedConfig {
    fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self {
            span_name: snapshot.span_name.clone(),
            attributes: snapshot.attributes.clone(),
            links: snapshot.links.clone(),
            propagation_skip: snapshot.propagation_skip,
            get_context_carrier: None,
        }
    }
}

fn merge_patch(config: &mut PatchedConfig, patch: InstrumentationPatch) {
    if let Some(span_name) = patch.span_name {
        config.span_name = Some(span_name);
    }

    if let Some(attributes) = patch.attributes {
        for attribute in attributes {
            match config
                .attributes
                .iter_mut()
                .find(|kv| kv.key == attribute.key)
            {
                Some(existing) => *existing = attribute,
                None => config.attributes.push(attribute),
            }
        }
    }

    // Lists replace, they do not concatenate.
    if let Some(links) = patch.links {
        config.links = links;
    }

    if let Some(propagation) = patch.propagation {
        if let Some(skip) = propagation.skip {
            config.propagation_skip = skip;
        }
        if let Some(provider) = propagation.get_context_carrier {
            config.get_context_carrier = Some(provider);
        }
    }
}

/// Applies the integration patches to the given configuration.
pub(crate) fn apply_integrations(
    integrations: &[Integration],
    initial: &ConfigSnapshot,
    params: &Value,
) -> Result<PatchedConfig, TelemetryError> {
    let mut current = PatchedConfig::from_snapshot(initial);

    for integration in integrations {
        let mut context = IntegrationContext {
            params,
            instrumentation_config: initial,
            patches: Vec::new(),
        };

        (integration.patch)(&mut context).map_err(|source| TelemetryError::Integration {
            name: if integration.name.is_empty() {
                "unknown".to_string()
            } else {
                integration.name.clone()
            },
            source,
        })?;

        for patch in context.patches {
            merge_patch(&mut current, patch);
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attribute_value(attributes: &[KeyValue], key: &str) -> Option<String> {
        attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    #[test]
    fn applies_integrations_in_order() {
        let first = Integration::new("first", |ctx| {
            ctx.update_instrumentation_config(InstrumentationPatch {
                attributes: Some(vec![
                    KeyValue::new("shared", "first"),
                    KeyValue::new("first.only", "yes"),
                ]),
                ..Default::default()
            });
            Ok(())
        });

        let second = Integration::new("second", |ctx| {
            ctx.update_instrumentation_config(InstrumentationPatch {
                attributes: Some(vec![KeyValue::new("shared", "second")]),
                ..Default::default()
            });
            Ok(())
        });

        let patched = apply_integrations(
            &[first, second],
            &ConfigSnapshot::default(),
            &json!({}),
        )
        .unwrap();

        assert_eq!(
            attribute_value(&patched.attributes, "shared"),
            Some("second".to_string())
        );
        assert_eq!(
            attribute_value(&patched.attributes, "first.only"),
            Some("yes".to_string())
        );
    }

    #[test]
    fn hooks_see_the_frozen_initial_config() {
        let initial = ConfigSnapshot {
            span_name: Some("root".to_string()),
            ..Default::default()
        };

        let mutator = Integration::new("mutator", |ctx| {
            ctx.update_instrumentation_config(InstrumentationPatch {
                span_name: Some("patched".to_string()),
                ..Default::default()
            });
            Ok(())
        });

        let observer = Integration::new("observer", |ctx| {
            // The snapshot must not reflect the mutator's patch.
            assert_eq!(
                ctx.instrumentation_config.span_name.as_deref(),
                Some("root")
            );
            Ok(())
        });

        let patched = apply_integrations(&[mutator, observer], &initial, &json!({})).unwrap();
        assert_eq!(patched.span_name.as_deref(), Some("patched"));
    }

    #[test]
    fn link_lists_replace_instead_of_concatenating() {
        use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

        let link = |id: u128| {
            Link::new(
                SpanContext::new(
                    TraceId::from_bytes(id.to_be_bytes()),
                    SpanId::from_bytes(7u64.to_be_bytes()),
                    TraceFlags::SAMPLED,
                    true,
                    TraceState::default(),
                ),
                Vec::new(),
                0,
            )
        };

        let initial = ConfigSnapshot {
            links: vec![link(1), link(2)],
            ..Default::default()
        };

        let replacer = Integration::new("replacer", move |ctx| {
            ctx.update_instrumentation_config(InstrumentationPatch {
                links: Some(vec![link(3)]),
                ..Default::default()
            });
            Ok(())
        });

        let patched = apply_integrations(&[replacer], &initial, &json!({})).unwrap();
        assert_eq!(patched.links.len(), 1);
        assert_eq!(
            patched.links[0].span_context.trace_id(),
            TraceId::from_bytes(3u128.to_be_bytes())
        );
    }

    #[test]
    fn failing_hook_aborts_the_pipeline() {
        let failing = Integration::new("exploding", |_ctx| Err("no params".into()));

        let never_runs = Integration::new("never-runs", |ctx| {
            ctx.update_instrumentation_config(InstrumentationPatch {
                span_name: Some("should not appear".to_string()),
                ..Default::default()
            });
            Ok(())
        });

        let error = apply_integrations(
            &[failing, never_runs],
            &ConfigSnapshot::default(),
            &json!({}),
        )
        .unwrap_err();

        match error {
            TelemetryError::Integration { name, .. } => assert_eq!(name, "exploding"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unnamed_integration_reports_unknown() {
        let failing = Integration::new("", |_ctx| Err("boom".into()));

        let error =
            apply_integrations(&[failing], &ConfigSnapshot::default(), &json!({})).unwrap_err();
        assert!(error.to_string().contains("\"unknown\""));
    }

    #[test]
    fn propagation_patch_merges_fieldwise() {
        let skipper = Integration::new("skipper", |ctx| {
            ctx.update_instrumentation_config(InstrumentationPatch {
                propagation: Some(PropagationPatch {
                    skip: Some(true),
                    get_context_carrier: None,
                }),
                ..Default::default()
            });
            Ok(())
        });

        let patched =
            apply_integrations(&[skipper], &ConfigSnapshot::default(), &json!({})).unwrap();
        assert!(patched.propagation_skip);
        assert!(patched.get_context_carrier.is_none());
    }
}
