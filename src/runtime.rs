//! Runtime metadata and resource detection for serverless actions.
//!
//! This module reads the platform's `__OW_*` environment variables into an
//! immutable, process-cached [`RuntimeMetadata`] record and derives the
//! telemetry attributes attached to every signal: service name, environment,
//! action identity, and the optional production-only fields.
//!
//! The metadata is computed once per process. A warm container reuses it for
//! every invocation; only a process restart picks up changed variables.

use std::env;
use std::sync::OnceLock;

use chrono::{DateTime, TimeZone, Utc};
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

use crate::constants::{defaults, env_vars};

/// Metadata associated with a runtime action.
#[derive(Debug, Clone)]
pub struct RuntimeMetadata {
    pub activation_id: String,
    pub namespace: String,
    pub api_host: String,
    pub api_key: String,
    pub is_development: bool,

    pub region: String,
    pub cloud: String,
    pub transaction_id: String,
    pub action_version: String,
    pub deadline: Option<DateTime<Utc>>,

    pub package_name: String,
    pub action_name: String,
}

static RUNTIME_METADATA: OnceLock<RuntimeMetadata> = OnceLock::new();

/// Checks if the runtime is in development mode.
///
/// The development flag is the principal signal; the action version is the
/// fallback, since it is only set on deployed actions.
pub fn is_development() -> bool {
    env::var(env_vars::DEV_MODE).is_ok() || env::var(env_vars::ACTION_VERSION).is_err()
}

/// Checks if telemetry is enabled for the current invocation.
///
/// Reads the derived enablement flag set by the instrumented entrypoint.
/// If the flag is absent, telemetry is disabled.
pub fn is_telemetry_enabled() -> bool {
    env::var(env_vars::ENABLE_TELEMETRY)
        .map(|value| value == "true")
        .unwrap_or(false)
}

/// Parses the package and action name out of the qualified action name.
///
/// `/namespace/package/rest...` yields `package` and the remaining segments
/// joined back together. Names without a slash come from environments that
/// don't qualify them; the package is unknown there.
fn parse_action_name() -> (String, String) {
    let Ok(qualified) = env::var(env_vars::ACTION_NAME) else {
        return (
            defaults::UNKNOWN.to_string(),
            defaults::UNKNOWN.to_string(),
        );
    };

    if qualified.contains('/') {
        let mut segments = qualified.split('/');
        // Leading slash produces an empty first segment, then the namespace.
        segments.next();
        segments.next();
        let package_name = segments.next().unwrap_or(defaults::UNKNOWN).to_string();
        let action_name = segments.collect::<Vec<_>>().join("/");
        return (package_name, action_name);
    }

    (defaults::UNKNOWN.to_string(), qualified)
}

fn retrieve_metadata() -> RuntimeMetadata {
    let (package_name, action_name) = parse_action_name();

    let deadline = env::var(env_vars::DEADLINE)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single());

    RuntimeMetadata {
        activation_id: env::var(env_vars::ACTIVATION_ID).unwrap_or_default(),
        namespace: env::var(env_vars::NAMESPACE).unwrap_or_default(),
        api_host: env::var(env_vars::API_HOST).unwrap_or_default(),
        api_key: env::var(env_vars::API_KEY).unwrap_or_default(),
        is_development: is_development(),

        // The following are only set on production.
        region: env::var(env_vars::REGION).unwrap_or_else(|_| defaults::LOCAL.to_string()),
        cloud: env::var(env_vars::CLOUD).unwrap_or_else(|_| defaults::LOCAL.to_string()),
        transaction_id: env::var(env_vars::TRANSACTION_ID)
            .unwrap_or_else(|_| defaults::UNKNOWN.to_string()),
        action_version: env::var(env_vars::ACTION_VERSION)
            .unwrap_or_else(|_| defaults::DEV_ACTION_VERSION.to_string()),
        deadline,

        package_name,
        action_name,
    }
}

/// Gets the runtime metadata for the currently running action.
///
/// Computed on first use and cached for the process lifetime.
pub fn runtime_action_metadata() -> &'static RuntimeMetadata {
    RUNTIME_METADATA.get_or_init(retrieve_metadata)
}

/// Creates the service name based on environment and metadata.
fn service_name(meta: &RuntimeMetadata) -> String {
    if meta.is_development {
        // The package name is not always available in development.
        let package_suffix = if meta.package_name != defaults::UNKNOWN {
            format!("/{}", meta.package_name)
        } else {
            String::new()
        };

        return format!("{}-local-development{}", meta.namespace, package_suffix);
    }

    format!("{}/{}", meta.namespace, meta.package_name)
}

/// Tries to infer the telemetry attributes from the runtime metadata.
pub fn infer_runtime_attributes() -> Vec<KeyValue> {
    let meta = runtime_action_metadata();

    let environment = if meta.is_development {
        "development"
    } else {
        "production"
    };

    let mut attributes = vec![
        KeyValue::new(SERVICE_NAME, service_name(meta)),
        KeyValue::new("environment", environment),
        KeyValue::new("action.name", meta.action_name.clone()),
        KeyValue::new("action.namespace", meta.namespace.clone()),
        KeyValue::new("action.activation_id", meta.activation_id.clone()),
    ];

    // Only attach the service version outside development; the placeholder
    // version would pollute production dashboards.
    if meta.action_version != defaults::DEV_ACTION_VERSION {
        attributes.push(KeyValue::new(SERVICE_VERSION, meta.action_version.clone()));
    }

    if let Some(deadline) = meta.deadline {
        attributes.push(KeyValue::new("action.deadline", deadline.to_rfc3339()));
    }

    for (key, value) in [
        ("action.transaction_id", &meta.transaction_id),
        ("action.package_name", &meta.package_name),
    ] {
        if value != defaults::UNKNOWN {
            attributes.push(KeyValue::new(key, value.clone()));
        }
    }

    attributes
}

/// Whether host/process detection has been disabled.
fn resource_detection_disabled() -> bool {
    env::var(env_vars::RESOURCE_DETECTORS)
        .map(|value| value.eq_ignore_ascii_case("none"))
        .unwrap_or(false)
}

/// Builds the telemetry resource for the current action.
///
/// Always carries the inferred action attributes. Host and process details
/// are added only when resource detection has not been disabled, since they
/// can leak information about the underlying environment.
pub fn runtime_resource() -> Resource {
    runtime_resource_with_attributes(Vec::new())
}

/// Host and process attributes, gated behind the detection flag.
fn detected_attributes() -> Vec<KeyValue> {
    if resource_detection_disabled() {
        return Vec::new();
    }

    let mut attributes = vec![KeyValue::new("process.pid", std::process::id() as i64)];
    if let Ok(hostname) = env::var("HOSTNAME") {
        attributes.push(KeyValue::new("host.name", hostname));
    }

    attributes
}

/// Builds the runtime resource merged with the given extra attributes.
/// Extra attributes win over inferred ones with the same key.
pub fn runtime_resource_with_attributes(extra: Vec<KeyValue>) -> Resource {
    let mut attributes = infer_runtime_attributes();
    attributes.extend(detected_attributes());
    attributes.extend(extra);

    Resource::builder().with_attributes(attributes).build()
}
