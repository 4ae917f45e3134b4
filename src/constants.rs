//! Constants for the action-otel-lite package.
//!
//! This file centralizes all constants to ensure consistency across the codebase
//! and provide a single source of truth for environment variables, parameter
//! keys, and default values.

/// Environment variable names read or written by this crate.
pub mod env_vars {
    /// Derived enablement flag set by the instrumented entrypoint.
    ///
    /// The raw `ENABLE_TELEMETRY` input parameter is normalized (stringified,
    /// lowercased) into this variable so the rest of the process can check it
    /// without re-parsing action parameters.
    pub const ENABLE_TELEMETRY: &str = "__ACTION_OTEL_ENABLE_TELEMETRY";

    /// Derived log-level flag set by the instrumented entrypoint.
    pub const LOG_LEVEL: &str = "__ACTION_OTEL_LOG_LEVEL";

    /// Fallback log-level variable honored when the derived flag is unset.
    pub const FALLBACK_LOG_LEVEL: &str = "LOG_LEVEL";

    /// Controls automatic resource detection. The entrypoint sets this to
    /// "none" (unless already set) to avoid leaking host details by default.
    pub const RESOURCE_DETECTORS: &str = "OTEL_RESOURCE_DETECTORS";

    /// Set by local development tooling to signal development mode.
    pub const DEV_MODE: &str = "ACTION_DEV_MODE";

    /// Fully qualified action name (`/namespace/package/action`).
    pub const ACTION_NAME: &str = "__OW_ACTION_NAME";

    /// Namespace the action runs in.
    pub const NAMESPACE: &str = "__OW_NAMESPACE";

    /// Activation id of the current invocation.
    pub const ACTIVATION_ID: &str = "__OW_ACTIVATION_ID";

    /// API host of the platform.
    pub const API_HOST: &str = "__OW_API_HOST";

    /// API key of the invoking subject.
    pub const API_KEY: &str = "__OW_API_KEY";

    /// Region the action runs in. Only set in production.
    pub const REGION: &str = "__OW_REGION";

    /// Cloud the action runs in. Only set in production.
    pub const CLOUD: &str = "__OW_CLOUD";

    /// Transaction id of the current invocation. Only set in production.
    pub const TRANSACTION_ID: &str = "__OW_TRANSACTION_ID";

    /// Deployed action version. Only set in production.
    pub const ACTION_VERSION: &str = "__OW_ACTION_VERSION";

    /// Invocation deadline as epoch milliseconds.
    pub const DEADLINE: &str = "__OW_DEADLINE";
}

/// Input parameter keys inspected by the instrumented entrypoint.
pub mod params {
    /// Enables telemetry for the invocation when truthy.
    pub const ENABLE_TELEMETRY: &str = "ENABLE_TELEMETRY";

    /// Explicit log-level override for the invocation.
    pub const LOG_LEVEL: &str = "LOG_LEVEL";

    /// HTTP headers of web invocations, as injected by the platform.
    pub const HEADERS: &str = "__ow_headers";

    /// Explicit trace-context carrier passed as an input parameter.
    pub const TELEMETRY_CONTEXT: &str = "__telemetryContext";

    /// Nested payload object some event sources wrap their data in.
    pub const DATA: &str = "data";
}

/// HTTP header keys inspected during carrier inference.
pub mod headers {
    /// Serialized trace-context carrier forwarded by cooperating services.
    pub const TELEMETRY_CONTEXT: &str = "x-telemetry-context";
}

/// Default values for configuration parameters.
pub mod defaults {
    /// Placeholder action version used in development.
    pub const DEV_ACTION_VERSION: &str = "0.0.0 (development)";

    /// Placeholder for metadata the environment does not provide.
    pub const UNKNOWN: &str = "unknown";

    /// Placeholder region/cloud used in local development.
    pub const LOCAL: &str = "local";

    /// Default log level outside development mode.
    pub const LOG_LEVEL: &str = "info";

    /// Span name given to entrypoint root spans without an explicit name.
    pub const ENTRYPOINT_SPAN_NAME: &str = "entrypoint";
}
