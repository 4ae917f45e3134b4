//! OpenTelemetry instrumentation optimized for serverless runtime actions.
//!
//! This crate wraps the OpenTelemetry SDK for short-lived, stateless
//! functions ("actions") on an OpenWhisk-style FaaS platform. It handles the
//! parts that are awkward to get right in that environment: one-shot SDK
//! initialization that survives warm restarts, span creation with correct
//! success/failure classification, an ambient per-invocation context usable
//! without parameter threading, and trace-context propagation across the
//! process boundaries actions talk over.
//!
//! # Features
//!
//! - **Entrypoint instrumentation**: wrap the action's `main` handler once;
//!   telemetry setup, context extraction, and the root span come for free
//! - **Nested instrumentation**: wrap any inner function to get a child
//!   span with the same classification rules
//! - **Ambient helpers**: tracer, meter, logger, current span, and a
//!   serialized propagation carrier, reachable from anywhere inside an
//!   instrumented call
//! - **Integrations**: pluggable hooks that patch the instrumentation and
//!   propagation configuration from the inbound request shape
//! - **Lazy metrics**: declare instruments next to their use site, created
//!   once the global meter exists
//!
//! # Architecture
//!
//! - [`entrypoint`]: wrapper for the top-level action handler
//! - [`instrument`]: core span wrappers and the ambient context
//! - [`sdk`]: SDK lifecycle, configuration, and shutdown hooks
//! - [`api`]: process-wide tracer/meter singleton
//! - [`propagation`]: carrier serialization and inference
//! - [`integrations`] / [`commerce`]: configuration-patch pipeline
//! - [`metrics`]: lazily-initialized metric registries
//! - [`runtime`]: platform metadata and resource detection
//! - [`logging`]: diagnostics channel and per-operation loggers
//!
//! # Quick Start
//!
//! ```no_run
//! use action_otel_lite::{
//!     define_telemetry_config, get_instrumentation_helpers, instrument_entrypoint,
//!     Error, TelemetryConfig,
//! };
//! use serde_json::{json, Value};
//!
//! fn main_handler(params: Value) -> Result<Value, Error> {
//!     let helpers = get_instrumentation_helpers()?;
//!     helpers.logger().info("handling invocation");
//!     Ok(json!({ "statusCode": 200 }))
//! }
//!
//! // The action's exported entrypoint.
//! let entrypoint = instrument_entrypoint(
//!     main_handler,
//!     define_telemetry_config(|_params, _is_development| Ok(TelemetryConfig::default())),
//! );
//! ```
//!
//! Telemetry is enabled per invocation through the `ENABLE_TELEMETRY` input
//! parameter. When it is off, every wrapper in this crate is a passthrough
//! and the SDK is never touched.

pub mod api;
pub mod commerce;
pub mod constants;
pub mod entrypoint;
pub mod error;
pub mod instrument;
pub mod integrations;
pub mod logging;
pub mod metrics;
pub mod propagation;
pub mod runtime;
pub mod sdk;
pub mod span;

pub use api::{
    get_global_telemetry_api, initialize_global_telemetry_api, TelemetryApi,
    TelemetryApiOverrides,
};
pub use commerce::{commerce_events, commerce_webhooks, CommerceWebhooksConfig};
pub use entrypoint::{
    define_telemetry_config, instrument_entrypoint, instrument_entrypoint_async,
    EntrypointConfig, TelemetryConfig,
};
pub use error::{Error, TelemetryError};
pub use instrument::{
    get_instrumentation_helpers, instrument, instrument_async, InstrumentationConfig,
    InstrumentationContext, InstrumentationHelpers,
};
pub use integrations::{
    ConfigSnapshot, Integration, IntegrationContext, InstrumentationPatch, PropagationPatch,
};
pub use logging::{get_logger, ActionLogger, DiagnosticsConfig, LogLevel, LoggerConfig};
pub use metrics::{define_metrics, LazyMetrics};
pub use propagation::{
    current_context_carrier, deserialize_context_from_carrier,
    deserialize_context_from_carrier_onto, get_propagated_context, infer_context_carrier,
    serialize_context_into_carrier, serialize_context_into_carrier_with, CarrierLookup,
    CarrierProvider, ContextCarrier, PropagationConfig,
};
pub use runtime::{
    infer_runtime_attributes, is_development, is_telemetry_enabled, runtime_action_metadata,
    runtime_resource, runtime_resource_with_attributes, RuntimeMetadata,
};
pub use sdk::{
    ensure_sdk_initialized, initialize_diagnostics, initialize_sdk, shutdown_sdk,
    ExporterPreset, SdkConfig,
};
pub use span::{
    add_event_to_active_span, get_active_span, try_add_event_to_active_span,
    try_get_active_span, Exception, SpanHandle,
};
