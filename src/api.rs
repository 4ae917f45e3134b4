//! Process-wide telemetry API singleton.
//!
//! The tracer and meter used by all instrumentation in the process live in a
//! single [`TelemetryApi`] instance, created once per process and scoped by
//! the current action's name and version. Initialization is idempotent: a
//! second attempt keeps the first instance and only logs a warning, so a
//! warm-restarted entrypoint can call it unconditionally.

use std::fmt;
use std::sync::{Arc, RwLock};

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::InstrumentationScope;

use crate::error::TelemetryError;
use crate::logging::Logger;
use crate::runtime::runtime_action_metadata;

static LOGGER: Logger = Logger::const_new("telemetry-api");

static TELEMETRY_API: RwLock<Option<Arc<TelemetryApi>>> = RwLock::new(None);

/// The global telemetry API: one tracer and one meter per process.
pub struct TelemetryApi {
    tracer: BoxedTracer,
    meter: Meter,
}

impl TelemetryApi {
    /// The tracer used to create spans.
    pub fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    /// The meter used to create metrics.
    pub fn meter(&self) -> &Meter {
        &self.meter
    }
}

impl fmt::Debug for TelemetryApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryApi").finish_non_exhaustive()
    }
}

/// Optional replacements for the default tracer and meter.
#[derive(Default)]
pub struct TelemetryApiOverrides {
    pub tracer: Option<BoxedTracer>,
    pub meter: Option<Meter>,
}

/// Get the global telemetry API.
///
/// # Errors
///
/// Fails with [`TelemetryError::ApiNotInitialized`] when no instance exists.
pub fn get_global_telemetry_api() -> Result<Arc<TelemetryApi>, TelemetryError> {
    TELEMETRY_API
        .read()
        .ok()
        .and_then(|slot| slot.clone())
        .ok_or(TelemetryError::ApiNotInitialized)
}

/// Initialize the global telemetry API.
///
/// Defaults are obtained from the global tracer and meter providers, scoped
/// by the current action name and version. Provided overrides replace the
/// corresponding default. If an instance already exists, this call warns and
/// keeps it; overrides are discarded.
pub fn initialize_global_telemetry_api(overrides: TelemetryApiOverrides) {
    let Ok(mut slot) = TELEMETRY_API.write() else {
        return;
    };

    if slot.is_some() {
        LOGGER.warn("global telemetry API already initialized, keeping the existing instance");
        return;
    }

    let meta = runtime_action_metadata();
    let scope = InstrumentationScope::builder(meta.action_name.clone())
        .with_version(meta.action_version.clone())
        .build();

    let tracer = overrides
        .tracer
        .unwrap_or_else(|| global::tracer_provider().tracer_with_scope(scope.clone()));
    let meter = overrides
        .meter
        .unwrap_or_else(|| global::meter_provider().meter_with_scope(scope));

    *slot = Some(Arc::new(TelemetryApi { tracer, meter }));
}

/// Clear the global telemetry API. Intended for tests and controlled
/// teardown between runs.
pub fn reset_global_telemetry_api() {
    if let Ok(mut slot) = TELEMETRY_API.write() {
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn get_fails_before_initialization() {
        reset_global_telemetry_api();

        assert!(matches!(
            get_global_telemetry_api(),
            Err(TelemetryError::ApiNotInitialized)
        ));
    }

    #[test]
    #[serial]
    fn initializes_with_defaults() {
        reset_global_telemetry_api();

        initialize_global_telemetry_api(TelemetryApiOverrides::default());
        assert!(get_global_telemetry_api().is_ok());

        reset_global_telemetry_api();
    }

    #[test]
    #[serial]
    fn second_initialization_keeps_first_instance() {
        reset_global_telemetry_api();

        initialize_global_telemetry_api(TelemetryApiOverrides::default());
        let first = get_global_telemetry_api().unwrap();

        initialize_global_telemetry_api(TelemetryApiOverrides {
            tracer: Some(global::tracer("replacement")),
            meter: None,
        });
        let second = get_global_telemetry_api().unwrap();

        assert!(Arc::ptr_eq(&first, &second));

        reset_global_telemetry_api();
    }

    #[test]
    #[serial]
    fn overrides_are_used_when_provided() {
        reset_global_telemetry_api();

        initialize_global_telemetry_api(TelemetryApiOverrides {
            tracer: Some(global::tracer("custom-tracer")),
            meter: Some(global::meter("custom-meter")),
        });

        assert!(get_global_telemetry_api().is_ok());
        reset_global_telemetry_api();
    }
}
