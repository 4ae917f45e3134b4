//! Lazily-initialized metric registries.
//!
//! Metric instruments can only be created once the global telemetry API
//! exists, but user code wants to declare them up front, next to where they
//! are used. [`define_metrics`] bridges the gap: it takes a factory and
//! returns a [`LazyMetrics`] registry that defers the factory until the
//! first access, then caches the result for the process lifetime.
//!
//! ```no_run
//! use std::sync::OnceLock;
//! use action_otel_lite::metrics::{define_metrics, LazyMetrics};
//! use opentelemetry::metrics::Counter;
//!
//! struct AppMetrics {
//!     requests: Counter<u64>,
//! }
//!
//! fn metrics() -> &'static LazyMetrics<AppMetrics> {
//!     static METRICS: OnceLock<LazyMetrics<AppMetrics>> = OnceLock::new();
//!     METRICS.get_or_init(|| {
//!         define_metrics(|meter| AppMetrics {
//!             requests: meter.u64_counter("requests").build(),
//!         })
//!     })
//! }
//! ```
//!
//! Reading a registry from inside its own factory is a programming error
//! (the registry is not initialized yet) and fails with a cycle-detection
//! error before any recursive factory call. The registry itself stays
//! usable: once the factory completes, later accesses succeed.

use std::any::type_name;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use opentelemetry::metrics::Meter;

use crate::api::get_global_telemetry_api;
use crate::error::TelemetryError;

/// A registry of metric instruments, created on first access.
pub struct LazyMetrics<T> {
    factory: Box<dyn Fn(&Meter) -> T + Send + Sync>,
    initializing: AtomicBool,
    metrics: OnceLock<T>,
}

/// Helper to define a record of metrics backed by the global meter.
pub fn define_metrics<T, F>(factory: F) -> LazyMetrics<T>
where
    F: Fn(&Meter) -> T + Send + Sync + 'static,
{
    LazyMetrics {
        factory: Box::new(factory),
        initializing: AtomicBool::new(false),
        metrics: OnceLock::new(),
    }
}

/// Clears the initializing flag even if the factory panics, so the
/// registry is left retryable rather than permanently "initializing".
struct InitializingGuard<'a>(&'a AtomicBool);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> LazyMetrics<T> {
    /// Access the metrics, running the factory on first use.
    ///
    /// # Errors
    ///
    /// - [`TelemetryError::MetricsCycle`] when called from inside the
    ///   factory of this same registry.
    /// - [`TelemetryError::MetricsInit`] when the global telemetry API is
    ///   not available; the underlying error is kept as the source.
    pub fn get(&self) -> Result<&T, TelemetryError> {
        if let Some(metrics) = self.metrics.get() {
            return Ok(metrics);
        }

        // Checked before any attempt to call the factory again.
        if self.initializing.load(Ordering::Acquire) {
            return Err(TelemetryError::MetricsCycle {
                registry: type_name::<T>(),
            });
        }

        let api = get_global_telemetry_api().map_err(|error| TelemetryError::MetricsInit {
            source: Box::new(error),
        })?;

        self.initializing.store(true, Ordering::Release);
        let guard = InitializingGuard(&self.initializing);
        let created = (self.factory)(api.meter());
        drop(guard);

        Ok(self.metrics.get_or_init(|| created))
    }

    /// Whether the factory has completed.
    pub fn is_initialized(&self) -> bool {
        self.metrics.get().is_some()
    }
}

impl<T> std::fmt::Debug for LazyMetrics<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyMetrics")
            .field("registry", &type_name::<T>())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
