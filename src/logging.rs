//! Logging utilities for action-otel-lite.
//!
//! Two logging surfaces live here:
//!
//! - [`Logger`]: a lightweight internal logger with level filtering and
//!   prefixing, used by this crate's own modules as the diagnostics channel.
//!   Lifecycle problems (SDK start/shutdown failures) are reported here and
//!   never thrown.
//! - [`ActionLogger`]: the per-operation logger handed to instrumented code
//!   via [`get_logger`]. It emits through `tracing`, so records created
//!   inside an instrumented call are picked up by the OpenTelemetry layer
//!   installed at SDK initialization and exported with the active span.
//!
//! # Static Logger Example
//! ```
//! use action_otel_lite::logging::Logger;
//!
//! static LOGGER: Logger = Logger::const_new("my_module");
//!
//! LOGGER.info("starting module");
//! ```

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use crate::constants::env_vars;
use crate::error::TelemetryError;
use crate::runtime::runtime_action_metadata;
use crate::sdk::ensure_sdk_initialized;

/// Verbosity levels understood by both logging surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Suppress all output.
    None,
    Error,
    Warn,
    Info,
    Debug,
    Verbose,
}

impl LogLevel {
    /// Whether a record at `record` level passes a threshold of `self`.
    fn allows(self, record: LogLevel) -> bool {
        record != LogLevel::None && record <= self
    }

    /// Diagnostic records at these levels may be exported through the
    /// telemetry pipeline. Verbose and debug output never is.
    fn is_operational(self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Warn | LogLevel::Info)
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "verbose" | "trace" => Ok(LogLevel::Verbose),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
        };
        f.write_str(name)
    }
}

/// Configuration for the diagnostics channel.
///
/// Must be applied (via [`crate::sdk::initialize_diagnostics`]) before the
/// SDK starts; afterwards the wiring is fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// Threshold for diagnostic output.
    pub log_level: LogLevel,

    /// Name attached to exported diagnostic records.
    /// Defaults to `<actionName>/otel-diagnostics`.
    pub logger_name: Option<String>,

    /// Whether operational diagnostics (info/warn/error) are also emitted as
    /// `tracing` events so they reach the configured exporters. Verbose and
    /// debug records are never exported, regardless of this flag.
    pub export_logs: bool,
}

impl DiagnosticsConfig {
    pub fn new(log_level: LogLevel) -> Self {
        Self {
            log_level,
            logger_name: None,
            export_logs: true,
        }
    }

    pub fn with_logger_name(mut self, name: impl Into<String>) -> Self {
        self.logger_name = Some(name.into());
        self
    }

    pub fn with_export_logs(mut self, export: bool) -> Self {
        self.export_logs = export;
        self
    }
}

static DIAGNOSTICS: RwLock<Option<DiagnosticsConfig>> = RwLock::new(None);

/// Install the diagnostics configuration. Replaces any previous one.
pub(crate) fn set_diagnostics(config: DiagnosticsConfig) {
    if let Ok(mut slot) = DIAGNOSTICS.write() {
        *slot = Some(config);
    }
}

/// Clear the diagnostics configuration. Intended for tests.
pub fn reset_diagnostics() {
    if let Ok(mut slot) = DIAGNOSTICS.write() {
        *slot = None;
    }
}

pub(crate) fn diagnostics_snapshot() -> Option<DiagnosticsConfig> {
    DIAGNOSTICS.read().ok().and_then(|slot| slot.clone())
}

/// Directive string for the tracing-subscriber filter installed at SDK
/// initialization, derived from the process log level.
pub(crate) fn tracing_directive() -> &'static str {
    match env_log_level() {
        LogLevel::None => "off",
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Verbose => "trace",
    }
}

/// Resolve the effective log level: diagnostics override first, then the
/// derived log-level flag, then the plain fallback variable.
fn env_log_level() -> LogLevel {
    env::var(env_vars::LOG_LEVEL)
        .or_else(|_| env::var(env_vars::FALLBACK_LOG_LEVEL))
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LogLevel::Info)
}

/// Internal logger with level filtering and consistent prefixing.
#[derive(Clone)]
pub struct Logger {
    prefix: &'static str,
}

impl Logger {
    /// Create a new logger with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        let static_prefix = Box::leak(prefix.into().into_boxed_str());
        Self {
            prefix: static_prefix,
        }
    }

    /// Create a new logger with the given prefix in const contexts.
    pub const fn const_new(prefix: &'static str) -> Self {
        Self { prefix }
    }

    fn threshold(&self) -> LogLevel {
        match diagnostics_snapshot() {
            Some(diag) => diag.log_level,
            None => env_log_level(),
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.threshold().allows(level)
    }

    fn format_message(&self, message: &str) -> String {
        format!("[{}] {}", self.prefix, message)
    }

    /// Re-emit operational diagnostics through `tracing` when the
    /// diagnostics configuration asks for exported logs.
    fn export(&self, level: LogLevel, message: &str) {
        let Some(diag) = diagnostics_snapshot() else {
            return;
        };
        if !diag.export_logs || !level.is_operational() {
            return;
        }

        let logger_name = diag.logger_name.unwrap_or_else(|| {
            format!(
                "{}/otel-diagnostics",
                runtime_action_metadata().action_name
            )
        });

        match level {
            LogLevel::Error => {
                tracing::error!(target: "otel_diagnostics", logger = %logger_name, "{message}")
            }
            LogLevel::Warn => {
                tracing::warn!(target: "otel_diagnostics", logger = %logger_name, "{message}")
            }
            _ => tracing::info!(target: "otel_diagnostics", logger = %logger_name, "{message}"),
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        if !self.should_log(level) {
            return;
        }

        let formatted = self.format_message(message);
        match level {
            LogLevel::Error | LogLevel::Warn => eprintln!("{formatted}"),
            _ => println!("{formatted}"),
        }

        self.export(level, message);
    }

    /// Log a verbose message.
    pub fn verbose(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Verbose, message.as_ref());
    }

    /// Log a debug message.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message.as_ref());
    }

    /// Log an info message.
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    /// Log a warning message.
    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref());
    }

    /// Log an error message.
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }
}

/// Configuration for [`get_logger`].
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Explicit level for this logger. Defaults to the process log level.
    pub level: Option<LogLevel>,

    /// Whether records carry the current action name.
    pub log_source_action: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: None,
            log_source_action: true,
        }
    }
}

/// Logger handed to instrumented operations.
///
/// Records are emitted as `tracing` events. Inside an instrumented call they
/// become events on the active span and flow to the configured exporters.
#[derive(Debug, Clone)]
pub struct ActionLogger {
    name: String,
    level: LogLevel,
    source_action: Option<String>,
}

/// Create a logger for the given name.
///
/// # Errors
///
/// Fails with [`TelemetryError::SdkNotInitialized`] when the telemetry SDK
/// has not been started, since records could not reach any exporter.
pub fn get_logger(name: impl Into<String>, config: LoggerConfig) -> Result<ActionLogger, TelemetryError> {
    ensure_sdk_initialized()?;

    let source_action = config
        .log_source_action
        .then(|| runtime_action_metadata().action_name.clone());

    Ok(ActionLogger {
        name: name.into(),
        level: config.level.unwrap_or_else(env_log_level),
        source_action,
    })
}

impl ActionLogger {
    /// The name this logger was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, level: LogLevel, message: &str) {
        if !self.level.allows(level) {
            return;
        }

        let action = self.source_action.as_deref().unwrap_or_default();
        match level {
            LogLevel::Error => {
                tracing::error!(target: "action", logger = %self.name, action = %action, "{message}")
            }
            LogLevel::Warn => {
                tracing::warn!(target: "action", logger = %self.name, action = %action, "{message}")
            }
            LogLevel::Info => {
                tracing::info!(target: "action", logger = %self.name, action = %action, "{message}")
            }
            LogLevel::Debug => {
                tracing::debug!(target: "action", logger = %self.name, action = %action, "{message}")
            }
            LogLevel::Verbose => {
                tracing::trace!(target: "action", logger = %self.name, action = %action, "{message}")
            }
            LogLevel::None => {}
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Error, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Warn, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Info, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Debug, message.as_ref());
    }

    pub fn verbose(&self, message: impl AsRef<str>) {
        self.emit(LogLevel::Verbose, message.as_ref());
    }
}

/// Construct an action logger without the SDK guard.
///
/// Used by the instrumentation core after it has already verified the SDK
/// precondition for the current call.
pub(crate) fn scoped_logger(name: String, log_source_action: bool) -> ActionLogger {
    let source_action =
        log_source_action.then(|| runtime_action_metadata().action_name.clone());

    ActionLogger {
        name,
        level: env_log_level(),
        source_action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Debug.allows(LogLevel::Error));
        assert!(LogLevel::Debug.allows(LogLevel::Debug));
        assert!(!LogLevel::Info.allows(LogLevel::Debug));
        assert!(!LogLevel::None.allows(LogLevel::Error));
        assert!(!LogLevel::Verbose.allows(LogLevel::None));
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!("DEBUG".parse(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse(), Ok(LogLevel::Warn));
        assert_eq!("trace".parse(), Ok(LogLevel::Verbose));
        assert!("nope".parse::<LogLevel>().is_err());
    }

    #[test]
    fn operational_levels_exclude_debug_output() {
        assert!(LogLevel::Error.is_operational());
        assert!(LogLevel::Warn.is_operational());
        assert!(LogLevel::Info.is_operational());
        assert!(!LogLevel::Debug.is_operational());
        assert!(!LogLevel::Verbose.is_operational());
    }

    #[test]
    #[serial]
    fn env_level_falls_back_to_info() {
        std::env::remove_var(env_vars::LOG_LEVEL);
        std::env::remove_var(env_vars::FALLBACK_LOG_LEVEL);
        assert_eq!(env_log_level(), LogLevel::Info);

        std::env::set_var(env_vars::LOG_LEVEL, "verbose");
        assert_eq!(env_log_level(), LogLevel::Verbose);
        std::env::remove_var(env_vars::LOG_LEVEL);
    }

    #[test]
    #[serial]
    fn diagnostics_threshold_wins_over_env() {
        std::env::set_var(env_vars::LOG_LEVEL, "error");
        set_diagnostics(DiagnosticsConfig::new(LogLevel::Debug));

        let logger = Logger::const_new("test");
        assert!(logger.should_log(LogLevel::Debug));

        reset_diagnostics();
        assert!(!logger.should_log(LogLevel::Debug));
        std::env::remove_var(env_vars::LOG_LEVEL);
    }

    #[test]
    fn format_message_prefixes() {
        let logger = Logger::const_new("test");
        assert_eq!(logger.format_message("hello"), "[test] hello");
    }
}
