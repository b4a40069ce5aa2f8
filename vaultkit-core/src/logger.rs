//! Bridge from the `log` facade to a host-provided sink.
//!
//! Hosts embedding the vault (a desktop shell, a mobile app) usually have
//! their own logging pipeline. They implement [`Logger`] and call
//! [`set_logger`] once; every record the crate emits is then forwarded.
//! Binaries that already install a `log`-compatible subscriber do not need
//! this module.

use std::sync::{Arc, OnceLock};

/// Receiver for log records emitted by the vault.
///
/// # Examples
///
/// ```rust
/// use vaultkit_core::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Handles one formatted record. Records never contain key material,
    /// passwords or entry contents.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// State transitions and other debugging detail.
    Debug,
    /// Informational messages.
    Info,
    /// Rejected unlocks, throttling and skipped import entries.
    Warn,
    /// Failures the caller should surface.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

/// Debug and trace output from dependencies is noise for the host; only
/// this crate's own verbose records get through.
fn should_forward(level: log::Level, module_path: Option<&str>) -> bool {
    let verbose = matches!(level, log::Level::Debug | log::Level::Trace);
    !verbose || module_path.is_some_and(|path| path.starts_with("vaultkit"))
}

struct HostLogger;

impl log::Log for HostLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !should_forward(record.level(), record.module_path()) {
            return;
        }
        if let Some(logger) = HOST_LOGGER.get() {
            logger.log(record.level().into(), record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static HOST_LOGGER: OnceLock<Arc<dyn Logger>> = OnceLock::new();
static BRIDGE: HostLogger = HostLogger;

/// Installs `logger` as the destination for every record.
///
/// Only the first call has an effect; later calls, or a process where
/// another `log` implementation is already registered, are reported on
/// stderr and otherwise ignored.
pub fn set_logger(logger: Arc<dyn Logger>) {
    if HOST_LOGGER.set(logger).is_err() {
        eprintln!("vaultkit logger already set");
        return;
    }

    match log::set_logger(&BRIDGE) {
        Ok(()) => log::set_max_level(log::LevelFilter::Trace),
        Err(err) => eprintln!("failed to install vaultkit logger: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(LogLevel, String)>>);

    impl Logger for Capture {
        fn log(&self, level: LogLevel, message: String) {
            if let Ok(mut records) = self.0.lock() {
                records.push((level, message));
            }
        }
    }

    #[test]
    fn test_verbose_records_filtered_by_module() {
        assert!(should_forward(log::Level::Debug, Some("vaultkit_core::vault::store")));
        assert!(!should_forward(log::Level::Debug, Some("serde_json::de")));
        assert!(!should_forward(log::Level::Trace, None));
        assert!(should_forward(log::Level::Warn, Some("serde_json::de")));
        assert!(should_forward(log::Level::Error, None));
    }

    #[test]
    fn test_records_reach_host_logger() {
        let capture = Arc::new(Capture::default());
        set_logger(capture.clone());

        log::warn!("unlock rejected");
        let records = capture.0.lock().expect("lock");
        assert!(records
            .iter()
            .any(|(level, message)| *level == LogLevel::Warn && message == "unlock rejected"));
    }
}
