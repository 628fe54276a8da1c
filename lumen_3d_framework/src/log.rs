//! Internal logging system for the Lumen3D framework
//!
//! This module provides a flexible logging system with:
//! - Customizable logger via Logger trait
//! - Severity levels (Trace, Debug, Info, Warn, Error)
//! - Colored console output by default
//! - Thread-safe logging with RwLock
//! - File and line information for detailed ERROR logs

use colored::*;
use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;
use chrono::{DateTime, Local};

/// Logger trait for custom logging implementations
///
/// Implement this trait to create custom loggers (file logging, network logging, etc.)
///
/// # Example
///
/// ```no_run
/// use lumen_3d_framework::lumen3d::log::{Logger, LogEntry};
///
/// struct FileLogger {
///     file: std::fs::File,
/// }
///
/// impl Logger for FileLogger {
///     fn log(&self, entry: &LogEntry) {
///         // Write to file...
///     }
/// }
/// ```
pub trait Logger: Send + Sync {
    /// Log an entry
    ///
    /// # Arguments
    ///
    /// * `entry` - The log entry to process
    fn log(&self, entry: &LogEntry);
}

/// Log entry containing all information about a log message
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity level (Trace, Debug, Info, Warn, Error)
    pub severity: LogSeverity,

    /// Timestamp when the log was created
    pub timestamp: SystemTime,

    /// Source module (e.g., "lumen3d::Framebuffer", "lumen3d::vulkan::Image")
    pub source: String,

    /// Log message
    pub message: String,

    /// Source file (only for detailed ERROR logs)
    pub file: Option<&'static str>,

    /// Source line (only for detailed ERROR logs)
    pub line: Option<u32>,
}

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    /// Very verbose debug information (typically disabled in release)
    Trace,

    /// Development/debugging information
    Debug,

    /// Important informational messages
    Info,

    /// Warning messages (potential issues)
    Warn,

    /// Error messages (critical issues with file:line details)
    Error,
}

/// Default logger implementation using colored console output
///
/// Format:
/// - Normal: `[timestamp] [SEVERITY] [source] message`
/// - Error: `[timestamp] [ERROR] [source] message (file:line)`
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        // Format timestamp as YYYY-MM-DD HH:MM:SS.mmm
        let datetime: DateTime<Local> = entry.timestamp.into();
        let timestamp = datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let severity_str = match entry.severity {
            LogSeverity::Trace => "TRACE".bright_black(),
            LogSeverity::Debug => "DEBUG".cyan(),
            LogSeverity::Info => "INFO ".green(),
            LogSeverity::Warn => "WARN ".yellow(),
            LogSeverity::Error => "ERROR".red().bold(),
        };

        let source = entry.source.bright_blue();

        if let (Some(file), Some(line)) = (entry.file, entry.line) {
            println!(
                "[{}] [{}] [{}] {} ({}:{})",
                timestamp,
                severity_str,
                source,
                entry.message,
                file,
                line
            );
        } else {
            println!(
                "[{}] [{}] [{}] {}",
                timestamp,
                severity_str,
                source,
                entry.message
            );
        }
    }
}

// ===== GLOBAL LOGGER SLOT =====

fn logger_slot() -> &'static RwLock<Box<dyn Logger>> {
    static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)))
}

/// Replace the active logger
pub fn set_logger(logger: Box<dyn Logger>) {
    if let Ok(mut slot) = logger_slot().write() {
        *slot = logger;
    }
}

/// Restore the default colored console logger
pub fn reset_logger() {
    set_logger(Box::new(DefaultLogger));
}

/// Dispatch a log message to the active logger
pub fn log(severity: LogSeverity, source: &str, message: String) {
    log_detailed(severity, source, message, None, None);
}

/// Dispatch a log message with optional file:line details
pub fn log_detailed(
    severity: LogSeverity,
    source: &str,
    message: String,
    file: Option<&'static str>,
    line: Option<u32>,
) {
    let entry = LogEntry {
        severity,
        timestamp: SystemTime::now(),
        source: source.to_string(),
        message,
        file,
        line,
    };
    if let Ok(slot) = logger_slot().read() {
        slot.log(&entry);
    }
}

// ===== LOGGING MACROS =====

/// Log a TRACE message (very verbose, typically disabled)
///
/// # Example
///
/// ```no_run
/// lumen_3d_framework::lumen_trace!("lumen3d::Framebuffer", "Entering render pass");
/// ```
#[macro_export]
macro_rules! lumen_trace {
    ($source:expr, $($arg:tt)*) => {
        $crate::lumen3d::log::log(
            $crate::lumen3d::log::LogSeverity::Trace,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a DEBUG message (development information)
///
/// # Example
///
/// ```no_run
/// let count = 3;
/// lumen_3d_framework::lumen_debug!("lumen3d::ImageStore", "Uploaded {} images", count);
/// ```
#[macro_export]
macro_rules! lumen_debug {
    ($source:expr, $($arg:tt)*) => {
        $crate::lumen3d::log::log(
            $crate::lumen3d::log::LogSeverity::Debug,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an INFO message (important events)
///
/// # Example
///
/// ```no_run
/// lumen_3d_framework::lumen_info!("lumen3d::RenderContext", "Device initialized successfully");
/// ```
#[macro_export]
macro_rules! lumen_info {
    ($source:expr, $($arg:tt)*) => {
        $crate::lumen3d::log::log(
            $crate::lumen3d::log::LogSeverity::Info,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log a WARN message (potential issues)
///
/// # Example
///
/// ```no_run
/// lumen_3d_framework::lumen_warn!("lumen3d::FrameScheduler", "Fence pool empty, allocating");
/// ```
#[macro_export]
macro_rules! lumen_warn {
    ($source:expr, $($arg:tt)*) => {
        $crate::lumen3d::log::log(
            $crate::lumen3d::log::LogSeverity::Warn,
            $source,
            format!($($arg)*)
        )
    };
}

/// Log an ERROR message with file:line information
///
/// # Example
///
/// ```no_run
/// let error = "out of date";
/// lumen_3d_framework::lumen_error!("lumen3d::vulkan", "Failed to initialize: {}", error);
/// ```
#[macro_export]
macro_rules! lumen_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::lumen3d::log::log_detailed(
            $crate::lumen3d::log::LogSeverity::Error,
            $source,
            format!($($arg)*),
            Some(file!()),
            Some(line!())
        )
    };
}

/// Log an ERROR message and construct an `Error::BackendError` from it
///
/// # Example
///
/// ```no_run
/// let err = lumen_3d_framework::lumen_err!("lumen3d::Pipeline", "Shader stage missing");
/// ```
#[macro_export]
macro_rules! lumen_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::lumen3d::log::log_detailed(
            $crate::lumen3d::log::LogSeverity::Error,
            $source,
            message.clone(),
            Some(file!()),
            Some(line!())
        );
        $crate::lumen3d::Error::BackendError(message)
    }};
}

/// Log an ERROR message and return early with a `LumenError::BackendError`
///
/// # Example
///
/// ```no_run
/// fn check(layer: u32) -> lumen_3d_framework::lumen3d::Result<()> {
///     if layer > 7 {
///         lumen_3d_framework::lumen_bail!("lumen3d::Framebuffer", "Layer {} is out of range", layer);
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! lumen_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::lumen_err!($source, $($arg)*))
    };
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
