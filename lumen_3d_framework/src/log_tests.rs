/// Tests for the logging system
///
/// These tests swap the global logger for a capturing implementation,
/// so they are serialized to avoid cross-test interference.

use super::*;
use serial_test::serial;
use std::sync::{Arc, Mutex};

/// Logger that captures entries into a shared vector
struct CapturingLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CapturingLogger {
    fn log(&self, entry: &LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.clone());
        }
    }
}

fn install_capture() -> Arc<Mutex<Vec<LogEntry>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    set_logger(Box::new(CapturingLogger {
        entries: entries.clone(),
    }));
    entries
}

// ============================================================================
// Tests: Dispatch
// ============================================================================

#[test]
#[serial]
fn test_log_dispatches_to_active_logger() {
    let entries = install_capture();

    log(LogSeverity::Info, "lumen3d::test", "hello".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].source, "lumen3d::test");
    assert_eq!(captured[0].message, "hello");
    assert!(captured[0].file.is_none());
    assert!(captured[0].line.is_none());
    drop(captured);

    reset_logger();
}

#[test]
#[serial]
fn test_log_detailed_carries_file_and_line() {
    let entries = install_capture();

    log_detailed(
        LogSeverity::Error,
        "lumen3d::test",
        "boom".to_string(),
        Some("somewhere.rs"),
        Some(42),
    );

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].file, Some("somewhere.rs"));
    assert_eq!(captured[0].line, Some(42));
    drop(captured);

    reset_logger();
}

// ============================================================================
// Tests: Macros
// ============================================================================

#[test]
#[serial]
fn test_severity_macros_use_matching_severity() {
    let entries = install_capture();

    crate::lumen_trace!("lumen3d::test", "t");
    crate::lumen_debug!("lumen3d::test", "d");
    crate::lumen_info!("lumen3d::test", "i");
    crate::lumen_warn!("lumen3d::test", "w");
    crate::lumen_error!("lumen3d::test", "e");

    let captured = entries.lock().unwrap();
    let severities: Vec<LogSeverity> = captured.iter().map(|e| e.severity).collect();
    assert_eq!(
        severities,
        vec![
            LogSeverity::Trace,
            LogSeverity::Debug,
            LogSeverity::Info,
            LogSeverity::Warn,
            LogSeverity::Error,
        ]
    );
    // Only the error macro records file/line
    assert!(captured[3].file.is_none());
    assert!(captured[4].file.is_some());
    drop(captured);

    reset_logger();
}

#[test]
#[serial]
fn test_err_macro_builds_backend_error_and_logs() {
    let entries = install_capture();

    let err = crate::lumen_err!("lumen3d::test", "missing {}", "thing");
    match err {
        crate::error::Error::BackendError(msg) => assert_eq!(msg, "missing thing"),
        other => panic!("Expected BackendError, got {:?}", other),
    }

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].message, "missing thing");
    drop(captured);

    reset_logger();
}

#[test]
#[serial]
fn test_bail_macro_returns_early() {
    let entries = install_capture();

    fn fails() -> crate::error::Result<u32> {
        crate::lumen_bail!("lumen3d::test", "nope");
    }

    match fails() {
        Err(crate::error::Error::BackendError(msg)) => assert_eq!(msg, "nope"),
        other => panic!("Expected BackendError, got {:?}", other),
    }
    drop(entries);

    reset_logger();
}

// ============================================================================
// Tests: Severity Ordering
// ============================================================================

#[test]
fn test_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}
