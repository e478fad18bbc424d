use lib_fixnet::loggers::logfile::{cleanup_old_logs, setup_logging};
use std::fs;
use tempfile::tempdir;

/// # Log File Integration Test
///
/// Installs the global fern logger into a temporary directory, writes a few
/// records and checks the file contents. A second, older file of the same
/// application is then created to check that cleanup keeps only the newest.
fn main() {
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let log_dir = temp_dir.path().to_path_buf();
    let app_name = "test_app";

    setup_logging(&log_dir, "debug", app_name).expect("Failed to set up logging");

    log::info!("This is an info message");
    log::warn!("This is a warning message");
    log::debug!("This is a debug message");
    log::trace!("This trace message is filtered");
    log::logger().flush();

    let log_files: Vec<_> = fs::read_dir(&log_dir)
        .expect("Failed to read log directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    assert_eq!(log_files.len(), 1, "Expected exactly one log file");

    let contents = fs::read_to_string(&log_files[0]).expect("Failed to read log file");
    assert!(contents.contains("[INFO] This is an info message"), "Info message not found");
    assert!(contents.contains("[WARN] This is a warning message"), "Warning message not found");
    assert!(contents.contains("This is a debug message"), "Debug message not found");
    assert!(!contents.contains("trace message"), "Trace message was not filtered");

    fs::write(log_dir.join("test_app_2000-01-01_00-00-00.log"), "old").expect("Failed to write old log");
    cleanup_old_logs(&log_dir, app_name).expect("Cleanup failed");

    let remaining: Vec<_> = fs::read_dir(&log_dir)
        .expect("Failed to read log directory after cleanup")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    assert_eq!(remaining, log_files, "Cleanup removed the wrong file");

    println!("Log file test passed: {}", remaining[0].display());
    temp_dir.close().expect("Failed to clean up temporary directory");
}
