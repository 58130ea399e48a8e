//! Shared helpers for the integration tests: unique socket and log file
//! paths so parallel tests never contend, plus cleanup.
#![allow(dead_code)]

use slogd::LoggingConfig;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Unique socket path under /tmp for test isolation.
pub fn unique_socket_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/slogd_test_{}_{}.sock", prefix, Uuid::new_v4()))
}

/// Unique log file path under /tmp for test isolation.
pub fn unique_log_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/slogd_test_{}_{}.log", prefix, Uuid::new_v4()))
}

/// Config tuned for tests: everything accepted, fast flushes.
pub fn test_config(prefix: &str) -> LoggingConfig {
    LoggingConfig {
        level: "DEBUG".to_string(),
        log_file: unique_log_path(prefix),
        socket_path: unique_socket_path(prefix),
        flush_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Remove the test's log file (plus rotated generations) and socket.
pub fn cleanup(config: &LoggingConfig) {
    let _ = std::fs::remove_file(&config.log_file);
    for i in 1..10 {
        let _ = std::fs::remove_file(format!("{}.{}", config.log_file.display(), i));
    }
    let _ = std::fs::remove_file(&config.socket_path);
}
