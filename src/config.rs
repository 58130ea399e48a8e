// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration contract for the daemon and client.
//!
//! The daemon consumes a ready-made [`LoggingConfig`] from whatever loads it
//! (an embedding application, a service manager wrapper). JSON5 parsing is
//! provided for convenience; deep validation happens in
//! [`crate::security::validate_config`] right before the daemon starts.

use crate::error::LogError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_level() -> String {
    "INFO".to_string()
}

fn default_max_file_size() -> f64 {
    10.0
}

fn default_max_files() -> usize {
    5
}

fn default_buffer_size() -> usize {
    1000
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

/// Duration as (fractional) seconds in the config file.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if secs.is_finite() && secs > 0.0 {
            Ok(Duration::from_secs_f64(secs))
        } else {
            // Non-positive intervals fall back to the 1 s default at use site
            Ok(Duration::ZERO)
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Initial minimum level; must parse as a level name
    #[serde(default = "default_level")]
    pub level: String,

    /// Absolute path of the output log file
    pub log_file: PathBuf,

    /// Absolute path of the ingress unix socket
    pub socket_path: PathBuf,

    /// Rotation threshold in MiB
    #[serde(default = "default_max_file_size")]
    pub max_file_size: f64,

    /// Generations kept by rotation; 1 or less truncates in place
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Ingress channel capacity in messages
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Periodic flush cadence in seconds; zero or negative means 1 s
    #[serde(default = "default_flush_interval", with = "duration_secs")]
    pub flush_interval: Duration,

    /// Known service names; seeds column widths and, when
    /// `restrict_services` is set, acts as the ingress allow-list
    #[serde(default)]
    pub services: Vec<String>,

    /// Enforce the allow-list on ingress
    #[serde(default)]
    pub restrict_services: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_file: PathBuf::from("/var/log/slogd/slogd.log"),
            socket_path: PathBuf::from("/var/run/slogd.sock"),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            buffer_size: default_buffer_size(),
            flush_interval: default_flush_interval(),
            services: Vec::new(),
            restrict_services: false,
        }
    }
}

impl LoggingConfig {
    /// Parse a configuration from a JSON5 string (comments and trailing
    /// commas allowed).
    pub fn parse(content: &str) -> Result<Self, LogError> {
        json5::from_str(content).map_err(|e| LogError::ConfigInvalid(e.to_string()))
    }

    /// Load a configuration from a JSON5 file.
    pub fn load_from_file(path: &Path) -> Result<Self, LogError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}
