// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Lightweight logging system for embedded hosts.
//!
//! One daemon ([`LogServer`]) owns a rotating plain-text log file and a
//! unix socket; any number of local processes connect with [`LogClient`]
//! to submit messages, query past entries and adjust the minimum level.
//! Ingress is rate limited and validated, writes are batched for flash
//! friendliness, and a small LRU cache keeps the recent working set
//! queryable in memory.

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod levels;
pub mod message;
pub mod security;
pub mod server;

pub use cache::{CacheStats, LogCache};
pub use client::LogClient;
pub use config::LoggingConfig;
pub use error::LogError;
pub use levels::{parse_level, LogLevel};
pub use message::{FilterOptions, LogEntry, LogMessage, MessagePool, ProtocolMessage};
pub use security::{RateLimiter, SecurityConfig};
pub use server::{LogServer, ServerStats};

use std::path::PathBuf;

/// The capability surface of a logging transport: ingest, query, control
/// and lifecycle. [`LogClient`] is the real implementation; test doubles
/// implement the same trait and are interchangeable.
#[allow(async_fn_in_trait)]
pub trait Logging {
    /// Submit one message.
    async fn log(&self, service: &str, level: LogLevel, message: &str) -> Result<(), LogError>;

    /// Fetch entries from the daemon's log file.
    async fn get_entries(&self, filter: &FilterOptions) -> Result<Vec<LogEntry>, LogError>;

    /// Change the daemon's minimum level.
    async fn set_server_level(&self, level: LogLevel) -> Result<(), LogError>;

    /// Path of the daemon's log file.
    async fn get_log_file(&self) -> Result<PathBuf, LogError>;

    /// Round-trip health check.
    async fn ping(&self) -> Result<(), LogError>;

    /// Release the transport.
    async fn close(&self);
}

impl Logging for LogClient {
    async fn log(&self, service: &str, level: LogLevel, message: &str) -> Result<(), LogError> {
        LogClient::log(self, service, level, message).await
    }

    async fn get_entries(&self, filter: &FilterOptions) -> Result<Vec<LogEntry>, LogError> {
        LogClient::get_entries(self, filter).await
    }

    async fn set_server_level(&self, level: LogLevel) -> Result<(), LogError> {
        LogClient::set_server_level(self, level).await
    }

    async fn get_log_file(&self) -> Result<PathBuf, LogError> {
        LogClient::get_log_file(self).await
    }

    async fn ping(&self) -> Result<(), LogError> {
        LogClient::ping(self).await
    }

    async fn close(&self) {
        LogClient::close(self).await
    }
}
