// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Message records, query filters and the wire envelope.
//!
//! JSON is used only on the socket between client and daemon. The log file
//! itself uses the plain-text line format from [`crate::codec`]; the two
//! never mix.

use crate::error::LogError;
use crate::levels::LogLevel;
use chrono::{DateTime, Local};
use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

/// Hard upper bound on the number of entries a single query may return.
pub const MAX_QUERY_LIMIT: usize = 10_000;

/// Largest accepted wire frame in bytes; longer frames close the connection.
pub const MAX_FRAME_SIZE: usize = 2048;

/// Read/write deadline applied to each protocol round trip.
pub const CONNECTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Protocol message types
pub const MSG_LOG: &str = "log";
pub const MSG_GET_ENTRIES: &str = "get_entries";
pub const MSG_UPDATE_LEVEL: &str = "update_level";
pub const MSG_SET_LEVEL: &str = "set_level";
pub const MSG_RESPONSE: &str = "response";
pub const MSG_ERROR: &str = "error";
pub const MSG_PING: &str = "ping";
pub const MSG_PONG: &str = "pong";
pub const MSG_LOG_FILE: &str = "log_file";
pub const MSG_GET_LOG_FILE: &str = "get_log_file";

fn now_local() -> DateTime<Local> {
    Local::now()
}

/// A log message as submitted by a client.
///
/// The timestamp defaults to the receive time when the client omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub service: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default = "now_local")]
    pub timestamp: DateTime<Local>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
}

impl LogMessage {
    /// Clear all fields so the record can be reused through the pool.
    pub(crate) fn reset(&mut self) {
        self.service.clear();
        self.message.clear();
        self.client_id.clear();
        self.level = LogLevel::Info;
        self.timestamp = Local::now();
    }
}

impl Default for LogMessage {
    fn default() -> Self {
        Self {
            service: String::new(),
            level: LogLevel::Info,
            message: String::new(),
            timestamp: Local::now(),
            client_id: String::new(),
        }
    }
}

/// A log record parsed back out of the file.
///
/// `raw` keeps the original formatted line the entry was parsed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub service: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Local>,
    pub raw: String,
}

/// Query filter. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Local>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Local>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Maximum entries to return; 0 means no limit up to [`MAX_QUERY_LIMIT`].
    #[serde(default)]
    pub limit: usize,
}

impl FilterOptions {
    pub fn validate(&self) -> Result<(), LogError> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(LogError::BadFilter(
                    "start time is after end time".to_string(),
                ));
            }
        }
        if self.limit > MAX_QUERY_LIMIT {
            return Err(LogError::BadFilter(format!(
                "limit {} exceeds maximum of {}",
                self.limit, MAX_QUERY_LIMIT
            )));
        }
        Ok(())
    }
}

/// Envelope for every request and response on the socket.
///
/// `data` stays dynamic until the type tag has been inspected; handlers
/// decode it into the concrete record afterwards. Unknown types round-trip
/// as plain strings in `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ProtocolMessage {
    pub fn new(msg_type: &str, data: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data,
        }
    }
}

/// Bounded free list of reusable message records.
///
/// Purely an allocation-pressure optimisation; nothing may depend on record
/// identity. Acquired records are always cleared.
pub struct MessagePool {
    slots: ArrayQueue<LogMessage>,
}

impl MessagePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: ArrayQueue::new(capacity),
        }
    }

    /// Take a cleared record from the pool, or allocate a fresh one.
    pub fn acquire(&self) -> LogMessage {
        self.slots.pop().unwrap_or_default()
    }

    /// Zero a record and hand it back. Dropped silently when the pool is full.
    pub fn release(&self, mut msg: LogMessage) {
        msg.reset();
        let _ = self.slots.push(msg);
    }
}
