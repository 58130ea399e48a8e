// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Client side of the wire protocol.
//!
//! A [`LogClient`] connects to the daemon's socket, ships log messages and
//! runs query/control requests. Sends that fail are retried once over a
//! fresh connection; when the daemon stays unreachable the message is
//! written to stderr in the on-disk line format so nothing is lost silently.

use crate::codec::{self, PadWidths};
use crate::config::LoggingConfig;
use crate::error::LogError;
use crate::levels::{parse_level, LogLevel};
use crate::message::{
    FilterOptions, LogEntry, LogMessage, ProtocolMessage, CONNECTION_TIMEOUT, MSG_ERROR,
    MSG_GET_ENTRIES, MSG_GET_LOG_FILE, MSG_LOG, MSG_LOG_FILE, MSG_PING, MSG_PONG, MSG_SET_LEVEL,
};
use chrono::Local;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

/// Reconnection attempts before giving up on a send
const RECONNECT_ATTEMPTS: u32 = 5;
/// First reconnect back-off; doubles per attempt
const RECONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);
/// Back-off ceiling
const RECONNECT_BACKOFF_MAX: std::time::Duration = std::time::Duration::from_secs(10);

type Wire = Framed<UnixStream, LinesCodec>;

/// Connection to a running log daemon.
pub struct LogClient {
    config: LoggingConfig,
    level: AtomicU8,
    wire: Mutex<Option<Wire>>,
}

impl LogClient {
    /// Connect to the daemon at the configured socket path. The configured
    /// level becomes the client-local floor; messages below it are not sent.
    pub async fn connect(config: LoggingConfig) -> Result<Self, LogError> {
        let level = parse_level(&config.level).unwrap_or(LogLevel::Info);
        let client = Self {
            config,
            level: AtomicU8::new(level as u8),
            wire: Mutex::new(None),
        };
        let wire = client.dial().await?;
        *client.wire.lock().await = Some(wire);
        Ok(client)
    }

    async fn dial(&self) -> Result<Wire, LogError> {
        if self.config.socket_path.as_os_str().is_empty() {
            return Err(LogError::ConfigInvalid("socket_path is not set".to_string()));
        }
        let stream = timeout(
            CONNECTION_TIMEOUT,
            UnixStream::connect(&self.config.socket_path),
        )
        .await
        .map_err(|_| {
            LogError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })??;
        // No decode cap here: query responses may be large. The daemon's
        // inbound frame limit still applies to what this client sends.
        Ok(Framed::new(stream, LinesCodec::new()))
    }

    /// Re-dial with exponential back-off, replacing the broken connection.
    async fn reconnect(&self, wire: &mut Option<Wire>) -> Result<(), LogError> {
        *wire = None;
        let mut backoff = RECONNECT_BACKOFF;
        for _ in 0..RECONNECT_ATTEMPTS {
            match self.dial().await {
                Ok(fresh) => {
                    *wire = Some(fresh);
                    return Ok(());
                }
                Err(_) => {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                }
            }
        }
        Err(LogError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("reconnect failed after {} attempts", RECONNECT_ATTEMPTS),
        )))
    }

    /// Set the client-local level floor. Does not touch the daemon.
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Submit one log message. No response is expected; a send failure is
    /// retried once over a fresh connection and then falls back to stderr.
    pub async fn log(&self, service: &str, level: LogLevel, message: &str) -> Result<(), LogError> {
        if (level as u8) < self.level.load(Ordering::Relaxed) {
            return Ok(());
        }

        let msg = LogMessage {
            service: service.to_string(),
            level,
            message: message.to_string(),
            timestamp: Local::now(),
            client_id: String::new(),
        };
        let frame = encode(MSG_LOG, serde_json::to_value(&msg).unwrap_or_default())?;

        let mut wire = self.wire.lock().await;
        if wire.is_none() && self.reconnect(&mut wire).await.is_err() {
            fallback_to_stderr(&msg);
            return Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "log daemon unreachable",
            )));
        }

        let sent = match wire.as_mut() {
            Some(framed) => framed.send(frame.clone()).await.is_ok(),
            None => false,
        };
        if sent {
            return Ok(());
        }

        // One retry over a fresh connection before giving up
        if self.reconnect(&mut wire).await.is_ok() {
            if let Some(framed) = wire.as_mut() {
                if framed.send(frame).await.is_ok() {
                    return Ok(());
                }
            }
        }

        *wire = None;
        fallback_to_stderr(&msg);
        Err(LogError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "failed to send log message",
        )))
    }

    async fn request(
        &self,
        msg_type: &str,
        data: serde_json::Value,
    ) -> Result<ProtocolMessage, LogError> {
        let frame = encode(msg_type, data)?;

        let mut wire = self.wire.lock().await;
        if wire.is_none() {
            self.reconnect(&mut wire).await?;
        }
        let framed = wire.as_mut().ok_or(LogError::Shutdown)?;

        if framed.send(frame).await.is_err() {
            *wire = None;
            return Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to send request",
            )));
        }

        let reply = timeout(CONNECTION_TIMEOUT, framed.next()).await.map_err(|_| {
            LogError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "response timed out",
            ))
        })?;
        match reply {
            Some(Ok(line)) => serde_json::from_str(&line)
                .map_err(|e| LogError::InvalidMessage(format!("bad response envelope: {}", e))),
            _ => {
                *wire = None;
                Err(LogError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by daemon",
                )))
            }
        }
    }

    /// Query the daemon's log file.
    pub async fn get_entries(&self, filter: &FilterOptions) -> Result<Vec<LogEntry>, LogError> {
        filter.validate()?;
        let reply = self
            .request(MSG_GET_ENTRIES, serde_json::to_value(filter).unwrap_or_default())
            .await?;
        if reply.msg_type == MSG_ERROR {
            return Err(remote_error(&reply));
        }
        serde_json::from_value(reply.data)
            .map_err(|e| LogError::InvalidMessage(format!("bad entries payload: {}", e)))
    }

    /// Change the daemon's minimum level.
    pub async fn set_server_level(&self, level: LogLevel) -> Result<(), LogError> {
        let reply = self.request(MSG_SET_LEVEL, json!(level.as_str())).await?;
        if reply.msg_type == MSG_ERROR {
            return Err(remote_error(&reply));
        }
        Ok(())
    }

    /// Path of the daemon's log file.
    ///
    /// Short-circuit: when the client's own configuration already names the
    /// file, that path is returned without a round trip. Only an empty
    /// configured path goes to the daemon.
    pub async fn get_log_file(&self) -> Result<PathBuf, LogError> {
        if !self.config.log_file.as_os_str().is_empty() {
            return Ok(self.config.log_file.clone());
        }
        let reply = self.request(MSG_GET_LOG_FILE, json!("")).await?;
        if reply.msg_type != MSG_LOG_FILE {
            return Err(remote_error(&reply));
        }
        match reply.data.as_str() {
            Some(path) => Ok(PathBuf::from(path)),
            None => Err(LogError::InvalidMessage(
                "log file response is not a string".to_string(),
            )),
        }
    }

    /// Round-trip health check.
    pub async fn ping(&self) -> Result<(), LogError> {
        let reply = self.request(MSG_PING, json!("PING")).await?;
        if reply.msg_type != MSG_PONG {
            return Err(remote_error(&reply));
        }
        Ok(())
    }

    /// Drop the connection. Subsequent calls reconnect transparently.
    pub async fn close(&self) {
        *self.wire.lock().await = None;
    }
}

fn encode(msg_type: &str, data: serde_json::Value) -> Result<String, LogError> {
    serde_json::to_string(&ProtocolMessage::new(msg_type, data))
        .map_err(|e| LogError::InvalidMessage(e.to_string()))
}

fn remote_error(reply: &ProtocolMessage) -> LogError {
    let text = reply
        .data
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| reply.data.to_string());
    if text.contains("rate limited") {
        LogError::RateLimited
    } else {
        LogError::Remote(text)
    }
}

/// Last-resort sink when the daemon cannot be reached: the message goes to
/// stderr in the same line format the daemon would have written.
fn fallback_to_stderr(msg: &LogMessage) {
    eprintln!("{}", codec::format_message(msg, &PadWidths::default()));
}
