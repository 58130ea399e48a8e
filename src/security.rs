// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Admission control: message validation, per-client rate limiting and the
//! pre-start configuration checks.

use crate::config::LoggingConfig;
use crate::error::LogError;
use crate::levels::parse_level;
use crate::message::LogMessage;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maximum message text length in bytes
pub const MAX_MESSAGE_LENGTH: usize = 4096;
/// Maximum service name length in characters
pub const MAX_SERVICE_LENGTH: usize = 32;
/// Messages per second allowed from one client before a ban
pub const RATE_LIMIT_PER_SECOND: u32 = 50;
/// How long an offending client stays banned
pub const BAN_DURATION: Duration = Duration::from_secs(5 * 60);
/// Upper bound accepted for the ingress channel capacity
pub const MAX_BUFFER_SIZE: usize = 100_000;

/// Interval between rate limiter housekeeping passes
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Clients idle longer than this are forgotten
const CLIENT_IDLE_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Fixed security limits for the embedded profile.
pub struct SecurityConfig {
    pub max_message_length: usize,
    pub max_service_length: usize,
    pub allowed_service_chars: Regex,
    pub rate_limit_per_second: u32,
    pub ban_duration: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_message_length: MAX_MESSAGE_LENGTH,
            max_service_length: MAX_SERVICE_LENGTH,
            allowed_service_chars: Regex::new(r"^[A-Z0-9_-]+$")
                .expect("static service pattern is valid"),
            rate_limit_per_second: RATE_LIMIT_PER_SECOND,
            ban_duration: BAN_DURATION,
        }
    }
}

/// Per-client admission bookkeeping.
struct ClientInfo {
    last_access: Instant,
    message_count: u32,
    banned_until: Option<Instant>,
    total_messages: u64,
}

/// Token-bucket-per-second limiter with temporary bans.
pub struct RateLimiter {
    clients: Arc<Mutex<HashMap<String, ClientInfo>>>,
    rate_limit: u32,
    ban_duration: Duration,
    sweeper: CancellationToken,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            rate_limit: config.rate_limit_per_second,
            ban_duration: config.ban_duration,
            sweeper: CancellationToken::new(),
            sweep_handle: Mutex::new(None),
        }
    }

    /// Decide whether one more message from `client_id` is admitted.
    pub fn is_allowed(&self, client_id: &str) -> bool {
        let mut clients = self.clients.lock().unwrap();
        let now = Instant::now();

        if let Some(client) = clients.get_mut(client_id) {
            if client.banned_until.is_some_and(|until| now < until) {
                return false;
            }

            // New one-second window
            if now.duration_since(client.last_access) >= Duration::from_secs(1) {
                client.message_count = 0;
                client.last_access = now;
            }

            client.message_count += 1;
            client.total_messages += 1;

            if client.message_count > self.rate_limit {
                client.banned_until = Some(now + self.ban_duration);
                return false;
            }
            return true;
        }

        // First contact: always admitted
        clients.insert(
            client_id.to_string(),
            ClientInfo {
                last_access: now,
                message_count: 1,
                banned_until: None,
                total_messages: 1,
            },
        );
        true
    }

    /// Lifetime message total for a client, if it has been seen.
    pub fn total_messages(&self, client_id: &str) -> Option<u64> {
        self.clients
            .lock()
            .unwrap()
            .get(client_id)
            .map(|client| client.total_messages)
    }

    /// Start the housekeeping task that forgets long-idle clients.
    /// No-op when already running.
    pub fn spawn_sweep(&self) {
        let mut handle = self.sweep_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }

        let clients = Arc::clone(&self.clients);
        let token = self.sweeper.clone();
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + CLEANUP_INTERVAL,
                CLEANUP_INTERVAL,
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        clients.lock().unwrap().retain(|_, client| {
                            now.duration_since(client.last_access) <= CLIENT_IDLE_EXPIRY
                        });
                    }
                }
            }
        }));
    }

    /// Stop housekeeping and wait for it to exit. Safe to call repeatedly.
    pub async fn close(&self) {
        self.sweeper.cancel();
        let handle = self.sweep_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

/// Check an incoming message against the security limits.
pub fn validate_message(msg: &LogMessage, config: &SecurityConfig) -> Result<(), LogError> {
    if msg.message.len() > config.max_message_length {
        return Err(LogError::InvalidMessage(format!(
            "message too long: {} > {}",
            msg.message.len(),
            config.max_message_length
        )));
    }
    if msg.service.chars().count() > config.max_service_length {
        return Err(LogError::InvalidMessage(format!(
            "service name too long: {}",
            msg.service
        )));
    }
    if !config.allowed_service_chars.is_match(&msg.service) {
        return Err(LogError::InvalidMessage(format!(
            "service name contains invalid characters: {}",
            msg.service
        )));
    }
    if msg.message.contains('\0') {
        return Err(LogError::InvalidMessage(
            "message contains null bytes".to_string(),
        ));
    }
    Ok(())
}

fn validate_path(path: &Path, what: &str) -> Result<(), LogError> {
    if path.as_os_str().is_empty() {
        return Err(LogError::ConfigInvalid(format!("{} is not set", what)));
    }
    if !path.is_absolute() {
        return Err(LogError::ConfigInvalid(format!(
            "{} must be an absolute path",
            what
        )));
    }
    let text = path.to_string_lossy();
    if text.contains("..") || text.contains('\0') || text.contains('\n') || text.contains('\r') {
        return Err(LogError::ConfigInvalid(format!(
            "{} contains dangerous characters",
            what
        )));
    }
    Ok(())
}

/// Validate a configuration before the daemon starts with it.
pub fn validate_config(config: &LoggingConfig) -> Result<(), LogError> {
    validate_path(&config.log_file, "log_file")?;
    validate_path(&config.socket_path, "socket_path")?;

    parse_level(&config.level)
        .map_err(|_| LogError::ConfigInvalid(format!("invalid log level: {}", config.level)))?;

    if config.buffer_size == 0 {
        return Err(LogError::ConfigInvalid(
            "buffer_size must be positive".to_string(),
        ));
    }
    if config.buffer_size > MAX_BUFFER_SIZE {
        return Err(LogError::ConfigInvalid(format!(
            "buffer_size too large: {} > {}",
            config.buffer_size, MAX_BUFFER_SIZE
        )));
    }
    if !(config.max_file_size > 0.0) {
        return Err(LogError::ConfigInvalid(
            "max_file_size must be positive".to_string(),
        ));
    }

    Ok(())
}
