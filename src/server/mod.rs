// SPDX-License-Identifier: Apache-2.0 OR MIT
//! The log daemon: owns the log file and the ingress socket, aggregates
//! messages from all connected clients.
//!
//! Lifecycle: [`LogServer::new`] validates the configuration and builds the
//! shared state, [`LogServer::start`] opens the file and socket and spawns
//! the worker tasks, [`LogServer::stop`] tears everything down in order and
//! is safe to call more than once.

mod connection;
mod monitor;
mod query;
mod writer;

use crate::cache::{CacheStats, LogCache};
use crate::codec::PadWidths;
use crate::config::LoggingConfig;
use crate::error::LogError;
use crate::levels::{parse_level, LogLevel};
use crate::message::{FilterOptions, LogEntry, LogMessage, MessagePool};
use crate::security::{self, RateLimiter, SecurityConfig};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Service name the daemon logs its own notices under
pub const SERVER_SERVICE: &str = "SLOG";

/// Socket file mode; the local namespace is trusted
const SOCKET_PERMISSIONS: u32 = 0o666;

/// Recent-entries cache size for the embedded profile
const CACHE_SIZE: usize = 100;
/// Recent-entries cache TTL
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Free-list capacity for recycled message records
const MESSAGE_POOL_CAPACITY: usize = 128;

/// Open log file plus the byte count appended since it was opened.
pub(crate) struct FileWriter {
    pub(crate) file: Option<std::fs::File>,
    pub(crate) current_size: u64,
}

/// Lifetime counters, updated lock-free on the hot paths.
pub(crate) struct StatCounters {
    pub(crate) total_messages: AtomicU64,
    pub(crate) total_clients: AtomicU64,
    pub(crate) current_clients: AtomicI64,
    pub(crate) file_rotations: AtomicU64,
    pub(crate) memory_usage: AtomicU64,
    pub(crate) last_rotation: Mutex<Option<DateTime<Local>>>,
    pub(crate) start_time: Instant,
}

/// State shared by every worker task. The daemon is the single owner; each
/// worker holds an `Arc` handle to the subset it touches.
pub(crate) struct ServerState {
    pub(crate) config: LoggingConfig,
    pub(crate) security: SecurityConfig,
    pub(crate) pad: PadWidths,
    pub(crate) writer: RwLock<FileWriter>,
    pub(crate) batch: Mutex<Vec<LogMessage>>,
    pub(crate) ingress: mpsc::Sender<LogMessage>,
    pub(crate) min_level: AtomicU8,
    pub(crate) clients: RwLock<HashSet<String>>,
    pub(crate) conn_counter: AtomicU64,
    pub(crate) stats: StatCounters,
    pub(crate) cache: LogCache,
    pub(crate) limiter: RateLimiter,
    pub(crate) pool: MessagePool,
    pub(crate) shutdown: CancellationToken,
    pub(crate) connections: TaskTracker,
}

pub(crate) fn current_min_level(state: &ServerState) -> LogLevel {
    LogLevel::from_u8(state.min_level.load(Ordering::Relaxed)).unwrap_or(LogLevel::Info)
}

/// Post one of the daemon's own notices into the ingress pipeline, falling
/// back to a direct write when the channel is full or closed.
pub(crate) fn post_notice(state: &ServerState, text: &str) {
    let mut msg = state.pool.acquire();
    msg.service.push_str(SERVER_SERVICE);
    msg.level = LogLevel::Info;
    msg.message.push_str(text);
    msg.timestamp = Local::now();
    msg.client_id.push_str("server");

    match state.ingress.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(msg)) | Err(TrySendError::Closed(msg)) => {
            writer::write_message(state, &msg);
            state.pool.release(msg);
        }
    }
}

fn build_state(
    config: LoggingConfig,
) -> Result<(Arc<ServerState>, mpsc::Receiver<LogMessage>), LogError> {
    security::validate_config(&config)?;
    let min_level = parse_level(&config.level).unwrap_or(LogLevel::Info);
    let pad = PadWidths::from_services(config.services.iter().map(String::as_str));
    let (ingress, rx) = mpsc::channel(config.buffer_size);
    let security = SecurityConfig::default();
    let limiter = RateLimiter::new(&security);

    let state = Arc::new(ServerState {
        config,
        security,
        pad,
        writer: RwLock::new(FileWriter {
            file: None,
            current_size: 0,
        }),
        batch: Mutex::new(Vec::with_capacity(writer::WRITE_BATCH_SIZE)),
        ingress,
        min_level: AtomicU8::new(min_level as u8),
        clients: RwLock::new(HashSet::new()),
        conn_counter: AtomicU64::new(0),
        stats: StatCounters {
            total_messages: AtomicU64::new(0),
            total_clients: AtomicU64::new(0),
            current_clients: AtomicI64::new(0),
            file_rotations: AtomicU64::new(0),
            memory_usage: AtomicU64::new(0),
            last_rotation: Mutex::new(None),
            start_time: Instant::now(),
        },
        cache: LogCache::new(CACHE_SIZE, CACHE_TTL),
        limiter,
        pool: MessagePool::new(MESSAGE_POOL_CAPACITY),
        shutdown: CancellationToken::new(),
        connections: TaskTracker::new(),
    });
    Ok((state, rx))
}

/// Snapshot of the daemon's runtime counters.
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub total_messages: u64,
    pub total_clients: u64,
    pub current_clients: i64,
    pub file_rotations: u64,
    pub memory_usage: u64,
    pub last_rotation: Option<DateTime<Local>>,
    pub uptime: Duration,
    pub cache: CacheStats,
}

/// The log daemon.
pub struct LogServer {
    state: Arc<ServerState>,
    ingress_rx: Mutex<Option<mpsc::Receiver<LogMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl LogServer {
    /// Validate the configuration and build the daemon. Nothing touches the
    /// filesystem until [`LogServer::start`].
    pub fn new(config: LoggingConfig) -> Result<Self, LogError> {
        let (state, rx) = build_state(config)?;
        Ok(Self {
            state,
            ingress_rx: Mutex::new(Some(rx)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Open the log file and socket and spawn the worker tasks.
    /// Calling `start` on an already-started daemon is a no-op.
    pub async fn start(&self) -> Result<(), LogError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(LogError::Shutdown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        writer::init_log_file(&self.state)?;
        let listener = self.bind_socket()?;

        let rx = self.ingress_rx.lock().unwrap().take();
        {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(rx) = rx {
                tasks.push(tokio::spawn(writer::run_ingest(
                    Arc::clone(&self.state),
                    rx,
                )));
            }
            tasks.push(tokio::spawn(writer::run_flush_timer(Arc::clone(
                &self.state,
            ))));
            tasks.push(tokio::spawn(connection::run_acceptor(
                Arc::clone(&self.state),
                listener,
            )));
            tasks.push(tokio::spawn(monitor::run_monitor(Arc::clone(&self.state))));
        }
        self.state.cache.spawn_sweep();
        self.state.limiter.spawn_sweep();

        post_notice(&self.state, "server started");
        Ok(())
    }

    fn bind_socket(&self) -> Result<UnixListener, LogError> {
        let socket_path = &self.state.config.socket_path;
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        std::fs::set_permissions(
            socket_path,
            std::fs::Permissions::from_mode(SOCKET_PERMISSIONS),
        )?;
        Ok(listener)
    }

    /// Stop the daemon: drain and flush pending messages, close every
    /// socket, join every worker, close the file, unlink the socket path.
    /// Idempotent.
    pub async fn stop(&self) -> Result<(), LogError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Queued before the shutdown signal so the drain pass writes it out
        post_notice(&self.state, "server stopping");

        self.state.shutdown.cancel();
        self.state.connections.close();
        self.state.connections.wait().await;

        self.state.limiter.close().await;
        self.state.cache.close().await;

        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.state.writer.write().unwrap().file.take();

        if self.state.config.socket_path.exists() {
            let _ = std::fs::remove_file(&self.state.config.socket_path);
        }
        Ok(())
    }

    /// Force pending batched messages to disk and sync the file.
    pub fn flush(&self) {
        writer::flush(&self.state);
    }

    /// Scan the current log file and return the entries matching `filter`.
    pub fn get_entries(&self, filter: &FilterOptions) -> Result<Vec<LogEntry>, LogError> {
        query::get_entries(&self.state, filter)
    }

    /// Current minimum level accepted at ingress.
    pub fn min_level(&self) -> LogLevel {
        current_min_level(&self.state)
    }

    pub fn log_file(&self) -> &Path {
        &self.state.config.log_file
    }

    pub fn socket_path(&self) -> &Path {
        &self.state.config.socket_path
    }

    pub fn stats(&self) -> ServerStats {
        let counters = &self.state.stats;
        ServerStats {
            total_messages: counters.total_messages.load(Ordering::Relaxed),
            total_clients: counters.total_clients.load(Ordering::Relaxed),
            current_clients: counters.current_clients.load(Ordering::Relaxed),
            file_rotations: counters.file_rotations.load(Ordering::Relaxed),
            memory_usage: counters.memory_usage.load(Ordering::Relaxed),
            last_rotation: *counters.last_rotation.lock().unwrap(),
            uptime: counters.start_time.elapsed(),
            cache: self.state.cache.stats(),
        }
    }
}

impl Drop for LogServer {
    fn drop(&mut self) {
        // Safety net; stop() is the supported path.
        self.state.shutdown.cancel();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::PathBuf;

    /// Build a state without spawning any worker, for driving the writer
    /// and connection handlers directly.
    pub(crate) fn state_for(
        config: LoggingConfig,
    ) -> (Arc<ServerState>, mpsc::Receiver<LogMessage>) {
        build_state(config).expect("test config is valid")
    }

    pub(crate) fn temp_config(tag: &str) -> LoggingConfig {
        let dir = std::env::temp_dir().join(format!("slogd_unit_{}_{}", tag, std::process::id()));
        LoggingConfig {
            log_file: dir.join("test.log"),
            socket_path: PathBuf::from(format!("/tmp/slogd_unit_{}_{}.sock", tag, std::process::id())),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = LoggingConfig {
            log_file: "relative.log".into(),
            ..Default::default()
        };
        assert!(matches!(
            LogServer::new(config),
            Err(LogError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_new_rejects_bad_level() {
        let config = LoggingConfig {
            level: "CHATTY".to_string(),
            log_file: "/tmp/slogd_test.log".into(),
            socket_path: "/tmp/slogd_test.sock".into(),
            ..Default::default()
        };
        assert!(LogServer::new(config).is_err());
    }

    #[test]
    fn test_initial_stats_are_zero() {
        let server = LogServer::new(test_support::temp_config("stats")).unwrap();
        let stats = server.stats();
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_clients, 0);
        assert_eq!(stats.current_clients, 0);
        assert_eq!(stats.file_rotations, 0);
        assert!(stats.last_rotation.is_none());
    }

    #[test]
    fn test_min_level_follows_config() {
        let mut config = test_support::temp_config("level");
        config.level = "warn".to_string();
        let server = LogServer::new(config).unwrap();
        assert_eq!(server.min_level(), LogLevel::Warn);
    }
}
