// SPDX-License-Identifier: Apache-2.0 OR MIT
// Batched file writer: ingest loop, periodic flush, direct write path and
// size-based rotation.

use super::ServerState;
use crate::codec;
use crate::error::LogError;
use crate::levels::LogLevel;
use crate::message::{LogEntry, LogMessage};
use chrono::Local;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Messages accumulated before a batch is forced to disk. Sized for flash
/// write amplification, not throughput.
pub(crate) const WRITE_BATCH_SIZE: usize = 50;

/// Log file mode
pub(crate) const FILE_PERMISSIONS: u32 = 0o644;

/// Rough formatted-line size used to pre-size the write buffer
const LINE_SIZE_HINT: usize = 100;

/// Open the log file for append and pick up its current size as the
/// rotation baseline.
pub(crate) fn init_log_file(state: &ServerState) -> Result<(), LogError> {
    if let Some(dir) = state.config.log_file.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(FILE_PERMISSIONS)
        .open(&state.config.log_file)?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);

    let mut writer = state.writer.write().unwrap();
    writer.file = Some(file);
    writer.current_size = size;
    Ok(())
}

pub(crate) fn effective_flush_interval(state: &ServerState) -> Duration {
    if state.config.flush_interval.is_zero() {
        Duration::from_secs(1)
    } else {
        state.config.flush_interval
    }
}

/// Single consumer of the ingress channel.
///
/// Flushes when the batch is full, when a message of ERROR or higher
/// arrives, and on every ticker tick. On shutdown it drains whatever is
/// still queued, flushes once more and exits.
pub(crate) async fn run_ingest(state: Arc<ServerState>, mut rx: mpsc::Receiver<LogMessage>) {
    let period = effective_flush_interval(&state);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(msg) = received else { break };
                let level = msg.level;
                let full = {
                    let mut batch = state.batch.lock().unwrap();
                    batch.push(msg);
                    batch.len() >= WRITE_BATCH_SIZE
                };
                if full || level >= LogLevel::Error {
                    flush_batch(&state);
                }
            }
            _ = ticker.tick() => {
                flush_batch(&state);
            }
            _ = state.shutdown.cancelled() => {
                while let Ok(msg) = rx.try_recv() {
                    let full = {
                        let mut batch = state.batch.lock().unwrap();
                        batch.push(msg);
                        batch.len() >= WRITE_BATCH_SIZE
                    };
                    if full {
                        flush_batch(&state);
                    }
                }
                flush_batch(&state);
                break;
            }
        }
    }
}

/// Periodic flush worker: pushes the batch out and syncs the file so data
/// survives power loss within one flush interval.
pub(crate) async fn run_flush_timer(state: Arc<ServerState>) {
    let period = effective_flush_interval(&state);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => flush(&state),
            _ = state.shutdown.cancelled() => {
                flush(&state);
                break;
            }
        }
    }
}

/// Flush the batch and sync the file.
pub(crate) fn flush(state: &ServerState) {
    flush_batch(state);
    if let Some(file) = state.writer.read().unwrap().file.as_ref() {
        let _ = file.sync_all();
    }
}

/// Write the whole batch as one concatenated append, mirror each entry into
/// the cache, and recycle the records. A write error drops the batch after
/// reporting to stderr; ingest continues.
pub(crate) fn flush_batch(state: &ServerState) {
    let mut batch = state.batch.lock().unwrap();
    if batch.is_empty() {
        return;
    }
    let mut writer = state.writer.write().unwrap();
    if writer.file.is_none() {
        batch.clear();
        return;
    }

    let mut data = String::with_capacity(batch.len() * LINE_SIZE_HINT);
    for msg in batch.iter() {
        let line = codec::format_message(msg, &state.pad);
        state.cache.put(
            format!("{}_{}", msg.service, msg.timestamp.timestamp()),
            LogEntry {
                service: msg.service.clone(),
                level: msg.level,
                message: msg.message.clone(),
                timestamp: msg.timestamp,
                raw: line.clone(),
            },
        );
        data.push_str(&line);
        data.push('\n');
    }

    let write_res = writer
        .file
        .as_mut()
        .map(|file| file.write_all(data.as_bytes()));
    match write_res {
        Some(Ok(())) => {
            writer.current_size += data.len() as u64;
            state
                .stats
                .total_messages
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
        Some(Err(e)) => {
            // The batch is lost to the file; keep it visible on stderr
            eprintln!("slogd: failed to write log batch: {}", e);
            eprint!("{}", data);
        }
        None => {}
    }

    for msg in batch.drain(..) {
        state.pool.release(msg);
    }

    rotate_if_needed(state, &mut writer);
}

/// Bypass for critical messages and startup/shutdown notices: one line,
/// written under the file lock, synced when the level is ERROR or higher.
pub(crate) fn write_message(state: &ServerState, msg: &LogMessage) {
    let mut writer = state.writer.write().unwrap();
    let Some(file) = writer.file.as_mut() else {
        return;
    };

    let mut line = codec::format_message(msg, &state.pad);
    line.push('\n');

    let write_res = file.write_all(line.as_bytes());
    if write_res.is_ok() && msg.level >= LogLevel::Error {
        let _ = file.sync_all();
    }

    match write_res {
        Ok(()) => {
            writer.current_size += line.len() as u64;
            state.stats.total_messages.fetch_add(1, Ordering::Relaxed);
            rotate_if_needed(state, &mut writer);
        }
        Err(e) => eprintln!("slogd: failed to write log message: {}", e),
    }
}

fn rotate_if_needed(state: &ServerState, writer: &mut super::FileWriter) {
    let max_bytes = (state.config.max_file_size * 1024.0 * 1024.0) as u64;
    if writer.current_size < max_bytes {
        return;
    }
    if let Err(e) = rotate(state, writer) {
        eprintln!("slogd: log rotation failed: {}", e);
    }
}

/// Close the current file, age the generations and reopen fresh.
/// With `max_files` of 1 or less the file is truncated in place.
fn rotate(state: &ServerState, writer: &mut super::FileWriter) -> std::io::Result<()> {
    state.stats.file_rotations.fetch_add(1, Ordering::Relaxed);
    *state.stats.last_rotation.lock().unwrap() = Some(Local::now());

    writer.file = None;
    let path = &state.config.log_file;

    if state.config.max_files > 1 {
        for i in (0..=state.config.max_files - 2).rev() {
            let old = if i == 0 {
                path.clone()
            } else {
                numbered(path, i)
            };
            let new = numbered(path, i + 1);
            if old.exists() {
                let _ = std::fs::rename(&old, &new);
            }
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(FILE_PERMISSIONS)
        .open(path)?;
    writer.file = Some(file);
    writer.current_size = 0;
    Ok(())
}

fn numbered(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}
