// Resource monitor: memory watchdog plus periodic self-telemetry.

use super::{post_notice, ServerState};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};

/// Memory sampling cadence
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Stats are posted into the log every this many samples
const STATS_EVERY_TICKS: u64 = 10;

/// Process memory ceiling before the cache is dropped
const MAX_MEMORY: u64 = 50 * 1024 * 1024;

/// Sample process memory once a minute; clear the cache when over budget.
/// Every ten minutes a JSON stats line is posted through the normal ingress
/// path under the daemon's own service name.
pub(crate) async fn run_monitor(state: Arc<ServerState>) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + MONITOR_INTERVAL,
        MONITOR_INTERVAL,
    );
    let mut sys = System::new();
    let pid = Pid::from_u32(std::process::id());
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                ticks += 1;

                sys.refresh_process(pid);
                if let Some(process) = sys.process(pid) {
                    let memory = process.memory();
                    state.stats.memory_usage.store(memory, Ordering::Relaxed);
                    if memory > MAX_MEMORY {
                        state.cache.clear();
                    }
                }

                if ticks % STATS_EVERY_TICKS == 0 {
                    log_stats(&state);
                }
            }
        }
    }
}

fn log_stats(state: &ServerState) {
    let counters = &state.stats;
    let cache = state.cache.stats();
    let lookups = cache.hits + cache.misses;
    let hit_rate = if lookups > 0 {
        cache.hits as f64 / lookups as f64 * 100.0
    } else {
        0.0
    };

    let stats = json!({
        "type": "server_stats",
        "uptime_seconds": counters.start_time.elapsed().as_secs(),
        "total_messages": counters.total_messages.load(Ordering::Relaxed),
        "total_clients": counters.total_clients.load(Ordering::Relaxed),
        "current_clients": counters.current_clients.load(Ordering::Relaxed),
        "memory_usage_mb": counters.memory_usage.load(Ordering::Relaxed) as f64 / 1024.0 / 1024.0,
        "file_rotations": counters.file_rotations.load(Ordering::Relaxed),
        "cache_size": cache.size,
        "cache_hit_rate": hit_rate,
    });

    post_notice(state, &stats.to_string());
}
