// SPDX-License-Identifier: Apache-2.0 OR MIT
//! In-memory cache of recent log entries.
//!
//! Bounded LRU with an optional TTL. The recency list is a slab-backed
//! doubly-linked list: nodes live in a `Vec`, links are indices, freed slots
//! are recycled through a free list. Expiry is lazy on `get`; a background
//! sweep walking from the tail is hygiene only.

use crate::message::LogEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cache counters. `size` is current, the rest are lifetime totals and
/// survive `clear`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Node {
    key: String,
    entry: LogEntry,
    stamp: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct CacheInner {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    lookup: HashMap<String, usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.nodes[idx].as_ref().map(|node| (node.prev, node.next))
        else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.nodes[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.lookup.remove(&node.key);
        }
        self.free.push(idx);
    }

    fn evict_tail(&mut self) {
        if let Some(idx) = self.tail {
            self.remove(idx);
            self.evictions += 1;
        }
    }

    fn insert_front(&mut self, key: String, entry: LogEntry) {
        let node = Node {
            key: key.clone(),
            entry,
            stamp: Instant::now(),
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.push_front(idx);
        self.lookup.insert(key, idx);
    }
}

/// Recent-entries cache shared between the writer and external inspectors.
pub struct LogCache {
    inner: Arc<Mutex<CacheInner>>,
    max_size: usize,
    ttl: Duration,
    sweeper: CancellationToken,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LogCache {
    /// Create a cache bounded by `max_size` entries. A zero `ttl` disables
    /// expiry. The background sweep is not started here; see
    /// [`LogCache::spawn_sweep`].
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            max_size,
            ttl,
            sweeper: CancellationToken::new(),
            sweep_handle: Mutex::new(None),
        }
    }

    /// Insert or refresh an entry under `key` and mark it most recent.
    /// Evicts the least recently used node when over capacity.
    pub fn put(&self, key: String, entry: LogEntry) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(idx) = inner.lookup.get(&key).copied() {
            if let Some(node) = inner.nodes[idx].as_mut() {
                node.entry = entry;
                node.stamp = Instant::now();
            }
            inner.move_to_front(idx);
            return;
        }

        inner.insert_front(key, entry);
        if inner.lookup.len() > self.max_size {
            inner.evict_tail();
        }
    }

    /// Fetch an entry, refreshing its recency. Expired entries are removed
    /// and counted as misses.
    pub fn get(&self, key: &str) -> Option<LogEntry> {
        let mut inner = self.inner.lock().unwrap();

        let Some(idx) = inner.lookup.get(key).copied() else {
            inner.misses += 1;
            return None;
        };

        let expired = !self.ttl.is_zero()
            && inner.nodes[idx]
                .as_ref()
                .is_some_and(|node| node.stamp.elapsed() > self.ttl);
        if expired {
            inner.remove(idx);
            inner.misses += 1;
            return None;
        }

        inner.move_to_front(idx);
        inner.hits += 1;
        inner.nodes[idx].as_ref().map(|node| node.entry.clone())
    }

    /// Drop every entry. Counters are not reset.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.clear();
        inner.free.clear();
        inner.lookup.clear();
        inner.head = None;
        inner.tail = None;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.lookup.len(),
        }
    }

    /// Start the background sweep. Runs every `ttl / 2`, walking from the
    /// recency tail and dropping expired nodes until it meets a fresh one.
    /// No-op when the TTL is zero or the sweep is already running.
    pub fn spawn_sweep(&self) {
        if self.ttl.is_zero() {
            return;
        }
        let mut handle = self.sweep_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let ttl = self.ttl;
        let token = self.sweeper.clone();
        *handle = Some(tokio::spawn(async move {
            let period = ttl / 2;
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut inner = inner.lock().unwrap();
                        // The list is ordered by recency, not expiry, so
                        // stop at the first fresh node.
                        while let Some(idx) = inner.tail {
                            let expired = inner.nodes[idx]
                                .as_ref()
                                .is_some_and(|node| node.stamp.elapsed() > ttl);
                            if !expired {
                                break;
                            }
                            inner.remove(idx);
                            inner.evictions += 1;
                        }
                    }
                }
            }
        }));
    }

    /// Stop the sweep and wait for it to exit. Safe to call repeatedly.
    pub async fn close(&self) {
        self.sweeper.cancel();
        let handle = self.sweep_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for LogCache {
    fn drop(&mut self) {
        // Safety net only; owners are expected to call close().
        self.sweeper.cancel();
    }
}
