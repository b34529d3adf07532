//! Sticky session table.
//!
//! # Responsibilities
//! - Remember which partition a session key was assigned to
//! - Expire idle sessions after the configured TTL
//! - Keep the table bounded in size
//!
//! # Design Decisions
//! - Sharded concurrent map (DashMap); touched on every message without a global lock
//! - Expiry is lazy on read plus a periodic sweep
//! - When full, the least recently seen sessions are evicted in a batch

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    partition_id: u32,
    last_seen: Instant,
    messages: u64,
}

/// Concurrent session → partition map with TTL.
#[derive(Debug)]
pub struct SessionTable {
    entries: DashMap<String, SessionEntry>,
    /// `None` disables expiry.
    ttl: Option<Duration>,
    max_sessions: usize,
}

impl SessionTable {
    /// `ttl_secs = 0` keeps sessions until evicted for space.
    pub fn new(ttl_secs: u64, max_sessions: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Record activity for `key`, returning how many messages the session has seen.
    pub fn touch(&self, key: &str, partition_id: u32) -> u64 {
        self.touch_at(key, partition_id, Instant::now())
    }

    pub(crate) fn touch_at(&self, key: &str, partition_id: u32, now: Instant) -> u64 {
        let messages = {
            let mut entry = self.entries.entry(key.to_string()).or_insert(SessionEntry {
                partition_id,
                last_seen: now,
                messages: 0,
            });
            if self.is_expired(&entry, now) {
                entry.messages = 0;
            }
            entry.partition_id = partition_id;
            entry.last_seen = now;
            entry.messages += 1;
            entry.messages
        };

        if self.entries.len() > self.max_sessions {
            self.evict_oldest(key);
        }
        messages
    }

    /// Partition remembered for `key`, if the session is still live.
    pub fn get(&self, key: &str) -> Option<u32> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<u32> {
        let entry = *self.entries.get(key)?;
        if self.is_expired(&entry, now) {
            self.entries
                .remove_if(key, |_, current| self.is_expired(current, now));
            return None;
        }
        Some(entry.partition_id)
    }

    /// Drop every expired session. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: Instant) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(entry.last_seen) > ttl,
            None => false,
        }
    }

    /// Evict the oldest sessions in one pass, freeing a tenth of the capacity.
    fn evict_oldest(&self, keep: &str) {
        let excess = self.entries.len().saturating_sub(self.max_sessions);
        if excess == 0 {
            return;
        }
        let batch = excess + self.max_sessions / 10;
        let mut candidates: Vec<(Instant, String)> = self
            .entries
            .iter()
            .filter(|e| e.key() != keep)
            .map(|e| (e.value().last_seen, e.key().clone()))
            .collect();
        if candidates.len() > batch {
            candidates.select_nth_unstable(batch);
            candidates.truncate(batch);
        }
        for (_, key) in &candidates {
            self.entries.remove(key);
        }
        tracing::debug!(evicted = candidates.len(), "Evicted least recently seen sessions");
    }
}
