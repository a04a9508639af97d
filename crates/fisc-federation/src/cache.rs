//! Response cache with single-flight fetches
//!
//! Keyed by call fingerprint (source id + canonical params). Concurrent
//! lookups of the same key share one in-flight fetch; only usable results
//! stay cached, until their TTL runs out.

use dashmap::DashMap;
use fisc_core::{CacheSettings, SourceAdapterResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    created_at: Instant,
    cell: OnceCell<SourceAdapterResult>,
}

impl Entry {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            cell: OnceCell::new(),
        }
    }

    /// In-flight entries never expire
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        self.cell.initialized() && now.saturating_duration_since(self.created_at) >= ttl
    }
}

#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: DashMap<String, Arc<Entry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: DashMap::new(),
        }
    }

    /// `None` when caching is disabled
    pub fn from_settings(settings: &CacheSettings) -> Option<Self> {
        settings
            .enabled
            .then(|| Self::new(settings.ttl(), settings.max_entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached or shared result for `key`, running `fetch` only when no fresh
    /// entry exists. Results handed to anyone but the fetching caller are
    /// flagged `from_cache`.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> SourceAdapterResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SourceAdapterResult>,
    {
        let entry = self.slot(key);
        let fetched = AtomicBool::new(false);
        let fetched_ref = &fetched;

        let mut result = entry
            .cell
            .get_or_init(|| async move {
                fetched_ref.store(true, Ordering::Relaxed);
                fetch().await
            })
            .await
            .clone();

        if fetched.load(Ordering::Relaxed) {
            if !result.status.is_usable() {
                self.entries
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &entry));
            }
        } else {
            debug!(key, source_id = %result.source_id, "Cache hit");
            result.from_cache = true;
        }
        result
    }

    /// Existing fresh entry, or a new one replacing an expired entry
    fn slot(&self, key: &str) -> Arc<Entry> {
        let now = Instant::now();
        if let Some(existing) = self.entries.get(key) {
            if !existing.is_expired(self.ttl, now) {
                return existing.clone();
            }
        }

        if !self.entries.contains_key(key) {
            self.make_room(now);
        }
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Entry::new()));
        if slot.is_expired(self.ttl, now) {
            *slot = Arc::new(Entry::new());
        }
        slot.clone()
    }

    /// Drop expired entries, then the oldest completed ones, until one slot is free
    fn make_room(&self, now: Instant) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.entries.retain(|_, e| !e.is_expired(self.ttl, now));

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .filter(|e| e.value().cell.initialized())
                .min_by_key(|e| e.value().created_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                // Everything is in flight
                None => break,
            }
        }
    }
}
