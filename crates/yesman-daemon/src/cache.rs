//! TTL session cache in front of the provider's session listing.
//!
//! Dashboards and controllers ask about sessions far more often than the
//! multiplexer needs to be asked. Each session id has its own slot lock,
//! held across the provider fetch, so concurrent misses on one key cause a
//! single fetch and every waiter sees the refreshed entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use yesman_pilot::provider::SessionProvider;
use yesman_types::{CacheConfig, ProviderError, SessionInfo};

/// Counters reported by [`SessionCache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Provider calls made by the cache.
    pub fetches: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    fetched_at: Option<Instant>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: None,
            fetched_at: None,
        }
    }
}

impl<T: Clone> Slot<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        match (&self.value, self.fetched_at) {
            (Some(value), Some(at)) if at.elapsed() < ttl => Some(value.clone()),
            _ => None,
        }
    }

    fn fill(&mut self, value: T) {
        self.value = Some(value);
        self.fetched_at = Some(Instant::now());
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.map_or(true, |at| at.elapsed() >= ttl)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Single-flight TTL cache of [`SessionInfo`] keyed by session id.
pub struct SessionCache {
    provider: Arc<dyn SessionProvider>,
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, Arc<Mutex<Slot<SessionInfo>>>>>,
    listing: Mutex<Slot<Vec<SessionInfo>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

impl SessionCache {
    pub fn new(provider: Arc<dyn SessionProvider>, config: &CacheConfig) -> Self {
        Self::with_ttl(provider, Duration::from_millis(config.ttl_ms), config.max_entries)
    }

    pub fn with_ttl(provider: Arc<dyn SessionProvider>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            provider,
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            listing: Mutex::new(Slot::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Metadata for one session.
    ///
    /// A session the provider does not list comes back `Inactive`. Provider
    /// failures are returned and nothing is cached.
    pub fn get(&self, session_id: &str) -> Result<SessionInfo, ProviderError> {
        let slot = {
            let mut entries = lock(&self.entries);
            if !entries.contains_key(session_id) && entries.len() >= self.max_entries {
                self.prune(&mut entries);
            }
            Arc::clone(
                entries
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(Slot::default()))),
            )
        };

        let mut slot = lock(&slot);
        if let Some(info) = slot.fresh(self.ttl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(info);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let sessions = self.fetch()?;
        let (fetched_at, expires_at) = self.stamps();
        let mut info = sessions
            .into_iter()
            .find(|s| s.id == session_id)
            .unwrap_or_else(|| SessionInfo::inactive(session_id));
        info.last_fetched_at = Some(fetched_at);
        info.cache_expires_at = expires_at;

        debug!(session = session_id, status = ?info.status, "session cache refreshed");
        slot.fill(info.clone());
        Ok(info)
    }

    /// Every session the provider knows, cached under the same TTL.
    pub fn list(&self) -> Result<Vec<SessionInfo>, ProviderError> {
        let mut listing = lock(&self.listing);
        if let Some(sessions) = listing.fresh(self.ttl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(sessions);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let (fetched_at, expires_at) = self.stamps();
        let sessions: Vec<SessionInfo> = self
            .fetch()?
            .into_iter()
            .map(|mut s| {
                s.last_fetched_at = Some(fetched_at);
                s.cache_expires_at = expires_at;
                s
            })
            .collect();
        listing.fill(sessions.clone());
        Ok(sessions)
    }

    /// Drop the entry for one session. The full listing is dropped too,
    /// since it contains that session.
    pub fn invalidate(&self, session_id: &str) {
        lock(&self.entries).remove(session_id);
        *lock(&self.listing) = Slot::default();
    }

    pub fn invalidate_all(&self) {
        lock(&self.entries).clear();
        *lock(&self.listing) = Slot::default();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: lock(&self.entries).len(),
        }
    }

    fn fetch(&self) -> Result<Vec<SessionInfo>, ProviderError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.provider.list_sessions()
    }

    fn stamps(&self) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        let now = Utc::now();
        let expires = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl));
        (now, expires)
    }

    /// Remove stale entries nobody is using.
    fn prune(&self, entries: &mut HashMap<String, Arc<Mutex<Slot<SessionInfo>>>>) {
        let before = entries.len();
        entries.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(slot) => !slot.is_stale(self.ttl),
                Err(_) => true,
            }
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, remaining = entries.len(), "pruned stale session cache entries");
        }
    }
}
