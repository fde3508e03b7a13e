use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::types::GenerationOutcome;

struct CachedOutcome {
    outcome: GenerationOutcome,
    inserted_at: Instant,
}

/// Keyed TTL cache for generation results.
///
/// Expired entries are evicted lazily on read and by `sweep`.
pub struct GenerationCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedOutcome>>,
}

impl GenerationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a cached outcome if still valid
    pub fn get(&self, key: &str) -> Option<GenerationOutcome> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(cached) if cached.inserted_at.elapsed() < self.ttl => {
                    debug!(key, "Using cached generation result");
                    return Some(cached.outcome.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict under the write lock, re-checking in case of a fresh insert
        let mut entries = self.entries.write();
        if let Some(cached) = entries.get(key) {
            if cached.inserted_at.elapsed() >= self.ttl {
                entries.remove(key);
                debug!(key, "Evicted expired generation result");
            }
        }
        None
    }

    /// Store an outcome. Concurrent inserts for one key: last write wins.
    pub fn insert(&self, key: &str, outcome: GenerationOutcome) {
        self.entries.write().insert(
            key.to_string(),
            CachedOutcome {
                outcome,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for `key` so the next submission reaches the API
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Evict every expired entry. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, cached| cached.inserted_at.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Swept generation cache");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        debug!("Clearing generation cache");
        self.entries.write().clear();
    }
}
