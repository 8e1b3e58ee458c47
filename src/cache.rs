//! Short-lived cache for generated grids.
//!
//! One slot per key. Entries expire lazily: a read ignores a stale slot and
//! every miss sweeps out all stale slots before storing its result. A failed
//! computation is never stored, so the next request simply tries again.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Lookup<V> {
    pub value: Arc<V>,
    pub status: CacheStatus,
    pub generated_at: DateTime<Utc>,
}

pub struct ResponseCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, generated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - generated_at).to_std() {
            Ok(age) => age < self.ttl,
            // generated "in the future" means the clock went backwards; keep it
            Err(_) => true,
        }
    }

    /// Returns the stored value for `key` while it is younger than the TTL,
    /// otherwise runs `compute` and stores its result.
    ///
    /// `compute` runs without holding the lock, so two requests missing at
    /// the same time may both compute; the later write wins.
    pub fn get_or_compute<E, F>(&self, key: K, compute: F) -> Result<Lookup<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let now = self.clock.now();
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = slots.get(&key) {
                if self.is_fresh(entry.generated_at, now) {
                    return Ok(Lookup {
                        value: Arc::clone(&entry.value),
                        status: CacheStatus::Hit,
                        generated_at: entry.generated_at,
                    });
                }
            }
        }

        let value = Arc::new(compute()?);
        let generated_at = self.clock.now();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, entry| self.is_fresh(entry.generated_at, generated_at));
        slots.insert(
            key,
            CacheEntry {
                value: Arc::clone(&value),
                generated_at,
            },
        );
        Ok(Lookup {
            value,
            status: CacheStatus::Miss,
            generated_at,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
