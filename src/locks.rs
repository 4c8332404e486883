//! Per-key mutation locks
//!
//! At most one mutation per content id (or unit id) is in flight. Under
//! [`LockPolicy::Queue`] a second mutation waits for the first, giving up with
//! a conflict after the configured timeout; under [`LockPolicy::Reject`] it
//! fails with a conflict straight away.
//!
//! The guard is a tokio mutex guard, so it can be held across the await of a
//! slow variant generator.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::LockPolicy;
use crate::error::CurriculumError;

type Slots = DashMap<String, Arc<Mutex<()>>>;

/// Held for the duration of one mutation. Dropping the last handle on a key
/// removes its slot, so the registry only tracks keys with work in flight.
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<Slots>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        release_slot(&self.locks, &self.key);
    }
}

/// Remove the slot for `key` once nothing but the registry refers to it
fn release_slot(locks: &Slots, key: &str) {
    locks.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
}

/// Registry of logical per-key locks
pub struct KeyedLocks {
    locks: Arc<Slots>,
    policy: LockPolicy,
    timeout: Duration,
}

impl KeyedLocks {
    pub fn new(policy: LockPolicy, timeout: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            policy,
            timeout,
        }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key` according to the configured policy
    pub async fn acquire(&self, key: &str) -> Result<KeyGuard, CurriculumError> {
        let slot = self.slot(key);

        let acquired = match self.policy {
            LockPolicy::Reject => slot.try_lock_owned().map_err(|_| {
                debug!(key = %key, "Mutation rejected, key busy");
                CurriculumError::Conflict(format!("{} has a mutation in flight", key))
            }),
            LockPolicy::Queue => match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
                Ok(guard) => Ok(guard),
                Err(_) => {
                    warn!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "Timed out waiting for key lock");
                    Err(CurriculumError::Conflict(format!(
                        "timed out waiting for in-flight mutation on {}",
                        key
                    )))
                }
            },
        };

        // `slot` was consumed by the lock call, so a failure leaves only the map's handle
        match acquired {
            Ok(guard) => Ok(KeyGuard {
                guard: Some(guard),
                key: key.to_string(),
                locks: self.locks.clone(),
            }),
            Err(e) => {
                release_slot(&self.locks, key);
                Err(e)
            }
        }
    }

    /// Number of keys with a mutation in flight or queued
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Lock key for a content item
pub fn content_key(id: &str) -> String {
    format!("content:{}", id)
}

/// Lock key for a unit
pub fn unit_key(id: &str) -> String {
    format!("unit:{}", id)
}
