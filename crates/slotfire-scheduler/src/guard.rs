use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slotfire_core::{CollisionKey, JobId};
use tracing::debug;

/// Keyed mutual exclusion: at most one in-flight dispatcher run per
/// collision key.
///
/// The lock is held only for the map insert/remove, never across an
/// executor call. Holding a key is represented by a [`CollisionPermit`],
/// which gives the key back when dropped, panics included.
#[derive(Debug, Default)]
pub struct CollisionGuard {
    active: Mutex<HashMap<CollisionKey, JobId>>,
}

impl CollisionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for `job_id`. On contention returns the id of the job
    /// currently holding it.
    pub fn acquire(
        self: &Arc<Self>,
        key: CollisionKey,
        job_id: &JobId,
    ) -> Result<CollisionPermit, JobId> {
        let mut active = self.lock();
        if let Some(holder) = active.get(&key) {
            return Err(holder.clone());
        }
        active.insert(key.clone(), job_id.clone());
        debug!(%key, %job_id, "collision key acquired");
        Ok(CollisionPermit {
            guard: Arc::clone(self),
            key,
        })
    }

    pub fn is_held(&self, key: &CollisionKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of keys currently held.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, key: &CollisionKey) {
        self.lock().remove(key);
        debug!(%key, "collision key released");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CollisionKey, JobId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of holding a collision key. Released on drop.
#[derive(Debug)]
#[must_use = "the key is released as soon as the permit is dropped"]
pub struct CollisionPermit {
    guard: Arc<CollisionGuard>,
    key: CollisionKey,
}

impl CollisionPermit {
    pub fn key(&self) -> &CollisionKey {
        &self.key
    }
}

impl Drop for CollisionPermit {
    fn drop(&mut self) {
        self.guard.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotfire_core::{OwnerId, ResourceKey};

    fn key(owner: &str, resource: &str) -> CollisionKey {
        CollisionKey::new(&OwnerId::from(owner), &ResourceKey::from(resource))
    }

    #[test]
    fn second_acquire_reports_holder() {
        let guard = Arc::new(CollisionGuard::new());
        let first = JobId::from("a");
        let _permit = guard.acquire(key("1", "court"), &first).unwrap();

        let holder = guard.acquire(key("1", "court"), &JobId::from("b")).unwrap_err();
        assert_eq!(holder, first);
        assert_eq!(guard.active_count(), 1);
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let guard = Arc::new(CollisionGuard::new());
        let _a = guard.acquire(key("1", "court"), &JobId::from("a")).unwrap();
        let _b = guard.acquire(key("2", "court"), &JobId::from("b")).unwrap();
        let _c = guard.acquire(key("1", "room"), &JobId::from("c")).unwrap();
        assert_eq!(guard.active_count(), 3);
    }

    #[test]
    fn colon_in_owner_does_not_block_other_pair() {
        let guard = Arc::new(CollisionGuard::new());
        let _a = guard.acquire(key("a:resource:b", "c"), &JobId::from("a")).unwrap();
        assert!(guard.acquire(key("a", "b:resource:c"), &JobId::from("b")).is_ok());
    }

    #[test]
    fn drop_releases_key() {
        let guard = Arc::new(CollisionGuard::new());
        let k = key("1", "court");
        {
            let permit = guard.acquire(k.clone(), &JobId::from("a")).unwrap();
            assert_eq!(permit.key(), &k);
            assert!(guard.is_held(&k));
        }
        assert!(!guard.is_held(&k));
        assert!(guard.acquire(k, &JobId::from("b")).is_ok());
    }

    #[test]
    fn panic_while_holding_releases_key() {
        let guard = Arc::new(CollisionGuard::new());
        let k = key("1", "court");
        let g = Arc::clone(&guard);
        let k2 = k.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = g.acquire(k2, &JobId::from("a")).unwrap();
            panic!("executor blew up");
        });
        assert!(result.is_err());
        assert_eq!(guard.active_count(), 0);
    }

    #[test]
    fn concurrent_acquire_admits_exactly_one() {
        let guard = Arc::new(CollisionGuard::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    guard
                        .acquire(key("1", "court"), &JobId::from(format!("job-{i}")))
                        .ok()
                        .map(std::mem::forget)
                        .is_some()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
