//! Exclusive per-unit execution leases.
//!
//! A lease guarantees at-most-one concurrent execution per video unit.
//! Leases carry a TTL so that units held by a crashed worker can be
//! reclaimed and requeued.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use vbatch_models::VideoUnitId;

use crate::error::{QueueError, QueueResult};

/// An exclusivity token for one unit.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Worker holding the lease
    pub holder: String,
    /// When the lease was taken
    pub acquired_at: Instant,
    /// Lease lifetime
    pub ttl: Duration,
}

impl Lease {
    /// Check if the lease has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() > self.ttl
    }
}

/// Registry of live leases.
pub struct LeaseMap {
    inner: Mutex<HashMap<VideoUnitId, Lease>>,
}

impl LeaseMap {
    /// Create an empty lease map.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lease for a unit. Fails with [`QueueError::LeaseHeld`]
    /// if another holder owns an unexpired lease.
    pub fn acquire(
        &self,
        unit_id: &VideoUnitId,
        holder: impl Into<String>,
        ttl: Duration,
    ) -> QueueResult<()> {
        let holder = holder.into();
        let mut leases = self.inner.lock().unwrap();

        if let Some(existing) = leases.get(unit_id) {
            if !existing.is_expired() {
                return Err(QueueError::LeaseHeld {
                    unit: unit_id.to_string(),
                    holder: existing.holder.clone(),
                });
            }
            warn!(
                unit_id = %unit_id,
                stale_holder = %existing.holder,
                "Taking over expired lease"
            );
        }

        leases.insert(
            unit_id.clone(),
            Lease {
                holder,
                acquired_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    /// Release a lease. Only the current holder may release it.
    pub fn release(&self, unit_id: &VideoUnitId, holder: &str) {
        let mut leases = self.inner.lock().unwrap();
        if leases.get(unit_id).is_some_and(|l| l.holder == holder) {
            leases.remove(unit_id);
        }
    }

    /// Renew the holder's lease, restarting its TTL. A worker calls this
    /// between stage attempts so a long-running but healthy unit is not
    /// reclaimed. Returns `false` if the holder no longer owns an
    /// unexpired lease.
    pub fn renew(&self, unit_id: &VideoUnitId, holder: &str) -> bool {
        let mut leases = self.inner.lock().unwrap();
        match leases.get_mut(unit_id) {
            Some(lease) if lease.holder == holder && !lease.is_expired() => {
                lease.acquired_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Check whether `holder` still owns an unexpired lease on the unit.
    /// Commits are guarded by this so a reclaimed unit's stale worker
    /// cannot overwrite state.
    pub fn held_by(&self, unit_id: &VideoUnitId, holder: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(unit_id)
            .is_some_and(|l| l.holder == holder && !l.is_expired())
    }

    /// Check whether a unit currently has an unexpired lease.
    pub fn is_held(&self, unit_id: &VideoUnitId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(unit_id)
            .is_some_and(|l| !l.is_expired())
    }

    /// Remove and return every expired lease's unit ID, for requeueing.
    pub fn reclaim_expired(&self) -> Vec<VideoUnitId> {
        let mut leases = self.inner.lock().unwrap();
        let expired: Vec<VideoUnitId> = leases
            .iter()
            .filter(|(_, l)| l.is_expired())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            leases.remove(id);
        }
        expired
    }

    /// Number of live leases (expired ones included until reclaimed).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LeaseMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_exclusive_acquire() {
        let leases = LeaseMap::new();
        let unit = VideoUnitId::new();

        leases.acquire(&unit, "worker-1", TTL).unwrap();
        let err = leases.acquire(&unit, "worker-2", TTL).unwrap_err();
        assert!(matches!(err, QueueError::LeaseHeld { .. }));

        leases.release(&unit, "worker-1");
        leases.acquire(&unit, "worker-2", TTL).unwrap();
    }

    #[test]
    fn test_release_requires_holder() {
        let leases = LeaseMap::new();
        let unit = VideoUnitId::new();

        leases.acquire(&unit, "worker-1", TTL).unwrap();
        leases.release(&unit, "worker-2");
        assert!(leases.is_held(&unit));
    }

    #[test]
    fn test_expired_lease_is_taken_over() {
        let leases = LeaseMap::new();
        let unit = VideoUnitId::new();

        leases.acquire(&unit, "worker-1", Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        leases.acquire(&unit, "worker-2", TTL).unwrap();
    }

    #[test]
    fn test_renew_restarts_ttl() {
        let leases = LeaseMap::new();
        let unit = VideoUnitId::new();

        leases.acquire(&unit, "worker-1", Duration::from_millis(100)).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(leases.renew(&unit, "worker-1"));
        std::thread::sleep(Duration::from_millis(60));
        // 120ms elapsed overall, but the renewal restarted the clock.
        assert!(leases.held_by(&unit, "worker-1"));
    }

    #[test]
    fn test_renew_requires_live_ownership() {
        let leases = LeaseMap::new();
        let unit = VideoUnitId::new();

        leases.acquire(&unit, "worker-1", TTL).unwrap();
        assert!(!leases.renew(&unit, "worker-2"));

        let stale = VideoUnitId::new();
        leases.acquire(&stale, "worker-1", Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        // An expired lease cannot be revived; it must be re-acquired.
        assert!(!leases.renew(&stale, "worker-1"));
    }

    #[test]
    fn test_reclaim_expired() {
        let leases = LeaseMap::new();
        let dead = VideoUnitId::new();
        let live = VideoUnitId::new();

        leases.acquire(&dead, "worker-1", Duration::ZERO).unwrap();
        leases.acquire(&live, "worker-2", TTL).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let reclaimed = leases.reclaim_expired();
        assert_eq!(reclaimed, vec![dead]);
        assert_eq!(leases.len(), 1);
    }

    #[test]
    fn test_contended_acquire_has_one_winner() {
        let leases = Arc::new(LeaseMap::new());
        let unit = VideoUnitId::new();
        let wins = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let leases = Arc::clone(&leases);
                let unit = unit.clone();
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if leases.acquire(&unit, format!("worker-{i}"), TTL).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
