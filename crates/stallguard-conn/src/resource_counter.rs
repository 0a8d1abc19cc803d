//! Non-blocking counting of a limited resource, e.g. upgraded connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts how many units of a resource are in use.
///
/// `try_lock_one` never waits: it either takes a unit or reports exhaustion.
#[derive(Debug)]
pub enum ResourceCounter {
    Unlimited,
    Quota(FiniteCounter),
}

impl ResourceCounter {
    pub fn unlimited() -> Self {
        ResourceCounter::Unlimited
    }

    pub fn quota(max: u64) -> Self {
        ResourceCounter::Quota(FiniteCounter::new(max))
    }

    /// `None` means unlimited.
    pub fn from_limit(limit: Option<u64>) -> Self {
        limit.map_or_else(Self::unlimited, Self::quota)
    }

    pub fn try_lock_one(&self) -> bool {
        match self {
            ResourceCounter::Unlimited => true,
            ResourceCounter::Quota(counter) => counter.try_lock_one(),
        }
    }

    /// Must be paired with an earlier successful [`try_lock_one`](Self::try_lock_one).
    pub fn release_one(&self) {
        if let ResourceCounter::Quota(counter) = self {
            counter.release_one();
        }
    }

    /// Takes one unit and returns a lease that gives it back on drop.
    pub fn try_lease(self: &Arc<Self>) -> Option<ResourceLease> {
        self.try_lock_one().then(|| ResourceLease {
            counter: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FiniteCounter {
    max: u64,
    count: AtomicU64,
}

impl FiniteCounter {
    pub fn new(max: u64) -> Self {
        Self {
            max,
            count: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    fn try_lock_one(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max).then_some(count + 1)
            })
            .is_ok()
    }

    /// An unpaired release is logged and leaves the count at zero.
    fn release_one(&self) {
        if self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_err()
        {
            tracing::warn!(max = self.max, "released more resources than were locked");
        }
    }
}

/// RAII guard for one unit of a [`ResourceCounter`].
#[derive(Debug)]
pub struct ResourceLease {
    counter: Arc<ResourceCounter>,
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.counter.release_one();
    }
}
