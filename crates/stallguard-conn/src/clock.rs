//! Monotonic timestamps and the clocks that produce them.

use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Nanoseconds elapsed since a clock's origin.
///
/// Arithmetic saturates at [`Timestamp::MAX`], so a computed deadline can
/// never collide with the "no deadline" state of [`AtomicDeadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX - 1);

    pub const fn from_nanos(nanos: u64) -> Self {
        if nanos > Self::MAX.0 {
            Self::MAX
        } else {
            Timestamp(nanos)
        }
    }

    pub fn from_duration(since_origin: Duration) -> Self {
        Self::from_nanos(duration_to_nanos(since_origin))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self::from_nanos(self.0.saturating_add(duration_to_nanos(d)))
    }

    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        self.saturating_add(rhs)
    }
}

pub(crate) fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Source of the current time for heartbeats and connections.
pub trait SystemClock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock backed by [`Instant`], measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.origin.elapsed())
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.as_nanos()),
        }
    }

    pub fn advance(&self, by: Duration) -> Timestamp {
        let by = duration_to_nanos(by);
        let prev = self.now.fetch_add(by, Ordering::AcqRel);
        Timestamp::from_nanos(prev.saturating_add(by))
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now.as_nanos(), Ordering::Release);
    }
}

impl SystemClock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.now.load(Ordering::Acquire))
    }
}

const NO_DEADLINE: u64 = u64::MAX;

/// An optional deadline updated with atomic loads, stores and CAS.
#[derive(Debug)]
pub struct AtomicDeadline(AtomicU64);

impl AtomicDeadline {
    pub const fn none() -> Self {
        AtomicDeadline(AtomicU64::new(NO_DEADLINE))
    }

    pub fn load(&self) -> Option<Timestamp> {
        decode(self.0.load(Ordering::Acquire))
    }

    pub fn is_armed(&self) -> bool {
        self.load().is_some()
    }

    pub fn store(&self, deadline: Option<Timestamp>) {
        self.0.store(encode(deadline), Ordering::Release);
    }

    /// Clears the deadline only if it still equals `expected`.
    pub fn clear_if(&self, expected: Timestamp) -> bool {
        self.0
            .compare_exchange(
                expected.as_nanos(),
                NO_DEADLINE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for AtomicDeadline {
    fn default() -> Self {
        Self::none()
    }
}

fn encode(deadline: Option<Timestamp>) -> u64 {
    deadline.map_or(NO_DEADLINE, Timestamp::as_nanos)
}

fn decode(raw: u64) -> Option<Timestamp> {
    (raw != NO_DEADLINE).then_some(Timestamp(raw))
}
