//! Per-connection timeout and minimum data-rate enforcement.
//!
//! A [`TimeoutControl`] is driven by the heartbeat through [`TimeoutControl::tick`]
//! and by the connection's own I/O paths through the arm/cancel and
//! read/write timing calls. It only detects violations; deciding what to do
//! about one is left to the [`TimeoutHandler`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::TimeDelta;
use parking_lot::Mutex;
use stallguard_core::HEARTBEAT_INTERVAL;

use crate::clock::{AtomicDeadline, Timestamp, duration_to_nanos};
use crate::debugger::Debugger;
use crate::error::TimeoutFeatureError;
use crate::min_data_rate::MinDataRate;

/// Why a deadline was armed, or which check fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TimeoutReason {
    None = 0,
    KeepAlive = 1,
    RequestHeaders = 2,
    ReadDataRate = 3,
    WriteDataRate = 4,
    RequestBodyDrain = 5,
    TimeoutFeature = 6,
}

impl TimeoutReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeoutReason::None => "none",
            TimeoutReason::KeepAlive => "keep_alive",
            TimeoutReason::RequestHeaders => "request_headers",
            TimeoutReason::ReadDataRate => "read_data_rate",
            TimeoutReason::WriteDataRate => "write_data_rate",
            TimeoutReason::RequestBodyDrain => "request_body_drain",
            TimeoutReason::TimeoutFeature => "timeout_feature",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TimeoutReason::KeepAlive,
            2 => TimeoutReason::RequestHeaders,
            3 => TimeoutReason::ReadDataRate,
            4 => TimeoutReason::WriteDataRate,
            5 => TimeoutReason::RequestBodyDrain,
            6 => TimeoutReason::TimeoutFeature,
            _ => TimeoutReason::None,
        }
    }
}

impl std::fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives detected timeouts. Called at most once per detection, never
/// while the control holds one of its locks.
pub trait TimeoutHandler: Send + Sync {
    fn on_timeout(&self, reason: TimeoutReason);
}

impl<F> TimeoutHandler for F
where
    F: Fn(TimeoutReason) + Send + Sync,
{
    fn on_timeout(&self, reason: TimeoutReason) {
        self(reason)
    }
}

#[derive(Debug, Default)]
struct ReadTiming {
    min_rate: Option<MinDataRate>,
    enabled: bool,
    pause_requested: bool,
    elapsed_nanos: u64,
}

#[derive(Debug, Default)]
struct WriteTiming {
    in_flight: u32,
    deadline: Timestamp,
    /// Set once a violation fired; cleared when no write is left in flight.
    reported: bool,
}

pub struct TimeoutControl {
    handler: Arc<dyn TimeoutHandler>,
    debugger: Arc<dyn Debugger>,
    heartbeat_interval: Duration,

    last_timestamp: AtomicU64,
    deadline: AtomicDeadline,
    armed_reason: AtomicU8,
    fired_reason: AtomicU8,

    read: Mutex<ReadTiming>,
    bytes_read: AtomicU64,
    write: Mutex<WriteTiming>,
}

impl TimeoutControl {
    pub fn new(handler: Arc<dyn TimeoutHandler>, debugger: Arc<dyn Debugger>) -> Self {
        Self {
            handler,
            debugger,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            last_timestamp: AtomicU64::new(0),
            deadline: AtomicDeadline::none(),
            armed_reason: AtomicU8::new(TimeoutReason::None as u8),
            fired_reason: AtomicU8::new(TimeoutReason::None as u8),
            read: Mutex::new(ReadTiming::default()),
            bytes_read: AtomicU64::new(0),
            write: Mutex::new(WriteTiming::default()),
        }
    }

    pub fn initialize(&self, now: Timestamp) {
        self.last_timestamp.store(now.as_nanos(), Ordering::Release);
    }

    /// Reason of the most recent absolute timeout that fired.
    pub fn timer_reason(&self) -> TimeoutReason {
        TimeoutReason::from_u8(self.fired_reason.load(Ordering::Acquire))
    }

    pub fn is_timeout_armed(&self) -> bool {
        self.deadline.is_armed()
    }

    pub fn tick(&self, now: Timestamp) {
        self.check_for_timeout(now);
        self.check_for_read_data_rate_timeout(now);
        self.check_for_write_data_rate_timeout(now);
        self.last_timestamp.store(now.as_nanos(), Ordering::Release);
    }

    fn last_timestamp(&self) -> Timestamp {
        Timestamp::from_nanos(self.last_timestamp.load(Ordering::Acquire))
    }

    fn check_for_timeout(&self, now: Timestamp) {
        if self.debugger.is_attached() {
            return;
        }
        let Some(deadline) = self.deadline.load() else {
            return;
        };
        if now <= deadline {
            return;
        }
        let reason = TimeoutReason::from_u8(self.armed_reason.load(Ordering::Acquire));
        // A concurrent reset or cancel wins over this detection.
        if self.deadline.clear_if(deadline) {
            self.fired_reason.store(reason as u8, Ordering::Release);
            self.handler.on_timeout(reason);
        }
    }

    fn check_for_read_data_rate_timeout(&self, now: Timestamp) {
        // An armed deadline already bounds how long this connection can stall.
        if self.deadline.is_armed() {
            return;
        }

        let mut timed_out = false;
        {
            let mut read = self.read.lock();
            if !read.enabled {
                return;
            }

            // Overly long gaps between ticks point at server contention, not
            // at a slow peer, so never count more than one interval per tick.
            let since_last = now
                .saturating_duration_since(self.last_timestamp())
                .min(self.heartbeat_interval);
            read.elapsed_nanos = read.elapsed_nanos.saturating_add(duration_to_nanos(since_last));

            if let Some(rate) = read.min_rate
                && rate.bytes_per_second() > 0.0
                && read.elapsed_nanos > rate.grace_period_nanos()
            {
                let elapsed_secs = read.elapsed_nanos as f64 / 1_000_000_000.0;
                let observed = self.bytes_read.load(Ordering::Acquire) as f64 / elapsed_secs;
                timed_out = observed < rate.bytes_per_second() && !self.debugger.is_attached();
            }

            // A violation is reported once. A pause only lands after this
            // tick has measured the last partial interval.
            if timed_out || read.pause_requested {
                read.enabled = false;
                read.pause_requested = false;
            }
        }

        if timed_out {
            self.handler.on_timeout(TimeoutReason::ReadDataRate);
        }
    }

    fn check_for_write_data_rate_timeout(&self, now: Timestamp) {
        let timed_out = {
            let mut write = self.write.lock();
            let timed_out = !write.reported
                && write.in_flight > 0
                && now > write.deadline
                && !self.debugger.is_attached();
            write.reported |= timed_out;
            timed_out
        };

        if timed_out {
            self.handler.on_timeout(TimeoutReason::WriteDataRate);
        }
    }

    /// Arms a deadline `span` plus one heartbeat interval after the last tick.
    ///
    /// Only one deadline may be armed at a time; cancel before arming again,
    /// or use [`reset_timeout`](Self::reset_timeout).
    pub fn set_timeout(&self, span: Duration, reason: TimeoutReason) {
        debug_assert!(
            !self.deadline.is_armed(),
            "concurrent timeouts are not supported"
        );
        self.assign_timeout(span, reason);
    }

    pub fn reset_timeout(&self, span: Duration, reason: TimeoutReason) {
        self.assign_timeout(span, reason);
    }

    fn assign_timeout(&self, span: Duration, reason: TimeoutReason) {
        self.armed_reason.store(reason as u8, Ordering::Release);
        // The pad covers arming just before the next tick.
        let deadline = self
            .last_timestamp()
            .saturating_add(span)
            .saturating_add(self.heartbeat_interval);
        self.deadline.store(Some(deadline));
    }

    pub fn cancel_timeout(&self) {
        self.deadline.store(None);
    }

    pub fn start_timing_reads(&self, min_rate: MinDataRate) {
        let mut read = self.read.lock();
        read.min_rate = Some(min_rate);
        read.elapsed_nanos = 0;
        read.enabled = true;
        read.pause_requested = false;
        self.bytes_read.store(0, Ordering::Release);
    }

    pub fn stop_timing_reads(&self) {
        let mut read = self.read.lock();
        read.enabled = false;
        read.pause_requested = false;
    }

    /// Takes effect after the next tick.
    pub fn pause_timing_reads(&self) {
        self.read.lock().pause_requested = true;
    }

    pub fn resume_timing_reads(&self) {
        let mut read = self.read.lock();
        read.enabled = true;
        read.pause_requested = false;
    }

    pub fn bytes_read(&self, count: u64) {
        self.bytes_read.fetch_add(count, Ordering::AcqRel);
    }

    /// Registers an in-flight write of `size` bytes that must finish at
    /// `min_rate`.
    ///
    /// A fresh write gets the grace period measured from now. Writes queued
    /// behind others extend the running deadline by their transfer time only,
    /// so grace periods never compound.
    pub fn start_timing_write(&self, min_rate: &MinDataRate, size: u64) {
        let transfer = min_rate.nanos_to_transfer(size);
        let upper_bound = self.last_timestamp().saturating_add(self.heartbeat_interval);
        let single = Timestamp::from_nanos(
            upper_bound
                .as_nanos()
                .saturating_add(transfer.max(min_rate.grace_period_nanos())),
        );

        let mut write = self.write.lock();
        let accumulated = Timestamp::from_nanos(write.deadline.as_nanos().saturating_add(transfer));
        write.deadline = single.max(accumulated);
        write.in_flight += 1;
    }

    pub fn stop_timing_write(&self) {
        let mut write = self.write.lock();
        debug_assert!(write.in_flight > 0, "stopped a write that was never started");
        write.in_flight = write.in_flight.saturating_sub(1);
        if write.in_flight == 0 {
            write.reported = false;
        }
    }
}

impl std::fmt::Debug for TimeoutControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutControl")
            .field("last_timestamp", &self.last_timestamp())
            .field("deadline", &self.deadline.load())
            .field(
                "armed_reason",
                &TimeoutReason::from_u8(self.armed_reason.load(Ordering::Relaxed)),
            )
            .finish_non_exhaustive()
    }
}

/// Application-facing timeout control measured in signed spans.
pub trait ConnectionTimeoutFeature {
    /// Fails if `span` is negative or a timeout is already armed.
    fn set_timeout(&self, span: TimeDelta) -> Result<(), TimeoutFeatureError>;

    /// Fails if `span` is negative. Replaces any armed timeout.
    fn reset_timeout(&self, span: TimeDelta) -> Result<(), TimeoutFeatureError>;

    fn cancel_timeout(&self);
}

fn non_negative(span: TimeDelta) -> Result<Duration, TimeoutFeatureError> {
    span.to_std().map_err(|_| TimeoutFeatureError::NegativeTimeout(span))
}

impl ConnectionTimeoutFeature for TimeoutControl {
    fn set_timeout(&self, span: TimeDelta) -> Result<(), TimeoutFeatureError> {
        let span = non_negative(span)?;
        if self.deadline.is_armed() {
            return Err(TimeoutFeatureError::ConcurrentTimeouts);
        }
        TimeoutControl::set_timeout(self, span, TimeoutReason::TimeoutFeature);
        Ok(())
    }

    fn reset_timeout(&self, span: TimeDelta) -> Result<(), TimeoutFeatureError> {
        let span = non_negative(span)?;
        TimeoutControl::reset_timeout(self, span, TimeoutReason::TimeoutFeature);
        Ok(())
    }

    fn cancel_timeout(&self) {
        TimeoutControl::cancel_timeout(self);
    }
}
