//! Periodic tick source that drives every tracked connection's timeouts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use stallguard_metrics::{record_heartbeat_duration, set_connections_tracked};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::{SystemClock, Timestamp};
use crate::connection_manager::{ConnectionManager, ManagedConnection};
use crate::debugger::Debugger;
use crate::timeout_control::TimeoutControl;
use crate::trace::ConnectionTrace;

pub trait HeartbeatHandler: Send + Sync {
    fn on_heartbeat(&self, now: Timestamp);
}

/// Anything the heartbeat can advance.
pub trait Tickable {
    fn tick(&self, now: Timestamp);
}

impl Tickable for TimeoutControl {
    fn tick(&self, now: Timestamp) {
        TimeoutControl::tick(self, now);
    }
}

/// Ticks every live connection of a [`ConnectionManager`].
///
/// Also serves as the clock connections read between beats: `now()` is the
/// timestamp of the most recent heartbeat.
pub struct HeartbeatManager<C: ?Sized> {
    connections: Arc<ConnectionManager<C>>,
    now: AtomicU64,
}

impl<C: Tickable + ManagedConnection + ?Sized> HeartbeatManager<C> {
    pub fn new(connections: Arc<ConnectionManager<C>>) -> Self {
        Self {
            connections,
            now: AtomicU64::new(0),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager<C>> {
        &self.connections
    }
}

impl<C: Tickable + ManagedConnection + ?Sized> HeartbeatHandler for HeartbeatManager<C> {
    fn on_heartbeat(&self, now: Timestamp) {
        self.now.store(now.as_nanos(), Ordering::Release);
        self.connections.walk(|connection| connection.tick(now));
        set_connections_tracked(self.connections.len());
    }
}

impl<C: ?Sized> SystemClock for HeartbeatManager<C>
where
    C: Send + Sync,
{
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.now.load(Ordering::Acquire))
    }
}

/// Runs its handlers once per interval.
pub struct Heartbeat {
    handlers: Vec<Arc<dyn HeartbeatHandler>>,
    clock: Arc<dyn SystemClock>,
    debugger: Arc<dyn Debugger>,
    trace: Arc<dyn ConnectionTrace>,
    interval: Duration,
    running: Mutex<()>,
    shutdown: CancellationToken,
}

impl Heartbeat {
    pub fn new(
        handlers: Vec<Arc<dyn HeartbeatHandler>>,
        clock: Arc<dyn SystemClock>,
        debugger: Arc<dyn Debugger>,
        trace: Arc<dyn ConnectionTrace>,
        interval: Duration,
    ) -> Self {
        Self {
            handlers,
            clock,
            debugger,
            trace,
            interval,
            running: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs every handler once with the current time.
    ///
    /// A beat that starts while the previous one is still running is skipped
    /// and reported as slow.
    pub fn on_heartbeat(&self) {
        let now = self.clock.now();

        let Some(_running) = self.running.try_lock() else {
            if !self.debugger.is_attached() {
                self.trace.heartbeat_slow(self.interval, self.interval, now);
            }
            return;
        };

        for handler in &self.handlers {
            handler.on_heartbeat(now);
        }

        let duration = self.clock.now().saturating_duration_since(now);
        record_heartbeat_duration(duration.as_secs_f64());
        if duration > self.interval && !self.debugger.is_attached() {
            self.trace.heartbeat_slow(duration, self.interval, now);
        }
    }

    /// Beats once immediately, then once per interval on a background task
    /// until [`stop`](Self::stop) is called or the heartbeat is dropped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.on_heartbeat();

        let heartbeat: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(heartbeat) = heartbeat.upgrade() else {
                            break;
                        };
                        heartbeat.on_heartbeat();
                    }
                }
            }
            debug!("heartbeat stopped");
        })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
