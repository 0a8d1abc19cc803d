//! Debugger detection used to suspend timeout enforcement.
//!
//! Stepping through a connection in a debugger stalls it; every timeout and
//! data-rate check consults a [`Debugger`] first and stays silent while one
//! is attached.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait Debugger: Send + Sync {
    fn is_attached(&self) -> bool;
}

/// A debugger that is never attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDebugger;

impl Debugger for NoDebugger {
    fn is_attached(&self) -> bool {
        false
    }
}

/// Shared, switchable attachment flag.
#[derive(Debug, Clone, Default)]
pub struct DebuggerSwitch {
    attached: Arc<AtomicBool>,
}

impl DebuggerSwitch {
    pub fn new(attached: bool) -> Self {
        Self {
            attached: Arc::new(AtomicBool::new(attached)),
        }
    }

    /// Checks the current process once for an attached tracer.
    pub fn from_process() -> Self {
        Self::new(tracer_attached())
    }

    pub fn set(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }
}

impl Debugger for DebuggerSwitch {
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }
}

#[cfg(target_os = "linux")]
fn tracer_attached() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| parse_tracer_pid(&status).is_some_and(|pid| pid != 0))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn tracer_attached() -> bool {
    false
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|pid| pid.trim().parse().ok())
}
