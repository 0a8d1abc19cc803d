//! Connection tracking, timeout detection and shutdown orchestration.
//!
//! A server registers each accepted connection with a [`ConnectionManager`]
//! and gives it a [`TimeoutControl`]. A [`Heartbeat`] ticks a
//! [`HeartbeatManager`] once per interval, which walks the registry and
//! ticks every live connection. Violations are reported back through the
//! connection's [`TimeoutHandler`]; the core never closes a connection
//! itself. On shutdown, [`ConnectionManager::shutdown_connections`] closes
//! everything gracefully, escalating to an abort if the deadline passes.

pub mod clock;
pub mod connection_manager;
pub mod connection_reference;
pub mod debugger;
pub mod error;
pub mod heartbeat;
pub mod min_data_rate;
pub mod resource_counter;
pub mod shutdown;
pub mod timeout_control;
pub mod trace;

pub use clock::{AtomicDeadline, ManualClock, MonotonicClock, SystemClock, Timestamp};
pub use connection_manager::{ConnectionManager, ConnectionRegistration, ManagedConnection};
pub use connection_reference::ConnectionReference;
pub use debugger::{Debugger, DebuggerSwitch, NoDebugger};
pub use error::{ConnectionAborted, ConnectionError, DataRateError, TimeoutFeatureError};
pub use heartbeat::{Heartbeat, HeartbeatHandler, HeartbeatManager, Tickable};
pub use min_data_rate::MinDataRate;
pub use resource_counter::{FiniteCounter, ResourceCounter, ResourceLease};
pub use shutdown::{Completion, ShutdownConnection, ShutdownOutcome};
pub use timeout_control::{ConnectionTimeoutFeature, TimeoutControl, TimeoutHandler, TimeoutReason};
pub use trace::{ConnectionTrace, TracingTrace};
pub use tokio_util::sync::CancellationToken;
