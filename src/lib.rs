//! # input-relay
//!
//! Input-event distribution core of a system-wide input service: fans one
//! normalized key or pointer event out, in priority order, to out-of-process
//! interceptors and monitors, with exactly-once-per-consumer delivery,
//! explicit consumption of in-flight touch gestures, and the ack bookkeeping
//! an external ANR watchdog feeds on.
//!
//! ## Architecture
//!
//! ```text
//! normalized event → MonitorFanout ── interceptor? first match, terminal
//!                         │
//!                         ├── monitors: clone per match, id order
//!                         │        └── ConsumptionTracker (expected acks)
//!                         └── GestureGate (mark-consumed → synthetic cancel)
//! ```
//!
//! Client side, a [`registry::HandlerRegistry`] keeps the local handler
//! tables and pushes aggregate-capability deltas to the server only when
//! the aggregate actually changes. The [`timer::TimerManager`] is the
//! shared timeout facility both halves lean on.
//!
//! Everything out-of-scope (device capture, hit-testing, wire framing,
//! key-chord subscribers, process bookkeeping) is reached through the
//! collaborator traits on the module boundaries.
//!
//! ## Modules
//!
//! - [`types`] - Ids, capability masks, normalized events, constants
//! - [`error`] - Error taxonomy (no exception-style control flow)
//! - [`handlers`] - Ordered handler table shared by both sides
//! - [`registry`] - Client-side handler registry and transport seam
//! - [`server`] - Fan-out dispatcher, consumption tracker, gesture gate
//! - [`timer`] - Sorted, reentrancy-safe timer facility

pub mod error;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod timer;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use error::{HandlerError, TimerError, TransportError};

pub use handlers::{
    AggregateCapability, EventConsumer, HandlerEntry, HandlerTable, MatchPolicy,
};

pub use registry::{AckSink, HandlerRegistry, Transport};

pub use server::{
    AckOutcome, AnrChannel, AnrReporter, ConsumptionTracker, DeliveredSet, GestureGate,
    MonitorFanout,
};

pub use timer::{
    MAX_INTERVAL_MS, MAX_LONG_INTERVAL_MS, MAX_TIMER_COUNT, MIN_INTERVAL_MS, TimerCallback,
    TimerId, TimerManager,
};
