//! Error taxonomy for input-relay.
//!
//! Every public mutating operation returns a status value; there is no
//! exception-style control flow anywhere in this core. Stale consumption
//! requests and unknown acknowledgments are logged outcomes, not errors.

use thiserror::Error;

/// Failure reported by the transport collaborator when a registration
/// update could not be delivered to the server.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Distinguishable failures of handler registration and removal.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Unknown id, missing consumer, or a kind mismatch.
    #[error("invalid handler")]
    InvalidHandler,

    /// The registry already holds the maximum number of live entries.
    #[error("handler capacity exceeded")]
    CapacityExceeded,

    /// The monotonic id counter reached the end of the id space.
    #[error("handler id space exhausted")]
    IdSpaceExhausted,

    /// An entry with this id already exists. Protocol error; the
    /// operation fails closed with no partial mutation.
    #[error("duplicate registration")]
    DuplicateRegistration,

    /// The computed event-type mask is empty.
    #[error("invalid event type")]
    InvalidEventType,

    /// The server round-trip failed. On the add path the local insert has
    /// been rolled back; a caller may retry.
    #[error(transparent)]
    TransportFailure(#[from] TransportError),
}

/// Failures of timer registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TimerError {
    /// All timer slots are occupied.
    #[error("timer capacity exceeded")]
    CapacityExceeded,

    /// Non-positive repeat count.
    #[error("invalid timer parameters")]
    InvalidParameters,
}
