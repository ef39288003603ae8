//! Handler Registry - Client-side table of interceptors and monitors.
//!
//! Owns the local handler tables for one client process, computes their
//! aggregate capability, and talks to the server through the [`Transport`]
//! collaborator only when that aggregate actually changes.
//!
//! # Locking
//!
//! One coarse mutex guards both the tables and the aggregate computation.
//! The server round-trip in [`HandlerRegistry::add_handler`] runs while the
//! lock is held: local state and server state transition atomically from
//! this client's point of view, at the cost of blocking concurrent registry
//! operations for the duration of the synchronous call. Do not convert this
//! to a fire-and-forget call without re-deriving that atomicity guarantee.
//!
//! # Add/remove asymmetry
//!
//! A failed round-trip on the add path rolls the local insert back and
//! surfaces the error. The remove path never rolls back: local removal is
//! final and a server notification failure is only logged.

use std::sync::{Arc, Mutex};

use crate::error::{HandlerError, TransportError};
use crate::handlers::{
    AggregateCapability, EventConsumer, HandlerEntry, HandlerTable, MatchPolicy, aggregate,
};
use crate::types::{
    DeviceTags, EventId, EventTypes, HandlerId, HandlerKind, MAX_HANDLER_ID, MAX_INPUT_HANDLERS,
    MIN_HANDLER_ID,
};

// =============================================================================
// Collaborator traits
// =============================================================================

/// Client-to-server registration channel.
///
/// The wire encoding is not this crate's concern; the contract is "deliver
/// this aggregate-capability update to the server for this client's session".
pub trait Transport: Send + Sync {
    /// Add or update the registration for one handler kind. Synchronous;
    /// the caller treats a failure as retryable.
    fn add_registration(
        &self,
        kind: HandlerKind,
        event_types: EventTypes,
        priority: i32,
        device_tags: DeviceTags,
    ) -> Result<(), TransportError>;

    /// Update or remove the registration for one handler kind.
    /// Fire-and-forget: failures are the transport's to log.
    fn remove_registration(
        &self,
        kind: HandlerKind,
        event_types: EventTypes,
        priority: i32,
        device_tags: DeviceTags,
    );
}

/// Where locally observed acknowledgments go (the server's consumption
/// tracker, reached through the session channel).
pub trait AckSink: Send + Sync {
    fn ack(&self, event_id: EventId, action_time_ms: i64);
}

// =============================================================================
// Registry
// =============================================================================

struct Tables {
    interceptors: HandlerTable,
    monitors: HandlerTable,
    /// Monotonic, never recycled within the process lifetime.
    next_id: HandlerId,
}

impl Tables {
    fn aggregate(&self) -> AggregateCapability {
        aggregate(&self.interceptors, &self.monitors)
    }

    fn table_mut(&mut self, kind: HandlerKind) -> &mut HandlerTable {
        match kind {
            HandlerKind::Interceptor => &mut self.interceptors,
            HandlerKind::Monitor => &mut self.monitors,
        }
    }

    fn table(&self, kind: HandlerKind) -> &HandlerTable {
        match kind {
            HandlerKind::Interceptor => &self.interceptors,
            HandlerKind::Monitor => &self.monitors,
        }
    }

    fn live_count(&self) -> usize {
        self.interceptors.len() + self.monitors.len()
    }
}

/// Client-side registry of locally registered interceptors and monitors.
///
/// Construct one per process at startup and pass it by handle to
/// collaborators; there is no ambient global instance.
pub struct HandlerRegistry {
    tables: Mutex<Tables>,
    transport: Arc<dyn Transport>,
    ack_sink: Arc<dyn AckSink>,
}

impl HandlerRegistry {
    pub fn new(transport: Arc<dyn Transport>, ack_sink: Arc<dyn AckSink>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                interceptors: HandlerTable::new(MatchPolicy::FirstMatchWins),
                monitors: HandlerTable::new(MatchPolicy::FanOutAll),
                next_id: MIN_HANDLER_ID,
            }),
            transport,
            ack_sink,
        }
    }

    /// Register a local handler and, when the aggregate capability grew,
    /// push the new aggregate to the server.
    ///
    /// `event_type_hint` is accepted for signature compatibility but is
    /// ignored: the effective mask is always recomputed from `device_tags`.
    pub fn add_handler(
        &self,
        kind: HandlerKind,
        event_type_hint: EventTypes,
        device_tags: DeviceTags,
        priority: i32,
        consumer: Option<Arc<dyn EventConsumer>>,
    ) -> Result<HandlerId, HandlerError> {
        let _ = event_type_hint;
        // Rejected before an id is consumed.
        let Some(consumer) = consumer else {
            return Err(HandlerError::InvalidHandler);
        };
        let event_types = device_tags.event_types();

        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        if tables.live_count() >= MAX_INPUT_HANDLERS {
            return Err(HandlerError::CapacityExceeded);
        }
        if tables.next_id >= MAX_HANDLER_ID {
            return Err(HandlerError::IdSpaceExhausted);
        }
        let id = tables.next_id;
        tables.next_id += 1;

        if event_types.is_empty() {
            return Err(HandlerError::InvalidEventType);
        }

        let before = tables.aggregate();
        tables.table_mut(kind).insert(HandlerEntry {
            id,
            kind,
            event_types,
            device_tags,
            priority,
            consumer,
        })?;
        let after = tables.aggregate();

        // Server round-trip only when this entry widened the aggregate.
        if after.event_types != before.event_types || !before.device_tags.contains(device_tags) {
            // Held lock is intentional: see module docs.
            if let Err(err) = self.transport.add_registration(
                kind,
                after.event_types,
                after.priority,
                after.device_tags,
            ) {
                // All-or-nothing: roll the local insert back.
                tables.table_mut(kind).remove(id);
                return Err(HandlerError::TransportFailure(err));
            }
        }
        Ok(id)
    }

    /// Remove a local handler. Local removal is final; a failed server
    /// notification is the transport's to log.
    pub fn remove_handler(&self, id: HandlerId, kind: HandlerKind) -> Result<(), HandlerError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let before = tables.aggregate();
        let Some(removed) = tables.table_mut(kind).remove(id) else {
            tracing::warn!(id, ?kind, "remove of unknown handler");
            return Err(HandlerError::InvalidHandler);
        };
        let after = tables.aggregate();

        // Weaker than the add-path coverage check on purpose: any overlap
        // with the prior aggregate notifies the server.
        if after.event_types != before.event_types
            || removed.device_tags.intersects(before.device_tags)
        {
            self.transport.remove_registration(
                kind,
                after.event_types,
                after.priority,
                after.device_tags,
            );
        }
        Ok(())
    }

    /// Look up a live entry by id within the given kind's table.
    pub fn find_handler(&self, id: HandlerId, kind: HandlerKind) -> Option<HandlerEntry> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.table(kind).get(id).cloned()
    }

    pub fn has_handler(&self, id: HandlerId, kind: HandlerKind) -> bool {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.table(kind).contains(id)
    }

    /// Aggregate event-type mask over all live entries.
    pub fn event_types(&self) -> EventTypes {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .aggregate()
            .event_types
    }

    /// Aggregate device-tag mask over all live entries.
    pub fn device_tags(&self) -> DeviceTags {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .aggregate()
            .device_tags
    }

    /// Minimum interceptor priority, or the default when none is registered.
    pub fn priority(&self) -> i32 {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .aggregate()
            .priority
    }

    /// Number of live entries, both kinds combined.
    pub fn handler_count(&self) -> usize {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .live_count()
    }

    /// Ack entry point: a transport-layer delivery calls this when a local
    /// consumer finishes processing a dispatched event.
    pub fn on_ack_received(&self, event_id: EventId, action_time_ms: i64) {
        self.ack_sink.ack(event_id, action_time_ms);
    }

    /// Drop every local entry. Used on local teardown when the server
    /// connection is already gone; no notifications are attempted.
    pub fn remove_all(&self) {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = tables.interceptors.retain(|_| false) + tables.monitors.retain(|_| false);
        if dropped > 0 {
            tracing::debug!(dropped, "cleared local handler tables");
        }
    }

    /// Deliver an incoming event to a locally registered handler.
    ///
    /// Called by the transport layer when the server fans an event out to
    /// this client. Unknown ids are logged and dropped; the server may race
    /// a local removal.
    pub fn deliver(&self, id: HandlerId, kind: HandlerKind, event: &crate::types::InputEvent) {
        let Some(entry) = self.find_handler(id, kind) else {
            tracing::debug!(id, ?kind, "delivery for unknown handler dropped");
            return;
        };
        // Consumer runs outside the lock.
        entry.consumer.on_event(id, event);
    }

    #[cfg(test)]
    fn set_next_id(&self, next: HandlerId) {
        self.tables.lock().unwrap().next_id = next;
    }
}

// =============================================================================
// TESTS
// =============================================================================
