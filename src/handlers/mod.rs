//! Handler Table - Ordered handler collection shared by both sides.
//!
//! One collection type serves the two handler kinds; a [`MatchPolicy`]
//! selects the ordering and selection rule:
//!
//! - `FirstMatchWins` (interceptors): entries kept in priority order, a new
//!   entry is inserted before the first existing entry whose priority is
//!   strictly greater, so equal-priority entries stay FIFO. Selection stops
//!   at the first match.
//! - `FanOutAll` (monitors): entries kept in ascending handler-id order,
//!   selection collects every match.
//!
//! The table is used by the client-side registry and, mirrored, by the
//! server-side fan-out dispatcher.

use std::sync::Arc;

use crate::types::{
    DEFAULT_INTERCEPTOR_PRIORITY, DeviceTags, EventTypes, HandlerId, HandlerKind, InputEvent,
};
use crate::error::HandlerError;

// =============================================================================
// Consumer capability
// =============================================================================

/// Opaque callback capability a handler entry delivers into.
///
/// Client side this is the locally registered callback; server side it is
/// the delivery channel back to the owning session.
pub trait EventConsumer: Send + Sync {
    /// Deliver one cloned event to this consumer.
    fn on_event(&self, handler_id: HandlerId, event: &InputEvent);
}

// =============================================================================
// Entries & aggregates
// =============================================================================

/// One registered interceptor or monitor.
#[derive(Clone)]
pub struct HandlerEntry {
    pub id: HandlerId,
    pub kind: HandlerKind,
    pub event_types: EventTypes,
    pub device_tags: DeviceTags,
    /// Meaningful for interceptors only; monitors carry the default.
    pub priority: i32,
    pub consumer: Arc<dyn EventConsumer>,
}

impl HandlerEntry {
    /// Whether this entry wants the given event.
    pub fn matches(&self, event: &InputEvent) -> bool {
        self.event_types.contains(event.event_type())
            && event.source().matches_tags(self.device_tags)
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("event_types", &self.event_types)
            .field("device_tags", &self.device_tags)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a table set's combined capability.
///
/// Recomputed after every insert/remove; the registry compares before/after
/// snapshots to decide whether a server round-trip is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregateCapability {
    pub event_types: EventTypes,
    pub device_tags: DeviceTags,
    /// MIN over interceptor entries; [`DEFAULT_INTERCEPTOR_PRIORITY`] if none.
    pub priority: i32,
}

impl Default for AggregateCapability {
    fn default() -> Self {
        Self {
            event_types: EventTypes::empty(),
            device_tags: DeviceTags::empty(),
            priority: DEFAULT_INTERCEPTOR_PRIORITY,
        }
    }
}

// =============================================================================
// Handler table
// =============================================================================

/// Ordering and selection rule of a [`HandlerTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Priority order, deliver to the first match only.
    FirstMatchWins,
    /// Ascending id order, deliver to every match.
    FanOutAll,
}

/// Ordered collection of handler entries.
#[derive(Debug)]
pub struct HandlerTable {
    policy: MatchPolicy,
    entries: Vec<HandlerEntry>,
}

impl HandlerTable {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
        }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry at its policy-defined position.
    ///
    /// A duplicate id is a protocol error; the table is left untouched.
    pub fn insert(&mut self, entry: HandlerEntry) -> Result<(), HandlerError> {
        if self.contains(entry.id) {
            tracing::warn!(id = entry.id, "duplicate handler id insert rejected");
            return Err(HandlerError::DuplicateRegistration);
        }
        let pos = match self.policy {
            // Before the first entry with strictly greater priority:
            // equal-priority entries stay registration-ordered.
            MatchPolicy::FirstMatchWins => self
                .entries
                .iter()
                .position(|e| e.priority > entry.priority)
                .unwrap_or(self.entries.len()),
            MatchPolicy::FanOutAll => self
                .entries
                .iter()
                .position(|e| e.id > entry.id)
                .unwrap_or(self.entries.len()),
        };
        self.entries.insert(pos, entry);
        Ok(())
    }

    /// Remove the entry with this id, returning it.
    pub fn remove(&mut self, id: HandlerId) -> Option<HandlerEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove every entry that fails the predicate, returning how many went.
    pub fn retain(&mut self, keep: impl Fn(&HandlerEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| keep(e));
        before - self.entries.len()
    }

    pub fn get(&self, id: HandlerId) -> Option<&HandlerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerEntry> {
        self.entries.iter()
    }

    /// Select the first matching entry (meaningful under `FirstMatchWins`).
    pub fn select_first(&self, event: &InputEvent) -> Option<&HandlerEntry> {
        self.entries.iter().find(|e| e.matches(event))
    }

    /// Select every matching entry in table order (ascending id under
    /// `FanOutAll`). Ids are unique within a table, so the result is
    /// deduplicated by construction.
    pub fn select_all(&self, event: &InputEvent) -> Vec<&HandlerEntry> {
        self.entries.iter().filter(|e| e.matches(event)).collect()
    }
}

/// Combined capability over an interceptor table and a monitor table.
pub fn aggregate(interceptors: &HandlerTable, monitors: &HandlerTable) -> AggregateCapability {
    let mut agg = AggregateCapability::default();
    for entry in interceptors.iter().chain(monitors.iter()) {
        agg.event_types |= entry.event_types;
        agg.device_tags |= entry.device_tags;
    }
    agg.priority = interceptors
        .iter()
        .map(|e| e.priority)
        .min()
        .unwrap_or(DEFAULT_INTERCEPTOR_PRIORITY);
    agg
}

// =============================================================================
// TESTS
// =============================================================================
