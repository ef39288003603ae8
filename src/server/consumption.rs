//! Consumption Tracker - Per-event pending-acknowledgment counts.
//!
//! When an event fans out to N monitors, the tracker records that N
//! acknowledgments are owed. Each ack decrements the count; the transition
//! to zero happens exactly once and is the unique trigger for the external
//! ANR watchdog's "last processed" reset on the monitor channel.
//!
//! Mouse-sourced events acknowledge exactly once by construction and use a
//! plain "seen" set with no count semantics. Native-token sessions are
//! exempt from tracking entirely.

use std::collections::{HashMap, HashSet};

use crate::types::{EventId, EventSource};

// =============================================================================
// Types
// =============================================================================

/// What one acknowledgment did to the tracked state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Every expected ack has arrived and the record is gone.
    ///
    /// `resets_watchdog` is true for counted (touch/touchpad) records only;
    /// the caller forwards the watchdog reset exactly when it is set.
    FullyAcked { resets_watchdog: bool },
    /// More acks are still owed.
    StillPending { remaining: usize },
    /// No record for this event id. Logged, not fatal.
    UnknownAck,
}

/// Tracks how many fanned-out monitors still owe an acknowledgment.
#[derive(Debug, Default)]
pub struct ConsumptionTracker {
    /// eventId -> pending ack count, for touch/touchpad-sourced events.
    pending: HashMap<EventId, usize>,
    /// Mouse-sourced events: acked the first time any ack arrives.
    mouse_seen: HashSet<EventId>,
}

impl ConsumptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fan-out count for an event at dispatch time.
    ///
    /// No-op unless the owning session is an application-managed token type.
    pub fn register_expected_acks(
        &mut self,
        event_id: EventId,
        source: EventSource,
        count: usize,
        owner_is_managed_app: bool,
    ) {
        if !owner_is_managed_app || count == 0 {
            return;
        }
        if source == EventSource::Mouse {
            self.mouse_seen.insert(event_id);
        } else {
            self.pending.insert(event_id, count);
        }
    }

    /// Apply one acknowledgment.
    ///
    /// The pending count is monotonically non-increasing and the record is
    /// removed exactly once, at the transition to zero.
    pub fn ack(&mut self, event_id: EventId) -> AckOutcome {
        if self.mouse_seen.remove(&event_id) {
            return AckOutcome::FullyAcked {
                resets_watchdog: false,
            };
        }
        let Some(count) = self.pending.get_mut(&event_id) else {
            tracing::debug!(event_id, "ack for untracked event ignored");
            return AckOutcome::UnknownAck;
        };
        *count -= 1;
        if *count > 0 {
            return AckOutcome::StillPending { remaining: *count };
        }
        self.pending.remove(&event_id);
        AckOutcome::FullyAcked {
            resets_watchdog: true,
        }
    }

    /// Pending ack count for an event, if tracked.
    pub fn pending(&self, event_id: EventId) -> Option<usize> {
        self.pending.get(&event_id).copied()
    }

    /// Number of events with outstanding acks (both kinds of record).
    pub fn tracked_count(&self) -> usize {
        self.pending.len() + self.mouse_seen.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_reaches_zero_exactly_once() {
        let mut tracker = ConsumptionTracker::new();
        tracker.register_expected_acks(10, EventSource::Touchscreen, 3, true);

        assert_eq!(tracker.ack(10), AckOutcome::StillPending { remaining: 2 });
        assert_eq!(tracker.ack(10), AckOutcome::StillPending { remaining: 1 });
        assert_eq!(
            tracker.ack(10),
            AckOutcome::FullyAcked {
                resets_watchdog: true
            }
        );
        // The record is gone; a late ack is unknown.
        assert_eq!(tracker.ack(10), AckOutcome::UnknownAck);
        assert_eq!(tracker.pending(10), None);
    }

    #[test]
    fn test_mouse_uses_seen_set() {
        let mut tracker = ConsumptionTracker::new();
        tracker.register_expected_acks(5, EventSource::Mouse, 2, true);

        // Count is ignored for mouse: first ack fully acknowledges and
        // never resets the monitor watchdog.
        assert_eq!(
            tracker.ack(5),
            AckOutcome::FullyAcked {
                resets_watchdog: false
            }
        );
        assert_eq!(tracker.ack(5), AckOutcome::UnknownAck);
    }

    #[test]
    fn test_native_session_exempt() {
        let mut tracker = ConsumptionTracker::new();
        tracker.register_expected_acks(7, EventSource::Touchscreen, 3, false);
        assert_eq!(tracker.tracked_count(), 0);
        assert_eq!(tracker.ack(7), AckOutcome::UnknownAck);
    }

    #[test]
    fn test_zero_count_not_recorded() {
        let mut tracker = ConsumptionTracker::new();
        tracker.register_expected_acks(7, EventSource::Touchscreen, 0, true);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_unknown_event_ignored() {
        let mut tracker = ConsumptionTracker::new();
        assert_eq!(tracker.ack(99), AckOutcome::UnknownAck);
    }

    #[test]
    fn test_interleaved_acks_across_events() {
        let mut tracker = ConsumptionTracker::new();
        tracker.register_expected_acks(1, EventSource::Touchscreen, 2, true);
        tracker.register_expected_acks(2, EventSource::Touchpad, 2, true);

        // Acks arrive in any order, interleaved across event ids.
        assert_eq!(tracker.ack(2), AckOutcome::StillPending { remaining: 1 });
        assert_eq!(tracker.ack(1), AckOutcome::StillPending { remaining: 1 });
        assert_eq!(
            tracker.ack(1),
            AckOutcome::FullyAcked {
                resets_watchdog: true
            }
        );
        assert_eq!(tracker.pending(2), Some(1));
        assert_eq!(
            tracker.ack(2),
            AckOutcome::FullyAcked {
                resets_watchdog: true
            }
        );
        assert_eq!(tracker.tracked_count(), 0);
    }
}
