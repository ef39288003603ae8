//! Gesture Consumption Gate - Claiming an in-flight touch sequence.
//!
//! Tracks exactly one concurrently-active single-pointer touch sequence.
//! A monitor may claim ("consume") the current gesture; the gate then
//! synthesizes a cancellation event, flagged to bypass the interceptor and
//! monitor layers, that the caller feeds back into dispatch so only window
//! delivery sees the gesture end.
//!
//! Scope: genuine events only. Synthetic (bypass-flagged) events and
//! non-touch-capable sources never touch the gesture state. Multi-finger
//! intermediate states update the last-event snapshot but leave the
//! down/consumed bookkeeping alone.

use crate::types::{DispatchFlags, EventId, EventSource, InputEvent, PointerAction, PointerEvent};

// =============================================================================
// Gate
// =============================================================================

/// State of the one active touch sequence.
#[derive(Debug, Default)]
pub struct GestureGate {
    /// Event id of the down that opened the current sequence.
    down_event_id: Option<EventId>,
    /// Whether a monitor has claimed the current sequence.
    consumed: bool,
    /// Snapshot the synthetic cancel is cloned from.
    last_event: Option<PointerEvent>,
}

impl GestureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a genuine pointer event from the pipeline.
    ///
    /// Down with exactly one active contact opens a fresh sequence
    /// (clearing any previous consumption); up with one contact closes it.
    /// Everything else only refreshes the last-event snapshot.
    pub fn update_on_real_event(&mut self, event: &PointerEvent) {
        if event
            .flags
            .intersects(DispatchFlags::NO_INTERCEPT | DispatchFlags::NO_MONITOR)
        {
            return;
        }
        if !event.source.is_touch_capable() {
            return;
        }
        match event.action {
            PointerAction::Down if event.is_single_pointer() => {
                self.down_event_id = Some(event.id);
                self.consumed = false;
                self.last_event = Some(event.clone());
            }
            PointerAction::Up if event.is_single_pointer() => {
                self.down_event_id = None;
                self.last_event = None;
            }
            _ => {
                self.last_event = Some(event.clone());
            }
        }
    }

    /// Claim the current gesture on behalf of a monitor.
    ///
    /// Returns the synthetic cancel to re-inject, or None when the request
    /// is stale, duplicated, or there is no active sequence. All rejections
    /// are silent by contract.
    pub fn mark_consumed(&mut self, event_id: EventId, now_ms: i64) -> Option<PointerEvent> {
        if self.consumed {
            tracing::debug!(event_id, "gesture already consumed");
            return None;
        }
        let (Some(down_id), Some(last)) = (self.down_event_id, self.last_event.as_ref()) else {
            tracing::debug!(event_id, "no active touch sequence to consume");
            return None;
        };
        if down_id > event_id {
            // The request references a gesture older than the active one;
            // monotonic event ids are the sole tie-break.
            tracing::debug!(event_id, down_id, "stale consumption request ignored");
            return None;
        }

        self.consumed = true;
        let mut cancel = last.clone();
        cancel.action = PointerAction::Cancel;
        cancel.time_ms = now_ms;
        cancel.flags |= DispatchFlags::NO_INTERCEPT | DispatchFlags::NO_MONITOR;
        Some(cancel)
    }

    /// Whether this event stops propagating past monitor fan-out.
    ///
    /// True only for touchscreen-sourced events while the current gesture
    /// is consumed.
    pub fn should_swallow(&self, event: &InputEvent) -> bool {
        event.source() == EventSource::Touchscreen && self.consumed
    }

    /// Id of the down that opened the active sequence, if one is open.
    pub fn down_event_id(&self) -> Option<EventId> {
        self.down_event_id
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(
        id: EventId,
        action: PointerAction,
        pointer_count: usize,
        flags: DispatchFlags,
    ) -> PointerEvent {
        PointerEvent {
            id,
            action,
            source: EventSource::Touchscreen,
            pointer_id: 0,
            pointer_count,
            x: 10.0,
            y: 20.0,
            time_ms: id * 10,
            flags,
        }
    }

    fn down(id: EventId) -> PointerEvent {
        touch(id, PointerAction::Down, 1, DispatchFlags::empty())
    }

    fn moved(id: EventId) -> PointerEvent {
        touch(id, PointerAction::Move, 1, DispatchFlags::empty())
    }

    fn up(id: EventId) -> PointerEvent {
        touch(id, PointerAction::Up, 1, DispatchFlags::empty())
    }

    #[test]
    fn test_down_opens_sequence() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));
        assert_eq!(gate.down_event_id(), Some(1));
        assert!(!gate.is_consumed());
    }

    #[test]
    fn test_up_closes_sequence() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));
        gate.update_on_real_event(&up(2));
        assert_eq!(gate.down_event_id(), None);
        assert!(gate.mark_consumed(2, 100).is_none());
    }

    #[test]
    fn test_consume_produces_bypass_cancel() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));
        gate.update_on_real_event(&moved(2));

        let cancel = gate.mark_consumed(2, 999).unwrap();
        assert_eq!(cancel.action, PointerAction::Cancel);
        assert_eq!(cancel.time_ms, 999);
        assert!(cancel.flags.contains(DispatchFlags::NO_INTERCEPT));
        assert!(cancel.flags.contains(DispatchFlags::NO_MONITOR));
        // Cloned from the last snapshot.
        assert_eq!(cancel.id, 2);
        assert_eq!((cancel.x, cancel.y), (10.0, 20.0));
        assert!(gate.is_consumed());
    }

    #[test]
    fn test_consume_is_idempotent_per_gesture() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));
        gate.update_on_real_event(&moved(2));

        assert!(gate.mark_consumed(2, 100).is_some());
        // Second claim inside the same gesture changes nothing.
        assert!(gate.mark_consumed(2, 200).is_none());
        assert!(gate.is_consumed());
    }

    #[test]
    fn test_stale_request_never_mutates() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(10));
        gate.update_on_real_event(&moved(11));

        // References a gesture older than the active down.
        assert!(gate.mark_consumed(9, 100).is_none());
        assert!(!gate.is_consumed());

        // The current gesture can still be consumed afterwards.
        assert!(gate.mark_consumed(11, 100).is_some());
    }

    #[test]
    fn test_consume_without_down_is_noop() {
        let mut gate = GestureGate::new();
        assert!(gate.mark_consumed(1, 100).is_none());
        assert!(!gate.is_consumed());
    }

    #[test]
    fn test_new_down_resets_consumption() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));
        gate.update_on_real_event(&moved(2));
        assert!(gate.mark_consumed(2, 100).is_some());

        // A superseding down starts a fresh, unconsumed gesture.
        gate.update_on_real_event(&down(5));
        assert!(!gate.is_consumed());
        assert_eq!(gate.down_event_id(), Some(5));
    }

    #[test]
    fn test_multi_finger_updates_snapshot_only() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));

        // Two-finger down and up do not open/close the tracked sequence.
        gate.update_on_real_event(&touch(2, PointerAction::Down, 2, DispatchFlags::empty()));
        assert_eq!(gate.down_event_id(), Some(1));
        gate.update_on_real_event(&touch(3, PointerAction::Up, 2, DispatchFlags::empty()));
        assert_eq!(gate.down_event_id(), Some(1));

        // Snapshot follows the multi-finger event.
        let cancel = gate.mark_consumed(3, 100).unwrap();
        assert_eq!(cancel.id, 3);
    }

    #[test]
    fn test_synthetic_events_ignored() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));
        gate.update_on_real_event(&moved(2));
        assert!(gate.mark_consumed(2, 50).is_some());

        // The synthesized cancel itself must not disturb the state.
        let synthetic = touch(
            3,
            PointerAction::Cancel,
            1,
            DispatchFlags::NO_INTERCEPT | DispatchFlags::NO_MONITOR,
        );
        gate.update_on_real_event(&synthetic);
        assert!(gate.is_consumed());
        assert_eq!(gate.down_event_id(), Some(1));
    }

    #[test]
    fn test_non_touch_sources_ignored() {
        let mut gate = GestureGate::new();
        let mut mouse = down(1);
        mouse.source = EventSource::Mouse;
        gate.update_on_real_event(&mouse);
        assert_eq!(gate.down_event_id(), None);
    }

    #[test]
    fn test_swallow_only_consumed_touchscreen() {
        let mut gate = GestureGate::new();
        gate.update_on_real_event(&down(1));
        gate.update_on_real_event(&moved(2));

        let touch_move = InputEvent::Pointer(moved(3));
        assert!(!gate.should_swallow(&touch_move));

        gate.mark_consumed(2, 100).unwrap();
        assert!(gate.should_swallow(&touch_move));

        // Other sources are never swallowed.
        let mut mouse = moved(4);
        mouse.source = EventSource::Mouse;
        assert!(!gate.should_swallow(&InputEvent::Pointer(mouse)));
    }
}
