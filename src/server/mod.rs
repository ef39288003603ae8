//! Server Side - Monitor fan-out, consumption tracking, gesture gate.
//!
//! [`MonitorFanout`] holds the mirrored registration state for every
//! connected session and dispatches each normalized event:
//!
//! - Interceptors: priority-ordered scan, first match wins, delivery is
//!   terminal for the event (it reaches neither monitors nor windows).
//! - Monitors: every match receives its own clone, in ascending handler-id
//!   order; the expected-ack count is recorded with the consumption
//!   tracker for managed-app sessions.
//!
//! The whole trio (fan-out, tracker, gate) runs on the host's single
//! sequential event-processing loop. No internal locking: a subsystem on
//! another thread must marshal its call through the host's hand-off queue.
//!
//! After fan-out the host asks [`MonitorFanout::should_swallow`] whether
//! the event may continue to window dispatch; a consumed touch gesture
//! stops here.

pub mod consumption;
pub mod gesture;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::handlers::{EventConsumer, HandlerEntry, HandlerTable, MatchPolicy};
use crate::types::{
    DeviceTags, DispatchFlags, EventId, EventTypes, HandlerId, HandlerKind, InputEvent,
    MAX_HANDLER_ID, MIN_HANDLER_ID, PointerEvent, SessionId, SessionToken,
};

pub use consumption::{AckOutcome, ConsumptionTracker};
pub use gesture::GestureGate;

// =============================================================================
// Collaborator traits
// =============================================================================

/// Watchdog channel an event's completion is reported on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnrChannel {
    Monitor,
    Dispatch,
}

/// External ANR watchdog. This core only feeds it; escalation on a missing
/// signal is the watchdog's business.
pub trait AnrReporter {
    fn notify_last_processed(&self, channel: AnrChannel, event_id: EventId, action_time_ms: i64);
}

// =============================================================================
// Delivered set
// =============================================================================

/// Which handlers actually received an event. Used by tests and diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveredSet {
    pub interceptor: Option<HandlerId>,
    pub monitors: Vec<HandlerId>,
}

impl DeliveredSet {
    pub fn is_empty(&self) -> bool {
        self.interceptor.is_none() && self.monitors.is_empty()
    }
}

// =============================================================================
// Fan-out dispatcher
// =============================================================================

/// Server-side dispatcher over the mirrored interceptor/monitor state.
pub struct MonitorFanout {
    interceptors: HandlerTable,
    monitors: HandlerTable,
    /// Which session each server-side registration belongs to.
    owners: HashMap<HandlerId, SessionId>,
    /// Server-side id counter, monotonic like the client's.
    next_id: HandlerId,
    gate: GestureGate,
    tracker: ConsumptionTracker,
    anr: Box<dyn AnrReporter>,
}

impl MonitorFanout {
    pub fn new(anr: Box<dyn AnrReporter>) -> Self {
        Self {
            interceptors: HandlerTable::new(MatchPolicy::FirstMatchWins),
            monitors: HandlerTable::new(MatchPolicy::FanOutAll),
            owners: HashMap::new(),
            next_id: MIN_HANDLER_ID,
            gate: GestureGate::new(),
            tracker: ConsumptionTracker::new(),
            anr,
        }
    }

    /// Mirror one client registration (the client's current aggregate for
    /// that kind). `delivery` is the channel back to the owning session.
    pub fn add_registration(
        &mut self,
        session: SessionId,
        kind: HandlerKind,
        event_types: EventTypes,
        priority: i32,
        device_tags: DeviceTags,
        delivery: Arc<dyn EventConsumer>,
    ) -> Result<HandlerId, HandlerError> {
        if event_types.is_empty() {
            return Err(HandlerError::InvalidEventType);
        }
        if self.next_id >= MAX_HANDLER_ID {
            return Err(HandlerError::IdSpaceExhausted);
        }
        let id = self.next_id;
        self.next_id += 1;

        self.table_mut(kind).insert(HandlerEntry {
            id,
            kind,
            event_types,
            device_tags,
            priority,
            consumer: delivery,
        })?;
        self.owners.insert(id, session);
        tracing::debug!(session, id, ?kind, "registration mirrored");
        Ok(id)
    }

    /// Drop one registration. The session must own it.
    pub fn remove_registration(
        &mut self,
        session: SessionId,
        kind: HandlerKind,
        id: HandlerId,
    ) -> Result<(), HandlerError> {
        if self.owners.get(&id) != Some(&session) {
            tracing::warn!(session, id, "removal of registration not owned by session");
            return Err(HandlerError::InvalidHandler);
        }
        let Some(_) = self.table_mut(kind).remove(id) else {
            return Err(HandlerError::InvalidHandler);
        };
        self.owners.remove(&id);
        Ok(())
    }

    /// Bulk-remove everything a dead session owned. The only way entries
    /// disappear outside an explicit removal.
    pub fn on_session_lost(&mut self, session: SessionId) {
        let owners = &self.owners;
        let keep = |e: &HandlerEntry| owners.get(&e.id) != Some(&session);
        let dropped = self.interceptors.retain(keep) + self.monitors.retain(keep);
        self.owners.retain(|_, s| *s != session);
        if dropped > 0 {
            tracing::debug!(session, dropped, "session registrations torn down");
        }
    }

    /// Fan a normalized event out.
    ///
    /// `owner_token` is the token type of the session the event is destined
    /// for; it gates consumption tracking.
    pub fn dispatch(&mut self, event: &InputEvent, owner_token: SessionToken) -> DeliveredSet {
        if let InputEvent::Pointer(pointer) = event {
            self.gate.update_on_real_event(pointer);
        }

        let mut delivered = DeliveredSet::default();

        if !event.flags().contains(DispatchFlags::NO_INTERCEPT) {
            if let Some(entry) = self.interceptors.select_first(event) {
                // Interception is terminal: the event reaches nothing else.
                let clone = event.clone();
                entry.consumer.on_event(entry.id, &clone);
                delivered.interceptor = Some(entry.id);
                return delivered;
            }
        }

        if !event.flags().contains(DispatchFlags::NO_MONITOR) {
            for entry in self.monitors.select_all(event) {
                let clone = event.clone();
                entry.consumer.on_event(entry.id, &clone);
                delivered.monitors.push(entry.id);
            }
            if let InputEvent::Pointer(pointer) = event {
                if !delivered.monitors.is_empty() {
                    self.tracker.register_expected_acks(
                        pointer.id,
                        pointer.source,
                        delivered.monitors.len(),
                        owner_token == SessionToken::ManagedApp,
                    );
                }
            }
        }
        delivered
    }

    /// Apply one acknowledgment arriving from a monitor process.
    ///
    /// The transition of a tracked event to fully-acknowledged is the only
    /// path that resets the monitor-channel watchdog clock.
    pub fn ack(&mut self, event_id: EventId, action_time_ms: i64) -> AckOutcome {
        let outcome = self.tracker.ack(event_id);
        if outcome
            == (AckOutcome::FullyAcked {
                resets_watchdog: true,
            })
        {
            self.anr
                .notify_last_processed(AnrChannel::Monitor, event_id, action_time_ms);
        }
        outcome
    }

    /// A monitor claims the in-flight touch gesture.
    ///
    /// Ignored unless `(monitor_id, session)` names a live monitor
    /// registration. On success returns the synthetic cancel the caller
    /// re-injects into normalization/dispatch.
    pub fn mark_consumed(
        &mut self,
        session: SessionId,
        monitor_id: HandlerId,
        event_id: EventId,
        now_ms: i64,
    ) -> Option<PointerEvent> {
        if !self.monitors.contains(monitor_id) || self.owners.get(&monitor_id) != Some(&session) {
            tracing::debug!(session, monitor_id, "mark-consumed from unknown monitor ignored");
            return None;
        }
        self.gate.mark_consumed(event_id, now_ms)
    }

    /// Whether the event stops here instead of continuing to windows.
    pub fn should_swallow(&self, event: &InputEvent) -> bool {
        self.gate.should_swallow(event)
    }

    /// Pending ack count for a tracked event (diagnostics).
    pub fn pending_acks(&self, event_id: EventId) -> Option<usize> {
        self.tracker.pending(event_id)
    }

    /// Number of mirrored registrations, both kinds.
    pub fn registration_count(&self) -> usize {
        self.interceptors.len() + self.monitors.len()
    }

    fn table_mut(&mut self, kind: HandlerKind) -> &mut HandlerTable {
        match kind {
            HandlerKind::Interceptor => &mut self.interceptors,
            HandlerKind::Monitor => &mut self.monitors,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventSource, KeyAction, KeyEvent, PointerAction};
    use std::sync::Mutex;

    /// Records every delivery it receives.
    #[derive(Default)]
    struct Recorder {
        deliveries: Mutex<Vec<(HandlerId, EventId)>>,
    }

    impl EventConsumer for Recorder {
        fn on_event(&self, handler_id: HandlerId, event: &InputEvent) {
            self.deliveries.lock().unwrap().push((handler_id, event.id()));
        }
    }

    #[derive(Default)]
    struct FakeAnr {
        notifications: Mutex<Vec<(AnrChannel, EventId, i64)>>,
    }

    impl AnrReporter for FakeAnr {
        fn notify_last_processed(
            &self,
            channel: AnrChannel,
            event_id: EventId,
            action_time_ms: i64,
        ) {
            self.notifications
                .lock()
                .unwrap()
                .push((channel, event_id, action_time_ms));
        }
    }

    struct Fixture {
        fanout: MonitorFanout,
        anr: Arc<FakeAnr>,
        recorder: Arc<Recorder>,
    }

    // The AnrReporter handle the fanout owns shares state with the fixture.
    struct AnrHandle(Arc<FakeAnr>);
    impl AnrReporter for AnrHandle {
        fn notify_last_processed(
            &self,
            channel: AnrChannel,
            event_id: EventId,
            action_time_ms: i64,
        ) {
            self.0.notify_last_processed(channel, event_id, action_time_ms);
        }
    }

    fn setup() -> Fixture {
        let anr = Arc::new(FakeAnr::default());
        Fixture {
            fanout: MonitorFanout::new(Box::new(AnrHandle(anr.clone()))),
            anr,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn touch_event(id: EventId, action: PointerAction) -> InputEvent {
        InputEvent::Pointer(PointerEvent {
            id,
            action,
            source: EventSource::Touchscreen,
            pointer_id: 0,
            pointer_count: 1,
            x: 0.0,
            y: 0.0,
            time_ms: id * 10,
            flags: DispatchFlags::empty(),
        })
    }

    fn mouse_event(id: EventId) -> InputEvent {
        InputEvent::Pointer(PointerEvent {
            id,
            action: PointerAction::Move,
            source: EventSource::Mouse,
            pointer_id: 0,
            pointer_count: 1,
            x: 0.0,
            y: 0.0,
            time_ms: id * 10,
            flags: DispatchFlags::empty(),
        })
    }

    fn key_event(id: EventId) -> InputEvent {
        InputEvent::Key(KeyEvent {
            id,
            key_code: 30,
            action: KeyAction::Press,
            time_ms: id * 10,
            flags: DispatchFlags::empty(),
        })
    }

    fn add_monitor(fx: &mut Fixture, session: SessionId, tags: DeviceTags) -> HandlerId {
        fx.fanout
            .add_registration(
                session,
                HandlerKind::Monitor,
                tags.event_types(),
                0,
                tags,
                fx.recorder.clone(),
            )
            .unwrap()
    }

    fn add_interceptor(fx: &mut Fixture, session: SessionId, priority: i32) -> HandlerId {
        fx.fanout
            .add_registration(
                session,
                HandlerKind::Interceptor,
                DeviceTags::TOUCH.event_types(),
                priority,
                DeviceTags::TOUCH,
                fx.recorder.clone(),
            )
            .unwrap()
    }

    #[test]
    fn test_lowest_priority_interceptor_wins_exclusively() {
        let mut fx = setup();
        let a = add_interceptor(&mut fx, 1, 100);
        let b = add_interceptor(&mut fx, 1, 50);
        let _m = add_monitor(&mut fx, 2, DeviceTags::TOUCH);

        let delivered = fx
            .fanout
            .dispatch(&touch_event(1, PointerAction::Down), SessionToken::ManagedApp);

        // B only; interception is terminal, so the monitor saw nothing.
        assert_eq!(delivered.interceptor, Some(b));
        assert!(delivered.monitors.is_empty());
        assert_eq!(*fx.recorder.deliveries.lock().unwrap(), vec![(b, 1)]);
        let _ = a;
    }

    #[test]
    fn test_monitor_fanout_ascending_id_order() {
        let mut fx = setup();
        let m1 = add_monitor(&mut fx, 1, DeviceTags::TOUCH);
        let m2 = add_monitor(&mut fx, 2, DeviceTags::TOUCH);
        let m3 = add_monitor(&mut fx, 3, DeviceTags::TABLET_TOOL);
        let _pointer_only = add_monitor(&mut fx, 4, DeviceTags::POINTER);

        let delivered = fx
            .fanout
            .dispatch(&touch_event(1, PointerAction::Down), SessionToken::ManagedApp);

        assert_eq!(delivered.interceptor, None);
        assert_eq!(delivered.monitors, vec![m1, m2, m3]);
        // One clone each, delivered independently.
        assert_eq!(
            *fx.recorder.deliveries.lock().unwrap(),
            vec![(m1, 1), (m2, 1), (m3, 1)]
        );
    }

    #[test]
    fn test_key_event_reaches_keyboard_monitors() {
        let mut fx = setup();
        let kb = add_monitor(&mut fx, 1, DeviceTags::KEYBOARD);
        let _touch = add_monitor(&mut fx, 2, DeviceTags::TOUCH);

        let delivered = fx.fanout.dispatch(&key_event(9), SessionToken::Native);
        assert_eq!(delivered.monitors, vec![kb]);
        // Key events are not consumption-tracked.
        assert_eq!(fx.fanout.pending_acks(9), None);
    }

    #[test]
    fn test_three_monitor_acks_fire_watchdog_once() {
        let mut fx = setup();
        add_monitor(&mut fx, 1, DeviceTags::TOUCH);
        add_monitor(&mut fx, 2, DeviceTags::TOUCH);
        add_monitor(&mut fx, 3, DeviceTags::TOUCH);

        let delivered = fx
            .fanout
            .dispatch(&touch_event(5, PointerAction::Down), SessionToken::ManagedApp);
        assert_eq!(delivered.monitors.len(), 3);
        assert_eq!(fx.fanout.pending_acks(5), Some(3));

        assert_eq!(
            fx.fanout.ack(5, 100),
            AckOutcome::StillPending { remaining: 2 }
        );
        assert_eq!(
            fx.fanout.ack(5, 110),
            AckOutcome::StillPending { remaining: 1 }
        );
        assert!(fx.anr.notifications.lock().unwrap().is_empty());

        assert_eq!(
            fx.fanout.ack(5, 120),
            AckOutcome::FullyAcked {
                resets_watchdog: true
            }
        );
        assert_eq!(
            *fx.anr.notifications.lock().unwrap(),
            vec![(AnrChannel::Monitor, 5, 120)]
        );

        // Late ack: unknown, no second notification.
        assert_eq!(fx.fanout.ack(5, 130), AckOutcome::UnknownAck);
        assert_eq!(fx.anr.notifications.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_native_owner_not_tracked() {
        let mut fx = setup();
        add_monitor(&mut fx, 1, DeviceTags::TOUCH);

        fx.fanout
            .dispatch(&touch_event(5, PointerAction::Down), SessionToken::Native);
        assert_eq!(fx.fanout.pending_acks(5), None);
        assert_eq!(fx.fanout.ack(5, 100), AckOutcome::UnknownAck);
    }

    #[test]
    fn test_mouse_ack_never_resets_watchdog() {
        let mut fx = setup();
        add_monitor(&mut fx, 1, DeviceTags::POINTER);

        fx.fanout.dispatch(&mouse_event(8), SessionToken::ManagedApp);
        assert_eq!(
            fx.fanout.ack(8, 100),
            AckOutcome::FullyAcked {
                resets_watchdog: false
            }
        );
        assert!(fx.anr.notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mark_consumed_full_cycle() {
        let mut fx = setup();
        let monitor = add_monitor(&mut fx, 1, DeviceTags::TOUCH);

        fx.fanout
            .dispatch(&touch_event(1, PointerAction::Down), SessionToken::ManagedApp);
        fx.fanout
            .dispatch(&touch_event(2, PointerAction::Move), SessionToken::ManagedApp);

        let cancel = fx.fanout.mark_consumed(1, monitor, 2, 500).unwrap();
        assert_eq!(cancel.action, PointerAction::Cancel);

        // Later moves of the consumed gesture are swallowed after fan-out.
        let follow = touch_event(3, PointerAction::Move);
        assert!(fx.fanout.should_swallow(&follow));

        // The synthetic cancel re-enters dispatch and bypasses both layers.
        let redelivered = fx.fanout.dispatch(
            &InputEvent::Pointer(cancel),
            SessionToken::ManagedApp,
        );
        assert!(redelivered.is_empty());

        // Up closes the gesture; the next one starts unconsumed.
        fx.fanout
            .dispatch(&touch_event(4, PointerAction::Up), SessionToken::ManagedApp);
        fx.fanout
            .dispatch(&touch_event(5, PointerAction::Down), SessionToken::ManagedApp);
        assert!(!fx.fanout.should_swallow(&touch_event(6, PointerAction::Move)));
    }

    #[test]
    fn test_mark_consumed_requires_owning_session() {
        let mut fx = setup();
        let monitor = add_monitor(&mut fx, 1, DeviceTags::TOUCH);

        fx.fanout
            .dispatch(&touch_event(1, PointerAction::Down), SessionToken::ManagedApp);

        // Wrong session, then unknown monitor id: both ignored.
        assert!(fx.fanout.mark_consumed(2, monitor, 1, 100).is_none());
        assert!(fx.fanout.mark_consumed(1, monitor + 7, 1, 100).is_none());
        // The legitimate owner still can.
        assert!(fx.fanout.mark_consumed(1, monitor, 1, 100).is_some());
    }

    #[test]
    fn test_session_lost_tears_down_only_that_session() {
        let mut fx = setup();
        let m1 = add_monitor(&mut fx, 1, DeviceTags::TOUCH);
        let _m2 = add_monitor(&mut fx, 2, DeviceTags::TOUCH);
        let _i2 = add_interceptor(&mut fx, 2, 100);
        assert_eq!(fx.fanout.registration_count(), 3);

        fx.fanout.on_session_lost(2);
        assert_eq!(fx.fanout.registration_count(), 1);

        let delivered = fx
            .fanout
            .dispatch(&touch_event(1, PointerAction::Down), SessionToken::ManagedApp);
        assert_eq!(delivered.interceptor, None);
        assert_eq!(delivered.monitors, vec![m1]);
    }

    #[test]
    fn test_remove_registration_checks_owner() {
        let mut fx = setup();
        let m = add_monitor(&mut fx, 1, DeviceTags::TOUCH);

        assert_eq!(
            fx.fanout
                .remove_registration(2, HandlerKind::Monitor, m)
                .unwrap_err(),
            HandlerError::InvalidHandler
        );
        fx.fanout
            .remove_registration(1, HandlerKind::Monitor, m)
            .unwrap();
        assert_eq!(fx.fanout.registration_count(), 0);
    }

    #[test]
    fn test_empty_event_types_rejected() {
        let mut fx = setup();
        let err = fx
            .fanout
            .add_registration(
                1,
                HandlerKind::Monitor,
                EventTypes::empty(),
                0,
                DeviceTags::empty(),
                fx.recorder.clone(),
            )
            .unwrap_err();
        assert_eq!(err, HandlerError::InvalidEventType);
    }

    #[test]
    fn test_no_match_no_tracking() {
        let mut fx = setup();
        add_monitor(&mut fx, 1, DeviceTags::KEYBOARD);

        let delivered = fx
            .fanout
            .dispatch(&touch_event(1, PointerAction::Down), SessionToken::ManagedApp);
        assert!(delivered.is_empty());
        assert_eq!(fx.fanout.pending_acks(1), None);
    }
}
