//! Core types for input-relay.
//!
//! These types define the foundation that everything builds on:
//! handler identifiers, device/event capability masks, and the normalized
//! key/pointer events that flow through registration, fan-out and
//! consumption tracking.

use bitflags::bitflags;

// =============================================================================
// Identifiers & Constants
// =============================================================================

/// Identifier of a registered interceptor or monitor.
///
/// Client-side ids are allocated from a monotonically increasing counter that
/// is never recycled within the process lifetime.
pub type HandlerId = i32;

/// Identifier of a normalized input event. Monotonic within the host
/// pipeline; ordering between two ids is meaningful (newer > older).
pub type EventId = i64;

/// Server-side identifier of one connected client process.
pub type SessionId = i32;

/// Smallest valid handler id (inclusive).
pub const MIN_HANDLER_ID: HandlerId = 1;

/// Upper bound of the handler id space (exclusive).
pub const MAX_HANDLER_ID: HandlerId = 100_000;

/// Sentinel for "no handler".
pub const INVALID_HANDLER_ID: HandlerId = -1;

/// Maximum live entries (interceptors + monitors combined) per registry.
pub const MAX_INPUT_HANDLERS: usize = 16;

/// Interceptor priority used when no interceptor is registered.
pub const DEFAULT_INTERCEPTOR_PRIORITY: i32 = 500;

// =============================================================================
// Handler kinds & capability masks
// =============================================================================

/// The two handler kinds this core fans out to.
///
/// Key-combination subscribers are an external collaborator with different
/// matching semantics and are not represented here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// At most one delivery per event, selected by priority; exclusive.
    Interceptor,
    /// One delivery per matching event, no exclusivity; all matches fan out.
    Monitor,
}

bitflags! {
    /// Device capability categories a handler cares about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct DeviceTags: u32 {
        const KEYBOARD    = 1 << 0;
        const POINTER     = 1 << 1;
        const TOUCH       = 1 << 2;
        const TABLET_TOOL = 1 << 3;
        const JOYSTICK    = 1 << 4;
    }
}

bitflags! {
    /// Event categories derived from [`DeviceTags`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct EventTypes: u8 {
        const KEY     = 1 << 0;
        const POINTER = 1 << 1;
    }
}

bitflags! {
    /// Per-event routing flags.
    ///
    /// Set on synthetic events (the gesture cancel) so they skip the
    /// interceptor and monitor layers and reach only window dispatch.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct DispatchFlags: u8 {
        const NO_INTERCEPT = 1 << 0;
        const NO_MONITOR   = 1 << 1;
    }
}

impl DeviceTags {
    /// Derive the event-type mask for this tag set.
    ///
    /// KEY iff the keyboard bit is present; POINTER iff any non-keyboard
    /// bit is present. This is the single source of truth: caller-supplied
    /// event-type hints are always recomputed from tags.
    pub fn event_types(self) -> EventTypes {
        let mut types = EventTypes::empty();
        if self.contains(Self::KEYBOARD) {
            types |= EventTypes::KEY;
        }
        if !self.difference(Self::KEYBOARD).is_empty() {
            types |= EventTypes::POINTER;
        }
        types
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Token type of the session that owns an event.
///
/// Consumption tracking only applies to application-managed sessions;
/// native-token sessions are exempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionToken {
    ManagedApp,
    Native,
}

// =============================================================================
// Events
// =============================================================================

/// Where a normalized event originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSource {
    Keyboard,
    Mouse,
    Touchscreen,
    Touchpad,
    TabletTool,
    Joystick,
}

impl EventSource {
    /// True for sources that can produce a touch gesture sequence.
    pub fn is_touch_capable(self) -> bool {
        matches!(self, Self::Touchscreen | Self::TabletTool)
    }

    /// Check whether a handler's device tags match this source.
    ///
    /// Touchscreen events match the touch or tablet-tool capability bits;
    /// mouse/touchpad/joystick events match the generic pointer bit;
    /// keyboard events match the keyboard bit.
    pub fn matches_tags(self, tags: DeviceTags) -> bool {
        match self {
            Self::Keyboard => tags.contains(DeviceTags::KEYBOARD),
            Self::Touchscreen => tags.intersects(DeviceTags::TOUCH | DeviceTags::TABLET_TOOL),
            Self::TabletTool => tags.contains(DeviceTags::TABLET_TOOL),
            Self::Mouse | Self::Touchpad | Self::Joystick => tags.contains(DeviceTags::POINTER),
        }
    }
}

/// What a pointer event reports about its contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerAction {
    Down,
    Move,
    Up,
    Cancel,
}

/// Key press/release state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
}

/// A normalized key event.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyEvent {
    pub id: EventId,
    pub key_code: u32,
    pub action: KeyAction,
    /// Event timestamp in milliseconds.
    pub time_ms: i64,
    pub flags: DispatchFlags,
}

/// A normalized pointer event.
#[derive(Clone, Debug, PartialEq)]
pub struct PointerEvent {
    pub id: EventId,
    pub action: PointerAction,
    pub source: EventSource,
    /// Id of the contact this event reports on.
    pub pointer_id: i32,
    /// Number of currently active contacts, this one included.
    pub pointer_count: usize,
    pub x: f64,
    pub y: f64,
    /// Event timestamp in milliseconds.
    pub time_ms: i64,
    pub flags: DispatchFlags,
}

impl PointerEvent {
    /// True when exactly one contact is active.
    pub fn is_single_pointer(&self) -> bool {
        self.pointer_count == 1
    }
}

/// A normalized input event, ready for fan-out.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Key(KeyEvent),
    Pointer(PointerEvent),
}

impl InputEvent {
    pub fn id(&self) -> EventId {
        match self {
            Self::Key(e) => e.id,
            Self::Pointer(e) => e.id,
        }
    }

    /// The event-type bit this event occupies.
    pub fn event_type(&self) -> EventTypes {
        match self {
            Self::Key(_) => EventTypes::KEY,
            Self::Pointer(_) => EventTypes::POINTER,
        }
    }

    pub fn source(&self) -> EventSource {
        match self {
            Self::Key(_) => EventSource::Keyboard,
            Self::Pointer(e) => e.source,
        }
    }

    pub fn flags(&self) -> DispatchFlags {
        match self {
            Self::Key(e) => e.flags,
            Self::Pointer(e) => e.flags,
        }
    }

    pub fn time_ms(&self) -> i64 {
        match self {
            Self::Key(e) => e.time_ms,
            Self::Pointer(e) => e.time_ms,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
