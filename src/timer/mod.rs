//! Timer Manager - Generic sorted-by-due-time timer facility.
//!
//! Shared by the registry's timeout-driven RPC behavior and the broader
//! service (watchdog resets, long-press features). The hard parts of the
//! contract live here:
//!
//! - Items are kept ordered by ascending due time; the host loop asks
//!   [`TimerManager::calc_next_delay`] how long it may block in its I/O
//!   multiplexer and calls [`TimerManager::process_timers`] when it wakes.
//! - A due timer is removed from the live set *before* its callback runs,
//!   so a callback may add or remove timers - including itself - without
//!   ever observing a duplicate or ghost entry.
//! - Ids come from a free-list allocator with generation counters:
//!   slots are recycled (timers are short-lived and numerous) but a stale
//!   id never matches a reused slot.
//!
//! The manager carries no clock of its own; the host loop passes its
//! current time in milliseconds to every time-dependent call, which also
//! keeps tests deterministic.

use std::cell::RefCell;

use crate::error::TimerError;

// =============================================================================
// Constants
// =============================================================================

/// Maximum concurrently registered timers.
pub const MAX_TIMER_COUNT: usize = 64;

/// Smallest accepted interval; shorter requests are clamped up.
pub const MIN_INTERVAL_MS: i64 = 36;

/// Largest interval for [`TimerManager::add_timer`].
pub const MAX_INTERVAL_MS: i64 = 10_000;

/// Largest interval for [`TimerManager::add_long_timer`].
pub const MAX_LONG_INTERVAL_MS: i64 = 30_000;

// =============================================================================
// Types
// =============================================================================

/// Identifier of a registered timer. Packs a slot index and a generation
/// counter; a recycled slot yields a different id than any stale holder.
pub type TimerId = i64;

/// Callback invoked when a timer fires. Receives the manager so it can
/// reentrantly add, reset or remove timers.
pub type TimerCallback = Box<dyn FnMut(&TimerManager)>;

struct TimerItem {
    id: TimerId,
    interval_ms: i64,
    repeat_count: i32,
    call_count: i32,
    next_call_ms: i64,
    callback: TimerCallback,
    name: String,
}

struct Inner {
    /// Live items, ascending `next_call_ms`; equal due times stay FIFO.
    items: Vec<TimerItem>,
    /// Generation counter per slot.
    generations: [u32; MAX_TIMER_COUNT],
    /// Free slot indices, popped on allocation.
    free_slots: Vec<usize>,
    /// The timer whose callback is currently running, if any.
    firing: Option<TimerId>,
    /// Set when `remove_timer` targets the firing timer; suppresses
    /// repeat re-insertion.
    firing_cancelled: bool,
}

fn pack_id(slot: usize, generation: u32) -> TimerId {
    ((generation as i64) << 32) | slot as i64
}

// =============================================================================
// Timer manager
// =============================================================================

/// Reentrancy-safe timer facility for a single sequential worker context.
pub struct TimerManager {
    inner: RefCell<Inner>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                items: Vec::new(),
                generations: [0; MAX_TIMER_COUNT],
                free_slots: (0..MAX_TIMER_COUNT).rev().collect(),
                firing: None,
                firing_cancelled: false,
            }),
        }
    }

    /// Register a timer. The interval is clamped to
    /// `[MIN_INTERVAL_MS, MAX_INTERVAL_MS]`.
    pub fn add_timer(
        &self,
        now_ms: i64,
        interval_ms: i64,
        repeat_count: i32,
        name: &str,
        callback: TimerCallback,
    ) -> Result<TimerId, TimerError> {
        self.add_clamped(now_ms, interval_ms, MAX_INTERVAL_MS, repeat_count, name, callback)
    }

    /// Register a timer with the extended clamp range
    /// `[MIN_INTERVAL_MS, MAX_LONG_INTERVAL_MS]`, for long timeouts.
    pub fn add_long_timer(
        &self,
        now_ms: i64,
        interval_ms: i64,
        repeat_count: i32,
        name: &str,
        callback: TimerCallback,
    ) -> Result<TimerId, TimerError> {
        self.add_clamped(now_ms, interval_ms, MAX_LONG_INTERVAL_MS, repeat_count, name, callback)
    }

    fn add_clamped(
        &self,
        now_ms: i64,
        interval_ms: i64,
        max_interval_ms: i64,
        repeat_count: i32,
        name: &str,
        callback: TimerCallback,
    ) -> Result<TimerId, TimerError> {
        if repeat_count < 1 {
            return Err(TimerError::InvalidParameters);
        }
        let interval_ms = interval_ms.clamp(MIN_INTERVAL_MS, max_interval_ms);

        let mut inner = self.inner.borrow_mut();
        let Some(slot) = inner.free_slots.pop() else {
            tracing::warn!(name, "timer slots exhausted");
            return Err(TimerError::CapacityExceeded);
        };
        let id = pack_id(slot, inner.generations[slot]);
        let item = TimerItem {
            id,
            interval_ms,
            repeat_count,
            call_count: 0,
            next_call_ms: now_ms + interval_ms,
            callback,
            name: name.to_string(),
        };
        insert_sorted(&mut inner.items, item);
        Ok(id)
    }

    /// Remove a timer. Returns false for an unknown (or stale) id.
    ///
    /// Removing the currently-firing timer from inside its own callback is
    /// legal and cancels any remaining repeats.
    pub fn remove_timer(&self, id: TimerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.firing == Some(id) {
            inner.firing_cancelled = true;
            return true;
        }
        let Some(pos) = inner.items.iter().position(|t| t.id == id) else {
            return false;
        };
        let item = inner.items.remove(pos);
        release_slot(&mut inner, item.id);
        true
    }

    /// Re-arm a timer to fire `interval` from `now_ms`. Repeat accounting
    /// is untouched. Returns false for an unknown id.
    pub fn reset_timer(&self, id: TimerId, now_ms: i64) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(pos) = inner.items.iter().position(|t| t.id == id) else {
            return false;
        };
        let mut item = inner.items.remove(pos);
        item.next_call_ms = now_ms + item.interval_ms;
        insert_sorted(&mut inner.items, item);
        true
    }

    /// Milliseconds until the next timer is due, zero if one is overdue,
    /// or None when no timer is registered. The host loop blocks in its
    /// multiplexer for at most this long.
    pub fn calc_next_delay(&self, now_ms: i64) -> Option<i64> {
        let inner = self.inner.borrow();
        inner
            .items
            .first()
            .map(|t| (t.next_call_ms - now_ms).max(0))
    }

    /// Fire every timer due at `now_ms`, in due-time order.
    pub fn process_timers(&self, now_ms: i64) {
        loop {
            let mut item = {
                let mut inner = self.inner.borrow_mut();
                let due = inner
                    .items
                    .first()
                    .is_some_and(|t| t.next_call_ms <= now_ms);
                if !due {
                    break;
                }
                let item = inner.items.remove(0);
                inner.firing = Some(item.id);
                inner.firing_cancelled = false;
                item
            };

            // Borrow released: the callback may reenter freely. The item is
            // out of the live set, so it cannot observe itself.
            (item.callback)(self);
            item.call_count += 1;

            let mut inner = self.inner.borrow_mut();
            inner.firing = None;
            let cancelled = std::mem::take(&mut inner.firing_cancelled);
            if !cancelled && item.call_count < item.repeat_count {
                item.next_call_ms = now_ms + item.interval_ms;
                insert_sorted(&mut inner.items, item);
            } else {
                tracing::debug!(name = %item.name, id = item.id, "timer retired");
                release_slot(&mut inner, item.id);
            }
        }
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Whether a timer with this id is currently registered.
    pub fn contains(&self, id: TimerId) -> bool {
        self.inner.borrow().items.iter().any(|t| t.id == id)
    }
}

fn insert_sorted(items: &mut Vec<TimerItem>, item: TimerItem) {
    // Before the first strictly later item: equal due times stay FIFO.
    let pos = items
        .iter()
        .position(|t| t.next_call_ms > item.next_call_ms)
        .unwrap_or(items.len());
    items.insert(pos, item);
}

fn release_slot(inner: &mut Inner, id: TimerId) {
    let slot = (id & 0xFFFF_FFFF) as usize;
    inner.generations[slot] = inner.generations[slot].wrapping_add(1);
    inner.free_slots.push(slot);
}

// =============================================================================
// TESTS
// =============================================================================
