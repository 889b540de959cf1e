//! Time-bucketed queue with deterministic per-timestamp ordering.
//!
//! The timestamp axis is partitioned into fixed-width slots, and only a
//! bounded rolling window of slots going forward from the current time is
//! kept alive. As the clock advances past a slot it is reset and reused for
//! the next epoch occupying the same ring position, so memory stays bounded
//! over arbitrarily long runs.
//!
//! Within a single timestamp, items come back most-recently-inserted first.
//! That order is deterministic per run but outside the contract: callers
//! must not depend on it for correctness.

use std::collections::HashMap;

use aggsim_types::Millis;

/// Width of one slot in milliseconds.
const DEFAULT_SLOT_WIDTH: Millis = 60_000;
/// Number of slots in the rolling window.
const DEFAULT_SLOT_COUNT: usize = 16;

#[derive(Debug)]
struct Slot<T> {
    /// Base timestamp of the epoch this slot currently covers, or `None`
    /// when the slot holds nothing.
    base: Option<Millis>,
    /// Pending items per exact timestamp, most recent last.
    by_time: HashMap<Millis, Vec<T>>,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self {
            base: None,
            by_time: HashMap::new(),
        }
    }

    fn reset(&mut self) {
        self.base = None;
        self.by_time.clear();
    }
}

/// Delivery-time-indexed storage for pending envelopes.
///
/// Looking up a timestamp strictly behind the low-water mark returns `None`
/// even if that timestamp was never explicitly cleared; looking up a
/// timestamp equal to the mark stays valid until the ring wraps onto it.
#[derive(Debug)]
pub struct TimedQueue<T> {
    slots: Vec<Slot<T>>,
    slot_width: Millis,
    /// Timestamps strictly below this are gone.
    low_water: Millis,
}

impl<T> Default for TimedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimedQueue<T> {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SLOT_WIDTH, DEFAULT_SLOT_COUNT)
    }

    /// Build a queue with `slot_count` slots of `slot_width` milliseconds.
    /// The product bounds how far ahead of the clock an insert may land.
    pub fn with_window(slot_width: Millis, slot_count: usize) -> Self {
        assert!(slot_width > 0, "slot width must be positive");
        assert!(slot_count > 1, "need at least two slots");
        Self {
            slots: (0..slot_count).map(|_| Slot::empty()).collect(),
            slot_width,
            low_water: 0,
        }
    }

    /// Total span of the rolling window in milliseconds.
    pub fn window(&self) -> Millis {
        self.slot_width * self.slots.len() as Millis
    }

    fn slot_base(&self, at: Millis) -> Millis {
        (at / self.slot_width) * self.slot_width
    }

    fn slot_index(&self, at: Millis) -> usize {
        (at / self.slot_width) as usize % self.slots.len()
    }

    /// Place an item at its exact timestamp.
    ///
    /// Panics when `at` is behind the low-water mark or at/beyond the upper
    /// bound of the rolling window: both indicate a scheduler bug, not a
    /// runtime condition (the scheduler only inserts at `now + delay` with
    /// bounded delays).
    pub fn insert(&mut self, at: Millis, item: T) {
        assert!(
            at >= self.low_water,
            "insert at {at} is behind the queue's processing point {}",
            self.low_water
        );
        let upper = self.slot_base(self.low_water) + self.window();
        assert!(
            at < upper,
            "insert at {at} falls beyond the rolling window ending at {upper}"
        );

        let base = self.slot_base(at);
        let index = self.slot_index(at);
        let slot = &mut self.slots[index];
        if slot.base != Some(base) {
            // The ring wrapped onto a slot from a previous epoch: reuse its
            // storage for the new epoch.
            slot.reset();
            slot.base = Some(base);
        }
        slot.by_time.entry(at).or_default().push(item);
    }

    /// Most-recently-inserted pending item at exactly `at`, if any.
    pub fn peek(&self, at: Millis) -> Option<&T> {
        if at < self.low_water {
            return None;
        }
        let slot = &self.slots[self.slot_index(at)];
        if slot.base != Some(self.slot_base(at)) {
            return None;
        }
        slot.by_time.get(&at).and_then(|stack| stack.last())
    }

    /// Remove and return the most-recently-inserted item at exactly `at`.
    pub fn pop(&mut self, at: Millis) -> Option<T> {
        if at < self.low_water {
            return None;
        }
        let index = self.slot_index(at);
        let base = self.slot_base(at);
        let slot = &mut self.slots[index];
        if slot.base != Some(base) {
            return None;
        }
        let stack = slot.by_time.get_mut(&at)?;
        let item = stack.pop();
        if stack.is_empty() {
            slot.by_time.remove(&at);
        }
        item
    }

    /// Raise the low-water mark to `now` and recycle slots that now lie
    /// entirely in the past.
    pub fn advance(&mut self, now: Millis) {
        if now <= self.low_water {
            return;
        }
        self.low_water = now;
        let width = self.slot_width;
        for slot in &mut self.slots {
            if let Some(base) = slot.base {
                if base + width <= now {
                    slot.reset();
                }
            }
        }
    }

    /// Drop every pending item.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    /// Number of pending items across all timestamps.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .map(|s| s.by_time.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_timestamp_is_lifo() {
        let mut queue = TimedQueue::new();
        queue.insert(1, "m1");
        queue.insert(1, "m2");

        assert_eq!(queue.peek(2), None);
        assert_eq!(queue.peek(1), Some(&"m2"));
        assert_eq!(queue.pop(1), Some("m2"));
        assert_eq!(queue.pop(1), Some("m1"));
        assert_eq!(queue.peek(1), None);
    }

    #[test]
    fn insert_then_peek_round_trips() {
        let mut queue = TimedQueue::new();
        queue.insert(12_345, 42u32);
        assert_eq!(queue.peek(12_345), Some(&42));
        assert_eq!(queue.peek(12_344), None);
        assert_eq!(queue.peek(12_346), None);
    }

    #[test]
    fn past_lookup_is_empty_without_explicit_clear() {
        let mut queue: TimedQueue<u32> = TimedQueue::with_window(100, 4);
        queue.insert(50, 1);
        // Advance two full window-widths past the insert.
        queue.advance(50 + 2 * queue.window());
        assert_eq!(queue.peek(50), None);
        assert_eq!(queue.pop(50), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn boundary_timestamp_valid_until_wrap() {
        let mut queue: TimedQueue<u32> = TimedQueue::with_window(100, 4);
        queue.insert(100, 7);
        queue.advance(100);
        // Equal to the low-water mark: still visible.
        assert_eq!(queue.peek(100), Some(&7));
        queue.advance(101);
        assert_eq!(queue.peek(100), None);
    }

    #[test]
    fn wrapped_slot_does_not_leak_previous_epoch() {
        let mut queue: TimedQueue<&str> = TimedQueue::with_window(100, 4);
        queue.insert(30, "old");
        // Move the clock a full window forward; slot 0 now covers a new epoch.
        let later = 30 + queue.window();
        queue.advance(later);
        queue.insert(later + 5, "new");
        assert_eq!(queue.peek(30), None);
        assert_eq!(queue.pop(later + 5), Some("new"));
        assert_eq!(queue.pop(later + 5), None);
    }

    #[test]
    fn spans_multiple_slots() {
        let mut queue = TimedQueue::with_window(100, 4);
        queue.insert(99, "a");
        queue.insert(100, "b");
        queue.insert(250, "c");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(99), Some("a"));
        assert_eq!(queue.pop(100), Some("b"));
        assert_eq!(queue.pop(250), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_empties_everything() {
        let mut queue = TimedQueue::new();
        queue.insert(10, 1u8);
        queue.insert(70_000, 2u8);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.peek(10), None);
    }

    #[test]
    #[should_panic(expected = "behind the queue's processing point")]
    fn inserting_in_the_past_panics() {
        let mut queue = TimedQueue::with_window(100, 4);
        queue.advance(500);
        queue.insert(499, ());
    }

    #[test]
    #[should_panic(expected = "beyond the rolling window")]
    fn inserting_beyond_the_window_panics() {
        let mut queue = TimedQueue::with_window(100, 4);
        queue.insert(400, ());
    }
}
