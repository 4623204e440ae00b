//! Fixed-capacity circular queue of 64-bit values
//!
//! [`LongRing`] is the plain ring: O(1) push/pop at both ends, no allocation
//! after construction, not thread-safe. [`CircularLongQueue`] puts the ring
//! behind a single mutex; every method goes through that lock, because the
//! head, tail and count fields are only reachable through the guard.
//!
//! Array-kind mailboxes keep their arrival order in a [`LongRing`] of packed
//! slot handles (see [`SlotRing`]), guarded by the mailbox's own monitor
//! rather than a second lock. [`CircularLongQueue`] is the standalone
//! synchronized form for callers that only need a bounded queue of scalars.
//!
//! [`SlotRing`]: crate::SlotRing

use parking_lot::Mutex;

/// Bounded ring of `u64` values
#[derive(Debug, Clone)]
pub struct LongRing {
    slots: Box<[u64]>,
    /// Index of the oldest value
    head: usize,
    /// Number of values stored
    count: usize,
}

impl LongRing {
    /// Create a ring holding up to `capacity` values
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            slots: vec![0; capacity].into_boxed_slice(),
            head: 0,
            count: 0,
        }
    }

    fn index(&self, offset: usize) -> usize {
        (self.head + offset) % self.slots.len()
    }

    /// Append at the tail; `false` if full
    pub fn push_back(&mut self, value: u64) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = self.index(self.count);
        self.slots[tail] = value;
        self.count += 1;
        true
    }

    /// Remove from the head (oldest)
    pub fn pop_front(&mut self) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        let value = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        Some(value)
    }

    /// Remove from the tail (newest)
    pub fn pop_back(&mut self) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        Some(self.slots[self.index(self.count)])
    }

    /// Oldest value without removing it
    pub fn front(&self) -> Option<u64> {
        (self.count > 0).then(|| self.slots[self.head])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Values from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.count).map(move |i| self.slots[self.index(i)])
    }
}

/// Thread-safe bounded FIFO of `u64` values
///
/// Semantics follow a bounded blocking queue used through its non-blocking
/// calls: `offer` rejects when full, `poll`/`peek` return `None` when empty.
///
/// # Example
///
/// ```
/// use turbine_core::CircularLongQueue;
///
/// let queue = CircularLongQueue::new(2);
/// assert!(queue.offer(1));
/// assert!(queue.offer(2));
/// assert!(!queue.offer(3));
/// assert_eq!(queue.poll(), Some(1));
/// assert_eq!(queue.peek(), Some(2));
/// assert_eq!(queue.size(), 1);
/// ```
#[derive(Debug)]
pub struct CircularLongQueue {
    ring: Mutex<LongRing>,
}

impl CircularLongQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(LongRing::new(capacity)),
        }
    }

    /// Insert at the tail; `false` if the queue is full
    pub fn offer(&self, value: u64) -> bool {
        self.ring.lock().push_back(value)
    }

    /// Remove and return the head
    pub fn poll(&self) -> Option<u64> {
        self.ring.lock().pop_front()
    }

    /// Return the head without removing it
    pub fn peek(&self) -> Option<u64> {
        self.ring.lock().front()
    }

    pub fn size(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    pub fn remaining_capacity(&self) -> usize {
        let ring = self.ring.lock();
        ring.capacity() - ring.len()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }

    /// Remove everything, returning values oldest first
    pub fn drain(&self) -> Vec<u64> {
        let mut ring = self.ring.lock();
        let values = ring.iter().collect();
        ring.clear();
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Reference model: a VecDeque bounded to the same capacity
    struct BoundedModel {
        items: VecDeque<u64>,
        capacity: usize,
    }

    impl BoundedModel {
        fn offer(&mut self, v: u64) -> bool {
            if self.items.len() == self.capacity {
                false
            } else {
                self.items.push_back(v);
                true
            }
        }
    }

    /// Small deterministic xorshift generator for operation sequences
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }
    }

    #[test]
    fn test_ring_wraps() {
        let mut ring = LongRing::new(3);
        assert!(ring.push_back(1));
        assert!(ring.push_back(2));
        assert!(ring.push_back(3));
        assert!(!ring.push_back(4));
        assert_eq!(ring.pop_front(), Some(1));
        assert!(ring.push_back(4));
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(ring.pop_back(), Some(4));
        assert_eq!(ring.pop_front(), Some(2));
        assert_eq!(ring.pop_front(), Some(3));
        assert_eq!(ring.pop_front(), None);
        assert_eq!(ring.pop_back(), None);
    }

    #[test]
    fn test_matches_bounded_fifo_model() {
        for capacity in [1usize, 2, 3, 7, 16] {
            for seed in 1..20u64 {
                let queue = CircularLongQueue::new(capacity);
                let mut model = BoundedModel {
                    items: VecDeque::new(),
                    capacity,
                };
                let mut rng = XorShift(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));

                for step in 0..500u64 {
                    match rng.next() % 10 {
                        0..=3 => assert_eq!(queue.offer(step), model.offer(step)),
                        4..=6 => assert_eq!(queue.poll(), model.items.pop_front()),
                        7 | 8 => assert_eq!(queue.peek(), model.items.front().copied()),
                        _ => {
                            queue.clear();
                            model.items.clear();
                        }
                    }
                    assert_eq!(queue.size(), model.items.len());
                    assert_eq!(queue.is_empty(), model.items.is_empty());
                    assert_eq!(queue.remaining_capacity(), capacity - model.items.len());
                }
            }
        }
    }

    #[test]
    fn test_concurrent_storm_never_exceeds_capacity() {
        let queue = CircularLongQueue::new(8);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let queue = &queue;
                scope.spawn(move || {
                    for i in 0..5_000 {
                        queue.offer(t * 10_000 + i);
                        queue.poll();
                    }
                });
            }
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let size = queue.size();
                    assert!(size <= queue.capacity());
                    let remaining = queue.remaining_capacity();
                    assert!(remaining <= queue.capacity());
                }
            });
            std::thread::sleep(std::time::Duration::from_millis(50));
            done.store(true, Ordering::Release);
        });
        assert!(queue.size() <= 8);
    }

    #[test]
    fn test_drain_returns_fifo_order() {
        let queue = CircularLongQueue::new(4);
        for v in [5, 6, 7] {
            queue.offer(v);
        }
        queue.poll();
        queue.offer(8);
        queue.offer(9);
        assert_eq!(queue.drain(), vec![6, 7, 8, 9]);
        assert!(queue.is_empty());
    }
}
