//! Inflow queues: bounded per-reactor mailboxes
//!
//! A mailbox holds `(event, payload)` [`Message`]s in FIFO order. `push` never
//! blocks: when the queue is full the configured [`OverflowPolicy`] decides
//! what gives way. Each mailbox has exactly one lock; entries pushed out by
//! the policy, and entries released by `close`, are dropped after that lock
//! is released.
//!
//! Two backlogs are provided:
//! - [`SlotRing`] (array kind): preallocated slots ordered by a [`LongRing`]
//!   of packed 64-bit slot handles; no allocation on the push/pop path
//! - [`LinkedBacklog`] (linked kind): grows on demand up to the capacity
//!
//! # Example
//!
//! ```
//! use turbine_core::{ArrayInflowQueue, InflowQueue, OperandStack, OverflowPolicy, PushOutcome, Token};
//!
//! let queue = ArrayInflowQueue::new(1, OverflowPolicy::DropOldest);
//! let event = Token::new("tick");
//! assert_eq!(queue.push(&event, &OperandStack::new()), PushOutcome::Accepted);
//! assert_eq!(queue.push(&event, &OperandStack::new()), PushOutcome::Evicted(1));
//! assert_eq!(queue.size(), 1);
//! ```

use crate::error::{Error, Result};
use crate::operand::OperandStack;
use crate::queue::LongRing;
use crate::Token;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// One routed message
#[derive(Debug, Clone)]
pub struct Message {
    /// Event the message was sent on
    pub event: Token,
    /// Payload
    pub payload: OperandStack,
}

impl Message {
    pub fn new(event: Token, payload: OperandStack) -> Self {
        Self { event, payload }
    }
}

/// What a full mailbox does with a new arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Refuse the arrival and report the push as rejected
    #[default]
    DropIncoming,
    /// Evict the oldest queued entry, then enqueue
    DropOldest,
    /// Evict the newest queued entry, then enqueue
    DropNewest,
    /// Drop the arrival silently, leaving the backlog untouched
    DiscardIncoming,
    /// Drop the whole backlog, then enqueue
    DropBacklog,
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without displacing anything
    Accepted,
    /// Enqueued after evicting this many entries
    Evicted(usize),
    /// Refused (`DropIncoming`)
    Rejected,
    /// Dropped silently (`DiscardIncoming`)
    Discarded,
    /// The mailbox is closed
    Closed,
}

impl PushOutcome {
    /// Check if the message is now in the queue
    pub fn is_enqueued(&self) -> bool {
        matches!(self, PushOutcome::Accepted | PushOutcome::Evicted(_))
    }
}

/// Counters kept by every mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub accepted: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub evicted: u64,
}

/// A bounded, non-blocking FIFO mailbox
pub trait InflowQueue: Send + Sync {
    /// Enqueue a message, applying the overflow policy when full
    fn push(&self, event: &Token, payload: &OperandStack) -> PushOutcome;

    /// Dequeue the oldest message
    fn pop(&self) -> Option<Message>;

    /// Oldest message, left in place
    fn peek(&self) -> Option<Message>;

    fn size(&self) -> usize;

    fn capacity(&self) -> usize;

    fn policy(&self) -> OverflowPolicy;

    fn stats(&self) -> QueueStats;

    /// Stop accepting pushes and release everything still queued
    fn close(&self);

    fn is_closed(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn is_full(&self) -> bool {
        self.size() >= self.capacity()
    }
}

/// Storage behind a [`BoundedQueue`]
///
/// `push_back` is only called when `len() < capacity()`.
pub trait Backlog: Send {
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
    fn push_back(&mut self, message: Message);
    fn pop_front(&mut self) -> Option<Message>;
    fn pop_back(&mut self) -> Option<Message>;
    fn front(&self) -> Option<&Message>;
    fn drain_all(&mut self) -> Vec<Message>;
}

// ============================================================================
// Array backlog
// ============================================================================

/// Fixed slot table ordered by a ring of packed handles
///
/// Each handle packs `generation << 32 | slot`; the generation guards
/// against a handle outliving its slot.
#[derive(Debug)]
pub struct SlotRing {
    order: LongRing,
    slots: Vec<Option<(u32, Message)>>,
    free: Vec<u32>,
    generation: u32,
}

impl SlotRing {
    /// # Panics
    ///
    /// Panics if `capacity` is 0; [`QueueConfig::build`] reports that as an error instead.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        assert!(capacity <= u32::MAX as usize, "capacity exceeds slot range");
        Self {
            order: LongRing::new(capacity),
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity as u32).rev().collect(),
            generation: 0,
        }
    }

    fn pack(generation: u32, slot: u32) -> u64 {
        ((generation as u64) << 32) | slot as u64
    }

    fn unpack(handle: u64) -> (u32, u32) {
        ((handle >> 32) as u32, handle as u32)
    }

    fn take(&mut self, handle: u64) -> Option<Message> {
        let (generation, slot) = Self::unpack(handle);
        let (stored, message) = self.slots[slot as usize].take()?;
        debug_assert_eq!(stored, generation, "stale slot handle");
        self.free.push(slot);
        Some(message)
    }
}

impl Backlog for SlotRing {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn capacity(&self) -> usize {
        self.order.capacity()
    }

    fn push_back(&mut self, message: Message) {
        let Some(slot) = self.free.pop() else {
            debug_assert!(false, "push_back on a full slot ring");
            return;
        };
        self.generation = self.generation.wrapping_add(1);
        self.slots[slot as usize] = Some((self.generation, message));
        let accepted = self.order.push_back(Self::pack(self.generation, slot));
        debug_assert!(accepted, "order ring and slot table out of step");
    }

    fn pop_front(&mut self) -> Option<Message> {
        let handle = self.order.pop_front()?;
        self.take(handle)
    }

    fn pop_back(&mut self) -> Option<Message> {
        let handle = self.order.pop_back()?;
        self.take(handle)
    }

    fn front(&self) -> Option<&Message> {
        let (_, slot) = Self::unpack(self.order.front()?);
        self.slots[slot as usize].as_ref().map(|(_, m)| m)
    }

    fn drain_all(&mut self) -> Vec<Message> {
        let mut drained = Vec::with_capacity(self.order.len());
        while let Some(message) = self.pop_front() {
            drained.push(message);
        }
        drained
    }
}

// ============================================================================
// Linked backlog
// ============================================================================

/// Backlog that allocates per entry, bounded by `capacity`
#[derive(Debug)]
pub struct LinkedBacklog {
    items: VecDeque<Message>,
    capacity: usize,
}

impl LinkedBacklog {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }
}

impl Backlog for LinkedBacklog {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn push_back(&mut self, message: Message) {
        self.items.push_back(message);
    }

    fn pop_front(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    fn pop_back(&mut self) -> Option<Message> {
        self.items.pop_back()
    }

    fn front(&self) -> Option<&Message> {
        self.items.front()
    }

    fn drain_all(&mut self) -> Vec<Message> {
        self.items.drain(..).collect()
    }
}

// ============================================================================
// Bounded queue
// ============================================================================

#[derive(Debug)]
struct State<B> {
    backlog: B,
    stats: QueueStats,
    closed: bool,
}

/// Mailbox over a [`Backlog`], one lock per instance
#[derive(Debug)]
pub struct BoundedQueue<B: Backlog> {
    policy: OverflowPolicy,
    state: Mutex<State<B>>,
}

/// Array-kind mailbox
pub type ArrayInflowQueue = BoundedQueue<SlotRing>;

/// Linked-kind mailbox
pub type LinkedInflowQueue = BoundedQueue<LinkedBacklog>;

impl BoundedQueue<SlotRing> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_backlog(SlotRing::new(capacity), policy)
    }
}

impl BoundedQueue<LinkedBacklog> {
    pub fn linked(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::with_backlog(LinkedBacklog::new(capacity), policy)
    }
}

impl<B: Backlog> BoundedQueue<B> {
    pub fn with_backlog(backlog: B, policy: OverflowPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(State {
                backlog,
                stats: QueueStats::default(),
                closed: false,
            }),
        }
    }
}

// Apply the policy to a full or non-full backlog. Displaced entries go to
// `spill` so the caller can drop them after unlocking.
fn offer<B: Backlog>(
    state: &mut State<B>,
    policy: OverflowPolicy,
    message: Message,
    spill: &mut Vec<Message>,
) -> PushOutcome {
    let backlog = &mut state.backlog;
    if backlog.len() < backlog.capacity() {
        backlog.push_back(message);
        state.stats.accepted += 1;
        return PushOutcome::Accepted;
    }

    let outcome = match policy {
        OverflowPolicy::DropIncoming => {
            state.stats.rejected += 1;
            spill.push(message);
            return PushOutcome::Rejected;
        }
        OverflowPolicy::DiscardIncoming => {
            state.stats.discarded += 1;
            spill.push(message);
            return PushOutcome::Discarded;
        }
        OverflowPolicy::DropOldest => {
            spill.extend(backlog.pop_front());
            PushOutcome::Evicted(1)
        }
        OverflowPolicy::DropNewest => {
            spill.extend(backlog.pop_back());
            PushOutcome::Evicted(1)
        }
        OverflowPolicy::DropBacklog => {
            let dropped = backlog.drain_all();
            let count = dropped.len();
            spill.extend(dropped);
            PushOutcome::Evicted(count)
        }
    };
    backlog.push_back(message);
    state.stats.accepted += 1;
    if let PushOutcome::Evicted(n) = outcome {
        state.stats.evicted += n as u64;
    }
    outcome
}

impl<B: Backlog> InflowQueue for BoundedQueue<B> {
    fn push(&self, event: &Token, payload: &OperandStack) -> PushOutcome {
        let message = Message::new(event.clone(), payload.clone());
        let mut spill = Vec::new();
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                PushOutcome::Closed
            } else {
                offer(&mut *state, self.policy, message, &mut spill)
            }
        };
        if !matches!(outcome, PushOutcome::Accepted) {
            debug!(site = "inflow", event = %event, policy = ?self.policy, outcome = ?outcome, "mailbox full or closed");
        }
        drop(spill);
        outcome
    }

    fn pop(&self) -> Option<Message> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.backlog.pop_front()
    }

    fn peek(&self) -> Option<Message> {
        let state = self.state.lock();
        if state.closed {
            return None;
        }
        state.backlog.front().cloned()
    }

    fn size(&self) -> usize {
        self.state.lock().backlog.len()
    }

    fn capacity(&self) -> usize {
        self.state.lock().backlog.capacity()
    }

    fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    fn stats(&self) -> QueueStats {
        self.state.lock().stats
    }

    fn close(&self) {
        let released = {
            let mut state = self.state.lock();
            state.closed = true;
            state.backlog.drain_all()
        };
        if !released.is_empty() {
            debug!(site = "inflow", released = released.len(), "mailbox closed with pending messages");
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Storage kind of a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[default]
    Array,
    Linked,
}

/// Mailbox configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub kind: QueueKind,
    pub capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    pub fn new(kind: QueueKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Check that a mailbox of this shape can be built; `mailbox` names it in errors
    pub fn validate(&self, mailbox: &Token) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::ZeroCapacity(mailbox.clone()));
        }
        Ok(())
    }

    /// Build the mailbox `mailbox` with this shape
    pub fn build(&self, mailbox: &Token) -> Result<Arc<dyn InflowQueue>> {
        self.validate(mailbox)?;
        Ok(match self.kind {
            QueueKind::Array => Arc::new(ArrayInflowQueue::new(self.capacity, self.overflow)),
            QueueKind::Linked => Arc::new(LinkedInflowQueue::linked(self.capacity, self.overflow)),
        })
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(QueueKind::Array, 1024)
    }
}
