//! Event dispatcher: token-addressed publish/subscribe routing
//!
//! Subscribers are bound once as [`Connection`]s (subscriber token plus
//! mailbox). Registering a connection to an event appends it to that event's
//! subscriber list; fan-out follows that order.
//!
//! Writers (`bind`, `register`, `deregister`, `unbind`) serialize on one
//! registry lock and publish a fresh copy of the subscription table. A send
//! takes the current table pointer once and walks an immutable slice, so a
//! concurrent registration is either fully visible to a send or not at all.
//!
//! Taking the pointer is a shared read lock held only for one `Arc` clone.
//! Sends never wait on each other and never run mailbox pushes under it.
//! Writers build the next table outside that lock and take it exclusively
//! only to swap the pointer.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use turbine_core::{ArrayInflowQueue, EventDispatcher, InflowQueue, OperandStack, OverflowPolicy, Token};
//!
//! let dispatcher = EventDispatcher::new();
//! let mailbox: Arc<dyn InflowQueue> = Arc::new(ArrayInflowQueue::new(4, OverflowPolicy::DropIncoming));
//! dispatcher.bind("listener", mailbox.clone()).unwrap();
//! dispatcher.register(&Token::new("listener"), &Token::new("news")).unwrap();
//!
//! let sender = dispatcher.lookup(&Token::new("publisher"));
//! let delivery = sender.send(&Token::new("news"), &OperandStack::new());
//! assert_eq!(delivery.enqueued, 1);
//! assert_eq!(mailbox.size(), 1);
//! ```

use crate::error::{Error, Result};
use crate::inflow::{InflowQueue, PushOutcome};
use crate::operand::OperandStack;
use crate::Token;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Notification that a mailbox has new work
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// Replaceable wake target shared by a connection and whoever schedules it
#[derive(Default)]
pub struct WakerSlot {
    waker: RwLock<Option<Arc<dyn Wake>>>,
}

impl WakerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, waker: Arc<dyn Wake>) {
        *self.waker.write() = Some(waker);
    }

    pub fn clear(&self) {
        *self.waker.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.waker.read().is_some()
    }

    pub fn wake(&self) {
        if let Some(waker) = self.waker.read().as_ref() {
            waker.wake();
        }
    }
}

impl fmt::Debug for WakerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Binding of a subscriber token to its mailbox
#[derive(Clone)]
pub struct Connection {
    subscriber: Token,
    queue: Arc<dyn InflowQueue>,
    waker: Arc<WakerSlot>,
}

impl Connection {
    pub fn new(subscriber: impl Into<Token>, queue: Arc<dyn InflowQueue>) -> Self {
        Self {
            subscriber: subscriber.into(),
            queue,
            waker: Arc::new(WakerSlot::new()),
        }
    }

    pub fn subscriber(&self) -> &Token {
        &self.subscriber
    }

    pub fn queue(&self) -> &Arc<dyn InflowQueue> {
        &self.queue
    }

    pub fn waker(&self) -> &Arc<WakerSlot> {
        &self.waker
    }

    /// Push into the mailbox and wake its scheduler if the message landed
    pub fn deliver(&self, event: &Token, payload: &OperandStack) -> PushOutcome {
        let outcome = self.queue.push(event, payload);
        if outcome.is_enqueued() {
            self.waker.wake();
        }
        outcome
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("subscriber", &self.subscriber)
            .field("pending", &self.queue.size())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

type SubscriptionTable = HashMap<Token, Arc<[Connection]>>;

/// Current table; replaced wholesale by writers
///
/// Readers hold the lock just long enough to clone the `Arc`.
#[derive(Default)]
struct TableCell(RwLock<Arc<SubscriptionTable>>);

impl TableCell {
    fn snapshot(&self) -> Arc<SubscriptionTable> {
        Arc::clone(&self.0.read())
    }

    // Callers hold the registry lock, so no other writer races the swap
    fn publish(&self, next: SubscriptionTable) {
        let previous = std::mem::replace(&mut *self.0.write(), Arc::new(next));
        drop(previous);
    }

    fn subscribers_of(&self, event: &Token) -> Option<Arc<[Connection]>> {
        self.snapshot().get(event).cloned()
    }
}

struct Shared {
    /// Bound connections by subscriber; guards all table writes
    registry: Mutex<IndexMap<Token, Connection>>,
    /// Shared with every sender, which never points back here
    table: Arc<TableCell>,
    /// Memoized sender handles
    senders: Mutex<IndexMap<Token, Sender>>,
}

/// Routes events from publishers to subscribed mailboxes
#[derive(Clone)]
pub struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(IndexMap::new()),
                table: Arc::new(TableCell::default()),
                senders: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Bind a subscriber token to a mailbox
    pub fn bind(
        &self,
        subscriber: impl Into<Token>,
        queue: Arc<dyn InflowQueue>,
    ) -> Result<Connection> {
        self.attach(Connection::new(subscriber, queue))
    }

    /// Bind an existing connection
    pub fn attach(&self, connection: Connection) -> Result<Connection> {
        let mut registry = self.shared.registry.lock();
        let subscriber = connection.subscriber().clone();
        if registry.contains_key(&subscriber) {
            return Err(Error::DuplicateSubscriber(subscriber));
        }
        registry.insert(subscriber.clone(), connection.clone());
        debug!(site = "dispatcher", subscriber = %subscriber, "connection bound");
        Ok(connection)
    }

    /// Connection bound to `subscriber`, if any
    pub fn connection(&self, subscriber: &Token) -> Option<Connection> {
        self.shared.registry.lock().get(subscriber).cloned()
    }

    /// Subscribe `subscriber`'s mailbox to `event`
    ///
    /// Registering the same pair twice delivers each message twice.
    pub fn register(&self, subscriber: &Token, event: &Token) -> Result<()> {
        let registry = self.shared.registry.lock();
        let connection = registry
            .get(subscriber)
            .cloned()
            .ok_or_else(|| Error::UnknownSubscriber(subscriber.clone()))?;

        let mut next = SubscriptionTable::clone(&self.shared.table.snapshot());
        let mut list: Vec<Connection> = next
            .get(event)
            .map(|current| current.to_vec())
            .unwrap_or_default();
        list.push(connection);
        next.insert(event.clone(), Arc::from(list));
        self.shared.table.publish(next);

        debug!(site = "dispatcher", subscriber = %subscriber, event = %event, "subscription registered");
        Ok(())
    }

    /// Remove one subscription of `subscriber` to `event`
    ///
    /// Returns `false` (and changes nothing) if there was none.
    pub fn deregister(&self, subscriber: &Token, event: &Token) -> bool {
        let _registry = self.shared.registry.lock();
        let table = self.shared.table.snapshot();
        let Some(current) = table.get(event) else {
            return false;
        };
        let Some(position) = current.iter().position(|c| c.subscriber() == subscriber) else {
            return false;
        };

        let mut list = current.to_vec();
        list.remove(position);
        let mut next = SubscriptionTable::clone(&table);
        if list.is_empty() {
            next.remove(event);
        } else {
            next.insert(event.clone(), Arc::from(list));
        }
        self.shared.table.publish(next);

        debug!(site = "dispatcher", subscriber = %subscriber, event = %event, "subscription removed");
        true
    }

    /// Forget a subscriber: drop its connection and every subscription it holds
    pub fn unbind(&self, subscriber: &Token) -> Option<Connection> {
        let mut registry = self.shared.registry.lock();
        let connection = registry.shift_remove(subscriber)?;

        let next: SubscriptionTable = self
            .shared
            .table
            .snapshot()
            .iter()
            .filter_map(|(event, list)| {
                let kept: Vec<Connection> = list
                    .iter()
                    .filter(|c| c.subscriber() != subscriber)
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (event.clone(), Arc::from(kept)))
            })
            .collect();
        self.shared.table.publish(next);

        debug!(site = "dispatcher", subscriber = %subscriber, "connection unbound");
        Some(connection)
    }

    /// Sender handle for `publisher`, created on first use
    pub fn lookup(&self, publisher: &Token) -> Sender {
        let mut senders = self.shared.senders.lock();
        senders
            .entry(publisher.clone())
            .or_insert_with(|| Sender {
                publisher: publisher.clone(),
                table: Arc::clone(&self.shared.table),
            })
            .clone()
    }

    /// Subscribers of `event` in delivery order
    pub fn subscribers(&self, event: &Token) -> Vec<Token> {
        self.shared
            .table
            .subscribers_of(event)
            .map(|list| list.iter().map(|c| c.subscriber().clone()).collect())
            .unwrap_or_default()
    }

    /// Events with at least one subscriber
    pub fn events(&self) -> Vec<Token> {
        let mut events: Vec<Token> = self.shared.table.snapshot().keys().cloned().collect();
        events.sort();
        events
    }

    /// Bound subscribers in binding order
    pub fn bound(&self) -> Vec<Token> {
        self.shared.registry.lock().keys().cloned().collect()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("bound", &self.shared.registry.lock().len())
            .field("events", &self.shared.table.snapshot().len())
            .finish()
    }
}

/// Summary of one fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    /// Subscribers the message was offered to
    pub attempted: usize,
    /// Subscribers whose mailbox now holds it
    pub enqueued: usize,
}

/// Publisher-scoped send handle
#[derive(Clone)]
pub struct Sender {
    publisher: Token,
    table: Arc<TableCell>,
}

impl Sender {
    pub fn publisher(&self) -> &Token {
        &self.publisher
    }

    /// Offer `payload` on `event` to every subscriber, in subscription order
    ///
    /// Each mailbox applies its own overflow policy; one full mailbox does
    /// not affect delivery to the others.
    pub fn send(&self, event: &Token, payload: &OperandStack) -> Delivery {
        let Some(subscribers) = self.table.subscribers_of(event) else {
            return Delivery::default();
        };
        let mut delivery = Delivery {
            attempted: subscribers.len(),
            enqueued: 0,
        };
        for connection in subscribers.iter() {
            if connection.deliver(event, payload).is_enqueued() {
                delivery.enqueued += 1;
            }
        }
        delivery
    }

    /// Check if any subscriber of `event` has a full mailbox
    pub fn is_saturated(&self, event: &Token) -> bool {
        self.table
            .subscribers_of(event)
            .is_some_and(|list| list.iter().any(|c| c.queue().is_full()))
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("publisher", &self.publisher)
            .finish()
    }
}
