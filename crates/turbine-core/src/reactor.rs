//! Reactors: named stateful units driven one crank at a time
//!
//! A reactor owns its input mailboxes, a set of output handles and an ordered
//! list of reactions. Each reaction pairs a precondition with a task. A crank
//! runs the first reaction whose precondition holds, or the reactor's
//! `or_else` task if none does, and reports what happened as a
//! [`CrankOutcome`].
//!
//! Lifecycle: `Unstarted -> Starting -> Started -> Stopping -> Stopped`.
//! Cranks only do work while `Started`. A reacting flag keeps a reactor from
//! being cranked by two threads at once.
//!
//! # Example
//!
//! ```
//! use turbine_core::predicate::input_not_empty;
//! use turbine_core::{EventDispatcher, QueueConfig, Reaction, Reactive, Reactor, Token};
//!
//! let dispatcher = EventDispatcher::new();
//! let counter = Reactor::builder("counter", 0u64)
//!     .input("in", QueueConfig::default())
//!     .subscribe("in", "ticks")
//!     .reaction(
//!         Reaction::new("count")
//!             .when(input_not_empty("in"))
//!             .then(|ports, count: &mut u64| {
//!                 ports.input("in")?.pop();
//!                 *count += 1;
//!                 Ok(())
//!             }),
//!     )
//!     .build(&dispatcher)
//!     .unwrap();
//!
//! counter.start().unwrap();
//! dispatcher.lookup(&Token::new("clock")).send(&Token::new("ticks"), &Default::default());
//! assert!(counter.crank().did_work());
//! assert_eq!(counter.inspect(|count| *count), 1);
//! ```

use crate::dispatcher::{Connection, Delivery, EventDispatcher, Sender, Wake};
use crate::error::{Error, ReactionFailure, Result};
use crate::inflow::{InflowQueue, Message, QueueConfig};
use crate::operand::OperandStack;
use crate::Token;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ============================================================================
// Lifecycle
// ============================================================================

/// Reactor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Lifecycle {
    Unstarted = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Unstarted,
            1 => Lifecycle::Starting,
            2 => Lifecycle::Started,
            3 => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }
}

// ============================================================================
// Ports
// ============================================================================

/// Named input port: a bound mailbox
#[derive(Clone, Debug)]
pub struct Input {
    name: Token,
    connection: Connection,
}

impl Input {
    pub fn name(&self) -> &Token {
        &self.name
    }

    /// Subscriber token the dispatcher routes to
    pub fn subscriber(&self) -> &Token {
        self.connection.subscriber()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn queue(&self) -> &Arc<dyn InflowQueue> {
        self.connection.queue()
    }

    pub fn pop(&self) -> Option<Message> {
        self.queue().pop()
    }

    pub fn peek(&self) -> Option<Message> {
        self.queue().peek()
    }

    pub fn size(&self) -> usize {
        self.queue().size()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue().is_full()
    }
}

/// Named output port: an event token plus the reactor's sender
#[derive(Clone, Debug)]
pub struct Output {
    name: Token,
    event: Token,
    sender: Sender,
}

impl Output {
    pub fn name(&self) -> &Token {
        &self.name
    }

    /// Event token this output publishes on
    pub fn event(&self) -> &Token {
        &self.event
    }

    pub fn send(&self, payload: &OperandStack) -> Delivery {
        self.sender.send(&self.event, payload)
    }

    /// Check if any connected mailbox is full
    pub fn is_saturated(&self) -> bool {
        self.sender.is_saturated(&self.event)
    }
}

/// A reactor's ports, as seen by its reactions
#[derive(Debug)]
pub struct Ports {
    reactor: Token,
    inputs: IndexMap<Token, Input>,
    outputs: IndexMap<Token, Output>,
}

impl Ports {
    /// Name of the owning reactor
    pub fn reactor(&self) -> &Token {
        &self.reactor
    }

    pub fn input(&self, name: &str) -> Result<&Input> {
        self.inputs
            .get(name)
            .ok_or_else(|| Error::UnknownInput(self.reactor.child(name)))
    }

    pub fn output(&self, name: &str) -> Result<&Output> {
        self.outputs
            .get(name)
            .ok_or_else(|| Error::UnknownOutput(self.reactor.child(name)))
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Input> {
        self.inputs.values()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    fn has_pending(&self) -> bool {
        self.inputs.values().any(|input| !input.is_empty())
    }

    fn close_inputs(&self) {
        for input in self.inputs.values() {
            input.queue().close();
        }
    }
}

// ============================================================================
// Reactions
// ============================================================================

/// Outcome of a task or hook
pub type TaskResult = std::result::Result<(), ReactionFailure>;

/// Reaction guard
pub type Precondition<S> = Box<dyn FnMut(&Ports, &S) -> bool + Send>;

/// Reaction body, `or_else` task and lifecycle hooks
pub type Task<S> = Box<dyn FnMut(&Ports, &mut S) -> TaskResult + Send>;

/// Recovery handler for a failed task
pub type ErrorHandler<S> = Box<dyn FnMut(&Ports, &mut S, &ReactionFailure) -> TaskResult + Send>;

/// A named precondition/task pair with an optional error handler
pub struct Reaction<S> {
    name: Token,
    precondition: Precondition<S>,
    task: Task<S>,
    on_error: Option<ErrorHandler<S>>,
}

impl<S: 'static> Reaction<S> {
    /// Create a reaction that always matches and does nothing
    pub fn new(name: impl Into<Token>) -> Self {
        Self {
            name: name.into(),
            precondition: Box::new(|_: &Ports, _: &S| true),
            task: Box::new(|_: &Ports, _: &mut S| Ok(())),
            on_error: None,
        }
    }

    /// Set the precondition
    pub fn when(mut self, precondition: impl FnMut(&Ports, &S) -> bool + Send + 'static) -> Self {
        self.precondition = Box::new(precondition);
        self
    }

    /// Set the task run on a match
    pub fn then(mut self, task: impl FnMut(&Ports, &mut S) -> TaskResult + Send + 'static) -> Self {
        self.task = Box::new(task);
        self
    }

    /// Set the handler run when the task fails
    pub fn on_error(
        mut self,
        handler: impl FnMut(&Ports, &mut S, &ReactionFailure) -> TaskResult + Send + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn name(&self) -> &Token {
        &self.name
    }
}

impl<S> fmt::Debug for Reaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.name)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// What one crank did
#[derive(Debug, Clone, PartialEq)]
pub enum CrankOutcome {
    /// The reactor is not started
    Inactive,
    /// Another thread is cranking this reactor
    Busy,
    /// No precondition held and there is no `or_else` task
    Idle,
    /// No precondition held; the `or_else` task ran
    OrElse,
    /// The named reaction ran to completion
    Reacted(Token),
    /// The reaction failed and its error handler recovered
    Recovered {
        reaction: Token,
        failure: ReactionFailure,
    },
    /// A task failed without recovery; `reaction` is `None` for `or_else`
    Failed {
        reaction: Option<Token>,
        failure: ReactionFailure,
    },
}

impl CrankOutcome {
    /// Check if a reaction consumed work on this crank
    pub fn did_work(&self) -> bool {
        matches!(
            self,
            CrankOutcome::Reacted(_) | CrankOutcome::Recovered { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CrankOutcome::Failed { .. })
    }

    /// Forward an unrecovered failure to `sink`
    pub fn report(&self, reactor: &Token, sink: &dyn FailureSink) {
        if let CrankOutcome::Failed { reaction, failure } = self {
            sink.report(reactor, reaction.as_ref(), failure);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
    }
}

// Run `f`, turning a panic into a failure
fn guarded<T>(f: impl FnOnce() -> std::result::Result<T, ReactionFailure>) -> std::result::Result<T, ReactionFailure> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(ReactionFailure::Panicked(panic_message(payload))))
}

// ============================================================================
// Failure sink
// ============================================================================

/// Receiver for failures no reaction recovered from
pub trait FailureSink: Send + Sync {
    fn report(&self, reactor: &Token, reaction: Option<&Token>, failure: &ReactionFailure);
}

/// Logs failures through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn report(&self, reactor: &Token, reaction: Option<&Token>, failure: &ReactionFailure) {
        match reaction {
            Some(reaction) => error!(site = "reactor", reactor = %reactor, reaction = %reaction, failure = %failure, "reaction failed"),
            None => error!(site = "reactor", reactor = %reactor, failure = %failure, "or-else task failed"),
        }
    }
}

/// One reported failure
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub reactor: Token,
    pub reaction: Option<Token>,
    pub failure: ReactionFailure,
}

/// Keeps failures in memory for later inspection
#[derive(Debug, Default)]
pub struct CollectingFailureSink {
    records: Mutex<Vec<FailureRecord>>,
}

impl CollectingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Remove and return everything collected so far
    pub fn take(&self) -> Vec<FailureRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl FailureSink for CollectingFailureSink {
    fn report(&self, reactor: &Token, reaction: Option<&Token>, failure: &ReactionFailure) {
        self.records.lock().push(FailureRecord {
            reactor: reactor.clone(),
            reaction: reaction.cloned(),
            failure: failure.clone(),
        });
    }
}

// ============================================================================
// Reactive
// ============================================================================

/// Type-erased reactor, as seen by powerplants and the runtime
pub trait Reactive: Send + Sync {
    fn name(&self) -> &Token;

    fn lifecycle(&self) -> Lifecycle;

    /// Run setup and move to `Started`
    fn start(&self) -> Result<()>;

    /// Run teardown, close the mailboxes and move to `Stopped`
    fn stop(&self) -> Result<()>;

    /// Run at most one reaction
    fn crank(&self) -> CrankOutcome;

    /// Check if any input holds a message
    fn has_pending(&self) -> bool;

    /// Route mailbox wake-ups to `waker`
    fn attach_waker(&self, waker: Arc<dyn Wake>);

    fn detach_waker(&self);

    fn ports(&self) -> &Ports;
}

// ============================================================================
// Reactor
// ============================================================================

struct Cell<S> {
    state: S,
    reactions: Vec<Reaction<S>>,
    or_else: Option<Task<S>>,
    on_start: Option<Task<S>>,
    on_stop: Option<Task<S>>,
}

/// Clears the reacting flag when a crank ends, including by unwinding
struct Reacting<'a>(&'a AtomicBool);

impl Drop for Reacting<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A reactor over user state `S`
pub struct Reactor<S> {
    name: Token,
    lifecycle: AtomicU8,
    reacting: AtomicBool,
    ports: Ports,
    cell: Mutex<Cell<S>>,
}

impl<S: Send + 'static> Reactor<S> {
    /// Start building a reactor named `name` owning `state`
    pub fn builder(name: impl Into<Token>, state: S) -> ReactorBuilder<S> {
        ReactorBuilder::new(name, state)
    }

    /// Read the reactor's state; waits for an in-flight crank
    pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.cell.lock().state)
    }

    pub fn input(&self, name: &str) -> Result<&Input> {
        self.ports.input(name)
    }

    pub fn output(&self, name: &str) -> Result<&Output> {
        self.ports.output(name)
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        let moved = self
            .lifecycle
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            info!(site = "reactor", reactor = %self.name, from = ?from, to = ?to, "lifecycle transition");
        }
        moved
    }

    fn finish(&self, to: Lifecycle) {
        self.lifecycle.store(to as u8, Ordering::Release);
        info!(site = "reactor", reactor = %self.name, state = ?to, "lifecycle transition");
    }

    fn run_reaction(&self, cell: &mut Cell<S>) -> CrankOutcome {
        let Cell {
            state,
            reactions,
            or_else,
            ..
        } = cell;
        let ports = &self.ports;

        for reaction in reactions.iter_mut() {
            let matched = guarded(|| Ok((reaction.precondition)(ports, state)));
            match matched {
                Ok(false) => continue,
                Ok(true) => {}
                Err(failure) => {
                    return CrankOutcome::Failed {
                        reaction: Some(reaction.name.clone()),
                        failure,
                    }
                }
            }

            let failure = match guarded(|| (reaction.task)(ports, state)) {
                Ok(()) => return CrankOutcome::Reacted(reaction.name.clone()),
                Err(failure) => failure,
            };
            let Some(handler) = reaction.on_error.as_mut() else {
                return CrankOutcome::Failed {
                    reaction: Some(reaction.name.clone()),
                    failure,
                };
            };
            return match guarded(|| handler(ports, state, &failure)) {
                Ok(()) => {
                    debug!(site = "reactor", reactor = %self.name, reaction = %reaction.name, failure = %failure, "reaction recovered");
                    CrankOutcome::Recovered {
                        reaction: reaction.name.clone(),
                        failure,
                    }
                }
                Err(failure) => CrankOutcome::Failed {
                    reaction: Some(reaction.name.clone()),
                    failure,
                },
            };
        }

        match or_else {
            Some(task) => match guarded(|| task(ports, state)) {
                Ok(()) => CrankOutcome::OrElse,
                Err(failure) => CrankOutcome::Failed {
                    reaction: None,
                    failure,
                },
            },
            None => CrankOutcome::Idle,
        }
    }
}

impl<S: Send + 'static> Reactive for Reactor<S> {
    fn name(&self) -> &Token {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn start(&self) -> Result<()> {
        if !self.transition(Lifecycle::Unstarted, Lifecycle::Starting) {
            return Err(Error::InvalidTransition {
                reactor: self.name.clone(),
                from: self.lifecycle(),
                to: Lifecycle::Starting,
            });
        }

        let setup = {
            let mut cell = self.cell.lock();
            let Cell {
                state, on_start, ..
            } = &mut *cell;
            match on_start {
                Some(hook) => guarded(|| hook(&self.ports, state)),
                None => Ok(()),
            }
        };

        match setup {
            Ok(()) => {
                self.finish(Lifecycle::Started);
                Ok(())
            }
            Err(failure) => {
                warn!(site = "reactor", reactor = %self.name, failure = %failure, "setup failed");
                self.ports.close_inputs();
                self.finish(Lifecycle::Stopped);
                Err(Error::Setup {
                    reactor: self.name.clone(),
                    reason: failure.to_string(),
                })
            }
        }
    }

    fn stop(&self) -> Result<()> {
        loop {
            match self.lifecycle() {
                Lifecycle::Stopping | Lifecycle::Stopped => return Ok(()),
                Lifecycle::Starting => {
                    return Err(Error::InvalidTransition {
                        reactor: self.name.clone(),
                        from: Lifecycle::Starting,
                        to: Lifecycle::Stopping,
                    })
                }
                Lifecycle::Unstarted => {
                    if self.transition(Lifecycle::Unstarted, Lifecycle::Stopped) {
                        self.ports.close_inputs();
                        return Ok(());
                    }
                }
                Lifecycle::Started => {
                    if self.transition(Lifecycle::Started, Lifecycle::Stopping) {
                        break;
                    }
                }
            }
        }

        // The cell lock waits out a crank already in flight
        let teardown = {
            let mut cell = self.cell.lock();
            let Cell { state, on_stop, .. } = &mut *cell;
            match on_stop {
                Some(hook) => guarded(|| hook(&self.ports, state)),
                None => Ok(()),
            }
        };
        if let Err(failure) = teardown {
            warn!(site = "reactor", reactor = %self.name, failure = %failure, "teardown failed");
        }
        self.ports.close_inputs();
        self.finish(Lifecycle::Stopped);
        Ok(())
    }

    fn crank(&self) -> CrankOutcome {
        if self.lifecycle() != Lifecycle::Started {
            return CrankOutcome::Inactive;
        }
        if self
            .reacting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CrankOutcome::Busy;
        }
        let _reacting = Reacting(&self.reacting);

        let mut cell = self.cell.lock();
        // Re-check under the lock: a concurrent stop may have won the race
        if self.lifecycle() != Lifecycle::Started {
            return CrankOutcome::Inactive;
        }
        self.run_reaction(&mut cell)
    }

    fn has_pending(&self) -> bool {
        self.lifecycle() == Lifecycle::Started && self.ports.has_pending()
    }

    fn attach_waker(&self, waker: Arc<dyn Wake>) {
        for input in self.ports.inputs.values() {
            input.connection.waker().set(Arc::clone(&waker));
        }
    }

    fn detach_waker(&self) {
        for input in self.ports.inputs.values() {
            input.connection.waker().clear();
        }
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl<S> fmt::Debug for Reactor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("name", &self.name)
            .field(
                "lifecycle",
                &Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire)),
            )
            .field("inputs", &self.ports.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.ports.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Reactor`]
pub struct ReactorBuilder<S> {
    name: Token,
    state: S,
    inputs: Vec<(Token, QueueConfig)>,
    outputs: Vec<Token>,
    subscriptions: Vec<(Token, Token)>,
    reactions: Vec<Reaction<S>>,
    or_else: Option<Task<S>>,
    on_start: Option<Task<S>>,
    on_stop: Option<Task<S>>,
}

impl<S: Send + 'static> ReactorBuilder<S> {
    pub fn new(name: impl Into<Token>, state: S) -> Self {
        Self {
            name: name.into(),
            state,
            inputs: Vec::new(),
            outputs: Vec::new(),
            subscriptions: Vec::new(),
            reactions: Vec::new(),
            or_else: None,
            on_start: None,
            on_stop: None,
        }
    }

    /// Add an input port with its own mailbox
    pub fn input(mut self, name: impl Into<Token>, queue: QueueConfig) -> Self {
        self.inputs.push((name.into(), queue));
        self
    }

    /// Add an output port publishing on `<reactor>.<name>`
    pub fn output(mut self, name: impl Into<Token>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Subscribe an input to an event at build time
    pub fn subscribe(mut self, input: impl Into<Token>, event: impl Into<Token>) -> Self {
        self.subscriptions.push((input.into(), event.into()));
        self
    }

    /// Append a reaction; earlier reactions take priority
    pub fn reaction(mut self, reaction: Reaction<S>) -> Self {
        self.reactions.push(reaction);
        self
    }

    /// Task run when no precondition holds
    pub fn or_else(mut self, task: impl FnMut(&Ports, &mut S) -> TaskResult + Send + 'static) -> Self {
        self.or_else = Some(Box::new(task));
        self
    }

    /// Setup hook run by `start`
    pub fn on_start(mut self, hook: impl FnMut(&Ports, &mut S) -> TaskResult + Send + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Teardown hook run by `stop`
    pub fn on_stop(mut self, hook: impl FnMut(&Ports, &mut S) -> TaskResult + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }

    /// Bind the inputs to `dispatcher` and create the reactor, unstarted
    pub fn build(self, dispatcher: &EventDispatcher) -> Result<Reactor<S>> {
        for (input, config) in &self.inputs {
            config.validate(&self.name.child(input.as_str()))?;
        }
        for (input, _) in &self.subscriptions {
            if !self.inputs.iter().any(|(name, _)| name == input) {
                return Err(Error::UnknownInput(self.name.child(input.as_str())));
            }
        }

        let mut inputs: IndexMap<Token, Input> = IndexMap::new();
        for (input, config) in self.inputs {
            let subscriber = self.name.child(input.as_str());
            let connection = match config
                .build(&subscriber)
                .and_then(|queue| dispatcher.bind(subscriber, queue))
            {
                Ok(connection) => connection,
                Err(e) => {
                    for bound in inputs.values() {
                        dispatcher.unbind(bound.subscriber());
                    }
                    return Err(e);
                }
            };
            inputs.insert(
                input.clone(),
                Input {
                    name: input,
                    connection,
                },
            );
        }

        let sender = dispatcher.lookup(&self.name);
        let outputs = self
            .outputs
            .into_iter()
            .map(|output| {
                let port = Output {
                    event: self.name.child(output.as_str()),
                    name: output.clone(),
                    sender: sender.clone(),
                };
                (output, port)
            })
            .collect();

        let ports = Ports {
            reactor: self.name.clone(),
            inputs,
            outputs,
        };
        for (input, event) in &self.subscriptions {
            let subscriber = ports.input(input.as_str())?.subscriber();
            dispatcher.register(subscriber, event)?;
        }

        debug!(site = "reactor", reactor = %self.name, inputs = ports.inputs.len(), outputs = ports.outputs.len(), reactions = self.reactions.len(), "reactor built");
        Ok(Reactor {
            name: self.name,
            lifecycle: AtomicU8::new(Lifecycle::Unstarted as u8),
            reacting: AtomicBool::new(false),
            ports,
            cell: Mutex::new(Cell {
                state: self.state,
                reactions: self.reactions,
                or_else: self.or_else,
                on_start: self.on_start,
                on_stop: self.on_stop,
            }),
        })
    }
}

impl<S> fmt::Debug for ReactorBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorBuilder")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("reactions", &self.reactions)
            .finish()
    }
}
