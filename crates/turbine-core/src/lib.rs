//! Turbine Core - Messaging engine for reactor-style runtimes
//!
//! This crate provides the pieces a reactor runtime is built from:
//! - Interned names (`Token`) and an explicit `IdentityGenerator`
//! - Pooled, reference-counted payloads (`Operand`, `OperandStack`, `Pool`)
//! - Bounded mailboxes with overflow policies (`InflowQueue`)
//! - Token-addressed publish/subscribe routing (`EventDispatcher`)
//! - Reactors with precondition-guarded reactions and a crank step
//!
//! ## Message flow
//!
//! ```text
//! Sender::send(event, stack)
//!  │
//!  └── EventDispatcher snapshot: event -> [Connection, ...]
//!       │
//!       └── InflowQueue::push (overflow policy) -> Wake
//!            │
//!            └── Reactive::crank -> first matching Reaction
//! ```
//!
//! turbine-core is standalone: it does NOT know about pumps. Anything that can
//! call [`Reactive::crank`] can drive a reactor.

mod dispatcher;
mod error;
pub mod inflow;
mod operand;
pub mod pool;
pub mod predicate;
mod queue;
mod reactor;
mod token;

pub use dispatcher::{Connection, Delivery, EventDispatcher, Sender, Wake, WakerSlot};
pub use error::{Error, ReactionFailure, Result};
pub use inflow::{
    ArrayInflowQueue, Backlog, BoundedQueue, InflowQueue, LinkedBacklog, LinkedInflowQueue,
    Message, OverflowPolicy, PushOutcome, QueueConfig, QueueKind, QueueStats, SlotRing,
};
pub use operand::{Iter, Operand, OperandStack, Reclaim};
pub use pool::{
    CompositePool, DynamicPool, DynamicPoolConfig, FixedPool, FixedPoolConfig, Pool, PoolStats,
};
pub use queue::{CircularLongQueue, LongRing};
pub use reactor::{
    CollectingFailureSink, CrankOutcome, ErrorHandler, FailureRecord, FailureSink, Input,
    Lifecycle, LogFailureSink, Output, Ports, Precondition, Reaction, Reactive, Reactor,
    ReactorBuilder, Task, TaskResult,
};
pub use token::{IdentityGenerator, Token, TokenTable};
