//! Runtime - Owns pools, pumps and reactors and exposes the stable entry points
//!
//! Callers outside the engine use `send`, `connect`, `start` and `stop`. The
//! runtime never cranks reactors itself; it hands each one to the pump it was
//! placed on when the runtime starts.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use turbine_core::predicate::input_not_empty;
//! use turbine_core::{DynamicPool, DynamicPoolConfig, QueueConfig, Reaction, Reactor, Token};
//! use turbine_pump::{PumpConfig, PumpStrategy, Runtime};
//!
//! let mut runtime = Runtime::new();
//! runtime.add_pool(Arc::new(DynamicPool::new("ints", DynamicPoolConfig::default()))).unwrap();
//! let pump = runtime.spawn_pump("main", PumpStrategy::Polling, PumpConfig::default()).unwrap();
//!
//! let reactor = Reactor::builder("sum", 0i64)
//!     .input("in", QueueConfig::default())
//!     .subscribe("in", "numbers")
//!     .reaction(Reaction::new("add").when(input_not_empty("in")).then(|ports, sum: &mut i64| {
//!         if let Some(message) = ports.input("in")?.pop() {
//!             *sum += message.payload.peek_i64()?;
//!         }
//!         Ok(())
//!     }))
//!     .build(runtime.dispatcher())
//!     .unwrap();
//! let reactor = Arc::new(reactor);
//! runtime.add_reactor(reactor.clone(), &pump).unwrap();
//!
//! runtime.start().unwrap();
//! runtime.send_i64(&Token::new("ints"), &Token::new("numbers"), 42).unwrap();
//! runtime.stop().unwrap();
//! ```

use crate::config::{PumpConfig, PumpStrategy};
use crate::error::{Error, Result};
use crate::polling::PollingPowerplant;
use crate::powerplant::Powerplant;
use crate::resubmit::ResubmitPowerplant;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};
use turbine_core::{
    Delivery, EventDispatcher, FailureSink, IdentityGenerator, Input, Lifecycle, LogFailureSink,
    OperandStack, Output, Pool, Reactive, Sender, Token, TokenTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

struct Placed {
    reactor: Arc<dyn Reactive>,
    pump: Token,
}

/// Owner of a reactor topology and the pumps driving it
pub struct Runtime {
    name: Token,
    ids: IdentityGenerator,
    tokens: TokenTable,
    dispatcher: EventDispatcher,
    driver: Sender,
    pools: IndexMap<Token, Arc<dyn Pool>>,
    pumps: IndexMap<Token, Arc<dyn Powerplant>>,
    reactors: IndexMap<Token, Placed>,
    sink: Arc<dyn FailureSink>,
    state: Mutex<RunState>,
}

impl Runtime {
    /// Create an empty runtime that logs reaction failures
    pub fn new() -> Self {
        Self::with_failure_sink(Arc::new(LogFailureSink))
    }

    /// Create an empty runtime reporting reaction failures to `sink`
    pub fn with_failure_sink(sink: Arc<dyn FailureSink>) -> Self {
        let ids = IdentityGenerator::new();
        let name = ids.fresh("runtime");
        let dispatcher = EventDispatcher::new();
        let driver = dispatcher.lookup(&name);
        Self {
            name,
            ids,
            tokens: TokenTable::new(),
            dispatcher,
            driver,
            pools: IndexMap::new(),
            pumps: IndexMap::new(),
            reactors: IndexMap::new(),
            sink,
            state: Mutex::new(RunState::Idle),
        }
    }

    /// Publisher token used for sends made through the runtime
    pub fn name(&self) -> &Token {
        &self.name
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Generator for fresh names within this runtime
    pub fn identities(&self) -> &IdentityGenerator {
        &self.ids
    }

    /// Interned token for `name`
    pub fn token(&self, name: &str) -> Token {
        self.tokens.intern(name)
    }

    pub fn failure_sink(&self) -> &Arc<dyn FailureSink> {
        &self.sink
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn add_pool(&mut self, pool: Arc<dyn Pool>) -> Result<Token> {
        let name = pool.name().clone();
        if self.pools.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        self.pools.insert(name.clone(), pool);
        Ok(name)
    }

    pub fn pool(&self, name: &Token) -> Result<&Arc<dyn Pool>> {
        self.pools
            .get(name)
            .ok_or_else(|| Error::UnknownPool(name.clone()))
    }

    pub fn add_pump(&mut self, pump: Arc<dyn Powerplant>) -> Result<Token> {
        let name = pump.name().clone();
        if self.pumps.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        info!(site = "runtime", pump = %name, "pump added");
        self.pumps.insert(name.clone(), pump);
        Ok(name)
    }

    /// Create a pump of the given strategy, reporting to the runtime's sink
    pub fn spawn_pump(
        &mut self,
        name: impl Into<Token>,
        strategy: PumpStrategy,
        config: PumpConfig,
    ) -> Result<Token> {
        let name = name.into();
        if self.pumps.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        let sink = Arc::clone(&self.sink);
        let pump: Arc<dyn Powerplant> = match strategy {
            PumpStrategy::Polling => Arc::new(PollingPowerplant::start(name, config, sink)?),
            PumpStrategy::Resubmit => {
                Arc::new(ResubmitPowerplant::with_thread_pool(name, &config, sink)?)
            }
        };
        self.add_pump(pump)
    }

    pub fn pump(&self, name: &Token) -> Result<&Arc<dyn Powerplant>> {
        self.pumps
            .get(name)
            .ok_or_else(|| Error::UnknownPump(name.clone()))
    }

    /// Place `reactor` on `pump`
    ///
    /// A running runtime starts the reactor and binds it right away;
    /// otherwise that happens in [`Runtime::start`].
    pub fn add_reactor(&mut self, reactor: Arc<dyn Reactive>, pump: &Token) -> Result<()> {
        let name = reactor.name().clone();
        if self.reactors.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        let powerplant = Arc::clone(self.pump(pump)?);

        let state = *self.state.lock();
        match state {
            RunState::Stopped => return Err(Error::Shutdown(self.name.clone())),
            RunState::Running => activate(&reactor, powerplant.as_ref())?,
            RunState::Idle => {}
        }
        self.reactors.insert(
            name,
            Placed {
                reactor,
                pump: pump.clone(),
            },
        );
        Ok(())
    }

    pub fn reactor(&self, name: &Token) -> Result<&Arc<dyn Reactive>> {
        self.reactors
            .get(name)
            .map(|placed| &placed.reactor)
            .ok_or_else(|| Error::UnknownReactor(name.clone()))
    }

    /// Reactor names in registration order
    pub fn reactors(&self) -> Vec<Token> {
        self.reactors.keys().cloned().collect()
    }

    /// Name of the pump a reactor is placed on
    pub fn placement(&self, reactor: &Token) -> Result<&Token> {
        self.reactors
            .get(reactor)
            .map(|placed| &placed.pump)
            .ok_or_else(|| Error::UnknownReactor(reactor.clone()))
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Publish `payload` on `event`
    pub fn send(&self, event: &Token, payload: &OperandStack) -> Delivery {
        self.driver.send(event, payload)
    }

    /// Allocate `value` from `pool` and publish it on `event`
    pub fn send_i64(&self, pool: &Token, event: &Token, value: i64) -> Result<Delivery> {
        let payload = self.pool(pool)?.alloc_i64(&OperandStack::new(), value)?;
        Ok(self.send(event, &payload))
    }

    /// Route everything `output` publishes into `input`
    pub fn connect(&self, output: &Output, input: &Input) -> Result<()> {
        self.dispatcher
            .register(input.subscriber(), output.event())?;
        Ok(())
    }

    /// Connect `from.output` to `to.input` by name
    pub fn link(&self, from: &Token, output: &str, to: &Token, input: &str) -> Result<()> {
        let output = self.reactor(from)?.ports().output(output)?;
        let input = self.reactor(to)?.ports().input(input)?;
        self.connect(output, input)
    }

    /// Subscribe a reactor's input to an arbitrary event
    pub fn subscribe(&self, reactor: &Token, input: &str, event: &Token) -> Result<()> {
        let input = self.reactor(reactor)?.ports().input(input)?;
        self.dispatcher.register(input.subscriber(), event)?;
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start every reactor and bind it to its pump
    ///
    /// Starting a running runtime is a no-op; a stopped runtime cannot be
    /// restarted. If any reactor fails to start or bind, the runtime is shut
    /// down as by [`Runtime::stop`] and the error is returned.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            RunState::Running => return Ok(()),
            RunState::Stopped => return Err(Error::Shutdown(self.name.clone())),
            RunState::Idle => {}
        }
        for placed in self.reactors.values() {
            let activated = self
                .pump(&placed.pump)
                .and_then(|pump| activate(&placed.reactor, pump.as_ref()));
            if let Err(e) = activated {
                error!(site = "runtime", runtime = %self.name, reactor = %placed.reactor.name(), error = %e, "start failed, shutting down");
                self.shutdown(&mut state);
                return Err(e);
            }
        }
        *state = RunState::Running;
        info!(site = "runtime", runtime = %self.name, reactors = self.reactors.len(), pumps = self.pumps.len(), "runtime started");
        Ok(())
    }

    /// Close every pump, then stop every reactor
    ///
    /// Cranks already running finish first. Stopping closes the reactors'
    /// mailboxes, releasing any queued payloads.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == RunState::Stopped {
            return Ok(());
        }
        self.shutdown(&mut state);
        info!(site = "runtime", runtime = %self.name, "runtime stopped");
        Ok(())
    }

    fn shutdown(&self, state: &mut RunState) {
        for pump in self.pumps.values() {
            pump.close();
        }
        for placed in self.reactors.values() {
            if let Err(e) = placed.reactor.stop() {
                warn!(site = "runtime", reactor = %placed.reactor.name(), error = %e, "reactor did not stop cleanly");
            }
        }
        *state = RunState::Stopped;
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == RunState::Running
    }
}

fn activate(reactor: &Arc<dyn Reactive>, pump: &dyn Powerplant) -> Result<()> {
    if reactor.lifecycle() == Lifecycle::Unstarted {
        reactor.start()?;
    }
    pump.on_bind(Arc::clone(reactor))
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name)
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .field("pumps", &self.pumps.keys().collect::<Vec<_>>())
            .field("reactors", &self.reactors.keys().collect::<Vec<_>>())
            .field("state", &*self.state.lock())
            .finish()
    }
}
