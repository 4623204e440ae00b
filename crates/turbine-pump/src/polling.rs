//! PollingPowerplant - Dedicated threads crank every reactor per wake-up
//!
//! Execution flow per worker:
//! 1. Wait on the pump's semaphore, at most `poll_timeout`
//! 2. Crank every bound reactor once, in binding order
//! 3. If any reactor did work, release a permit so the next pass starts
//!    without waiting
//!
//! Mailbox pushes release a permit through the reactor's waker. A reactor
//! being cranked by another worker reports `Busy` and is skipped.

use crate::config::PumpConfig;
use crate::error::{Error, Result};
use crate::powerplant::Powerplant;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};
use turbine_core::{FailureSink, Reactive, Token, Wake};

/// Counting semaphore with a permit ceiling
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    ceiling: usize,
    available: Condvar,
}

impl Semaphore {
    pub fn new(ceiling: usize) -> Self {
        Self {
            permits: Mutex::new(0),
            ceiling: ceiling.max(1),
            available: Condvar::new(),
        }
    }

    /// Add a permit unless the ceiling is reached
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        if *permits < self.ceiling {
            *permits += 1;
            self.available.notify_one();
        }
    }

    /// Take a permit, waiting at most `timeout`; `false` on timeout
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            let _ = self.available.wait_for(&mut permits, timeout);
        }
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }

    fn wake_all(&self) {
        self.available.notify_all();
    }
}

impl Wake for Semaphore {
    fn wake(&self) {
        self.release();
    }
}

type ReactorList = Arc<[Arc<dyn Reactive>]>;

struct Shared {
    name: Token,
    config: PumpConfig,
    reactors: RwLock<ReactorList>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
    sink: Arc<dyn FailureSink>,
}

impl Shared {
    fn snapshot(&self) -> ReactorList {
        Arc::clone(&self.reactors.read())
    }

    // Crank each reactor once; true if any of them did work
    fn pass(&self) -> bool {
        let mut progressed = false;
        for reactor in self.snapshot().iter() {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            let outcome = reactor.crank();
            outcome.report(reactor.name(), self.sink.as_ref());
            progressed |= outcome.did_work();
        }
        progressed
    }
}

/// Powerplant with a fixed set of polling threads
pub struct PollingPowerplant {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PollingPowerplant {
    /// Create the pump and spawn its workers
    pub fn start(
        name: impl Into<Token>,
        config: PumpConfig,
        sink: Arc<dyn FailureSink>,
    ) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            config,
            reactors: RwLock::new(Arc::from(Vec::new())),
            semaphore: Arc::new(Semaphore::new(config.thread_count())),
            closed: AtomicBool::new(false),
            sink,
        });
        let pump = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.thread_count())),
        };

        for i in 0..config.thread_count() {
            let shared = Arc::clone(&pump.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-poll-{}", name, i))
                .spawn(move || poll_loop(shared));
            match spawned {
                Ok(handle) => pump.workers.lock().push(handle),
                Err(e) => {
                    pump.close();
                    return Err(Error::Spawn(e));
                }
            }
        }

        info!(site = "pump", pump = %name, threads = config.thread_count(), strategy = "polling", "powerplant started");
        Ok(pump)
    }

    pub fn config(&self) -> &PumpConfig {
        &self.shared.config
    }
}

fn poll_loop(shared: Arc<Shared>) {
    debug!(site = "pump", pump = %shared.name, "polling worker started");
    while !shared.closed.load(Ordering::Acquire) {
        shared.semaphore.acquire_timeout(shared.config.poll_timeout());
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        if shared.pass() {
            shared.semaphore.release();
        }
    }
    debug!(site = "pump", pump = %shared.name, "polling worker stopped");
}

impl Powerplant for PollingPowerplant {
    fn name(&self) -> &Token {
        &self.shared.name
    }

    fn on_bind(&self, reactor: Arc<dyn Reactive>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Shutdown(self.shared.name.clone()));
        }
        {
            let mut reactors = self.shared.reactors.write();
            if reactors.iter().any(|r| r.name() == reactor.name()) {
                return Err(Error::AlreadyBound {
                    reactor: reactor.name().clone(),
                    pump: self.shared.name.clone(),
                });
            }
            let mut next = reactors.to_vec();
            next.push(Arc::clone(&reactor));
            *reactors = Arc::from(next);
        }
        reactor.attach_waker(self.shared.semaphore.clone());
        info!(site = "pump", pump = %self.shared.name, reactor = %reactor.name(), "reactor bound");
        self.shared.semaphore.release();
        Ok(())
    }

    fn on_signal(&self, _reactor: &Token) {
        self.shared.semaphore.release();
    }

    fn on_unbind(&self, reactor: &Token) -> Option<Arc<dyn Reactive>> {
        let removed = {
            let mut reactors = self.shared.reactors.write();
            let position = reactors.iter().position(|r| r.name() == reactor)?;
            let mut next = reactors.to_vec();
            let removed = next.remove(position);
            *reactors = Arc::from(next);
            removed
        };
        removed.detach_waker();
        info!(site = "pump", pump = %self.shared.name, reactor = %reactor, "reactor unbound");
        Some(removed)
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.semaphore.wake_all();

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(site = "pump", pump = %self.shared.name, "polling worker panicked");
            }
        }
        for reactor in self.shared.snapshot().iter() {
            reactor.detach_waker();
        }
        info!(site = "pump", pump = %self.shared.name, "powerplant closed");
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn bound(&self) -> Vec<Token> {
        self.shared
            .snapshot()
            .iter()
            .map(|r| r.name().clone())
            .collect()
    }
}

impl Drop for PollingPowerplant {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PollingPowerplant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingPowerplant")
            .field("name", &self.shared.name)
            .field("threads", &self.shared.config.thread_count())
            .field("reactors", &self.shared.snapshot().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use turbine_core::predicate::input_not_empty;
    use turbine_core::{
        CollectingFailureSink, EventDispatcher, LogFailureSink, OperandStack, QueueConfig,
        Reaction, ReactionFailure, Reactor,
    };

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    fn counter(dispatcher: &EventDispatcher, name: &str, event: &str) -> Arc<Reactor<usize>> {
        let reactor = Reactor::builder(name, 0usize)
            .input("in", QueueConfig::default())
            .subscribe("in", event)
            .reaction(
                Reaction::new("count")
                    .when(input_not_empty("in"))
                    .then(|ports, n: &mut usize| {
                        ports.input("in")?.pop();
                        *n += 1;
                        Ok(())
                    }),
            )
            .build(dispatcher)
            .unwrap();
        reactor.start().unwrap();
        Arc::new(reactor)
    }

    #[test]
    fn test_semaphore_ceiling_and_timeout() {
        let semaphore = Semaphore::new(2);
        for _ in 0..5 {
            semaphore.release();
        }
        assert_eq!(semaphore.available(), 2);
        assert!(semaphore.acquire_timeout(Duration::ZERO));
        assert!(semaphore.acquire_timeout(Duration::ZERO));
        assert!(!semaphore.acquire_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_drives_bound_reactors() {
        let dispatcher = EventDispatcher::new();
        let a = counter(&dispatcher, "a", "e");
        let b = counter(&dispatcher, "b", "e");
        let pump = PollingPowerplant::start(
            "poll",
            PumpConfig::with_thread_count(2),
            Arc::new(LogFailureSink),
        )
        .unwrap();
        pump.on_bind(a.clone()).unwrap();
        pump.on_bind(b.clone()).unwrap();
        assert_eq!(pump.bound(), vec![Token::new("a"), Token::new("b")]);

        let sender = dispatcher.lookup(&Token::new("pub"));
        for _ in 0..50 {
            sender.send(&Token::new("e"), &OperandStack::new());
        }
        assert!(wait_until(|| a.inspect(|n| *n) == 50 && b.inspect(|n| *n) == 50));
        pump.close();
        assert!(pump.is_closed());
    }

    #[test]
    fn test_failures_reach_sink_and_pump_survives() {
        let dispatcher = EventDispatcher::new();
        let failing = Reactor::builder("failing", ())
            .input("in", QueueConfig::default())
            .subscribe("in", "e")
            .reaction(
                Reaction::new("fail")
                    .when(input_not_empty("in"))
                    .then(|ports, _| {
                        ports.input("in")?.pop();
                        Err(ReactionFailure::msg("always fails"))
                    }),
            )
            .build(&dispatcher)
            .unwrap();
        failing.start().unwrap();
        let healthy = counter(&dispatcher, "healthy", "e");

        let sink = Arc::new(CollectingFailureSink::new());
        let pump = PollingPowerplant::start(
            "poll",
            PumpConfig::default().with_poll_timeout(Duration::from_millis(5)),
            sink.clone(),
        )
        .unwrap();
        pump.on_bind(Arc::new(failing)).unwrap();
        pump.on_bind(healthy.clone()).unwrap();

        let sender = dispatcher.lookup(&Token::new("pub"));
        for _ in 0..3 {
            sender.send(&Token::new("e"), &OperandStack::new());
        }
        assert!(wait_until(|| healthy.inspect(|n| *n) == 3 && sink.len() == 3));
        drop(pump);
        assert!(sink
            .take()
            .iter()
            .all(|r| r.reactor == Token::new("failing") && r.reaction == Some(Token::new("fail"))));
    }

    #[test]
    fn test_bind_twice_and_after_close() {
        let dispatcher = EventDispatcher::new();
        let a = counter(&dispatcher, "a", "e");
        let pump = PollingPowerplant::start("poll", PumpConfig::default(), Arc::new(LogFailureSink))
            .unwrap();
        pump.on_bind(a.clone()).unwrap();
        assert!(matches!(
            pump.on_bind(a.clone()),
            Err(Error::AlreadyBound { .. })
        ));
        assert!(pump.on_unbind(&Token::new("a")).is_some());
        assert!(pump.on_unbind(&Token::new("a")).is_none());
        pump.close();
        assert!(matches!(pump.on_bind(a), Err(Error::Shutdown(_))));
    }
}
