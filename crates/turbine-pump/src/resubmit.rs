//! ResubmitPowerplant - One self-resubmitting crank task per signalled reactor
//!
//! Each bound reactor has a `scheduled` flag. A signal that flips it from
//! false to true submits one task to the executor. The task cranks the
//! reactor and resubmits itself for as long as the crank does work; then it
//! clears the flag. At most one task per reactor is queued or running at any
//! time, so bursts of signals cannot pile up tasks.
//!
//! A `signalled` flag closes the gap between the last crank and clearing
//! `scheduled`: a signal that lands in that window is seen after the flag is
//! cleared and schedules a fresh task.
//!
//! A reactor that goes idle with messages still queued is parked. Its
//! preconditions may depend on things no mailbox push announces (a full
//! downstream mailbox, a rate limit), so parked reactors are re-signalled
//! every retry interval until they drain or stop matching.

use crate::config::PumpConfig;
use crate::error::{Error, Result};
use crate::executor::{Executor, ThreadPool};
use crate::powerplant::Powerplant;
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use turbine_core::{CrankOutcome, FailureSink, Reactive, Token, Wake};

struct Slot {
    reactor: Arc<dyn Reactive>,
    scheduled: AtomicBool,
    signalled: AtomicBool,
    parked: AtomicBool,
    unbound: AtomicBool,
}

struct Shared {
    name: Token,
    executor: Arc<dyn Executor>,
    slots: Mutex<IndexMap<Token, Arc<Slot>>>,
    closed: AtomicBool,
    sink: Arc<dyn FailureSink>,
    retry_gate: Mutex<()>,
    retry_wake: Condvar,
}

impl Shared {
    fn is_live(&self, slot: &Slot) -> bool {
        !self.closed.load(Ordering::Acquire) && !slot.unbound.load(Ordering::Acquire)
    }
}

fn signal(shared: &Arc<Shared>, slot: &Arc<Slot>) {
    slot.signalled.store(true, Ordering::Release);
    schedule(shared, slot);
}

fn schedule(shared: &Arc<Shared>, slot: &Arc<Slot>) {
    if !shared.is_live(slot) {
        return;
    }
    if slot
        .scheduled
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        submit(shared, slot);
    }
}

// Caller holds the scheduled flag
fn submit(shared: &Arc<Shared>, slot: &Arc<Slot>) {
    let task_shared = Arc::clone(shared);
    let task_slot = Arc::clone(slot);
    if let Err(e) = shared
        .executor
        .execute(Box::new(move || run(task_shared, task_slot)))
    {
        slot.scheduled.store(false, Ordering::Release);
        warn!(site = "pump", pump = %shared.name, reactor = %slot.reactor.name(), error = %e, "crank task rejected");
    }
}

fn run(shared: Arc<Shared>, slot: Arc<Slot>) {
    if !shared.is_live(&slot) {
        slot.scheduled.store(false, Ordering::Release);
        return;
    }

    slot.signalled.store(false, Ordering::Release);
    slot.parked.store(false, Ordering::Release);
    let outcome = slot.reactor.crank();
    outcome.report(slot.reactor.name(), shared.sink.as_ref());

    if outcome.did_work() || outcome == CrankOutcome::Busy {
        submit(&shared, &slot);
        return;
    }

    slot.scheduled.store(false, Ordering::Release);
    if slot.signalled.load(Ordering::Acquire) {
        schedule(&shared, &slot);
    } else if slot.reactor.has_pending() {
        slot.parked.store(true, Ordering::Release);
    }
}

// Re-signal every parked reactor; returns how many there were
fn retry_parked(shared: &Arc<Shared>) -> usize {
    let slots: Vec<Arc<Slot>> = shared.slots.lock().values().cloned().collect();
    let mut retried = 0;
    for slot in slots {
        if slot.parked.swap(false, Ordering::AcqRel) {
            signal(shared, &slot);
            retried += 1;
        }
    }
    retried
}

fn retry_loop(shared: Arc<Shared>, interval: Duration) {
    debug!(site = "pump", pump = %shared.name, "retry timer started");
    loop {
        {
            let mut gate = shared.retry_gate.lock();
            if shared.closed.load(Ordering::Acquire) {
                break;
            }
            let _ = shared.retry_wake.wait_for(&mut gate, interval);
        }
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        let retried = retry_parked(&shared);
        if retried > 0 {
            debug!(site = "pump", pump = %shared.name, retried, "parked reactors re-signalled");
        }
    }
    debug!(site = "pump", pump = %shared.name, "retry timer stopped");
}

/// Routes mailbox wake-ups for one reactor back to its slot
struct SlotWaker {
    shared: Weak<Shared>,
    slot: Weak<Slot>,
}

impl Wake for SlotWaker {
    fn wake(&self) {
        if let (Some(shared), Some(slot)) = (self.shared.upgrade(), self.slot.upgrade()) {
            signal(&shared, &slot);
        }
    }
}

/// Powerplant that schedules cranks on an executor
pub struct ResubmitPowerplant {
    shared: Arc<Shared>,
    /// Pool created by [`ResubmitPowerplant::with_thread_pool`], shut down on close
    owned_pool: Option<Arc<ThreadPool>>,
    retrier: Mutex<Option<JoinHandle<()>>>,
}

impl ResubmitPowerplant {
    /// Create a pump that submits crank tasks to `executor`
    pub fn new(
        name: impl Into<Token>,
        executor: Arc<dyn Executor>,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        let name = name.into();
        info!(site = "pump", pump = %name, strategy = "resubmit", "powerplant started");
        Self {
            shared: Arc::new(Shared {
                name,
                executor,
                slots: Mutex::new(IndexMap::new()),
                closed: AtomicBool::new(false),
                sink,
                retry_gate: Mutex::new(()),
                retry_wake: Condvar::new(),
            }),
            owned_pool: None,
            retrier: Mutex::new(None),
        }
    }

    /// Re-signal parked reactors every `interval` on a timer thread
    ///
    /// Without a timer, parked reactors only run again on a new signal or an
    /// explicit [`ResubmitPowerplant::retry_parked`]. A pump keeps the first
    /// timer it is given.
    pub fn with_retry_interval(self, interval: Duration) -> Result<Self> {
        {
            let mut retrier = self.retrier.lock();
            if retrier.is_none() {
                let shared = Arc::clone(&self.shared);
                let handle = thread::Builder::new()
                    .name(format!("{}-retry", self.shared.name))
                    .spawn(move || retry_loop(shared, interval))
                    .map_err(Error::Spawn)?;
                *retrier = Some(handle);
            }
        }
        Ok(self)
    }

    /// Create a pump backed by its own [`ThreadPool`]
    pub fn with_thread_pool(
        name: impl Into<Token>,
        config: &PumpConfig,
        sink: Arc<dyn FailureSink>,
    ) -> Result<Self> {
        let name = name.into();
        let pool = Arc::new(ThreadPool::new(name.child("executor"), config)?);
        let mut pump = Self::new(name, pool.clone(), sink);
        pump.owned_pool = Some(pool);
        pump.with_retry_interval(config.poll_timeout())
    }

    /// Re-signal every reactor that went idle with messages still queued
    pub fn retry_parked(&self) -> usize {
        retry_parked(&self.shared)
    }

    /// Check if `reactor` went idle with messages still queued
    pub fn is_parked(&self, reactor: &Token) -> bool {
        self.shared
            .slots
            .lock()
            .get(reactor)
            .is_some_and(|slot| slot.parked.load(Ordering::Acquire))
    }

    /// Check if a crank task is queued or running for `reactor`
    pub fn is_scheduled(&self, reactor: &Token) -> bool {
        self.shared
            .slots
            .lock()
            .get(reactor)
            .is_some_and(|slot| slot.scheduled.load(Ordering::Acquire))
    }
}

impl Powerplant for ResubmitPowerplant {
    fn name(&self) -> &Token {
        &self.shared.name
    }

    fn on_bind(&self, reactor: Arc<dyn Reactive>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Shutdown(self.shared.name.clone()));
        }
        let slot = {
            let mut slots = self.shared.slots.lock();
            if slots.contains_key(reactor.name()) {
                return Err(Error::AlreadyBound {
                    reactor: reactor.name().clone(),
                    pump: self.shared.name.clone(),
                });
            }
            let slot = Arc::new(Slot {
                reactor: Arc::clone(&reactor),
                scheduled: AtomicBool::new(false),
                signalled: AtomicBool::new(false),
                parked: AtomicBool::new(false),
                unbound: AtomicBool::new(false),
            });
            slots.insert(reactor.name().clone(), Arc::clone(&slot));
            slot
        };

        reactor.attach_waker(Arc::new(SlotWaker {
            shared: Arc::downgrade(&self.shared),
            slot: Arc::downgrade(&slot),
        }));
        info!(site = "pump", pump = %self.shared.name, reactor = %reactor.name(), "reactor bound");

        // Messages may have arrived before the waker was attached
        if reactor.has_pending() {
            signal(&self.shared, &slot);
        }
        Ok(())
    }

    fn on_signal(&self, reactor: &Token) {
        let slot = self.shared.slots.lock().get(reactor).cloned();
        match slot {
            Some(slot) => signal(&self.shared, &slot),
            None => debug!(site = "pump", pump = %self.shared.name, reactor = %reactor, "signal for unbound reactor"),
        }
    }

    fn on_unbind(&self, reactor: &Token) -> Option<Arc<dyn Reactive>> {
        let slot = self.shared.slots.lock().shift_remove(reactor)?;
        slot.unbound.store(true, Ordering::Release);
        slot.reactor.detach_waker();
        info!(site = "pump", pump = %self.shared.name, reactor = %reactor, "reactor unbound");
        Some(Arc::clone(&slot.reactor))
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in self.shared.slots.lock().values() {
            slot.reactor.detach_waker();
        }
        {
            let _gate = self.shared.retry_gate.lock();
            self.shared.retry_wake.notify_all();
        }
        if let Some(retrier) = self.retrier.lock().take() {
            if retrier.join().is_err() {
                warn!(site = "pump", pump = %self.shared.name, "retry timer panicked");
            }
        }
        if let Some(pool) = &self.owned_pool {
            pool.shutdown();
        }
        info!(site = "pump", pump = %self.shared.name, "powerplant closed");
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn bound(&self) -> Vec<Token> {
        self.shared.slots.lock().keys().cloned().collect()
    }
}

impl Drop for ResubmitPowerplant {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ResubmitPowerplant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResubmitPowerplant")
            .field("name", &self.shared.name)
            .field("reactors", &self.shared.slots.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
