//! Powerplant trait - The abstraction layer between the runtime and its threads
//!
//! The runtime only hands reactors to a powerplant and tells it when to stop.
//! How cranks are scheduled is up to the implementation:
//! - [`PollingPowerplant`](crate::PollingPowerplant): dedicated threads crank
//!   every bound reactor on each wake-up
//! - [`ResubmitPowerplant`](crate::ResubmitPowerplant): one self-resubmitting
//!   executor task per signalled reactor
//!
//! Every implementation guarantees that a reactor is never cranked by two
//! threads at once, that a signalled reactor is eventually cranked, and that
//! `close` stops new cranks without interrupting one in flight.

use crate::error::Result;
use std::sync::Arc;
use turbine_core::{Reactive, Token};

/// Execution strategy driving cranks across a set of reactors
pub trait Powerplant: Send + Sync {
    fn name(&self) -> &Token;

    /// Take over scheduling of `reactor`
    ///
    /// The powerplant attaches itself as the reactor's waker, so pushes into
    /// the reactor's mailboxes signal it.
    fn on_bind(&self, reactor: Arc<dyn Reactive>) -> Result<()>;

    /// The named reactor has new input
    fn on_signal(&self, reactor: &Token);

    /// Stop scheduling `reactor` and return it
    fn on_unbind(&self, reactor: &Token) -> Option<Arc<dyn Reactive>>;

    /// Stop scheduling new cranks; a crank already running completes
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Names of the bound reactors, in binding order
    fn bound(&self) -> Vec<Token>;
}
