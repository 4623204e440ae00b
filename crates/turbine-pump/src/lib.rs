//! Turbine Pump - Powerplants that drive reactors
//!
//! This crate supplies the threads. Reactors from `turbine-core` only know how
//! to crank once; a powerplant decides when and where that happens.
//!
//! ## Architecture
//!
//! ```text
//! Runtime (owns pools, pumps, reactors)
//!  │
//!  ├── Powerplant (trait) ← Runtime only interacts with this
//!  │    ├── PollingPowerplant   (N threads, shared semaphore)
//!  │    └── ResubmitPowerplant  (one task per signalled reactor)
//!  │
//!  └── EventDispatcher ← send / connect
//! ```
//!
//! ## Key Components
//!
//! - [`Runtime`]: Facade with `send`, `connect`, `start` and `stop`
//! - [`Powerplant`]: Trait for crank scheduling strategies
//! - [`PollingPowerplant`]: Threads that crank every bound reactor on wake-up
//! - [`ResubmitPowerplant`]: Executor tasks that resubmit while work remains
//! - [`ThreadPool`]: The default [`Executor`] for resubmission
//!
//! ## Design Principles
//!
//! 1. **Runtime never cranks reactors** - only pumps do, through `Reactive::crank`
//! 2. **turbine-core is standalone** - it does NOT know about turbine-pump
//! 3. **A reactor is cranked by at most one thread at a time** on every pump

mod config;
mod error;
mod executor;
mod polling;
mod powerplant;
mod resubmit;
mod runtime;

pub use config::{max_cores, PumpConfig, PumpStrategy};
pub use error::{Error, Result};
pub use executor::{Executor, Job, ThreadPool};
pub use polling::{PollingPowerplant, Semaphore};
pub use powerplant::Powerplant;
pub use resubmit::ResubmitPowerplant;
pub use runtime::Runtime;
