//! Turbine Script - RON topology loader and assembler
//!
//! Describes a runtime in RON files:
//! - Pool definitions (dynamic, fixed and composite)
//! - Pump definitions with thread counts and strategies
//! - Reactor definitions naming a registered logic, a pump and subscriptions
//! - Connections between reactor outputs and inputs
//!
//! [`Loader`] collects definitions into a [`Topology`]; [`Assembler`] turns
//! that into a [`turbine_pump::Runtime`].

mod assembler;
mod error;
mod loader;
mod schema;

pub use assembler::{Assembler, LogicContext, LogicRegistry, ReactionLogic};
pub use error::{Error, Result};
pub use loader::{Loader, Topology};
pub use schema::{ConnectionDef, PoolDef, PoolKind, PumpDef, ReactorDef};
