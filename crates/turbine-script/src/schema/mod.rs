//! Schema definitions for RON topology files

pub mod pool;
pub mod pump;
pub mod reactor;

pub use pool::{PoolDef, PoolKind};
pub use pump::PumpDef;
pub use reactor::{ConnectionDef, ReactorDef};
