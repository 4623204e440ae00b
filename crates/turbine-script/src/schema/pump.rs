//! Pump definition schema

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use turbine_core::Token;
use turbine_pump::{PumpConfig, PumpStrategy};

/// Definition of a pump and its worker threads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpDef {
    /// Unique identifier for this pump
    pub name: Token,
    /// Worker threads; clamped to the available cores when built
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    #[serde(default)]
    pub strategy: PumpStrategy,
    /// Idle wake-up interval in milliseconds
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,
}

fn default_thread_count() -> usize {
    1
}

impl PumpDef {
    pub fn new(name: impl Into<Token>, thread_count: usize, strategy: PumpStrategy) -> Self {
        Self {
            name: name.into(),
            thread_count,
            strategy,
            poll_timeout_ms: None,
        }
    }

    /// Worker configuration for this pump
    pub fn config(&self) -> Result<PumpConfig> {
        if self.thread_count == 0 {
            return Err(Error::InvalidSchema(format!(
                "pump {}: thread_count must be at least 1",
                self.name
            )));
        }
        let config = PumpConfig::with_thread_count(self.thread_count);
        Ok(match self.poll_timeout_ms {
            Some(ms) => config.with_poll_timeout(Duration::from_millis(ms)),
            None => config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_def_ron() {
        let def: PumpDef = ron::from_str(r#"(name: "io", strategy: resubmit, poll_timeout_ms: Some(50))"#).unwrap();
        assert_eq!(def.name, Token::new("io"));
        assert_eq!(def.thread_count, 1);
        assert_eq!(def.strategy, PumpStrategy::Resubmit);

        let config = def.config().unwrap();
        assert!(config.is_single_thread());
        assert_eq!(config.poll_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let def = PumpDef::new("none", 0, PumpStrategy::Polling);
        assert!(matches!(def.config(), Err(Error::InvalidSchema(_))));
    }
}
