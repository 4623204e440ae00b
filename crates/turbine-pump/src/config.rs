//! Pump configuration - worker threads and polling interval
//!
//! `thread_count` is clamped to `[1, max_cores()]` whether it is set through
//! the constructors or read from a config file.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// How a pump drives its reactors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpStrategy {
    /// Dedicated threads crank every reactor on each wake-up
    #[default]
    Polling,
    /// Each signal submits one self-resubmitting crank task to a thread pool
    Resubmit,
}

/// Configuration for a pump's worker threads
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use turbine_pump::PumpConfig;
///
/// let config = PumpConfig::with_thread_count(4).with_poll_timeout(Duration::from_millis(100));
/// assert_eq!(config.thread_count(), 4.min(turbine_pump::max_cores()));
/// assert_eq!(config.poll_timeout(), Duration::from_millis(100));
///
/// let config = PumpConfig::with_thread_count(0);
/// assert!(config.is_single_thread());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Number of worker threads, clamped to `[1, max_cores()]`
    #[serde(deserialize_with = "clamped_threads")]
    thread_count: usize,
    /// Longest a worker waits for a signal before polling anyway
    #[serde(default = "default_poll_timeout")]
    poll_timeout: Duration,
}

impl PumpConfig {
    /// Create a configuration with the given thread count
    pub fn with_thread_count(thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.clamp(1, max_cores()),
            ..Self::default()
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Set the number of worker threads
    ///
    /// The value is clamped to `[1, max_cores()]`.
    pub fn set_thread_count(&mut self, n: usize) {
        self.thread_count = n.clamp(1, max_cores());
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn is_single_thread(&self) -> bool {
        self.thread_count == 1
    }
}

impl Default for PumpConfig {
    /// One thread, polling at least once per second
    fn default() -> Self {
        Self {
            thread_count: 1,
            poll_timeout: default_poll_timeout(),
        }
    }
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

fn clamped_threads<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    Ok(usize::deserialize(deserializer)?.clamp(1, max_cores()))
}

/// Get the maximum available cores on this system
///
/// This uses the `num_cpus` crate to detect the number of logical CPUs.
pub fn max_cores() -> usize {
    num_cpus::get()
}
