//! Executors for crank tasks
//!
//! [`ThreadPool`] is a fixed set of named worker threads pulling boxed jobs
//! from a crossbeam channel. A panicking job is caught and logged; the worker
//! keeps running.

use crate::config::PumpConfig;
use crate::error::{Error, Result};
use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};
use turbine_core::Token;

/// A unit of work for an executor
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run jobs asynchronously
pub trait Executor: Send + Sync {
    /// Queue `job`; fails once the executor is shut down
    fn execute(&self, job: Job) -> Result<()>;
}

/// Fixed-size pool of worker threads
pub struct ThreadPool {
    name: Token,
    sender: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Spawn `config.thread_count()` workers
    pub fn new(name: impl Into<Token>, config: &PumpConfig) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Job>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let pool = Self {
            name: name.clone(),
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(Vec::with_capacity(config.thread_count())),
            shutdown: Arc::clone(&shutdown),
        };

        for i in 0..config.thread_count() {
            let receiver = receiver.clone();
            let shutdown = Arc::clone(&shutdown);
            let timeout = config.poll_timeout();
            let worker = name.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", name, i))
                .spawn(move || worker_loop(worker, receiver, shutdown, timeout));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(Error::Spawn(e));
                }
            }
        }

        info!(site = "executor", pool = %name, threads = config.thread_count(), "thread pool started");
        Ok(pool)
    }

    pub fn name(&self) -> &Token {
        &self.name
    }

    pub fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop accepting jobs, let queued jobs finish and join the workers
    ///
    /// Called from one of the pool's own workers, that worker is not joined.
    pub fn shutdown(&self) {
        if self.sender.write().take().is_none() {
            return;
        }
        self.shutdown.store(true, Ordering::Release);

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!(site = "executor", pool = %self.name, "worker thread panicked");
            }
        }
        info!(site = "executor", pool = %self.name, "thread pool stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) -> Result<()> {
        let sender = self.sender.read();
        let sender = sender
            .as_ref()
            .ok_or_else(|| Error::Shutdown(self.name.clone()))?;
        sender
            .send(job)
            .map_err(|_| Error::Shutdown(self.name.clone()))
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("threads", &self.workers.lock().len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(pool: Token, jobs: Receiver<Job>, shutdown: Arc<AtomicBool>, timeout: Duration) {
    debug!(site = "executor", pool = %pool, "worker started");
    loop {
        let job = match jobs.recv_timeout(timeout) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Acquire) && jobs.is_empty() {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(site = "executor", pool = %pool, "job panicked");
        }
    }
    debug!(site = "executor", pool = %pool, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config(threads: usize) -> PumpConfig {
        PumpConfig::with_thread_count(threads).with_poll_timeout(Duration::from_millis(10))
    }

    #[test]
    fn test_runs_all_jobs_before_shutdown_returns() {
        let pool = ThreadPool::new("jobs", &config(2)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let pool = ThreadPool::new("closed", &config(1)).unwrap();
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.execute(Box::new(|| {})),
            Err(Error::Shutdown(_))
        ));
        // Second shutdown is a no-op
        pool.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = ThreadPool::new("sturdy", &config(1)).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        pool.execute(Box::new(|| panic!("job failure"))).unwrap();
        let flag = Arc::clone(&ran);
        pool.execute(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        pool.shutdown();
        assert!(ran.load(Ordering::SeqCst));
    }
}
