//! # Worker Pool Module
//!
//! Pools of `may` coroutines that execute function jobs for the in-process
//! engine. One pool serves sync calls, another the async queue.
//!
//! ## Features
//!
//! - **Worker Pools**: N worker coroutines share one MPSC receiver and load
//!   balance automatically
//! - **Bounded Admission**: a job is only accepted while fewer than
//!   `num_workers + queue_bound` jobs are in flight; beyond that it is shed
//! - **Panic Recovery**: a panicking function fails its own call, the worker
//!   keeps running
//! - **Metrics**: queue depth, dispatched, completed and shed counters
//!
//! ## Configuration
//!
//! - `FNR_SYNC_WORKERS` / `FNR_ASYNC_WORKERS`: worker coroutines per pool
//! - `FNR_SYNC_QUEUE_BOUND` / `FNR_ASYNC_QUEUE_BOUND`: jobs waiting beyond the busy workers
//! - `FNR_STACK_SIZE`: coroutine stack size

use super::function::{FunctionFn, Invocation};
use crate::capture::ResponseCapture;
use may::sync::mpsc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker coroutines
    pub num_workers: usize,
    /// Jobs allowed to wait while every worker is busy
    pub queue_bound: usize,
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Create a custom configuration
    #[must_use]
    pub fn new(num_workers: usize, queue_bound: usize, stack_size: usize) -> Self {
        Self {
            num_workers,
            queue_bound,
            stack_size,
        }
    }

    /// Maximum jobs in flight (running plus waiting)
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.num_workers + self.queue_bound
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_bound: 1024,
            stack_size: 0x10000, // 64KB
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Number of jobs rejected because the pool was full
    pub shed_count: AtomicU64,
    /// Jobs accepted and not yet completed
    pub queue_depth: AtomicUsize,
    /// Total jobs accepted
    pub dispatched_count: AtomicU64,
    /// Total jobs finished (successfully or not)
    pub completed_count: AtomicU64,
}

impl WorkerPoolMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one job if the pool has room
    fn try_admit(&self, capacity: usize) -> bool {
        let admitted = self
            .queue_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < capacity).then_some(depth + 1)
            })
            .is_ok();
        if admitted {
            self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shed_count.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Undo an admission whose send failed
    fn cancel_admission(&self) {
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
        self.dispatched_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a completion event
    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
    }

    /// Get current shed count
    #[must_use]
    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    /// Get current queue depth
    #[must_use]
    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    /// Get total dispatched count
    #[must_use]
    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    /// Get total completed count
    #[must_use]
    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }
}

/// Result of running one job, sent back to a waiting submitter
#[derive(Debug)]
pub struct JobOutcome {
    /// The capture the function wrote into
    pub output: ResponseCapture,
    /// `Err` carries the function's error or panic message
    pub result: Result<(), String>,
}

/// One function execution
pub struct Job {
    pub invocation: Invocation,
    pub function: FunctionFn,
    pub output: ResponseCapture,
    /// Present for sync calls; async jobs have nobody waiting
    pub reply: Option<std::sync::mpsc::Sender<JobOutcome>>,
}

/// Why a pool refused a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Capacity exhausted
    Full,
    /// Every worker has exited
    Closed,
}

/// A pool of worker coroutines with bounded admission
pub struct WorkerPool {
    /// Configuration for the pool
    config: WorkerPoolConfig,
    /// Sender for dispatching jobs to workers
    sender: mpsc::Sender<Job>,
    /// Metrics for monitoring
    metrics: Arc<WorkerPoolMetrics>,
    /// Pool name for logging
    name: String,
}

impl WorkerPool {
    /// Create a new worker pool and spawn its coroutines
    #[must_use]
    pub fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let metrics = Arc::new(WorkerPoolMetrics::new());

        // All workers share the receiver
        let rx = Arc::new(rx);

        info!(
            pool = %name,
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        for worker_id in 0..config.num_workers {
            let rx = Arc::clone(&rx);
            let pool_name = name.clone();
            let metrics = Arc::clone(&metrics);

            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
            // The closure owns everything it touches (Arc'd receiver and metrics, an owned
            // name) and never relies on thread-local state, so it is sound to run it on
            // any may worker thread.
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .stack_size(config.stack_size)
                    .spawn(move || {
                        debug!(pool = %pool_name, worker_id, "Worker coroutine started");
                        while let Ok(job) = rx.recv() {
                            run_job(&pool_name, worker_id, job);
                            metrics.record_completion();
                        }
                        debug!(pool = %pool_name, worker_id, "Worker coroutine exiting");
                    })
            };

            if let Err(e) = spawn_result {
                error!(
                    pool = %name,
                    worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                );
            }
        }

        Self {
            config,
            sender: tx,
            metrics,
            name,
        }
    }

    /// Hand a job to the pool without waiting for it to run
    pub fn dispatch(&self, job: Job) -> Result<(), Rejected> {
        let call_id = job.invocation.call_id;

        if !self.metrics.try_admit(self.config.capacity()) {
            warn!(
                pool = %self.name,
                call_id = %call_id,
                queue_depth = self.metrics.get_queue_depth(),
                "Worker pool full - shedding job"
            );
            return Err(Rejected::Full);
        }

        if let Err(e) = self.sender.send(job) {
            self.metrics.cancel_admission();
            error!(
                pool = %self.name,
                call_id = %call_id,
                error = %e,
                "Worker pool channel disconnected"
            );
            return Err(Rejected::Closed);
        }

        Ok(())
    }

    /// Get metrics for this worker pool
    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }
}

fn run_job(pool: &str, worker_id: usize, job: Job) {
    let Job {
        invocation,
        function,
        mut output,
        reply,
    } = job;
    let call_id = invocation.call_id;

    debug!(pool = %pool, worker_id, call_id = %call_id, path = %invocation.path, "Worker running function");

    let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        function(&invocation, &mut output)
    })) {
        Ok(result) => result,
        Err(panic) => {
            let panic_message = panic_message(&*panic);
            error!(
                pool = %pool,
                worker_id,
                call_id = %call_id,
                panic_message = %panic_message,
                "Function panicked"
            );
            Err(format!("function panicked: {panic_message}"))
        }
    };

    match reply {
        Some(reply) => {
            if reply.send(JobOutcome { output, result }).is_err() {
                // Submitter gave up (timeout); the output is dropped here
                debug!(pool = %pool, call_id = %call_id, "Discarding output of abandoned call");
            }
        }
        None => match result {
            Ok(()) => info!(
                pool = %pool,
                call_id = %call_id,
                output_bytes = output.len(),
                "Async call complete"
            ),
            Err(e) => warn!(pool = %pool, call_id = %call_id, error = %e, "Async call failed"),
        },
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{panic:?}")
    }
}
