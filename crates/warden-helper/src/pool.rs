//! Pool handle: admission, statistics and shutdown.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::HelperPoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::worker::{self, WorkerContext};

/// Request waiting for, or being serviced by, a helper.
pub(crate) struct Job {
    pub(crate) line: String,
    pub(crate) reply: oneshot::Sender<PoolResult<String>>,
}

pub(crate) type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Counters shared between the pool handle and its workers.
#[derive(Default)]
pub(crate) struct PoolCounters {
    pub(crate) running_helpers: AtomicUsize,
    pub(crate) busy: AtomicUsize,
    pub(crate) requests_total: AtomicU64,
    pub(crate) replies_total: AtomicU64,
    pub(crate) failures_total: AtomicU64,
    pub(crate) restarts_total: AtomicU64,
}

/// Point-in-time view of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Worker slots.
    pub workers: usize,
    /// Helper processes currently alive.
    pub running_helpers: usize,
    /// Requests currently written to a helper and awaiting a reply.
    pub busy: usize,
    /// Requests waiting for a free helper.
    pub queued: usize,
    /// Requests admitted since start.
    pub requests_total: u64,
    /// Replies delivered since start.
    pub replies_total: u64,
    /// Requests that ended in a timeout, crash or spawn failure.
    pub failures_total: u64,
    /// Helpers replaced after exiting or timing out.
    pub restarts_total: u64,
}

/// Handle to a running helper pool.
pub struct HelperPool {
    config: Arc<HelperPoolConfig>,
    counters: Arc<PoolCounters>,
    jobs: mpsc::Sender<Job>,
    queue: JobQueue,
    shutdown: watch::Sender<bool>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

/// Reply that will be delivered by a helper.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<PoolResult<String>>,
}

impl PendingReply {
    /// Wait for the helper's reply line.
    ///
    /// # Errors
    ///
    /// Returns the helper failure, or [`PoolError::ShutDown`] when the pool
    /// stopped before the request was serviced.
    pub async fn wait(self) -> PoolResult<String> {
        self.rx.await.unwrap_or(Err(PoolError::ShutDown))
    }
}

impl HelperPool {
    /// Start the worker slots. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotConfigured`] when no program or no worker slots are configured.
    pub fn start(config: HelperPoolConfig) -> PoolResult<Self> {
        if config.program.is_empty() || config.max == 0 {
            return Err(PoolError::NotConfigured);
        }
        let config = Arc::new(config);
        let counters = Arc::new(PoolCounters::default());
        let (jobs, rx) = mpsc::channel(config.queue_limit.max(1));
        let queue: JobQueue = Arc::new(Mutex::new(rx));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let workers = (0..config.max)
            .map(|index| {
                tokio::spawn(worker::run(WorkerContext {
                    index,
                    config: Arc::clone(&config),
                    counters: Arc::clone(&counters),
                    queue: Arc::clone(&queue),
                    shutdown: shutdown_rx.clone(),
                    spawn_at_start: index < config.startup,
                    keep_warm: index < config.idle,
                }))
            })
            .collect();

        info!(
            pool = %config.name,
            workers = config.max,
            startup = config.startup,
            concurrency = config.concurrency,
            queue_limit = config.queue_limit,
            "helper pool started"
        );

        Ok(Self {
            config,
            counters,
            jobs,
            queue,
            shutdown,
            workers: StdMutex::new(workers),
        })
    }

    /// Hand a request line to the pool without waiting for a helper.
    ///
    /// A single trailing newline is accepted and stripped; the pool terminates
    /// every line itself.
    ///
    /// # Errors
    ///
    /// Fails fast with [`PoolError::Overloaded`] when the queue is full,
    /// [`PoolError::ShutDown`] after shutdown, or [`PoolError::InvalidRequest`]
    /// when the line embeds a line break.
    pub fn submit(&self, line: impl Into<String>) -> PoolResult<PendingReply> {
        if *self.shutdown.borrow() {
            return Err(PoolError::ShutDown);
        }
        let mut line = line.into();
        if line.ends_with('\n') {
            line.pop();
        }
        if line.contains(['\n', '\r']) {
            return Err(PoolError::InvalidRequest);
        }

        let (reply, rx) = oneshot::channel();
        match self.jobs.try_send(Job { line, reply }) {
            Ok(()) => {
                self.counters.requests_total.fetch_add(1, Ordering::Relaxed);
                Ok(PendingReply { rx })
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    pool = %self.config.name,
                    queue_limit = self.config.queue_limit,
                    "helper queue overloaded; rejecting request"
                );
                Err(PoolError::Overloaded {
                    queue_limit: self.config.queue_limit,
                })
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::ShutDown),
        }
    }

    /// Current activity counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.config.max,
            running_helpers: self.counters.running_helpers.load(Ordering::Relaxed),
            busy: self.counters.busy.load(Ordering::Relaxed),
            queued: self.jobs.max_capacity() - self.jobs.capacity(),
            requests_total: self.counters.requests_total.load(Ordering::Relaxed),
            replies_total: self.counters.replies_total.load(Ordering::Relaxed),
            failures_total: self.counters.failures_total.load(Ordering::Relaxed),
            restarts_total: self.counters.restarts_total.load(Ordering::Relaxed),
        }
    }

    /// Pool settings.
    #[must_use]
    pub fn config(&self) -> &HelperPoolConfig {
        &self.config
    }

    /// Whether [`HelperPool::shutdown`] has been requested.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop every worker, kill helpers and fail outstanding requests with
    /// [`PoolError::ShutDown`]. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(pool = %self.config.name, error = %err, "helper worker join failed");
            }
        }

        let mut queue = self.queue.lock().await;
        queue.close();
        let mut abandoned = 0_usize;
        while let Ok(job) = queue.try_recv() {
            let _ = job.reply.send(Err(PoolError::ShutDown));
            abandoned += 1;
        }
        info!(pool = %self.config.name, abandoned, "helper pool shut down");
    }
}
