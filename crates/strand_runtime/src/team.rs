//! Teams: interchangeable pools that run jobs.
//!
//! `assign` only queues; a job never runs on the assigning call stack.
//! Jobs never block, so teams never wait on each other.

use crate::dispatch::Job;
use crate::error::TeamError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Named pool executing jobs
pub trait Team: Send + Sync {
    /// Team name
    fn name(&self) -> &str;

    /// Queue a job
    fn assign(&self, job: Job);

    /// Stop accepting work and release workers
    fn stop(&self) {}
}

struct WorkerQueue {
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
    stopping: AtomicBool,
}

/// Dedicated OS threads sharing one queue
pub struct WorkerTeam {
    name: String,
    queue: Arc<WorkerQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerTeam {
    /// Start a team with `workers` threads (at least one)
    ///
    /// # Errors
    ///
    /// Returns error if a worker thread cannot be spawned
    pub fn start(name: impl Into<String>, workers: usize) -> Result<Arc<Self>, TeamError> {
        let name = name.into();
        let queue = Arc::new(WorkerQueue {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopping: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let queue = Arc::clone(&queue);
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || work(&queue))
                .map_err(|source| TeamError::Spawn {
                    team: name.clone(),
                    index,
                    source,
                })?;
            handles.push(handle);
        }
        debug!(team = %name, workers = handles.len(), "worker team started");

        Ok(Arc::new(Self {
            name,
            queue,
            workers: Mutex::new(handles),
        }))
    }

    /// Jobs queued and not yet picked up
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.jobs.lock().len()
    }
}

fn work(queue: &WorkerQueue) {
    loop {
        let job = {
            let mut jobs = queue.jobs.lock();
            loop {
                if let Some(job) = jobs.pop_front() {
                    break job;
                }
                if queue.stopping.load(Ordering::Acquire) {
                    return;
                }
                queue.available.wait(&mut jobs);
            }
        };
        job.run();
    }
}

impl Team for WorkerTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn assign(&self, job: Job) {
        if self.queue.stopping.load(Ordering::Acquire) {
            warn!(team = %self.name, process = %job.process_id(), "team stopped, dropping job");
            return;
        }
        self.queue.jobs.lock().push_back(job);
        self.queue.available.notify_one();
    }

    /// Queued jobs are drained before the workers exit
    fn stop(&self) {
        {
            let _jobs = self.queue.jobs.lock();
            self.queue.stopping.store(true, Ordering::Release);
        }
        self.queue.available.notify_all();

        let current = std::thread::current().id();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(team = %self.name, "worker panicked");
            }
        }
        debug!(team = %self.name, "worker team stopped");
    }
}

impl Drop for WorkerTeam {
    fn drop(&mut self) {
        self.queue.stopping.store(true, Ordering::Release);
        self.queue.available.notify_all();
    }
}

/// Queue drained explicitly by its owner
///
/// Gives tests and embedders full control over interleaving.
pub struct ManualTeam {
    name: String,
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualTeam {
    /// Create an empty team
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            jobs: Mutex::new(VecDeque::new()),
        })
    }

    /// Run the oldest queued job; returns whether one ran
    pub fn run_one(&self) -> bool {
        let job = self.jobs.lock().pop_front();
        match job {
            Some(job) => {
                job.run();
                true
            }
            None => false,
        }
    }

    /// Run jobs until the queue is empty; returns how many ran
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Jobs queued
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }
}

impl Team for ManualTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn assign(&self, job: Job) {
        trace!(team = %self.name, process = %job.process_id(), "job queued");
        self.jobs.lock().push_back(job);
    }
}

/// Jobs spawned onto a tokio runtime
pub struct TokioTeam {
    name: String,
    handle: tokio::runtime::Handle,
}

impl TokioTeam {
    /// Team backed by a runtime handle
    #[must_use]
    pub fn new(name: impl Into<String>, handle: tokio::runtime::Handle) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            handle,
        })
    }

    /// Team backed by the current runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime
    #[must_use]
    pub fn current(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, tokio::runtime::Handle::current())
    }
}

impl Team for TokioTeam {
    fn name(&self) -> &str {
        &self.name
    }

    fn assign(&self, job: Job) {
        trace!(team = %self.name, process = %job.process_id(), "job spawned");
        self.handle.spawn(async move { job.run() });
    }
}
