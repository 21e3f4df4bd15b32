//! Processes: the root unit of isolation.
//!
//! A process owns its logical threads and every process-scoped container.
//! It completes exactly once, after its last active thread deregisters and
//! the process cleanup chain has released every container and run the main
//! thread's deferred completion.
//!
//! Only container notifications and cancellation reach a process from
//! outside the worker executing one of its threads; both go through the
//! per-process lock.

use crate::container::{self, Container, ContainerState, ManagedObject};
use crate::continuation::Continuation;
use crate::dispatch::Job;
use crate::escalation::{Escalation, EscalationProcedure};
use crate::executive::{ProfiledNode, ProfiledProcess};
use crate::office::OfficeShared;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strand_core::{LogicalThreadId, ProcessId, ResourceIndex, ResourceScope};
use tracing::{debug, error, info};

/// Callback fired once a process has completed
pub type CompletionCallback = Box<dyn FnOnce(ProcessCompletion) + Send>;

/// How a process ended
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Ran to completion
    Completed,
    /// Cancelled before its work finished
    Cancelled,
    /// An escalation reached the top-level handler
    Failed(Escalation),
    /// The top-level handler itself failed
    Aborted(Escalation),
}

impl ProcessOutcome {
    /// Whether the process completed normally
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Escalation that ended the process, if any
    #[must_use]
    pub fn escalation(&self) -> Option<&Escalation> {
        match self {
            Self::Failed(escalation) | Self::Aborted(escalation) => Some(escalation),
            Self::Completed | Self::Cancelled => None,
        }
    }
}

/// Delivered to the completion callback
pub struct ProcessCompletion {
    /// Completed process
    pub process_id: ProcessId,
    /// How it ended
    pub outcome: ProcessOutcome,
    /// Value stored by work with `NodeContext::set_result`
    pub result: Option<Box<dyn Any + Send>>,
}

impl ProcessCompletion {
    /// Borrow the result as a concrete type
    #[must_use]
    pub fn result<T: Any>(&self) -> Option<&T> {
        self.result.as_ref()?.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ProcessCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCompletion")
            .field("process_id", &self.process_id)
            .field("outcome", &self.outcome)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

/// State behind the per-process lock
pub(crate) struct ProcessInner {
    containers: Vec<Container>,
    thread_containers: IndexMap<LogicalThreadId, Vec<Container>>,
    active_threads: IndexSet<LogicalThreadId>,
    deferred_completion: Option<Continuation>,
    completing: bool,
    complete: bool,
    unhandled: Option<Escalation>,
    aborted: Option<Escalation>,
    result: Option<Box<dyn Any + Send>>,
    callback: Option<CompletionCallback>,
    profile: Option<Vec<ProfiledNode>>,
}

impl ProcessInner {
    pub(crate) fn container(&self, index: ResourceIndex, thread: LogicalThreadId) -> Option<&Container> {
        match index.scope {
            ResourceScope::Process => self.containers.get(index.index),
            ResourceScope::Thread => self.thread_containers.get(&thread)?.get(index.index),
        }
    }

    pub(crate) fn container_mut(&mut self, index: ResourceIndex, thread: LogicalThreadId) -> Option<&mut Container> {
        match index.scope {
            ResourceScope::Process => self.containers.get_mut(index.index),
            ResourceScope::Thread => self.thread_containers.get_mut(&thread)?.get_mut(index.index),
        }
    }

    fn all_waiters(&mut self) -> Vec<Job> {
        self.containers
            .iter_mut()
            .chain(self.thread_containers.values_mut().flatten())
            .flat_map(Container::take_all_waiters)
            .collect()
    }
}

/// One running process
pub(crate) struct ProcessState {
    pub(crate) id: ProcessId,
    pub(crate) office: Arc<OfficeShared>,
    pub(crate) main_thread: LogicalThreadId,
    pub(crate) procedure: EscalationProcedure,
    cancelled: AtomicBool,
    /// Serialises nodes tagged as requiring thread-state safety
    pub(crate) safety: Mutex<()>,
    pub(crate) inner: Mutex<ProcessInner>,
}

impl ProcessState {
    /// Create a process with its main thread registered
    pub(crate) fn new(
        office: Arc<OfficeShared>,
        id: ProcessId,
        main_thread: LogicalThreadId,
        procedure: EscalationProcedure,
        callback: Option<CompletionCallback>,
    ) -> Arc<Self> {
        let containers = new_containers(office.plan.process_resources.len());
        let mut thread_containers = IndexMap::new();
        thread_containers.insert(main_thread, new_containers(office.plan.thread_resources.len()));
        let mut active_threads = IndexSet::new();
        active_threads.insert(main_thread);
        let profile = office.profiling().then(Vec::new);

        Arc::new(Self {
            id,
            office,
            main_thread,
            procedure,
            cancelled: AtomicBool::new(false),
            safety: Mutex::new(()),
            inner: Mutex::new(ProcessInner {
                containers,
                thread_containers,
                active_threads,
                deferred_completion: None,
                completing: false,
                complete: false,
                unhandled: None,
                aborted: None,
                result: None,
                callback,
                profile,
            }),
        })
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Set the cancellation flag and wake every parked job
    ///
    /// Woken jobs observe the flag at their next resumption point.
    pub(crate) fn cancel(&self) {
        let woken = {
            let mut inner = self.inner.lock();
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            inner.all_waiters()
        };
        info!(process = %self.id, woken = woken.len(), "process cancelled");
        container::resubmit(&self.office, woken);
    }

    /// Abort after the top-level handler failed
    pub(crate) fn abort(&self, escalation: Escalation) {
        error!(process = %self.id, "top-level handler failed, aborting: {escalation}");
        self.inner.lock().aborted.get_or_insert(escalation);
        self.cancel();
    }

    pub(crate) fn record_unhandled(&self, escalation: &Escalation) {
        self.inner.lock().unhandled.get_or_insert_with(|| escalation.clone());
    }

    pub(crate) fn set_result(&self, result: Box<dyn Any + Send>) {
        self.inner.lock().result = Some(result);
    }

    pub(crate) fn record_node(&self, node: ProfiledNode) {
        if let Some(profile) = self.inner.lock().profile.as_mut() {
            profile.push(node);
        }
    }

    pub(crate) fn object(&self, index: ResourceIndex, thread: LogicalThreadId) -> Option<ManagedObject> {
        self.inner.lock().container(index, thread)?.object().cloned()
    }

    pub(crate) fn container_state(&self, index: ResourceIndex, thread: LogicalThreadId) -> Option<ContainerState> {
        self.inner.lock().container(index, thread).map(Container::state)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.inner.lock().complete
    }

    /// Register a spawned thread and its containers
    pub(crate) fn register_thread(&self, thread: LogicalThreadId) -> Result<(), Escalation> {
        let mut inner = self.inner.lock();
        if inner.completing {
            return Err(Escalation::runtime("cannot spawn a thread on a completing process"));
        }
        inner.active_threads.insert(thread);
        inner
            .thread_containers
            .insert(thread, new_containers(self.office.plan.thread_resources.len()));
        Ok(())
    }

    /// Remove a torn-down thread from the active set
    ///
    /// A main thread hands over its trailing completion chain, which is held
    /// until the process cleanup. Returns the process cleanup chain when the
    /// last active thread leaves.
    pub(crate) fn deregister(
        &self,
        thread: LogicalThreadId,
        deferred: Option<Continuation>,
    ) -> Option<Continuation> {
        let deferred = {
            let mut inner = self.inner.lock();
            inner.active_threads.shift_remove(&thread);
            inner.thread_containers.shift_remove(&thread);
            if let Some(chain) = deferred {
                inner.deferred_completion = Some(chain);
            }
            if !inner.active_threads.is_empty() || inner.completing {
                debug!(process = %self.id, thread = %thread, remaining = inner.active_threads.len(), "thread deregistered");
                return None;
            }
            inner.completing = true;
            inner.deferred_completion.take().unwrap_or_default()
        };

        debug!(process = %self.id, thread = %thread, "last thread deregistered, releasing process resources");
        let chain = self
            .office
            .release_chain(&self.office.plan.process_release_order)
            .then(deferred)
            .then(Continuation::cleanup("process complete", |ctx| {
                ctx.process().complete();
                Ok(None)
            }));
        Some(if thread == self.main_thread { chain } else { chain.thread_safe() })
    }

    /// Final step of the process cleanup chain
    pub(crate) fn complete(&self) {
        let (outcome, result, callback, profile) = {
            let mut inner = self.inner.lock();
            if inner.complete {
                return;
            }
            inner.complete = true;
            let outcome = if let Some(escalation) = inner.aborted.take() {
                ProcessOutcome::Aborted(escalation)
            } else if let Some(escalation) = inner.unhandled.take() {
                ProcessOutcome::Failed(escalation)
            } else if self.is_cancelled() {
                ProcessOutcome::Cancelled
            } else {
                ProcessOutcome::Completed
            };
            (outcome, inner.result.take(), inner.callback.take(), inner.profile.take())
        };

        if let Some(executor) = &self.office.thread_local_executor {
            executor.process_complete(self.id);
        }
        if let (Some(profiler), Some(nodes)) = (&self.office.profiler, profile) {
            profiler.profiled(ProfiledProcess {
                process_id: self.id,
                nodes,
            });
        }

        info!(process = %self.id, outcome = ?outcome, "process complete");
        if let Some(callback) = callback {
            let completion = ProcessCompletion {
                process_id: self.id,
                outcome,
                result,
            };
            if panic::catch_unwind(AssertUnwindSafe(|| callback(completion))).is_err() {
                error!(process = %self.id, "completion callback panicked");
            }
        }
        self.office.executive.retire_process_identifier(self.id);
    }
}

fn new_containers(len: usize) -> Vec<Container> {
    (0..len).map(|_| Container::new()).collect()
}

/// Handle to an invoked process
#[derive(Clone)]
pub struct ProcessHandle {
    process: Arc<ProcessState>,
}

impl ProcessHandle {
    pub(crate) fn new(process: Arc<ProcessState>) -> Self {
        Self { process }
    }

    /// Process identifier
    #[must_use]
    pub fn id(&self) -> ProcessId {
        self.process.id
    }

    /// Request cooperative cancellation; callable from any thread
    ///
    /// In-flight nodes run to completion. Cleanup still runs and the
    /// completion callback still fires once.
    pub fn cancel(&self) {
        self.process.cancel();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.process.is_cancelled()
    }

    /// Whether the process has completed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.process.is_complete()
    }

    /// State of a process-scoped container
    ///
    /// Thread-scoped resources live per logical thread and are not visible
    /// through the handle; they and unknown names yield `None`.
    #[must_use]
    pub fn container_state(&self, resource: &str) -> Option<ContainerState> {
        let index = self
            .process
            .office
            .resource_index(resource)
            .filter(|index| index.scope == ResourceScope::Process)?;
        self.process.container_state(index, self.process.main_thread)
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("id", &self.process.id).finish()
    }
}
