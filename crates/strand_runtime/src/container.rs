//! Resource containers.
//!
//! A container owns one managed object for the lifetime of its scope and
//! moves strictly Unloaded → Loading → Ready → Unloading → Unloaded. Jobs
//! that need an object that is not ready park on the container and are
//! re-submitted to the team they parked from once it is. Notifications may
//! arrive from any thread; all container state sits under the process lock.

use crate::continuation::{Continuation, NodeResult, NodeRole};
use crate::dispatch::Job;
use crate::escalation::Escalation;
use crate::office::OfficeShared;
use crate::process::ProcessState;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use strand_core::{LogicalThreadId, ResourceIndex};
use tracing::{debug, trace, warn};

/// A loaded resource instance
pub type ManagedObject = Arc<dyn Any + Send + Sync>;

/// Result of starting a load
pub enum LoadOutcome {
    /// Constructed synchronously
    Ready(ManagedObject),
    /// Construction continues elsewhere; completion is signalled through
    /// the [`LoadNotifier`]
    Pending,
}

/// Resource implementation behind a container
pub trait ManagedObjectSource: Send + Sync {
    /// Start constructing the object
    ///
    /// # Errors
    ///
    /// Returns error if construction fails synchronously
    fn start_load(&self, ctx: &LoadContext) -> Result<LoadOutcome, Escalation>;

    /// Release the object, if it was ever loaded
    ///
    /// Called once per container during scope teardown, with `None` when
    /// the container never finished loading. The returned chain runs as part
    /// of the teardown. An object that arrives after its container was
    /// released is handed back through one further call; a chain returned
    /// from that call is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the release fails; teardown of other containers
    /// still runs
    fn release(&self, _object: Option<ManagedObject>) -> Result<Option<Continuation>, Escalation> {
        Ok(None)
    }
}

/// Observable container state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Not constructed
    Unloaded,
    /// Construction in progress
    Loading,
    /// Object available
    Ready,
    /// Release in progress
    Unloading,
}

pub(crate) struct Container {
    state: ContainerState,
    object: Option<ManagedObject>,
    failure: Option<Escalation>,
    waiters: Vec<Job>,
    async_waiters: Vec<Job>,
    async_in_flight: usize,
    released: bool,
}

impl Container {
    pub(crate) fn new() -> Self {
        Self {
            state: ContainerState::Unloaded,
            object: None,
            failure: None,
            waiters: Vec::new(),
            async_waiters: Vec::new(),
            async_in_flight: 0,
            released: false,
        }
    }

    pub(crate) fn state(&self) -> ContainerState {
        self.state
    }

    /// Object, only once ready
    pub(crate) fn object(&self) -> Option<&ManagedObject> {
        match self.state {
            ContainerState::Ready => self.object.as_ref(),
            _ => None,
        }
    }

    /// Remove every parked job
    pub(crate) fn take_all_waiters(&mut self) -> Vec<Job> {
        let mut jobs = std::mem::take(&mut self.waiters);
        jobs.append(&mut self.async_waiters);
        jobs
    }
}

/// Addresses one container from outside the process lock
#[derive(Clone)]
struct ContainerRef {
    process: Weak<ProcessState>,
    office: Arc<OfficeShared>,
    index: ResourceIndex,
    thread: LogicalThreadId,
}

impl ContainerRef {
    fn name(&self) -> &str {
        self.office.resource_name(self.index)
    }
}

/// Signals the end of an asynchronous load; callable from any thread
///
/// The first signal wins. An object delivered after the container stopped
/// waiting for it is released immediately.
#[derive(Clone)]
pub struct LoadNotifier {
    target: ContainerRef,
}

impl LoadNotifier {
    /// The object is ready
    pub fn loaded(&self, object: ManagedObject) {
        let target = &self.target;
        let Some(process) = target.process.upgrade() else {
            release_late(&target.office, target.index, object);
            return;
        };
        let installed = {
            let mut inner = process.inner.lock();
            match inner.container_mut(target.index, target.thread) {
                Some(container)
                    if container.state == ContainerState::Loading && container.failure.is_none() =>
                {
                    container.state = ContainerState::Ready;
                    container.object = Some(object);
                    let mut woken = std::mem::take(&mut container.waiters);
                    if container.async_in_flight == 0 {
                        woken.append(&mut container.async_waiters);
                    }
                    Ok(woken)
                }
                _ => Err(object),
            }
        };
        match installed {
            Ok(woken) => {
                debug!(process = %process.id, resource = target.name(), woken = woken.len(), "resource ready");
                resubmit(&target.office, woken);
            }
            Err(object) => release_late(&target.office, target.index, object),
        }
    }

    /// Construction failed; every waiter observes the failure
    pub fn failed(&self, escalation: Escalation) {
        let target = &self.target;
        let Some(process) = target.process.upgrade() else {
            return;
        };
        let name = target.name();
        let failure = Escalation::resource_load(name, format!("failed to load {name}: {}", escalation.message()))
            .with_source(escalation);
        let woken = {
            let mut inner = process.inner.lock();
            match inner.container_mut(target.index, target.thread) {
                Some(container) if container.state == ContainerState::Loading && container.failure.is_none() => {
                    container.state = ContainerState::Unloaded;
                    container.failure = Some(failure);
                    Some(container.take_all_waiters())
                }
                _ => None,
            }
        };
        match woken {
            Some(woken) => {
                warn!(process = %process.id, resource = name, "resource load failed");
                resubmit(&target.office, woken);
            }
            None => trace!(resource = name, "load failure ignored; container no longer loading"),
        }
    }
}

/// Tracks asynchronous work an object still has in flight after loading
///
/// Dependents wait until every begun operation has completed.
#[derive(Clone)]
pub struct AsyncOperations {
    target: ContainerRef,
}

impl AsyncOperations {
    /// An operation started
    pub fn begin(&self) {
        let Some(process) = self.target.process.upgrade() else {
            return;
        };
        let mut inner = process.inner.lock();
        if let Some(container) = inner.container_mut(self.target.index, self.target.thread) {
            container.async_in_flight += 1;
        }
    }

    /// An operation finished
    pub fn complete(&self) {
        let Some(process) = self.target.process.upgrade() else {
            return;
        };
        let woken = {
            let mut inner = process.inner.lock();
            match inner.container_mut(self.target.index, self.target.thread) {
                Some(container) => {
                    container.async_in_flight = container.async_in_flight.saturating_sub(1);
                    if container.async_in_flight == 0 && container.state == ContainerState::Ready {
                        std::mem::take(&mut container.async_waiters)
                    } else {
                        Vec::new()
                    }
                }
                None => Vec::new(),
            }
        };
        if !woken.is_empty() {
            trace!(resource = self.target.name(), woken = woken.len(), "async operations drained");
            resubmit(&self.target.office, woken);
        }
    }
}

/// What a source sees while loading
pub struct LoadContext {
    resource: String,
    dependencies: Vec<Option<ManagedObject>>,
    notifier: LoadNotifier,
    operations: AsyncOperations,
}

impl LoadContext {
    /// Name of the resource being loaded
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Loaded dependency, by position in the resource's declared dependencies
    #[must_use]
    pub fn dependency<T: Any + Send + Sync>(&self, position: usize) -> Option<Arc<T>> {
        let object = self.dependencies.get(position)?.as_ref()?;
        Arc::clone(object).downcast::<T>().ok()
    }

    /// Handle for signalling an asynchronous load
    #[must_use]
    pub fn notifier(&self) -> LoadNotifier {
        self.notifier.clone()
    }

    /// Handle for tracking operations still in flight after loading
    #[must_use]
    pub fn async_operations(&self) -> AsyncOperations {
        self.operations.clone()
    }
}

/// Acquisition outcome for a job
pub(crate) enum Acquire {
    /// Every container is ready; the job continues
    Ready(Job),
    /// The job is parked on a container
    Parked,
    /// A container cannot serve the job
    Failed(Job, Escalation),
    /// The process was cancelled before the job could park; its work is to
    /// be discarded
    Cancelled(Job),
}

/// Ensure every container of a load order is ready
///
/// Loads are started outside the process lock; each index is re-checked
/// after starting its load, so a notification racing the park is not lost.
/// Work is never parked on a cancelled process: the flag is read under the
/// same lock `cancel` takes to collect waiters.
pub(crate) fn ensure_ready(job: Job, order: &[ResourceIndex]) -> Acquire {
    let process = Arc::clone(&job.process);
    let office = &process.office;
    let thread = job.thread.id;
    let mut position = 0;

    while let Some(&index) = order.get(position) {
        let dependencies = {
            let mut inner = process.inner.lock();
            let Some(container) = inner.container_mut(index, thread) else {
                drop(inner);
                let escalation = Escalation::runtime(format!("{index} has no container on {thread}"));
                return Acquire::Failed(job, escalation);
            };
            if let Some(failure) = &container.failure {
                let failure = failure.clone();
                drop(inner);
                return Acquire::Failed(job, failure);
            }
            let parks = match container.state {
                ContainerState::Loading => true,
                ContainerState::Ready => container.async_in_flight > 0,
                ContainerState::Unloaded | ContainerState::Unloading => false,
            };
            if parks && process.is_cancelled() && job.head_role() == Some(NodeRole::Work) {
                drop(inner);
                trace!(resource = office.resource_name(index), "process cancelled, not parking");
                return Acquire::Cancelled(job);
            }
            match container.state {
                ContainerState::Ready if container.async_in_flight == 0 => {
                    position += 1;
                    continue;
                }
                ContainerState::Ready => {
                    trace!(resource = office.resource_name(index), "parking on async operations");
                    container.async_waiters.push(job);
                    return Acquire::Parked;
                }
                ContainerState::Loading => {
                    trace!(resource = office.resource_name(index), "parking on load");
                    container.waiters.push(job);
                    return Acquire::Parked;
                }
                ContainerState::Unloaded if !container.released => {
                    container.state = ContainerState::Loading;
                }
                ContainerState::Unloaded | ContainerState::Unloading => {
                    drop(inner);
                    let name = office.resource_name(index);
                    let escalation = Escalation::resource_load(name, format!("{name} is being released"));
                    return Acquire::Failed(job, escalation);
                }
            }
            office
                .plan
                .resource(index)
                .map(|resource| {
                    resource
                        .dependencies
                        .iter()
                        .map(|&dep| inner.container(dep, thread).and_then(|c| c.object().cloned()))
                        .collect()
                })
                .unwrap_or_default()
        };

        start_load(&process, index, thread, dependencies);
    }

    Acquire::Ready(job)
}

fn start_load(
    process: &Arc<ProcessState>,
    index: ResourceIndex,
    thread: LogicalThreadId,
    dependencies: Vec<Option<ManagedObject>>,
) {
    let target = ContainerRef {
        process: Arc::downgrade(process),
        office: Arc::clone(&process.office),
        index,
        thread,
    };
    let ctx = LoadContext {
        resource: target.name().to_string(),
        dependencies,
        notifier: LoadNotifier { target: target.clone() },
        operations: AsyncOperations { target },
    };
    let Some(source) = process.office.source(index) else {
        ctx.notifier.failed(Escalation::runtime("no source bound"));
        return;
    };

    debug!(process = %process.id, resource = ctx.resource(), "loading resource");
    match panic::catch_unwind(AssertUnwindSafe(|| source.start_load(&ctx))) {
        Ok(Ok(LoadOutcome::Ready(object))) => ctx.notifier.loaded(object),
        Ok(Ok(LoadOutcome::Pending)) => trace!(resource = ctx.resource(), "load pending"),
        Ok(Err(escalation)) => ctx.notifier.failed(escalation),
        Err(payload) => ctx.notifier.failed(Escalation::from_panic(payload)),
    }
}

/// Cleanup node releasing one container
pub(crate) fn release_node(office: &OfficeShared, index: ResourceIndex) -> Continuation {
    Continuation::cleanup(format!("release {}", office.resource_name(index)), move |ctx| {
        release(ctx.process(), index, ctx.thread_id())
    })
}

fn release(process: &Arc<ProcessState>, index: ResourceIndex, thread: LogicalThreadId) -> NodeResult {
    let office = &process.office;
    let name = office.resource_name(index);
    let (object, woken) = {
        let mut inner = process.inner.lock();
        let Some(container) = inner.container_mut(index, thread) else {
            return Ok(None);
        };
        if container.released {
            return Ok(None);
        }
        container.released = true;
        container.state = ContainerState::Unloading;
        (container.object.take(), container.take_all_waiters())
    };
    resubmit(office, woken);

    let Some(source) = office.source(index) else {
        set_state(process, index, thread, ContainerState::Unloaded);
        return Ok(None);
    };
    debug!(process = %process.id, resource = name, loaded = object.is_some(), "releasing resource");

    let failure = match panic::catch_unwind(AssertUnwindSafe(|| source.release(object))) {
        Ok(Ok(cleanup)) => {
            let unloaded = Continuation::cleanup(format!("unloaded {name}"), move |ctx| {
                set_state(ctx.process(), index, ctx.thread_id(), ContainerState::Unloaded);
                Ok(None)
            });
            return Ok(Some(cleanup.unwrap_or_default().then(unloaded)));
        }
        Ok(Err(escalation)) => escalation,
        Err(payload) => Escalation::from_panic(payload),
    };

    set_state(process, index, thread, ContainerState::Unloaded);
    warn!(process = %process.id, resource = name, "resource release failed: {failure}");
    Err(Escalation::resource_release(name, format!("failed to release {name}: {}", failure.message())).with_source(failure))
}

fn set_state(process: &ProcessState, index: ResourceIndex, thread: LogicalThreadId, state: ContainerState) {
    if let Some(container) = process.inner.lock().container_mut(index, thread) {
        container.state = state;
    }
}

/// Release an object nobody is waiting for any more
fn release_late(office: &OfficeShared, index: ResourceIndex, object: ManagedObject) {
    let name = office.resource_name(index);
    let Some(source) = office.source(index) else {
        return;
    };
    debug!(resource = name, "releasing late object");
    match panic::catch_unwind(AssertUnwindSafe(|| source.release(Some(object)))) {
        Ok(Ok(None)) => {}
        Ok(Ok(Some(_))) => warn!(resource = name, "late release produced a cleanup chain with no thread to run it"),
        Ok(Err(escalation)) => warn!(resource = name, "late release failed: {escalation}"),
        Err(_) => warn!(resource = name, "late release panicked"),
    }
}

/// Hand parked jobs back to the teams they parked from
pub(crate) fn resubmit(office: &OfficeShared, jobs: Vec<Job>) {
    for job in jobs {
        office.assign(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_starts_unloaded() {
        let container = Container::new();
        assert_eq!(container.state(), ContainerState::Unloaded);
        assert!(container.object().is_none());
    }

    #[test]
    fn test_object_hidden_until_ready() {
        let mut container = Container::new();
        container.object = Some(Arc::new(5_u32));
        container.state = ContainerState::Loading;
        assert!(container.object().is_none());
        container.state = ContainerState::Ready;
        let object = container.object().cloned().unwrap();
        assert_eq!(*object.downcast::<u32>().unwrap(), 5);
    }
}
