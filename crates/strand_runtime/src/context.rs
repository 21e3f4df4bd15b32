//! What a node sees while it executes.

use crate::continuation::{Bindings, Continuation};
use crate::dispatch::Job;
use crate::escalation::{Escalation, EscalationHandler, EscalationProcedure};
use crate::office::Office;
use crate::process::ProcessState;
use crate::thread::{SpawnOptions, ThreadState};
use crate::work::{Argument, WorkUnitHandler};
use std::any::Any;
use std::sync::Arc;
use strand_core::{GovernanceIndex, LogicalThreadId, ProcessId, ResourceIndex, TeamId};
use tracing::debug;

/// Execution context of one node
///
/// Borrows the running job's logical thread exclusively, so everything
/// reached through it is single-writer.
pub struct NodeContext<'a> {
    process: &'a Arc<ProcessState>,
    thread: &'a mut ThreadState,
    team: TeamId,
    bindings: &'a Bindings,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        process: &'a Arc<ProcessState>,
        thread: &'a mut ThreadState,
        team: TeamId,
        bindings: &'a Bindings,
    ) -> Self {
        Self {
            process,
            thread,
            team,
            bindings,
        }
    }

    pub(crate) fn process(&self) -> &Arc<ProcessState> {
        self.process
    }

    /// Owning process
    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process.id
    }

    /// Logical thread running the node
    #[must_use]
    pub fn thread_id(&self) -> LogicalThreadId {
        self.thread.id
    }

    /// Whether the node runs on the process's main thread
    #[must_use]
    pub fn is_main_thread(&self) -> bool {
        self.thread.main
    }

    /// Team running the node
    #[must_use]
    pub fn team(&self) -> TeamId {
        self.team
    }

    /// Handle to the office, e.g. for triggering further processes
    #[must_use]
    pub fn office(&self) -> Office {
        Office::from_shared(Arc::clone(&self.process.office))
    }

    /// Object bound at a slot of this node
    ///
    /// # Errors
    ///
    /// Returns error if the slot is unbound, not ready or of another type
    pub fn object<T: Any + Send + Sync>(&self, slot: usize) -> Result<Arc<T>, Escalation> {
        let index = *self
            .bindings
            .declared
            .get(slot)
            .ok_or_else(|| Escalation::runtime(format!("no resource bound at slot {slot}")))?;
        self.object_at(index)
    }

    /// Object of a named resource
    ///
    /// # Errors
    ///
    /// Returns error if the resource is unknown, not ready or of another type
    pub fn object_named<T: Any + Send + Sync>(&self, resource: &str) -> Result<Arc<T>, Escalation> {
        let index = self
            .process
            .office
            .resource_index(resource)
            .ok_or_else(|| Escalation::runtime(format!("unknown resource {resource}")))?;
        self.object_at(index)
    }

    fn object_at<T: Any + Send + Sync>(&self, index: ResourceIndex) -> Result<Arc<T>, Escalation> {
        let name = self.process.office.resource_name(index);
        let object = self
            .process
            .object(index, self.thread.id)
            .ok_or_else(|| Escalation::runtime(format!("resource {name} is not ready")).with_resource(name))?;
        object
            .downcast::<T>()
            .map_err(|_| Escalation::runtime(format!("resource {name} has another type")).with_resource(name))
    }

    /// Spawn a logical thread running `entry`
    ///
    /// The entry chain is always queued on its team, never run on the
    /// calling stack.
    ///
    /// # Errors
    ///
    /// Returns error if the chain is empty or the process is completing
    pub fn spawn_thread(&mut self, entry: Continuation, options: SpawnOptions) -> Result<LogicalThreadId, Escalation> {
        if entry.is_done() {
            return Err(Escalation::runtime("cannot spawn a thread with an empty chain"));
        }
        let id = LogicalThreadId::new();
        self.process.register_thread(id)?;

        let office = &self.process.office;
        let team = entry.head_team().unwrap_or(self.team);
        let thread = ThreadState::new(id, false, office.governance.len(), options.procedure, options.completion);
        debug!(process = %self.process.id, parent = %self.thread.id, thread = %id, team = %team, "spawning thread");
        office.assign(Job::new(Arc::clone(self.process), thread, entry, team));
        Ok(id)
    }

    /// Node for another work unit, to chain after this one
    ///
    /// # Errors
    ///
    /// Returns error if no such work unit is declared
    pub fn work_unit(&self, name: &str, argument: Argument) -> Result<Continuation, Escalation> {
        let unit = self
            .process
            .office
            .work_units
            .get(name)
            .ok_or_else(|| Escalation::runtime(format!("unknown work unit {name}")))?;
        Ok(unit.node(argument))
    }

    /// Escalation handler delegating to a work unit
    ///
    /// # Errors
    ///
    /// Returns error if no such work unit is declared
    pub fn work_unit_handler(&self, name: &str) -> Result<Arc<dyn EscalationHandler>, Escalation> {
        let unit = self
            .process
            .office
            .work_units
            .get(name)
            .ok_or_else(|| Escalation::runtime(format!("unknown work unit {name}")))?;
        Ok(Arc::new(WorkUnitHandler::new(Arc::clone(unit))))
    }

    /// Replace this thread's escalation procedure
    pub fn set_escalation_procedure(&mut self, procedure: EscalationProcedure) {
        self.thread.procedure = Some(procedure);
    }

    /// Drop this thread's escalation procedure
    pub fn clear_escalation_procedure(&mut self) {
        self.thread.procedure = None;
    }

    /// Index of a declared governance policy
    #[must_use]
    pub fn governance(&self, name: &str) -> Option<GovernanceIndex> {
        self.process
            .office
            .governance
            .iter()
            .position(|entry| entry.name == name)
            .map(GovernanceIndex)
    }

    /// Whether a policy is active on this thread
    #[must_use]
    pub fn is_governance_active(&self, index: GovernanceIndex) -> bool {
        self.thread.governance.is_active(index)
    }

    /// Activate a policy on this thread; a no-op when already active
    ///
    /// # Errors
    ///
    /// Returns error if the index is unknown or the policy fails to start
    pub fn activate_governance(&mut self, index: GovernanceIndex) -> Result<(), Escalation> {
        if self.thread.governance.is_active(index) {
            return Ok(());
        }
        let policy = self.policy(index)?;
        policy.activate(self)?;
        self.thread.governance.set(index, true);
        debug!(thread = %self.thread.id, governance = %index, "governance activated");
        Ok(())
    }

    /// Enforce an active policy, ending it
    ///
    /// # Errors
    ///
    /// Returns error if the policy is not active or enforcement fails
    pub fn enforce_governance(&mut self, index: GovernanceIndex) -> Result<(), Escalation> {
        if !self.thread.governance.is_active(index) {
            return Err(Escalation::runtime(format!("{index} is not active")));
        }
        let policy = self.policy(index)?;
        self.thread.governance.set(index, false);
        policy.enforce(self)
    }

    /// Disregard an active policy, ending it; a no-op when inactive
    ///
    /// # Errors
    ///
    /// Returns error if the policy fails to disregard its work
    pub fn disregard_governance(&mut self, index: GovernanceIndex) -> Result<(), Escalation> {
        if !self.thread.governance.is_active(index) {
            return Ok(());
        }
        let policy = self.policy(index)?;
        self.thread.governance.set(index, false);
        debug!(thread = %self.thread.id, governance = %index, "governance disregarded");
        policy.disregard(self)
    }

    fn policy(&self, index: GovernanceIndex) -> Result<Arc<dyn crate::governance::Governance>, Escalation> {
        self.process
            .office
            .governance
            .get(index.0)
            .map(|entry| Arc::clone(&entry.policy))
            .ok_or_else(|| Escalation::runtime(format!("unknown {index}")))
    }

    /// Request cancellation of the owning process
    pub fn cancel_process(&self) {
        self.process.cancel();
    }

    /// Whether the owning process was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.process.is_cancelled()
    }

    /// Store the value delivered with the process completion
    pub fn set_result<T: Any + Send>(&self, value: T) {
        self.process.set_result(Box::new(value));
    }
}
