//! Logical threads.
//!
//! A logical thread is an ordered chain of nodes owned by exactly one job.
//! Its state has a single writer, the worker currently running that job,
//! and so carries no lock.

use crate::continuation::Continuation;
use crate::dispatch::Job;
use crate::escalation::EscalationProcedure;
use crate::governance::{self, GovernanceFlags};
use strand_core::LogicalThreadId;
use tracing::debug;

/// Lifecycle of a logical thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    /// Running its chain
    Active,
    /// Running its teardown chain
    TearingDown,
    /// Removed from the process
    Deregistered,
}

/// Options for a spawned logical thread
#[derive(Debug, Default)]
pub struct SpawnOptions {
    /// Thread escalation procedure
    pub procedure: Option<EscalationProcedure>,
    /// Chain run after the thread's resources are released
    pub completion: Continuation,
}

impl SpawnOptions {
    /// No procedure, no completion
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread escalation procedure
    #[must_use]
    pub fn with_procedure(mut self, procedure: EscalationProcedure) -> Self {
        self.procedure = Some(procedure);
        self
    }

    /// Set the trailing completion chain
    #[must_use]
    pub fn with_completion(mut self, completion: Continuation) -> Self {
        self.completion = completion;
        self
    }
}

/// State of one logical thread
pub(crate) struct ThreadState {
    pub(crate) id: LogicalThreadId,
    pub(crate) main: bool,
    pub(crate) governance: GovernanceFlags,
    pub(crate) procedure: Option<EscalationProcedure>,
    pub(crate) completion: Continuation,
    pub(crate) phase: ThreadPhase,
}

impl ThreadState {
    pub(crate) fn new(
        id: LogicalThreadId,
        main: bool,
        governance: usize,
        procedure: Option<EscalationProcedure>,
        completion: Continuation,
    ) -> Self {
        Self {
            id,
            main,
            governance: GovernanceFlags::new(governance),
            procedure,
            completion,
            phase: ThreadPhase::Active,
        }
    }
}

/// Advance a job whose chain has drained
///
/// Returns whether the job has more work. The first drain starts teardown:
/// disregard active governance, release thread containers, then run the
/// trailing completion of a spawned thread. The second drain deregisters
/// the thread, which yields the process cleanup chain when it was the last.
pub(crate) fn complete(job: &mut Job) -> bool {
    match job.thread.phase {
        ThreadPhase::Active => {
            job.thread.phase = ThreadPhase::TearingDown;
            let office = &job.process.office;
            let mut teardown = governance::deactivate_all(office, &job.thread.governance)
                .then(office.release_chain(&office.plan.thread_release_order));
            if !job.thread.main {
                teardown = teardown.then(std::mem::take(&mut job.thread.completion));
            }
            debug!(
                process = %job.process.id,
                thread = %job.thread.id,
                nodes = teardown.len(),
                "thread chain drained, tearing down"
            );
            job.chain = teardown;
            true
        }
        ThreadPhase::TearingDown => {
            job.thread.phase = ThreadPhase::Deregistered;
            let deferred = job.thread.main.then(|| std::mem::take(&mut job.thread.completion));
            match job.process.deregister(job.thread.id, deferred) {
                Some(cleanup) => {
                    job.chain = cleanup;
                    true
                }
                None => false,
            }
        }
        ThreadPhase::Deregistered => false,
    }
}
