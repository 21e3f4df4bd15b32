//! Dispatch loop.
//!
//! A [`Job`] is one logical thread together with its pending chain. Teams
//! run jobs; a job pops and executes nodes until its chain drains, it parks
//! on a container, or it has to move to another team. Nodes never call each
//! other: each returns the chain to splice in front of the remaining work.

use crate::container::{self, Acquire};
use crate::context::NodeContext;
use crate::continuation::{Continuation, FunctionState, NodeRole};
use crate::escalation::{Escalation, EscalationScope};
use crate::executive::ProfiledNode;
use crate::governance;
use crate::office::OfficeShared;
use crate::process::ProcessState;
use crate::thread::{self, ThreadState};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use strand_core::{LogicalThreadId, ProcessId, TeamId};
use tracing::{debug, trace, warn};

/// A logical thread ready to run on a team
pub struct Job {
    pub(crate) process: Arc<ProcessState>,
    pub(crate) thread: ThreadState,
    pub(crate) chain: Continuation,
    pub(crate) team: TeamId,
}

impl Job {
    pub(crate) fn new(process: Arc<ProcessState>, thread: ThreadState, chain: Continuation, team: TeamId) -> Self {
        Self {
            process,
            thread,
            chain,
            team,
        }
    }

    /// Owning process
    #[must_use]
    pub fn process_id(&self) -> ProcessId {
        self.process.id
    }

    /// Logical thread carried by this job
    #[must_use]
    pub fn thread_id(&self) -> LogicalThreadId {
        self.thread.id
    }

    /// Team the job is queued on
    #[must_use]
    pub fn team(&self) -> TeamId {
        self.team
    }

    /// Run until the chain drains, the job parks, or it moves team
    pub fn run(mut self) {
        let office = Arc::clone(&self.process.office);
        let budget = office.config.max_inline_nodes.max(1);
        let mut executed = 0;

        loop {
            if self.process.is_cancelled() && self.head_role() == Some(NodeRole::Work) {
                let dropped = self.chain.discard_work();
                debug!(process = %self.process.id, thread = %self.thread.id, dropped, "process cancelled, discarding work");
            }

            let Some(mut node) = self.chain.pop() else {
                if thread::complete(&mut self) {
                    continue;
                }
                trace!(process = %self.process.id, thread = %self.thread.id, "job finished");
                return;
            };

            if let Some(team) = node.team.filter(|&team| team != self.team) {
                trace!(node = %node.name, from = %self.team, to = %team, "routing to team");
                self.chain.push_front(node);
                self.team = team;
                office.assign(self);
                return;
            }

            if executed >= budget {
                trace!(node = %node.name, team = %self.team, "inline budget spent, re-queueing");
                self.chain.push_front(node);
                office.assign(self);
                return;
            }

            if !node.bindings.load_order.is_empty() {
                let bindings = Arc::clone(&node.bindings);
                self.chain.push_front(node);
                match container::ensure_ready(self, &bindings.load_order) {
                    Acquire::Ready(job) => self = job,
                    Acquire::Parked => return,
                    Acquire::Cancelled(job) => {
                        self = job;
                        continue;
                    }
                    Acquire::Failed(job, escalation) => {
                        self = job;
                        if let Some(node) = self.chain.pop() {
                            self.escalate(&node, escalation);
                        }
                        continue;
                    }
                }
                let Some(ready) = self.chain.pop() else {
                    continue;
                };
                node = ready;
            }

            executed += 1;
            self.execute(node, &office);
        }
    }

    pub(crate) fn head_role(&self) -> Option<NodeRole> {
        self.chain.iter().next().map(FunctionState::role)
    }

    fn execute(&mut self, mut node: Box<FunctionState>, office: &OfficeShared) {
        let behaviour = node.take_behaviour();
        trace!(process = %self.process.id, thread = %self.thread.id, node = %node.name, "executing");

        let outcome = {
            let _safety = node.thread_safe.then(|| self.process.safety.lock());
            let mut ctx = NodeContext::new(&self.process, &mut self.thread, self.team, &node.bindings);
            panic::catch_unwind(AssertUnwindSafe(|| behaviour.execute(&mut ctx)))
        };

        if office.profiling() {
            self.process.record_node(ProfiledNode {
                name: node.name.to_string(),
                thread: self.thread.id,
                team: self.team,
            });
        }

        match outcome {
            Ok(Ok(Some(mut replacement))) => {
                replacement.inherit(&node);
                self.chain = replacement.then(std::mem::take(&mut self.chain));
            }
            Ok(Ok(None)) => {}
            Ok(Err(escalation)) => self.escalate(&node, escalation),
            Err(payload) => self.escalate(&node, Escalation::from_panic(payload)),
        }
    }

    /// Raise an escalation on this job's logical thread
    ///
    /// The failing chain's work is abandoned; its cleanup nodes stay queued
    /// behind the handler chain, which is prefixed by disregarding every
    /// active governance.
    fn escalate(&mut self, node: &FunctionState, escalation: Escalation) {
        if node.role == NodeRole::Work {
            let dropped = self.chain.discard_work();
            if dropped > 0 {
                trace!(node = %node.name, dropped, "abandoning failed chain");
            }
        }

        if node.handling == Some(EscalationScope::TopLevel) {
            self.process.abort(escalation);
            self.chain.discard_work();
            return;
        }

        let from = node.handling.map_or(EscalationScope::Thread, EscalationScope::wider);
        warn!(
            process = %self.process.id,
            thread = %self.thread.id,
            node = %node.name,
            kind = %escalation.kind(),
            "escalation raised: {}",
            escalation.message()
        );

        let (scope, handler) = self.resolve(from, escalation);
        let office = &self.process.office;
        let chain = governance::deactivate_all(office, &self.thread.governance)
            .then(handler)
            .handled_by(scope);
        self.chain = chain.then(std::mem::take(&mut self.chain));
    }

    /// Find the handler chain, starting at `from` and widening
    fn resolve(&self, from: EscalationScope, escalation: Escalation) -> (EscalationScope, Continuation) {
        let procedures = [
            (EscalationScope::Thread, self.thread.procedure.as_ref()),
            (EscalationScope::Process, Some(&self.process.procedure)),
        ];
        for (scope, procedure) in procedures {
            if scope < from {
                continue;
            }
            let Some(handler) = procedure.and_then(|p| p.lookup(&escalation)) else {
                continue;
            };
            let escalation = escalation.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| handler.create(escalation))) {
                Ok(chain) => {
                    debug!(process = %self.process.id, scope = ?scope, "escalation handler found");
                    return (scope, chain);
                }
                Err(_) => warn!(process = %self.process.id, scope = ?scope, "escalation handler creation panicked"),
            }
        }
        (EscalationScope::TopLevel, top_level_node(escalation))
    }
}

/// Node handing an escalation to the office's top-level handler
fn top_level_node(escalation: Escalation) -> Continuation {
    Continuation::cleanup("top-level escalation", move |ctx| {
        let process = ctx.process();
        process.record_unhandled(&escalation);
        process.office.top_level.handle(process.id, &escalation)?;
        Ok(None)
    })
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("process", &self.process.id)
            .field("thread", &self.thread.id)
            .field("team", &self.team)
            .field("pending", &self.chain.len())
            .finish()
    }
}
