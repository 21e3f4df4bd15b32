//! Process identity and completion hooks.

use indexmap::IndexSet;
use parking_lot::Mutex;
use strand_core::{LogicalThreadId, ProcessId, TeamId};

/// Issues and retires process identifiers
pub trait Executive: Send + Sync {
    /// Identifier for a new process
    fn create_process_identifier(&self) -> ProcessId;

    /// The process has completed; its identifier is no longer live
    fn retire_process_identifier(&self, process: ProcessId);
}

/// Random identifiers, tracking the live set
#[derive(Debug, Default)]
pub struct DefaultExecutive {
    live: Mutex<IndexSet<ProcessId>>,
}

impl DefaultExecutive {
    /// Create an executive with no live processes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers issued and not yet retired, in issue order
    #[must_use]
    pub fn live_processes(&self) -> Vec<ProcessId> {
        self.live.lock().iter().copied().collect()
    }
}

impl Executive for DefaultExecutive {
    fn create_process_identifier(&self) -> ProcessId {
        let id = ProcessId::new();
        self.live.lock().insert(id);
        id
    }

    fn retire_process_identifier(&self, process: ProcessId) {
        self.live.lock().shift_remove(&process);
    }
}

/// External executor managing thread-local state on behalf of processes
pub trait ThreadLocalAwareExecutor: Send + Sync {
    /// The process has completed
    fn process_complete(&self, process: ProcessId);
}

/// One executed node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfiledNode {
    /// Node name
    pub name: String,
    /// Logical thread that ran it
    pub thread: LogicalThreadId,
    /// Team that ran it
    pub team: TeamId,
}

/// Every node a process executed, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfiledProcess {
    /// Profiled process
    pub process_id: ProcessId,
    /// Executed nodes
    pub nodes: Vec<ProfiledNode>,
}

/// Receives profiling records at process completion
pub trait Profiler: Send + Sync {
    /// A profiled process completed
    fn profiled(&self, process: ProfiledProcess);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_executive_tracks_live_ids() {
        let executive = DefaultExecutive::new();
        let a = executive.create_process_identifier();
        let b = executive.create_process_identifier();
        assert_ne!(a, b);
        assert_eq!(executive.live_processes(), vec![a, b]);
        executive.retire_process_identifier(a);
        assert_eq!(executive.live_processes(), vec![b]);
    }
}
