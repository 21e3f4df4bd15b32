//! Arena handles resolved once at configuration time.
//!
//! At dispatch time resources, teams and governance are referenced only by
//! these integer handles, giving O(1) lookup into the owning scope's slab.

use serde::{Deserialize, Serialize};

/// Scope owning a resource container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceScope {
    /// One container per process, shared by all of its logical threads
    Process,
    /// One container per logical thread
    Thread,
}

impl std::fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Thread => write!(f, "thread"),
        }
    }
}

/// Handle to a resource container within its scope's slab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIndex {
    /// Owning scope
    pub scope: ResourceScope,
    /// Position within the scope
    pub index: usize,
}

impl ResourceIndex {
    /// Handle to a process-scoped container
    #[must_use]
    pub const fn process(index: usize) -> Self {
        Self {
            scope: ResourceScope::Process,
            index,
        }
    }

    /// Handle to a thread-scoped container
    #[must_use]
    pub const fn thread(index: usize) -> Self {
        Self {
            scope: ResourceScope::Thread,
            index,
        }
    }
}

impl std::fmt::Display for ResourceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.scope, self.index)
    }
}

/// Handle to a team (work pool)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub usize);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "team#{}", self.0)
    }
}

/// Handle to a governance policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GovernanceIndex(pub usize);

impl std::fmt::Display for GovernanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "governance#{}", self.0)
    }
}
