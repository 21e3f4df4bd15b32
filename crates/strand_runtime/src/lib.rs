//! STRAND Runtime
//!
//! Continuation-based execution for compiled offices. Work is a chain of
//! nodes; each node returns the chain to run next, so nesting never grows
//! the native stack. Teams are interchangeable pools that run jobs, resource
//! containers load lazily and release in reverse dependency order, and
//! failures escalate from thread to process to a top-level handler.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod container;
pub mod context;
pub mod continuation;
pub mod dispatch;
pub mod error;
pub mod escalation;
pub mod executive;
pub mod governance;
pub mod office;
pub mod process;
pub mod team;
pub mod thread;
pub mod work;

pub use config::{ConfigError, RuntimeConfig, TeamConfig, TeamKind};
pub use container::{
    AsyncOperations, ContainerState, LoadContext, LoadNotifier, LoadOutcome, ManagedObject,
    ManagedObjectSource,
};
pub use context::NodeContext;
pub use continuation::{Behaviour, Bindings, Continuation, FunctionState, NodeResult, NodeRole};
pub use dispatch::Job;
pub use error::{BuildError, RuntimeError, TeamError};
pub use escalation::{
    Escalation, EscalationHandler, EscalationKind, EscalationProcedure, EscalationScope,
    LoggingTopLevelHandler, TopLevelHandler,
};
pub use executive::{
    DefaultExecutive, Executive, ProfiledNode, ProfiledProcess, Profiler, ThreadLocalAwareExecutor,
};
pub use governance::{Governance, GovernanceFlags};
pub use office::{Invocation, Office, OfficeBuilder};
pub use process::{CompletionCallback, ProcessCompletion, ProcessHandle, ProcessOutcome};
pub use team::{ManualTeam, Team, TokioTeam, WorkerTeam};
pub use thread::{SpawnOptions, ThreadPhase};
pub use work::{Argument, WorkLogic, WorkUnit, WorkUnitHandler, take_argument};
