//! STRAND Planner
//!
//! Turns an already-declared office (resources, teams, governance and work
//! units) into the index-resolved structures the runtime executes against.
//! Dependency ordering happens here, once, so dispatch never sorts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod graph;
pub mod parameter;
pub mod plan;
pub mod sorter;

pub use error::{PlanError, PlanResult};
pub use graph::{ResourceDecl, ResourceGraph};
pub use parameter::{TypeDecl, TypeHierarchy};
pub use plan::{
    CompiledGovernance, CompiledPlan, CompiledResource, CompiledWorkUnit, GovernanceDecl,
    OfficePlan, ParameterDecl, WorkUnitDecl,
};
pub use sorter::DependencySorter;
