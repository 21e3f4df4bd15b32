//! STRAND Core Types
//!
//! Identifiers and configuration-time handles shared by the planner and the
//! runtime. Nothing in this crate performs I/O or synchronization.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod id;
pub mod index;

// Re-exports
pub use id::{LogicalThreadId, ProcessId};
pub use index::{GovernanceIndex, ResourceIndex, ResourceScope, TeamId};
