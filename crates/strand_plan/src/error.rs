//! Configuration-time errors.
//!
//! These never reach dispatch: they abort construction of the office. Every
//! variant naming more than one item stores the names sorted.

use thiserror::Error;

/// Planner result type
pub type PlanResult<T> = Result<T, PlanError>;

/// Planner error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Two declarations share a name
    #[error("{kind} declared more than once: {name}")]
    DuplicateName {
        /// Kind of declaration (team, resource, ...)
        kind: &'static str,
        /// Duplicated name
        name: String,
    },

    /// Dependencies or bindings name resources that were never declared
    #[error("{referenced_by} references unknown resources: {}", .names.join(", "))]
    UnknownResources {
        /// Declaration holding the dangling reference
        referenced_by: String,
        /// Unknown names, sorted
        names: Vec<String>,
    },

    /// Two resources depend on each other
    #[error("dependency cycle between resources {first} and {second}")]
    DependencyCycle {
        /// Lexicographically smaller name
        first: String,
        /// Lexicographically larger name
        second: String,
    },

    /// A process-scoped resource depends on a thread-scoped resource
    #[error("process-scoped resource {resource} cannot depend on thread-scoped resource {dependency}")]
    ScopeViolation {
        /// Offending resource
        resource: String,
        /// Thread-scoped dependency
        dependency: String,
    },

    /// Work unit assigned to a team that was never declared
    #[error("work unit {work_unit} assigned to unknown team {team}")]
    UnknownTeam {
        /// Work unit name
        work_unit: String,
        /// Team name
        team: String,
    },

    /// Governance references that were never declared
    #[error("{referenced_by} references unknown governance: {}", .names.join(", "))]
    UnknownGovernance {
        /// Declaration holding the dangling reference
        referenced_by: String,
        /// Unknown names, sorted
        names: Vec<String>,
    },

    /// Type hierarchy references parents that were never declared
    #[error("unknown parent types: {}", .names.join(", "))]
    UnknownTypes {
        /// Unknown names, sorted
        names: Vec<String>,
    },

    /// Type hierarchy loops back on itself
    #[error("type hierarchy cycle through {name}")]
    TypeCycle {
        /// A type on the cycle
        name: String,
    },

    /// Work units feed incompatible types into the same parameter slot
    #[error("incompatible parameter types for slot {slot}: {first} and {second}")]
    IncompatibleParameterTypes {
        /// Parameter slot
        slot: String,
        /// Lexicographically smaller type name
        first: String,
        /// Lexicographically larger type name
        second: String,
    },

    /// Plan document could not be decoded
    #[error("invalid plan document: {0}")]
    InvalidDocument(String),
}

impl PlanError {
    /// Build an unknown-resources error with sorted, de-duplicated names
    #[must_use]
    pub fn unknown_resources(referenced_by: impl Into<String>, mut names: Vec<String>) -> Self {
        names.sort();
        names.dedup();
        Self::UnknownResources {
            referenced_by: referenced_by.into(),
            names,
        }
    }

    /// Build a cycle error naming both resources in sorted order
    #[must_use]
    pub fn cycle(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self::DependencyCycle {
            first: first.to_string(),
            second: second.to_string(),
        }
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_names_sorted() {
        assert_eq!(PlanError::cycle("db", "cache"), PlanError::cycle("cache", "db"));
        let s = PlanError::cycle("db", "cache").to_string();
        assert_eq!(s, "dependency cycle between resources cache and db");
    }

    #[test]
    fn test_unknown_resources_sorted() {
        let err = PlanError::unknown_resources(
            "resource web",
            vec!["zeta".to_string(), "alpha".to_string(), "zeta".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "resource web references unknown resources: alpha, zeta"
        );
    }

    #[test]
    fn test_invalid_document_from_json() {
        let err: PlanError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, PlanError::InvalidDocument(_)));
    }
}
