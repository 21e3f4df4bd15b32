//! Runtime error types.
//!
//! Failures raised by work are escalations, not errors; these types cover
//! construction of the office and misuse of its entry API.

use crate::config::ConfigError;
use strand_plan::PlanError;
use thiserror::Error;

/// Team start-up error
#[derive(Debug, Error)]
pub enum TeamError {
    /// Worker thread could not be spawned
    #[error("failed to spawn worker {index} of team {team}: {source}")]
    Spawn {
        /// Team name
        team: String,
        /// Worker position
        index: usize,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Office construction error
#[derive(Debug, Error)]
pub enum BuildError {
    /// The plan failed to compile
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Runtime configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A team could not be started
    #[error(transparent)]
    Team(#[from] TeamError),

    /// Two teams registered under one name
    #[error("team registered more than once: {name}")]
    DuplicateTeam {
        /// Team name
        name: String,
    },

    /// A declaration has no runtime implementation bound
    #[error("no {kind} implementation bound for {name}")]
    MissingImplementation {
        /// Kind of declaration (team, resource, governance, work unit)
        kind: &'static str,
        /// Declared name
        name: String,
    },

    /// An escalation entry names an undeclared work unit
    #[error("escalation handler references unknown work unit {name}")]
    UnknownWorkUnit {
        /// Work unit name
        name: String,
    },
}

/// Entry API error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Invocation names an undeclared work unit
    #[error("unknown work unit {name}")]
    UnknownWorkUnit {
        /// Work unit name
        name: String,
    },

    /// The office has been shut down
    #[error("office is shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_from_plan() {
        let err: BuildError = PlanError::cycle("db", "cache").into();
        assert_eq!(err.to_string(), "dependency cycle between resources cache and db");
    }

    #[test]
    fn test_missing_implementation_message() {
        let err = BuildError::MissingImplementation {
            kind: "resource",
            name: "db".to_string(),
        };
        assert_eq!(err.to_string(), "no resource implementation bound for db");
    }
}
