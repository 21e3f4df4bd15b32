//! Resource dependency graph.
//!
//! Declarations are kept in declaration order; that order is the final
//! tie-break of the dependency sort.

use crate::error::{PlanError, PlanResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strand_core::{ResourceIndex, ResourceScope};

/// A declared resource (managed object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Unique resource name
    pub name: String,
    /// Owning scope
    pub scope: ResourceScope,
    /// Names of resources this one depends on, in declaration order
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ResourceDecl {
    /// Create a process-scoped declaration with no dependencies
    #[must_use]
    pub fn process(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: ResourceScope::Process,
            dependencies: Vec::new(),
        }
    }

    /// Create a thread-scoped declaration with no dependencies
    #[must_use]
    pub fn thread(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: ResourceScope::Thread,
            dependencies: Vec::new(),
        }
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// Resource declarations keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGraph {
    decls: IndexMap<String, ResourceDecl>,
}

impl ResourceGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from declarations
    ///
    /// # Errors
    ///
    /// Returns error if a name is declared twice
    pub fn from_decls(decls: impl IntoIterator<Item = ResourceDecl>) -> PlanResult<Self> {
        let mut graph = Self::new();
        for decl in decls {
            graph.add(decl)?;
        }
        Ok(graph)
    }

    /// Add a declaration
    ///
    /// # Errors
    ///
    /// Returns error if the name is already declared
    pub fn add(&mut self, decl: ResourceDecl) -> PlanResult<()> {
        if self.decls.contains_key(&decl.name) {
            return Err(PlanError::DuplicateName {
                kind: "resource",
                name: decl.name,
            });
        }
        self.decls.insert(decl.name.clone(), decl);
        Ok(())
    }

    /// Check references and scope rules
    ///
    /// # Errors
    ///
    /// Returns the first offending declaration's error
    pub fn validate(&self) -> PlanResult<()> {
        for decl in self.decls.values() {
            let unknown: Vec<String> = decl
                .dependencies
                .iter()
                .filter(|dep| !self.decls.contains_key(dep.as_str()))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(PlanError::unknown_resources(
                    format!("resource {}", decl.name),
                    unknown,
                ));
            }

            if decl.scope == ResourceScope::Process {
                let thread_dep = decl
                    .dependencies
                    .iter()
                    .filter(|dep| {
                        self.decls
                            .get(dep.as_str())
                            .is_some_and(|d| d.scope == ResourceScope::Thread)
                    })
                    .min();
                if let Some(dep) = thread_dep {
                    return Err(PlanError::ScopeViolation {
                        resource: decl.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Get a declaration by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceDecl> {
        self.decls.get(name)
    }

    /// Declaration position of a name
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.decls.get_index_of(name)
    }

    /// Declaration at a position
    #[must_use]
    pub fn decl_at(&self, position: usize) -> Option<&ResourceDecl> {
        self.decls.get_index(position).map(|(_, d)| d)
    }

    /// Resolve a name to its slab handle (position among same-scope resources)
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<ResourceIndex> {
        let decl = self.decls.get(name)?;
        let index = self
            .decls
            .values()
            .take_while(|d| d.name != decl.name)
            .filter(|d| d.scope == decl.scope)
            .count();
        Some(ResourceIndex {
            scope: decl.scope,
            index,
        })
    }

    /// Iterate declarations in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDecl> {
        self.decls.values()
    }

    /// Number of declarations
    #[must_use]
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    /// Whether the graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_duplicate() {
        let result = ResourceGraph::from_decls([ResourceDecl::process("db"), ResourceDecl::process("db")]);
        assert_eq!(
            result,
            Err(PlanError::DuplicateName {
                kind: "resource",
                name: "db".to_string()
            })
        );
    }

    #[test]
    fn test_graph_unknown_dependency() {
        let graph = ResourceGraph::from_decls([
            ResourceDecl::process("cache").depends_on("zdb").depends_on("adb"),
        ])
        .unwrap();
        let err = graph.validate().unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownResources {
                referenced_by: "resource cache".to_string(),
                names: vec!["adb".to_string(), "zdb".to_string()],
            }
        );
    }

    #[test]
    fn test_graph_scope_violation() {
        let graph = ResourceGraph::from_decls([
            ResourceDecl::thread("session"),
            ResourceDecl::process("pool").depends_on("session"),
        ])
        .unwrap();
        assert!(matches!(graph.validate(), Err(PlanError::ScopeViolation { .. })));
    }

    #[test]
    fn test_thread_may_depend_on_process() {
        let graph = ResourceGraph::from_decls([
            ResourceDecl::process("pool"),
            ResourceDecl::thread("session").depends_on("pool"),
        ])
        .unwrap();
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_index_of_per_scope() {
        let graph = ResourceGraph::from_decls([
            ResourceDecl::process("db"),
            ResourceDecl::thread("tx"),
            ResourceDecl::process("cache"),
        ])
        .unwrap();
        assert_eq!(graph.index_of("db"), Some(ResourceIndex::process(0)));
        assert_eq!(graph.index_of("tx"), Some(ResourceIndex::thread(0)));
        assert_eq!(graph.index_of("cache"), Some(ResourceIndex::process(1)));
        assert_eq!(graph.index_of("missing"), None);
    }
}
