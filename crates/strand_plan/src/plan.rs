//! Office plan and its compiler.
//!
//! The plan is the name-level description of an office handed over by the
//! configuration layer. Compiling it resolves every name to an index and
//! fixes every acquisition and teardown order ahead of execution.

use crate::error::{PlanError, PlanResult};
use crate::graph::{ResourceDecl, ResourceGraph};
use crate::parameter::{TypeDecl, TypeHierarchy};
use crate::sorter::DependencySorter;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use strand_core::{GovernanceIndex, ResourceIndex, ResourceScope, TeamId};

/// Declared governance policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceDecl {
    /// Unique governance name
    pub name: String,
    /// Resources the policy touches
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Parameter slot fed by a work unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDecl {
    /// Slot name
    pub slot: String,
    /// Declared type
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Declared work unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnitDecl {
    /// Unique work unit name
    pub name: String,
    /// Team executing the unit
    pub team: String,
    /// Bound resources, in slot order
    #[serde(default)]
    pub resources: Vec<String>,
    /// Governance activated before the unit runs
    #[serde(default)]
    pub governance: Vec<String>,
    /// Parameter slot, if the unit takes one
    #[serde(default)]
    pub parameter: Option<ParameterDecl>,
}

impl WorkUnitDecl {
    /// Create a declaration with no bindings
    #[must_use]
    pub fn new(name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            resources: Vec::new(),
            governance: Vec::new(),
            parameter: None,
        }
    }

    /// Bind resources, in slot order
    #[must_use]
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Activate governance before the unit runs
    #[must_use]
    pub fn with_governance<I, S>(mut self, governance: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.governance.extend(governance.into_iter().map(Into::into));
        self
    }
}

/// Name-level office description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficePlan {
    /// Team names
    pub teams: Vec<String>,
    /// Resource declarations
    pub resources: Vec<ResourceDecl>,
    /// Governance declarations
    pub governance: Vec<GovernanceDecl>,
    /// Work unit declarations
    pub work_units: Vec<WorkUnitDecl>,
    /// Parameter type hierarchy
    pub types: Vec<TypeDecl>,
}

/// Resource with resolved handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledResource {
    /// Resource name
    pub name: String,
    /// Slab handle
    pub index: ResourceIndex,
    /// Direct dependencies, in declaration order
    pub dependencies: Vec<ResourceIndex>,
}

/// Governance with resolved handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledGovernance {
    /// Governance name
    pub name: String,
    /// Handle
    pub index: GovernanceIndex,
    /// Resources to ensure before the policy runs, dependencies first
    pub load_order: Vec<ResourceIndex>,
}

/// Work unit with resolved handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledWorkUnit {
    /// Work unit name
    pub name: String,
    /// Assigned team
    pub team: TeamId,
    /// Bound resources in slot order
    pub bindings: Vec<ResourceIndex>,
    /// Everything to ensure before execution, dependencies first
    pub load_order: Vec<ResourceIndex>,
    /// Governance activated before the unit runs
    pub governance: Vec<GovernanceIndex>,
}

/// Fully resolved office
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPlan {
    /// Teams by name
    pub teams: IndexMap<String, TeamId>,
    /// Process-scoped resources by slab index
    pub process_resources: Vec<CompiledResource>,
    /// Thread-scoped resources by slab index
    pub thread_resources: Vec<CompiledResource>,
    /// Teardown order of process-scoped containers
    pub process_release_order: Vec<ResourceIndex>,
    /// Teardown order of thread-scoped containers
    pub thread_release_order: Vec<ResourceIndex>,
    /// Governance by index
    pub governance: Vec<CompiledGovernance>,
    /// Work units in declaration order
    pub work_units: Vec<CompiledWorkUnit>,
    /// Resolved type of every parameter slot
    pub parameter_slots: IndexMap<String, String>,
}

impl OfficePlan {
    /// Create an empty plan
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a plan from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed
    pub fn from_json_str(json: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve every name and fix every order
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found
    pub fn compile(&self) -> PlanResult<CompiledPlan> {
        let mut teams = IndexMap::new();
        for name in &self.teams {
            if teams.insert(name.clone(), TeamId(teams.len())).is_some() {
                return Err(PlanError::DuplicateName {
                    kind: "team",
                    name: name.clone(),
                });
            }
        }

        let graph = ResourceGraph::from_decls(self.resources.iter().cloned())?;
        graph.validate()?;
        let sorter = DependencySorter::new(&graph)?;
        let full_order = sorter.sort_all()?;

        let resolve = |names: &[String]| -> Vec<ResourceIndex> {
            names.iter().filter_map(|n| graph.index_of(n)).collect()
        };

        let mut process_resources = Vec::new();
        let mut thread_resources = Vec::new();
        for decl in graph.iter() {
            let Some(index) = graph.index_of(&decl.name) else {
                continue;
            };
            let compiled = CompiledResource {
                name: decl.name.clone(),
                index,
                dependencies: resolve(&decl.dependencies),
            };
            match index.scope {
                ResourceScope::Process => process_resources.push(compiled),
                ResourceScope::Thread => thread_resources.push(compiled),
            }
        }

        let release = |scope: ResourceScope| -> Vec<ResourceIndex> {
            full_order
                .iter()
                .rev()
                .filter_map(|n| graph.index_of(n))
                .filter(|i| i.scope == scope)
                .collect()
        };
        let process_release_order = release(ResourceScope::Process);
        let thread_release_order = release(ResourceScope::Thread);

        let mut governance_names: IndexMap<&str, GovernanceIndex> = IndexMap::new();
        let mut governance = Vec::with_capacity(self.governance.len());
        for decl in &self.governance {
            let index = GovernanceIndex(governance_names.len());
            if governance_names.insert(decl.name.as_str(), index).is_some() {
                return Err(PlanError::DuplicateName {
                    kind: "governance",
                    name: decl.name.clone(),
                });
            }
            check_known(&graph, &decl.resources, || format!("governance {}", decl.name))?;
            governance.push(CompiledGovernance {
                name: decl.name.clone(),
                index,
                load_order: resolve(&sorter.sort(&decl.resources)?),
            });
        }

        let mut unit_names = IndexSet::new();
        let mut work_units = Vec::with_capacity(self.work_units.len());
        for decl in &self.work_units {
            if !unit_names.insert(decl.name.as_str()) {
                return Err(PlanError::DuplicateName {
                    kind: "work unit",
                    name: decl.name.clone(),
                });
            }
            let team = *teams.get(&decl.team).ok_or_else(|| PlanError::UnknownTeam {
                work_unit: decl.name.clone(),
                team: decl.team.clone(),
            })?;
            check_known(&graph, &decl.resources, || format!("work unit {}", decl.name))?;

            let mut unknown_governance = Vec::new();
            let mut unit_governance = Vec::with_capacity(decl.governance.len());
            let mut touched = decl.resources.clone();
            for name in &decl.governance {
                match governance_names.get(name.as_str()) {
                    Some(&index) => {
                        unit_governance.push(index);
                        touched.extend(self.governance[index.0].resources.iter().cloned());
                    }
                    None => unknown_governance.push(name.clone()),
                }
            }
            if !unknown_governance.is_empty() {
                unknown_governance.sort();
                unknown_governance.dedup();
                return Err(PlanError::UnknownGovernance {
                    referenced_by: format!("work unit {}", decl.name),
                    names: unknown_governance,
                });
            }

            work_units.push(CompiledWorkUnit {
                name: decl.name.clone(),
                team,
                bindings: resolve(&decl.resources),
                load_order: resolve(&sorter.sort(&touched)?),
                governance: unit_governance,
            });
        }

        let hierarchy = TypeHierarchy::from_decls(&self.types)?;
        let mut slots: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for decl in &self.work_units {
            if let Some(parameter) = &decl.parameter {
                slots
                    .entry(parameter.slot.as_str())
                    .or_default()
                    .push(parameter.type_name.as_str());
            }
        }
        let mut parameter_slots = IndexMap::new();
        for (slot, declared) in slots {
            if let Some(resolved) = hierarchy.resolve_slot(slot, &declared)? {
                parameter_slots.insert(slot.to_string(), resolved);
            }
        }

        Ok(CompiledPlan {
            teams,
            process_resources,
            thread_resources,
            process_release_order,
            thread_release_order,
            governance,
            work_units,
            parameter_slots,
        })
    }
}

fn check_known(
    graph: &ResourceGraph,
    names: &[String],
    referenced_by: impl FnOnce() -> String,
) -> PlanResult<()> {
    let unknown: Vec<String> = names
        .iter()
        .filter(|n| graph.get(n).is_none())
        .cloned()
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(PlanError::unknown_resources(referenced_by(), unknown))
    }
}

impl CompiledPlan {
    /// Compiled resource for a handle
    #[must_use]
    pub fn resource(&self, index: ResourceIndex) -> Option<&CompiledResource> {
        match index.scope {
            ResourceScope::Process => self.process_resources.get(index.index),
            ResourceScope::Thread => self.thread_resources.get(index.index),
        }
    }

    /// Compiled work unit by name
    #[must_use]
    pub fn work_unit(&self, name: &str) -> Option<&CompiledWorkUnit> {
        self.work_units.iter().find(|w| w.name == name)
    }

    /// Names of the resources in a load order
    #[must_use]
    pub fn resource_names(&self, order: &[ResourceIndex]) -> Vec<&str> {
        order
            .iter()
            .filter_map(|i| self.resource(*i).map(|r| r.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_plan() -> OfficePlan {
        let mut plan = OfficePlan::new();
        plan.teams = vec!["fast".to_string(), "slow".to_string()];
        plan.resources = vec![
            ResourceDecl::process("cache").depends_on("db"),
            ResourceDecl::process("db"),
            ResourceDecl::thread("session").depends_on("cache"),
        ];
        plan.governance = vec![GovernanceDecl {
            name: "tx".to_string(),
            resources: vec!["db".to_string()],
        }];
        let mut read = WorkUnitDecl::new("read", "fast");
        read.resources = vec!["session".to_string()];
        read.governance = vec!["tx".to_string()];
        let mut write = WorkUnitDecl::new("write", "slow");
        write.resources = vec!["cache".to_string(), "db".to_string()];
        plan.work_units = vec![read, write];
        plan
    }

    #[test]
    fn test_compile_load_orders() {
        let compiled = scenario_plan().compile().unwrap();
        let read = compiled.work_unit("read").unwrap();
        assert_eq!(read.team, TeamId(0));
        assert_eq!(compiled.resource_names(&read.load_order), vec!["db", "cache", "session"]);
        assert_eq!(read.bindings, vec![ResourceIndex::thread(0)]);
        assert_eq!(read.governance, vec![GovernanceIndex(0)]);

        let write = compiled.work_unit("write").unwrap();
        assert_eq!(compiled.resource_names(&write.load_order), vec!["db", "cache"]);
        // Slots keep declaration order, not load order
        assert_eq!(compiled.resource_names(&write.bindings), vec!["cache", "db"]);
    }

    #[test]
    fn test_compile_release_orders_reverse_dependencies() {
        let compiled = scenario_plan().compile().unwrap();
        assert_eq!(compiled.resource_names(&compiled.process_release_order), vec!["cache", "db"]);
        assert_eq!(compiled.thread_release_order, vec![ResourceIndex::thread(0)]);
    }

    #[test]
    fn test_compile_resource_dependencies_resolved() {
        let compiled = scenario_plan().compile().unwrap();
        let cache = compiled.resource(ResourceIndex::process(0)).unwrap();
        assert_eq!(cache.name, "cache");
        assert_eq!(cache.dependencies, vec![ResourceIndex::process(1)]);
    }

    #[test]
    fn test_compile_unknown_team() {
        let mut plan = scenario_plan();
        plan.work_units[0].team = "missing".to_string();
        assert_eq!(
            plan.compile(),
            Err(PlanError::UnknownTeam {
                work_unit: "read".to_string(),
                team: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_compile_unknown_binding() {
        let mut plan = scenario_plan();
        plan.work_units[1].resources.push("queue".to_string());
        let err = plan.compile().unwrap_err();
        assert_eq!(err.to_string(), "work unit write references unknown resources: queue");
    }

    #[test]
    fn test_compile_unknown_governance_sorted() {
        let mut plan = scenario_plan();
        plan.work_units[1].governance = vec!["zz".to_string(), "audit".to_string()];
        assert_eq!(
            plan.compile(),
            Err(PlanError::UnknownGovernance {
                referenced_by: "work unit write".to_string(),
                names: vec!["audit".to_string(), "zz".to_string()],
            })
        );
    }

    #[test]
    fn test_compile_cycle_rejected() {
        let mut plan = scenario_plan();
        plan.resources[1].dependencies.push("cache".to_string());
        assert_eq!(plan.compile(), Err(PlanError::cycle("db", "cache")));
    }

    #[test]
    fn test_compile_duplicate_team() {
        let mut plan = scenario_plan();
        plan.teams.push("fast".to_string());
        assert!(matches!(plan.compile(), Err(PlanError::DuplicateName { kind: "team", .. })));
    }

    #[test]
    fn test_compile_parameter_slots() {
        let mut plan = scenario_plan();
        plan.types = vec![
            TypeDecl { name: "Request".to_string(), parent: None },
            TypeDecl { name: "HttpRequest".to_string(), parent: Some("Request".to_string()) },
        ];
        plan.work_units[0].parameter = Some(ParameterDecl {
            slot: "request".to_string(),
            type_name: "Request".to_string(),
        });
        plan.work_units[1].parameter = Some(ParameterDecl {
            slot: "request".to_string(),
            type_name: "HttpRequest".to_string(),
        });
        let compiled = plan.compile().unwrap();
        assert_eq!(compiled.parameter_slots.get("request").map(String::as_str), Some("HttpRequest"));
    }

    #[test]
    fn test_plan_from_json() {
        let json = r#"{
            "teams": ["fast"],
            "resources": [
                {"name": "db", "scope": "process"},
                {"name": "cache", "scope": "process", "dependencies": ["db"]}
            ],
            "work_units": [
                {"name": "read", "team": "fast", "resources": ["cache"]}
            ]
        }"#;
        let plan = OfficePlan::from_json_str(json).unwrap();
        let compiled = plan.compile().unwrap();
        let read = compiled.work_unit("read").unwrap();
        assert_eq!(compiled.resource_names(&read.load_order), vec!["db", "cache"]);
    }
}
