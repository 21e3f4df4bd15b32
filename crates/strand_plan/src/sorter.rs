//! Dependency sorter for resource acquisition order.
//!
//! Runs once per work unit (and per governance) at configuration time. The
//! produced order is the order containers are ensured ready at dispatch time;
//! its reverse is the teardown order.

use crate::error::{PlanError, PlanResult};
use crate::graph::ResourceGraph;
use indexmap::IndexSet;
use std::cmp::Ordering;

/// Orders resources so each appears after everything it depends on
///
/// Holds the transitive dependency closure of every declaration, computed
/// when the sorter is created.
pub struct DependencySorter<'g> {
    graph: &'g ResourceGraph,
    /// Transitive dependencies by declaration position
    closures: Vec<IndexSet<usize>>,
}

impl<'g> DependencySorter<'g> {
    /// Create a sorter over a graph
    ///
    /// # Errors
    ///
    /// Returns error if a dependency names an undeclared resource
    pub fn new(graph: &'g ResourceGraph) -> PlanResult<Self> {
        let mut direct = Vec::with_capacity(graph.len());
        for decl in graph.iter() {
            let mut deps = Vec::with_capacity(decl.dependencies.len());
            let mut unknown = Vec::new();
            for dep in &decl.dependencies {
                match graph.position(dep) {
                    Some(position) => deps.push(position),
                    None => unknown.push(dep.clone()),
                }
            }
            if !unknown.is_empty() {
                return Err(PlanError::unknown_resources(
                    format!("resource {}", decl.name),
                    unknown,
                ));
            }
            direct.push(deps);
        }

        let closures = (0..direct.len())
            .map(|start| {
                let mut closure = IndexSet::new();
                let mut stack: Vec<usize> = direct[start].clone();
                while let Some(current) = stack.pop() {
                    if closure.insert(current) {
                        stack.extend(direct[current].iter().copied());
                    }
                }
                closure
            })
            .collect();

        Ok(Self { graph, closures })
    }

    /// Order the given resources, pulling in everything they depend on
    ///
    /// # Errors
    ///
    /// Returns error if a name is unknown or the expanded set contains a cycle
    pub fn sort<S: AsRef<str>>(&self, touched: &[S]) -> PlanResult<Vec<String>> {
        let mut members = IndexSet::new();
        let mut unknown = Vec::new();
        for name in touched {
            match self.graph.position(name.as_ref()) {
                Some(position) => {
                    members.insert(position);
                    members.extend(self.closures[position].iter().copied());
                }
                None => unknown.push(name.as_ref().to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(PlanError::unknown_resources("binding", unknown));
        }
        self.order(members)
    }

    /// Order every declared resource
    ///
    /// # Errors
    ///
    /// Returns error if the graph contains a cycle
    pub fn sort_all(&self) -> PlanResult<Vec<String>> {
        self.order((0..self.graph.len()).collect())
    }

    /// Transitive dependencies of a resource, in discovery order
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Option<Vec<&str>> {
        let position = self.graph.position(name)?;
        Some(
            self.closures[position]
                .iter()
                .filter_map(|&p| self.graph.decl_at(p).map(|d| d.name.as_str()))
                .collect(),
        )
    }

    fn order(&self, members: IndexSet<usize>) -> PlanResult<Vec<String>> {
        self.check_cycles(&members)?;

        let mut ordered: Vec<usize> = members.into_iter().collect();
        ordered.sort_by(|&a, &b| self.compare(a, b));

        Ok(ordered
            .into_iter()
            .filter_map(|p| self.graph.decl_at(p).map(|d| d.name.clone()))
            .collect())
    }

    /// Report the lexicographically smallest mutually-dependent pair
    fn check_cycles(&self, members: &IndexSet<usize>) -> PlanResult<()> {
        let mut smallest: Option<(&str, &str)> = None;

        for &a in members {
            let Some(decl) = self.graph.decl_at(a) else {
                continue;
            };
            if decl.dependencies.iter().any(|d| d == &decl.name) {
                let pair = (decl.name.as_str(), decl.name.as_str());
                smallest = Some(smallest.map_or(pair, |s| s.min(pair)));
            }
            for &b in &self.closures[a] {
                if b == a || !self.closures[b].contains(&a) {
                    continue;
                }
                let Some(other) = self.graph.decl_at(b) else {
                    continue;
                };
                let pair = if decl.name <= other.name {
                    (decl.name.as_str(), other.name.as_str())
                } else {
                    (other.name.as_str(), decl.name.as_str())
                };
                smallest = Some(smallest.map_or(pair, |s| s.min(pair)));
            }
        }

        match smallest {
            Some((first, second)) => Err(PlanError::cycle(first, second)),
            None => Ok(()),
        }
    }

    /// Dependency first, then fewest dependencies, then declaration order.
    ///
    /// Total on acyclic input: a dependency always has strictly fewer
    /// transitive dependencies than its dependent.
    fn compare(&self, a: usize, b: usize) -> Ordering {
        if self.closures[b].contains(&a) {
            return Ordering::Less;
        }
        if self.closures[a].contains(&b) {
            return Ordering::Greater;
        }
        self.closures[a]
            .len()
            .cmp(&self.closures[b].len())
            .then(a.cmp(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceDecl;
    use proptest::prelude::*;

    fn graph(decls: Vec<ResourceDecl>) -> ResourceGraph {
        ResourceGraph::from_decls(decls).unwrap()
    }

    #[test]
    fn test_sort_dependency_first() {
        let g = graph(vec![
            ResourceDecl::process("cache").depends_on("db"),
            ResourceDecl::process("db"),
        ]);
        let sorter = DependencySorter::new(&g).unwrap();
        assert_eq!(sorter.sort(&["cache"]).unwrap(), vec!["db", "cache"]);
    }

    #[test]
    fn test_sort_transitive_expansion() {
        let g = graph(vec![
            ResourceDecl::process("db"),
            ResourceDecl::process("pool").depends_on("db"),
            ResourceDecl::process("cache").depends_on("pool"),
            ResourceDecl::process("unused"),
        ]);
        let sorter = DependencySorter::new(&g).unwrap();
        assert_eq!(sorter.sort(&["cache"]).unwrap(), vec!["db", "pool", "cache"]);
    }

    #[test]
    fn test_sort_unrelated_fewest_dependencies_first() {
        let g = graph(vec![
            ResourceDecl::process("a"),
            ResourceDecl::process("b").depends_on("a"),
            ResourceDecl::process("c"),
            ResourceDecl::process("d"),
        ]);
        let sorter = DependencySorter::new(&g).unwrap();
        // b has one dependency; a, c and d have none and keep declaration order
        assert_eq!(sorter.sort(&["b", "d", "c"]).unwrap(), vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn test_sort_two_node_cycle() {
        let g = graph(vec![
            ResourceDecl::process("db").depends_on("cache"),
            ResourceDecl::process("cache").depends_on("db"),
        ]);
        let sorter = DependencySorter::new(&g).unwrap();
        assert_eq!(sorter.sort_all(), Err(PlanError::cycle("cache", "db")));
    }

    #[test]
    fn test_sort_self_cycle() {
        let g = graph(vec![ResourceDecl::process("loop").depends_on("loop")]);
        let sorter = DependencySorter::new(&g).unwrap();
        assert_eq!(sorter.sort_all(), Err(PlanError::cycle("loop", "loop")));
    }

    #[test]
    fn test_sort_cycle_outside_touched_set_ignored() {
        let g = graph(vec![
            ResourceDecl::process("db"),
            ResourceDecl::process("x").depends_on("y"),
            ResourceDecl::process("y").depends_on("x"),
        ]);
        let sorter = DependencySorter::new(&g).unwrap();
        assert_eq!(sorter.sort(&["db"]).unwrap(), vec!["db"]);
        assert!(sorter.sort_all().is_err());
    }

    #[test]
    fn test_sort_unknown_name() {
        let g = graph(vec![ResourceDecl::process("db")]);
        let sorter = DependencySorter::new(&g).unwrap();
        assert!(matches!(
            sorter.sort(&["nope"]),
            Err(PlanError::UnknownResources { .. })
        ));
    }

    #[test]
    fn test_dependencies_of() {
        let g = graph(vec![
            ResourceDecl::process("db"),
            ResourceDecl::process("cache").depends_on("db"),
        ]);
        let sorter = DependencySorter::new(&g).unwrap();
        assert_eq!(sorter.dependencies_of("cache"), Some(vec!["db"]));
        assert_eq!(sorter.dependencies_of("db"), Some(vec![]));
    }

    /// Acyclic graph: resource `i` may only depend on resources declared before it,
    /// then the declarations are rotated so dependencies are not always declared first.
    fn acyclic_graph() -> impl Strategy<Value = Vec<ResourceDecl>> {
        (1usize..12)
            .prop_flat_map(|n| {
                (
                    proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n),
                    0..n,
                )
            })
            .prop_map(|(edges, rotate)| {
                let n = edges.len();
                let mut decls: Vec<ResourceDecl> = (0..n)
                    .map(|i| {
                        let mut decl = ResourceDecl::process(format!("r{i}"));
                        for j in 0..i {
                            if edges[i][j] {
                                decl = decl.depends_on(format!("r{j}"));
                            }
                        }
                        decl
                    })
                    .collect();
                decls.rotate_left(rotate);
                decls
            })
    }

    proptest! {
        #[test]
        fn prop_sort_places_dependencies_first(decls in acyclic_graph()) {
            let g = ResourceGraph::from_decls(decls).unwrap();
            let sorter = DependencySorter::new(&g).unwrap();
            let order = sorter.sort_all().unwrap();
            prop_assert_eq!(order.len(), g.len());
            for decl in g.iter() {
                let at = order.iter().position(|n| n == &decl.name).unwrap();
                for dep in &decl.dependencies {
                    let dep_at = order.iter().position(|n| n == dep).unwrap();
                    prop_assert!(dep_at < at);
                }
            }
        }

        #[test]
        fn prop_two_node_cycle_named_regardless_of_order(
            a in "[a-m]{1,6}",
            b in "[n-z]{1,6}",
            swap in any::<bool>(),
            filler in 0usize..4,
        ) {
            let mut decls = vec![
                ResourceDecl::process(a.clone()).depends_on(b.clone()),
                ResourceDecl::process(b.clone()).depends_on(a.clone()),
            ];
            if swap {
                decls.reverse();
            }
            for i in 0..filler {
                decls.insert(i % (decls.len() + 1), ResourceDecl::process(format!("free{i}")));
            }
            let g = ResourceGraph::from_decls(decls).unwrap();
            let sorter = DependencySorter::new(&g).unwrap();
            prop_assert_eq!(sorter.sort_all(), Err(PlanError::cycle(&a, &b)));
        }
    }
}
