//! Parameter slot type resolution.
//!
//! Several work units may feed the same parameter slot. Their declared types
//! must lie on one line of the type hierarchy; the most specific one wins.

use crate::error::{PlanError, PlanResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A declared type and its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    /// Type name
    pub name: String,
    /// Parent type, if any
    #[serde(default)]
    pub parent: Option<String>,
}

/// Single-inheritance type hierarchy
///
/// Types that were never declared are treated as roots with no parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeHierarchy {
    parents: IndexMap<String, Option<String>>,
}

impl TypeHierarchy {
    /// Build and validate a hierarchy
    ///
    /// # Errors
    ///
    /// Returns error on duplicates, unknown parents or cycles
    pub fn from_decls<'a>(decls: impl IntoIterator<Item = &'a TypeDecl>) -> PlanResult<Self> {
        let mut parents: IndexMap<String, Option<String>> = IndexMap::new();
        for decl in decls {
            if parents.contains_key(&decl.name) {
                return Err(PlanError::DuplicateName {
                    kind: "type",
                    name: decl.name.clone(),
                });
            }
            parents.insert(decl.name.clone(), decl.parent.clone());
        }

        let mut unknown: Vec<String> = parents
            .values()
            .flatten()
            .filter(|p| !parents.contains_key(p.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            unknown.dedup();
            return Err(PlanError::UnknownTypes { names: unknown });
        }

        let hierarchy = Self { parents };
        for name in hierarchy.parents.keys() {
            let mut steps = 0;
            let mut current = hierarchy.parent_of(name);
            while let Some(parent) = current {
                steps += 1;
                if steps > hierarchy.parents.len() {
                    return Err(PlanError::TypeCycle { name: name.clone() });
                }
                current = hierarchy.parent_of(parent);
            }
        }
        Ok(hierarchy)
    }

    fn parent_of(&self, name: &str) -> Option<&str> {
        self.parents.get(name).and_then(|p| p.as_deref())
    }

    /// Whether `specific` is `general` or one of its descendants
    #[must_use]
    pub fn is_a(&self, specific: &str, general: &str) -> bool {
        let mut current = Some(specific);
        while let Some(name) = current {
            if name == general {
                return true;
            }
            current = self.parent_of(name);
        }
        false
    }

    /// Resolve the type of a slot fed by several declarations
    ///
    /// # Errors
    ///
    /// Returns error naming two incompatible types, sorted
    pub fn resolve_slot<S: AsRef<str>>(&self, slot: &str, declared: &[S]) -> PlanResult<Option<String>> {
        let mut types: Vec<&str> = declared.iter().map(|s| s.as_ref()).collect();
        types.sort_unstable();
        types.dedup();

        let mut resolved: Option<&str> = None;
        for candidate in types {
            resolved = match resolved {
                None => Some(candidate),
                Some(current) if self.is_a(candidate, current) => Some(candidate),
                Some(current) if self.is_a(current, candidate) => Some(current),
                Some(current) => {
                    let (first, second) = if current < candidate {
                        (current, candidate)
                    } else {
                        (candidate, current)
                    };
                    return Err(PlanError::IncompatibleParameterTypes {
                        slot: slot.to_string(),
                        first: first.to_string(),
                        second: second.to_string(),
                    });
                }
            };
        }
        Ok(resolved.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, parent: Option<&str>) -> TypeDecl {
        TypeDecl {
            name: name.to_string(),
            parent: parent.map(str::to_string),
        }
    }

    fn hierarchy() -> TypeHierarchy {
        TypeHierarchy::from_decls(&[
            decl("Failure", None),
            decl("IoFailure", Some("Failure")),
            decl("SqlFailure", Some("IoFailure")),
            decl("ParseFailure", Some("Failure")),
        ])
        .unwrap()
    }

    #[test]
    fn test_is_a() {
        let h = hierarchy();
        assert!(h.is_a("SqlFailure", "Failure"));
        assert!(h.is_a("IoFailure", "IoFailure"));
        assert!(!h.is_a("Failure", "IoFailure"));
        assert!(!h.is_a("ParseFailure", "IoFailure"));
    }

    #[test]
    fn test_most_specific_wins() {
        let h = hierarchy();
        let resolved = h.resolve_slot("error", &["Failure", "SqlFailure", "IoFailure"]).unwrap();
        assert_eq!(resolved.as_deref(), Some("SqlFailure"));
    }

    #[test]
    fn test_incompatible_types_sorted() {
        let h = hierarchy();
        let err = h.resolve_slot("error", &["SqlFailure", "ParseFailure"]).unwrap_err();
        assert_eq!(
            err,
            PlanError::IncompatibleParameterTypes {
                slot: "error".to_string(),
                first: "ParseFailure".to_string(),
                second: "SqlFailure".to_string(),
            }
        );
    }

    #[test]
    fn test_undeclared_types_are_roots() {
        let h = TypeHierarchy::default();
        assert_eq!(h.resolve_slot("s", &["Order", "Order"]).unwrap().as_deref(), Some("Order"));
        assert!(h.resolve_slot("s", &["Order", "Invoice"]).is_err());
    }

    #[test]
    fn test_unknown_parent() {
        let err = TypeHierarchy::from_decls(&[decl("A", Some("Missing"))]).unwrap_err();
        assert_eq!(err, PlanError::UnknownTypes { names: vec!["Missing".to_string()] });
    }

    #[test]
    fn test_type_cycle() {
        let err = TypeHierarchy::from_decls(&[decl("A", Some("B")), decl("B", Some("A"))]).unwrap_err();
        assert!(matches!(err, PlanError::TypeCycle { .. }));
    }
}
