//! Work units.
//!
//! A work unit is an immutable descriptor built once with the office and
//! shared by every process that runs it: its team, its resource bindings in
//! slot order and load order, the governance it activates and its logic.

use crate::context::NodeContext;
use crate::continuation::{Bindings, Continuation, NodeResult};
use crate::escalation::{Escalation, EscalationHandler};
use std::any::Any;
use std::sync::Arc;
use strand_core::{GovernanceIndex, TeamId};

/// Value handed to a work unit when it is invoked
pub type Argument = Option<Box<dyn Any + Send>>;

/// Take a typed value out of an argument
#[must_use]
pub fn take_argument<T: Any>(argument: Argument) -> Option<T> {
    argument?.downcast::<T>().ok().map(|value| *value)
}

/// Logic of a work unit
pub trait WorkLogic: Send + Sync {
    /// Run the logic
    ///
    /// # Errors
    ///
    /// Returns the escalation to raise
    fn execute(&self, ctx: &mut NodeContext<'_>, argument: Argument) -> NodeResult;
}

impl<F> WorkLogic for F
where
    F: Fn(&mut NodeContext<'_>, Argument) -> NodeResult + Send + Sync,
{
    fn execute(&self, ctx: &mut NodeContext<'_>, argument: Argument) -> NodeResult {
        self(ctx, argument)
    }
}

/// Compiled work unit
pub struct WorkUnit {
    pub(crate) name: String,
    pub(crate) team: TeamId,
    pub(crate) bindings: Arc<Bindings>,
    pub(crate) governance: Vec<GovernanceIndex>,
    pub(crate) logic: Arc<dyn WorkLogic>,
}

impl WorkUnit {
    /// Work unit name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigned team
    #[must_use]
    pub fn team(&self) -> TeamId {
        self.team
    }

    /// Bindings in slot and load order
    #[must_use]
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Node running this unit with an argument
    ///
    /// Declared governance is activated before the logic runs.
    #[must_use]
    pub fn node(self: &Arc<Self>, argument: Argument) -> Continuation {
        let unit = Arc::clone(self);
        Continuation::node(self.name.clone(), move |ctx| {
            for &governance in &unit.governance {
                ctx.activate_governance(governance)?;
            }
            unit.logic.execute(ctx, argument)
        })
        .with_bindings(Arc::clone(&self.bindings))
        .on_team(self.team)
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("bindings", &self.bindings)
            .field("governance", &self.governance)
            .finish_non_exhaustive()
    }
}

/// Escalation handler running a work unit with the escalation as argument
pub struct WorkUnitHandler {
    unit: Arc<WorkUnit>,
}

impl WorkUnitHandler {
    /// Handler delegating to `unit`
    #[must_use]
    pub fn new(unit: Arc<WorkUnit>) -> Self {
        Self { unit }
    }
}

impl EscalationHandler for WorkUnitHandler {
    fn create(&self, escalation: Escalation) -> Continuation {
        self.unit.node(Some(Box::new(escalation)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_argument() {
        let argument: Argument = Some(Box::new(42_u32));
        assert_eq!(take_argument::<u32>(argument), Some(42));
        let argument: Argument = Some(Box::new("text"));
        assert_eq!(take_argument::<u32>(argument), None);
        assert_eq!(take_argument::<u32>(None), None);
    }

    #[test]
    fn test_node_carries_team_and_bindings() {
        fn logic(_: &mut NodeContext<'_>, _: Argument) -> NodeResult {
            Ok(None)
        }
        let unit = Arc::new(WorkUnit {
            name: "read".to_string(),
            team: TeamId(3),
            bindings: Arc::new(Bindings {
                declared: vec![strand_core::ResourceIndex::process(1)],
                load_order: vec![strand_core::ResourceIndex::process(0), strand_core::ResourceIndex::process(1)],
            }),
            governance: Vec::new(),
            logic: Arc::new(logic),
        });
        let chain = unit.node(None);
        let head = chain.iter().next().unwrap();
        assert_eq!(head.name(), "read");
        assert_eq!(head.team(), Some(TeamId(3)));
        assert_eq!(head.bindings.load_order.len(), 2);
    }
}
