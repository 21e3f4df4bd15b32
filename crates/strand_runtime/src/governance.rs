//! Governance: cross-cutting policy scoped to a logical thread.
//!
//! Each logical thread carries one activation flag per declared policy.
//! Every active policy is disregarded before an escalation handler runs and
//! before the thread tears down. Re-activation is always explicit work.

use crate::context::NodeContext;
use crate::continuation::{Bindings, Continuation};
use crate::escalation::Escalation;
use crate::office::OfficeShared;
use bitvec::vec::BitVec;
use std::sync::Arc;
use strand_core::GovernanceIndex;

/// Cross-cutting policy such as transaction demarcation
pub trait Governance: Send + Sync {
    /// Begin governing the logical thread
    ///
    /// # Errors
    ///
    /// Returns error if the policy cannot start
    fn activate(&self, _ctx: &mut NodeContext<'_>) -> Result<(), Escalation> {
        Ok(())
    }

    /// Complete the governed work (e.g. commit)
    ///
    /// # Errors
    ///
    /// Returns error if enforcement fails
    fn enforce(&self, _ctx: &mut NodeContext<'_>) -> Result<(), Escalation> {
        Ok(())
    }

    /// Abandon the governed work (e.g. roll back)
    ///
    /// # Errors
    ///
    /// Returns error if the policy cannot be abandoned cleanly
    fn disregard(&self, _ctx: &mut NodeContext<'_>) -> Result<(), Escalation> {
        Ok(())
    }
}

/// Activation flags of one logical thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernanceFlags {
    bits: BitVec,
}

impl GovernanceFlags {
    /// All policies inactive
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    /// Whether a policy is active
    #[must_use]
    pub fn is_active(&self, index: GovernanceIndex) -> bool {
        self.bits.get(index.0).is_some_and(|bit| *bit)
    }

    /// Set a policy's flag; out-of-range indexes are ignored
    pub fn set(&mut self, index: GovernanceIndex, active: bool) {
        if index.0 < self.bits.len() {
            self.bits.set(index.0, active);
        }
    }

    /// Active policies in index order
    pub fn active(&self) -> impl Iterator<Item = GovernanceIndex> + '_ {
        self.bits.iter_ones().map(GovernanceIndex)
    }

    /// Whether any policy is active
    #[must_use]
    pub fn any(&self) -> bool {
        self.bits.any()
    }
}

/// Policy wired into an office
pub(crate) struct GovernanceEntry {
    pub(crate) name: String,
    pub(crate) policy: Arc<dyn Governance>,
    pub(crate) bindings: Arc<Bindings>,
}

/// Cleanup chain disregarding every active policy
pub(crate) fn deactivate_all(office: &OfficeShared, flags: &GovernanceFlags) -> Continuation {
    flags
        .active()
        .map(|index| disregard_node(office, index))
        .fold(Continuation::done(), Continuation::then)
}

fn disregard_node(office: &OfficeShared, index: GovernanceIndex) -> Continuation {
    let (name, bindings) = match office.governance.get(index.0) {
        Some(entry) => (entry.name.as_str(), Arc::clone(&entry.bindings)),
        None => ("governance", Bindings::none()),
    };
    Continuation::cleanup(format!("disregard {name}"), move |ctx| {
        ctx.disregard_governance(index)?;
        Ok(None)
    })
    .with_bindings(bindings)
}
