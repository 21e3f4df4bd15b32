//! Continuation nodes and chains.
//!
//! A [`Continuation`] is a singly-linked chain of owned [`FunctionState`]
//! nodes. Executing a node returns the chain to splice in front of the
//! remaining work instead of calling it, so "do A then B" never grows the
//! call stack. Every operation on a chain is iterative.

use crate::context::NodeContext;
use crate::escalation::{Escalation, EscalationScope};
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::sync::Arc;
use strand_core::{ResourceIndex, TeamId};

/// Outcome of executing a node: an optional replacement chain, or a failure
pub type NodeResult = Result<Option<Continuation>, Escalation>;

/// Behaviour of a node; executed at most once
pub trait Behaviour: Send + 'static {
    /// Execute the node
    ///
    /// # Errors
    ///
    /// Returns the escalation to raise on the node's logical thread
    fn execute(self: Box<Self>, ctx: &mut NodeContext<'_>) -> NodeResult;
}

impl<F> Behaviour for F
where
    F: FnOnce(&mut NodeContext<'_>) -> NodeResult + Send + 'static,
{
    fn execute(self: Box<Self>, ctx: &mut NodeContext<'_>) -> NodeResult {
        (*self)(ctx)
    }
}

/// Behaviour left behind once a node's real behaviour has been taken
struct Spent;

impl Behaviour for Spent {
    fn execute(self: Box<Self>, _ctx: &mut NodeContext<'_>) -> NodeResult {
        Err(Escalation::runtime("node executed twice"))
    }
}

/// Resources a node binds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    /// Bound resources in slot order
    pub declared: Vec<ResourceIndex>,
    /// Resources ensured ready before execution, dependencies first
    pub load_order: Vec<ResourceIndex>,
}

static NO_BINDINGS: Lazy<Arc<Bindings>> = Lazy::new(|| Arc::new(Bindings::default()));

impl Bindings {
    /// Shared empty bindings
    #[must_use]
    pub fn none() -> Arc<Self> {
        Arc::clone(&NO_BINDINGS)
    }
}

/// Whether a node survives cancellation and escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Ordinary work, discarded when its chain is abandoned
    Work,
    /// Teardown work that always runs
    Cleanup,
}

/// One schedulable node
///
/// The originating logical thread is the one whose job owns the chain.
pub struct FunctionState {
    pub(crate) name: Cow<'static, str>,
    behaviour: Box<dyn Behaviour>,
    pub(crate) bindings: Arc<Bindings>,
    pub(crate) team: Option<TeamId>,
    pub(crate) thread_safe: bool,
    pub(crate) role: NodeRole,
    pub(crate) handling: Option<EscalationScope>,
    next: Continuation,
}

impl FunctionState {
    /// Create a work node from a boxed behaviour
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, behaviour: Box<dyn Behaviour>) -> Self {
        Self {
            name: name.into(),
            behaviour,
            bindings: Bindings::none(),
            team: None,
            thread_safe: false,
            role: NodeRole::Work,
            handling: None,
            next: Continuation::Done,
        }
    }

    /// Node name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node role
    #[must_use]
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Team the node must run on, if pinned
    #[must_use]
    pub fn team(&self) -> Option<TeamId> {
        self.team
    }

    /// Whether the node takes the process thread-safety lock
    #[must_use]
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    pub(crate) fn take_behaviour(&mut self) -> Box<dyn Behaviour> {
        std::mem::replace(&mut self.behaviour, Box::new(Spent))
    }
}

impl Drop for FunctionState {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse on drop
        let mut next = std::mem::take(&mut self.next);
        while let Continuation::Node(mut node) = next {
            next = std::mem::take(&mut node.next);
        }
    }
}

impl std::fmt::Debug for FunctionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionState")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("team", &self.team)
            .field("thread_safe", &self.thread_safe)
            .finish_non_exhaustive()
    }
}

/// Chain of pending nodes
#[derive(Debug, Default)]
pub enum Continuation {
    /// Head node; the rest of the chain hangs off it
    Node(Box<FunctionState>),
    /// Nothing left to run
    #[default]
    Done,
}

impl Continuation {
    /// Empty chain
    #[must_use]
    pub fn done() -> Self {
        Self::Done
    }

    /// Single work node running a closure
    #[must_use]
    pub fn node<F>(name: impl Into<Cow<'static, str>>, behaviour: F) -> Self
    where
        F: FnOnce(&mut NodeContext<'_>) -> NodeResult + Send + 'static,
    {
        Self::from_state(FunctionState::new(name, Box::new(behaviour)))
    }

    /// Single cleanup node running a closure
    #[must_use]
    pub fn cleanup<F>(name: impl Into<Cow<'static, str>>, behaviour: F) -> Self
    where
        F: FnOnce(&mut NodeContext<'_>) -> NodeResult + Send + 'static,
    {
        let mut state = FunctionState::new(name, Box::new(behaviour));
        state.role = NodeRole::Cleanup;
        Self::from_state(state)
    }

    /// Chain holding a single prepared node
    #[must_use]
    pub fn from_state(state: FunctionState) -> Self {
        Self::Node(Box::new(state))
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Append `second` after the tail of this chain
    #[must_use]
    pub fn then(mut self, second: Continuation) -> Self {
        if second.is_done() {
            return self;
        }
        let mut cursor = &mut self;
        while let Self::Node(node) = cursor {
            cursor = &mut node.next;
        }
        *cursor = second;
        self
    }

    /// Detach the head node
    pub fn pop(&mut self) -> Option<Box<FunctionState>> {
        match std::mem::take(self) {
            Self::Node(mut node) => {
                *self = std::mem::take(&mut node.next);
                Some(node)
            }
            Self::Done => None,
        }
    }

    /// Put a detached node back at the head
    pub fn push_front(&mut self, mut node: Box<FunctionState>) {
        node.next = std::mem::take(&mut node.next).then(std::mem::take(self));
        *self = Self::Node(node);
    }

    /// Drop every work node, keeping cleanup nodes in order
    ///
    /// Returns the number of nodes dropped.
    pub fn discard_work(&mut self) -> usize {
        let mut kept = Vec::new();
        let mut dropped = 0;
        while let Some(node) = self.pop() {
            match node.role {
                NodeRole::Cleanup => kept.push(node),
                NodeRole::Work => dropped += 1,
            }
        }
        for mut node in kept.into_iter().rev() {
            node.next = std::mem::take(self);
            *self = Self::Node(node);
        }
        dropped
    }

    /// Pin every node to a team
    #[must_use]
    pub fn on_team(mut self, team: TeamId) -> Self {
        self.for_each_mut(|node| node.team = Some(team));
        self
    }

    /// Bind resources on the head node
    #[must_use]
    pub fn with_bindings(mut self, bindings: Arc<Bindings>) -> Self {
        if let Self::Node(node) = &mut self {
            node.bindings = bindings;
        }
        self
    }

    /// Tag every node as requiring thread-state safety
    #[must_use]
    pub fn thread_safe(mut self) -> Self {
        self.for_each_mut(|node| node.thread_safe = true);
        self
    }

    /// Mark every node as cleanup
    #[must_use]
    pub fn as_cleanup(mut self) -> Self {
        self.for_each_mut(|node| node.role = NodeRole::Cleanup);
        self
    }

    /// Tag untagged nodes with the escalation scope that produced them
    #[must_use]
    pub(crate) fn handled_by(mut self, scope: EscalationScope) -> Self {
        self.for_each_mut(|node| {
            node.handling.get_or_insert(scope);
        });
        self
    }

    /// Propagate a parent node's tags to the chain it produced
    pub(crate) fn inherit(&mut self, parent: &FunctionState) {
        let (role, thread_safe, handling) = (parent.role, parent.thread_safe, parent.handling);
        self.for_each_mut(|node| {
            if role == NodeRole::Cleanup {
                node.role = NodeRole::Cleanup;
            }
            node.thread_safe |= thread_safe;
            if node.handling.is_none() {
                node.handling = handling;
            }
        });
    }

    /// Team of the head node, if pinned
    #[must_use]
    pub fn head_team(&self) -> Option<TeamId> {
        match self {
            Self::Node(node) => node.team,
            Self::Done => None,
        }
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Node names in chain order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(FunctionState::name).collect()
    }

    /// Iterate nodes in chain order
    pub fn iter(&self) -> impl Iterator<Item = &FunctionState> {
        let mut cursor = self;
        std::iter::from_fn(move || match cursor {
            Self::Node(node) => {
                cursor = &node.next;
                Some(&**node)
            }
            Self::Done => None,
        })
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(&mut FunctionState)) {
        let mut cursor = self;
        while let Self::Node(node) = cursor {
            f(node);
            cursor = &mut node.next;
        }
    }
}

impl From<FunctionState> for Continuation {
    fn from(state: FunctionState) -> Self {
        Self::from_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn work(name: &'static str) -> Continuation {
        Continuation::node(name, |_| Ok(None))
    }

    fn cleanup(name: &'static str) -> Continuation {
        Continuation::cleanup(name, |_| Ok(None))
    }

    fn noop(_: &mut NodeContext<'_>) -> NodeResult {
        Ok(None)
    }

    fn state(name: &'static str) -> FunctionState {
        FunctionState::new(name, Box::new(noop))
    }

    #[test]
    fn test_then_appends_after_tail() {
        let chain = work("a").then(work("b")).then(work("c"));
        assert_eq!(chain.names(), vec!["a", "b", "c"]);

        let nested = work("a").then(work("b").then(work("c")));
        assert_eq!(nested.names(), vec!["a", "b", "c"]);
        assert_eq!(Continuation::done().then(work("x")).names(), vec!["x"]);
    }

    #[test]
    fn test_pop_and_push_front() {
        let mut chain = work("a").then(work("b"));
        let head = chain.pop().unwrap();
        assert_eq!(head.name(), "a");
        assert_eq!(chain.names(), vec!["b"]);
        chain.push_front(head);
        assert_eq!(chain.names(), vec!["a", "b"]);
        assert_eq!(chain.len(), 2);
        assert!(Continuation::done().pop().is_none());
    }

    #[test]
    fn test_discard_work_keeps_cleanup() {
        let mut chain = work("a").then(cleanup("c1")).then(work("b")).then(cleanup("c2"));
        assert_eq!(chain.discard_work(), 2);
        assert_eq!(chain.names(), vec!["c1", "c2"]);
        assert!(chain.iter().all(|n| n.role() == NodeRole::Cleanup));
    }

    #[test]
    fn test_tagging() {
        let chain = work("a").then(work("b")).thread_safe().on_team(TeamId(2));
        assert!(chain.iter().all(|n| n.is_thread_safe() && n.team() == Some(TeamId(2))));
        assert_eq!(chain.head_team(), Some(TeamId(2)));
        let chain = chain.as_cleanup();
        assert!(chain.iter().all(|n| n.role() == NodeRole::Cleanup));
    }

    #[test]
    fn test_inherit_from_cleanup_parent() {
        let mut parent = state("release");
        parent.role = NodeRole::Cleanup;
        parent.thread_safe = true;
        parent.handling = Some(EscalationScope::Process);

        let mut chain = work("flush").then(work("close"));
        chain.inherit(&parent);
        for node in chain.iter() {
            assert_eq!(node.role(), NodeRole::Cleanup);
            assert!(node.is_thread_safe());
            assert_eq!(node.handling, Some(EscalationScope::Process));
        }
    }

    #[test]
    fn test_handled_by_keeps_existing_tag() {
        let mut first = state("inner");
        first.handling = Some(EscalationScope::Process);
        let chain = Continuation::from(first).then(work("outer")).handled_by(EscalationScope::Thread);
        let tags: Vec<_> = chain.iter().map(|n| n.handling).collect();
        assert_eq!(tags, vec![Some(EscalationScope::Process), Some(EscalationScope::Thread)]);
    }

    #[test]
    fn test_long_chain_drops_without_recursion() {
        let mut chain = Continuation::done();
        for _ in 0..200_000 {
            let mut node = state("n");
            node.next = chain;
            chain = Continuation::from(node);
        }
        assert_eq!(chain.len(), 200_000);
        drop(chain);
    }

    proptest! {
        #[test]
        fn prop_discard_work_preserves_cleanup_order(roles in proptest::collection::vec(any::<bool>(), 0..40)) {
            let mut chain = Continuation::done();
            let mut expected = Vec::new();
            for (i, is_cleanup) in roles.iter().enumerate() {
                let name = format!("n{i}");
                let node = if *is_cleanup {
                    expected.push(name.clone());
                    Continuation::cleanup(name, |_| Ok(None))
                } else {
                    Continuation::node(name, |_| Ok(None))
                };
                chain = chain.then(node);
            }
            let dropped = chain.discard_work();
            prop_assert_eq!(dropped, roles.len() - expected.len());
            prop_assert_eq!(chain.names(), expected.iter().map(String::as_str).collect::<Vec<_>>());
        }
    }
}
