//! Escalations and escalation procedures.
//!
//! A failure raised by work is an [`Escalation`]: a typed, cloneable value.
//! Kinds form a single-inheritance taxonomy so a procedure can register a
//! handler for a general kind and receive every more specific one.
//!
//! Resolution runs thread procedure, then process procedure, then the fixed
//! [`TopLevelHandler`]. Handlers produce continuation chains; they never run
//! as plain callbacks.

use crate::context::NodeContext;
use crate::continuation::{Continuation, NodeResult};
use once_cell::sync::Lazy;
use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;
use strand_core::ProcessId;

struct KindInner {
    name: Cow<'static, str>,
    parent: Option<EscalationKind>,
}

/// Escalation type within the taxonomy
///
/// Identity is by reference: two kinds created separately with the same
/// name are different kinds.
#[derive(Clone)]
pub struct EscalationKind(Arc<KindInner>);

static FAILURE: Lazy<EscalationKind> = Lazy::new(|| EscalationKind::root("Failure"));
static PANIC: Lazy<EscalationKind> = Lazy::new(|| FAILURE.child("Panic"));
static RESOURCE_LOAD: Lazy<EscalationKind> = Lazy::new(|| FAILURE.child("ResourceLoad"));
static RESOURCE_RELEASE: Lazy<EscalationKind> = Lazy::new(|| FAILURE.child("ResourceRelease"));
static RUNTIME: Lazy<EscalationKind> = Lazy::new(|| FAILURE.child("Runtime"));

impl EscalationKind {
    /// Create a kind with no parent
    #[must_use]
    pub fn root(name: impl Into<Cow<'static, str>>) -> Self {
        Self(Arc::new(KindInner {
            name: name.into(),
            parent: None,
        }))
    }

    /// Create a more specific kind
    #[must_use]
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> Self {
        Self(Arc::new(KindInner {
            name: name.into(),
            parent: Some(self.clone()),
        }))
    }

    /// Root of the built-in taxonomy
    #[must_use]
    pub fn failure() -> &'static Self {
        &FAILURE
    }

    /// Panic raised by node behaviour
    #[must_use]
    pub fn panic() -> &'static Self {
        &PANIC
    }

    /// Resource construction failed
    #[must_use]
    pub fn resource_load() -> &'static Self {
        &RESOURCE_LOAD
    }

    /// Resource release failed
    #[must_use]
    pub fn resource_release() -> &'static Self {
        &RESOURCE_RELEASE
    }

    /// Misuse of the runtime by work
    #[must_use]
    pub fn runtime() -> &'static Self {
        &RUNTIME
    }

    /// Kind name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Parent kind
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.0.parent.as_ref()
    }

    /// This kind followed by each ancestor up to the root
    pub fn ancestry(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |kind| kind.parent())
    }

    /// Whether this kind is `general` or descends from it
    #[must_use]
    pub fn is_a(&self, general: &Self) -> bool {
        self.ancestry().any(|kind| kind == general)
    }
}

impl PartialEq for EscalationKind {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EscalationKind {}

impl std::fmt::Debug for EscalationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EscalationKind").field(&self.name()).finish()
    }
}

impl std::fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure raised while executing work
#[derive(Debug, Clone)]
pub struct Escalation {
    kind: EscalationKind,
    message: String,
    resource: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Escalation {
    /// Create an escalation of the given kind
    #[must_use]
    pub fn new(kind: &EscalationKind, message: impl Into<String>) -> Self {
        Self {
            kind: kind.clone(),
            message: message.into(),
            resource: None,
            source: None,
        }
    }

    /// Generic failure
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(EscalationKind::failure(), message)
    }

    /// Runtime misuse
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(EscalationKind::runtime(), message)
    }

    /// Escalation for a captured panic payload
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::new(EscalationKind::panic(), message)
    }

    /// Resource construction failure tagged with the resource
    #[must_use]
    pub fn resource_load(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EscalationKind::resource_load(), message).with_resource(resource)
    }

    /// Resource release failure tagged with the resource
    #[must_use]
    pub fn resource_release(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EscalationKind::resource_release(), message).with_resource(resource)
    }

    /// Tag the resource that failed
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach the underlying error
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Kind of this escalation
    #[must_use]
    pub fn kind(&self) -> &EscalationKind {
        &self.kind
    }

    /// Message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Resource that failed, if this is a resource-lifecycle failure
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Whether the kind is `general` or descends from it
    #[must_use]
    pub fn is_a(&self, general: &EscalationKind) -> bool {
        self.kind.is_a(general)
    }
}

impl std::fmt::Display for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(resource) = &self.resource {
            write!(f, " (resource {resource})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Escalation {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Builds the continuation chain that handles an escalation
pub trait EscalationHandler: Send + Sync {
    /// Create the handler chain
    fn create(&self, escalation: Escalation) -> Continuation;
}

/// Handler running a closure as a single node
struct NodeHandler<F> {
    name: Cow<'static, str>,
    logic: Arc<F>,
}

pub(crate) fn closure_handler<F>(kind: &EscalationKind, logic: F) -> Arc<dyn EscalationHandler>
where
    F: Fn(&mut NodeContext<'_>, Escalation) -> NodeResult + Send + Sync + 'static,
{
    Arc::new(NodeHandler {
        name: Cow::Owned(format!("handle {}", kind.name())),
        logic: Arc::new(logic),
    })
}

impl<F> EscalationHandler for NodeHandler<F>
where
    F: Fn(&mut NodeContext<'_>, Escalation) -> NodeResult + Send + Sync + 'static,
{
    fn create(&self, escalation: Escalation) -> Continuation {
        let logic = Arc::clone(&self.logic);
        Continuation::node(self.name.clone(), move |ctx| (*logic)(ctx, escalation))
    }
}

/// Ordered table from escalation kind to handler
#[derive(Clone, Default)]
pub struct EscalationProcedure {
    entries: Vec<(EscalationKind, Arc<dyn EscalationHandler>)>,
}

impl EscalationProcedure {
    /// Create an empty procedure
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure handler
    #[must_use]
    pub fn on<F>(self, kind: &EscalationKind, logic: F) -> Self
    where
        F: Fn(&mut NodeContext<'_>, Escalation) -> NodeResult + Send + Sync + 'static,
    {
        let handler = closure_handler(kind, logic);
        self.with_handler(kind, handler)
    }

    /// Register a handler object
    #[must_use]
    pub fn with_handler(mut self, kind: &EscalationKind, handler: Arc<dyn EscalationHandler>) -> Self {
        self.entries.push((kind.clone(), handler));
        self
    }

    /// Most specific handler for an escalation
    ///
    /// Walks the raised kind's ancestry; among entries for the same kind the
    /// one registered first wins.
    #[must_use]
    pub fn lookup(&self, escalation: &Escalation) -> Option<Arc<dyn EscalationHandler>> {
        escalation.kind().ancestry().find_map(|kind| {
            self.entries
                .iter()
                .find(|(registered, _)| registered == kind)
                .map(|(_, handler)| Arc::clone(handler))
        })
    }

    /// Number of registered entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handler is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for EscalationProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(kind, _)| kind.name()))
            .finish()
    }
}

/// Scope whose handler produced a chain
///
/// A failure inside a handler chain resumes lookup at the next wider scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscalationScope {
    /// Logical thread procedure
    Thread,
    /// Process procedure
    Process,
    /// Top-level handler
    TopLevel,
}

impl EscalationScope {
    /// Scope consulted for a failure raised under this one
    #[must_use]
    pub fn wider(self) -> Self {
        match self {
            Self::Thread => Self::Process,
            Self::Process | Self::TopLevel => Self::TopLevel,
        }
    }
}

/// Last-resort handler; must not fail
///
/// A failure or panic here aborts the process.
pub trait TopLevelHandler: Send + Sync {
    /// Handle an escalation no procedure matched
    ///
    /// # Errors
    ///
    /// Returning an error aborts the process
    fn handle(&self, process: ProcessId, escalation: &Escalation) -> Result<(), Escalation>;
}

/// Logs unhandled escalations
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTopLevelHandler;

impl TopLevelHandler for LoggingTopLevelHandler {
    fn handle(&self, process: ProcessId, escalation: &Escalation) -> Result<(), Escalation> {
        tracing::error!(
            process = %process,
            kind = %escalation.kind(),
            resource = escalation.resource().unwrap_or("-"),
            "unhandled escalation: {}",
            escalation.message()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ancestry() {
        let io = EscalationKind::failure().child("Io");
        let sql = io.child("Sql");
        let names: Vec<&str> = sql.ancestry().map(EscalationKind::name).collect();
        assert_eq!(names, vec!["Sql", "Io", "Failure"]);
        assert!(sql.is_a(&io));
        assert!(sql.is_a(EscalationKind::failure()));
        assert!(!io.is_a(&sql));
    }

    #[test]
    fn test_kind_identity_by_reference() {
        let a = EscalationKind::root("Same");
        let b = EscalationKind::root("Same");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(EscalationKind::panic().parent(), Some(EscalationKind::failure()));
    }

    #[test]
    fn test_escalation_display() {
        let esc = Escalation::resource_load("db", "connection refused");
        assert_eq!(esc.to_string(), "ResourceLoad: connection refused (resource db)");
        assert_eq!(esc.resource(), Some("db"));
        assert!(esc.is_a(EscalationKind::failure()));
    }

    #[test]
    fn test_escalation_source_chain() {
        let io = std::io::Error::other("disk gone");
        let esc = Escalation::failure("flush failed").with_source(io);
        let source = std::error::Error::source(&esc).unwrap();
        assert_eq!(source.to_string(), "disk gone");
    }

    #[test]
    fn test_panic_payloads() {
        assert_eq!(Escalation::from_panic(Box::new("boom")).message(), "boom");
        assert_eq!(Escalation::from_panic(Box::new("owned".to_string())).message(), "owned");
        let esc = Escalation::from_panic(Box::new(7_u8));
        assert_eq!(esc.kind(), EscalationKind::panic());
    }

    #[test]
    fn test_lookup_most_specific() {
        let io = EscalationKind::failure().child("Io");
        let sql = io.child("Sql");
        let procedure = EscalationProcedure::new()
            .on(EscalationKind::failure(), |_, _| Ok(None))
            .on(&io, |_, _| Ok(None));

        let handler = procedure.lookup(&Escalation::new(&sql, "x")).unwrap();
        assert_eq!(handler.create(Escalation::new(&sql, "x")).names(), vec!["handle Io"]);

        let handler = procedure.lookup(&Escalation::failure("y")).unwrap();
        assert_eq!(handler.create(Escalation::failure("y")).names(), vec!["handle Failure"]);
    }

    #[test]
    fn test_lookup_no_match() {
        let io = EscalationKind::failure().child("Io");
        let procedure = EscalationProcedure::new().on(&io, |_, _| Ok(None));
        assert!(procedure.lookup(&Escalation::runtime("z")).is_none());
        assert!(EscalationProcedure::new().is_empty());
    }

    #[test]
    fn test_scope_widening() {
        assert_eq!(EscalationScope::Thread.wider(), EscalationScope::Process);
        assert_eq!(EscalationScope::Process.wider(), EscalationScope::TopLevel);
        assert_eq!(EscalationScope::TopLevel.wider(), EscalationScope::TopLevel);
    }
}
