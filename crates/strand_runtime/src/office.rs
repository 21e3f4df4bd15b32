//! Office: the built runtime and its entry API.
//!
//! An [`OfficeBuilder`] pairs a name-level [`OfficePlan`] with runtime
//! implementations (teams, resource sources, governance policies, work
//! logic), compiles the plan and wires every index. The resulting
//! [`Office`] is a cheap clone handle; processes are started with
//! [`Office::invoke`].

use crate::config::{RuntimeConfig, TeamKind};
use crate::container::{self, ManagedObjectSource};
use crate::context::NodeContext;
use crate::continuation::{Bindings, Continuation, NodeResult};
use crate::dispatch::Job;
use crate::error::{BuildError, RuntimeError};
use crate::escalation::{
    self, Escalation, EscalationHandler, EscalationKind, EscalationProcedure, LoggingTopLevelHandler, TopLevelHandler,
};
use crate::executive::{DefaultExecutive, Executive, Profiler, ThreadLocalAwareExecutor};
use crate::governance::{Governance, GovernanceEntry};
use crate::process::{CompletionCallback, ProcessCompletion, ProcessHandle, ProcessState};
use crate::team::{ManualTeam, Team, WorkerTeam};
use crate::thread::ThreadState;
use crate::work::{Argument, WorkLogic, WorkUnit, WorkUnitHandler};
use indexmap::IndexMap;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strand_core::{LogicalThreadId, ResourceIndex, ResourceScope, TeamId};
use strand_plan::{CompiledPlan, GovernanceDecl, OfficePlan, ResourceDecl, WorkUnitDecl};
use tracing::{error, info, warn};

/// Everything a process reads from its office; immutable once built
pub(crate) struct OfficeShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) plan: CompiledPlan,
    pub(crate) teams: Vec<Arc<dyn Team>>,
    process_sources: Vec<Arc<dyn ManagedObjectSource>>,
    thread_sources: Vec<Arc<dyn ManagedObjectSource>>,
    pub(crate) governance: Vec<GovernanceEntry>,
    pub(crate) work_units: IndexMap<String, Arc<WorkUnit>>,
    pub(crate) procedure: EscalationProcedure,
    pub(crate) executive: Arc<dyn Executive>,
    pub(crate) profiler: Option<Arc<dyn Profiler>>,
    pub(crate) top_level: Arc<dyn TopLevelHandler>,
    pub(crate) thread_local_executor: Option<Arc<dyn ThreadLocalAwareExecutor>>,
    shut_down: AtomicBool,
}

impl OfficeShared {
    /// Queue a job on the team it names
    pub(crate) fn assign(&self, job: Job) {
        match self.teams.get(job.team.0) {
            Some(team) => team.assign(job),
            None => error!(team = %job.team, process = %job.process_id(), "job names an unknown team, dropping"),
        }
    }

    pub(crate) fn source(&self, index: ResourceIndex) -> Option<&Arc<dyn ManagedObjectSource>> {
        match index.scope {
            ResourceScope::Process => self.process_sources.get(index.index),
            ResourceScope::Thread => self.thread_sources.get(index.index),
        }
    }

    pub(crate) fn resource_name(&self, index: ResourceIndex) -> &str {
        self.plan.resource(index).map_or("unknown", |r| r.name.as_str())
    }

    pub(crate) fn resource_index(&self, name: &str) -> Option<ResourceIndex> {
        self.plan
            .process_resources
            .iter()
            .chain(&self.plan.thread_resources)
            .find(|r| r.name == name)
            .map(|r| r.index)
    }

    pub(crate) fn profiling(&self) -> bool {
        self.config.profile && self.profiler.is_some()
    }

    /// Release nodes for a teardown order
    pub(crate) fn release_chain(&self, order: &[ResourceIndex]) -> Continuation {
        order
            .iter()
            .map(|&index| container::release_node(self, index))
            .fold(Continuation::done(), Continuation::then)
    }
}

/// Starts a process
pub struct Invocation {
    work_unit: String,
    argument: Argument,
    completion: Continuation,
    callback: Option<CompletionCallback>,
    procedure: Option<EscalationProcedure>,
}

impl Invocation {
    /// Invoke a work unit with no argument
    #[must_use]
    pub fn new(work_unit: impl Into<String>) -> Self {
        Self {
            work_unit: work_unit.into(),
            argument: None,
            completion: Continuation::done(),
            callback: None,
            procedure: None,
        }
    }

    /// Argument handed to the work unit
    #[must_use]
    pub fn with_argument<T: Any + Send>(mut self, argument: T) -> Self {
        self.argument = Some(Box::new(argument));
        self
    }

    /// Chain run as the last step of process completion
    #[must_use]
    pub fn with_completion(mut self, completion: Continuation) -> Self {
        self.completion = completion;
        self
    }

    /// Callback fired exactly once, after all cleanup
    #[must_use]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ProcessCompletion) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Process escalation procedure, replacing the office's
    #[must_use]
    pub fn with_procedure(mut self, procedure: EscalationProcedure) -> Self {
        self.procedure = Some(procedure);
        self
    }
}

/// Built office
#[derive(Clone)]
pub struct Office {
    shared: Arc<OfficeShared>,
}

impl Office {
    pub(crate) fn from_shared(shared: Arc<OfficeShared>) -> Self {
        Self { shared }
    }

    /// Start a process running a work unit
    ///
    /// The entry node is queued on the unit's team; nothing runs on the
    /// calling stack.
    ///
    /// # Errors
    ///
    /// Returns error if the work unit is unknown or the office is shut down
    pub fn invoke(&self, invocation: Invocation) -> Result<ProcessHandle, RuntimeError> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(RuntimeError::ShutDown);
        }
        let unit = self
            .shared
            .work_units
            .get(&invocation.work_unit)
            .ok_or_else(|| RuntimeError::UnknownWorkUnit {
                name: invocation.work_unit.clone(),
            })?;

        let id = self.shared.executive.create_process_identifier();
        let main = LogicalThreadId::new();
        let procedure = invocation
            .procedure
            .unwrap_or_else(|| self.shared.procedure.clone());
        let process = ProcessState::new(Arc::clone(&self.shared), id, main, procedure, invocation.callback);
        let thread = ThreadState::new(
            main,
            true,
            self.shared.governance.len(),
            None,
            invocation.completion,
        );

        info!(process = %id, work_unit = %unit.name(), team = %unit.team(), "process invoked");
        let job = Job::new(Arc::clone(&process), thread, unit.node(invocation.argument), unit.team());
        self.shared.assign(job);
        Ok(ProcessHandle::new(process))
    }

    /// Compiled work unit
    #[must_use]
    pub fn work_unit(&self, name: &str) -> Option<Arc<WorkUnit>> {
        self.shared.work_units.get(name).cloned()
    }

    /// Team handle by name
    #[must_use]
    pub fn team_id(&self, name: &str) -> Option<TeamId> {
        self.shared.plan.teams.get(name).copied()
    }

    /// Team by handle
    #[must_use]
    pub fn team(&self, id: TeamId) -> Option<Arc<dyn Team>> {
        self.shared.teams.get(id.0).cloned()
    }

    /// Compiled plan the office runs
    #[must_use]
    pub fn plan(&self) -> &CompiledPlan {
        &self.shared.plan
    }

    /// Refuse new invocations and stop every team
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for team in &self.shared.teams {
            team.stop();
        }
        info!("office shut down");
    }

    /// Whether the office has been shut down
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Office {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Office")
            .field("teams", &self.shared.plan.teams.keys().collect::<Vec<_>>())
            .field("work_units", &self.shared.work_units.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

enum ProcedureEntry {
    Handler(EscalationKind, Arc<dyn EscalationHandler>),
    WorkUnit(EscalationKind, String),
}

/// Builds an [`Office`]
pub struct OfficeBuilder {
    config: RuntimeConfig,
    plan: OfficePlan,
    teams: IndexMap<String, Arc<dyn Team>>,
    duplicate_team: Option<String>,
    sources: IndexMap<String, Arc<dyn ManagedObjectSource>>,
    policies: IndexMap<String, Arc<dyn Governance>>,
    logic: IndexMap<String, Arc<dyn WorkLogic>>,
    procedure: Vec<ProcedureEntry>,
    executive: Option<Arc<dyn Executive>>,
    profiler: Option<Arc<dyn Profiler>>,
    top_level: Option<Arc<dyn TopLevelHandler>>,
    thread_local_executor: Option<Arc<dyn ThreadLocalAwareExecutor>>,
}

impl Default for OfficeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OfficeBuilder {
    /// Empty builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::from_plan(OfficePlan::new())
    }

    /// Builder over an existing plan; implementations are bound by name
    #[must_use]
    pub fn from_plan(plan: OfficePlan) -> Self {
        Self {
            config: RuntimeConfig::default(),
            plan,
            teams: IndexMap::new(),
            duplicate_team: None,
            sources: IndexMap::new(),
            policies: IndexMap::new(),
            logic: IndexMap::new(),
            procedure: Vec::new(),
            executive: None,
            profiler: None,
            top_level: None,
            thread_local_executor: None,
        }
    }

    /// Runtime configuration; its teams are started by `build`
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a team
    #[must_use]
    pub fn team(mut self, team: Arc<dyn Team>) -> Self {
        let name = team.name().to_string();
        if self.teams.insert(name.clone(), team).is_some() {
            self.duplicate_team.get_or_insert(name);
        }
        self
    }

    /// Declare a resource with its source
    #[must_use]
    pub fn resource(mut self, decl: ResourceDecl, source: impl ManagedObjectSource + 'static) -> Self {
        self.sources.insert(decl.name.clone(), Arc::new(source));
        self.plan.resources.push(decl);
        self
    }

    /// Bind a source to a resource declared by the plan
    #[must_use]
    pub fn source(mut self, name: impl Into<String>, source: Arc<dyn ManagedObjectSource>) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    /// Declare a governance policy with the resources it touches
    #[must_use]
    pub fn governance<I, S>(mut self, name: &str, resources: I, policy: impl Governance + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies.insert(name.to_string(), Arc::new(policy));
        self.plan.governance.push(GovernanceDecl {
            name: name.to_string(),
            resources: resources.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Bind a policy to governance declared by the plan
    #[must_use]
    pub fn policy(mut self, name: impl Into<String>, policy: Arc<dyn Governance>) -> Self {
        self.policies.insert(name.into(), policy);
        self
    }

    /// Declare a work unit with its logic
    #[must_use]
    pub fn work_unit<F>(mut self, decl: WorkUnitDecl, logic: F) -> Self
    where
        F: Fn(&mut NodeContext<'_>, Argument) -> NodeResult + Send + Sync + 'static,
    {
        self.logic.insert(decl.name.clone(), Arc::new(logic));
        self.plan.work_units.push(decl);
        self
    }

    /// Bind logic to a work unit declared by the plan
    #[must_use]
    pub fn logic(mut self, name: impl Into<String>, logic: Arc<dyn WorkLogic>) -> Self {
        self.logic.insert(name.into(), logic);
        self
    }

    /// Process-level handler running a closure
    #[must_use]
    pub fn escalation<F>(mut self, kind: &EscalationKind, handler: F) -> Self
    where
        F: Fn(&mut NodeContext<'_>, Escalation) -> NodeResult + Send + Sync + 'static,
    {
        let handler = escalation::closure_handler(kind, handler);
        self.procedure.push(ProcedureEntry::Handler(kind.clone(), handler));
        self
    }

    /// Process-level handler object
    #[must_use]
    pub fn escalation_handler(mut self, kind: &EscalationKind, handler: Arc<dyn EscalationHandler>) -> Self {
        self.procedure.push(ProcedureEntry::Handler(kind.clone(), handler));
        self
    }

    /// Process-level handler delegating to a work unit
    ///
    /// The escalation becomes the work unit's argument.
    #[must_use]
    pub fn escalation_work_unit(mut self, kind: &EscalationKind, work_unit: impl Into<String>) -> Self {
        self.procedure.push(ProcedureEntry::WorkUnit(kind.clone(), work_unit.into()));
        self
    }

    /// Process identity provider
    #[must_use]
    pub fn executive(mut self, executive: Arc<dyn Executive>) -> Self {
        self.executive = Some(executive);
        self
    }

    /// Profiling hook; records are collected when configuration enables it
    #[must_use]
    pub fn profiler(mut self, profiler: Arc<dyn Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Last-resort escalation handler
    #[must_use]
    pub fn top_level_handler(mut self, handler: Arc<dyn TopLevelHandler>) -> Self {
        self.top_level = Some(handler);
        self
    }

    /// Executor notified when each process completes
    #[must_use]
    pub fn thread_local_executor(mut self, executor: Arc<dyn ThreadLocalAwareExecutor>) -> Self {
        self.thread_local_executor = Some(executor);
        self
    }

    /// Compile the plan and wire the office
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found
    pub fn build(self) -> Result<Office, BuildError> {
        if let Some(name) = self.duplicate_team {
            return Err(BuildError::DuplicateTeam { name });
        }

        let mut teams = self.teams;
        for team in &self.config.teams {
            if teams.contains_key(&team.name) {
                return Err(BuildError::DuplicateTeam {
                    name: team.name.clone(),
                });
            }
            let started: Arc<dyn Team> = match team.kind {
                TeamKind::Worker => WorkerTeam::start(team.name.clone(), team.workers)?,
                TeamKind::Manual => ManualTeam::new(team.name.clone()),
            };
            teams.insert(team.name.clone(), started);
        }

        let mut plan = self.plan;
        for name in teams.keys() {
            if !plan.teams.contains(name) {
                plan.teams.push(name.clone());
            }
        }
        let compiled = plan.compile()?;

        let team_table = compiled
            .teams
            .keys()
            .map(|name| required(&teams, "team", name))
            .collect::<Result<Vec<_>, _>>()?;
        let process_sources = compiled
            .process_resources
            .iter()
            .map(|r| required(&self.sources, "resource", &r.name))
            .collect::<Result<Vec<_>, _>>()?;
        let thread_sources = compiled
            .thread_resources
            .iter()
            .map(|r| required(&self.sources, "resource", &r.name))
            .collect::<Result<Vec<_>, _>>()?;

        let governance = compiled
            .governance
            .iter()
            .map(|g| {
                Ok(GovernanceEntry {
                    name: g.name.clone(),
                    policy: required(&self.policies, "governance", &g.name)?,
                    bindings: Arc::new(Bindings {
                        declared: g.load_order.clone(),
                        load_order: g.load_order.clone(),
                    }),
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        let mut work_units = IndexMap::with_capacity(compiled.work_units.len());
        for unit in &compiled.work_units {
            let logic = required(&self.logic, "work unit", &unit.name)?;
            work_units.insert(
                unit.name.clone(),
                Arc::new(WorkUnit {
                    name: unit.name.clone(),
                    team: unit.team,
                    bindings: Arc::new(Bindings {
                        declared: unit.bindings.clone(),
                        load_order: unit.load_order.clone(),
                    }),
                    governance: unit.governance.clone(),
                    logic,
                }),
            );
        }

        let mut procedure = EscalationProcedure::new();
        for entry in self.procedure {
            procedure = match entry {
                ProcedureEntry::Handler(kind, handler) => procedure.with_handler(&kind, handler),
                ProcedureEntry::WorkUnit(kind, name) => {
                    let unit = work_units
                        .get(&name)
                        .ok_or(BuildError::UnknownWorkUnit { name })?;
                    procedure.with_handler(&kind, Arc::new(WorkUnitHandler::new(Arc::clone(unit))))
                }
            };
        }

        for name in self.sources.keys() {
            if compiled.process_resources.iter().chain(&compiled.thread_resources).all(|r| &r.name != name) {
                warn!(resource = %name, "source bound to an undeclared resource");
            }
        }

        if self.config.profile && self.profiler.is_none() {
            warn!("profiling enabled without a profiler; no records will be collected");
        }

        info!(
            teams = team_table.len(),
            resources = process_sources.len() + thread_sources.len(),
            governance = governance.len(),
            work_units = work_units.len(),
            "office built"
        );

        Ok(Office::from_shared(Arc::new(OfficeShared {
            config: self.config,
            plan: compiled,
            teams: team_table,
            process_sources,
            thread_sources,
            governance,
            work_units,
            procedure,
            executive: self
                .executive
                .unwrap_or_else(|| Arc::new(DefaultExecutive::new())),
            profiler: self.profiler,
            top_level: self.top_level.unwrap_or_else(|| Arc::new(LoggingTopLevelHandler)),
            thread_local_executor: self.thread_local_executor,
            shut_down: AtomicBool::new(false),
        })))
    }
}

fn required<T: ?Sized>(
    table: &IndexMap<String, Arc<T>>,
    kind: &'static str,
    name: &str,
) -> Result<Arc<T>, BuildError> {
    table
        .get(name)
        .cloned()
        .ok_or_else(|| BuildError::MissingImplementation {
            kind,
            name: name.to_string(),
        })
}
