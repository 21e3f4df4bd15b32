//! STRAND CLI
//!
//! Compile office plans and exercise the runtime from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use strand_plan::{OfficePlan, ResourceDecl, WorkUnitDecl};
use strand_runtime::{
    Continuation, Escalation, Invocation, LoadContext, LoadOutcome, ManagedObject, ManagedObjectSource,
    OfficeBuilder, RuntimeConfig, TeamConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "STRAND - continuation-based office runtime", long_about = None)]
struct Cli {
    /// Tracing filter, e.g. `strand_runtime=debug`
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a plan and print its orders
    Plan {
        /// Path to the plan JSON
        file: PathBuf,
    },
    /// Run the DB/CACHE scenario on worker teams
    Demo {
        /// Runtime configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    match cli.command {
        Commands::Plan { file } => plan(&file),
        Commands::Demo { config } => demo(config.as_deref()),
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strand=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn plan(file: &std::path::Path) -> Result<()> {
    let json = std::fs::read_to_string(file).wrap_err_with(|| format!("reading {}", file.display()))?;
    let compiled = OfficePlan::from_json_str(&json)?.compile()?;

    println!("teams:");
    for (name, id) in &compiled.teams {
        println!("  {id} {name}");
    }
    println!("work units:");
    for unit in &compiled.work_units {
        let team = compiled
            .teams
            .get_index(unit.team.0)
            .map_or("?", |(name, _)| name.as_str());
        println!(
            "  {} on {team}: load [{}]",
            unit.name,
            compiled.resource_names(&unit.load_order).join(", ")
        );
    }
    println!(
        "process release order: [{}]",
        compiled.resource_names(&compiled.process_release_order).join(", ")
    );
    println!(
        "thread release order: [{}]",
        compiled.resource_names(&compiled.thread_release_order).join(", ")
    );
    if !compiled.parameter_slots.is_empty() {
        println!("parameter slots:");
        for (slot, type_name) in &compiled.parameter_slots {
            println!("  {slot}: {type_name}");
        }
    }
    Ok(())
}

struct Traced {
    name: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl ManagedObjectSource for Traced {
    fn start_load(&self, ctx: &LoadContext) -> Result<LoadOutcome, Escalation> {
        self.events.lock().push(format!("load {}", ctx.resource()));
        Ok(LoadOutcome::Ready(Arc::new(format!("{} connection", self.name))))
    }

    fn release(&self, _object: Option<ManagedObject>) -> Result<Option<Continuation>, Escalation> {
        self.events.lock().push(format!("release {}", self.name));
        Ok(None)
    }
}

fn demo(config: Option<&std::path::Path>) -> Result<()> {
    let mut config = match config {
        Some(path) => RuntimeConfig::from_path(path)?,
        None => RuntimeConfig::default(),
    };
    if config.teams.is_empty() {
        config = config.with_team(TeamConfig::worker("app", 2));
    }
    let team = config
        .teams
        .first()
        .map(|team| team.name.clone())
        .ok_or_else(|| eyre!("configuration declares no team"))?;

    let events = Arc::new(Mutex::new(Vec::new()));
    let work = Arc::clone(&events);
    let office = OfficeBuilder::new()
        .with_config(config)
        .resource(ResourceDecl::process("DB"), Traced {
            name: "DB",
            events: Arc::clone(&events),
        })
        .resource(ResourceDecl::process("CACHE").depends_on("DB"), Traced {
            name: "CACHE",
            events: Arc::clone(&events),
        })
        .work_unit(WorkUnitDecl::new("query", team).with_resources(["CACHE"]), move |ctx, _| {
            let cache = ctx.object::<String>(0)?;
            work.lock().push(format!("query via {cache}"));
            Ok(None)
        })
        .build()?;

    let (tx, rx) = mpsc::channel();
    let handle = office.invoke(Invocation::new("query").with_callback(move |completion| {
        let _ = tx.send(completion.outcome);
    }))?;
    info!(process = %handle.id(), "demo invoked");

    let outcome = rx
        .recv_timeout(Duration::from_secs(10))
        .wrap_err("process did not complete")?;
    office.shutdown();

    for event in events.lock().iter() {
        println!("{event}");
    }
    println!("outcome: {outcome:?}");
    Ok(())
}
