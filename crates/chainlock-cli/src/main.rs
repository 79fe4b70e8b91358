//! Chainlock CLI - lock chain contention simulator

mod scenario;


use chainlock_core::config::Config;
use chainlock_core::locking::{
    ChainDescriptor, EventLog, LockCoordinator, LockEventType, LockHandle, LockObserver,
    LockResult, LockStatus, RequestOptions, ResourceKind, ThreadExecutor, UiExecutor,
};
use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use scenario::ScenarioStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "chainlock")]
#[command(author, version, about = "Hierarchical lock chain coordinator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log lock activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent readers and writers against an in-memory scenario tree
    Simulate(SimulateArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct SimulateArgs {
    /// Number of entities in the registry
    #[arg(long, default_value_t = 3)]
    entities: usize,

    /// Number of read requests
    #[arg(long, default_value_t = 8)]
    readers: usize,

    /// Number of write requests
    #[arg(long, default_value_t = 4)]
    writers: usize,

    /// How long each action holds its chain, in milliseconds
    #[arg(long, default_value_t = 20)]
    hold_ms: u64,

    /// Queue writers per entity in submission order
    #[arg(long)]
    fairness: bool,

    /// Coalesce writers per entity: extra writers are skipped while one is in flight
    #[arg(long)]
    exclusive: bool,

    /// Remove this entity from the registry before the workload runs
    #[arg(long)]
    vanish: Option<String>,

    /// Run writer actions on a dedicated UI thread
    #[arg(long)]
    ui: bool,

    /// Auto-cancel readers after this many milliseconds
    #[arg(long)]
    auto_cancel_ms: Option<u64>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Outcome of a simulation run
#[derive(Debug, Default, Serialize)]
struct SimulationReport {
    requests: usize,
    finished: usize,
    skipped: usize,
    canceled: usize,
    failed: usize,
    restarts: usize,
    busy: usize,
    elapsed_ms: u64,
    revisions: BTreeMap<String, u64>,
    errors: Vec<String>,
}

impl SimulationReport {
    fn record(&mut self, result: &LockResult) {
        self.requests += 1;
        match result.status {
            LockStatus::Finished => self.finished += 1,
            LockStatus::Skipped => self.skipped += 1,
            LockStatus::Canceled => self.canceled += 1,
            _ => {
                self.failed += 1;
                if let Some(error) = &result.error {
                    self.errors.push(format!("[{}] {}", error.code(), error));
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let directive = if cli.verbose {
        "chainlock_core=debug"
    } else {
        "chainlock_core=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate(args) => cmd_simulate(args, cli.format, cli.quiet).await,
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_simulate(args: SimulateArgs, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    if args.entities == 0 {
        anyhow::bail!("--entities must be at least 1");
    }

    let config = Config::load()?;
    let store = Arc::new(ScenarioStore::new(args.entities));
    let log = Arc::new(EventLog::new());

    let mut builder = LockCoordinator::builder(Arc::clone(&store))
        .config(config.lock_config())
        .observer(Arc::clone(&log) as Arc<dyn LockObserver>);
    let executor = if args.ui {
        let executor = Arc::new(ThreadExecutor::spawn("chainlock-ui")?);
        builder = builder.ui_executor(Arc::clone(&executor) as Arc<dyn UiExecutor>);
        Some(executor)
    } else {
        None
    };
    let coordinator = builder.build();

    if !quiet && matches!(format, OutputFormat::Text) {
        println!(
            "Simulating {} readers and {} writers over {} entities...",
            args.readers, args.writers, args.entities
        );
    }
    info!(
        entities = args.entities,
        readers = args.readers,
        writers = args.writers,
        "Starting simulation"
    );

    let started = Instant::now();
    let mut report = SimulationReport::default();

    if let Some(id) = &args.vanish {
        let result = submit_vanish(&coordinator, id.clone())?.await;
        report.record(&result);
    }

    let handles = submit_workload(&coordinator, &args)?;
    for result in join_all(handles).await {
        report.record(&result);
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    report.restarts = log.count(LockEventType::ChainRestarted);
    report.busy = log.count(LockEventType::ResourceBusy);
    report.revisions = store.revisions();

    if let Some(executor) = executor {
        executor.shutdown();
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report, quiet),
    }
    Ok(())
}

fn submit_vanish(
    coordinator: &LockCoordinator<Arc<ScenarioStore>>,
    id: String,
) -> anyhow::Result<LockHandle> {
    let chain = ChainDescriptor::builder()
        .write(ResourceKind::Registry)
        .build()?;
    let handle = coordinator.submit(chain, RequestOptions::new(), move |view| {
        let registry = view.require(ResourceKind::Registry)?;
        if !registry.remove(&id) {
            anyhow::bail!("entity {} does not exist", id);
        }
        debug!(entity = %id, "Entity removed");
        Ok(())
    })?;
    Ok(handle)
}

fn submit_workload(
    coordinator: &LockCoordinator<Arc<ScenarioStore>>,
    args: &SimulateArgs,
) -> anyhow::Result<Vec<LockHandle>> {
    let ids = ScenarioStore::entity_ids(args.entities);
    let hold = Duration::from_millis(args.hold_ms);
    let total = args.readers + args.writers;
    let mut handles = Vec::with_capacity(total);
    let (mut readers, mut writers) = (0, 0);

    // Interleave writers among readers so both compete from the start
    for i in 0..total {
        let is_writer = writers < args.writers && (readers >= args.readers || i % 3 == 0);
        if is_writer {
            let id = &ids[writers % ids.len()];
            writers += 1;

            let chain = ChainDescriptor::builder()
                .read(ResourceKind::Registry)
                .write_entity(id.as_str())
                .write(ResourceKind::EntityEvents)
                .build()?;
            let mut options = RequestOptions::new();
            if args.fairness {
                options = options.fairness_key(id.as_str());
            }
            if args.exclusive {
                options = options.exclusivity_key(format!("refresh:{}", id));
            }
            if args.ui {
                options = options.on_ui_thread();
            }
            handles.push(coordinator.submit(chain, options, move |view| {
                let entity = view.require(ResourceKind::Entity)?;
                view.require(ResourceKind::EntityEvents)?;
                entity.bump();
                thread::sleep(hold);
                Ok(())
            })?);
        } else {
            let id = &ids[readers % ids.len()];
            readers += 1;

            let chain = ChainDescriptor::builder()
                .read(ResourceKind::Registry)
                .read_entity(id.as_str())
                .read(ResourceKind::EntityDetail)
                .build()?;
            let mut options = RequestOptions::new();
            if let Some(ms) = args.auto_cancel_ms {
                options = options.auto_cancel(Duration::from_millis(ms));
            }
            handles.push(coordinator.submit(chain, options, move |view| {
                let entity = view.require(ResourceKind::Entity)?;
                view.require(ResourceKind::EntityDetail)?;
                debug!(entity = entity.name(), revision = entity.revision(), "Read entity");
                thread::sleep(hold / 2);
                Ok(())
            })?);
        }
    }
    Ok(handles)
}

fn print_report(report: &SimulationReport, quiet: bool) {
    if quiet {
        println!(
            "finished={} skipped={} canceled={} failed={}",
            report.finished, report.skipped, report.canceled, report.failed
        );
        return;
    }

    println!("Simulation complete in {} ms", report.elapsed_ms);
    println!("  Requests:  {}", report.requests);
    println!("  Finished:  {}", report.finished);
    println!("  Skipped:   {}", report.skipped);
    println!("  Canceled:  {}", report.canceled);
    println!("  Failed:    {}", report.failed);
    println!("  Restarts:  {}", report.restarts);
    println!("  Busy:      {}", report.busy);
    println!("Revisions:");
    for (id, revision) in &report.revisions {
        println!("  {} = {}", id, revision);
    }
    for error in &report.errors {
        println!("Error: {}", error);
    }
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
