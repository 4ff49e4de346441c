//! `conductor`: CLI front end over the in-process orchestrator library
//! (SPEC_FULL.md 6). Each invocation boots a fresh `Orchestrator` backed by
//! `InMemoryEventStore` and `EchoProvider` — there is no daemon process, so
//! `task watch/cancel/retry` only see tasks submitted by the same
//! invocation (`task create` watches to completion by default for this
//! reason). A networked deployment that persists tasks across invocations
//! would layer a transport and a real event-store backend on top of this
//! same library API; both are out of scope here (SPEC_FULL.md 1).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use conductor::agent::{AgentRegistry, ReferenceAgent};
use conductor::config::Config;
use conductor::domain::mode_config::Mode;
use conductor::domain::phase::{AgentType, LanguageExpertKind};
use conductor::errors::ErrorKind;
use conductor::event_bus::EventBus;
use conductor::event_store::{EventStore, InMemoryEventStore};
use conductor::provider::{AiProvider, EchoProvider};
use conductor::ui::EventRenderer;
use conductor::{Orchestrator, OrchestratorConfig, SubscriptionFilter};

const ALL_AGENT_TYPES: &[AgentType] = &[
    AgentType::Concept,
    AgentType::Architect,
    AgentType::Implement,
    AgentType::Test,
    AgentType::Review,
    AgentType::Optimize,
    AgentType::Docs,
    AgentType::Deploy,
    AgentType::Security,
    AgentType::Refactor,
    AgentType::Debug,
    AgentType::Migrate,
    AgentType::LanguageExpert(LanguageExpertKind::Rust),
    AgentType::LanguageExpert(LanguageExpertKind::TypeScript),
    AgentType::LanguageExpert(LanguageExpertKind::Python),
    AgentType::LanguageExpert(LanguageExpertKind::Go),
];

#[derive(Parser)]
#[command(name = "conductor", version, about = "Multi-agent AI development orchestrator")]
struct Cli {
    /// Emit verbose agent log lines and system events while watching a task.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root. Defaults to the current directory. Config is read
    /// from `<project-dir>/.conductor/conductor.toml`.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit, inspect, and control tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Inspect and switch the active execution mode.
    Mode {
        #[command(subcommand)]
        command: ModeCommands,
    },
    /// Manage project workspace records tasks can be scoped to.
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Orchestrator-wide status and monitoring.
    Status {
        #[command(subcommand)]
        command: StatusCommands,
    },
    /// Read and write `.conductor/conductor.toml`.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Submit a new task and watch it to completion.
    Create {
        description: String,
        #[arg(long)]
        project: Option<Uuid>,
        #[arg(long, value_enum)]
        mode: Option<CliMode>,
        #[arg(long, default_value_t = 50)]
        priority: u8,
    },
    /// List tasks submitted by this invocation.
    List,
    /// Print one task's current state.
    Get { id: Uuid },
    /// Stream events for one task until it reaches a terminal status.
    Watch { id: Uuid },
    /// Request cancellation of a running task.
    Cancel { id: Uuid },
    /// Resubmit a failed task with the same description/mode/priority.
    Retry { id: Uuid },
}

#[derive(Subcommand)]
enum ModeCommands {
    /// List all four modes and their baseline configuration.
    List,
    /// Print the currently active mode.
    Current,
    /// Switch the active mode.
    Switch { mode: CliMode },
    /// Print one mode's full configuration.
    Info { mode: CliMode },
    /// Print all four modes side by side.
    Compare,
}

#[derive(Subcommand)]
enum ProjectCommands {
    Create { name: String, root: PathBuf },
    List,
    Get { id: Uuid },
    Delete { id: Uuid },
    /// Write a default `.conductor/conductor.toml` into the project dir.
    Init,
}

#[derive(Subcommand)]
enum StatusCommands {
    /// Task counts by status, active mode, registry capacity.
    Overview,
    /// Aggregate token/cost usage across this invocation's tasks.
    Stats,
    /// Cost incurred over the last `--days` days.
    Costs {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Provider and event-store reachability.
    Health,
}

#[derive(Subcommand)]
enum ConfigCommands {
    Show,
    Set { key: String, value: String },
    Get { key: String },
    Reset,
    Path,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Speed,
    Quality,
    Autonomy,
    Cost,
}

impl From<CliMode> for Mode {
    fn from(m: CliMode) -> Self {
        match m {
            CliMode::Speed => Mode::Speed,
            CliMode::Quality => Mode::Quality,
            CliMode::Autonomy => Mode::Autonomy,
            CliMode::Cost => Mode::Cost,
        }
    }
}

/// Wires the in-process dependency graph: bus -> store -> registry ->
/// orchestrator, in that leaves-first order (SPEC_FULL.md 2).
struct App {
    orchestrator: Arc<Orchestrator>,
    config: Config,
    verbose: bool,
}

impl App {
    async fn bootstrap(project_dir: &std::path::Path, verbose: bool) -> Result<Self> {
        let config = Config::load_layered(project_dir)
            .with_context(|| format!("loading config from {}", project_dir.display()))?;

        let bus = Arc::new(EventBus::new(1024));
        let store: Arc<dyn EventStore> = InMemoryEventStore::shared();
        let registry = Arc::new(AgentRegistry::new(config.defaults.worker_pool_size, bus.clone()));
        let provider: Arc<dyn AiProvider> = Arc::new(EchoProvider::new());

        for &agent_type in ALL_AGENT_TYPES {
            registry
                .register(Arc::new(ReferenceAgent::new(agent_type, provider.clone())))
                .await
                .with_context(|| format!("registering {agent_type} agent"))?;
        }

        let orchestrator = Orchestrator::new(
            OrchestratorConfig { default_mode: config.defaults.mode },
            bus,
            store,
            registry,
        );

        for (name, patch) in &config.modes {
            if let Ok(mode) = name.parse::<Mode>() {
                orchestrator
                    .mode_manager()
                    .update_config(mode, patch.clone().into())
                    .await;
            }
        }

        Ok(Self { orchestrator, config, verbose })
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().expect("current directory is readable"),
    };

    let _tracing_guard = conductor_tracing::init(&project_dir.join(".conductor").join("logs"))
        .expect("tracing subscriber installs exactly once per process");

    match run(cli, project_dir).await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

/// Exit codes per SPEC_FULL.md 6: `0` success, `1` runtime failure, `2`
/// misuse/validation.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<conductor::OrchestratorError>() {
        return match e.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => 2,
            _ => 1,
        };
    }
    if let Some(e) = err.downcast_ref::<conductor::ConfigError>() {
        return match e.kind() {
            ErrorKind::Validation => 2,
            _ => 1,
        };
    }
    1
}

async fn run(cli: Cli, project_dir: PathBuf) -> Result<()> {
    match cli.command {
        Commands::Task { command } => {
            let app = App::bootstrap(&project_dir, cli.verbose).await?;
            run_task(&app, command).await
        }
        Commands::Mode { command } => {
            let app = App::bootstrap(&project_dir, cli.verbose).await?;
            run_mode(&app, command).await
        }
        Commands::Project { command } => {
            let app = App::bootstrap(&project_dir, cli.verbose).await?;
            run_project(&app, &project_dir, command).await
        }
        Commands::Status { command } => {
            let app = App::bootstrap(&project_dir, cli.verbose).await?;
            run_status(&app, command).await
        }
        Commands::Config { command } => run_config(&project_dir, command).await,
    }
}

async fn run_task(app: &App, command: TaskCommands) -> Result<()> {
    match command {
        TaskCommands::Create { description, project, mode, priority } => {
            let task_id = app
                .orchestrator
                .submit(description, project, mode.map(Into::into), priority)
                .await?;
            println!("submitted task {task_id}");
            watch_until_terminal(app, task_id).await?;
            print_task(&app.orchestrator.get(task_id).await?);
            Ok(())
        }
        TaskCommands::List => {
            let tasks = app.orchestrator.list().await;
            if tasks.is_empty() {
                println!("no tasks submitted by this invocation");
            }
            for task in tasks {
                println!(
                    "{}  {:<10}  {:<8}  priority={:<3}  phase={}/{}  {}",
                    task.id,
                    task.status,
                    task.mode,
                    task.priority,
                    task.current_phase,
                    task.phases.len(),
                    task.description
                );
            }
            Ok(())
        }
        TaskCommands::Get { id } => {
            print_task(&app.orchestrator.get(id).await?);
            Ok(())
        }
        TaskCommands::Watch { id } => watch_until_terminal(app, id).await,
        TaskCommands::Cancel { id } => {
            app.orchestrator.cancel(id).await?;
            println!("cancellation requested for {id}");
            Ok(())
        }
        TaskCommands::Retry { id } => {
            let new_id = app.orchestrator.retry(id).await?;
            println!("retried as {new_id}");
            watch_until_terminal(app, new_id).await?;
            print_task(&app.orchestrator.get(new_id).await?);
            Ok(())
        }
    }
}

async fn watch_until_terminal(app: &App, task_id: Uuid) -> Result<()> {
    let mut events = app.orchestrator.subscribe(SubscriptionFilter::Task(task_id)).await;
    let renderer = EventRenderer::new(app.verbose);
    while let Some(event) = events.recv().await {
        renderer.render(&event);
        match event.event_type {
            conductor::domain::EventType::TaskPaused => {
                prompt_for_approval(app, task_id).await?;
            }
            conductor::domain::EventType::TaskCompleted
            | conductor::domain::EventType::TaskFailed
            | conductor::domain::EventType::TaskCancelled => break,
            _ => {}
        }
    }
    Ok(())
}

/// The active mode's human-approval gate (SPEC_FULL.md 9) surfaces here:
/// this invocation is the only process holding the paused task, so the gate
/// has to be answered inline rather than by a separate `approve` command.
async fn prompt_for_approval(app: &App, task_id: Uuid) -> Result<()> {
    let approved = tokio::task::spawn_blocking(move || {
        dialoguer::Confirm::new()
            .with_prompt(format!("task {task_id} is paused awaiting approval — proceed?"))
            .default(false)
            .interact()
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false);

    if approved {
        app.orchestrator.approve(task_id).await?;
    } else {
        app.orchestrator.cancel(task_id).await?;
    }
    Ok(())
}

fn print_task(task: &conductor::domain::Task) {
    println!("task {}", task.id);
    println!("  description: {}", task.description);
    println!("  status:      {}", task.status);
    println!("  mode:        {}", task.mode);
    println!("  priority:    {}", task.priority);
    println!("  phase:       {}/{}", task.current_phase, task.phases.len());
    println!(
        "  tokens:      in={} out={}",
        task.tokens_used.input, task.tokens_used.output
    );
    println!("  cost:        {}", task.cost);
    println!("  files:       {}", task.files_modified.len());
    for error in &task.errors {
        println!("  error:       [{:?}] {}", error.kind, error.message);
    }
}

async fn run_mode(app: &App, command: ModeCommands) -> Result<()> {
    let manager = app.orchestrator.mode_manager();
    match command {
        ModeCommands::List => {
            for mode in Mode::ALL {
                let config = manager.config(mode).await;
                println!("{:<10} retries={:<3} timeout={}s", mode, config.max_retries, config.task_timeout.as_secs());
            }
            Ok(())
        }
        ModeCommands::Current => {
            println!("{}", manager.active_mode().await);
            Ok(())
        }
        ModeCommands::Switch { mode } => {
            manager.switch_mode(mode.into()).await?;
            println!("switched to {}", manager.active_mode().await);
            Ok(())
        }
        ModeCommands::Info { mode } => {
            let mode: Mode = mode.into();
            let config = manager.config(mode).await;
            println!("{mode}");
            println!("  decomposition:   {:?}", config.decomposition_depth);
            println!("  parallelization: {:?}", config.parallelization);
            println!("  validation:      {:?}", config.validation_depth);
            println!("  human_approval:  {}", config.human_approval);
            println!("  primary_model:   {} ({})", config.primary_model.model, config.primary_model.provider);
            println!("  fallback_model:  {} ({})", config.fallback_model.model, config.fallback_model.provider);
            println!("  use_local:       {}", config.use_local_models);
            println!("  required_agents: {}", format_agent_list(&config.required_agents));
            println!("  optional_agents: {}", format_agent_list(&config.optional_agents));
            println!("  task_timeout:    {}s", config.task_timeout.as_secs());
            println!("  max_retries:     {}", config.max_retries);
            if let Some(limit) = config.cost_limit {
                println!("  cost_limit:      {limit}");
            }
            Ok(())
        }
        ModeCommands::Compare => {
            for mode in Mode::ALL {
                let config = manager.config(mode).await;
                println!(
                    "{:<10} decomposition={:<10?} validation={:<14?} human_approval={:<5} max_retries={}",
                    mode, config.decomposition_depth, config.validation_depth, config.human_approval, config.max_retries
                );
            }
            Ok(())
        }
    }
}

fn format_agent_list(agents: &[AgentType]) -> String {
    agents.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

async fn run_project(app: &App, project_dir: &std::path::Path, command: ProjectCommands) -> Result<()> {
    let projects = app.orchestrator.projects();
    match command {
        ProjectCommands::Create { name, root } => {
            let project = projects.create(name, root).await;
            println!("created project {} ({})", project.id, project.name);
            Ok(())
        }
        ProjectCommands::List => {
            for project in projects.list().await {
                println!("{}  {}  {}", project.id, project.name, project.root.display());
            }
            Ok(())
        }
        ProjectCommands::Get { id } => {
            let project = projects.get(id).await?;
            println!("{}  {}  {}", project.id, project.name, project.root.display());
            Ok(())
        }
        ProjectCommands::Delete { id } => {
            if projects.delete(id).await {
                println!("deleted {id}");
            } else {
                println!("no such project {id}");
            }
            Ok(())
        }
        ProjectCommands::Init => {
            let path = Config::path_for(project_dir);
            app.config.save(&path)?;
            println!("wrote default config to {}", path.display());
            Ok(())
        }
    }
}

async fn run_status(app: &App, command: StatusCommands) -> Result<()> {
    match command {
        StatusCommands::Overview => {
            let tasks = app.orchestrator.list().await;
            let running = tasks.iter().filter(|t| !t.status.is_terminal()).count();
            println!("mode:      {}", app.orchestrator.mode_manager().active_mode().await);
            println!("tasks:     {} ({} running)", tasks.len(), running);
            println!("agent cap: {}", app.orchestrator.registry().cap());
            println!("projects:  {}", app.orchestrator.projects().list().await.len());
            Ok(())
        }
        StatusCommands::Stats => {
            let tasks = app.orchestrator.list().await;
            let total_cost = tasks.iter().fold(rust_decimal::Decimal::ZERO, |acc, t| acc + t.cost);
            let tokens_in: u64 = tasks.iter().map(|t| t.tokens_used.input).fold(0u64, |a, b| a + b);
            let tokens_out: u64 = tasks.iter().map(|t| t.tokens_used.output).fold(0u64, |a, b| a + b);
            println!("tasks:       {}", tasks.len());
            println!("tokens in:   {tokens_in}");
            println!("tokens out:  {tokens_out}");
            println!("total cost:  {total_cost}");
            Ok(())
        }
        StatusCommands::Costs { days } => {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
            let tasks = app.orchestrator.list().await;
            let cost = tasks
                .iter()
                .filter(|t| t.created_at >= cutoff)
                .fold(rust_decimal::Decimal::ZERO, |acc, t| acc + t.cost);
            println!("cost over last {days}d: {cost}");
            Ok(())
        }
        StatusCommands::Health => {
            let health = EchoProvider::new().health_check().await;
            println!("status:         {}", if health.healthy { "healthy" } else { "unhealthy" });
            println!("provider:       {}", if health.healthy { "up" } else { "down" });
            println!("local_provider: up");
            println!("database:       n/a (in-memory store)");
            println!("cache:          n/a");
            Ok(())
        }
    }
}

async fn run_config(project_dir: &std::path::Path, command: ConfigCommands) -> Result<()> {
    let path = Config::path_for(project_dir);
    match command {
        ConfigCommands::Show => {
            let config = Config::load_layered(project_dir)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load(&path)?;
            config.set(&key, &value)?;
            config.save(&path)?;
            println!("{key} = {value}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = Config::load_layered(project_dir)?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => println!("(unset)"),
            }
            Ok(())
        }
        ConfigCommands::Reset => {
            Config::default().save(&path)?;
            println!("reset {}", path.display());
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Process-wide `tracing` initialization, split out so `main` stays
/// readable (SPEC_FULL.md 1.1): a compact layer on stderr plus a
/// daily-rotating JSON file sink under `<project>/.conductor/logs/`, both
/// driven by one `RUST_LOG`-backed filter. The `otlp` feature adds a span
/// exporter on top for teams that want to ship traces to a collector.
mod conductor_tracing {
    use std::path::Path;

    use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    /// Keeps the file writer's flush thread alive; dropping it early loses
    /// any log lines still buffered for the file sink.
    pub struct Guard {
        _file: WorkerGuard,
    }

    fn env_filter() -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }

    fn open_file_writer(logs_dir: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(logs_dir)?;
        let appender = tracing_appender::rolling::Builder::new()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("conductor")
            .filename_suffix("jsonl")
            .build(logs_dir)?;
        Ok(tracing_appender::non_blocking(appender))
    }

    #[cfg(not(feature = "otlp"))]
    pub fn init(logs_dir: &Path) -> anyhow::Result<Guard> {
        let (writer, file_guard) = open_file_writer(logs_dir)?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .finish()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
        Ok(Guard { _file: file_guard })
    }

    #[cfg(feature = "otlp")]
    pub fn init(logs_dir: &Path) -> anyhow::Result<Guard> {
        let (writer, file_guard) = open_file_writer(logs_dir)?;

        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:4317".to_string());
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build otlp exporter: {e}"))?;
        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", "conductor")])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        opentelemetry::global::set_tracer_provider(provider.clone());
        let tracer = opentelemetry::global::tracer("conductor");

        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .finish()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
        Ok(Guard { _file: file_guard })
    }
}
