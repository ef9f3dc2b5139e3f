//! laneq CLI: operator interface to the priority dispatcher.

use anyhow::Context as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use laneq::config::Config;
use laneq::config::secrets::ExposeSecret;
use laneq::db::Db;
use laneq::engine::{
    Dispatcher, PipelineChainer, PriorityWorker, UpgradeCoordinator, UpgradePolicy,
    UpgradeRequest, WorkerConfig,
};
use laneq::handler::HandlerRegistry;
use laneq::ledger::{Ledger, TaskFilter};
use laneq::model::{
    Bucket, Category, CorrelationId, NewTask, Phase, PriorityChange, Status, TaskId, TaskRecord,
    UpgradeAction,
};
use laneq::pipeline::PipelineRegistry;
use laneq::rbac::{Actor, Rbac, StaticRbac};
use laneq::telemetry::{TelemetryConfig, init_telemetry};
use laneq::transport::Transport;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "laneq", about = "Priority-lane task dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one worker pool per pipeline lane
    Serve {
        /// Workers per (category, phase)
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Also run a low-bucket-only worker per lane
        #[arg(long)]
        dedicated_low: bool,
    },
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Pipeline run operations
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
    /// Priority changes in a time window
    Audit {
        /// Window start (RFC 3339); defaults to 24h ago
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Window end (RFC 3339); defaults to now
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Submit a single task
    Submit {
        /// Handler name
        task_name: String,
        #[arg(long)]
        category: Category,
        #[arg(long, default_value = "default")]
        phase: Phase,
        /// Priority 0-10 (8+ high, 4-7 normal, 0-3 low)
        #[arg(long, default_value_t = 5)]
        priority: i32,
        /// JSON arguments
        #[arg(long)]
        args: Option<String>,
        /// Join an existing pipeline run
        #[arg(long)]
        correlation_id: Option<CorrelationId>,
    },
    /// Start a pipeline run at its first phase
    Start {
        category: Category,
        #[arg(long, default_value_t = 5)]
        priority: i32,
        #[arg(long)]
        args: Option<String>,
    },
    /// Raise a queued task's priority
    Upgrade {
        /// Task id (full UUID or prefix)
        id: String,
        /// prioritize | urgent | critical
        #[arg(long, conflicts_with = "priority", required_unless_present = "priority")]
        action: Option<UpgradeAction>,
        /// Explicit target priority
        #[arg(long)]
        priority: Option<i32>,
        #[arg(long, default_value = "")]
        reason: String,
        /// Acting identity, checked against the RBAC file
        #[arg(long)]
        actor: String,
    },
    /// Cancel a queued task
    Cancel {
        id: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long)]
        actor: String,
    },
    /// Re-dispatch a task an interrupted upgrade left without a live message
    Resume {
        id: String,
        #[arg(long)]
        actor: String,
    },
    /// Show a task record
    Show { id: String },
    /// List task records
    List {
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a task's priority history
    History { id: String },
}

#[derive(Subcommand)]
enum RunAction {
    /// Show every phase of one pipeline run
    Show {
        /// Correlation id of the run
        correlation_id: CorrelationId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "laneq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret())
        .await?
        .with_visibility_timeout(config.visibility_timeout);
    db.migrate().await?;
    let db = Arc::new(db);

    match cli.command {
        Command::Serve {
            workers,
            dedicated_low,
        } => cmd_serve(&config, db, workers, dedicated_low).await,
        Command::Task { action } => cmd_task(&config, db, action).await,
        Command::Run {
            action: RunAction::Show { correlation_id },
        } => {
            let records = db.by_correlation(correlation_id).await?;
            print_records(&records);
            Ok(())
        }
        Command::Audit { since, until } => {
            let until = until.unwrap_or_else(Utc::now);
            let since = since.unwrap_or_else(|| until - ChronoDuration::hours(24));
            let changes = db.history_between(since, until).await?;
            print_changes(&changes);
            Ok(())
        }
    }
}

fn parse_args(args: Option<String>) -> anyhow::Result<serde_json::Value> {
    match args {
        Some(json) => serde_json::from_str(&json).context("--args is not valid JSON"),
        None => Ok(serde_json::json!({})),
    }
}

fn load_rbac(config: &Config) -> anyhow::Result<Arc<dyn Rbac>> {
    let rbac = match config.rbac_file {
        Some(ref path) => StaticRbac::load(path)?,
        None => StaticRbac::new(),
    };
    Ok(Arc::new(rbac))
}

async fn cmd_serve(
    config: &Config,
    db: Arc<Db>,
    workers: usize,
    dedicated_low: bool,
) -> anyhow::Result<()> {
    let pipelines = Arc::new(PipelineRegistry::load_from_dir(&config.pipelines_dir)?);
    let handlers = Arc::new(HandlerRegistry::from_pipelines(
        &pipelines,
        &config.pipelines_dir,
    ));

    let ledger: Arc<dyn Ledger> = db.clone();
    let transport: Arc<dyn Transport> = db.clone();
    let dispatcher = Dispatcher::new(ledger.clone(), transport.clone());
    let chainer = PipelineChainer::new(dispatcher, pipelines.clone());

    let worker_config = WorkerConfig {
        poll_interval: config.poll_interval,
        ..WorkerConfig::default()
    };

    let mut pool = Vec::new();
    for (category, phase) in pipelines.lanes() {
        db.create_lanes(category, phase).await?;

        let base = PriorityWorker::new(
            category,
            phase,
            ledger.clone(),
            transport.clone(),
            handlers.clone(),
            worker_config.clone(),
        )
        .with_chainer(chainer.clone());

        for _ in 0..workers {
            pool.push(base.clone());
        }
        if dedicated_low {
            pool.push(base.with_buckets(&[Bucket::Low]));
        }
    }

    if pool.is_empty() {
        anyhow::bail!(
            "no pipelines found in {}",
            config.pipelines_dir.display()
        );
    }

    let mut handles = Vec::new();
    for worker in &pool {
        let worker = worker.clone();
        handles.push(tokio::spawn(async move { worker.run().await }));
    }

    tokio::signal::ctrl_c().await.ok();
    for worker in &pool {
        worker.shutdown();
    }
    for handle in handles {
        handle.await??;
    }
    Ok(())
}

async fn cmd_task(config: &Config, db: Arc<Db>, action: TaskAction) -> anyhow::Result<()> {
    let ledger: Arc<dyn Ledger> = db.clone();
    let transport: Arc<dyn Transport> = db.clone();
    let dispatcher = Dispatcher::new(ledger.clone(), transport);

    match action {
        TaskAction::Submit {
            task_name,
            category,
            phase,
            priority,
            args,
            correlation_id,
        } => {
            let mut new = NewTask::new(task_name, category)
                .phase(phase)
                .priority(priority)
                .args(parse_args(args)?);
            if let Some(correlation_id) = correlation_id {
                new = new.correlation_id(correlation_id);
            }
            let task_id = dispatcher.submit(new).await?;
            println!("Submitted: {task_id}");
        }
        TaskAction::Start {
            category,
            priority,
            args,
        } => {
            let pipelines = Arc::new(PipelineRegistry::load_from_dir(&config.pipelines_dir)?);
            let chainer = PipelineChainer::new(dispatcher, pipelines);
            let (task_id, correlation_id) = chainer
                .start_run(category, parse_args(args)?, priority)
                .await?;
            println!("Started: {task_id} (run {correlation_id})");
        }
        TaskAction::Upgrade {
            id,
            action,
            priority,
            reason,
            actor,
        } => {
            let task_id = resolve_task_id(ledger.as_ref(), &id).await?;
            let coordinator = UpgradeCoordinator::new(
                dispatcher,
                load_rbac(config)?,
                UpgradePolicy {
                    allow_downgrade: config.allow_downgrade,
                },
            );
            let actor = Actor::new(actor);
            let request = match (action, priority) {
                (Some(action), _) => UpgradeRequest::action(task_id, action, actor),
                (None, Some(priority)) => UpgradeRequest::priority(task_id, priority, actor),
                (None, None) => anyhow::bail!("either --action or --priority is required"),
            };
            let upgraded = coordinator.upgrade(request.reason(reason)).await?;
            println!(
                "Upgraded: {} {} ({}) -> {} ({})",
                task_id,
                upgraded.change.from_priority,
                upgraded.change.from_bucket,
                upgraded.change.to_priority,
                upgraded.change.to_bucket
            );
        }
        TaskAction::Cancel { id, reason, actor } => {
            let task_id = resolve_task_id(ledger.as_ref(), &id).await?;
            let coordinator =
                UpgradeCoordinator::new(dispatcher, load_rbac(config)?, UpgradePolicy::default());
            coordinator
                .cancel(task_id, &reason, &Actor::new(actor))
                .await?;
            println!("Cancelled: {task_id}");
        }
        TaskAction::Resume { id, actor } => {
            let task_id = resolve_task_id(ledger.as_ref(), &id).await?;
            let coordinator =
                UpgradeCoordinator::new(dispatcher, load_rbac(config)?, UpgradePolicy::default());
            let record = coordinator.resume(task_id, &Actor::new(actor)).await?;
            println!("Resumed: {task_id} at priority {}", record.priority);
        }
        TaskAction::Show { id } => {
            let task_id = resolve_task_id(ledger.as_ref(), &id).await?;
            print_record(&ledger.get(task_id).await?)?;
        }
        TaskAction::List {
            status,
            category,
            limit,
        } => {
            let records = ledger
                .list(&TaskFilter {
                    status,
                    category,
                    limit: Some(limit),
                })
                .await?;
            print_records(&records);
        }
        TaskAction::History { id } => {
            let task_id = resolve_task_id(ledger.as_ref(), &id).await?;
            print_changes(&ledger.history(task_id).await?);
        }
    }
    Ok(())
}

/// Accept a full UUID or a unique prefix among recent tasks.
async fn resolve_task_id(ledger: &dyn Ledger, id: &str) -> anyhow::Result<TaskId> {
    if id.len() >= 36 {
        return Ok(id.parse()?);
    }
    let recent = ledger
        .list(&TaskFilter {
            limit: Some(500),
            ..TaskFilter::default()
        })
        .await?;
    let matches: Vec<TaskId> = recent
        .iter()
        .map(|r| r.task_id)
        .filter(|t| t.to_string().starts_with(id))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no task matching prefix '{id}'"),
        [task_id] => Ok(*task_id),
        many => anyhow::bail!("{} tasks match prefix '{id}', be more specific", many.len()),
    }
}

fn print_records(records: &[TaskRecord]) {
    if records.is_empty() {
        println!("No tasks found.");
        return;
    }

    println!(
        "{:<8}  {:<20}  {:<8}  {:<9}  {:<3}  {:<6}  {:<9}  CREATED",
        "ID", "TASK", "CATEGORY", "PHASE", "PRI", "BUCKET", "STATUS"
    );
    println!("{}", "-".repeat(100));
    for r in records {
        println!(
            "{:<8}  {:<20}  {:<8}  {:<9}  {:<3}  {:<6}  {:<9}  {}",
            r.task_id.short(),
            r.task_name,
            r.category,
            r.phase,
            r.priority,
            r.bucket(),
            r.status,
            r.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("\n{} task(s)", records.len());
}

fn print_record(r: &TaskRecord) -> anyhow::Result<()> {
    println!("ID:           {}", r.task_id);
    println!("Task:         {}", r.task_name);
    println!("Category:     {}", r.category);
    println!("Phase:        {}", r.phase);
    println!("Priority:     {} ({})", r.priority, r.bucket());
    println!("Status:       {}", r.status);
    println!("Correlation:  {}", r.correlation_id);
    println!("Generation:   {}", r.generation);
    println!("Args:         {}", serde_json::to_string_pretty(&r.args)?);
    println!("Created:      {}", r.created_at);
    println!("Updated:      {}", r.updated_at);
    if let Some(started) = r.started_at {
        println!("Started:      {started}");
    }
    if let Some(finished) = r.finished_at {
        println!("Finished:     {finished}");
    }
    if let Some(ref outcome) = r.outcome {
        println!("---");
        println!(
            "Outcome:      {}",
            if outcome.success { "success" } else { "failure" }
        );
        if let Some(ref data) = outcome.data {
            println!("Data:         {}", serde_json::to_string_pretty(data)?);
        }
        if let Some(ref err) = outcome.error {
            println!("Error:        {err}");
        }
        println!("Duration:     {}ms", outcome.duration_ms);
    }
    Ok(())
}

fn print_changes(changes: &[PriorityChange]) {
    if changes.is_empty() {
        println!("No priority changes.");
        return;
    }
    for c in changes {
        println!(
            "{}  {}  {:>2} ({:<6}) -> {:>2} ({:<6})  {:<10}  by {}  {}",
            c.changed_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            c.task_id.short(),
            c.from_priority,
            c.from_bucket,
            c.to_priority,
            c.to_bucket,
            c.action,
            c.changed_by,
            c.reason
        );
    }
}
