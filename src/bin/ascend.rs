//! ascend CLI: operator interface to tasks, completions and the points ledger.

use ascend::config::Config;
use ascend::config::secrets::ExposeSecret;
use ascend::db::Db;
use ascend::engine::{CallOptions, CompletionEngine, CompletionResult, DailyReset};
use ascend::matcher::{LlmMatcher, NameMatcher, TaskMatcher};
use ascend::model::{Category, EntityId, NewTask, Progress, ScopeContext, TaskId, TaskRecord};
use ascend::store::{LedgerStore, TaskFilter, TaskStore};
use ascend::telemetry::{TelemetryConfig, init_telemetry};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ascend", about = "Gamified task completion and points ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Task operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Complete a task by id, or by describing it with --say
    Complete {
        /// Task ID
        #[arg(required_unless_present = "say", conflicts_with = "say")]
        id: Option<String>,
        /// Free-text reference resolved against the room's open tasks
        #[arg(long)]
        say: Option<String>,
        #[command(flatten)]
        who: Actor,
    },
    /// Re-issue a pending award for a completed task
    RetryAward {
        /// Task ID
        id: String,
        #[command(flatten)]
        who: Actor,
    },
    /// Show an entity's points
    Balance {
        /// Entity ID
        entity: Uuid,
        /// Also print recent ledger history
        #[arg(long)]
        history: bool,
    },
    /// Reopen daily tasks completed since the last reset
    Reset {
        /// Keep running, resetting every RESET_INTERVAL_SECS
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a task
    Add {
        /// Task name
        name: String,
        /// Tags: daily, one-off, aspirational, urgent, priority-N, AWAITING_CHOICE
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Room the task belongs to
        #[arg(long)]
        room: Option<Uuid>,
        /// Due date (RFC 3339), one-off tasks only
        #[arg(long)]
        due: Option<DateTime<Utc>>,
    },
    /// List tasks
    List {
        /// Filter by room
        #[arg(long)]
        room: Option<Uuid>,
        /// Filter by category
        #[arg(long)]
        category: Option<Category>,
        /// Include completed and awaiting tasks
        #[arg(long)]
        all: bool,
    },
    /// Show a task
    Show {
        /// Task ID
        id: String,
    },
}

#[derive(Args)]
struct Actor {
    /// Entity credited with the completion
    #[arg(long)]
    actor: Uuid,
    /// Room the completion happens in
    #[arg(long)]
    room: Uuid,
    /// World the room belongs to
    #[arg(long)]
    world: Uuid,
}

impl Actor {
    fn entity(&self) -> EntityId {
        EntityId(self.actor)
    }

    fn scope(&self) -> ScopeContext {
        ScopeContext::new(self.room, self.world)
    }
}

type Engine = CompletionEngine<Db, Db>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "ascend"))?;

    let db = Db::connect(config.database_url.expose_secret())
        .await?
        .with_conflict_retries(config.conflict_retries);
    db.migrate().await?;
    if let Command::Migrate = cli.command {
        println!("Migrations applied.");
        return Ok(());
    }

    let db = Arc::new(db);
    let engine = CompletionEngine::new(db.clone(), db.clone());
    let opts = call_options(&config);

    match cli.command {
        Command::Migrate => Ok(()),
        Command::Task { action } => match action {
            TaskAction::Add {
                name,
                tags,
                room,
                due,
            } => cmd_task_add(&engine, &opts, name, tags, room, due).await,
            TaskAction::List {
                room,
                category,
                all,
            } => cmd_task_list(&db, &engine, &opts, room, category, all).await,
            TaskAction::Show { id } => cmd_task_show(&db, &id).await,
        },
        Command::Complete { id, say, who } => {
            let result = match (id, say) {
                (_, Some(utterance)) => {
                    let matcher = matcher(&config)?;
                    engine
                        .complete_from_utterance(
                            matcher.as_ref(),
                            &utterance,
                            who.entity(),
                            who.scope(),
                            &opts,
                        )
                        .await?
                }
                (Some(id), None) => {
                    let id = resolve_id(&db, &id).await?;
                    engine.complete(id, who.entity(), who.scope(), &opts).await?
                }
                (None, None) => anyhow::bail!("give a task id or --say"),
            };
            print_completion(&result);
            Ok(())
        }
        Command::RetryAward { id, who } => {
            let id = resolve_id(&db, &id).await?;
            let result = engine
                .retry_award(id, who.entity(), who.scope(), &opts)
                .await?;
            print_completion(&result);
            Ok(())
        }
        Command::Balance { entity, history } => {
            cmd_balance(&db, EntityId(entity), history).await
        }
        Command::Reset { watch } => cmd_reset(db, &config, opts, watch).await,
    }
}

fn call_options(config: &Config) -> CallOptions {
    match config.store_timeout {
        Some(limit) => CallOptions::new().timeout(limit),
        None => CallOptions::new(),
    }
}

fn matcher(config: &Config) -> anyhow::Result<Box<dyn TaskMatcher>> {
    Ok(match &config.anthropic_api_key {
        Some(key) => Box::new(LlmMatcher::from_key(key, &config.matcher_model)?),
        None => Box::new(NameMatcher),
    })
}

/// Accept a full UUID or a unique prefix.
async fn resolve_id(db: &Db, id_str: &str) -> anyhow::Result<TaskId> {
    if id_str.len() >= 36 {
        return Ok(id_str.parse()?);
    }
    let tasks = db.query(&TaskFilter::default()).await?;
    let matches: Vec<_> = tasks
        .iter()
        .filter(|t| t.id.to_string().starts_with(id_str))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no task matching prefix '{id_str}'"),
        [only] => Ok(only.id),
        many => anyhow::bail!(
            "{} tasks match prefix '{id_str}', be more specific",
            many.len()
        ),
    }
}

async fn cmd_task_add(
    engine: &Engine,
    opts: &CallOptions,
    name: String,
    tags: Vec<String>,
    room: Option<Uuid>,
    due: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
    let mut new = NewTask::from_tags(name, &tags);
    if let Some(room) = room {
        new = new.room(room);
    }
    if let Some(due) = due {
        new = new.due(due);
    }

    let task = engine.create_task(new, opts).await?;
    println!(
        "Created: {} ({}, priority {})",
        task.id,
        task.category(),
        task.priority.get()
    );
    Ok(())
}

async fn cmd_task_list(
    db: &Db,
    engine: &Engine,
    opts: &CallOptions,
    room: Option<Uuid>,
    category: Option<Category>,
    all: bool,
) -> anyhow::Result<()> {
    let mut tasks = if all {
        let mut filter = TaskFilter::default();
        if let Some(room) = room {
            filter = filter.room(room);
        }
        db.query(&filter).await?
    } else {
        engine.actionable_tasks(room, opts).await?
    };
    if let Some(category) = category {
        tasks.retain(|t| t.category() == category);
    }

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<12}  {:<4}  {:<10}  {:<30}  CREATED",
        "ID", "CATEGORY", "PRI", "STATE", "NAME"
    );
    println!("{}", "-".repeat(90));

    for task in &tasks {
        let short_id = &task.id.to_string()[..8];
        let name: String = task.name.chars().take(30).collect();
        println!(
            "{:<8}  {:<12}  {:<4}  {:<10}  {:<30}  {}",
            short_id,
            task.category(),
            task.priority.get(),
            state_label(task),
            name,
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} task(s)", tasks.len());
    Ok(())
}

fn state_label(task: &TaskRecord) -> &'static str {
    if task.status.completed {
        "completed"
    } else if task.status.awaiting_choice {
        "awaiting"
    } else {
        "open"
    }
}

async fn cmd_task_show(db: &Db, id_str: &str) -> anyhow::Result<()> {
    let id = resolve_id(db, id_str).await?;
    let task = db.get(id).await?;

    println!("ID:         {}", task.id);
    println!("Name:       {}", task.name);
    println!("Category:   {}", task.category());
    println!("Priority:   {}", task.priority.get());
    println!("Urgent:     {}", task.urgent);
    println!("State:      {}", state_label(&task));
    println!(
        "Room:       {}",
        task.room_id.map(|r| r.to_string()).unwrap_or("-".to_string())
    );
    match &task.progress {
        Progress::Daily(d) => {
            println!("Streak:     {}", d.streak);
            println!("Today:      {}", if d.completed_today { "done" } else { "open" });
        }
        Progress::OneOff(o) => {
            if let Some(due) = o.due_date {
                println!("Due:        {due}");
            }
            if let Some(on_time) = o.completed_on_time {
                println!("On Time:    {on_time}");
            }
        }
        Progress::Aspirational(_) | Progress::Generic(_) => {}
    }
    if let Some(at) = task.progress.completed_at() {
        println!("Completed:  {at}");
    }
    if let Some(points) = task.points_awarded {
        println!("Points:     {points}");
    }
    println!("Version:    {}", task.version);
    println!("Created:    {}", task.created_at);
    println!("Updated:    {}", task.updated_at);
    Ok(())
}

fn print_completion(result: &CompletionResult) {
    println!("Completed: \"{}\" ({})", result.task_name, result.category);
    println!("Points:    {}", result.points);
    if let Some(streak) = result.streak {
        println!("Streak:    {streak}");
    }
    if let Some(on_time) = result.on_time {
        println!("Timing:    {}", if on_time { "on time" } else { "late" });
    }
    if let Some(total) = result.total {
        println!("Total:     {total}");
    }
}

async fn cmd_balance(db: &Db, entity: EntityId, history: bool) -> anyhow::Result<()> {
    let Some(entry) = db.entry(entity).await? else {
        println!("{entity}: 0 points");
        return Ok(());
    };

    println!("{entity}: {} points", entry.current_points);
    if history {
        for item in entry.history.iter().rev() {
            println!(
                "  {}  {:>+5}  {}",
                item.timestamp.format("%Y-%m-%d %H:%M"),
                item.delta,
                item.reason
            );
        }
    }
    Ok(())
}

async fn cmd_reset(
    db: Arc<Db>,
    config: &Config,
    opts: CallOptions,
    watch: bool,
) -> anyhow::Result<()> {
    let reset = DailyReset::new(db).with_interval(config.reset_interval);

    if !watch {
        let count = reset.reset_daily_tasks(&opts).await?;
        println!("Reset {count} daily task(s).");
        return Ok(());
    }

    let token = CancellationToken::new();
    let opts = opts.cancel_with(token.clone());
    let stop = token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stop.cancel();
    });

    let schedule = reset.schedule();
    tracing::info!(name = schedule.name, interval = ?schedule.interval, "reset scheduler started");
    let mut ticker = tokio::time::interval(schedule.interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                match reset.reset_daily_tasks(&opts).await {
                    Ok(_) => {}
                    Err(ascend::error::Error::Cancelled) => break,
                    Err(e) => tracing::error!(error = %e, "daily reset failed"),
                }
            }
        }
    }
    tracing::info!("reset scheduler stopped");
    Ok(())
}
