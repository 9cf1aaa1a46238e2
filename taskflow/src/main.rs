//! `taskflow`: personal task manager with optimistic sync.
//!
//! Talks to a PostgREST-style backend when a URL is configured, otherwise
//! runs against in-memory demo data. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/taskflow/config.toml`).
//!
//! ```bash
//! # Offline demo
//! cargo run --bin taskflow -- list
//!
//! # Against a backend
//! TASKFLOW_URL=https://db.example.co TASKFLOW_API_KEY=... TASKFLOW_USER=u1 \
//!     cargo run --bin taskflow -- add "Buy milk" --priority high --due 2026-06-12
//! ```

use std::io::{self, Write as _};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use taskflow::analytics::Analytics;
use taskflow::backend::memory::MemoryBackend;
use taskflow::backend::rest::RestBackend;
use taskflow::backend::{Backend, BackendError};
use taskflow::clock::{Clock, SystemClock};
use taskflow::config::{CliArgs, ClientConfig, ConfigError};
use taskflow::focus::{FocusDurations, FocusTimer};
use taskflow::session::{AuthState, SyncSession};
use taskflow::store::{StoreError, StoreEvent, TaskStore, UpdateOutcome};
use taskflow::view::{Filter, View};
use taskflow_proto::category::{CategoryId, NewCategory};
use taskflow_proto::task::{NewTask, Priority, Task, TaskDraft, TaskId};
use taskflow_proto::user::{User, UserId};

/// User the offline demo data belongs to.
const DEMO_USER: &str = "demo";

#[derive(Parser, Debug)]
#[command(version, about = "Personal task manager with optimistic sync")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show tasks in display order.
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Create a task.
    Add {
        /// Task title.
        title: String,
        /// Priority (low, medium, high).
        #[arg(long, default_value = "medium")]
        priority: Priority,
        /// Due date (YYYY-MM-DD).
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Category id.
        #[arg(long)]
        category: Option<String>,
        /// Notes.
        #[arg(long)]
        description: Option<String>,
    },
    /// Toggle a task's completion.
    Done {
        /// Task id.
        id: String,
    },
    /// Delete a task.
    Rm {
        /// Task id.
        id: String,
    },
    /// Move the task at one index of the listed view to another.
    Move {
        /// Current index in the view.
        from: usize,
        /// Target index in the view.
        to: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Completion statistics.
    Stats,
    /// List categories.
    Categories,
    /// Create a category.
    AddCategory {
        /// Category name.
        name: String,
        /// Display color (hex).
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a category.
    RmCategory {
        /// Category id.
        id: String,
    },
    /// Print changes as they arrive.
    Watch,
    /// Run the focus timer.
    Focus {
        /// Keep alternating focus and break instead of stopping after one
        /// interval.
        #[arg(long)]
        repeat: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct FilterArgs {
    /// View: all, today, upcoming, completed.
    #[arg(long, default_value = "all")]
    view: View,
    /// Case-insensitive title search.
    #[arg(long, default_value = "")]
    search: String,
    /// Only this priority.
    #[arg(long)]
    priority: Option<Priority>,
}

impl From<FilterArgs> for Filter {
    fn from(args: FilterArgs) -> Self {
        Self {
            search: args.search,
            priority: args.priority,
            view: args.view,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no active session")]
    NoSession,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.args.log_level, cli.args.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(err = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// A log file that cannot be opened falls back to stderr with a warning.
/// Returns a [`WorkerGuard`] that must be held until shutdown to flush
/// buffered entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let mut fallback = None;
    let file = match file_path.map(open_log_file) {
        Some(Ok(appender)) => Some(appender),
        Some(Err(reason)) => {
            fallback = Some(reason);
            None
        }
        None => None,
    };
    let to_file = file.is_some();
    let (writer, guard) = match file {
        Some(appender) => tracing_appender::non_blocking(appender),
        None => tracing_appender::non_blocking(io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(env_filter)
        .with_ansi(!to_file)
        .init();

    if let (Some(path), Some(reason)) = (file_path, fallback) {
        tracing::warn!(path = %path.display(), %reason, "cannot open log file, logging to stderr");
    }
    guard
}

fn open_log_file(path: &Path) -> Result<RollingFileAppender, String> {
    let (dir, name) =
        log_file_target(path).ok_or_else(|| "path does not name a file".to_owned())?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Splits a log path into its directory and file name. A bare file name
/// lives in the working directory.
fn log_file_target(path: &Path) -> Option<(&Path, &str)> {
    let name = path.file_name()?.to_str()?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Some((dir, name))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = ClientConfig::load(&cli.args)?;

    if let Command::Focus { repeat } = cli.command {
        return run_focus(config.focus, repeat).await;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    if let Some(rest) = config.to_rest_config()? {
        let user = config.user()?;
        let backend = RestBackend::new(rest)?;
        execute(backend, user, clock, &config, cli.command).await
    } else {
        tracing::warn!("no backend url configured, using in-memory demo data");
        let user = config.user().unwrap_or_else(|_| UserId::new(DEMO_USER));
        let backend = demo_backend(&clock, &user).await?;
        execute(backend, user, clock, &config, cli.command).await
    }
}

async fn execute<B: Backend + Clone>(
    backend: B,
    user: UserId,
    clock: Arc<dyn Clock>,
    config: &ClientConfig,
    command: Command,
) -> Result<(), CliError> {
    let (_auth, auth_rx) = watch::channel(AuthState::signed_in(User::new(user.as_str())));
    let mut session = SyncSession::new(backend, Arc::clone(&clock), config.store, auth_rx);
    session.sync().await?;
    let store = session.store().cloned().ok_or(CliError::NoSession)?;
    let today = clock.today();

    match command {
        Command::List { filter } => {
            store.set_filter(filter.into());
            print_tasks(&store.visible_tasks(), today);
        }
        Command::Add {
            title,
            priority,
            due,
            category,
            description,
        } => {
            let mut draft = TaskDraft::new(title).with_priority(priority);
            draft.due_date = due;
            draft.category_id = category.map(CategoryId::new);
            draft.description = description;
            let task = store.create(draft).await?;
            println!("created {}", task.id);
        }
        Command::Done { id } => match store.toggle_complete(&TaskId::new(id)).await? {
            UpdateOutcome::Saved(task) => {
                let state = if task.completed { "done" } else { "open" };
                println!("{} is {state}", task.id);
            }
            UpdateOutcome::Superseded => println!("superseded by a later edit"),
        },
        Command::Rm { id } => {
            store.delete(&TaskId::new(id)).await?;
            println!("deleted");
        }
        Command::Move { from, to, filter } => {
            store.set_filter(filter.into());
            store.reorder(from, to).await?;
            print_tasks(&store.visible_tasks(), today);
        }
        Command::Stats => print_stats(&store.analytics()),
        Command::Categories => {
            for category in store.categories() {
                println!("{:>6}  {}  {}", category.id, category.color, category.name);
            }
        }
        Command::AddCategory { name, color } => {
            let category = store.create_category(&name, color).await?;
            println!("created category {}", category.id);
        }
        Command::RmCategory { id } => {
            store.delete_category(&CategoryId::new(id)).await?;
            println!("deleted category");
        }
        Command::Watch => watch_events(&mut session).await?,
        Command::Focus { .. } => {}
    }
    Ok(())
}

async fn watch_events<B: Backend + Clone>(session: &mut SyncSession<B>) -> Result<(), CliError> {
    let mut events = session.take_events().ok_or(CliError::NoSession)?;
    if !session.is_listening() {
        eprintln!("change feed unavailable; nothing to watch");
        return Ok(());
    }
    eprintln!("watching for changes (ctrl-c to stop)");
    while let Some(event) = events.recv().await {
        match event {
            StoreEvent::TaskInserted(task) => println!("+ {} {}", task.id, task.title),
            StoreEvent::TaskUpdated(task) => println!("~ {} {}", task.id, task.title),
            StoreEvent::TaskRemoved(id) => println!("- {id}"),
            other => tracing::debug!(?other, "store event"),
        }
    }
    Ok(())
}

async fn run_focus(durations: FocusDurations, repeat: bool) -> Result<(), CliError> {
    let mut timer = FocusTimer::new(durations);
    let mut ticks = tokio::time::interval(Duration::from_secs(1));
    ticks.tick().await;
    timer.start();
    let mut out = io::stdout();
    loop {
        write!(out, "\r{:<5} {}", timer.phase(), timer.display())?;
        out.flush()?;
        ticks.tick().await;
        if let Some(next) = timer.tick() {
            writeln!(out, "\r{next} time!        ")?;
            if !repeat {
                return Ok(());
            }
            timer.start();
        }
    }
}

fn print_tasks(tasks: &[Task], today: NaiveDate) {
    if tasks.is_empty() {
        println!("no tasks");
        return;
    }
    for (index, task) in tasks.iter().enumerate() {
        let check = if task.completed { "x" } else { " " };
        let due = match task.due_date {
            Some(due) if task.is_overdue(today) => format!("  due {due} (overdue)"),
            Some(due) => format!("  due {due}"),
            None => String::new(),
        };
        println!(
            "{index:>3}. [{check}] {:<6} {} ({}){due}",
            task.id, task.title, task.priority
        );
    }
}

fn print_stats(stats: &Analytics) {
    println!(
        "{}/{} done ({}%), {} today",
        stats.completed,
        stats.total,
        stats.percentage(),
        stats.completed_today
    );
    for day in &stats.weekly {
        println!("  {} {}", day.label, "#".repeat(day.completed));
    }
}

/// In-memory backend seeded with a few tasks for `user`.
async fn demo_backend(clock: &Arc<dyn Clock>, user: &UserId) -> Result<MemoryBackend, BackendError> {
    let backend = MemoryBackend::new(Arc::clone(clock));
    let today = clock.today();
    let demo = [
        ("Plan the week", Priority::High, today.pred_opt()),
        ("Buy groceries", Priority::Medium, Some(today)),
        ("Call the dentist", Priority::Low, today.succ_opt()),
        ("Read a chapter", Priority::Low, None),
    ];
    for (position, (title, priority, due)) in (0_i64..).zip(demo) {
        let mut draft = TaskDraft::new(title).with_priority(priority);
        draft.due_date = due;
        backend
            .insert_task(&NewTask::from_draft(draft, user.clone(), position))
            .await?;
    }
    backend
        .insert_category(&NewCategory::new("Personal", None, user.clone()))
        .await?;
    Ok(backend)
}
