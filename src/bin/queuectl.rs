//! queuectl CLI: enqueue jobs, run workers, inspect the queue.

use clap::{Parser, Subcommand};
use queuectl::config::{Config, SettingKey, Settings};
use queuectl::dlq::DeadLetterQueue;
use queuectl::model::{Job, JobId, NewJob, State};
use queuectl::storage::{JobStore, StoreOptions};
use queuectl::telemetry::{TelemetryConfig, init_telemetry};
use queuectl::worker::{WorkerConfig, WorkerPool};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "queuectl", about = "Durable shell-command queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a shell command
    Enqueue {
        /// Command line, run with `sh -c`
        command: String,
        /// Job ID (generated if omitted)
        #[arg(long)]
        id: Option<String>,
        /// Attempts before the job goes dead (default from config)
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Worker operations
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// List jobs in a state, most recently updated first
    List {
        /// pending, processing, completed or dead
        #[arg(long, default_value = "pending")]
        state: String,
        #[arg(long)]
        json: bool,
    },
    /// Show a job
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Job counts by state
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Dead-letter queue operations
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Read or change queue defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Run workers in the foreground until interrupted
    Start {
        /// Number of workers
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Subcommand)]
enum DlqAction {
    /// List dead jobs
    List {
        #[arg(long)]
        json: bool,
    },
    /// Move a dead job back to pending with a fresh retry budget
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one setting, or all of them
    Get { key: Option<String> },
    /// Change a setting (max-retries, backoff-base)
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Only long-running workers export telemetry; one-shot commands log locally.
    let endpoint = match cli.command {
        Command::Worker { .. } => config.otel_endpoint.clone(),
        _ => None,
    };
    let _guard = init_telemetry(TelemetryConfig {
        endpoint,
        service_name: "queuectl".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Enqueue {
            command,
            id,
            max_retries,
        } => cmd_enqueue(&config, command, id, max_retries),
        Command::Worker {
            action: WorkerAction::Start { count },
        } => cmd_worker_start(&config, count).await,
        Command::List { state, json } => cmd_list(&config, &state, json),
        Command::Show { id, json } => cmd_show(&config, id, json),
        Command::Status { json } => cmd_status(&config, json),
        Command::Dlq { action } => match action {
            DlqAction::List { json } => cmd_dlq_list(&config, json),
            DlqAction::Retry { id } => cmd_dlq_retry(&config, id),
        },
        Command::Config { action } => match action {
            ConfigAction::Get { key } => cmd_config_get(&config, key),
            ConfigAction::Set { key, value } => cmd_config_set(&config, &key, &value),
        },
    }
}

fn open_store(config: &Config) -> anyhow::Result<JobStore> {
    Ok(JobStore::open(&config.db_path, &StoreOptions::default())?)
}

fn cmd_enqueue(
    config: &Config,
    command: String,
    id: Option<String>,
    max_retries: Option<u32>,
) -> anyhow::Result<()> {
    let settings = Settings::load(&config.settings_path());
    let mut new = NewJob::new(command);
    if let Some(id) = id {
        new = new.id(id);
    }
    if let Some(n) = max_retries {
        new = new.max_retries(n);
    }

    let mut store = open_store(config)?;
    let job = store.enqueue(new, settings.max_retries)?;
    println!("Enqueued: {} (max retries: {})", job.id, job.max_retries);
    Ok(())
}

async fn cmd_worker_start(config: &Config, count: usize) -> anyhow::Result<()> {
    let settings = Settings::load(&config.settings_path());
    let worker_config = WorkerConfig {
        backoff_base: settings.backoff_base,
        ..WorkerConfig::default()
    };

    let pool = WorkerPool::start(
        count,
        &config.db_path,
        &StoreOptions::default(),
        worker_config,
    )?;

    let token = pool.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested, waiting for running jobs to finish");
        token.cancel();
    });

    pool.join().await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM, only Ctrl-C will stop workers"),
        }
    }
    tokio::signal::ctrl_c().await.ok();
}

fn cmd_list(config: &Config, state: &str, json: bool) -> anyhow::Result<()> {
    let state: State = state
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid state: {state}"))?;
    let store = open_store(config)?;
    let jobs = store.list_by_state(state)?;
    print_jobs(&jobs, json)
}

fn cmd_show(config: &Config, id: String, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let job = store.get(&JobId(id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!("ID:          {}", job.id);
    println!("Command:     {}", job.command);
    println!("State:       {}", job.state);
    println!("Attempts:    {}/{}", job.attempts, job.max_retries);
    println!("Created:     {}", job.created_at);
    println!("Updated:     {}", job.updated_at);
    println!("Run at:      {}", job.run_at);
    Ok(())
}

fn cmd_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let summary = store.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for state in State::ALL {
        println!("{:<12} {:>6}", state, summary.count(state));
    }
    println!("{:<12} {:>6}", "total", summary.total());
    Ok(())
}

fn cmd_dlq_list(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut store = open_store(config)?;
    let jobs = DeadLetterQueue::new(&mut store).list()?;
    print_jobs(&jobs, json)
}

fn cmd_dlq_retry(config: &Config, id: String) -> anyhow::Result<()> {
    let mut store = open_store(config)?;
    let id = JobId(id);
    if DeadLetterQueue::new(&mut store).retry(&id)? {
        println!("Requeued: {id}");
    } else {
        println!("No dead job with id {id}; nothing changed.");
    }
    Ok(())
}

fn cmd_config_get(config: &Config, key: Option<String>) -> anyhow::Result<()> {
    let settings = Settings::load(&config.settings_path());
    match key {
        Some(key) => {
            let key: SettingKey = key.parse()?;
            println!("{}", settings.get(key));
        }
        None => {
            for key in SettingKey::ALL {
                println!("{key} = {}", settings.get(key));
            }
        }
    }
    Ok(())
}

fn cmd_config_set(config: &Config, key: &str, value: &str) -> anyhow::Result<()> {
    let path = config.settings_path();
    let key: SettingKey = key.parse()?;
    let mut settings = Settings::load(&path);
    settings.set(key, value)?;
    settings.save(&path)?;
    println!("{key} = {}", settings.get(key));
    Ok(())
}

fn print_jobs(jobs: &[Job], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<8}  {:<16}  COMMAND",
        "ID", "STATE", "ATTEMPTS", "UPDATED"
    );
    println!("{}", "-".repeat(100));

    for job in jobs {
        println!(
            "{:<36}  {:<10}  {:<8}  {:<16}  {}",
            truncate(job.id.as_str(), 36),
            job.state,
            format!("{}/{}", job.attempts, job.max_retries),
            job.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            truncate(&job.command, 40),
        );
    }

    println!("\n{} job(s)", jobs.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
