//! cronq - a cron-style task scheduler with priority admission.
//!
//! Usage:
//!   cronq run --config <file>        Run the scheduler loops
//!   cronq validate --config <file>   Validate a configuration without running
//!   cronq next <cron>                Preview upcoming firing times

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cronq::api::{self, ApiConfig};
use cronq::config::{QueueConfig, SchedulerConfig, StorageConfig, YamlLoader};
use cronq::{
    DefinitionError, Event, EventBus, EventHandler, InFlightQueue, InMemoryQueue, InMemoryStorage,
    LoggingExecutor, Schedule, Scheduler, Storage, definitions,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// cronq - a cron-style task scheduler with priority admission
#[derive(Parser)]
#[command(name = "cronq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler
    Run {
        /// Path to the YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Override the admission capacity
        #[arg(short = 'j', long)]
        max_parallelism: Option<usize>,

        /// Override the detector and admission interval in seconds
        #[arg(long)]
        poll_interval: Option<u64>,
    },

    /// Validate a configuration without running
    Validate {
        /// Path to the YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Print the next firing times of a cron expression
    Next {
        /// Cron expression or shortcut
        #[arg(value_name = "CRON")]
        cron: String,

        /// IANA timezone the fields are evaluated in
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Number of occurrences to print
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// Start from this RFC 3339 instant instead of now
        #[arg(long)]
        after: Option<DateTime<Utc>>,
    },
}

/// Event handler that logs scheduler activity.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskFired {
                task_name,
                priority,
                duplicate,
                ..
            } => {
                if *duplicate {
                    debug!("Task '{}' fired while already queued", task_name);
                } else {
                    info!("Task '{}' fired (priority {})", task_name, priority);
                }
            }
            Event::DefinitionRetired { task_name, .. } => {
                info!("Task '{}' has no occurrences left", task_name);
            }
            Event::TaskAdmitted { task_name, .. } => {
                info!("Task '{}' admitted", task_name);
            }
            Event::AdmissionRolledBack {
                task_name, reason, ..
            } => {
                warn!("Task '{}' returned to pending: {}", task_name, reason);
            }
            Event::TaskCompleted { task_name, .. } => {
                info!("Task '{}' completed", task_name);
            }
            Event::StaleCompletion { task_name, .. } => {
                warn!("Ignored completion for '{}': not running", task_name);
            }
            Event::InstancesPurged { count, .. } => {
                debug!("Purged {} completed instance(s)", count);
            }
            Event::InstancesReclaimed { task_names, .. } => {
                let names: Vec<&str> = task_names.iter().map(|n| n.as_str()).collect();
                warn!("Reclaimed stale instance(s): {}", names.join(", "));
            }
            Event::ExecutionFinished {
                task_name,
                duration,
                error: Some(err),
                ..
            } => {
                error!("Task '{}' failed after {:?}: {}", task_name, duration, err);
            }
            Event::ExecutionFinished { .. } => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            max_parallelism,
            poll_interval,
        } => {
            run_scheduler(config, max_parallelism, poll_interval).await?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Next {
            cron,
            timezone,
            count,
            after,
        } => {
            print_next(&cron, &timezone, count, after)?;
        }
    }

    Ok(())
}

/// Load the configuration and run the scheduler on the configured storage.
async fn run_scheduler(
    config_path: PathBuf,
    max_parallelism: Option<usize>,
    poll_interval: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading configuration from: {}", config_path.display());

    let mut config = YamlLoader::load_config(&config_path)?;
    if let Some(max) = max_parallelism {
        config.max_parallelism = max;
    }
    if let Some(secs) = poll_interval {
        config.set_poll_interval(secs);
    }
    config.validate()?;

    let queue = build_queue(&config.queue)?;

    match &config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            run_with_storage(Arc::new(InMemoryStorage::new()), queue, config).await
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("Using SQLite storage at {}", path);
            let storage = Arc::new(cronq::SqliteStorage::new(path).await?);
            let result = run_with_storage(Arc::clone(&storage), queue, config).await;
            storage.close().await;
            result
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("sqlite storage requested but cronq was built without the 'sqlite' feature".into())
        }
    }
}

/// Build the configured in-flight queue.
fn build_queue(config: &QueueConfig) -> Result<Arc<dyn InFlightQueue>, Box<dyn std::error::Error>> {
    match config {
        QueueConfig::Memory => Ok(Arc::new(InMemoryQueue::new())),
        #[cfg(feature = "redis")]
        QueueConfig::Redis { url, key } => {
            info!("Using Redis in-flight queue '{}'", key);
            Ok(Arc::new(cronq::RedisQueue::with_key(url, key)?))
        }
        #[cfg(not(feature = "redis"))]
        QueueConfig::Redis { .. } => {
            Err("redis queue requested but cronq was built without the 'redis' feature".into())
        }
    }
}

async fn run_with_storage<S: Storage + 'static>(
    storage: Arc<S>,
    queue: Arc<dyn InFlightQueue>,
    config: SchedulerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    seed_tasks(storage.as_ref(), &config).await;

    // Create event bus with logging handler
    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let mut scheduler = Scheduler::with_storage(Arc::clone(&storage))
        .with_queue(Arc::clone(&queue))
        .with_event_bus(event_bus)
        .with_detector_interval(config.detector_interval())
        .with_admission_interval(config.admission_interval())
        .with_janitor_interval(config.janitor_interval())
        .with_max_parallelism(config.max_parallelism)
        .with_shutdown_timeout(config.shutdown_timeout());

    if let Some(deadline) = config.running_deadline() {
        scheduler = scheduler.with_running_deadline(deadline);
    }
    if config.dispatch_workers > 0 {
        scheduler = scheduler.with_executor(Arc::new(LoggingExecutor), config.dispatch_workers);
    }

    let completion = scheduler.completion_handler();
    let capacity = scheduler.max_parallelism();

    info!(
        "Starting scheduler (detector: {}s, admission: {}s, capacity: {})...",
        config.detector_interval_secs, config.admission_interval_secs, capacity
    );
    info!("Press Ctrl+C to stop");

    let (handle, scheduler_task) = scheduler.start().await;

    let api_task = match config.api.clone() {
        Some(api_config) => {
            let state = api::create_api_state(
                handle.clone(),
                Arc::clone(&storage),
                Arc::clone(&queue),
                completion,
                capacity,
            );
            Some(start_api(api_config, state).await?)
        }
        None => None,
    };

    // Wait for Ctrl+C
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    if let Some(task) = api_task {
        task.abort();
    }

    info!("Goodbye!");
    Ok(())
}

async fn start_api<S: Storage + 'static>(
    config: ApiConfig,
    state: api::ApiState<S>,
) -> Result<tokio::task::JoinHandle<()>, Box<dyn std::error::Error>> {
    Ok(api::start_server(config, state).await?)
}

/// Create the configured seed tasks. Names already in storage keep their stored
/// schedule; rejected tasks are logged and skipped.
async fn seed_tasks(storage: &dyn Storage, config: &SchedulerConfig) {
    let now = Utc::now();
    for task in &config.tasks {
        let spec = match task.to_spec(now) {
            Ok(spec) => spec,
            Err(e) => {
                error!("Task '{}' rejected: {}", task.name, e);
                continue;
            }
        };
        match definitions::create(storage, spec, now).await {
            Ok(definition) => {
                info!(
                    "  - {} ({}): next run {}",
                    definition.name, definition.cron, definition.next_run
                );
            }
            Err(DefinitionError::DuplicateName(name)) => {
                info!("  - {}: already defined, keeping stored schedule", name);
            }
            Err(e) => {
                error!("Task '{}' rejected ({}): {}", task.name, e.reason(), e);
            }
        }
    }
}

/// Validate a configuration without running.
fn validate_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", config_path.display());

    let config = match YamlLoader::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Validation failed: {}", e);
            return Err(e.into());
        }
    };

    let now = Utc::now();
    let mut failures = 0;
    for task in &config.tasks {
        match task
            .to_spec(now)
            .map_err(|e| e.to_string())
            .and_then(|spec| spec.into_definition(now).map_err(|e| e.to_string()))
        {
            Ok(definition) => info!(
                "  - {}: OK (next run {})",
                definition.name, definition.next_run
            ),
            Err(e) => {
                failures += 1;
                error!("  - {}: {}", task.name, e);
            }
        }
    }

    if failures > 0 {
        return Err(format!("{} task(s) failed validation", failures).into());
    }

    info!("Configuration is valid ({} task(s))", config.tasks.len());
    Ok(())
}

/// Print upcoming firing times of a cron expression.
fn print_next(
    cron: &str,
    timezone: &str,
    count: usize,
    after: Option<DateTime<Utc>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let schedule = Schedule::with_timezone(cron, timezone)?;
    let after = after.unwrap_or_else(Utc::now);

    for time in schedule.next_n_after(after, count)? {
        println!("{}", time.to_rfc3339());
    }
    Ok(())
}
