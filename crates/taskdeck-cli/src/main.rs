//! taskdeck CLI - Command line dashboard for the task center.
//!
//! `watch` mirrors the center live through the state store; every other
//! command is a single REST call whose response is printed as JSON.

use std::error::Error;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskdeck_client::{ClientConfig, HttpClient, WsConnector};
use taskdeck_core::{
    BackendKind, ConfigPatch, InstanceId, InstanceUpdate, NewInstance, NewTask, TaskId,
    TaskStatus,
};
use taskdeck_sync::{DashboardState, StateStore};

/// taskdeck - Task center dashboard
#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(about = "Dashboard and admin tool for the task center", long_about = None)]
#[command(version)]
struct Cli {
    /// Base URL of the center's REST API
    #[arg(long, env = "TASKDECK_API", default_value = "http://127.0.0.1:8000/api")]
    api: String,

    /// Request timeout in seconds
    #[arg(long, env = "TASKDECK_TIMEOUT", default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the center live until interrupted
    Watch {
        /// Delay before reopening the push channel, in milliseconds
        #[arg(long, env = "TASKDECK_RECONNECT_MS", default_value = "3000")]
        reconnect_ms: u64,

        /// Print the full state as JSON on every change
        #[arg(long)]
        json: bool,
    },

    /// Show queue, task and instance counters
    Stats,

    /// Submit and manage tasks
    #[command(subcommand)]
    Tasks(TaskCommands),

    /// Manage backend instances
    #[command(subcommand, alias = "inst")]
    Instances(InstanceCommands),

    /// Read or change the center's configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Submit a task
    Create {
        /// Task payload as a JSON object
        #[arg(short, long)]
        payload: String,

        /// Priority, 1 (lowest) to 10
        #[arg(long, default_value = "5")]
        priority: u8,

        /// Wait for the result instead of returning once queued
        #[arg(long)]
        wait: bool,
    },

    /// Show one task
    Get {
        /// Task ID
        id: String,
    },

    /// List tasks
    List {
        /// Only tasks in this status
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },

    /// Cancel a pending or running task
    Cancel {
        /// Task ID
        id: String,
    },

    /// List failed tasks
    Failed,

    /// Requeue a failed task
    Retry {
        /// Task ID
        id: String,
    },

    /// Requeue every failed task
    #[command(name = "retry-all")]
    RetryAll,
}

#[derive(Subcommand)]
enum InstanceCommands {
    /// List instances
    List,

    /// Register an instance
    Add {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Base URL the center dispatches to
        #[arg(short, long)]
        url: String,

        /// Processing backend
        #[arg(short, long, default_value = "pipeline")]
        backend: BackendKind,
    },

    /// Change an instance's registration
    Update {
        /// Instance ID
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        backend: Option<BackendKind>,
    },

    /// Remove an instance (refused while it runs a task)
    Remove {
        /// Instance ID
        id: String,
    },

    /// Put an instance back into rotation
    Enable {
        /// Instance ID
        id: String,
    },

    /// Take an instance out of rotation
    Disable {
        /// Instance ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the current configuration
    Get,

    /// Change configuration fields
    Set(ConfigArgs),
}

/// Fields that can be changed; unset flags are left as they are.
#[derive(Args)]
struct ConfigArgs {
    /// Task timeout in seconds (>= 10)
    #[arg(long)]
    task_timeout: Option<u64>,

    /// Queue timeout in seconds (>= 60)
    #[arg(long)]
    queue_timeout: Option<u64>,

    /// Maximum queue size (>= 1)
    #[arg(long)]
    max_queue_size: Option<u64>,

    /// Honour task priorities
    #[arg(long)]
    enable_priority: Option<bool>,

    /// Retry attempts for failed tasks
    #[arg(long)]
    max_retries: Option<u64>,

    /// Delay between retries in seconds (>= 1)
    #[arg(long)]
    retry_delay: Option<u64>,

    /// Health check interval in seconds (>= 5)
    #[arg(long)]
    health_check_interval: Option<u64>,

    /// Per-request instance timeout in seconds (>= 1)
    #[arg(long)]
    instance_timeout: Option<u64>,
}

impl From<ConfigArgs> for ConfigPatch {
    fn from(args: ConfigArgs) -> Self {
        Self {
            task_timeout: args.task_timeout,
            queue_timeout: args.queue_timeout,
            max_queue_size: args.max_queue_size,
            enable_priority: args.enable_priority,
            max_retries: args.max_retries,
            retry_delay: args.retry_delay,
            health_check_interval: args.health_check_interval,
            instance_timeout: args.instance_timeout,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so stdout stays parseable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskdeck=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.api);
    config.request_timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Watch { reconnect_ms, json } => {
            config.reconnect_delay = Duration::from_millis(reconnect_ms);
            watch(&config, json).await?;
        }
        Commands::Stats => {
            let client = HttpClient::new(&config)?;
            print_json(&client.get_stats().await?)?;
        }
        Commands::Tasks(cmd) => run_task_command(&HttpClient::new(&config)?, cmd).await?,
        Commands::Instances(cmd) => run_instance_command(&HttpClient::new(&config)?, cmd).await?,
        Commands::Config(cmd) => run_config_command(&HttpClient::new(&config)?, cmd).await?,
    }

    Ok(())
}

async fn watch(config: &ClientConfig, json: bool) -> Result<(), Box<dyn Error>> {
    let store = StateStore::from_config(config)?;

    let report = store.init(WsConnector).await;
    for failure in &report.failures {
        warn!(error = %failure, "Initial pull failed, waiting for push data");
    }

    let mut updates = WatchStream::new(store.subscribe());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing push channel");
                break;
            }
            update = updates.next() => {
                let Some(state) = update else { break };
                if json {
                    println!("{}", serde_json::to_string(&state)?);
                } else {
                    println!("{}", summary_line(&state));
                }
            }
        }
    }

    store.teardown().await;
    Ok(())
}

async fn run_task_command(client: &HttpClient, cmd: TaskCommands) -> Result<(), Box<dyn Error>> {
    match cmd {
        TaskCommands::Create {
            payload,
            priority,
            wait,
        } => {
            let payload = serde_json::from_str(&payload)?;
            let mut task = NewTask::new(payload).with_priority(priority);
            if wait {
                task = task.blocking();
            }
            task.validate()?;
            print_json(&client.create_task(&task).await?)?;
        }
        TaskCommands::Get { id } => {
            print_json(&client.get_task(&TaskId::new(id)).await?)?;
        }
        TaskCommands::List { status } => {
            print_json(&client.list_tasks(status).await?)?;
        }
        TaskCommands::Cancel { id } => {
            print_json(&client.cancel_task(&TaskId::new(id)).await?)?;
        }
        TaskCommands::Failed => {
            print_json(&client.list_failed_tasks().await?)?;
        }
        TaskCommands::Retry { id } => {
            print_json(&client.retry_task(&TaskId::new(id)).await?)?;
        }
        TaskCommands::RetryAll => {
            print_json(&client.retry_all_tasks().await?)?;
        }
    }
    Ok(())
}

async fn run_instance_command(
    client: &HttpClient,
    cmd: InstanceCommands,
) -> Result<(), Box<dyn Error>> {
    match cmd {
        InstanceCommands::List => {
            print_json(&client.list_instances().await?)?;
        }
        InstanceCommands::Add { name, url, backend } => {
            let instance = NewInstance::new(name, url).with_backend(backend);
            instance.validate()?;
            print_json(&client.add_instance(&instance).await?)?;
        }
        InstanceCommands::Update {
            id,
            name,
            url,
            backend,
        } => {
            let update = InstanceUpdate { name, url, backend };
            update.validate()?;
            print_json(&client.update_instance(&InstanceId::new(id), &update).await?)?;
        }
        InstanceCommands::Remove { id } => {
            print_json(&client.remove_instance(&InstanceId::new(id)).await?)?;
        }
        InstanceCommands::Enable { id } => {
            print_json(&client.enable_instance(&InstanceId::new(id)).await?)?;
        }
        InstanceCommands::Disable { id } => {
            print_json(&client.disable_instance(&InstanceId::new(id)).await?)?;
        }
    }
    Ok(())
}

async fn run_config_command(
    client: &HttpClient,
    cmd: ConfigCommands,
) -> Result<(), Box<dyn Error>> {
    match cmd {
        ConfigCommands::Get => {
            print_json(&client.get_config().await?)?;
        }
        ConfigCommands::Set(args) => {
            let patch = ConfigPatch::from(args);
            if patch.is_empty() {
                return Err("no configuration fields given".into());
            }
            patch.validate()?;
            print_json(&client.update_config(&patch).await?)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line rendering of the dashboard.
fn summary_line(state: &DashboardState) -> String {
    let stats = &state.stats;
    format!(
        "{:<7}  pending={} running={}  completed={} failed={} total={}  instances={} idle={} busy={} offline={}",
        if state.live { "LIVE" } else { "OFFLINE" },
        stats.queue.pending,
        stats.queue.running,
        stats.tasks.completed,
        stats.tasks.failed,
        stats.tasks.total,
        stats.instances.total,
        stats.instances.idle,
        stats.instances.busy,
        stats.instances.offline,
    )
}
