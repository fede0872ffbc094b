// src/main.rs

use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};

use netra_resilience::config::{McpClientConfig, NetraConfig};
use netra_resilience::resilience::{StorageMode, PRIMARY_SERVICE};
use netra_resilience::{init_logging, McpClient, RedisSessionManager, ResilientStorage, Session};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "netra",
    about = "Inspect Netra storage health, sessions and MCP servers"
)]
struct Opt {
    /// Verbosity level (ignored when RUST_LOG is set)
    #[structopt(short, long, parse(from_occurrences), global = true)]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Check Redis through the health monitor
    Health {
        /// Keep checking until interrupted
        #[structopt(short, long)]
        watch: bool,

        /// Seconds between checks in watch mode
        #[structopt(short, long, default_value = "5")]
        interval: u64,
    },
    /// Manage user sessions
    Session(SessionCommand),
    /// Talk to an MCP server
    Mcp(McpCommand),
}

#[derive(Debug, StructOpt)]
enum SessionCommand {
    /// Create a session for a user
    Create {
        user_id: String,
        /// Session data as a JSON object
        #[structopt(short, long)]
        data: Option<String>,
    },
    /// Show one session
    Get { session_id: String },
    /// List a user's live sessions
    List { user_id: String },
    /// Delete a session
    Delete { session_id: String },
}

#[derive(Debug, StructOpt)]
enum McpCommand {
    /// List the server's tools
    Tools {
        /// Server url, defaults to NETRA_MCP_URL
        #[structopt(short, long)]
        url: Option<String>,
    },
    /// Call a tool
    Call {
        tool: String,
        /// Tool arguments as a JSON object
        #[structopt(short, long)]
        args: Option<String>,
        #[structopt(short, long)]
        url: Option<String>,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    dotenv().ok();
    let opt = Opt::from_args();

    if opt.verbose > 0 && std::env::var("RUST_LOG").is_err() {
        let level = if opt.verbose == 1 { "debug" } else { "trace" };
        std::env::set_var("RUST_LOG", format!("netra={0},netra_resilience={0}", level));
    }
    init_logging();

    let config = NetraConfig::from_env()?;
    match opt.command {
        Command::Health { watch, interval } => health(&config, watch, interval).await,
        Command::Session(command) => session(&config, command).await,
        Command::Mcp(command) => mcp(&config, command).await,
    }
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

async fn connect_storage(config: &NetraConfig) -> CliResult<ResilientStorage> {
    let progress = spinner(&format!("Connecting to {}", config.redis.url));
    let storage = ResilientStorage::connect(config.redis.clone(), config.resilience.clone()).await;
    progress.finish_and_clear();
    Ok(storage?)
}

fn parse_object(raw: Option<&str>) -> CliResult<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str(raw)? {
            Value::Object(map) => Ok(map),
            _ => Err("expected a JSON object".into()),
        },
    }
}

async fn health(config: &NetraConfig, watch: bool, interval: u64) -> CliResult<()> {
    let storage = connect_storage(config).await?;
    let running = Arc::new(AtomicBool::new(true));
    if watch {
        let flag = Arc::clone(&running);
        ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;
    }

    loop {
        storage.health_monitor().check_service(PRIMARY_SERVICE).await;

        let mut table = Table::new();
        table.add_row(row!["Service", "Status", "Latency (ms)", "Failures", "Last error"]);
        for info in storage.health_monitor().all_health().await {
            table.add_row(row![
                info.name,
                info.status,
                info.response_time_ms.map(|ms| ms.to_string()).unwrap_or_default(),
                format!("{}/{}", info.consecutive_failures, info.total_failures),
                info.last_error.unwrap_or_default()
            ]);
        }
        let breaker = storage.circuit_breaker().status().await;
        println!("Storage mode: {:?}", storage.mode().await);
        println!(
            "Circuit '{}': {:?} ({} rejected)",
            breaker.name, breaker.state, breaker.rejected_calls
        );
        table.printstd();

        if !watch {
            break;
        }
        let deadline = time::Instant::now() + Duration::from_secs(interval.max(1));
        while running.load(Ordering::SeqCst) && time::Instant::now() < deadline {
            time::sleep(Duration::from_millis(200)).await;
        }
        if !running.load(Ordering::SeqCst) {
            info!("Stopping health watch");
            break;
        }
    }

    storage.health_monitor().stop();
    Ok(())
}

fn print_sessions(sessions: &[Session]) {
    let mut table = Table::new();
    table.add_row(row!["Session", "User", "Created", "Expires", "Keys"]);
    for session in sessions {
        table.add_row(row![
            session.session_id,
            session.user_id,
            session.created_at.format("%Y-%m-%d %H:%M:%S"),
            session.expires_at.format("%Y-%m-%d %H:%M:%S"),
            session.data.len()
        ]);
    }
    table.printstd();
}

async fn session(config: &NetraConfig, command: SessionCommand) -> CliResult<()> {
    let storage = connect_storage(config).await?;
    let manager = RedisSessionManager::new(Arc::new(storage), config.session.clone());
    if manager.storage_mode().await != StorageMode::Redis {
        warn!("Redis is not in use, sessions will not outlive this process");
    }

    match command {
        SessionCommand::Create { user_id, data } => {
            let data = parse_object(data.as_deref())?;
            let session = manager.create_session(&user_id, data).await?;
            println!("{}", session.session_id);
        }
        SessionCommand::Get { session_id } => match manager.get_session(&session_id).await? {
            Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
            None => return Err(format!("session {} not found", session_id).into()),
        },
        SessionCommand::List { user_id } => {
            print_sessions(&manager.get_user_sessions(&user_id).await?);
        }
        SessionCommand::Delete { session_id } => {
            if !manager.delete_session(&session_id).await? {
                return Err(format!("session {} not found", session_id).into());
            }
            println!("deleted {}", session_id);
        }
    }

    manager.storage().health_monitor().stop();
    Ok(())
}

fn mcp_config(config: &NetraConfig, url: Option<String>) -> CliResult<McpClientConfig> {
    match (url, &config.mcp) {
        (Some(url), Some(base)) => Ok(McpClientConfig {
            url,
            ..base.clone()
        }),
        (Some(url), None) => Ok(McpClientConfig::new(url)),
        (None, Some(base)) => Ok(base.clone()),
        (None, None) => Err("no MCP server given, pass --url or set NETRA_MCP_URL".into()),
    }
}

async fn mcp(config: &NetraConfig, command: McpCommand) -> CliResult<()> {
    let url = match &command {
        McpCommand::Tools { url } | McpCommand::Call { url, .. } => url.clone(),
    };
    let client = McpClient::from_config(mcp_config(config, url)?)?;

    let progress = spinner("Initializing MCP session");
    let initialized = client.initialize().await;
    progress.finish_and_clear();
    let server = initialized?;
    info!(server = %server.server_info.name, version = %server.server_info.version, "MCP server ready");

    match command {
        McpCommand::Tools { .. } => {
            let mut table = Table::new();
            table.add_row(row!["Tool", "Description"]);
            for tool in client.list_tools().await? {
                table.add_row(row![tool.name, tool.description.unwrap_or_default()]);
            }
            table.printstd();
        }
        McpCommand::Call { tool, args, .. } => {
            let result = client.call_tool(&tool, parse_object(args.as_deref())?).await?;
            for item in &result.content {
                match item.get("text").and_then(Value::as_str) {
                    Some(text) => println!("{}", text),
                    None => println!("{}", item),
                }
            }
            if result.is_error {
                client.close().await?;
                return Err(format!("tool {} reported an error", tool).into());
            }
        }
    }

    client.close().await?;
    Ok(())
}
