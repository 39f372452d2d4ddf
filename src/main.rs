use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use mcpd::agent::{llm::LlmDecider, AgentRuntime};
use mcpd::config::ServerConfig;
use mcpd::events::EventBroadcaster;
use mcpd::registry::Registry;
use mcpd::{auth, rest, stdio, tools, AppContext};

#[derive(Parser)]
#[command(
    name = "mcpd",
    about = "Unified MCP tool daemon — JSON-RPC tools over stdio, HTTP, and WebSocket",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP/WebSocket server port
    #[arg(long, env = "MCPD_PORT")]
    port: Option<u16>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "MCPD_BIND")]
    bind_address: Option<String>,

    /// Data directory for config.toml and the auth token
    #[arg(long, env = "MCPD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MCPD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "MCPD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP + WebSocket server (default when no subcommand given).
    Serve,
    /// Serve JSON-RPC over stdin/stdout for a single local client.
    ///
    /// Logs go to stderr; stdout carries protocol frames only.
    Stdio,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Serve);

    let config = Arc::new(ServerConfig::new(
        args.port,
        args.data_dir,
        args.log,
        args.bind_address,
    ));

    // stdio mode must keep stdout clean for the protocol.
    let log_to_stderr = matches!(command, Command::Stdio);
    let _log_guard = setup_logging(
        &config.log,
        args.log_file.as_deref(),
        &config.log_format,
        log_to_stderr,
    );

    info!(version = env!("CARGO_PKG_VERSION"), "mcpd starting");
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        require_auth = config.require_auth,
        "config loaded"
    );

    let ctx = build_context(config).await?;

    match command {
        Command::Serve => rest::start_server(ctx).await,
        Command::Stdio => stdio::run(ctx).await,
    }
}

async fn build_context(config: Arc<ServerConfig>) -> Result<AppContext> {
    let registry = Arc::new(Registry::new(std::time::Duration::from_secs(
        config.call_timeout_secs,
    )));
    tools::register_builtins(&registry).await?;
    info!(tools = registry.len().await, "tool catalogue registered");

    let broadcaster = Arc::new(EventBroadcaster::new());

    let agent = if config.agent.enabled {
        let decider = Arc::new(LlmDecider::new(&config.llm, registry.clone()));
        info!(model = %config.llm.model, provider = %config.llm.provider, "agent runtime enabled");
        Some(Arc::new(AgentRuntime::new(
            decider,
            registry.clone(),
            broadcaster.clone(),
            config.agent.max_steps,
        )))
    } else {
        info!("agent runtime disabled by config");
        None
    };

    // Explicit API key wins; otherwise fall back to the persisted token so
    // require_auth always has a real credential behind it.
    let api_key = match &config.api_key {
        Some(key) => key.clone(),
        None => {
            let token = auth::get_or_create_token(&config.data_dir)?;
            if config.require_auth {
                warn!(
                    path = %config.data_dir.join("auth_token").display(),
                    "no api_key configured — using the persisted auth token"
                );
            }
            token
        }
    };

    Ok(AppContext::new(config, registry, agent, broadcaster, api_key))
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both the console and a daily-rolling
/// file. Returns a `WorkerGuard` that must stay alive for the process
/// lifetime.
///
/// `log_format` may be `"pretty"` (default, compact human-readable) or
/// `"json"` (structured, for log aggregators).
///
/// If the log directory cannot be created, falls back to console-only
/// logging with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
    to_stderr: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    let console_only = |use_json: bool| {
        if to_stderr {
            if use_json {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(log_level)
                    .with_writer(std::io::stderr)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(log_level)
                    .with_writer(std::io::stderr)
                    .compact()
                    .init();
            }
        } else if use_json {
            tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        } else {
            tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        }
    };

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("mcpd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to console",
                dir.display()
            );
            console_only(use_json);
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        // Console layer respects the stdio-mode stderr constraint.
        let console = if to_stderr {
            fmt::writer::BoxMakeWriter::new(std::io::stderr)
        } else {
            fmt::writer::BoxMakeWriter::new(std::io::stdout)
        };

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json().with_writer(console))
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact().with_writer(console))
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else {
        console_only(use_json);
        None
    }
}
