//! `toolgate` binary
//!
//! Command-line front end for the process bridge: spawns registered tool
//! servers on demand and relays single requests to them.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use toolgate_bridge::Bridge;
use toolgate_core::config::{default_registry_path, load_registry};

#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(version, about = "toolgate - tool-server request bridge")]
struct Args {
    /// Path to the server registry file (JSON).
    /// Defaults to `<config dir>/toolgate/servers.json`.
    #[arg(long, env = "TOOLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Per-request timeout in seconds (overrides the registry file).
    #[arg(long, env = "TOOLGATE_TIMEOUT")]
    timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "TOOLGATE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TOOLGATE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invoke a tool as `<server>__<tool>` and print its result.
    Call {
        /// Compound tool name, e.g. `db__query`.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List the tools one server exposes.
    List {
        /// Registered server name.
        server: String,
    },
    /// Print the registered server names.
    Servers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("toolgate={0},toolgate_bridge={0},toolgate_core={0}", args.log_level);
    toolgate_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let registry_path = match args.config {
        Some(path) => path,
        None => default_registry_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?,
    };
    let mut config = load_registry(&registry_path)?;
    if let Some(secs) = args.timeout {
        config.call_timeout_secs = secs;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        registry = %registry_path.display(),
        servers = config.servers.len(),
        "Starting toolgate"
    );

    let bridge = Bridge::new(config);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let outcome = tokio::select! {
        result = run_command(&bridge, args.command) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            Ok(())
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
            Ok(())
        }
    };

    // Always tear down subprocesses, even when the request failed.
    bridge.close_all().await;
    outcome
}

#[allow(clippy::print_stdout)]
async fn run_command(bridge: &Bridge, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Call { tool, args } => {
            let arguments: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))?;
            let result = bridge.call_tool(&tool, arguments).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::List { server } => {
            let result = bridge.list_tools(&server).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Servers => {
            for name in bridge.server_names() {
                println!("{name}");
            }
        }
    }
    Ok(())
}
