//! Worklens CLI and REST API entry point.
//!
//! Binary name: `worklens`
//!
//! Parses CLI arguments, initializes the chat and activity databases plus
//! the turn pipeline, then starts the REST/WebSocket server.

mod http;
mod state;

use clap::{Parser, Subcommand};
use clap_complete::{Shell, generate};

use state::AppState;
use worklens_infra::config;

/// Ask natural-language questions about your tracked activity.
#[derive(Parser)]
#[command(name = "worklens", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Suppress all output except errors.
    #[arg(long, global = true)]
    quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    otel: bool,

    /// Data directory for config and databases (default: ~/.worklens).
    #[arg(long, env = "WORKLENS_DATA_DIR", global = true)]
    data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST/WebSocket server.
    Serve {
        /// Port to listen on (overrides config.toml).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides config.toml).
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,worklens_core=debug,worklens_infra=debug,worklens_api=debug",
        _ => "trace",
    };
    worklens_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "worklens", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(config::resolve_data_dir);
    tokio::fs::create_dir_all(&data_dir).await?;
    let config = config::load_config(&data_dir).await;

    match cli.command {
        Commands::Serve { port, host } => {
            let state = AppState::init(config.clone(), &data_dir).await?;

            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} Worklens API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            worklens_observe::tracing_setup::shutdown_tracing();
            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
