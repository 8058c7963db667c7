mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cairn::config::CairnConfig;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Personal knowledge graph store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server (MCP over stdio by default)
    Serve {
        /// Serve the JSON HTTP API (MCP mounted at /mcp) instead of stdio
        #[arg(long)]
        http: bool,
    },
    /// Finish interrupted deletes and rebuild the knowledge index if needed
    Repair,
    /// Check that relations and the knowledge index are consistent
    Verify,
    /// Show recent operation log records
    Log {
        /// Number of records to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only show failed operations
        #[arg(long)]
        failures: bool,
    },
    /// Database health and row counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = CairnConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http || config.server.transport == "http" {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Repair => cli::maintenance::repair(&config)?,
        Command::Verify => cli::maintenance::verify(&config)?,
        Command::Log { limit, failures } => cli::log::log(&config, limit, failures)?,
        Command::Stats => cli::stats::stats(&config)?,
    }

    Ok(())
}
