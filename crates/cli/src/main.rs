//! Scarlett CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: write a starter config file
//! - `chat`: chat in the terminal, interactively or one message at a time
//! - `gateway`: serve the chat over HTTP with server-sent events

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "scarlett",
    about = "Scarlett: streaming chat companion with tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write ~/.scarlett/config.toml with default settings
    Onboard,

    /// Chat with Scarlett in the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Skip tool calling and stream the answer directly
        #[arg(long)]
        no_tools: bool,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Chat output shares the terminal with the log, so it stays quiet by default.
    let filter = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Chat { .. }, false) => "warn",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { message, no_tools } => commands::chat::run(message, no_tools).await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
    }

    Ok(())
}
