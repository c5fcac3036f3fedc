//! # ragserve CLI
//!
//! One binary, two processes:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragserve serve` | Expose the configured chat model over HTTP |
//! | `ragserve chat` | Interactive chat against a running `serve`, optionally grounded in a document |
//!
//! ## Examples
//!
//! ```bash
//! # Start the model server on the configured address
//! ragserve --config ./ragserve.toml serve
//!
//! # Chat, answering from a PDF
//! ragserve --config ./ragserve.toml chat --file ./report.pdf
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `ragserve=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ragserve::{chat, config, server};

/// ragserve: serve a chat model over HTTP and chat with it about your files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "ragserve",
    about = "Serve a chat model over HTTP and chat with it about your files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./ragserve.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server exposing invoke, stream, batch and the playground.
    Serve {
        /// Address to bind, overriding `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Start an interactive chat against a running server.
    ///
    /// Questions are answered from the uploaded document when one is
    /// active (`--file` or `/upload`), and directly otherwise.
    Chat {
        /// Document to index before the first question (pdf, txt or docx).
        #[arg(long)]
        file: Option<PathBuf>,

        /// Remote model URL, overriding `[client].endpoint`.
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragserve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Chat { file, endpoint } => {
            if let Some(endpoint) = endpoint {
                cfg.client.endpoint = endpoint;
            }
            chat::run_chat(&cfg, file).await?;
        }
    }

    Ok(())
}
