mod cli;
mod config;
mod db;
mod embedding;
mod error;
mod knowledge;
mod server;
mod tools;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::knowledge::types::EntityType;

#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Local-first knowledge retrieval and connection discovery"
)]
struct Cli {
    /// Config file (defaults to ~/.tessera/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport unless --http)
    Serve {
        /// Serve Streamable HTTP at /mcp on the configured host and port
        #[arg(long)]
        http: bool,
    },
    /// Manage the local embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Semantic search over indexed entities
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Restrict results to these entity types (repeat or comma-separate)
        #[arg(long = "type", value_delimiter = ',')]
        entity_types: Vec<EntityType>,
    },
    /// Hybrid keyword + semantic search
    Hybrid {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Share of the score taken by semantic similarity, 0.0 to 1.0
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long = "type", value_delimiter = ',')]
        entity_types: Vec<EntityType>,
    },
    /// List connections of one entity, e.g. `note:42`
    Discover {
        entity: String,
        /// 2 adds transitive connections
        #[arg(long, default_value_t = 1)]
        depth: u32,
    },
    /// Surface similar entities that nothing links yet
    Unexpected {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Re-embed every entity with the current embedding service
    Reindex,
    /// Show index statistics
    Stats,
    /// Run database and embedding diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the ONNX MiniLM model to the embedding cache dir
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::TesseraConfig::load_from(path)?,
        None => config::TesseraConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
        Command::Search {
            query,
            limit,
            entity_types,
        } => {
            cli::search::search(&config, &query, limit, entity_types).await?;
        }
        Command::Hybrid {
            query,
            limit,
            weight,
            entity_types,
        } => {
            cli::search::hybrid(&config, &query, limit, weight, entity_types).await?;
        }
        Command::Discover { entity, depth } => {
            cli::discover::discover(&config, &entity, depth)?;
        }
        Command::Unexpected { limit } => {
            cli::discover::unexpected(&config, limit)?;
        }
        Command::Reindex => {
            cli::reindex::reindex(&config).await?;
        }
        Command::Stats => {
            cli::stats::stats(&config)?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config).await?;
        }
    }

    Ok(())
}
