use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowpulse_common::{Config, Platform};

mod commands;

#[derive(Parser)]
#[command(name = "flowpulse")]
#[command(about = "Workflow popularity evidence → canonical snapshot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append collector payloads (JSON array or JSON lines) to the evidence log
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Build a snapshot from the evidence log and publish it
    Build {
        /// Publish to the snapshot file only
        #[arg(long)]
        no_store: bool,
    },

    /// Highest-scoring workflows
    Top {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(short, long)]
        country: Option<String>,
        #[arg(short, long)]
        platform: Option<Platform>,
    },

    /// Filtered, paged workflow listing
    List {
        #[arg(short, long)]
        platform: Option<Platform>,
        #[arg(short, long)]
        country: Option<String>,
        /// Case-insensitive title search
        #[arg(short, long)]
        q: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },

    /// One workflow by id, or by the source id of any of its evidence records
    Get { id: String },

    /// Print the JSON Schema of the snapshot document
    Schema {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_redacted();

    match cli.command {
        Commands::Ingest { files } => commands::ingest(&config, &files),
        Commands::Build { no_store } => commands::build(&config, !no_store).await,
        Commands::Top {
            limit,
            country,
            platform,
        } => commands::top(&config, limit, country, platform).await,
        Commands::List {
            platform,
            country,
            q,
            limit,
            page,
        } => {
            let filters = flowpulse_store::ListQuery {
                platform,
                country,
                q,
                limit,
                page,
            };
            commands::list(&config, filters).await
        }
        Commands::Get { id } => commands::get(&config, &id).await,
        Commands::Schema { out } => {
            let written = commands::schema(out.as_deref())?;
            if let Some(path) = written {
                info!(path = %path.display(), "Schema written");
            }
            Ok(())
        }
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("flowpulse=info".parse()?)
        .add_directive("trends_client=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
