//! # caseguard CLI
//!
//! ## Usage
//!
//! ```bash
//! caseguard --config ./config/caseguard.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `caseguard init` | Create the SQLite database and run schema migrations |
//! | `caseguard submit --file <json>` | Submit a case, held back if a likely duplicate |
//! | `caseguard check --file <json>` | Score a draft against recent cases |
//! | `caseguard compare <a> <b>` | Score two stored cases against each other |
//! | `caseguard get <id>` | Show one case |
//! | `caseguard list` | List cases, newest first |
//! | `caseguard status <id> <status>` | Change a case's status |
//! | `caseguard anchor <id> <chain-id>` | Record a case's blockchain id |
//! | `caseguard serve` | Start the HTTP API |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `caseguard=info`).

use caseguard::{cases, config, matcher, migrate, server, submission};
use caseguard::cases::CaseFilter;
use caseguard::models::{CaseStatus, CaseType};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// caseguard: case reporting with AI-assisted duplicate detection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "caseguard",
    about = "caseguard: case reporting for missing and at-risk children with duplicate detection",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/caseguard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Submit a case from a JSON file.
    ///
    /// The draft is validated and compared against recent cases first. If
    /// any scores at or above `matcher.duplicate_threshold` nothing is
    /// stored unless `--force` is given.
    Submit {
        /// JSON file holding the case fields.
        #[arg(long)]
        file: PathBuf,

        /// Store the case even if it looks like a duplicate.
        #[arg(long)]
        force: bool,
    },

    /// Score a draft against recent cases without storing it.
    Check {
        /// JSON file holding the (possibly partial) case fields.
        #[arg(long)]
        file: PathBuf,

        /// Override `matcher.candidate_limit` for this run.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Score one stored case against another.
    Compare {
        /// Case treated as the new submission.
        draft_id: String,
        /// Case treated as the existing record.
        existing_id: String,
    },

    /// Show a case by id.
    Get { id: String },

    /// List cases, newest first.
    List {
        #[arg(long)]
        reporter: Option<String>,

        /// `open`, `investigating`, or `resolved`.
        #[arg(long)]
        status: Option<CaseStatus>,

        /// `missing`, `labour`, or `harassment`.
        #[arg(long)]
        case_type: Option<CaseType>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Change a case's status.
    Status { id: String, status: CaseStatus },

    /// Record the blockchain id a case was notarized under.
    Anchor { id: String, blockchain_id: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("caseguard=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Submit { file, force } => {
            submission::run_submit(&cfg, &file, force).await?;
        }
        Commands::Check { file, limit } => {
            submission::run_check(&cfg, &file, limit).await?;
        }
        Commands::Compare {
            draft_id,
            existing_id,
        } => {
            matcher::run_compare(&cfg, &draft_id, &existing_id).await?;
        }
        Commands::Get { id } => {
            cases::run_get(&cfg, &id).await?;
        }
        Commands::List {
            reporter,
            status,
            case_type,
            limit,
        } => {
            let filter = CaseFilter {
                reporter,
                status,
                case_type,
                limit,
            };
            cases::run_list(&cfg, &filter).await?;
        }
        Commands::Status { id, status } => {
            cases::run_status(&cfg, &id, status).await?;
        }
        Commands::Anchor { id, blockchain_id } => {
            cases::run_anchor(&cfg, &id, &blockchain_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
