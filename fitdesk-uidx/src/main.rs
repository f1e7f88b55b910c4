//! fitdesk-uidx - Username index diagnostics and repair
//!
//! Command-line front end for the admin tooling. Every command loads the
//! TOML bootstrap config, resolves the root folder, opens the SQLite
//! database and runs one engine entry point. Ctrl-C stops batch runs after
//! the item in flight.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fitdesk_common::config::{
    default_config_path, ensure_root_folder, RootFolderResolver, TomlConfig,
};
use fitdesk_common::db::init_database;
use fitdesk_uidx::{
    AdminContext, BatchOutcome, BatchProgress, EntityId, Role, SqliteStore, UsernameAdmin,
};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MODULE_NAME: &str = "fitdesk-uidx";

#[derive(Debug, Parser)]
#[command(name = "fitdesk-uidx", version, about = "Username index diagnostics and repair")]
struct Cli {
    /// Root folder holding the database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: <config dir>/fitdesk/fitdesk-uidx.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Operator name recorded on every write
    #[arg(long, env = "FITDESK_OPERATOR", default_value = "cli")]
    operator: String,

    /// Operator role; mutating commands require admin
    #[arg(long, value_enum, default_value_t = RoleArg::Viewer)]
    role: RoleArg,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Viewer,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Viewer => Role::Viewer,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report every consistency issue
    Diagnose,
    /// Fix missing, mismatched and orphaned index keys
    Repair,
    /// Keep a duplicated username for one account and rename the others
    Resolve {
        #[arg(long)]
        username: String,
        /// Account id that keeps the username
        #[arg(long)]
        keeper: String,
    },
    /// Re-normalize every non-canonical username
    Migrate {
        /// Print the plan without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete accounts and their index keys, stopping at the first failure
    DeleteAccounts {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let config = match &config_path {
        Some(path) => TomlConfig::load(path)?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    // Build identity first, before any database work
    info!(
        "Starting FitDesk username index tool (fitdesk-uidx) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) if path.exists() => info!("Config: {}", path.display()),
        Some(path) => warn!("Config file not found at {}, using defaults", path.display()),
        None => warn!("No config directory available, using defaults"),
    }

    let root_folder =
        RootFolderResolver::new(MODULE_NAME).resolve(cli.root_folder.as_deref(), &config);
    ensure_root_folder(&root_folder)?;
    let db_path = config.database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path).await?;
    let store = Arc::new(SqliteStore::new(pool, config.engine.max_batch_ops));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current item");
            interrupt.cancel();
        }
    });

    let admin = UsernameAdmin::new(store, config.engine.clone())?.with_cancellation(cancel);
    let ctx = AdminContext::new(cli.operator.clone(), cli.role.into());

    match cli.command {
        Command::Diagnose => {
            let report = admin.diagnose(&ctx).await?;
            print_report(&report, cli.json)?;
        }
        Command::Repair => {
            let report = admin.repair_all(&ctx, log_progress).await?;
            print_report(&report.outcome, cli.json)?;
            info!("Remaining issues: {}", report.remaining);
            check_outcome(&report.outcome)?;
        }
        Command::Resolve { username, keeper } => {
            let report = admin
                .resolve_duplicate(&ctx, &username, &EntityId::new(keeper), log_progress)
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for r in &report.resolution.reassignments {
                    println!("{}: {} -> {}", r.entity_id, r.old_username, r.new_username);
                }
                println!("{}", report.outcome);
            }
            check_outcome(&report.outcome)?;
        }
        Command::Migrate { dry_run: true } => {
            let plan = admin.plan_migration(&ctx).await?;
            print_report(&plan, cli.json)?;
        }
        Command::Migrate { dry_run: false } => {
            let report = admin.migrate(&ctx, log_progress).await?;
            print_report(&report, cli.json)?;
            if report.failed > 0 {
                bail!("{} of {} renames failed", report.failed, report.plan.assignments.len());
            }
        }
        Command::DeleteAccounts { ids } => {
            let ids: Vec<EntityId> = ids.into_iter().map(EntityId::new).collect();
            let report = admin.delete_accounts(&ctx, &ids, log_progress).await?;
            print_report(&report.outcome, cli.json)?;
            check_outcome(&report.outcome)?;
        }
    }

    Ok(())
}

fn log_progress(progress: BatchProgress) {
    info!(
        current = progress.current,
        total = progress.total,
        "Progress: {}%",
        progress.percent
    );
}

fn print_report<T: Serialize + Display>(report: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report.to_string().trim_end());
    }
    Ok(())
}

fn check_outcome(outcome: &BatchOutcome) -> Result<()> {
    if outcome.failed > 0 {
        bail!("{} of {} items failed", outcome.failed, outcome.total);
    }
    if outcome.cancelled {
        bail!("Cancelled with {} items not processed", outcome.skipped);
    }
    Ok(())
}
