//! # eres: recurring report dispatcher
//!
//! Finds overdue report schedules, renders their panels into one document
//! each, emails it to the schedule's report group and moves the schedule on.
//!
//! Usage:
//!   eres                          # Run the dispatcher until Ctrl-C
//!   eres --once                   # Run one tick, print the summary as JSON
//!   eres --list                   # Print stored schedules as JSON
//!   eres --release-hold <ID>      # Let a held schedule be sent again
//!   eres --config ./eres.toml -v  # Custom config, debug logging

use anyhow::{Context, Result};
use clap::Parser;
use eres_channels::{HttpRecipientDirectory, SmtpMailer};
use eres_core::EresConfig;
use eres_core::config::expand_path;
use eres_core::traits::ScheduleStore;
use eres_report::{HttpPanelSource, PanelReportMaterializer};
use eres_scheduler::{Collaborators, DispatchConfig, DispatchEngine, SchedulerDb, spawn_dispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "eres",
    version,
    about = "📬 eres: recurring report dispatcher"
)]
struct Cli {
    /// Config file (default: ~/.eres/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// List stored schedules and exit
    #[arg(long, conflicts_with = "once")]
    list: bool,

    /// Clear the reconciliation hold on a schedule and exit
    #[arg(long, value_name = "ID", conflicts_with_all = ["once", "list"])]
    release_hold: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "eres=debug,eres_scheduler=debug,eres_channels=debug,eres_report=debug"
    } else {
        "eres=info,eres_scheduler=info,eres_channels=info,eres_report=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => EresConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EresConfig::load().context("loading default config")?,
    };

    let store_path = expand_path(&config.store.path);
    let db = SchedulerDb::open(&store_path)
        .with_context(|| format!("opening store {}", store_path.display()))?;
    tracing::info!(
        "🗄️ Store at {} ({} schedule(s))",
        store_path.display(),
        db.schedule_count()
    );

    if cli.list {
        let schedules = db.list().await?;
        println!("{}", serde_json::to_string_pretty(&schedules)?);
        let holds = db.reconciliation_holds().await?;
        if !holds.is_empty() {
            tracing::warn!("🔒 Held for reconciliation: {:?}", holds);
        }
        return Ok(());
    }

    if let Some(id) = cli.release_hold.as_deref() {
        if db.release_hold(id).await? {
            println!("Released hold on {id}");
        } else {
            println!("No hold on {id}");
        }
        return Ok(());
    }

    config.validate().context("invalid configuration")?;

    let engine = Arc::new(build_engine(&config, db)?);

    if cli.once {
        match engine.run_tick().await? {
            Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
            None => tracing::warn!("⏳ Another dispatch pass is running"),
        }
        return Ok(());
    }

    let dispatcher = tokio::spawn(spawn_dispatcher(
        Arc::clone(&engine),
        config.scheduler.tick_interval_secs,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down dispatcher");
    dispatcher.abort();
    Ok(())
}

fn build_engine(config: &EresConfig, db: SchedulerDb) -> Result<DispatchEngine> {
    let transport = SmtpMailer::new(config.smtp.clone()).context("building SMTP transport")?;
    let directory = HttpRecipientDirectory::new(config.directory.clone())
        .context("building recipient directory client")?;
    let panels = HttpPanelSource::new(config.panels.clone().into())
        .context("building panel source client")?;

    let dispatch = DispatchConfig::from_config(config);
    std::fs::create_dir_all(&dispatch.work_dir)
        .with_context(|| format!("creating work dir {}", dispatch.work_dir.display()))?;
    tracing::info!(
        "⚙️ Dispatch: max_parallel={} retry={}x work_dir={}",
        dispatch.max_parallel,
        dispatch.retry.max_attempts,
        dispatch.work_dir.display()
    );

    Ok(DispatchEngine::new(
        Collaborators {
            store: Arc::new(db.clone()),
            members: Arc::new(db),
            directory: Arc::new(directory),
            materializer: Arc::new(PanelReportMaterializer::new(Arc::new(panels))),
            transport: Arc::new(transport),
        },
        dispatch,
    ))
}
