pub mod record;
pub mod replay;
pub mod report;
pub mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use record::process_record_command;
use replay::{process_replay_command, ReplayCommand};
use report::{print_categories, print_sites, print_summary};
use settings::{process_settings_command, SettingsCommand};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    aggregate::Period,
    settings::SettingsStore,
    storage::{document_store::FileDocumentStore, stats_store::StatsStore},
    utils::{
        clock::{Clock, DefaultClock},
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Pagepulse", version, long_about = None)]
#[command(about = "Private per-site browsing statistics", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, global = true, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Totals, daily activity and top sites for a period")]
    Summary {
        #[arg(long, short, default_value_t = Period::Today)]
        period: Period,
    },
    #[command(about = "Share of active time per site category")]
    Categories {
        #[arg(long, short, default_value_t = Period::Today)]
        period: Period,
    },
    #[command(about = "Every tracked page with its lifetime totals")]
    Sites {
        #[arg(long, help = "Collapse pages of the same host into one entry")]
        by_host: bool,
    },
    #[command(about = "Delete activity older than the given number of days")]
    Prune {
        #[arg(long)]
        days: u32,
    },
    #[command(about = "Delete all collected statistics")]
    Clear {},
    #[command(about = "Show or change settings")]
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    #[command(about = "Apply one page delta given as JSON and print the response")]
    Record { delta: String },
    #[command(about = "Run a page sampler over recorded events and store what it reports")]
    Replay {
        #[command(flatten)]
        command: ReplayCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = match args.dir {
        Some(dir) => dir,
        None => create_application_default_path()?,
    };

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &dir, logging_level, args.log)?;

    let documents = Arc::new(
        FileDocumentStore::new(dir.join("storage"))
            .with_context(|| format!("Failed to open storage in {dir:?}"))?,
    );
    let stats = || StatsStore::new(documents.clone(), Box::new(DefaultClock));
    let today = DefaultClock.today();

    match args.commands {
        Commands::Summary { period } => print_summary(&stats().get_store().await?, period, today),
        Commands::Categories { period } => {
            let settings = SettingsStore::new(documents.clone())
                .get_settings()
                .await?;
            print_categories(
                &stats().get_store().await?,
                period,
                &settings.site_categories,
                today,
            )
        }
        Commands::Sites { by_host } => print_sites(&stats().list_pages(by_host).await?),
        Commands::Prune { days } => {
            let affected = stats().delete_older_than(days).await?;
            println!("Pruned {affected} pages");
        }
        Commands::Clear {} => {
            stats().clear_store().await?;
            info!("Statistics cleared");
            println!("Statistics cleared");
        }
        Commands::Settings { command } => {
            process_settings_command(command, documents.clone()).await?;
        }
        Commands::Record { delta } => {
            let response = process_record_command(&delta, stats()).await?;
            println!("{}", serde_json::to_string(&response)?);
        }
        Commands::Replay { command } => {
            let written = process_replay_command(command, documents.clone()).await?;
            println!("Wrote {written} deltas");
        }
    }
    Ok(())
}
