mod daemon;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use spendbot_config::AppConfig;
use spendbot_runtime::{
    CommandSource, IngestionSource, JsonLinesFile, format_amount, run_ingestion_cycle,
};
use spendbot_store::schema::month_of;
use spendbot_store::{SqliteStore, TransactionStore};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "spendbot",
    version,
    about = "Telegram bot that asks you to categorize every bank transaction"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the bot until SIGINT/SIGTERM.
    Start,
    /// Run the configured ingestion command once.
    Ingest,
    /// Ingest transactions from a JSON Lines file.
    Import {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// List transactions that still need a category.
    Pending {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print categorized outflows for a month.
    Outlay {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration (file plus environment).
    Show,
    /// Write the default configuration.
    Init {
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(config: &AppConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.telemetry.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&config.telemetry.log_dir, "spendbot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}

fn open_store(config: &AppConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(
        &config.store.path,
        Duration::from_secs(config.store.op_timeout_secs),
    )?;
    Ok(Arc::new(store))
}

async fn ingest(source: &dyn IngestionSource, config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let summary = run_ingestion_cycle(source, store.as_ref()).await?;
    println!("fetched: {}", summary.fetched);
    println!("inserted: {}", summary.inserted);
    Ok(())
}

fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    AppConfig::default().save_to(path)?;
    println!("wrote {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    let _log_guard = init_tracing(&config)?;

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            daemon::run_bot_process(config).await?;
        }
        Commands::Ingest => {
            let Some(source) = CommandSource::from_config(&config) else {
                bail!("ingestion.command is not configured");
            };
            ingest(&source, &config).await?;
        }
        Commands::Import { path } => {
            if !path.exists() {
                bail!("{} does not exist", path.display());
            }
            let source = JsonLinesFile::new(path, config.timezone());
            ingest(&source, &config).await?;
        }
        Commands::Pending { limit } => {
            let store = open_store(&config)?;
            let rows = store.list_unread(limit).await?;
            if rows.is_empty() {
                println!("nothing left to categorize");
            }
            for tx in rows {
                println!(
                    "{}  {}  {:>8} {:>14} {}  {}",
                    tx.id,
                    tx.created_at.format("%Y-%m-%d %H:%M"),
                    tx.direction().word(),
                    format_amount(tx.amount),
                    config.bot.currency,
                    tx.note.as_deref().unwrap_or("(none)"),
                );
            }
            println!("unread: {}", store.count_unread().await?);
        }
        Commands::Outlay { month } => {
            let store = open_store(&config)?;
            let month = month.unwrap_or_else(|| month_of(Utc::now(), config.timezone()));
            let total = store.sum_read_amount_for_month(month, true).await?;
            println!(
                "month {month}: {} {}",
                format_amount(total),
                config.bot.currency
            );
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigCommands::Init { force } => config_init(&cli.config, force)?,
        },
    }

    Ok(())
}
