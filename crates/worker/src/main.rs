use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brokerbot_core::cache::BrokerCache;
use brokerbot_core::config::Settings;
use brokerbot_core::source::{BrokerSource, StaticBrokerSource};

mod repl;

#[derive(Debug, Parser)]
#[command(name = "brokerbot_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply database migrations.
    Migrate,

    /// Upsert the built-in demo broker catalog.
    Seed {
        /// Do everything except writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Chat with the broker assistant on stdin/stdout.
    Chat {
        /// Use the built-in demo catalog instead of the configured broker source.
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = match args.command {
        Command::Migrate => migrate(&settings).await,
        Command::Seed { dry_run } => seed(&settings, dry_run).await,
        Command::Chat { offline } => chat(&settings, offline).await,
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "worker command failed");
    }
    res
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

async fn migrate(settings: &Settings) -> anyhow::Result<()> {
    let pool = connect(settings).await?;
    brokerbot_core::storage::migrate(&pool).await?;
    tracing::info!("migrations applied");
    Ok(())
}

async fn seed(settings: &Settings, dry_run: bool) -> anyhow::Result<()> {
    let catalog = brokerbot_core::source::demo::demo_catalog();

    if dry_run {
        tracing::info!(
            dry_run = true,
            brokers_len = catalog.len(),
            "seed demo brokers (dry-run)"
        );
        return Ok(());
    }

    let pool = connect(settings).await?;
    brokerbot_core::storage::migrate(&pool).await?;

    let affected = brokerbot_core::storage::brokers::upsert_brokers(&pool, &catalog).await?;
    let active = brokerbot_core::storage::brokers::count_active_brokers(&pool).await?;
    tracing::info!(affected, active, "seeded demo brokers");
    Ok(())
}

async fn chat(settings: &Settings, offline: bool) -> anyhow::Result<()> {
    let source: Arc<dyn BrokerSource> = if offline {
        Arc::new(StaticBrokerSource::new(
            brokerbot_core::source::demo::demo_catalog(),
        ))
    } else {
        brokerbot_core::source::from_settings(settings)?
    };
    tracing::info!(source = source.source_name(), "starting chat");

    let cache = Arc::new(BrokerCache::from_settings(source, settings));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    repl::run(cache, settings.chat_thinking_delay, stdin, stdout).await
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
