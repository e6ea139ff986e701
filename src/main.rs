use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use competitor_momentum::db::{self, PgHistoryStore};
use competitor_momentum::pipeline::{self, Engine};
use competitor_momentum::{Config, HistoryStore, JsonFileStore, ScoreCard};

#[derive(Parser)]
#[command(name = "competitor-momentum")]
#[command(about = "Competitive momentum scores, anomaly alerts and cross-source patterns", long_about = None)]
struct Cli {
    /// TOML file with the roster, keyword tables and thresholds
    #[arg(long, global = true, env = "MOMENTUM_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the Postgres history schema
    InitDb {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Score one day's signals; history is only read, for net-new hiring
    Score {
        #[arg(long, default_value = "data/signals")]
        input: PathBuf,
        #[arg(long, default_value = "data/history.json")]
        history: PathBuf,
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        /// Run date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Score, record history, and write alerts and patterns
    Run {
        #[arg(long, default_value = "data/signals")]
        input: PathBuf,
        #[arg(long, default_value = "data/out")]
        out: PathBuf,
        #[arg(long, default_value = "data/history.json")]
        history: PathBuf,
        /// Use Postgres for history instead of the JSON file
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "competitor_momentum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::InitDb { database_url } => {
            let store = PgHistoryStore::connect(&database_url)
                .await
                .context("failed to connect to Postgres")?;
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Score {
            input,
            history,
            database_url,
            date,
            limit,
        } => {
            let engine = Engine::new(config)?;
            let store = open_store(database_url, history).await?;
            let (date, as_of) = pipeline::run_clock(date);
            let batch = engine.load(&input);
            let card = engine
                .score_only(store.as_ref(), batch, date, as_of)
                .await
                .with_context(|| format!("history store ({}) failed", store.backend_type()))?;
            print_ranking(&card, limit);
        }
        Commands::Run {
            input,
            out,
            history,
            database_url,
            date,
            limit,
        } => {
            let engine = Engine::new(config)?;
            let store = open_store(database_url, history).await?;

            let (date, as_of) = pipeline::run_clock(date);
            let batch = engine.load(&input);
            let output = engine
                .run(store.as_ref(), batch, date, as_of)
                .await
                .with_context(|| format!("history store ({}) failed", store.backend_type()))?;
            pipeline::write_outputs(&out, &output)
                .with_context(|| format!("failed to write outputs to {}", out.display()))?;

            print_ranking(&output.card, limit);
            println!(
                "{} alerts, {} patterns written to {}.",
                output.alerts.len(),
                output.patterns.len(),
                out.display()
            );
        }
    }

    Ok(())
}

/// Postgres when a database URL is given, otherwise the JSON history file.
async fn open_store(
    database_url: Option<String>,
    history: PathBuf,
) -> anyhow::Result<Box<dyn HistoryStore>> {
    Ok(match database_url {
        Some(url) => Box::new(
            PgHistoryStore::connect(&url)
                .await
                .context("failed to connect to Postgres")?,
        ),
        None => Box::new(JsonFileStore::new(history)),
    })
}

fn print_ranking(card: &ScoreCard, limit: usize) {
    let ranked = card.ranked();
    if ranked.iter().all(|(_, score)| *score == 0) {
        println!("No scoring signals found for this run.");
        return;
    }

    println!("Top competitors by momentum:");
    for (slug, score) in ranked.into_iter().take(limit) {
        let reasons = card.signals.get(slug).map(|s| s.join("; ")).unwrap_or_default();
        println!("- {slug} score {score}: {reasons}");
    }
}
