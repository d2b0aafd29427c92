use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use signal_watch::config::{self, Config};
use signal_watch::db::{self, PgSignalStore};
use signal_watch::models::{Message, NewSignal, SignalKind};
use signal_watch::{pipeline, report, AlertManager, DetectionEngine, SignalStore};

#[derive(Parser)]
#[command(name = "signal-watch")]
#[command(about = "Detect user-defined signals in chat messages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a starter set of signals
    Seed,
    /// Import signal definitions from a CSV file (pattern,kind,category,priority)
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Add a single signal
    Add {
        pattern: String,
        #[arg(long, default_value = "keyword")]
        kind: SignalKind,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// Deactivate a signal
    Remove { id: i64 },
    /// List active signals
    List,
    /// Run messages from a CSV file through detection
    /// (id,chat_id,sender_id,content,timestamp,is_outgoing)
    Scan {
        #[arg(long)]
        csv: PathBuf,
        /// Print alerts as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report of recent persisted matches
    Report {
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(serde::Deserialize)]
struct MessageRow {
    id: i64,
    chat_id: i64,
    sender_id: Option<i64>,
    content: String,
    timestamp: Option<DateTime<Utc>>,
    is_outgoing: Option<bool>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            chat_id: row.chat_id,
            sender_id: row.sender_id,
            content: row.content,
            timestamp: row.timestamp.unwrap_or_else(Utc::now),
            is_outgoing: row.is_outgoing.unwrap_or(false),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let store = Arc::new(PgSignalStore::connect(database_url, config.max_connections).await?);
    let engine = DetectionEngine::new(store.clone()).with_store_timeout(config.store_timeout);

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(store.pool()).await?;
            println!("Inserted {inserted} seed signals.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(store.pool(), &csv).await?;
            println!("Inserted {inserted} signals from {}.", csv.display());
        }
        Commands::Add {
            pattern,
            kind,
            category,
            priority,
        } => {
            let signal = engine
                .create_signal(NewSignal {
                    pattern,
                    kind,
                    category,
                    priority,
                })
                .await?;
            println!("Added signal #{} ({} `{}`).", signal.id, signal.kind, signal.pattern);
        }
        Commands::Remove { id } => {
            engine.load_signals().await?;
            if engine.remove_signal(id).await {
                println!("Signal #{id} deactivated.");
            } else {
                // Rows that fail validation never reach the active set.
                store.deactivate_signal(id).await?;
                println!("Signal #{id} deactivated in the store.");
            }
        }
        Commands::List => {
            let signals = store.load_active_signals().await?;
            if signals.is_empty() {
                println!("No active signals.");
                return Ok(());
            }
            for signal in signals {
                println!(
                    "- #{} [{}] `{}` category {} priority {}",
                    signal.id,
                    signal.kind,
                    signal.pattern,
                    signal.category.as_deref().unwrap_or("-"),
                    signal.priority
                );
            }
        }
        Commands::Scan { csv, json } => {
            let loaded = engine.load_signals().await?;
            if loaded == 0 {
                println!("No active signals to scan with.");
                return Ok(());
            }

            let engine = Arc::new(engine);
            let alerts = Arc::new(AlertManager::with_event_buffer(config.event_buffer));
            let (tx, rx) = mpsc::channel(64);
            let worker = tokio::spawn(pipeline::run(engine.clone(), alerts.clone(), rx));

            let mut reader = csv::Reader::from_path(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            for row in reader.deserialize::<MessageRow>() {
                let message: Message = row?.into();
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            drop(tx);

            let stats = worker.await.context("pipeline task failed")?;
            info!(messages = stats.messages, matches = stats.matches, "scan finished");

            let feed = alerts.alerts().await;
            for alert in feed.iter().rev() {
                if json {
                    println!("{}", serde_json::to_string(alert)?);
                } else {
                    println!(
                        "- signal #{} in chat {} (message {}): {}",
                        alert.signal_match.signal_id,
                        alert.signal_match.chat_id,
                        alert.signal_match.message_id,
                        alert.display_text()
                    );
                }
            }
            if !json {
                println!(
                    "Scanned {} messages, {} matches, {} unread alerts.",
                    stats.messages,
                    stats.matches,
                    alerts.unread_count().await
                );
            }
        }
        Commands::Report { limit, out } => {
            let matches = store.recent_matches(limit).await?;
            let report = report::build_report(&matches);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
