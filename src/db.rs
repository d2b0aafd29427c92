use anyhow::Context;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::error::SignalError;
use crate::models::{MatchRecord, NewSignal, SignalDefinition, SignalKind};
use crate::store::SignalStore;

/// Postgres-backed [`SignalStore`].
#[derive(Clone)]
pub struct PgSignalStore {
    pool: PgPool,
}

impl PgSignalStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let signals = vec![
        ("bitcoin", SignalKind::Keyword, Some("crypto"), 2),
        ("ethereum", SignalKind::Keyword, Some("crypto"), 2),
        ("airdrop claim", SignalKind::Phrase, Some("scam"), 5),
        (r"\$[0-9]+", SignalKind::Regex, Some("prices"), 1),
        (r"0x[0-9a-f]{40}", SignalKind::Regex, Some("wallets"), 4),
    ];

    let mut inserted = 0usize;
    for (pattern, kind, category, priority) in signals {
        let result = sqlx::query(
            r#"
            INSERT INTO signal_watch.signals (pattern, type, category, priority)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (pattern) DO NOTHING
            "#,
        )
        .bind(pattern)
        .bind(kind.as_str())
        .bind(category)
        .bind(priority)
        .execute(pool)
        .await?;

        inserted += result.rows_affected() as usize;
    }

    Ok(inserted)
}

/// Import signal definitions from a CSV file with the columns
/// `pattern,kind,category,priority`. Rows are validated like any other
/// signal; existing patterns are skipped.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        pattern: String,
        kind: String,
        category: Option<String>,
        priority: Option<i32>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let kind: SignalKind = row
            .kind
            .parse()
            .with_context(|| format!("row {}: bad kind", line + 1))?;
        let definition = SignalDefinition::new(0, row.pattern.clone(), kind);
        crate::matcher::CompiledSignal::compile(definition)
            .with_context(|| format!("row {}: rejected pattern '{}'", line + 1, row.pattern))?;

        let result = sqlx::query(
            r#"
            INSERT INTO signal_watch.signals (pattern, type, category, priority)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (pattern) DO NOTHING
            "#,
        )
        .bind(&row.pattern)
        .bind(kind.as_str())
        .bind(row.category.filter(|c| !c.is_empty()))
        .bind(row.priority.unwrap_or(0))
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    info!(inserted, path = %csv_path.display(), "signals imported");
    Ok(inserted)
}

fn signal_from_row(row: &PgRow) -> Result<SignalDefinition, SignalError> {
    let kind: String = row.try_get("type")?;
    Ok(SignalDefinition {
        id: row.try_get("id")?,
        pattern: row.try_get("pattern")?,
        kind: kind.parse()?,
        category: row.try_get("category")?,
        priority: row.try_get("priority")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn match_from_row(row: &PgRow) -> Result<MatchRecord, SignalError> {
    let kind: String = row.try_get("type")?;
    Ok(MatchRecord {
        match_id: row.try_get("id")?,
        signal_id: row.try_get("signal_id")?,
        pattern: row.try_get("pattern")?,
        kind: kind.parse()?,
        category: row.try_get("category")?,
        message_id: row.try_get("message_id")?,
        chat_id: row.try_get("chat_id")?,
        context: row.try_get("context")?,
        matched_at: row.try_get("match_timestamp")?,
    })
}

#[async_trait::async_trait]
impl SignalStore for PgSignalStore {
    async fn insert_signal(&self, signal: &NewSignal) -> Result<i64, SignalError> {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO signal_watch.signals (pattern, type, category, priority)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&signal.pattern)
        .bind(signal.kind.as_str())
        .bind(&signal.category)
        .bind(signal.priority)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(id)
    }

    async fn record_match(
        &self,
        signal_id: i64,
        message_id: i64,
        chat_id: i64,
        context: Option<&str>,
    ) -> Result<(), SignalError> {
        sqlx::query(
            r#"
            INSERT INTO signal_watch.signal_matches (signal_id, message_id, chat_id, context)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(signal_id)
        .bind(message_id)
        .bind(chat_id)
        .bind(context)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_active_signals(&self) -> Result<Vec<SignalDefinition>, SignalError> {
        let rows = sqlx::query(
            "SELECT id, pattern, type, category, priority, is_active, created_at \
             FROM signal_watch.signals \
             WHERE is_active \
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn deactivate_signal(&self, signal_id: i64) -> Result<(), SignalError> {
        sqlx::query("UPDATE signal_watch.signals SET is_active = FALSE WHERE id = $1")
            .bind(signal_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>, SignalError> {
        let rows = sqlx::query(
            "SELECT m.id, m.signal_id, s.pattern, s.type, s.category, \
             m.message_id, m.chat_id, m.context, m.match_timestamp \
             FROM signal_watch.signal_matches m \
             JOIN signal_watch.signals s ON s.id = m.signal_id \
             ORDER BY m.match_timestamp DESC, m.id DESC \
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(match_from_row).collect()
    }
}
