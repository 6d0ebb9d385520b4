use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

/// Snapshots kept per symbol: one day at the default 60 s poll interval.
pub const DEFAULT_SNAPSHOT_RETENTION: u32 = 1440;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    snapshot_retention: u32,
}

/// Last evaluated price and multiple; read back when a live quote is unavailable.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct SnapshotRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub price: f64,
    pub previous_close: f64,
    pub multiple: Option<f64>,
    pub tier_id: Option<String>,
    pub trailing_revenue: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub fundamentals_as_of: Option<String>,
    pub created_at: Option<String>,
}

/// Per-symbol alert bookkeeping. Dates are ISO `YYYY-MM-DD` in UTC.
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize)]
pub struct AlertStateRecord {
    pub symbol: String,
    pub last_tier_id: Option<String>,
    pub last_price: Option<f64>,
    pub last_large_movement_date: Option<String>,
    pub last_digest_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct AlertRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub alert_type: String,
    pub message: String,
    pub price: f64,
    pub created_at: Option<String>,
}

impl Store {
    /// Create a Store from an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }

    /// Keep at most `keep` snapshots per symbol (at least one).
    pub fn with_snapshot_retention(mut self, keep: u32) -> Self {
        self.snapshot_retention = keep.max(1);
        self
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn new(database_path: &str) -> Result<Self> {
        let in_memory = database_path == ":memory:";

        if !in_memory {
            if let Some(parent) = std::path::Path::new(database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
            }
        }

        let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{database_path}"))
            .context("Invalid database path")?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // Each in-memory connection is its own database.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self::from_pool(pool);
        store.migrate().await?;

        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        let migration_sql = include_str!("../../migrations/001_init.sql");
        // Execute each statement separately (sqlx doesn't support multiple statements in one call)
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("Failed to execute migration: {trimmed}"))?;
            }
        }
        Ok(())
    }

    // --- Snapshot operations ---

    pub async fn insert_snapshot(&self, snapshot: &SnapshotRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO valuation_snapshots (symbol, price, previous_close, multiple, tier_id, trailing_revenue, shares_outstanding, fundamentals_as_of)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.symbol)
        .bind(snapshot.price)
        .bind(snapshot.previous_close)
        .bind(snapshot.multiple)
        .bind(&snapshot.tier_id)
        .bind(snapshot.trailing_revenue)
        .bind(snapshot.shares_outstanding)
        .bind(&snapshot.fundamentals_as_of)
        .execute(&self.pool)
        .await
        .context("Failed to insert snapshot")?;

        self.prune_snapshots(&snapshot.symbol).await?;
        Ok(result.last_insert_rowid())
    }

    /// Drop all but the newest `snapshot_retention` rows for `symbol`.
    async fn prune_snapshots(&self, symbol: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM valuation_snapshots WHERE symbol = ? AND id NOT IN (
                SELECT id FROM valuation_snapshots WHERE symbol = ? ORDER BY id DESC LIMIT ?
             )",
        )
        .bind(symbol)
        .bind(symbol)
        .bind(i64::from(self.snapshot_retention))
        .execute(&self.pool)
        .await
        .context("Failed to prune snapshots")?;
        Ok(result.rows_affected())
    }

    pub async fn latest_snapshot(&self, symbol: &str) -> Result<Option<SnapshotRecord>> {
        let snapshot = sqlx::query_as::<_, SnapshotRecord>(
            "SELECT * FROM valuation_snapshots WHERE symbol = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest snapshot")?;
        Ok(snapshot)
    }

    pub async fn recent_snapshots(&self, symbol: &str, limit: i64) -> Result<Vec<SnapshotRecord>> {
        let snapshots = sqlx::query_as::<_, SnapshotRecord>(
            "SELECT * FROM valuation_snapshots WHERE symbol = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent snapshots")?;
        Ok(snapshots)
    }

    // --- Alert state operations ---

    /// Stored state for `symbol`, or an empty state if none was saved yet.
    pub async fn load_alert_state(&self, symbol: &str) -> Result<AlertStateRecord> {
        let state = sqlx::query_as::<_, AlertStateRecord>(
            "SELECT symbol, last_tier_id, last_price, last_large_movement_date, last_digest_date
             FROM alert_state WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch alert state")?;

        Ok(state.unwrap_or_else(|| AlertStateRecord {
            symbol: symbol.to_string(),
            ..Default::default()
        }))
    }

    pub async fn save_alert_state(&self, state: &AlertStateRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_state (symbol, last_tier_id, last_price, last_large_movement_date, last_digest_date, updated_at)
             VALUES (?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
             ON CONFLICT(symbol) DO UPDATE SET
                last_tier_id = excluded.last_tier_id,
                last_price = excluded.last_price,
                last_large_movement_date = excluded.last_large_movement_date,
                last_digest_date = excluded.last_digest_date,
                updated_at = excluded.updated_at",
        )
        .bind(&state.symbol)
        .bind(&state.last_tier_id)
        .bind(state.last_price)
        .bind(&state.last_large_movement_date)
        .bind(&state.last_digest_date)
        .execute(&self.pool)
        .await
        .context("Failed to save alert state")?;
        Ok(())
    }

    // --- Alert history operations ---

    pub async fn insert_alert(&self, alert: &AlertRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO alert_history (symbol, alert_type, message, price) VALUES (?, ?, ?, ?)",
        )
        .bind(&alert.symbol)
        .bind(&alert.alert_type)
        .bind(&alert.message)
        .bind(alert.price)
        .execute(&self.pool)
        .await
        .context("Failed to insert alert")?;

        Ok(result.last_insert_rowid())
    }

    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<AlertRecord>> {
        let alerts = sqlx::query_as::<_, AlertRecord>(
            "SELECT * FROM alert_history ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent alerts")?;
        Ok(alerts)
    }
}
