// src/sink/sqlite.rs
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use super::{ReleaseRecord, ReleaseSink};

/// SQLite-backed sink. One table per source; batch inserts run inside a
/// single transaction with an in-transaction duplicate check by name.
pub struct SqliteSink {
    pool: SqlitePool,
    table: String,
    label: String,
}

fn valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl SqliteSink {
    /// Open (and create if missing) the database file at `path`.
    pub async fn connect(path: &str, table: &str) -> Result<Self> {
        Self::connect_url(&format!("sqlite://{path}"), table, path).await
    }

    /// In-memory database, used by tests.
    pub async fn in_memory(table: &str) -> Result<Self> {
        Self::connect_url("sqlite::memory:", table, ":memory:").await
    }

    async fn connect_url(url: &str, table: &str, label: &str) -> Result<Self> {
        if !valid_table_name(table) {
            return Err(anyhow!("invalid table name {table:?}"));
        }
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parsing sqlite url {url:?}"))?
            .create_if_missing(true);
        // Single connection: batches are sequential, and it keeps in-memory
        // databases from splitting across connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .with_context(|| format!("opening sqlite database {label:?}"))?;
        Ok(Self {
            pool,
            table: table.to_string(),
            label: format!("sqlite:{label}"),
        })
    }
}

#[async_trait::async_trait]
impl ReleaseSink for SqliteSink {
    async fn ensure_schema(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                url TEXT,
                image TEXT,
                create_time TEXT,
                release_time TEXT,
                video_id INTEGER,
                genre_id INTEGER,
                collection_id INTEGER,
                country TEXT
            )",
            self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating table {}", self.table))?;
        Ok(())
    }

    async fn persist_batch(&self, records: &[ReleaseRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let select = format!("SELECT id FROM {} WHERE name = ?1 LIMIT 1", self.table);
        let insert = format!(
            "INSERT INTO {} (name, url, image, create_time, release_time,
                             video_id, genre_id, collection_id, country)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            self.table
        );

        let mut tx = self.pool.begin().await.context("beginning transaction")?;
        let mut inserted = 0usize;
        for rec in records {
            let existing: Option<(i64,)> = sqlx::query_as(&select)
                .bind(&rec.name)
                .fetch_optional(&mut *tx)
                .await
                .context("duplicate check")?;
            if existing.is_some() {
                tracing::debug!(sink = %self.label, name = %rec.name, "row exists, skipping");
                continue;
            }
            sqlx::query(&insert)
                .bind(&rec.name)
                .bind(&rec.url)
                .bind(&rec.image)
                .bind(Utc::now())
                .bind(rec.release_time)
                .bind(rec.video_id)
                .bind(rec.genre_id)
                .bind(rec.collection_id)
                .bind(&rec.country)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting {:?}", rec.name))?;
            inserted += 1;
        }
        tx.commit().await.context("committing batch")?;
        Ok(inserted)
    }

    fn name(&self) -> &str {
        &self.label
    }
}
