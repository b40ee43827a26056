use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use thiserror::Error;

use crate::models::{AnalyzedReview, NewReview, Review};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// SQLite store holding both the source `reviews` table and the
/// `sentiment_analysis` progress table.
///
/// The pipeline treats `reviews` as read-only after bulk load; only the
/// reconciler appends to `sentiment_analysis`.
#[derive(Clone)]
pub struct ReviewStore {
    pool: SqlitePool,
}

impl ReviewStore {
    /// Open (or create) the database at `db_path`.
    pub async fn new(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let connection_string = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&connection_string)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Create both tables if they do not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id       INTEGER,
                brand_name      TEXT,
                submission_time INTEGER,
                rating          INTEGER,
                review_title    TEXT,
                review_text     TEXT,
                product_name    TEXT,
                category        TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sentiment_analysis (
                id              INTEGER PRIMARY KEY,
                author_id       INTEGER,
                category        TEXT NOT NULL,
                sentiment       TEXT NOT NULL,
                product_name    TEXT,
                review_text     TEXT,
                submission_time INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("SQLite schema ready");
        Ok(())
    }

    /// Quick connectivity check — runs SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // === Bulk load (reviews) ===

    /// Insert loaded review rows in a single transaction. Returns the number
    /// of rows inserted.
    pub async fn insert_reviews(&self, reviews: &[NewReview]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for r in reviews {
            sqlx::query(
                r#"
                INSERT INTO reviews
                    (author_id, brand_name, submission_time, rating,
                     review_title, review_text, product_name, category)
                VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
                "#,
            )
            .bind(r.author_id)
            .bind(&r.brand_name)
            .bind(r.submission_time)
            .bind(r.rating)
            .bind(&r.review_title)
            .bind(&r.review_text)
            .bind(&r.product_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(reviews.len() as u64)
    }

    // === Batch selection ===

    /// Select up to `limit` reviews that have no row in `sentiment_analysis`
    /// yet, ordered by id.
    ///
    /// The exclusion subquery is a set membership test, so an (invariant-
    /// violating) duplicate progress row cannot change the result, and an
    /// empty progress table degenerates to "all rows". An empty return means
    /// there is no remaining work.
    pub async fn select_unanalyzed(&self, limit: i64) -> Result<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(
            r#"
            SELECT id, author_id, brand_name, submission_time, rating,
                   review_title, review_text, product_name, category
            FROM reviews
            WHERE id NOT IN (SELECT id FROM sentiment_analysis)
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(reviews)
    }

    // === Progress (sentiment_analysis) ===

    /// Append reconciled rows in a single transaction.
    ///
    /// Append-only: a conflicting id aborts the whole batch rather than
    /// overwriting an existing row. The selector's exclusion query is the
    /// mechanism that keeps ids novel; this method does not re-verify.
    pub async fn insert_analyzed(&self, rows: &[AnalyzedReview]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO sentiment_analysis
                    (id, author_id, category, sentiment,
                     product_name, review_text, submission_time)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.id)
            .bind(row.author_id)
            .bind(row.category)
            .bind(row.sentiment)
            .bind(&row.product_name)
            .bind(&row.review_text)
            .bind(row.submission_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    /// Fetch all persisted analysis rows, ordered by id.
    #[allow(dead_code)]
    pub async fn get_analyzed(&self) -> Result<Vec<AnalyzedReview>> {
        let rows = sqlx::query_as::<_, AnalyzedReview>(
            r#"
            SELECT id, author_id, category, sentiment,
                   product_name, review_text, submission_time
            FROM sentiment_analysis
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // === Counts (status reporting) ===

    pub async fn count_reviews(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviews")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn count_analyzed(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sentiment_analysis")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
