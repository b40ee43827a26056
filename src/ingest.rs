//! One-time CSV bulk load into the `reviews` table.

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

use crate::models::NewReview;
use crate::storage::{ReviewStore, StorageError};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Raw CSV row; every field optional since the source dataset has gaps.
/// Extra columns in the file are ignored.
#[derive(Debug, Deserialize)]
struct CsvRow {
    author_id: Option<String>,
    brand_name: Option<String>,
    submission_time: Option<String>,
    rating: Option<i64>,
    review_title: Option<String>,
    review_text: Option<String>,
    product_name: Option<String>,
}

/// Parse a submission time to epoch seconds. The dataset uses `YYYY-MM-DD`
/// dates; already-numeric values pass through.
fn parse_submission_time(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    raw.parse::<i64>().ok()
}

fn to_new_review(row: CsvRow) -> NewReview {
    NewReview {
        author_id: row
            .author_id
            .as_deref()
            .and_then(|a| a.trim().parse::<i64>().ok()),
        brand_name: row.brand_name,
        submission_time: row
            .submission_time
            .as_deref()
            .and_then(parse_submission_time),
        rating: row.rating,
        review_title: row.review_title,
        review_text: row.review_text,
        product_name: row.product_name,
    }
}

/// Load reviews from `csv_path` into the store, optionally keeping only one
/// brand. All rows are inserted in a single transaction. Returns the number
/// of rows loaded.
pub async fn load_csv(
    store: &ReviewStore,
    csv_path: &Path,
    brand_filter: Option<&str>,
) -> Result<u64, IngestError> {
    let mut reader = csv::Reader::from_path(csv_path)?;

    let mut rows: Vec<NewReview> = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<CsvRow>() {
        let row = record?;
        if let Some(brand) = brand_filter {
            if row.brand_name.as_deref() != Some(brand) {
                skipped += 1;
                continue;
            }
        }
        rows.push(to_new_review(row));
    }

    let loaded = store.insert_reviews(&rows).await?;
    tracing::info!(
        loaded,
        skipped,
        path = %csv_path.display(),
        "CSV bulk load completed"
    );
    Ok(loaded)
}
