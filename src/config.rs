//! Pipeline configuration: optional TOML file with built-in defaults.
//! The API credential is only ever read from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: String,
    /// Maximum reviews per classifier request.
    pub batch_size: i64,
    /// Idle wait when no unanalyzed reviews remain.
    pub drain_wait_secs: u64,
    /// Wait after a failed classify call before retrying the batch.
    pub backoff_wait_secs: u64,
    /// Fixed delay between successful cycles (request-rate limit).
    pub pacing_wait_secs: u64,
    /// Gemini model identifier.
    pub model: String,
    /// Optional brand filter applied during CSV load.
    pub brand_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "reviews.db".to_string(),
            batch_size: 100,
            drain_wait_secs: 60,
            backoff_wait_secs: 30,
            pacing_wait_secs: 5,
            model: "gemini-2.5-flash-lite".to_string(),
            brand_filter: None,
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults when the file
    /// is absent. A present-but-invalid file is an error, not a silent
    /// fallback.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Read the classifier credential from the environment, if set.
    pub fn api_key() -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_secs(self.drain_wait_secs)
    }

    pub fn backoff_wait(&self) -> Duration {
        Duration::from_secs(self.backoff_wait_secs)
    }

    pub fn pacing_wait(&self) -> Duration {
        Duration::from_secs(self.pacing_wait_secs)
    }
}
