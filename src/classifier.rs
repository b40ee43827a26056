//! Classifier gateway: one Gemini `generateContent` call per review batch,
//! with a constrained JSON response schema so the reply decodes straight into
//! typed results instead of free text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::models::{AnalysisResult, Category, Review, Sentiment};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("GEMINI_API_KEY is not set")]
    MissingCredential,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Classifier response contained no candidates")]
    EmptyResponse,

    #[error("Classifier response violated the result schema: {0}")]
    Schema(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

/// The classify boundary, mockable for driver tests.
///
/// Implementations are stateless across calls: one outbound request per
/// batch, no other side effects.
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, batch: &[Review]) -> Result<Vec<AnalysisResult>>;
}

// === Gemini wire types ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
    temperature: f64,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

/// JSON schema the model is required to produce: an array of
/// `{id, category, sentiment}` objects with closed enum values.
fn result_schema() -> serde_json::Value {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    let sentiments: Vec<&str> = Sentiment::ALL.iter().map(|s| s.as_str()).collect();

    serde_json::json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "INTEGER" },
                "category": { "type": "STRING", "enum": categories },
                "sentiment": { "type": "STRING", "enum": sentiments },
            },
            "required": ["id", "category", "sentiment"],
        },
    })
}

/// Build the instruction plus the enumerated batch payload.
fn build_prompt(batch: &[Review]) -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let sentiments = Sentiment::ALL
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = format!(
        "You are an AI that analyzes product reviews.\n\
         For each review below, assign one category ({categories}) and one \
         sentiment ({sentiments}).\n\
         Return a JSON array with one element per review, echoing the \
         review's id unchanged.\n\nReviews:\n"
    );

    for r in batch {
        prompt.push_str(&format!(
            "- id: {}, product: {}, author_id: {}, submission_time: {}, text: {}\n",
            r.id,
            r.product_name.as_deref().unwrap_or(""),
            r.author_id.map(|a| a.to_string()).unwrap_or_default(),
            r.submission_time.map(|t| t.to_string()).unwrap_or_default(),
            r.review_text.as_deref().unwrap_or(""),
        ));
    }

    prompt
}

/// Gemini-backed classifier. Construction fails fast when the credential is
/// missing, so the pipeline never enters its loop with a dead gateway.
pub struct GeminiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClassifier {
    pub fn new(config: &Config, api_key: Option<String>) -> Result<Self> {
        let api_key = match api_key {
            Some(key) if !key.trim().is_empty() => key,
            _ => return Err(ClassifierError::MissingCredential),
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl Classify for GeminiClassifier {
    async fn classify(&self, batch: &[Review]) -> Result<Vec<AnalysisResult>> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(batch),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: result_schema(),
                temperature: 0.0,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            // Quota and auth rejections land here; body kept for the log
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let response: GenerateContentResponse = resp.json().await?;
        let text = response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or(ClassifierError::EmptyResponse)?;

        // Strict decode: unknown labels or a non-array reply are a uniform
        // failure, never partial data.
        let results: Vec<AnalysisResult> = serde_json::from_str(text)?;

        tracing::debug!(
            batch = batch.len(),
            results = results.len(),
            "classifier batch completed"
        );
        Ok(results)
    }
}
