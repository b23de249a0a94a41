use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ClassifierConfig;

/// Category predicted for a message. Anything the model produces outside the
/// known label set is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Category {
    Problem,
    Suggestion,
    #[default]
    Other,
}

impl Category {
    /// Position in the model's label list.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Category::Problem,
            1 => Category::Suggestion,
            _ => Category::Other,
        }
    }

    /// Map a model label: a name from the model's `id2label`, or the
    /// generic `LABEL_<n>` when the model has none.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if let Some(index) = label.strip_prefix("LABEL_") {
            return index
                .parse()
                .map(Category::from_index)
                .unwrap_or_default();
        }
        match label.to_lowercase().as_str() {
            "problem" | "проблема" => Category::Problem,
            "suggestion" | "предложение" => Category::Suggestion,
            _ => Category::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Problem => "Problem",
            Category::Suggestion => "Suggestion",
            Category::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Category>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    inputs: &'a str,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    label: String,
    score: f32,
}

/// `/predict` answers a single input with a flat list and a batch with one
/// list per input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictResponse {
    Single(Vec<Prediction>),
    Batch(Vec<Vec<Prediction>>),
}

impl PredictResponse {
    fn category(&self) -> Category {
        let predictions = match self {
            PredictResponse::Single(p) => p.as_slice(),
            PredictResponse::Batch(batch) => batch.first().map(Vec::as_slice).unwrap_or_default(),
        };
        best(predictions)
            .map(|p| Category::from_label(&p.label))
            .unwrap_or_default()
    }
}

/// Highest score wins; on a tie the earlier label does.
fn best(predictions: &[Prediction]) -> Option<&Prediction> {
    predictions
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.score.is_nan())
        .max_by(|(i, a), (j, b)| a.score.total_cmp(&b.score).then(j.cmp(i)))
        .map(|(_, p)| p)
}

/// Client for a sequence-classification model served by Hugging Face
/// text-embeddings-inference (`text-embeddings-router --model-id <dir>`).
pub struct HttpClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build classifier HTTP client")?;
        info!(
            "Classifier configured: url={}, truncate={}, drop_other={}",
            config.base_url, config.truncate, config.drop_other
        );
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Category> {
        let url = format!("{}/predict", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&PredictRequest {
                inputs: text,
                truncate: self.config.truncate,
            })
            .send()
            .await
            .context("Failed to call classifier")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Classifier error ({}): {}", status, body);
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .context("Failed to parse classifier response")?;
        let category = parsed.category();
        debug!("Classified message as {}", category);
        Ok(category)
    }
}
