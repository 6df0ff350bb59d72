use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::{Classification, Probabilities, ScrapeRecord};

/// Rough word budget that keeps BERT-style inputs under 512 tokens
pub const DEFAULT_MAX_INPUT_WORDS: usize = 400;
const PREVIEW_CHARS: usize = 200;

#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Probability of each label for already-cleaned text.
    async fn predict(&self, text: &str) -> Result<Probabilities>;
    fn name(&self) -> &str;
}

/// Strip URLs and anything but letters, digits, whitespace and `.,!?`, then
/// collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let without_urls = text
        .split_whitespace()
        .filter(|w| !w.starts_with("http://") && !w.starts_with("https://") && !w.starts_with("www."))
        .collect::<Vec<_>>()
        .join(" ");

    let kept: String = without_urls
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?'))
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace().take(max_words).collect::<Vec<_>>().join(" ")
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Text classifier stage: prepares the article text and labels it.
pub struct ArticleClassifier {
    model: Box<dyn TextClassifier>,
    max_input_words: usize,
}

impl ArticleClassifier {
    pub fn new(model: Box<dyn TextClassifier>) -> Self {
        Self {
            model,
            max_input_words: DEFAULT_MAX_INPUT_WORDS,
        }
    }

    pub fn with_max_input_words(mut self, max_input_words: usize) -> Self {
        self.max_input_words = max_input_words.max(1);
        self
    }

    pub async fn classify(&self, record: &ScrapeRecord) -> Result<Classification> {
        let combined = if record.title.is_empty() {
            record.text.clone()
        } else {
            format!("{}. {}", record.title, record.text)
        };

        let cleaned = clean_text(&combined);
        if cleaned.is_empty() {
            return Err(PipelineError::Model(format!(
                "Text is empty after preprocessing for {}",
                record.url
            )));
        }

        let input = truncate_words(&cleaned, self.max_input_words);
        debug!(url = %record.url, model = self.model.name(), words = input.split_whitespace().count(), "Classifying");

        let probabilities = self.model.predict(&input).await?;
        Ok(Classification::from_probabilities(
            &record.url,
            probabilities,
            preview(&cleaned),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

/// Hugging Face inference endpoint for a sequence-classification model.
pub struct HostedClassifier {
    client: Client,
    endpoint: String,
    model: String,
    api_token: Option<String>,
}

impl HostedClassifier {
    pub fn new(base_url: &str, model: &str, api_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), model),
            model: model.to_string(),
            api_token,
        })
    }

    /// Map a failed inference response onto the error taxonomy.
    fn classify_error(model: &str, status: StatusCode, body: &str) -> PipelineError {
        match status {
            StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => PipelineError::ModelLoad(
                format!("Model {} is unavailable ({}): {}", model, status, body),
            ),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                PipelineError::Auth(format!("Classifier endpoint rejected token: {}", body))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                PipelineError::QuotaExceeded(format!("Classifier quota exhausted: {}", body))
            }
            _ => PipelineError::Model(format!("Classifier error ({}): {}", status, body)),
        }
    }

    fn parse_scores(body: serde_json::Value) -> Result<Probabilities> {
        // The endpoint answers either [[{label, score}...]] or [{label, score}...]
        let flat = match body {
            serde_json::Value::Array(items) if items.first().map_or(false, |i| i.is_array()) => {
                items.into_iter().next().unwrap_or_default()
            }
            other => other,
        };

        let scores: Vec<LabelScore> = serde_json::from_value(flat)
            .map_err(|e| PipelineError::Model(format!("Unexpected classifier response: {}", e)))?;

        let mut fake = None;
        let mut real = None;
        for s in scores {
            match s.label.to_uppercase().as_str() {
                "LABEL_0" | "FAKE" => fake = Some(s.score),
                "LABEL_1" | "REAL" => real = Some(s.score),
                _ => {}
            }
        }

        match (fake, real) {
            (Some(fake), Some(real)) => Ok(Probabilities { fake, real }),
            (Some(fake), None) => Ok(Probabilities { fake, real: 1.0 - fake }),
            (None, Some(real)) => Ok(Probabilities { fake: 1.0 - real, real }),
            (None, None) => Err(PipelineError::Model(
                "Classifier response had no recognizable labels".to_string(),
            )),
        }
    }
}

#[async_trait]
impl TextClassifier for HostedClassifier {
    async fn predict(&self, text: &str) -> Result<Probabilities> {
        let token = self.api_token.as_deref().ok_or_else(|| {
            PipelineError::Auth("HF_API_TOKEN is not set; it is required for the hosted classifier".to_string())
        })?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&serde_json::json!({ "inputs": text }))
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("Failed to reach classifier endpoint: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(Self::classify_error(&self.model, status, &error_text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Model(format!("Failed to parse classifier response: {}", e)))?;

        Self::parse_scores(body)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LinearWeights {
    #[serde(default)]
    name: Option<String>,
    bias: f64,
    weights: HashMap<String, f64>,
}

/// Bag-of-words logistic model read from a local JSON file:
/// `{"bias": f64, "weights": {"token": f64, ...}}`. Positive scores lean REAL.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    name: String,
    bias: f64,
    weights: HashMap<String, f64>,
}

impl LinearClassifier {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::ModelLoad(format!("Cannot read model weights {}: {}", path.display(), e))
        })?;
        let model = Self::from_json(&content).map_err(|e| match e {
            PipelineError::ModelLoad(msg) => {
                PipelineError::ModelLoad(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })?;
        info!(model = %model.name, path = %path.display(), "Loaded local classifier");
        Ok(model)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: LinearWeights = serde_json::from_str(json)
            .map_err(|e| PipelineError::ModelLoad(format!("Invalid model weights: {}", e)))?;

        if raw.weights.is_empty() {
            return Err(PipelineError::ModelLoad("Model weights are empty".to_string()));
        }

        Ok(Self {
            name: raw.name.unwrap_or_else(|| "linear-bow".to_string()),
            bias: raw.bias,
            weights: raw
                .weights
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        })
    }

    fn score(&self, text: &str) -> f64 {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        if tokens.is_empty() {
            return self.bias;
        }

        let total: f64 = tokens.iter().filter_map(|t| self.weights.get(t)).sum();
        self.bias + total / (tokens.len() as f64).sqrt()
    }
}

#[async_trait]
impl TextClassifier for LinearClassifier {
    async fn predict(&self, text: &str) -> Result<Probabilities> {
        let real = 1.0 / (1.0 + (-self.score(text)).exp());
        Ok(Probabilities {
            fake: 1.0 - real,
            real,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credibility;
    use crate::models::{Label, ScrapeStats};

    const WEIGHTS: &str = r#"{
        "name": "test-model",
        "bias": 0.1,
        "weights": {"shocking": -2.0, "miracle": -1.5, "officials": 0.8, "Reported": 0.6}
    }"#;

    fn record(title: &str, text: &str) -> ScrapeRecord {
        ScrapeRecord {
            url: "https://news.example.com/story".to_string(),
            title: title.to_string(),
            text: text.to_string(),
            images: Vec::new(),
            credibility: credibility::assess("https://news.example.com/story"),
            stats: ScrapeStats {
                blocks: 1,
                chars: text.len(),
                images: 0,
            },
        }
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(
            clean_text("Read more at https://x.com/a  — it's “great”!\n\nReally?"),
            "Read more at its great! Really?"
        );
    }

    #[test]
    fn test_parse_nested_and_flat_scores() {
        let nested = serde_json::json!([[{"label": "LABEL_1", "score": 0.8}, {"label": "LABEL_0", "score": 0.2}]]);
        let p = HostedClassifier::parse_scores(nested).unwrap();
        assert_eq!(p, Probabilities { fake: 0.2, real: 0.8 });

        let flat = serde_json::json!([{"label": "FAKE", "score": 0.75}]);
        let p = HostedClassifier::parse_scores(flat).unwrap();
        assert_eq!(p.fake, 0.75);
        assert!((p.real - 0.25).abs() < 1e-9);

        let bad = serde_json::json!({"error": "Model is loading"});
        assert!(matches!(HostedClassifier::parse_scores(bad), Err(PipelineError::Model(_))));
    }

    #[test]
    fn test_status_maps_to_error_kind() {
        let model = "hamzab/roberta-fake-news-classification";
        let kind = |code: u16| {
            let status = StatusCode::from_u16(code).unwrap();
            HostedClassifier::classify_error(model, status, "details").kind()
        };

        assert_eq!(kind(404), "model_load");
        assert_eq!(kind(503), "model_load");
        assert_eq!(kind(401), "auth");
        assert_eq!(kind(403), "auth");
        assert_eq!(kind(429), "quota_exceeded");
        assert_eq!(kind(500), "model");
        assert_eq!(kind(400), "model");

        let err = HostedClassifier::classify_error(model, StatusCode::SERVICE_UNAVAILABLE, "loading");
        assert!(err.to_string().contains(model));
        assert!(err.to_string().contains("loading"));
    }

    #[test]
    fn test_missing_weights_file_is_model_load_error() {
        let err = LinearClassifier::load(Path::new("/nonexistent/weights.json")).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
        let err = LinearClassifier::from_json(r#"{"bias": 0.0, "weights": {}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
    }

    #[tokio::test]
    async fn test_linear_classifier_is_deterministic() {
        let stage = ArticleClassifier::new(Box::new(LinearClassifier::from_json(WEIGHTS).unwrap()));
        let r = record("Shocking miracle cure", "A shocking miracle cure was found, the post said.");

        let first = stage.classify(&r).await.unwrap();
        for _ in 0..5 {
            assert_eq!(stage.classify(&r).await.unwrap(), first);
        }
        assert_eq!(first.label, Label::Fake);
        assert!(first.confidence > 0.5 && first.confidence <= 1.0);
        assert!((first.probabilities.fake + first.probabilities.real - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_officials_lean_real() {
        let stage = ArticleClassifier::new(Box::new(LinearClassifier::from_json(WEIGHTS).unwrap()));
        let r = record("", "Officials reported the figures on Monday, officials said.");
        let c = stage.classify(&r).await.unwrap();
        assert_eq!(c.label, Label::Real);
    }

    #[tokio::test]
    async fn test_empty_text_is_model_error() {
        let stage = ArticleClassifier::new(Box::new(LinearClassifier::from_json(WEIGHTS).unwrap()));
        let err = stage.classify(&record("", "— “ ”")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
    }

    #[tokio::test]
    async fn test_hosted_without_token_is_auth_error() {
        let hosted = HostedClassifier::new("http://127.0.0.1:9", "some/model", None).unwrap();
        let err = hosted.predict("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
    }
}
