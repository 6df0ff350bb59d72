use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::{
    ArtifactKind, Classification, FactCheckReport, ImageEvaluation, ScrapeRecord, ValiditySummary,
    ValidityVerdict,
};
use crate::retry::{retry_with_backoff, RetryPolicy};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub(crate) const MAX_TOKENS: u32 = 200;
/// Per-artifact character budget inside the prompt
const SECTION_CHARS: usize = 3000;
const EXCERPT_CHARS: usize = 600;

const SYSTEM_PROMPT: &str =
    "You are a careful news validity assessor. You weigh automated evidence and answer concisely.";

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ClaudeErrorBody {
    error: ClaudeErrorDetail,
}

#[derive(Deserialize)]
struct ClaudeErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Anthropic Messages API client.
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ClaudeClient {
    pub fn new(api_key: Option<String>, model: &str, base_url: &str) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            PipelineError::Auth("ANTHROPIC_API_KEY is not set; it is required for aggregation".to_string())
        })?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Map a failed response onto the error taxonomy.
    fn classify_error(status: StatusCode, body: &str) -> PipelineError {
        let detail = serde_json::from_str::<ClaudeErrorBody>(body)
            .map(|b| b.error)
            .ok();
        let kind = detail.as_ref().map(|d| d.kind.as_str()).unwrap_or("");
        let message = detail
            .as_ref()
            .map(|d| d.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.to_string());

        if status == StatusCode::TOO_MANY_REQUESTS
            || status.as_u16() == 529
            || kind == "rate_limit_error"
            || kind == "overloaded_error"
        {
            return PipelineError::Throttling(format!("{} {}", status, message));
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PipelineError::Auth(message),
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                PipelineError::InvalidRequest(message)
            }
            _ => PipelineError::Network(format!("Claude API error ({}): {}", status, message)),
        }
    }
}

#[async_trait]
impl ChatModel for ClaudeClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ClaudeRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, "Claude request");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("Failed to send request to Claude API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(Self::classify_error(status, &error_text));
        }

        let claude_response = response
            .json::<ClaudeResponse>()
            .await
            .map_err(|e| PipelineError::InvalidRequest(format!("Failed to parse Claude API response: {}", e)))?;

        let text = claude_response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(PipelineError::Model("Claude returned an empty completion".to_string()));
        }

        Ok(text)
    }
}

/// Everything known about one URL. Any upstream artifact may be missing.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    pub url: String,
    pub scrape: Option<ScrapeRecord>,
    pub fact_check: Option<FactCheckReport>,
    pub classification: Option<Classification>,
    pub images: Option<ImageEvaluation>,
}

impl Evidence {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn missing(&self) -> Vec<ArtifactKind> {
        let mut missing = Vec::new();
        if self.scrape.is_none() {
            missing.push(ArtifactKind::Scrape);
        }
        if self.fact_check.is_none() {
            missing.push(ArtifactKind::FactCheck);
        }
        if self.classification.is_none() {
            missing.push(ArtifactKind::Classification);
        }
        if self.images.is_none() {
            missing.push(ArtifactKind::ImageEvaluation);
        }
        missing
    }

    pub fn is_empty(&self) -> bool {
        self.missing().len() == 4
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...", head)
}

fn section<T: Serialize>(value: Option<&T>) -> String {
    match value.map(serde_json::to_string) {
        Some(Ok(json)) => truncate(&json, SECTION_CHARS),
        Some(Err(_)) | None => "not available".to_string(),
    }
}

/// Build the aggregation prompt for one URL.
pub fn build_prompt(evidence: &Evidence) -> String {
    let source = evidence.scrape.as_ref().map(|s| {
        serde_json::json!({
            "title": s.title,
            "credibility_score": s.credibility.overall_score,
            "credibility_notes": s.credibility.notes,
            "stats": s.stats,
            "excerpt": truncate(&s.text, EXCERPT_CHARS),
        })
    });

    format!(
        r#"You are to act as a news validity assessor.

Here is the information for an article ({url}):

1. Source and credibility signals: {source}
2. Fake news text analysis: {classification}
3. Wikipedia fact-check results: {facts}
4. Image evaluation data: {images}

Some sources may be "not available"; reason only from what is present and say which evidence was missing.
Start your answer with exactly one line of the form "Verdict: REAL", "Verdict: FAKE" or "Verdict: MIXED".
Then give a concise summary (max 100 words) explaining your reasoning."#,
        url = evidence.url,
        source = section(source.as_ref()),
        classification = section(evidence.classification.as_ref()),
        facts = section(evidence.fact_check.as_ref()),
        images = section(evidence.images.as_ref()),
    )
}

/// Final stage: asks the hosted model for a verdict, retrying on throttling.
pub struct Aggregator {
    model: Box<dyn ChatModel>,
    retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(model: Box<dyn ChatModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub async fn summarize(&self, evidence: &Evidence) -> Result<ValiditySummary> {
        if evidence.is_empty() {
            return Err(PipelineError::InvalidRequest(format!(
                "No evidence available for {}",
                evidence.url
            )));
        }

        let prompt = build_prompt(evidence);
        let missing = evidence.missing();
        info!(url = %evidence.url, missing = missing.len(), "Aggregating evidence");

        let model = self.model.as_ref();
        let prompt = prompt.as_str();
        let text = retry_with_backoff(&self.retry, "aggregate", move || {
            model.complete(SYSTEM_PROMPT, prompt)
        })
        .await?;

        let summary = text.trim().to_string();
        if summary.is_empty() {
            return Err(PipelineError::Model("Model returned an empty summary".to_string()));
        }

        Ok(ValiditySummary {
            url: evidence.url.clone(),
            verdict: ValidityVerdict::parse_from(&summary),
            summary,
            missing,
        })
    }
}
