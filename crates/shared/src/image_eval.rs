use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::credibility::{host_of, is_reputable_domain};
use crate::error::{PipelineError, Result};
use crate::models::{ImageEvaluation, ImageFinding, ImageMatch, ImageVerdict};

const MAX_MATCHES: usize = 5;
const AUTHENTIC_THRESHOLD: f64 = 0.7;
const NO_MATCH_SCORE: f64 = 0.5;

#[async_trait]
pub trait ReverseImageSearch: Send + Sync {
    async fn search(&self, image_url: &str) -> Result<Vec<ImageMatch>>;
}

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    image_results: Vec<SerpApiImageResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerpApiImageResult {
    position: Option<u32>,
    title: Option<String>,
    link: Option<String>,
    source: Option<String>,
    snippet: Option<String>,
}

/// Google reverse image search through SerpApi.
pub struct SerpApiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            PipelineError::Auth("SERPAPI_KEY is not set; it is required for image evaluation".to_string())
        })?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }

    /// Map a failed search onto the error taxonomy. `body` is the raw
    /// response; SerpApi puts its reason in a JSON `error` field.
    fn classify_error(status: StatusCode, body: &str) -> PipelineError {
        let message = serde_json::from_str::<SerpApiResponse>(body)
            .ok()
            .and_then(|r| r.error)
            .unwrap_or_else(|| body.trim().to_string());
        let lower = message.to_lowercase();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                PipelineError::Auth(format!("SerpApi rejected key ({}): {}", status, message))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                PipelineError::QuotaExceeded(format!("SerpApi quota exhausted ({}): {}", status, message))
            }
            _ if lower.contains("invalid api key")
                || (lower.contains("api key") && lower.contains("missing")) =>
            {
                PipelineError::Auth(message)
            }
            _ if lower.contains("run out of searches") || lower.contains("quota") => {
                PipelineError::QuotaExceeded(message)
            }
            _ if status.is_server_error() => {
                PipelineError::Network(format!("SerpApi returned {}: {}", status, message))
            }
            _ => PipelineError::InvalidRequest(message),
        }
    }
}

#[async_trait]
impl ReverseImageSearch for SerpApiClient {
    async fn search(&self, image_url: &str) -> Result<Vec<ImageMatch>> {
        let url = format!(
            "{}?engine=google_reverse_image&image_url={}&api_key={}",
            self.endpoint,
            urlencoding::encode(image_url),
            urlencoding::encode(&self.api_key)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("Failed to reach SerpApi: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::Network(format!("Failed to read SerpApi response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &text));
        }

        let body: SerpApiResponse = serde_json::from_str(&text)
            .map_err(|e| PipelineError::InvalidRequest(format!("Failed to parse SerpApi response: {}", e)))?;

        if let Some(error) = &body.error {
            // SerpApi reports "no results" as an error string
            if error.to_lowercase().contains("hasn't returned any results") {
                return Ok(Vec::new());
            }
            return Err(Self::classify_error(status, &text));
        }

        Ok(body
            .image_results
            .into_iter()
            .filter_map(|r| {
                let link = r.link?;
                Some(ImageMatch {
                    position: r.position,
                    title: r.title,
                    link,
                    source: r.source,
                    snippet: r.snippet,
                })
            })
            .take(MAX_MATCHES)
            .collect())
    }
}

/// Turn search hits into a credibility score in [0, 1].
///
/// No hits is neutral. Hits start at 0.5 and gain up to 0.3 for the share on
/// reputable domains and up to 0.2 for the number of distinct domains.
pub fn score_matches(matches: &[ImageMatch]) -> (ImageVerdict, f64) {
    if matches.is_empty() {
        return (ImageVerdict::NoMatches, NO_MATCH_SCORE);
    }

    let hosts: Vec<String> = matches.iter().filter_map(|m| host_of(&m.link)).collect();
    let distinct: HashSet<&String> = hosts.iter().collect();
    let reputable = hosts.iter().filter(|h| is_reputable_domain(h)).count();

    let reputable_share = reputable as f64 / matches.len() as f64;
    let spread = distinct.len().min(MAX_MATCHES) as f64 / MAX_MATCHES as f64;
    let score = (0.5 + 0.3 * reputable_share + 0.2 * spread).clamp(0.0, 1.0);

    let verdict = if score >= AUTHENTIC_THRESHOLD {
        ImageVerdict::LikelyAuthentic
    } else {
        ImageVerdict::Uncertain
    };
    (verdict, score)
}

pub struct ImageEvaluator {
    search: Box<dyn ReverseImageSearch>,
}

impl ImageEvaluator {
    pub fn new(search: Box<dyn ReverseImageSearch>) -> Self {
        Self { search }
    }

    /// Evaluate every image for `url`. Auth and quota failures abort the
    /// batch; any other failure is recorded on that image and skipped.
    pub async fn evaluate(&self, url: &str, image_urls: &[String]) -> Result<ImageEvaluation> {
        let mut images = Vec::with_capacity(image_urls.len());

        for image_url in image_urls {
            debug!(url, image_url = %image_url, "Reverse image search");
            match self.search.search(image_url).await {
                Ok(matches) => {
                    let (verdict, score) = score_matches(&matches);
                    images.push(ImageFinding {
                        image_url: image_url.clone(),
                        verdict,
                        credibility_score: Some(score),
                        evidence_urls: matches.iter().map(|m| m.link.clone()).collect(),
                        matches,
                        error: None,
                    });
                }
                Err(e @ (PipelineError::Auth(_) | PipelineError::QuotaExceeded(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(image_url = %image_url, error = %e, "Image lookup failed");
                    images.push(ImageFinding {
                        image_url: image_url.clone(),
                        verdict: ImageVerdict::Error,
                        credibility_score: None,
                        evidence_urls: Vec::new(),
                        matches: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(ImageEvaluation {
            url: url.to_string(),
            images,
        })
    }
}
