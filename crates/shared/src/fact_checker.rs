use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::config::FactCheckThresholds;
use crate::error::{PipelineError, Result};
use crate::models::{ClaimCheck, FactCheckReport, FactCheckStats, ScrapeRecord, Verdict};

const MAX_CLAIM_CHARS: usize = 300;
const MIN_CLAIM_CHARS: usize = 10;
const MIN_TEXT_CLAIM_WORDS: usize = 6;
const MAX_QUERY_CHARS: usize = 300;
const PAGE_CONTENT_CHARS: usize = 5000;

const HEDGE_PREFIXES: &[&str] = &[
    "according to",
    "it is reported that",
    "sources say",
    "it has been claimed that",
    "some say",
    "many believe",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "he", "her", "his", "in", "is", "it", "its", "of", "on", "or", "she", "that", "the", "their",
    "them", "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who",
    "will", "with", "you", "i", "mr", "mrs", "ms", "after", "before", "there", "then", "also",
];

/// A reference article retrieved for a query
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePage {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Best page for `query`, or `None` when nothing matches.
    async fn lookup(&self, query: &str) -> Result<Option<ReferencePage>>;
}

#[derive(Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Deserialize)]
struct PageResponse {
    query: Option<PageQuery>,
}

#[derive(Deserialize)]
struct PageQuery {
    pages: Vec<WikiPage>,
}

#[derive(Deserialize)]
struct WikiPage {
    title: String,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    fullurl: Option<String>,
    #[serde(default)]
    missing: bool,
}

/// MediaWiki search + plain-text extract, cached per page title.
pub struct WikipediaClient {
    client: Client,
    api_url: String,
    cache: Mutex<HashMap<String, ReferencePage>>,
}

impl WikipediaClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("CheckNews/1.0 (news validity checker)")
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("Failed to query Wikipedia: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Network(format!("Wikipedia returned {}", status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::InvalidRequest(format!("Failed to parse Wikipedia response: {}", e)))
    }

    fn cached(&self, title: &str) -> Option<ReferencePage> {
        self.cache.lock().ok().and_then(|c| c.get(title).cloned())
    }

    async fn search_title(&self, query: &str) -> Result<Option<String>> {
        let url = format!(
            "{}?action=query&list=search&srsearch={}&srlimit=5&format=json&utf8=1",
            self.api_url,
            urlencoding::encode(query)
        );
        let response: SearchResponse = self.get_json(&url).await?;
        Ok(response
            .query
            .and_then(|q| q.search.into_iter().next())
            .map(|hit| hit.title))
    }

    async fn fetch_page(&self, title: &str) -> Result<Option<ReferencePage>> {
        let url = format!(
            "{}?action=query&prop=extracts%7Cinfo&inprop=url&explaintext=1&redirects=1&format=json&formatversion=2&titles={}",
            self.api_url,
            urlencoding::encode(title)
        );
        let response: PageResponse = self.get_json(&url).await?;

        let page = match response.query.and_then(|q| q.pages.into_iter().find(|p| !p.missing)) {
            Some(page) => page,
            None => return Ok(None),
        };

        let content: String = page
            .extract
            .unwrap_or_default()
            .chars()
            .take(PAGE_CONTENT_CHARS)
            .collect();

        Ok(Some(ReferencePage {
            url: page.fullurl.unwrap_or_else(|| {
                format!(
                    "https://en.wikipedia.org/wiki/{}",
                    urlencoding::encode(&page.title.replace(' ', "_"))
                )
            }),
            title: page.title,
            content,
        }))
    }
}

#[async_trait]
impl KnowledgeSource for WikipediaClient {
    async fn lookup(&self, query: &str) -> Result<Option<ReferencePage>> {
        let query: String = query.chars().take(MAX_QUERY_CHARS).collect();

        let title = match self.search_title(&query).await? {
            Some(title) => title,
            None => return Ok(None),
        };

        if let Some(page) = self.cached(&title) {
            return Ok(Some(page));
        }

        let page = self.fetch_page(&title).await?;
        if let Some(ref page) = page {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(title, page.clone());
            }
        }
        Ok(page)
    }
}

/// Split text into sentences on `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            let s = current.trim().to_string();
            if !s.is_empty() {
                sentences.push(s);
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Normalize whitespace and drop a leading hedge like "According to".
pub fn preprocess_claim(claim: &str) -> String {
    let claim = claim.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = claim.to_lowercase();

    for prefix in HEDGE_PREFIXES {
        if !lower.starts_with(prefix) {
            continue;
        }
        if let Some(rest) = claim.get(prefix.len()..) {
            return rest
                .trim_start_matches(|c: char| c == ',' || c.is_whitespace())
                .to_string();
        }
    }
    claim
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .map(|w| w.trim_matches(|c: char| c == '\'' || c == '-'))
        .filter(|w| !w.is_empty())
}

/// Capitalized, non-stopword terms, in order of first appearance.
pub fn key_entities(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    words(text)
        .filter(|w| w.chars().next().map_or(false, |c| c.is_uppercase()))
        .filter(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .filter(|w| seen.insert(w.to_string()))
        .take(limit)
        .map(|w| w.to_string())
        .collect()
}

/// Similarity between a claim and a reference page, in [0, 1].
pub fn similarity(claim: &str, content: &str) -> f64 {
    let claim_lower = claim.to_lowercase();
    let content_lower = content.to_lowercase();

    let mut score = strsim::sorensen_dice(&claim_lower, &content_lower);

    let claim_entities: HashSet<String> = key_entities(claim, usize::MAX).into_iter().collect();
    let content_entities: HashSet<String> = key_entities(content, usize::MAX).into_iter().collect();
    if !claim_entities.is_empty() && !content_entities.is_empty() {
        let shared = claim_entities.intersection(&content_entities).count() as f64;
        let union = claim_entities.union(&content_entities).count() as f64;
        score = score * 0.3 + (shared / union) * 0.7;
    }

    let claim_words: HashSet<&str> = words(&claim_lower).collect();
    let content_words: HashSet<&str> = words(&content_lower).collect();
    let word_overlap = if claim_words.is_empty() {
        0.0
    } else {
        claim_words.intersection(&content_words).count() as f64 / claim_words.len() as f64
    };

    score.max(word_overlap * 0.5).clamp(0.0, 1.0)
}

/// Claims worth checking: caption/context sentences first, then body sentences.
pub fn extract_claims(record: &ScrapeRecord, max_claims: usize) -> Vec<String> {
    let mut seen = HashSet::new();

    let from_images = record
        .images
        .iter()
        .flat_map(|img| split_sentences(&img.context))
        .filter(|s| s.chars().count() >= MIN_CLAIM_CHARS);
    let from_text = split_sentences(&record.text)
        .into_iter()
        .filter(|s| s.split_whitespace().count() >= MIN_TEXT_CLAIM_WORDS);

    from_images
        .chain(from_text)
        .map(|s| s.chars().take(MAX_CLAIM_CHARS).collect::<String>())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .take(max_claims)
        .collect()
}

pub struct FactChecker {
    source: Box<dyn KnowledgeSource>,
    thresholds: FactCheckThresholds,
}

impl FactChecker {
    pub fn new(source: Box<dyn KnowledgeSource>, thresholds: FactCheckThresholds) -> Self {
        Self { source, thresholds }
    }

    pub fn wikipedia(api_url: &str, thresholds: FactCheckThresholds) -> Result<Self> {
        Ok(Self::new(Box::new(WikipediaClient::new(api_url)?), thresholds))
    }

    /// Never fails: lookup problems downgrade the claim to `unverified`.
    pub async fn check_claim(&self, raw_claim: &str) -> ClaimCheck {
        let claim = preprocess_claim(raw_claim);

        if claim.chars().count() < MIN_CLAIM_CHARS {
            return unverified(claim, "Claim too short".to_string());
        }

        let mut queries = vec![claim.clone()];
        queries.extend(key_entities(&claim, 3));

        let mut best: Option<(ReferencePage, f64)> = None;
        let mut last_error = None;
        let mut unrelated = false;

        for query in queries.iter().filter(|q| q.chars().count() >= 3) {
            match self.source.lookup(query).await {
                Ok(Some(page)) => {
                    let score = similarity(&claim, &page.content);
                    debug!(query = %query, title = %page.title, score, "Reference candidate");
                    if score <= 0.0 {
                        unrelated = true;
                    } else if best.as_ref().map_or(true, |(_, s)| score > *s) {
                        best = Some((page, score));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(query = %query, error = %e, "Reference lookup failed");
                    last_error = Some(e);
                }
            }
        }

        let (page, score) = match best {
            Some(found) => found,
            None => {
                let reason = match last_error {
                    Some(e) => format!("Lookup failed: {}", e),
                    None if unrelated => "Reference pages share nothing with the claim".to_string(),
                    None => "No reference information found".to_string(),
                };
                return unverified(claim, reason);
            }
        };

        let (verdict, confidence, evidence) = if score > self.thresholds.supported {
            (Verdict::Supported, score, format!("Found information in {}", page.title))
        } else if score > self.thresholds.neutral {
            (Verdict::Neutral, score, format!("Some information found in {}", page.title))
        } else {
            (Verdict::Refuted, 1.0 - score, format!("Little support in {}", page.title))
        };

        ClaimCheck {
            claim,
            verdict,
            confidence,
            similarity: Some(score),
            reference_title: Some(page.title),
            reference_url: Some(page.url),
            evidence: vec![evidence],
        }
    }

    pub async fn check(&self, record: &ScrapeRecord) -> FactCheckReport {
        let claims = extract_claims(record, self.thresholds.max_claims);
        debug!(url = %record.url, claims = claims.len(), "Fact checking");

        let mut checks = Vec::with_capacity(claims.len());
        for claim in &claims {
            checks.push(self.check_claim(claim).await);
        }

        FactCheckReport {
            url: record.url.clone(),
            statistics: FactCheckStats::from_claims(&checks),
            claims: checks,
        }
    }
}

fn unverified(claim: String, reason: String) -> ClaimCheck {
    ClaimCheck {
        claim,
        verdict: Verdict::Unverified,
        confidence: 0.0,
        similarity: None,
        reference_title: None,
        reference_url: None,
        evidence: vec![reason],
    }
}
