use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info};
use url::Url;

use crate::credibility;
use crate::error::{PipelineError, Result};
use crate::models::{ArticleImage, ScrapeRecord, ScrapeStats};

const MIN_BLOCK_CHARS: usize = 40;
const CONTEXT_CHARS: usize = 200;

const SKIP_IMAGE_MARKERS: &[&str] = &[
    "logo",
    "app-store",
    "google-play",
    "inbox",
    "whatsapp",
    "analytics",
    "tracking",
    "pixel",
    "beacon",
    "sprite",
    "avatar",
];
const SKIP_ALT_TEXT: &[&str] = &["logo", "app-get", "whatsapp", "inbox"];
const CHROME_TAGS: &[&str] = &["header", "footer", "nav", "aside"];

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; CheckNews/1.0)")
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| PipelineError::Network(format!("Invalid URL {}: {}", url, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(PipelineError::Network(format!(
                "Only http/https URLs are allowed, got: {}",
                parsed.scheme()
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Network(format!("HTTP error {} for {}", status, url)));
        }

        response
            .text()
            .await
            .map_err(|e| PipelineError::Network(format!("Failed to read response body: {}", e)))
    }
}

/// Title, body text and in-article images pulled from a page
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedArticle {
    pub title: String,
    pub blocks: Vec<String>,
    pub images: Vec<ArticleImage>,
}

impl ExtractedArticle {
    pub fn text(&self) -> String {
        self.blocks.join(" ")
    }
}
macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect("static selector"));
    };
}

selector!(OG_TITLE, r#"meta[property="og:title"]"#);
selector!(TITLE, "title");
selector!(H1, "h1");
selector!(PARAGRAPH, "p");
selector!(ARTICLE, "article");
selector!(MAIN, "main");
selector!(FIGCAPTION, "figcaption");
selector!(IMG, "img");

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn element_text(el: &ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn has_ancestor(el: &ElementRef, names: &[&str]) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .map_or(false, |e| names.contains(&e.name()))
    })
}

fn extract_title(doc: &Html) -> String {
    if let Some(content) = doc
        .select(&OG_TITLE)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .find(|t| !t.is_empty())
    {
        return content;
    }

    for sel in [&*TITLE, &*H1] {
        if let Some(text) = doc.select(sel).map(|el| element_text(&el)).find(|t| !t.is_empty()) {
            return text;
        }
    }

    String::new()
}

/// Paragraph text from `article`, else `main`, else the whole document.
fn extract_blocks(doc: &Html) -> Vec<String> {
    let paragraph = &*PARAGRAPH;
    let mut seen = HashSet::new();

    for root in [&*ARTICLE, &*MAIN] {
        let blocks: Vec<String> = doc
            .select(root)
            .flat_map(|r| r.select(paragraph).map(|p| element_text(&p)).collect::<Vec<_>>())
            .filter(|t| t.chars().count() >= MIN_BLOCK_CHARS)
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if !blocks.is_empty() {
            return blocks;
        }
    }

    doc.select(paragraph)
        .filter(|p| !has_ancestor(p, CHROME_TAGS))
        .map(|p| element_text(&p))
        .filter(|t| t.chars().count() >= MIN_BLOCK_CHARS)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn image_context(img: &ElementRef) -> String {
    let figure = img.ancestors().filter_map(ElementRef::wrap).find(|el| {
        matches!(el.value().name(), "figure" | "picture")
    });

    if let Some(figure) = figure {
        if let Some(text) = figure.select(&FIGCAPTION).map(|c| element_text(&c)).find(|t| !t.is_empty()) {
            return truncate_chars(&text, CONTEXT_CHARS);
        }
        return truncate_chars(&element_text(&figure), CONTEXT_CHARS);
    }

    img.parent()
        .and_then(ElementRef::wrap)
        .map(|p| truncate_chars(&element_text(&p), CONTEXT_CHARS))
        .unwrap_or_default()
}

fn resolve_src(src: &str, base: &Url) -> Option<String> {
    let src = src.trim();
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    base.join(src).ok().map(|u| u.to_string())
}

fn extract_images(doc: &Html, base: &Url) -> Vec<ArticleImage> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for img in doc.select(&IMG) {
        if !has_ancestor(&img, &["article", "main"]) || has_ancestor(&img, CHROME_TAGS) {
            continue;
        }

        let raw_src = img
            .value()
            .attr("src")
            .or_else(|| img.value().attr("data-src"))
            .unwrap_or("");
        let src = match resolve_src(raw_src, base) {
            Some(src) => src,
            None => continue,
        };

        let alt = collapse_whitespace(img.value().attr("alt").unwrap_or(""));
        let src_lower = src.to_lowercase();
        if SKIP_IMAGE_MARKERS.iter().any(|m| src_lower.contains(m))
            || SKIP_ALT_TEXT.contains(&alt.to_lowercase().as_str())
        {
            continue;
        }

        if !seen.insert(src.clone()) {
            continue;
        }

        images.push(ArticleImage {
            src,
            alt,
            context: image_context(&img),
        });
    }

    images
}

/// Pull the article out of raw HTML. `url` is used to resolve relative image
/// sources.
pub fn extract_article(html: &str, url: &str) -> Result<ExtractedArticle> {
    let base = Url::parse(url).map_err(|e| PipelineError::Extraction(format!("Invalid URL {}: {}", url, e)))?;
    let doc = Html::parse_document(html);

    let blocks = extract_blocks(&doc);
    if blocks.is_empty() {
        return Err(PipelineError::Extraction(format!(
            "No article body found at {}",
            url
        )));
    }

    Ok(ExtractedArticle {
        title: extract_title(&doc),
        blocks,
        images: extract_images(&doc, &base),
    })
}

/// First pipeline stage: fetch, extract, and score the source.
pub struct Scraper {
    fetcher: Box<dyn PageFetcher>,
}

impl Scraper {
    pub fn new(fetcher: Box<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn http() -> Result<Self> {
        Ok(Self::new(Box::new(HttpFetcher::new()?)))
    }

    pub async fn scrape(&self, url: &str) -> Result<ScrapeRecord> {
        info!(url, "Scraping");
        let html = self.fetcher.fetch(url).await?;
        let article = extract_article(&html, url)?;
        debug!(
            url,
            blocks = article.blocks.len(),
            images = article.images.len(),
            "Extracted article"
        );

        let text = article.text();
        Ok(ScrapeRecord {
            url: url.to_string(),
            stats: ScrapeStats {
                blocks: article.blocks.len(),
                chars: article.blocks.iter().map(|b| b.chars().count()).sum(),
                images: article.images.len(),
            },
            title: article.title,
            text,
            images: article.images,
            credibility: credibility::assess(url),
        })
    }
}
