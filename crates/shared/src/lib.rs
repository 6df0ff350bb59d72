// Public modules
pub mod bedrock;
pub mod classifier;
pub mod config;
pub mod credibility;
pub mod error;
pub mod extractor;
pub mod fact_checker;
pub mod image_eval;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod summarizer;

// Re-export commonly used types
pub use bedrock::BedrockClient;
pub use classifier::{ArticleClassifier, HostedClassifier, LinearClassifier, TextClassifier};
pub use config::{Config, LlmProvider};
pub use error::{PipelineError, Result};
pub use extractor::{HttpFetcher, PageFetcher, Scraper};
pub use fact_checker::{FactChecker, KnowledgeSource, WikipediaClient};
pub use image_eval::{ImageEvaluator, ReverseImageSearch, SerpApiClient};
pub use io::ArtifactStore;
pub use models::{
    Classification, FactCheckReport, ImageEvaluation, ScrapeRecord, SummaryEntry, ValiditySummary,
    ValidityVerdict,
};
pub use pipeline::{Pipeline, Stage, StageEvent, UrlOutcome};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use summarizer::{Aggregator, ChatModel, ClaudeClient, Evidence};
