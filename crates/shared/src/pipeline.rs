use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::bedrock::BedrockClient;
use crate::classifier::{ArticleClassifier, HostedClassifier, LinearClassifier, TextClassifier};
use crate::config::{Config, LlmProvider};
use crate::error::{PipelineError, Result};
use crate::extractor::Scraper;
use crate::fact_checker::FactChecker;
use crate::image_eval::{ImageEvaluator, ReverseImageSearch, SerpApiClient};
use crate::io::ArtifactStore;
use crate::models::{
    Classification, FactCheckReport, ImageEvaluation, ImageMatch, Probabilities, ScrapeRecord,
    SummaryEntry, ValiditySummary,
};
use crate::summarizer::{Aggregator, ChatModel, ClaudeClient, Evidence};

/// The five pipeline stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scrape,
    FactCheck,
    Classify,
    Images,
    Aggregate,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Scrape,
        Stage::FactCheck,
        Stage::Classify,
        Stage::Images,
        Stage::Aggregate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::FactCheck => "fact-check",
            Stage::Classify => "classify",
            Stage::Images => "images",
            Stage::Aggregate => "aggregate",
        }
    }

    /// 1-based position in a full run.
    pub fn number(&self) -> usize {
        match self {
            Stage::Scrape => 1,
            Stage::FactCheck => 2,
            Stage::Classify => 3,
            Stage::Images => 4,
            Stage::Aggregate => 5,
        }
    }
}

/// Progress reported while a URL moves through `Pipeline::run`.
#[derive(Debug, Clone, Copy)]
pub enum StageEvent<'a> {
    Started { url: &'a str, stage: Stage },
    Scraped(&'a ScrapeRecord),
    FactChecked(&'a FactCheckReport),
    Classified(&'a Classification),
    ImagesEvaluated(&'a ImageEvaluation),
    Summarized(&'a ValiditySummary),
    Failed { url: &'a str, error: &'a PipelineError },
}

type ProgressFn = Box<dyn Fn(&StageEvent<'_>) + Send + Sync>;

/// Stands in for a collaborator that could not be built from config, so the
/// failure surfaces on the URL that needs it instead of at startup.
struct Unavailable(PipelineError);

#[async_trait]
impl TextClassifier for Unavailable {
    async fn predict(&self, _text: &str) -> Result<Probabilities> {
        Err(self.0.clone())
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

#[async_trait]
impl ReverseImageSearch for Unavailable {
    async fn search(&self, _image_url: &str) -> Result<Vec<ImageMatch>> {
        Err(self.0.clone())
    }
}

#[async_trait]
impl ChatModel for Unavailable {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        Err(self.0.clone())
    }
}

fn unavailable(stage: &str, e: PipelineError) -> Box<Unavailable> {
    warn!(stage, error = %e, "Stage unavailable");
    Box::new(Unavailable(e))
}

/// Result of running the whole pipeline for one URL.
#[derive(Debug)]
pub struct UrlOutcome {
    pub url: String,
    pub result: Result<ValiditySummary>,
}

impl UrlOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Pipeline {
    scraper: Scraper,
    fact_checker: FactChecker,
    classifier: ArticleClassifier,
    image_evaluator: ImageEvaluator,
    aggregator: Aggregator,
    store: ArtifactStore,
    progress: Option<ProgressFn>,
}

impl Pipeline {
    pub fn new(
        scraper: Scraper,
        fact_checker: FactChecker,
        classifier: ArticleClassifier,
        image_evaluator: ImageEvaluator,
        aggregator: Aggregator,
        store: ArtifactStore,
    ) -> Self {
        Self {
            scraper,
            fact_checker,
            classifier,
            image_evaluator,
            aggregator,
            store,
            progress: None,
        }
    }

    /// Swap the scraper, keeping every other collaborator.
    pub fn with_scraper(mut self, scraper: Scraper) -> Self {
        self.scraper = scraper;
        self
    }

    /// Receive a `StageEvent` as each stage of `run` starts and finishes.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&StageEvent<'_>) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    fn emit(&self, event: StageEvent<'_>) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    /// Wire up the real collaborators. Missing credentials do not fail here;
    /// they fail the first URL that reaches the stage needing them.
    pub fn from_config(config: &Config) -> Result<Self> {
        let model: Box<dyn TextClassifier> = match &config.classifier_weights {
            Some(path) => match LinearClassifier::load(path) {
                Ok(linear) => Box::new(linear),
                Err(e) => unavailable("classifier", e),
            },
            None => match HostedClassifier::new(
                &config.hf_inference_url,
                &config.classifier_model,
                config.hf_api_token.clone(),
            ) {
                Ok(hosted) => Box::new(hosted),
                Err(e) => unavailable("classifier", e),
            },
        };

        let search: Box<dyn ReverseImageSearch> =
            match SerpApiClient::new(&config.serpapi_url, config.serpapi_key.clone()) {
                Ok(client) => Box::new(client),
                Err(e) => unavailable("images", e),
            };

        let chat: Box<dyn ChatModel> = match config.llm_provider {
            LlmProvider::Anthropic => match ClaudeClient::new(
                config.anthropic_api_key.clone(),
                &config.anthropic_model,
                &config.anthropic_base_url,
            ) {
                Ok(client) => Box::new(client),
                Err(e) => unavailable("aggregate", e),
            },
            LlmProvider::Bedrock => {
                match BedrockClient::new(&config.aws_region, &config.bedrock_model_id) {
                    Ok(client) => Box::new(client),
                    Err(e) => unavailable("aggregate", e),
                }
            }
        };

        Ok(Self::new(
            Scraper::http()?,
            FactChecker::wikipedia(&config.wikipedia_api_url, config.fact_check)?,
            ArticleClassifier::new(model),
            ImageEvaluator::new(search),
            Aggregator::new(chat, config.retry),
            ArtifactStore::new(config.output_dir.clone()),
        ))
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn scraped(&self, url: &str) -> Result<ScrapeRecord> {
        self.store.load_scrape(url)?.ok_or_else(|| {
            PipelineError::Artifact(format!("No scrape output for {}; run the scrape stage first", url))
        })
    }

    /// Scrape `url` and persist the record and image list.
    pub async fn scrape(&self, url: &str) -> Result<ScrapeRecord> {
        let record = self.scraper.scrape(url).await?;
        self.store.save_scrape(&record)?;
        Ok(record)
    }

    /// Fact-check a previously scraped URL.
    pub async fn fact_check(&self, url: &str) -> Result<FactCheckReport> {
        let record = self.scraped(url)?;
        self.fact_check_record(&record).await
    }

    /// Classify a previously scraped URL.
    pub async fn classify(&self, url: &str) -> Result<Classification> {
        let record = self.scraped(url)?;
        self.classify_record(&record).await
    }

    /// Evaluate the images of a previously scraped URL.
    pub async fn evaluate_images(&self, url: &str) -> Result<ImageEvaluation> {
        let record = self.scraped(url)?;
        self.evaluate_record_images(&record).await
    }

    async fn fact_check_record(&self, record: &ScrapeRecord) -> Result<FactCheckReport> {
        let report = self.fact_checker.check(record).await;
        self.store.save_fact_check(&report)?;
        Ok(report)
    }

    async fn classify_record(&self, record: &ScrapeRecord) -> Result<Classification> {
        let classification = self.classifier.classify(record).await?;
        self.store.save_classification(&classification)?;
        Ok(classification)
    }

    async fn evaluate_record_images(&self, record: &ScrapeRecord) -> Result<ImageEvaluation> {
        let evaluation = self
            .image_evaluator
            .evaluate(&record.url, &record.image_urls())
            .await?;
        self.store.save_image_evaluation(&evaluation)?;
        Ok(evaluation)
    }

    async fn summarize(&self, evidence: &Evidence) -> Result<ValiditySummary> {
        let summary = self.aggregator.summarize(evidence).await?;
        self.store.save_summary(&summary.url, &SummaryEntry::from(&summary))?;
        Ok(summary)
    }

    /// Aggregate whatever artifacts are on disk for `url`.
    pub async fn aggregate_from_artifacts(&self, url: &str) -> Result<ValiditySummary> {
        let evidence = Evidence {
            url: url.to_string(),
            scrape: self.store.load_scrape(url)?,
            fact_check: self.store.load_fact_check(url)?,
            classification: self.store.load_classification(url)?,
            images: self.store.load_image_evaluation(url)?,
        };

        let missing = evidence.missing();
        if !missing.is_empty() {
            warn!(url, ?missing, "Aggregating with missing artifacts");
        }

        self.summarize(&evidence).await
    }

    /// All five stages for one URL. Any stage error fails the URL.
    pub async fn run(&self, url: &str) -> Result<ValiditySummary> {
        info!(url, "Pipeline started");

        self.emit(StageEvent::Started { url, stage: Stage::Scrape });
        let record = self.scrape(url).await?;
        self.emit(StageEvent::Scraped(&record));

        self.emit(StageEvent::Started { url, stage: Stage::FactCheck });
        let report = self.fact_check_record(&record).await?;
        self.emit(StageEvent::FactChecked(&report));

        self.emit(StageEvent::Started { url, stage: Stage::Classify });
        let classification = self.classify_record(&record).await?;
        self.emit(StageEvent::Classified(&classification));

        self.emit(StageEvent::Started { url, stage: Stage::Images });
        let images = self.evaluate_record_images(&record).await?;
        self.emit(StageEvent::ImagesEvaluated(&images));

        self.emit(StageEvent::Started { url, stage: Stage::Aggregate });
        let evidence = Evidence {
            url: url.to_string(),
            scrape: Some(record),
            fact_check: Some(report),
            classification: Some(classification),
            images: Some(images),
        };
        let summary = self.summarize(&evidence).await?;
        self.emit(StageEvent::Summarized(&summary));

        info!(url, verdict = ?summary.verdict, "Pipeline finished");
        Ok(summary)
    }

    /// Run each URL independently. Failures are logged, recorded in the
    /// summary artifact, and never stop the batch.
    pub async fn run_batch(&self, urls: &[String]) -> Vec<UrlOutcome> {
        let mut outcomes = Vec::with_capacity(urls.len());

        for url in urls {
            let result = self.run(url).await;

            if let Err(e) = &result {
                error!(url = %url, kind = e.kind(), error = %e, "Pipeline failed");
                self.emit(StageEvent::Failed { url, error: e });
                let entry = SummaryEntry::Error {
                    error: e.to_string(),
                };
                if let Err(save_err) = self.store.save_summary(url, &entry) {
                    warn!(url = %url, error = %save_err, "Could not record failure");
                }
            }

            outcomes.push(UrlOutcome {
                url: url.clone(),
                result,
            });
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactCheckThresholds;
    use crate::extractor::PageFetcher;
    use crate::fact_checker::{KnowledgeSource, ReferencePage};
    use crate::io::{
        CLASSIFICATION_FILE, FACT_CHECK_FILE, IMAGE_EVALUATION_FILE, IMAGE_LIST_FILE, SCRAPE_FILE,
        SUMMARY_FILE,
    };
    use crate::models::{ArtifactKind, ValidityVerdict};
    use crate::retry::RetryPolicy;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const GOOD_URL: &str = "https://www.bbc.com/news/bridge";
    const DEAD_URL: &str = "https://unreachable.invalid/story";

    const PAGE: &str = r#"
<html>
<head><title>Harbour Bridge Opens</title></head>
<body>
  <article>
    <p>The new Harbour Bridge opened to traffic on Monday after five years of construction.</p>
    <figure>
      <img src="/images/bridge.jpg" alt="The bridge">
      <figcaption>The bridge at dawn.</figcaption>
    </figure>
    <p>Transport officials said the crossing would cut commuting times across the city.</p>
  </article>
</body>
</html>
"#;

    const PLAIN_PAGE: &str = r#"
<html>
<head><title>Council Approves Budget</title></head>
<body>
  <article>
    <p>The city council approved next year's budget on Tuesday after a long debate.</p>
    <p>Councillors voted eleven to four in favour of the revised spending plan.</p>
  </article>
</body>
</html>
"#;

    struct MapFetcher(HashMap<String, String>);

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| PipelineError::Network(format!("Connection refused: {}", url)))
        }
    }

    struct EmptyKnowledge;

    #[async_trait]
    impl KnowledgeSource for EmptyKnowledge {
        async fn lookup(&self, _query: &str) -> Result<Option<ReferencePage>> {
            Ok(None)
        }
    }

    struct FixedClassifier;

    #[async_trait]
    impl TextClassifier for FixedClassifier {
        async fn predict(&self, _text: &str) -> Result<Probabilities> {
            Ok(Probabilities { fake: 0.2, real: 0.8 })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct NoMatches;

    #[async_trait]
    impl ReverseImageSearch for NoMatches {
        async fn search(&self, _image_url: &str) -> Result<Vec<ImageMatch>> {
            Ok(Vec::new())
        }
    }

    struct CannedChat;

    #[async_trait]
    impl ChatModel for CannedChat {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            Ok("REAL: reputable outlet and the classifier agrees.".to_string())
        }
    }

    fn pipeline(dir: &TempDir) -> Pipeline {
        let mut pages = HashMap::new();
        pages.insert(GOOD_URL.to_string(), PAGE.to_string());

        Pipeline::new(
            Scraper::new(Box::new(MapFetcher(pages))),
            FactChecker::new(Box::new(EmptyKnowledge), FactCheckThresholds::default()),
            ArticleClassifier::new(Box::new(FixedClassifier)),
            ImageEvaluator::new(Box::new(NoMatches)),
            Aggregator::new(Box::new(CannedChat), RetryPolicy::immediate(2)),
            ArtifactStore::new(dir.path()),
        )
    }

    fn snapshot(dir: &TempDir) -> Vec<(String, String)> {
        [
            SCRAPE_FILE,
            IMAGE_LIST_FILE,
            FACT_CHECK_FILE,
            CLASSIFICATION_FILE,
            IMAGE_EVALUATION_FILE,
            SUMMARY_FILE,
        ]
        .iter()
        .map(|f| {
            let content = fs::read_to_string(dir.path().join(f)).unwrap_or_default();
            (f.to_string(), content)
        })
        .collect()
    }

    #[tokio::test]
    async fn test_run_writes_every_artifact_keyed_by_url() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        let summary = pipeline.run(GOOD_URL).await.unwrap();
        assert_eq!(summary.url, GOOD_URL);
        assert_eq!(summary.verdict, ValidityVerdict::Real);

        let store = pipeline.store();
        assert_eq!(
            store.available(GOOD_URL).unwrap(),
            vec![
                ArtifactKind::Scrape,
                ArtifactKind::FactCheck,
                ArtifactKind::Classification,
                ArtifactKind::ImageEvaluation,
            ]
        );
        assert_eq!(
            store.image_list().unwrap(),
            vec!["https://www.bbc.com/images/bridge.jpg".to_string()]
        );
        assert!(store.summaries().unwrap().contains_key(GOOD_URL));
    }

    #[tokio::test]
    async fn test_unreachable_url_does_not_stop_batch() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        let outcomes = pipeline
            .run_batch(&[DEAD_URL.to_string(), GOOD_URL.to_string()])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].result, Err(PipelineError::Network(_))));
        assert!(outcomes[1].is_ok());

        let summaries = pipeline.store().summaries().unwrap();
        assert!(matches!(summaries.get(DEAD_URL), Some(SummaryEntry::Error { .. })));
        assert!(matches!(summaries.get(GOOD_URL), Some(SummaryEntry::Summary { .. })));
        assert!(pipeline.store().load_scrape(DEAD_URL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rerun_reproduces_artifacts() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        pipeline.run(GOOD_URL).await.unwrap();
        let first = snapshot(&dir);
        pipeline.run(GOOD_URL).await.unwrap();
        let second = snapshot(&dir);

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_stages_run_from_disk() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);

        let err = pipeline.classify(GOOD_URL).await.unwrap_err();
        assert!(matches!(err, PipelineError::Artifact(_)));

        pipeline.scrape(GOOD_URL).await.unwrap();
        pipeline.fact_check(GOOD_URL).await.unwrap();
        pipeline.classify(GOOD_URL).await.unwrap();

        let summary = pipeline.aggregate_from_artifacts(GOOD_URL).await.unwrap();
        assert!(!summary.summary.is_empty());
        assert_eq!(summary.missing, vec![ArtifactKind::ImageEvaluation]);
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_at_use() {
        let dir = TempDir::new().unwrap();
        let config = Config::default().with_output_dir(dir.path());
        let pipeline = Pipeline::from_config(&config).unwrap();

        let evidence = Evidence {
            url: GOOD_URL.to_string(),
            classification: Some(Classification::from_probabilities(
                GOOD_URL,
                Probabilities { fake: 0.1, real: 0.9 },
                "preview".to_string(),
            )),
            ..Evidence::default()
        };
        let err = pipeline.summarize(&evidence).await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(_)));
    }

    fn keyless_pipeline(dir: &TempDir, page: &str) -> Pipeline {
        let config = Config::default().with_output_dir(dir.path());
        assert!(config.serpapi_key.is_none());

        let mut pages = HashMap::new();
        pages.insert(GOOD_URL.to_string(), page.to_string());
        Pipeline::from_config(&config)
            .unwrap()
            .with_scraper(Scraper::new(Box::new(MapFetcher(pages))))
    }

    #[tokio::test]
    async fn test_image_stage_needs_no_key_without_images() {
        let dir = TempDir::new().unwrap();
        let pipeline = keyless_pipeline(&dir, PLAIN_PAGE);

        let record = pipeline.scrape(GOOD_URL).await.unwrap();
        assert!(record.images.is_empty());

        let evaluation = pipeline.evaluate_images(GOOD_URL).await.unwrap();
        assert_eq!(evaluation.url, GOOD_URL);
        assert!(evaluation.images.is_empty());
        assert!(pipeline.store().load_image_evaluation(GOOD_URL).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_image_stage_without_key_fails_with_auth() {
        let dir = TempDir::new().unwrap();
        let pipeline = keyless_pipeline(&dir, PAGE);

        let record = pipeline.scrape(GOOD_URL).await.unwrap();
        assert_eq!(record.images.len(), 1);

        let err = pipeline.evaluate_images(GOOD_URL).await.unwrap_err();
        assert!(matches!(err, PipelineError::Auth(ref m) if m.contains("SERPAPI_KEY")));
        assert!(pipeline.store().load_image_evaluation(GOOD_URL).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_reports_stages_in_order() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let pipeline = pipeline(&dir).with_progress(move |event| {
            if let StageEvent::Started { stage, .. } = event {
                sink.lock().unwrap().push(*stage);
            }
        });

        pipeline.run(GOOD_URL).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Stage::ALL.to_vec());

        let numbers: Vec<usize> = Stage::ALL.iter().map(|s| s.number()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_batch_reports_failures() {
        let dir = TempDir::new().unwrap();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let pipeline = pipeline(&dir).with_progress(move |event| {
            if let StageEvent::Failed { url, error } = event {
                sink.lock().unwrap().push((url.to_string(), error.kind()));
            }
        });

        pipeline.run_batch(&[DEAD_URL.to_string()]).await;
        assert_eq!(
            *failures.lock().unwrap(),
            vec![(DEAD_URL.to_string(), "network")]
        );
    }
}
