use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{
    ArtifactKind, Classification, FactCheckReport, ImageEvaluation, ScrapeRecord, SummaryEntry,
};

pub const SCRAPE_FILE: &str = "scraper_output.json";
pub const IMAGE_LIST_FILE: &str = "scraper_images.json";
pub const FACT_CHECK_FILE: &str = "wiki_fact_check_results.json";
pub const CLASSIFICATION_FILE: &str = "fake_news_analysis.json";
pub const IMAGE_EVALUATION_FILE: &str = "scraper_images_evaluation.json";
pub const SUMMARY_FILE: &str = "news_validity_summary.json";

/// URL-keyed JSON files in one output directory.
///
/// Every keyed artifact is a JSON object of source URL to entry. Maps are
/// sorted so re-running on the same input reproduces the same file layout.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn save_scrape(&self, record: &ScrapeRecord) -> Result<PathBuf> {
        let path = self.upsert(SCRAPE_FILE, &record.url, record)?;
        self.merge_image_list(&record.image_urls())?;
        Ok(path)
    }

    pub fn save_fact_check(&self, report: &FactCheckReport) -> Result<PathBuf> {
        self.upsert(FACT_CHECK_FILE, &report.url, report)
    }

    pub fn save_classification(&self, classification: &Classification) -> Result<PathBuf> {
        self.upsert(CLASSIFICATION_FILE, &classification.url, classification)
    }

    pub fn save_image_evaluation(&self, evaluation: &ImageEvaluation) -> Result<PathBuf> {
        self.upsert(IMAGE_EVALUATION_FILE, &evaluation.url, evaluation)
    }

    pub fn save_summary(&self, url: &str, entry: &SummaryEntry) -> Result<PathBuf> {
        self.upsert(SUMMARY_FILE, url, entry)
    }

    pub fn scrapes(&self) -> Result<BTreeMap<String, ScrapeRecord>> {
        self.load_map(SCRAPE_FILE)
    }

    pub fn load_scrape(&self, url: &str) -> Result<Option<ScrapeRecord>> {
        self.load_entry(SCRAPE_FILE, url)
    }

    pub fn load_fact_check(&self, url: &str) -> Result<Option<FactCheckReport>> {
        self.load_entry(FACT_CHECK_FILE, url)
    }

    pub fn load_classification(&self, url: &str) -> Result<Option<Classification>> {
        self.load_entry(CLASSIFICATION_FILE, url)
    }

    pub fn load_image_evaluation(&self, url: &str) -> Result<Option<ImageEvaluation>> {
        self.load_entry(IMAGE_EVALUATION_FILE, url)
    }

    pub fn summaries(&self) -> Result<BTreeMap<String, SummaryEntry>> {
        self.load_map(SUMMARY_FILE)
    }

    /// The flat, de-duplicated list of every image URL scraped so far.
    pub fn image_list(&self) -> Result<Vec<String>> {
        let path = self.path(IMAGE_LIST_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    /// Which upstream artifacts have an entry for `url`.
    pub fn available(&self, url: &str) -> Result<Vec<ArtifactKind>> {
        let mut kinds = Vec::new();
        if self.load_scrape(url)?.is_some() {
            kinds.push(ArtifactKind::Scrape);
        }
        if self.load_fact_check(url)?.is_some() {
            kinds.push(ArtifactKind::FactCheck);
        }
        if self.load_classification(url)?.is_some() {
            kinds.push(ArtifactKind::Classification);
        }
        if self.load_image_evaluation(url)?.is_some() {
            kinds.push(ArtifactKind::ImageEvaluation);
        }
        Ok(kinds)
    }

    fn merge_image_list(&self, urls: &[String]) -> Result<PathBuf> {
        let mut all: BTreeSet<String> = self.image_list()?.into_iter().collect();
        all.extend(urls.iter().cloned());
        let list: Vec<String> = all.into_iter().collect();

        let path = self.path(IMAGE_LIST_FILE);
        write_json(&path, &list)?;
        Ok(path)
    }

    fn load_map<T: DeserializeOwned>(&self, file: &str) -> Result<BTreeMap<String, T>> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        read_json(&path)
    }

    fn load_entry<T: DeserializeOwned>(&self, file: &str, url: &str) -> Result<Option<T>> {
        let mut map: BTreeMap<String, T> = self.load_map(file)?;
        Ok(map.remove(url))
    }

    /// Replace the entry for `url`, leaving every other URL's entry untouched.
    fn upsert<T: Serialize>(&self, file: &str, url: &str, entry: &T) -> Result<PathBuf> {
        let path = self.path(file);
        let mut map: BTreeMap<String, serde_json::Value> = if path.exists() {
            read_json(&path)?
        } else {
            BTreeMap::new()
        };

        map.insert(url.to_string(), serde_json::to_value(entry)?);
        write_json(&path, &map)?;

        debug!(file, url, "Artifact written");
        Ok(path)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        PipelineError::Artifact(format!("Failed to read {}: {}", path.display(), e))
    })?;

    serde_json::from_str(&content).map_err(|e| {
        PipelineError::Artifact(format!(
            "Failed to parse {}. The file may be corrupted: {}",
            path.display(),
            e
        ))
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|e| {
        PipelineError::Artifact(format!("Failed to write {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ArticleImage, CredibilitySignals, DomainAnalysis, Label, Probabilities, ScrapeStats,
        ValidityVerdict,
    };

    fn record(url: &str, images: &[&str]) -> ScrapeRecord {
        ScrapeRecord {
            url: url.to_string(),
            title: "Title".to_string(),
            text: "Body text".to_string(),
            images: images
                .iter()
                .map(|src| ArticleImage {
                    src: src.to_string(),
                    alt: String::new(),
                    context: String::new(),
                })
                .collect(),
            credibility: CredibilitySignals {
                domain_analysis: DomainAnalysis {
                    domain: "example.com".to_string(),
                    trust_score: 0.6,
                    category: "general".to_string(),
                    risk_factors: Vec::new(),
                },
                source_type: "unknown".to_string(),
                reputation_score: 0.5,
                overall_score: 0.54,
                risk_factors: Vec::new(),
                notes: String::new(),
            },
            stats: ScrapeStats {
                blocks: 1,
                chars: 9,
                images: images.len(),
            },
        }
    }

    #[test]
    fn test_scrape_is_keyed_by_exact_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let url = "https://Example.com/News/Story?id=1&ref=home";

        store.save_scrape(&record(url, &[])).unwrap();

        let map = store.scrapes().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec![url]);
        assert_eq!(store.load_scrape(url).unwrap().unwrap().url, url);
        assert!(store.load_scrape("https://example.com/News/Story?id=1&ref=home").unwrap().is_none());
    }

    #[test]
    fn test_upsert_keeps_other_urls() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.save_scrape(&record("https://a.example/1", &["https://a.example/x.jpg"])).unwrap();
        store.save_scrape(&record("https://b.example/2", &["https://b.example/y.jpg"])).unwrap();
        store.save_scrape(&record("https://a.example/1", &["https://a.example/x.jpg"])).unwrap();

        assert_eq!(store.scrapes().unwrap().len(), 2);
        assert_eq!(
            store.image_list().unwrap(),
            vec!["https://a.example/x.jpg", "https://b.example/y.jpg"]
        );
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let classification = Classification {
            url: "https://a.example/1".to_string(),
            label: Label::Real,
            confidence: 0.9,
            probabilities: Probabilities { fake: 0.1, real: 0.9 },
            text_preview: "preview".to_string(),
        };

        let path = store.save_classification(&classification).unwrap();
        let first = fs::read(&path).unwrap();
        store.save_classification(&classification).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.scrapes().unwrap().is_empty());
        assert!(store.image_list().unwrap().is_empty());
        assert!(store.load_fact_check("https://a.example/1").unwrap().is_none());
        assert!(store.available("https://a.example/1").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        fs::write(store.path(CLASSIFICATION_FILE), "{not json").unwrap();

        let err = store.load_classification("https://a.example/1").unwrap_err();
        assert!(matches!(err, PipelineError::Artifact(_)));
    }

    #[test]
    fn test_summary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .save_summary(
                "https://a.example/1",
                &SummaryEntry::Summary {
                    summary: "Likely REAL".to_string(),
                    verdict: ValidityVerdict::Real,
                    missing: Vec::new(),
                },
            )
            .unwrap();
        store
            .save_summary(
                "https://b.example/2",
                &SummaryEntry::Error {
                    error: "Network error: refused".to_string(),
                },
            )
            .unwrap();

        let summaries = store.summaries().unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(matches!(
            summaries.get("https://b.example/2"),
            Some(SummaryEntry::Error { .. })
        ));
    }
}
