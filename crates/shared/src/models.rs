use serde::{Deserialize, Serialize};

/// An image kept from the article body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleImage {
    pub src: String,
    pub alt: String,
    /// Caption or surrounding text, at most 200 characters
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAnalysis {
    pub domain: String,
    pub trust_score: f64,
    pub category: String,
    pub risk_factors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredibilitySignals {
    pub domain_analysis: DomainAnalysis,
    pub source_type: String,
    pub reputation_score: f64,
    pub overall_score: f64,
    pub risk_factors: Vec<String>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeStats {
    pub blocks: usize,
    pub chars: usize,
    pub images: usize,
}

/// Output of the scraper, keyed by the URL exactly as it was requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRecord {
    pub url: String,
    pub title: String,
    pub text: String,
    pub images: Vec<ArticleImage>,
    pub credibility: CredibilitySignals,
    pub stats: ScrapeStats,
}

impl ScrapeRecord {
    pub fn image_urls(&self) -> Vec<String> {
        self.images.iter().map(|img| img.src.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Supported,
    Neutral,
    Refuted,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub similarity: Option<f64>,
    pub reference_title: Option<String>,
    pub reference_url: Option<String>,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactCheckStats {
    pub total_claims: usize,
    pub supported: usize,
    pub neutral: usize,
    pub refuted: usize,
    pub unverified: usize,
    pub average_confidence: f64,
    pub reliability_score: f64,
}

impl FactCheckStats {
    pub fn from_claims(claims: &[ClaimCheck]) -> Self {
        let total = claims.len();
        let count = |v: Verdict| claims.iter().filter(|c| c.verdict == v).count();
        let supported = count(Verdict::Supported);

        let (average_confidence, reliability_score) = if total > 0 {
            (
                claims.iter().map(|c| c.confidence).sum::<f64>() / total as f64,
                supported as f64 / total as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            total_claims: total,
            supported,
            neutral: count(Verdict::Neutral),
            refuted: count(Verdict::Refuted),
            unverified: count(Verdict::Unverified),
            average_confidence,
            reliability_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckReport {
    pub url: String,
    pub claims: Vec<ClaimCheck>,
    pub statistics: FactCheckStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Real,
    Fake,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub fake: f64,
    pub real: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub url: String,
    pub label: Label,
    pub confidence: f64,
    pub probabilities: Probabilities,
    pub text_preview: String,
}

impl Classification {
    /// Pick the label with the higher probability. Ties go to REAL.
    pub fn from_probabilities(url: &str, probabilities: Probabilities, text_preview: String) -> Self {
        let (label, confidence) = if probabilities.fake > probabilities.real {
            (Label::Fake, probabilities.fake)
        } else {
            (Label::Real, probabilities.real)
        };
        Self {
            url: url.to_string(),
            label,
            confidence,
            probabilities,
            text_preview,
        }
    }
}

/// One reverse-image-search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    pub position: Option<u32>,
    pub title: Option<String>,
    pub link: String,
    pub source: Option<String>,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageVerdict {
    LikelyAuthentic,
    Uncertain,
    NoMatches,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFinding {
    pub image_url: String,
    pub verdict: ImageVerdict,
    pub credibility_score: Option<f64>,
    pub evidence_urls: Vec<String>,
    pub matches: Vec<ImageMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEvaluation {
    pub url: String,
    pub images: Vec<ImageFinding>,
}

impl ImageEvaluation {
    pub fn failed_count(&self) -> usize {
        self.images
            .iter()
            .filter(|img| img.verdict == ImageVerdict::Error)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidityVerdict {
    Real,
    Fake,
    Mixed,
    Unknown,
}

impl ValidityVerdict {
    /// Read the verdict out of a model's free-text answer.
    ///
    /// A `Verdict: ...` line wins. Otherwise the first REAL/FAKE/MIXED word
    /// that is not negated ("not fake") is taken.
    pub fn parse_from(text: &str) -> Self {
        let labelled = text.lines().find_map(|line| {
            let line = line.trim().trim_start_matches(|c: char| c == '*' || c == '#' || c.is_whitespace());
            let (head, rest) = line.split_once(':')?;
            let head = head.trim_matches(|c: char| c == '*' || c.is_whitespace());
            head.eq_ignore_ascii_case("verdict").then(|| Self::scan(rest))
        });

        match labelled {
            Some(verdict) if verdict != ValidityVerdict::Unknown => verdict,
            _ => Self::scan(text),
        }
    }

    fn scan(text: &str) -> Self {
        let upper = text.to_uppercase();
        let words: Vec<&str> = upper
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        for (i, word) in words.iter().enumerate() {
            let verdict = match *word {
                "MIXED" => ValidityVerdict::Mixed,
                "FAKE" => ValidityVerdict::Fake,
                "REAL" => ValidityVerdict::Real,
                _ => continue,
            };
            let negated = words[i.saturating_sub(3)..i]
                .iter()
                .any(|w| NEGATIONS.contains(w));
            if !negated {
                return verdict;
            }
        }
        ValidityVerdict::Unknown
    }
}

const NEGATIONS: &[&str] = &["NOT", "NO", "NEITHER", "NOR", "ISN", "NEVER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Scrape,
    FactCheck,
    Classification,
    ImageEvaluation,
}

/// Final verdict for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValiditySummary {
    pub url: String,
    pub verdict: ValidityVerdict,
    pub summary: String,
    pub missing: Vec<ArtifactKind>,
}

/// Persisted shape of one entry in the summary artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryEntry {
    Summary {
        summary: String,
        verdict: ValidityVerdict,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<ArtifactKind>,
    },
    Error {
        error: String,
    },
}

impl From<&ValiditySummary> for SummaryEntry {
    fn from(summary: &ValiditySummary) -> Self {
        SummaryEntry::Summary {
            summary: summary.summary.clone(),
            verdict: summary.verdict,
            missing: summary.missing.clone(),
        }
    }
}
