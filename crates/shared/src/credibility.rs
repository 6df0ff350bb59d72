use url::Url;

use crate::models::{CredibilitySignals, DomainAnalysis};

const TRUSTED_DOMAINS: &[&str] = &[
    "bbc.com",
    "bbc.co.uk",
    "reuters.com",
    "apnews.com",
    "ap.org",
    "npr.org",
    "cnn.com",
    "channelnewsasia.com",
    "straitstimes.com",
    "theguardian.com",
    "nytimes.com",
    "wikipedia.org",
    "nature.com",
    "science.org",
    "nejm.org",
];

const WIRE_SERVICES: &[&str] = &["bbc.com", "bbc.co.uk", "reuters.com", "apnews.com", "ap.org"];
const BLOG_PLATFORMS: &[&str] = &["medium.com", "substack.com", "blogspot.com", "wordpress.com"];
const SOCIAL_PLATFORMS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "tiktok.com",
    "reddit.com",
];
const FREE_TLDS: &[&str] = &[".tk", ".ml", ".ga", ".cf", ".gq"];
const CLICKBAIT_WORDS: &[&str] = &["fake", "clickbait", "buzz", "viral"];
const REGIONAL_TLDS: &[&str] = &[".sg", ".my", ".au", ".uk", ".ca"];

/// Domains that count as independent, reputable corroboration.
pub fn is_reputable_domain(domain: &str) -> bool {
    let domain = domain.to_lowercase();
    TRUSTED_DOMAINS.iter().any(|d| domain_matches(&domain, d))
        || domain.ends_with(".gov")
        || domain.ends_with(".edu")
        || domain.contains(".gov.")
}

/// Host of `url` in lower case, without a leading `www.`.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn domain_matches(domain: &str, suffix: &str) -> bool {
    domain == suffix || domain.ends_with(&format!(".{}", suffix))
}

fn any_match(domain: &str, list: &[&str]) -> bool {
    list.iter().any(|d| domain_matches(domain, d))
}

/// Score the source domain of `url`. Pure heuristics, no network access.
pub fn assess(url: &str) -> CredibilitySignals {
    let domain_analysis = analyze_domain(url);
    let (source_type, reputation_score, warning) = reputation_prior(&domain_analysis.domain);

    let overall = reputation_score * 0.6 + domain_analysis.trust_score * 0.4;
    let overall_score = (overall * 100.0).round() / 100.0;

    let mut risk_factors = domain_analysis.risk_factors.clone();
    if let Some(w) = warning {
        risk_factors.push(w.to_string());
    }

    let notes = describe(overall_score, source_type, &risk_factors);

    CredibilitySignals {
        domain_analysis,
        source_type: source_type.to_string(),
        reputation_score,
        overall_score,
        risk_factors,
        notes,
    }
}

fn analyze_domain(url: &str) -> DomainAnalysis {
    let domain = host_of(url).unwrap_or_default();
    let mut trust_score: f64 = 0.5;
    let mut risk_factors = Vec::new();

    if any_match(&domain, TRUSTED_DOMAINS) {
        trust_score += 0.3;
    }

    let looks_ip = domain.split('.').count() == 4
        && domain.split('.').all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    let long_number = domain
        .split(|c: char| !c.is_ascii_digit())
        .any(|run| run.len() >= 4);
    let suspicious = FREE_TLDS.iter().any(|tld| domain.ends_with(tld))
        || CLICKBAIT_WORDS.iter().any(|w| domain.contains(w))
        || long_number
        || looks_ip;
    if suspicious {
        trust_score -= 0.2;
        risk_factors.push("Suspicious domain pattern detected".to_string());
    }

    if url.starts_with("https://") {
        trust_score += 0.1;
    } else {
        risk_factors.push("No HTTPS encryption".to_string());
    }

    if [".org", ".edu", ".gov"].iter().any(|tld| domain.contains(tld)) {
        trust_score += 0.1;
    }

    if REGIONAL_TLDS.iter().any(|tld| domain.ends_with(tld)) {
        trust_score += 0.05;
    }

    DomainAnalysis {
        category: categorize(&domain).to_string(),
        domain,
        trust_score: trust_score.clamp(0.0, 1.0),
        risk_factors,
    }
}

fn categorize(domain: &str) -> &'static str {
    if [".gov", ".edu"].iter().any(|tld| domain.contains(tld)) {
        "institutional"
    } else if ["news", "times", "post", "herald", "guardian"]
        .iter()
        .any(|w| domain.contains(w))
    {
        "news_media"
    } else if any_match(domain, BLOG_PLATFORMS) {
        "blog_platform"
    } else if any_match(domain, SOCIAL_PLATFORMS) {
        "social_media"
    } else if domain.matches('.').count() > 2 {
        "subdomain"
    } else {
        "general"
    }
}

/// Category prior: (source type, score, warning).
fn reputation_prior(domain: &str) -> (&'static str, f64, Option<&'static str>) {
    if any_match(domain, WIRE_SERVICES)
        || any_match(domain, &["channelnewsasia.com", "straitstimes.com"])
    {
        ("mainstream_media", 0.9, None)
    } else if [".gov", ".edu"].iter().any(|tld| domain.contains(tld)) {
        ("institutional", 0.85, None)
    } else if any_match(domain, TRUSTED_DOMAINS) {
        ("established_outlet", 0.8, None)
    } else if any_match(domain, BLOG_PLATFORMS) {
        (
            "blog_platform",
            0.6,
            Some("Individual blog - verify claims independently"),
        )
    } else if any_match(domain, SOCIAL_PLATFORMS) {
        (
            "social_media",
            0.4,
            Some("Social media content - verify independently"),
        )
    } else {
        ("unknown", 0.5, Some("Source credibility not established"))
    }
}

fn describe(score: f64, source_type: &str, risk_factors: &[String]) -> String {
    let level = if score >= 0.8 {
        "High credibility"
    } else if score >= 0.6 {
        "Moderate credibility"
    } else if score >= 0.4 {
        "Low credibility"
    } else {
        "Very low credibility"
    };

    let mut notes = format!("{} source (score: {:.2}/1.0). Source type: {}.", level, score, source_type);
    if !risk_factors.is_empty() {
        let top: Vec<&str> = risk_factors.iter().take(2).map(|s| s.as_str()).collect();
        notes.push_str(&format!(" Risk factors: {}.", top.join("; ")));
    }
    notes
}
