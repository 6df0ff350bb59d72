use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_AWS_REGION: &str = "us-east-1";
pub const DEFAULT_BEDROCK_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";
pub const DEFAULT_CLASSIFIER_MODEL: &str = "jy46604790/Fake-News-Bert-Detect";
pub const DEFAULT_HF_INFERENCE_URL: &str = "https://router.huggingface.co/hf-inference/models";
pub const DEFAULT_WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";
pub const DEFAULT_SERPAPI_URL: &str = "https://serpapi.com/search.json";

/// Which hosted service answers the aggregation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Anthropic Messages API, keyed by `ANTHROPIC_API_KEY`
    #[default]
    Anthropic,
    /// AWS Bedrock in `AWS_REGION`, credentials from the AWS provider chain
    Bedrock,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(LlmProvider::Anthropic),
            "bedrock" => Ok(LlmProvider::Bedrock),
            other => Err(format!("unknown provider {:?}, expected anthropic or bedrock", other)),
        }
    }
}

/// Score bands for turning a claim/page similarity into a verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactCheckThresholds {
    pub supported: f64,
    pub neutral: f64,
    pub max_claims: usize,
}

impl Default for FactCheckThresholds {
    fn default() -> Self {
        Self {
            supported: 0.30,
            neutral: 0.15,
            max_claims: 12,
        }
    }
}

/// Everything the pipeline needs from the outside world, resolved once.
///
/// Credentials are optional here: a stage that needs a missing key fails when
/// it is invoked, not when the config is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub llm_provider: LlmProvider,
    pub aws_region: String,
    pub bedrock_model_id: String,
    pub serpapi_key: Option<String>,
    pub serpapi_url: String,
    pub hf_api_token: Option<String>,
    pub classifier_model: String,
    pub hf_inference_url: String,
    pub classifier_weights: Option<PathBuf>,
    pub wikipedia_api_url: String,
    pub output_dir: PathBuf,
    pub retry: RetryPolicy,
    pub fact_check: FactCheckThresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            anthropic_model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            llm_provider: LlmProvider::default(),
            aws_region: DEFAULT_AWS_REGION.to_string(),
            bedrock_model_id: DEFAULT_BEDROCK_MODEL_ID.to_string(),
            serpapi_key: None,
            serpapi_url: DEFAULT_SERPAPI_URL.to_string(),
            hf_api_token: None,
            classifier_model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            hf_inference_url: DEFAULT_HF_INFERENCE_URL.to_string(),
            classifier_weights: None,
            wikipedia_api_url: DEFAULT_WIKIPEDIA_API_URL.to_string(),
            output_dir: PathBuf::from("."),
            retry: RetryPolicy::default(),
            fact_check: FactCheckThresholds::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` is this over
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();
        let default_retry = defaults.retry;
        let default_fact = defaults.fact_check;

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", default_retry.max_attempts)?.max(1),
            base_delay: Duration::from_millis(parse_or(
                &get,
                "RETRY_BASE_DELAY_MS",
                default_retry.base_delay.as_millis() as u64,
            )?),
            multiplier: finite("RETRY_MULTIPLIER", parse_or(&get, "RETRY_MULTIPLIER", default_retry.multiplier)?)?,
            max_jitter: Duration::from_millis(parse_or(
                &get,
                "RETRY_MAX_JITTER_MS",
                default_retry.max_jitter.as_millis() as u64,
            )?),
        };

        if retry.multiplier < 1.0 {
            return Err(PipelineError::Config(format!(
                "RETRY_MULTIPLIER must be at least 1.0, got {}",
                retry.multiplier
            )));
        }

        let fact_check = FactCheckThresholds {
            supported: fraction(
                "FACT_SUPPORT_THRESHOLD",
                parse_or(&get, "FACT_SUPPORT_THRESHOLD", default_fact.supported)?,
            )?,
            neutral: fraction(
                "FACT_NEUTRAL_THRESHOLD",
                parse_or(&get, "FACT_NEUTRAL_THRESHOLD", default_fact.neutral)?,
            )?,
            max_claims: parse_or(&get, "FACT_MAX_CLAIMS", default_fact.max_claims)?,
        };

        if fact_check.neutral > fact_check.supported {
            return Err(PipelineError::Config(
                "FACT_NEUTRAL_THRESHOLD must not exceed FACT_SUPPORT_THRESHOLD".to_string(),
            ));
        }

        Ok(Self {
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_model: get("ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            anthropic_base_url: get("ANTHROPIC_BASE_URL").unwrap_or(defaults.anthropic_base_url),
            llm_provider: parse_or(&get, "LLM_PROVIDER", defaults.llm_provider)?,
            aws_region: get("AWS_REGION")
                .or_else(|| get("AWS_DEFAULT_REGION"))
                .unwrap_or(defaults.aws_region),
            bedrock_model_id: get("BEDROCK_MODEL_ID").unwrap_or(defaults.bedrock_model_id),
            serpapi_key: get("SERPAPI_KEY"),
            serpapi_url: get("SERPAPI_URL").unwrap_or(defaults.serpapi_url),
            hf_api_token: get("HF_API_TOKEN"),
            classifier_model: get("CLASSIFIER_MODEL").unwrap_or(defaults.classifier_model),
            hf_inference_url: get("HF_INFERENCE_URL").unwrap_or(defaults.hf_inference_url),
            classifier_weights: get("CLASSIFIER_WEIGHTS").map(PathBuf::from),
            wikipedia_api_url: get("WIKIPEDIA_API_URL").unwrap_or(defaults.wikipedia_api_url),
            output_dir: get("CHECK_NEWS_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            retry,
            fact_check,
        })
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/check-news/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("check-news").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| PipelineError::Config(format!("{} has invalid value {:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

/// `f64::from_str` accepts "NaN" and "inf"; neither is a usable setting.
fn finite(key: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PipelineError::Config(format!("{} must be a finite number, got {}", key, value)))
    }
}

fn fraction(key: &str, value: f64) -> Result<f64> {
    let value = finite(key, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(PipelineError::Config(format!("{} must be between 0 and 1, got {}", key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(config.anthropic_api_key.is_none());
        assert!(config.serpapi_key.is_none());
        assert_eq!(config.anthropic_model, DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(config.fact_check, FactCheckThresholds::default());
        assert_eq!(config.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("SERPAPI_KEY", "serp"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("RETRY_BASE_DELAY_MS", "10"),
            ("FACT_SUPPORT_THRESHOLD", "0.5"),
            ("CHECK_NEWS_OUTPUT_DIR", "/tmp/out"),
        ]))
        .unwrap();

        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.serpapi_key.as_deref(), Some("serp"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.fact_check.supported, 0.5);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let config = Config::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "   ")])).unwrap();
        assert!(config.anthropic_api_key.is_none());
    }

    #[test]
    fn test_malformed_number_is_config_error() {
        let err = Config::from_lookup(lookup(&[("RETRY_MAX_ATTEMPTS", "lots")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        let config = Config::from_lookup(lookup(&[("RETRY_MAX_ATTEMPTS", "0")])).unwrap();
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("FACT_SUPPORT_THRESHOLD", "0.1"),
            ("FACT_NEUTRAL_THRESHOLD", "0.2"),
        ]))
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for (key, value) in [
            ("RETRY_MULTIPLIER", "NaN"),
            ("RETRY_MULTIPLIER", "inf"),
            ("FACT_SUPPORT_THRESHOLD", "NaN"),
            ("FACT_NEUTRAL_THRESHOLD", "-inf"),
        ] {
            let err = Config::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(matches!(err, PipelineError::Config(ref m) if m.contains(key)), "{}={}", key, value);
        }
    }

    #[test]
    fn test_threshold_outside_unit_range_rejected() {
        let err = Config::from_lookup(lookup(&[("FACT_SUPPORT_THRESHOLD", "1.5")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_bedrock_provider_and_region() {
        let defaults = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(defaults.llm_provider, LlmProvider::Anthropic);
        assert_eq!(defaults.aws_region, DEFAULT_AWS_REGION);

        let config = Config::from_lookup(lookup(&[
            ("LLM_PROVIDER", "Bedrock"),
            ("AWS_REGION", "eu-west-1"),
            ("BEDROCK_MODEL_ID", "anthropic.claude-3-5-sonnet-20240620-v1:0"),
        ]))
        .unwrap();
        assert_eq!(config.llm_provider, LlmProvider::Bedrock);
        assert_eq!(config.aws_region, "eu-west-1");
        assert_eq!(config.bedrock_model_id, "anthropic.claude-3-5-sonnet-20240620-v1:0");

        let fallback = Config::from_lookup(lookup(&[("AWS_DEFAULT_REGION", "ap-south-1")])).unwrap();
        assert_eq!(fallback.aws_region, "ap-south-1");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = Config::from_lookup(lookup(&[("LLM_PROVIDER", "openai")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
