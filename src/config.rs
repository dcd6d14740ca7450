use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use url::Url;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// Settings for one process. Never mutated in place: credential updates
/// produce a new value via [`Config::with_api_keys`].
#[derive(Clone)]
pub struct Config {
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub arxiv_api_url: Url,
    pub arxiv_delay: Duration,
    pub arxiv_max_start_offset: usize,
    pub arxiv_browse_start_offset: usize,
    pub papers_per_fetch: usize,
    pub fetch_concurrency: usize,
    pub filter_batch_size: usize,
    pub top_results: usize,
    pub llm_timeout: Duration,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub gemini_configured: bool,
    pub openai_configured: bool,
    pub all_configured: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            openai_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            arxiv_api_url: Url::parse(DEFAULT_ARXIV_API_URL).expect("valid default arXiv URL"),
            arxiv_delay: Duration::from_millis(1000),
            arxiv_max_start_offset: 0,
            arxiv_browse_start_offset: 50,
            papers_per_fetch: 10,
            fetch_concurrency: 4,
            filter_batch_size: 5,
            top_results: 10,
            llm_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset or blank values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let arxiv_api_url = match get("ARXIV_API_URL") {
            Some(raw) => Url::parse(&raw).with_context(|| format!("invalid ARXIV_API_URL {raw:?}"))?,
            None => defaults.arxiv_api_url,
        };

        Ok(Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_api_base: get("GEMINI_API_BASE").unwrap_or(defaults.gemini_api_base),
            arxiv_api_url,
            arxiv_delay: Duration::from_millis(positive(parse_or(get("ARXIV_DELAY_MS"), "ARXIV_DELAY_MS", 1000u64)?, "ARXIV_DELAY_MS")?),
            arxiv_max_start_offset: parse_or(get("ARXIV_MAX_START_OFFSET"), "ARXIV_MAX_START_OFFSET", 0)?,
            arxiv_browse_start_offset: parse_or(get("ARXIV_BROWSE_START_OFFSET"), "ARXIV_BROWSE_START_OFFSET", 50)?,
            papers_per_fetch: positive(parse_or(get("PAPERS_PER_FETCH"), "PAPERS_PER_FETCH", 10)?, "PAPERS_PER_FETCH")?,
            fetch_concurrency: positive(parse_or(get("FETCH_CONCURRENCY"), "FETCH_CONCURRENCY", 4)?, "FETCH_CONCURRENCY")?,
            filter_batch_size: positive(parse_or(get("FILTER_BATCH_SIZE"), "FILTER_BATCH_SIZE", 5)?, "FILTER_BATCH_SIZE")?,
            top_results: positive(parse_or(get("TOP_RESULTS"), "TOP_RESULTS", 10)?, "TOP_RESULTS")?,
            llm_timeout: Duration::from_secs(parse_or(get("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", 60)?),
            http_timeout: Duration::from_secs(parse_or(get("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS", 30)?),
        })
    }

    /// Returns a copy with new credentials; blank keys count as unset.
    pub fn with_api_keys(&self, gemini: Option<String>, openai: Option<String>) -> Self {
        let clean = |key: Option<String>| key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());
        Self {
            gemini_api_key: clean(gemini),
            openai_api_key: clean(openai),
            ..self.clone()
        }
    }

    pub fn key_status(&self) -> KeyStatus {
        let gemini_configured = self.gemini_api_key.is_some();
        let openai_configured = self.openai_api_key.is_some();
        KeyStatus {
            gemini_configured,
            openai_configured,
            all_configured: gemini_configured && openai_configured,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("gemini_model", &self.gemini_model)
            .field("gemini_api_base", &self.gemini_api_base)
            .field("arxiv_api_url", &self.arxiv_api_url.as_str())
            .field("arxiv_delay", &self.arxiv_delay)
            .field("arxiv_max_start_offset", &self.arxiv_max_start_offset)
            .field("arxiv_browse_start_offset", &self.arxiv_browse_start_offset)
            .field("papers_per_fetch", &self.papers_per_fetch)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("filter_batch_size", &self.filter_batch_size)
            .field("top_results", &self.top_results)
            .field("llm_timeout", &self.llm_timeout)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, name: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value.parse().map_err(|_| anyhow!("invalid {name}={value:?} (expected a number)")),
        None => Ok(default),
    }
}

fn positive<T: PartialOrd + From<u8>>(value: T, name: &str) -> Result<T> {
    if value < T::from(1) {
        return Err(anyhow!("{name} must be at least 1"));
    }
    Ok(value)
}
