use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::layers::Paper;

/// Abstracts longer than this are cut before going into a prompt.
pub const MAX_PROMPT_ABSTRACT_CHARS: usize = 1500;

/// Free-form text completion. Output is untrusted and may ignore any format
/// the prompt asks for.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;

    /// Whether a credential is present. Callers may skip the call entirely
    /// when this is false.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Runs one completion under `limit`; a timeout is reported as an error.
pub async fn complete_within<L: LanguageModel>(model: &L, prompt: &str, limit: Duration) -> Result<String> {
    match tokio::time::timeout(limit, model.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("LLM call timed out after {:?}", limit)),
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

pub struct GeminiClient {
    client: Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(api_base: impl Into<String>, model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            temperature: 0.2,
        })
    }
}

impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let Some(key) = &self.api_key else {
            bail!("Gemini API key not configured");
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.api_base,
            urlencoding::encode(&self.model),
            urlencoding::encode(key)
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        });

        tracing::debug!("Querying Gemini model {} ({} prompt chars)", self.model, prompt.len());
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("Gemini API error: {}", resp.status()));
        }
        let parsed: GenerateResponse = resp.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(anyhow!("Gemini returned no text"));
        }
        Ok(text)
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

static PAPER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*#_-]*paper\s*#?\s*(\d+)\s*[*_]*\s*[:.)][ \t*_]*(.*?)\s*$").expect("valid paper line pattern")
});

/// Extracts `PAPER <n>: <text>` lines, keyed by the 1-based index.
///
/// Markdown decoration around the label is tolerated. When an index repeats,
/// the first occurrence wins.
pub fn parse_paper_lines(response: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for caps in PAPER_LINE.captures_iter(response) {
        let Ok(index) = caps[1].parse::<usize>() else {
            continue;
        };
        if lines.iter().any(|(seen, _)| *seen == index) {
            continue;
        }
        lines.push((index, caps[2].trim().to_string()));
    }
    lines
}

/// Enumerates papers as `PAPER <n>` blocks for a prompt, starting at 1.
pub fn paper_listing(papers: &[Paper]) -> String {
    let mut out = String::new();
    for (i, paper) in papers.iter().enumerate() {
        out.push_str(&format!(
            "PAPER {}:\nTitle: {}\nAbstract: {}\n\n",
            i + 1,
            paper.title,
            truncate_chars(&paper.abstract_text, MAX_PROMPT_ABSTRACT_CHARS)
        ));
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
