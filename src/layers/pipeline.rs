use std::time::Duration;

use anyhow::{bail, Result};
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::config::Config;
use crate::layers::aggregation::AggregatingFetcher;
use crate::layers::classification::{Classification, QueryClassifier};
use crate::layers::discovery::{ArxivClient, PaperSource};
use crate::layers::filtering::{FilterOutcome, RelevanceFilter};
use crate::layers::llm::{complete_within, GeminiClient, LanguageModel};
use crate::layers::ranking::RelevanceRanker;
use crate::layers::reconciliation::CategoryReconciler;
use crate::layers::taxonomy::Taxonomy;
use crate::layers::{Paper, SearchResult};

/// Papers requested by a topic search.
pub const TOPIC_SEARCH_RESULTS: usize = 20;
pub const TITLE_UNAVAILABLE: &str = "Could not generate title.";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub papers_per_fetch: usize,
    pub fetch_concurrency: usize,
    pub filter_batch_size: usize,
    pub top_results: usize,
    pub llm_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            papers_per_fetch: config.papers_per_fetch,
            fetch_concurrency: config.fetch_concurrency,
            filter_batch_size: config.filter_batch_size,
            top_results: config.top_results,
            llm_timeout: config.llm_timeout,
        }
    }
}

/// A fallback that fired while answering a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    DefaultCategories { reason: String },
    NeutralScores,
    FilterFailOpen,
    ForcedAssignment { count: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub result: SearchResult,
    pub classification: Classification,
    /// Empty when every stage produced a genuine answer.
    pub degradations: Vec<Degradation>,
}

pub struct Pipeline<L, S> {
    model: L,
    source: S,
    taxonomy: Taxonomy,
    settings: PipelineSettings,
}

impl Pipeline<GeminiClient, ArxivClient> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let model = GeminiClient::new(
            config.gemini_api_base.clone(),
            config.gemini_model.clone(),
            config.gemini_api_key.clone(),
            config.llm_timeout,
        )?;
        let source = ArxivClient::new(
            config.arxiv_api_url.clone(),
            config.arxiv_delay,
            config.http_timeout,
            config.arxiv_max_start_offset,
        )?
        .with_browse_start_offset(config.arxiv_browse_start_offset);
        Ok(Self::new(model, source, Taxonomy::arxiv(), PipelineSettings::from(config)))
    }
}

impl<L: LanguageModel, S: PaperSource> Pipeline<L, S> {
    pub fn new(model: L, source: S, taxonomy: Taxonomy, settings: PipelineSettings) -> Self {
        Self { model, source, taxonomy, settings }
    }

    /// Query -> categories -> fetch -> rank -> filter -> regroup.
    ///
    /// Only an empty query is an error; every stage failure degrades and is
    /// listed in [`SearchOutcome::degradations`].
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        let query = query.trim();
        if query.is_empty() {
            bail!("search query is empty");
        }
        let mut degradations = Vec::new();

        tracing::info!("--- Classifying {:?} ---", query);
        let classification = QueryClassifier::new(&self.model, self.taxonomy, self.settings.llm_timeout)
            .classify(query)
            .await;
        if let Some(reason) = &classification.fallback_reason {
            degradations.push(Degradation::DefaultCategories { reason: reason.clone() });
        }
        let categories: Vec<String> = classification.map.categories().map(str::to_string).collect();

        tracing::info!("--- Fetching ---");
        let fetcher = AggregatingFetcher::new(
            &self.source,
            self.taxonomy,
            self.settings.papers_per_fetch,
            self.settings.fetch_concurrency,
        );
        let papers = fetcher.fetch(query, &classification.map).await;

        if papers.is_empty() {
            tracing::info!("No papers found for {:?}", query);
            let result = SearchResult {
                by_category: categories.into_iter().map(|c| (c, Vec::new())).collect(),
                top_results: Vec::new(),
            };
            return Ok(SearchOutcome { result, classification, degradations });
        }

        tracing::info!("--- Ranking {} papers ---", papers.len());
        let ranked = RelevanceRanker::new(&self.model, self.settings.llm_timeout).rank(query, papers).await;
        if ranked.used_fallback {
            degradations.push(Degradation::NeutralScores);
        }

        tracing::info!("--- Filtering ---");
        let filtered = self.filter(query, ranked.papers).await;
        if filtered.failed_open {
            degradations.push(Degradation::FilterFailOpen);
        }

        let reconciled = CategoryReconciler::new(self.taxonomy, self.settings.top_results)
            .reconcile(filtered.papers, &categories);
        if reconciled.forced > 0 {
            degradations.push(Degradation::ForcedAssignment { count: reconciled.forced });
        }

        tracing::info!(
            "Search for {:?} returned {} papers ({} degradations)",
            query,
            reconciled.result.paper_count(),
            degradations.len()
        );
        Ok(SearchOutcome { result: reconciled.result, classification, degradations })
    }

    /// Re-runs only the relevance filter over papers the caller already has.
    pub async fn refilter(&self, query: &str, papers: Vec<Paper>) -> Result<FilterOutcome> {
        let query = query.trim();
        if query.is_empty() {
            bail!("search query is empty");
        }
        Ok(self.filter(query, papers).await)
    }

    async fn filter(&self, query: &str, papers: Vec<Paper>) -> FilterOutcome {
        RelevanceFilter::new(&self.model, self.settings.llm_timeout, self.settings.filter_batch_size)
            .filter(query, papers)
            .await
    }

    /// Browses recent papers for topic names, shuffled.
    ///
    /// Unknown topics are skipped; it is an error only if none are known.
    pub async fn search_topics(&self, topics: &[String]) -> Result<Vec<Paper>> {
        let mut codes: Vec<String> = Vec::new();
        for topic in topics {
            let resolved = self.taxonomy.resolve_topic(topic);
            if resolved.is_empty() {
                tracing::warn!("Ignoring unknown topic {:?}", topic);
            }
            for code in resolved {
                if !codes.iter().any(|c| c == code) {
                    codes.push(code.to_string());
                }
            }
        }
        if codes.is_empty() {
            bail!("no recognised topics in {:?}", topics);
        }

        tracing::info!("Searching topics {:?} as {:?}", topics, codes);
        let mut papers = self.source.browse(&codes, TOPIC_SEARCH_RESULTS).await;
        papers.retain(|p| p.pdf_link.is_some());
        papers.shuffle(&mut rand::thread_rng());
        Ok(papers)
    }

    /// Short jargon-free title for a paper, or [`TITLE_UNAVAILABLE`].
    pub async fn plain_title(&self, title: &str, abstract_text: &str) -> Result<String> {
        if title.trim().is_empty() || abstract_text.trim().is_empty() {
            bail!("missing original title or abstract");
        }

        let prompt = format!(
            "You are an expert science communicator tasked with creating engaging titles for the public.\n\
             Based on the following academic paper's title and abstract, generate a short, catchy, and \
             easy-to-understand 'plain English' title. Focus on the core idea or key finding. Avoid jargon.\n\n\
             Original Title: {}\n\nAbstract: {}\n\nGenerate ONLY the plain English title:",
            title.trim(),
            abstract_text.trim()
        );
        match complete_within(&self.model, &prompt, self.settings.llm_timeout).await {
            Ok(reply) => {
                let cleaned = reply.trim().replace(['"', '*'], "");
                let cleaned = cleaned.lines().next().unwrap_or_default().trim().to_string();
                if cleaned.is_empty() {
                    Ok(TITLE_UNAVAILABLE.to_string())
                } else {
                    Ok(cleaned)
                }
            }
            Err(e) => {
                tracing::warn!("Plain title generation failed: {}", e);
                Ok(TITLE_UNAVAILABLE.to_string())
            }
        }
    }
}
