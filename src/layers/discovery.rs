use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use rand::Rng;
use reqwest::Client;
use url::Url;

use crate::layers::Paper;

/// A category-filtered search against the paper repository.
///
/// Failures are swallowed at this boundary: a failed call is an empty page.
pub trait PaperSource: Send + Sync {
    fn search(&self, category_codes: &[String], max_results: usize) -> impl Future<Output = Vec<Paper>> + Send;

    /// Recent papers for casual browsing. Sources may vary the page between
    /// calls; by default this is a plain [`PaperSource::search`].
    fn browse(&self, category_codes: &[String], max_results: usize) -> impl Future<Output = Vec<Paper>> + Send {
        self.search(category_codes, max_results)
    }
}

/// Browse pages start at a random offset up to this many papers.
pub const DEFAULT_BROWSE_START_OFFSET: usize = 50;

pub struct ArxivClient {
    client: Client,
    api_url: Url,
    max_start_offset: usize,
    browse_start_offset: usize,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl ArxivClient {
    /// `min_spacing` is the arXiv courtesy delay enforced between calls.
    pub fn new(api_url: Url, min_spacing: Duration, timeout: Duration, max_start_offset: usize) -> Result<Self> {
        let quota = match Quota::with_period(min_spacing) {
            Some(quota) => quota,
            None => {
                tracing::warn!("arXiv call spacing {:?} is not usable; spacing calls by one second", min_spacing);
                Quota::per_second(nonzero!(1u32))
            }
        }
        .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_url,
            max_start_offset,
            browse_start_offset: DEFAULT_BROWSE_START_OFFSET,
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn with_browse_start_offset(mut self, offset: usize) -> Self {
        self.browse_start_offset = offset;
        self
    }

    fn query_url(&self, category_codes: &[String], max_results: usize, start: usize) -> Url {
        let query = category_codes
            .iter()
            .map(|code| format!("cat:{code}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("search_query", &query)
            .append_pair("sortBy", "submittedDate")
            .append_pair("sortOrder", "descending")
            .append_pair("start", &start.to_string())
            .append_pair("max_results", &max_results.to_string());
        url
    }

    pub async fn fetch(&self, category_codes: &[String], max_results: usize, start: usize) -> Result<Vec<Paper>> {
        if category_codes.is_empty() {
            return Ok(Vec::new());
        }

        // Wait for permission
        self.limiter.until_ready().await;

        let url = self.query_url(category_codes, max_results, start);
        tracing::info!("Querying arXiv: {}", url);
        let resp = self.client.get(url).send().await.map_err(|e| anyhow!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(anyhow!("arXiv API error: {}", resp.status()));
        }
        let text = resp.text().await?;
        parse_atom_feed(&text)
    }

    async fn fetch_or_empty(&self, category_codes: &[String], max_results: usize, max_offset: usize) -> Vec<Paper> {
        match self.fetch(category_codes, max_results, random_start(max_offset)).await {
            Ok(papers) => papers,
            Err(e) => {
                tracing::warn!("arXiv search for {:?} failed: {}", category_codes, e);
                Vec::new()
            }
        }
    }
}

impl PaperSource for ArxivClient {
    async fn search(&self, category_codes: &[String], max_results: usize) -> Vec<Paper> {
        self.fetch_or_empty(category_codes, max_results, self.max_start_offset).await
    }

    async fn browse(&self, category_codes: &[String], max_results: usize) -> Vec<Paper> {
        self.fetch_or_empty(category_codes, max_results, self.browse_start_offset).await
    }
}

fn random_start(max_offset: usize) -> usize {
    if max_offset == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max_offset)
    }
}

/// `http://arxiv.org/abs/2301.12345v2` -> `2301.12345`.
pub fn canonical_id(raw: &str) -> String {
    let tail = raw.trim().rsplit("/abs/").next().unwrap_or(raw).trim();
    match tail.rfind('v') {
        Some(pos) if pos > 0 && pos + 1 < tail.len() && tail[pos + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            tail[..pos].to_string()
        }
        _ => tail.to_string(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_entity(name: &str) -> Option<String> {
    if let Some(predefined) = resolve_predefined_entity(name) {
        return Some(predefined.to_string());
    }
    let code = name.strip_prefix('#')?;
    let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => code.parse().ok()?,
    };
    char::from_u32(value).map(String::from)
}

#[derive(Default)]
struct EntryDraft {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    pdf_link: Option<String>,
}

impl EntryDraft {
    fn finish(self) -> Option<Paper> {
        let Some(pdf_link) = self.pdf_link else {
            tracing::debug!("Skipping arXiv entry {} without a PDF link", self.id);
            return None;
        };
        let mut paper = Paper::new(canonical_id(&self.id), collapse_whitespace(&self.title), collapse_whitespace(&self.summary));
        paper.pdf_link = Some(pdf_link);
        paper.authors = self.authors.into_iter().map(|a| collapse_whitespace(&a)).collect();
        paper.published = DateTime::parse_from_rfc3339(self.published.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc));
        Some(paper)
    }
}

#[derive(PartialEq)]
enum TagState {
    None,
    Title,
    Summary,
    Published,
    AuthorName,
    Id,
}

fn pdf_href(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    let mut href = String::new();
    let mut title_attr = String::new();
    let mut type_attr = String::new();
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"href" => href = String::from_utf8_lossy(&attr.value).to_string(),
            b"title" => title_attr = String::from_utf8_lossy(&attr.value).to_string(),
            b"type" => type_attr = String::from_utf8_lossy(&attr.value).to_string(),
            _ => {}
        }
    }
    (!href.is_empty() && (title_attr == "pdf" || type_attr == "application/pdf")).then_some(href)
}

/// Parses an arXiv Atom feed. Entries without a PDF link are dropped.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut papers = Vec::new();
    let mut buf = Vec::new();
    let mut entry: Option<EntryDraft> = None;
    let mut state = TagState::None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"entry" => entry = Some(EntryDraft::default()),
                b"title" if entry.is_some() => state = TagState::Title,
                b"summary" if entry.is_some() => state = TagState::Summary,
                b"published" if entry.is_some() => state = TagState::Published,
                b"name" if entry.is_some() => {
                    if let Some(draft) = entry.as_mut() {
                        draft.authors.push(String::new());
                    }
                    state = TagState::AuthorName;
                }
                b"id" if entry.is_some() => state = TagState::Id,
                b"link" => {
                    if let (Some(draft), Some(href)) = (entry.as_mut(), pdf_href(&e)) {
                        draft.pdf_link.get_or_insert(href);
                    }
                }
                _ => state = TagState::None,
            },
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"link" {
                    if let (Some(draft), Some(href)) = (entry.as_mut(), pdf_href(&e)) {
                        draft.pdf_link.get_or_insert(href);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(draft) = entry.as_mut() {
                    push_text(draft, &state, &String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(draft) = entry.as_mut() {
                    let name = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    let text = resolve_entity(&name).unwrap_or_else(|| format!("&{name};"));
                    push_text(draft, &state, &text);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"entry" => {
                    if let Some(paper) = entry.take().and_then(EntryDraft::finish) {
                        tracing::debug!("Parsed arXiv entry: id='{}', title='{}'", paper.id, paper.title);
                        papers.push(paper);
                    }
                    state = TagState::None;
                }
                _ => state = TagState::None,
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!("XML parsing error at position {}: {:?}", reader.buffer_position(), e));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

fn push_text(draft: &mut EntryDraft, state: &TagState, text: &str) {
    match state {
        TagState::Title => draft.title.push_str(text),
        TagState::Summary => draft.summary.push_str(text),
        TagState::Published => draft.published.push_str(text),
        TagState::Id => draft.id.push_str(text),
        TagState::AuthorName => {
            if let Some(last) = draft.authors.last_mut() {
                last.push_str(text);
            }
        }
        TagState::None => {}
    }
}
