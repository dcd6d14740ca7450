// Scripted collaborators shared by the layer tests.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::layers::discovery::PaperSource;
use crate::layers::llm::LanguageModel;
use crate::layers::Paper;

/// Replays queued replies in order; an exhausted queue is an error.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    configured: bool,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new<E: ToString>(replies: impl IntoIterator<Item = Result<String, E>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map_err(|e| e.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
            configured: true,
            delay: None,
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self::new([Ok::<_, String>(reply.to_string())])
    }

    pub fn unconfigured() -> Self {
        Self { configured: false, ..Self::new(Vec::<Result<String, String>>::new()) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("no scripted reply left")),
        }
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

/// Serves canned pages keyed by the joined category codes of a call.
#[derive(Default)]
pub struct ScriptedSource {
    pages: HashMap<String, Vec<Paper>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
}

impl ScriptedSource {
    pub fn with_page(mut self, codes: &[&str], papers: Vec<Paper>) -> Self {
        self.pages.insert(codes.join(","), papers);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

impl PaperSource for ScriptedSource {
    async fn search(&self, category_codes: &[String], max_results: usize) -> Vec<Paper> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(category_codes.to_vec());
        let mut page = self.pages.get(&category_codes.join(",")).cloned().unwrap_or_default();
        page.truncate(max_results);
        page
    }
}

pub fn paper(id: &str) -> Paper {
    let mut paper = Paper::new(id, format!("Title {id}"), format!("Abstract of {id}"));
    paper.pdf_link = Some(format!("http://arxiv.org/pdf/{id}"));
    paper
}

pub fn scored(id: &str, score: u8) -> Paper {
    let mut paper = paper(id);
    paper.relevance_score = Some(score);
    paper
}
