use std::time::Duration;

use crate::layers::llm::{complete_within, paper_listing, parse_paper_lines, LanguageModel};
use crate::layers::Paper;

pub const DEFAULT_BATCH_SIZE: usize = 5;
/// The reply that marks a paper as not relevant.
pub const NEGATIVE_TOKEN: &str = "NOT RELEVANT";
pub const FILTER_UNAVAILABLE: &str = "Relevance filter unavailable; included by default";
/// Explanation for papers the model did not mention.
pub const NOT_ASSESSED: &str = "Not assessed by the relevance filter";

pub struct FilterOutcome {
    pub papers: Vec<Paper>,
    /// True when a failed call caused every input paper to be admitted.
    pub failed_open: bool,
}

pub struct RelevanceFilter<'a, L> {
    model: &'a L,
    timeout: Duration,
    batch_size: usize,
}

impl<'a, L: LanguageModel> RelevanceFilter<'a, L> {
    pub fn new(model: &'a L, timeout: Duration, batch_size: usize) -> Self {
        Self { model, timeout, batch_size: batch_size.max(1) }
    }

    /// Keeps the papers the model judges relevant, in input order.
    ///
    /// Any failed batch discards all verdicts and admits the whole input.
    pub async fn filter(&self, query: &str, papers: Vec<Paper>) -> FilterOutcome {
        let mut verdicts: Vec<Option<String>> = Vec::with_capacity(papers.len());
        let mut failure = None;

        for (n, batch) in papers.chunks(self.batch_size).enumerate() {
            let prompt = build_prompt(query, batch);
            match complete_within(self.model, &prompt, self.timeout).await {
                Ok(response) => {
                    tracing::debug!("Filter batch {} response: {}", n + 1, response);
                    verdicts.extend(judge_batch(batch.len(), &response));
                }
                Err(e) => {
                    failure = Some((n + 1, e));
                    break;
                }
            }
        }

        if let Some((batch, e)) = failure {
            tracing::warn!("Relevance filter batch {} failed, admitting all {} papers: {}", batch, papers.len(), e);
            return FilterOutcome { papers: fail_open(papers), failed_open: true };
        }

        let total = papers.len();
        let kept: Vec<Paper> = papers
            .into_iter()
            .zip(verdicts)
            .filter_map(|(mut paper, verdict)| {
                let explanation = verdict?;
                paper.is_relevant = Some(true);
                paper.relevance_explanation = Some(explanation);
                Some(paper)
            })
            .collect();
        tracing::info!("Relevance filter kept {} of {} papers", kept.len(), total);
        FilterOutcome { papers: kept, failed_open: false }
    }
}

pub fn build_prompt(query: &str, batch: &[Paper]) -> String {
    format!(
        "You are a strict research assistant. Decide whether each paper below is relevant to the research query.\n\n\
         Query: \"{}\"\n\n\
         {}\
         For every paper answer on its own line in exactly this format:\n\
         PAPER <number>: <one sentence on why it is relevant>\n\
         If a paper is not relevant, answer exactly:\n\
         PAPER <number>: {}",
        query.trim(),
        paper_listing(batch),
        NEGATIVE_TOKEN
    )
}

fn is_negative(text: &str) -> bool {
    let trimmed = text.trim().trim_matches(|c: char| c == '.' || c == '*' || c == '"' || c.is_whitespace());
    trimmed.eq_ignore_ascii_case(NEGATIVE_TOKEN)
}

/// Verdict per batch position: `Some(explanation)` to keep, `None` to drop.
///
/// Papers the reply does not mention are kept with [`NOT_ASSESSED`].
pub fn judge_batch(len: usize, response: &str) -> Vec<Option<String>> {
    let mut verdicts = vec![Some(NOT_ASSESSED.to_string()); len];
    let mut answered = vec![false; len];
    for (index, text) in parse_paper_lines(response) {
        if index == 0 || index > len {
            continue;
        }
        answered[index - 1] = true;
        verdicts[index - 1] = if is_negative(&text) {
            None
        } else if text.is_empty() {
            Some(NOT_ASSESSED.to_string())
        } else {
            Some(text)
        };
    }
    let unanswered = answered.iter().filter(|a| !**a).count();
    if unanswered > 0 {
        tracing::debug!("Filter reply skipped {} of {} papers", unanswered, len);
    }
    verdicts
}

fn fail_open(mut papers: Vec<Paper>) -> Vec<Paper> {
    for paper in &mut papers {
        paper.is_relevant = Some(true);
        paper.relevance_explanation = Some(FILTER_UNAVAILABLE.to_string());
    }
    papers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::testing::{paper, ScriptedModel};

    fn papers(n: usize) -> Vec<Paper> {
        (1..=n).map(|i| paper(&format!("p{i}"))).collect()
    }

    #[test]
    fn negative_token_is_case_insensitive() {
        let verdicts = judge_batch(4, "PAPER 1: not relevant.\nPAPER 2: Uses surface codes\nPAPER 3: **NOT RELEVANT**\nPAPER 4: Not relevant to the query, but close");
        assert_eq!(verdicts[0], None);
        assert_eq!(verdicts[1].as_deref(), Some("Uses surface codes"));
        assert_eq!(verdicts[2], None);
        assert_eq!(verdicts[3].as_deref(), Some("Not relevant to the query, but close"));
    }

    #[tokio::test]
    async fn batches_of_five_keep_relevant_only() {
        let model = ScriptedModel::new([
            Ok::<_, String>("PAPER 1: yes\nPAPER 2: NOT RELEVANT\nPAPER 3: fits\nPAPER 4: NOT RELEVANT\nPAPER 5: fits".into()),
            Ok("PAPER 1: NOT RELEVANT\nPAPER 2: directly relevant".into()),
        ]);
        let filter = RelevanceFilter::new(&model, Duration::from_secs(1), DEFAULT_BATCH_SIZE);
        let outcome = filter.filter("q", papers(7)).await;

        assert_eq!(model.calls(), 2);
        assert!(!outcome.failed_open);
        let ids: Vec<_> = outcome.papers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p3", "p5", "p7"]);
        assert!(outcome.papers.iter().all(|p| p.is_relevant == Some(true)));
        assert_eq!(outcome.papers[3].relevance_explanation.as_deref(), Some("directly relevant"));
        assert!(model.prompts()[1].contains("Title p6"));
        assert!(!model.prompts()[1].contains("Title p5"));
    }

    #[tokio::test]
    async fn failure_in_second_batch_admits_all_seven() {
        let model = ScriptedModel::new([
            Ok::<_, String>("PAPER 1: NOT RELEVANT\nPAPER 2: NOT RELEVANT\nPAPER 3: NOT RELEVANT\nPAPER 4: ok\nPAPER 5: ok".into()),
            Err("connection reset".into()),
        ]);
        let filter = RelevanceFilter::new(&model, Duration::from_secs(1), 5);
        let input = papers(7);
        let outcome = filter.filter("q", input.clone()).await;

        assert_eq!(model.calls(), 2);
        assert!(outcome.failed_open);
        assert_eq!(outcome.papers.len(), 7);
        for (kept, original) in outcome.papers.iter().zip(&input) {
            assert_eq!(kept.id, original.id);
            assert_eq!(kept.is_relevant, Some(true));
            assert_eq!(kept.relevance_explanation.as_deref(), Some(FILTER_UNAVAILABLE));
        }
    }

    #[tokio::test]
    async fn unmentioned_papers_are_kept() {
        let model = ScriptedModel::replying("PAPER 2: NOT RELEVANT");
        let filter = RelevanceFilter::new(&model, Duration::from_secs(1), 5);
        let outcome = filter.filter("q", papers(3)).await;
        let ids: Vec<_> = outcome.papers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p3"]);
        assert_eq!(outcome.papers[0].relevance_explanation.as_deref(), Some(NOT_ASSESSED));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let model = ScriptedModel::unconfigured();
        let filter = RelevanceFilter::new(&model, Duration::from_secs(1), 5);
        let outcome = filter.filter("q", Vec::new()).await;
        assert!(outcome.papers.is_empty());
        assert_eq!(model.calls(), 0);
    }
}
