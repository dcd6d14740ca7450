use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::layers::llm::{complete_within, paper_listing, parse_paper_lines, LanguageModel};
use crate::layers::Paper;

/// Score given to every paper when the ranking call fails.
pub const NEUTRAL_SCORE: u8 = 50;
pub const SCORING_UNAVAILABLE: &str = "Relevance scoring unavailable";
/// Explanation for papers the model skipped; they also score 0.
pub const NO_EXPLANATION: &str = "No explanation provided";

static SCORE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)(?:\.\d+)?\s*(?:/\s*100)?\s*(?:[-–—:|]\s*)?(.*)$").expect("valid score pattern")
});

pub struct RankOutcome {
    pub papers: Vec<Paper>,
    /// True when the neutral fallback score was applied.
    pub used_fallback: bool,
}

pub struct RelevanceRanker<'a, L> {
    model: &'a L,
    timeout: Duration,
}

impl<'a, L: LanguageModel> RelevanceRanker<'a, L> {
    pub fn new(model: &'a L, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn rank(&self, query: &str, papers: Vec<Paper>) -> RankOutcome {
        if papers.is_empty() {
            return RankOutcome { papers, used_fallback: false };
        }

        let prompt = build_prompt(query, &papers);
        match complete_within(self.model, &prompt, self.timeout).await {
            Ok(response) => {
                tracing::debug!("Ranker response: {}", response);
                let papers = apply_scores(papers, &response);
                tracing::info!(
                    "Ranked {} papers, top score {}",
                    papers.len(),
                    papers.first().map(Paper::score).unwrap_or(0)
                );
                RankOutcome { papers, used_fallback: false }
            }
            Err(e) => {
                tracing::warn!("Relevance ranking failed, using neutral scores: {}", e);
                RankOutcome { papers: neutral_scores(papers), used_fallback: true }
            }
        }
    }
}

pub fn build_prompt(query: &str, papers: &[Paper]) -> String {
    format!(
        "You are an expert research assistant. Rate how relevant each paper below is to the research query.\n\n\
         Query: \"{}\"\n\n\
         Scoring guide:\n\
         - 70-100: highly relevant, directly addresses the query\n\
         - 40-70: moderately relevant, related methods or adjacent topic\n\
         - 0-40: low relevance, only loosely connected\n\n\
         {}\
         For every paper answer on its own line in exactly this format:\n\
         PAPER <number>: <score> - <one sentence explanation>",
        query.trim(),
        paper_listing(papers)
    )
}

/// Splits `85/100 - reason` into score and explanation.
fn parse_score(text: &str) -> Option<(u8, String)> {
    let caps = SCORE_TEXT.captures(text)?;
    // Digit runs too long for u64 are still out-of-range scores.
    let score = caps[1].parse::<u64>().unwrap_or(u64::MAX).min(100) as u8;
    let explanation = caps[2].trim();
    let explanation = if explanation.is_empty() { NO_EXPLANATION } else { explanation };
    Some((score, explanation.to_string()))
}

/// Annotates papers from a ranking reply and orders them by score.
///
/// Papers the reply does not score get 0 and [`NO_EXPLANATION`].
pub fn apply_scores(mut papers: Vec<Paper>, response: &str) -> Vec<Paper> {
    let mut scored = vec![None; papers.len()];
    for (index, text) in parse_paper_lines(response) {
        if index == 0 || index > papers.len() {
            continue;
        }
        if let Some(parsed) = parse_score(&text) {
            scored[index - 1] = Some(parsed);
        }
    }

    let mut missing = 0;
    for (paper, parsed) in papers.iter_mut().zip(scored) {
        let (score, explanation) = parsed.unwrap_or_else(|| {
            missing += 1;
            (0, NO_EXPLANATION.to_string())
        });
        paper.relevance_score = Some(score);
        paper.relevance_explanation = Some(explanation);
    }
    if missing > 0 {
        tracing::warn!("Ranker skipped {} of {} papers; they score 0", missing, papers.len());
    }

    papers.sort_by(|a, b| b.score().cmp(&a.score()));
    papers
}

fn neutral_scores(mut papers: Vec<Paper>) -> Vec<Paper> {
    for paper in &mut papers {
        paper.relevance_score = Some(NEUTRAL_SCORE);
        paper.relevance_explanation = Some(SCORING_UNAVAILABLE.to_string());
    }
    papers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::testing::{paper, ScriptedModel};

    fn ids(papers: &[Paper]) -> Vec<&str> {
        papers.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn parses_score_variants() {
        assert_eq!(parse_score("85 - strong"), Some((85, "strong".into())));
        assert_eq!(parse_score("72/100: decent"), Some((72, "decent".into())));
        assert_eq!(parse_score("140 — overeager"), Some((100, "overeager".into())));
        assert_eq!(parse_score("40"), Some((40, NO_EXPLANATION.into())));
        assert_eq!(parse_score("1000 - wild"), Some((100, "wild".into())));
        assert_eq!(parse_score("99999999999999999999999 - huge"), Some((100, "huge".into())));
        assert_eq!(parse_score("high relevance"), None);
    }

    #[test]
    fn unscored_papers_get_zero_and_stay() {
        let papers = vec![paper("a"), paper("b"), paper("c")];
        let response = "PAPER 1: 30 - tangential\nPAPER 3: 90 - exactly on topic\nPAPER 7: 99 - hallucinated";
        let ranked = apply_scores(papers, response);
        assert_eq!(ids(&ranked), ["c", "a", "b"]);
        assert_eq!(ranked[2].relevance_score, Some(0));
        assert_eq!(ranked[2].relevance_explanation.as_deref(), Some(NO_EXPLANATION));
        assert_eq!(ranked[0].relevance_explanation.as_deref(), Some("exactly on topic"));
    }

    #[test]
    fn ties_keep_input_order() {
        let ranked = apply_scores(vec![paper("a"), paper("b")], "PAPER 1: 60 - x\nPAPER 2: 60 - y");
        assert_eq!(ids(&ranked), ["a", "b"]);
    }

    #[tokio::test]
    async fn failed_call_assigns_neutral_scores_in_input_order() {
        let model = ScriptedModel::new([Err::<String, _>("quota exceeded")]);
        let ranker = RelevanceRanker::new(&model, Duration::from_secs(1));
        let outcome = ranker.rank("q", vec![paper("x"), paper("y")]).await;
        assert!(outcome.used_fallback);
        assert_eq!(ids(&outcome.papers), ["x", "y"]);
        assert!(outcome.papers.iter().all(|p| p.relevance_score == Some(NEUTRAL_SCORE)));
        assert!(outcome.papers.iter().all(|p| p.relevance_explanation.as_deref() == Some(SCORING_UNAVAILABLE)));
    }

    #[tokio::test]
    async fn prompt_carries_query_bands_and_papers() {
        let model = ScriptedModel::replying("PAPER 1: 80 - good");
        let ranker = RelevanceRanker::new(&model, Duration::from_secs(1));
        let outcome = ranker.rank("spin glasses", vec![paper("s")]).await;
        assert!(!outcome.used_fallback);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("spin glasses"));
        assert!(prompt.contains("70-100"));
        assert!(prompt.contains("PAPER 1:\nTitle: Title s"));
    }
}
