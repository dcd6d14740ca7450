use std::collections::HashSet;

use crate::layers::taxonomy::Taxonomy;
use crate::layers::{CategoryGroups, Paper, SearchResult};

pub const DEFAULT_TOP_RESULTS: usize = 10;
/// Group used only when the category list itself is empty.
pub const UNCATEGORIZED: &str = "Uncategorized";

pub struct Reconciled {
    pub result: SearchResult,
    /// Papers that could only be placed by the first-category fallback.
    pub forced: usize,
}

pub struct CategoryReconciler {
    taxonomy: Taxonomy,
    top_n: usize,
}

impl CategoryReconciler {
    pub fn new(taxonomy: Taxonomy, top_n: usize) -> Self {
        Self { taxonomy, top_n }
    }

    /// Groups papers under `categories`; every paper lands in exactly one group.
    pub fn reconcile(&self, papers: Vec<Paper>, categories: &[String]) -> Reconciled {
        let fallback = categories.first().map(String::as_str).unwrap_or(UNCATEGORIZED);
        let mut by_category: CategoryGroups = categories.iter().map(|c| (c.clone(), Vec::new())).collect();
        let mut forced = 0;

        let mut assigned = Vec::with_capacity(papers.len());
        for mut paper in papers {
            let group = match self.assign(&paper, categories) {
                Some(category) => category.to_string(),
                None => {
                    tracing::warn!(
                        "Paper {} has no usable category ({:?} / {:?}); assigning to {}",
                        paper.id,
                        paper.origin_category,
                        paper.origin_subcategory,
                        fallback
                    );
                    forced += 1;
                    fallback.to_string()
                }
            };
            paper.origin_category = Some(group);
            assigned.push(paper);
        }

        let top_results = top_by_score(&assigned, self.top_n);
        for paper in assigned {
            let group = paper.origin_category.clone().unwrap_or_else(|| fallback.to_string());
            by_category.entry(&group).push(paper);
        }

        for group in by_category.values_mut() {
            group.sort_by(|a, b| b.score().cmp(&a.score()));
        }

        let mut result = SearchResult { by_category, top_results };
        forced += ensure_top_results_grouped(&mut result, fallback);
        Reconciled { result, forced }
    }

    /// The known category a paper belongs to, repairing via its subcategory.
    fn assign<'c>(&self, paper: &Paper, categories: &'c [String]) -> Option<&'c str> {
        if let Some(origin) = paper.origin_category.as_deref() {
            if let Some(known) = categories.iter().find(|c| c.as_str() == origin) {
                return Some(known);
            }
        }
        let code = paper.origin_subcategory.as_ref()?.code()?;
        let owner = self.taxonomy.owner_of(code)?;
        categories.iter().find(|c| c.as_str() == owner).map(String::as_str)
    }
}

/// Highest-scoring papers first, ties in input order.
fn top_by_score(papers: &[Paper], n: usize) -> Vec<Paper> {
    let mut ranked: Vec<&Paper> = papers.iter().collect();
    ranked.sort_by(|a, b| b.score().cmp(&a.score()));
    ranked.into_iter().take(n).cloned().collect()
}

/// Places any top result missing from every group into `fallback`.
fn ensure_top_results_grouped(result: &mut SearchResult, fallback: &str) -> usize {
    let grouped: HashSet<&str> = result
        .by_category
        .values()
        .flat_map(|papers| papers.iter().map(|p| p.id.as_str()))
        .collect();
    let missing: Vec<Paper> = result
        .top_results
        .iter()
        .filter(|p| !grouped.contains(p.id.as_str()))
        .cloned()
        .collect();

    let count = missing.len();
    if count > 0 {
        tracing::warn!("{} top results were not grouped; assigning to {}", count, fallback);
        let group = result.by_category.entry(fallback);
        group.extend(missing);
        group.sort_by(|a, b| b.score().cmp(&a.score()));
    }
    count
}
