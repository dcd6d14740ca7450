use std::collections::HashMap;

use futures_util::stream::{self, StreamExt};

use crate::layers::discovery::PaperSource;
use crate::layers::taxonomy::Taxonomy;
use crate::layers::{CategoryMap, Paper, Provenance};

pub const DEFAULT_PAPERS_PER_FETCH: usize = 10;

/// One retrieval call and the provenance its results are tagged with.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPlan {
    pub category: String,
    pub provenance: Provenance,
    pub codes: Vec<String>,
}

/// Per main category: one call per chosen subcategory, then one broad call
/// over every subcategory the taxonomy lists for it.
pub fn plan_fetches(map: &CategoryMap, taxonomy: &Taxonomy) -> Vec<FetchPlan> {
    let mut plans = Vec::new();
    for entry in map.entries() {
        for code in &entry.subcategories {
            plans.push(FetchPlan {
                category: entry.category.clone(),
                provenance: Provenance::Subcategory(code.clone()),
                codes: vec![code.clone()],
            });
        }
        let broad: Vec<String> = match taxonomy.category(&entry.category) {
            Some(category) => category.codes().map(str::to_string).collect(),
            None => entry.subcategories.clone(),
        };
        plans.push(FetchPlan {
            category: entry.category.clone(),
            provenance: Provenance::General,
            codes: broad,
        });
    }
    plans
}

pub struct AggregatingFetcher<'a, S> {
    source: &'a S,
    taxonomy: Taxonomy,
    per_fetch: usize,
    concurrency: usize,
}

impl<'a, S: PaperSource> AggregatingFetcher<'a, S> {
    pub fn new(source: &'a S, taxonomy: Taxonomy, per_fetch: usize, concurrency: usize) -> Self {
        Self { source, taxonomy, per_fetch, concurrency: concurrency.max(1) }
    }

    /// Runs every planned call and merges the pages. `query` is only logged.
    ///
    /// Calls run with bounded concurrency; a failed call contributes an empty
    /// page and never cancels the others. An empty result is not an error.
    pub async fn fetch(&self, query: &str, map: &CategoryMap) -> Vec<Paper> {
        let plans = plan_fetches(map, &self.taxonomy);
        tracing::info!("Fetching papers for {:?} with {} repository calls", query, plans.len());

        let per_fetch = self.per_fetch;
        let pages: Vec<(FetchPlan, Vec<Paper>)> = stream::iter(plans)
            .map(|plan| async move {
                let papers = self.source.search(&plan.codes, per_fetch).await;
                tracing::debug!("{} / {} returned {} papers", plan.category, plan.provenance, papers.len());
                (plan, papers)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let empty = pages.iter().filter(|(_, papers)| papers.is_empty()).count();
        if empty > 0 {
            tracing::warn!("{} of {} repository calls returned no papers", empty, pages.len());
        }

        let merged = merge_pages(pages);
        tracing::info!("Collected {} unique papers", merged.len());
        merged
    }
}

/// Tags each page with its plan and deduplicates by paper id.
///
/// A specific-subcategory copy replaces a `general` one; among specific
/// copies the first seen is kept. Papers without a PDF link are dropped.
pub fn merge_pages(pages: Vec<(FetchPlan, Vec<Paper>)>) -> Vec<Paper> {
    let mut merged: Vec<Paper> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (plan, papers) in pages {
        for mut paper in papers {
            if paper.pdf_link.is_none() {
                continue;
            }
            paper.tag(&plan.category, plan.provenance.clone());

            match index.get(&paper.id) {
                Some(&pos) => {
                    let existing_specific = merged[pos].origin_subcategory.as_ref().is_some_and(Provenance::is_specific);
                    if !existing_specific && plan.provenance.is_specific() {
                        merged[pos] = paper;
                    }
                }
                None => {
                    index.insert(paper.id.clone(), merged.len());
                    merged.push(paper);
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::testing::{paper, ScriptedSource};

    fn sub(code: &str) -> Provenance {
        Provenance::Subcategory(code.to_string())
    }

    fn plan(category: &str, provenance: Provenance) -> FetchPlan {
        FetchPlan { category: category.into(), provenance, codes: vec![] }
    }

    #[test]
    fn plans_four_calls_per_category() {
        let taxonomy = Taxonomy::arxiv();
        let plans = plan_fetches(&taxonomy.default_map(), &taxonomy);
        assert_eq!(plans.len(), 12);
        assert_eq!(plans[0].codes, ["quant-ph"]);
        assert_eq!(plans[3].provenance, Provenance::General);
        assert_eq!(plans[3].codes.len(), taxonomy.category("Physics").unwrap().subcategories.len());
    }

    #[test]
    fn specific_provenance_beats_general() {
        let pages = vec![
            (plan("Physics", Provenance::General), vec![paper("1"), paper("2")]),
            (plan("Physics", sub("quant-ph")), vec![paper("1")]),
            (plan("Computer Science", sub("cs.AI")), vec![paper("1"), paper("2")]),
        ];
        let merged = merge_pages(pages);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "1");
        assert_eq!(merged[0].origin_category.as_deref(), Some("Physics"));
        assert_eq!(merged[0].origin_subcategory, Some(sub("quant-ph")));
        assert_eq!(merged[1].origin_category.as_deref(), Some("Computer Science"));
        assert_eq!(merged[1].origin_subcategory, Some(sub("cs.AI")));
    }

    #[test]
    fn general_never_replaces_specific() {
        let pages = vec![
            (plan("Mathematics", sub("math.CO")), vec![paper("7")]),
            (plan("Mathematics", Provenance::General), vec![paper("7")]),
        ];
        let merged = merge_pages(pages);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].origin_subcategory, Some(sub("math.CO")));
    }

    #[test]
    fn drops_papers_without_pdf() {
        let mut bare = paper("9");
        bare.pdf_link = None;
        let merged = merge_pages(vec![(plan("Physics", sub("quant-ph")), vec![bare, paper("10")])]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "10");
    }

    #[tokio::test]
    async fn twelve_calls_with_overlap_merge_to_at_most_95() {
        let taxonomy = Taxonomy::arxiv();
        let map = taxonomy.default_map();
        let plans = plan_fetches(&map, &taxonomy);

        // Ten calls return ten papers each; five ids repeat across calls.
        let mut source = ScriptedSource::default();
        for (i, plan) in plans.iter().enumerate().skip(2) {
            let page = (0..10)
                .map(|j| {
                    if (i == 2 || i == 3) && j < 5 {
                        paper(&format!("shared-{j}"))
                    } else {
                        paper(&format!("p{i}-{j}"))
                    }
                })
                .collect();
            let codes: Vec<&str> = plan.codes.iter().map(String::as_str).collect();
            source = source.with_page(&codes, page);
        }

        let fetcher = AggregatingFetcher::new(&source, taxonomy, DEFAULT_PAPERS_PER_FETCH, 4);
        let papers = fetcher.fetch("quantum error correction", &map).await;
        assert_eq!(source.calls(), 12);
        assert!(papers.len() <= 95);
        assert_eq!(papers.len(), 95);

        let shared = papers.iter().find(|p| p.id == "shared-0").unwrap();
        assert_eq!(shared.origin_subcategory, Some(sub("cond-mat.mes-hall")));
    }

    #[tokio::test]
    async fn empty_repository_is_not_an_error() {
        let taxonomy = Taxonomy::arxiv();
        let source = ScriptedSource::default();
        let fetcher = AggregatingFetcher::new(&source, taxonomy, 10, 3);
        let papers = fetcher.fetch("nothing", &taxonomy.default_map()).await;
        assert!(papers.is_empty());
        assert_eq!(source.calls(), 12);
    }
}
