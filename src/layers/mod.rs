use std::fmt;
use std::ops::Index;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Sentinel subcategory for papers fetched by a main-category broad query.
pub const GENERAL_SUBCATEGORY: &str = "general";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub pdf_link: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub origin_category: Option<String>,
    #[serde(default)]
    pub origin_subcategory: Option<Provenance>,
    #[serde(default)]
    pub relevance_score: Option<u8>,
    #[serde(default)]
    pub relevance_explanation: Option<String>,
    #[serde(default)]
    pub is_relevant: Option<bool>,
}

impl Paper {
    pub fn new(id: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            pdf_link: None,
            authors: Vec::new(),
            published: None,
            origin_category: None,
            origin_subcategory: None,
            relevance_score: None,
            relevance_explanation: None,
            is_relevant: None,
        }
    }

    /// Score used for ordering; unscored papers sort last.
    pub fn score(&self) -> u8 {
        self.relevance_score.unwrap_or(0)
    }

    pub fn tag(&mut self, category: &str, provenance: Provenance) {
        self.origin_category = Some(category.to_string());
        self.origin_subcategory = Some(provenance);
    }
}

/// Which retrieval call produced a paper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provenance {
    Subcategory(String),
    General,
}

impl Provenance {
    pub fn is_specific(&self) -> bool {
        matches!(self, Provenance::Subcategory(_))
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Provenance::Subcategory(code) => Some(code),
            Provenance::General => None,
        }
    }
}

impl From<String> for Provenance {
    fn from(raw: String) -> Self {
        if raw.eq_ignore_ascii_case(GENERAL_SUBCATEGORY) {
            Provenance::General
        } else {
            Provenance::Subcategory(raw)
        }
    }
}

impl From<Provenance> for String {
    fn from(provenance: Provenance) -> Self {
        match provenance {
            Provenance::Subcategory(code) => code,
            Provenance::General => GENERAL_SUBCATEGORY.to_string(),
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Subcategory(code) => f.write_str(code),
            Provenance::General => f.write_str(GENERAL_SUBCATEGORY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryEntry {
    pub category: String,
    pub subcategories: Vec<String>,
}

/// Main category -> subcategory codes, in the order the classifier chose them.
///
/// Only built through [`taxonomy::Taxonomy::default_map`] or the classifier's
/// validation, so every entry is consistent with the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMap {
    entries: Vec<CategoryEntry>,
}

impl CategoryMap {
    pub(crate) fn from_entries(entries: Vec<CategoryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CategoryEntry] {
        &self.entries
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.category.as_str())
    }

    pub fn subcategories(&self, category: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|e| e.category == category)
            .map(|e| e.subcategories.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for CategoryMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.category, &entry.subcategories)?;
        }
        map.end()
    }
}

/// Papers grouped by main category, in the order the groups were created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryGroups {
    groups: Vec<(String, Vec<Paper>)>,
}

impl CategoryGroups {
    pub fn get(&self, category: &str) -> Option<&Vec<Paper>> {
        self.groups.iter().find(|(name, _)| name == category).map(|(_, papers)| papers)
    }

    /// The group for `category`, appended empty if it does not exist yet.
    pub fn entry(&mut self, category: &str) -> &mut Vec<Paper> {
        let pos = match self.groups.iter().position(|(name, _)| name == category) {
            Some(pos) => pos,
            None => {
                self.groups.push((category.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[pos].1
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Vec<Paper>> {
        self.groups.iter().map(|(_, papers)| papers)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Vec<Paper>> {
        self.groups.iter_mut().map(|(_, papers)| papers)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Index<&str> for CategoryGroups {
    type Output = Vec<Paper>;

    fn index(&self, category: &str) -> &Vec<Paper> {
        match self.get(category) {
            Some(papers) => papers,
            None => panic!("no group named {category:?}"),
        }
    }
}

impl FromIterator<(String, Vec<Paper>)> for CategoryGroups {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Paper>)>>(iter: I) -> Self {
        let mut groups = CategoryGroups::default();
        for (category, papers) in iter {
            groups.entry(&category).extend(papers);
        }
        groups
    }
}

impl Serialize for CategoryGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len()))?;
        for (category, papers) in &self.groups {
            map.serialize_entry(category, papers)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct SearchResult {
    pub by_category: CategoryGroups,
    pub top_results: Vec<Paper>,
}

impl SearchResult {
    pub fn paper_count(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }
}

pub mod aggregation;
pub mod classification;
pub mod discovery;
pub mod filtering;
pub mod llm;
pub mod pipeline;
pub mod ranking;
pub mod reconciliation;
pub mod taxonomy;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_round_trips_general_sentinel() {
        let mut paper = Paper::new("2401.00001", "T", "A");
        paper.tag("Physics", Provenance::General);
        let json = serde_json::to_value(&paper).unwrap();
        assert_eq!(json["origin_subcategory"], "general");
        assert_eq!(json["abstract"], "A");

        let back: Paper = serde_json::from_value(json).unwrap();
        assert_eq!(back.origin_subcategory, Some(Provenance::General));
    }

    #[test]
    fn groups_serialize_in_creation_order() {
        let mut groups = CategoryGroups::default();
        groups.entry("Physics").push(Paper::new("p", "T", "A"));
        groups.entry("Computer Science");
        groups.entry("Physics").push(Paper::new("q", "T", "A"));
        assert_eq!(groups.categories().collect::<Vec<_>>(), ["Physics", "Computer Science"]);
        assert_eq!(groups["Physics"].len(), 2);

        let json = serde_json::to_string(&groups).unwrap();
        assert!(json.find("Physics").unwrap() < json.find("Computer Science").unwrap());
    }

    #[test]
    fn papers_from_callers_may_omit_pipeline_fields() {
        let paper: Paper =
            serde_json::from_str(r#"{"id": "x", "title": "t", "origin_subcategory": "cs.AI"}"#).unwrap();
        assert_eq!(paper.origin_subcategory, Some(Provenance::Subcategory("cs.AI".into())));
        assert!(paper.relevance_score.is_none());
        assert!(paper.abstract_text.is_empty());
    }
}
