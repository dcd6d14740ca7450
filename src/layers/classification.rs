use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::layers::llm::{complete_within, LanguageModel};
use crate::layers::taxonomy::{MainCategory, Taxonomy, MAP_CATEGORIES, MAP_SUBCATEGORIES};
use crate::layers::{CategoryEntry, CategoryMap};

/// Why a model reply could not be turned into a category map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapRejection {
    NotConfigured,
    CallFailed(String),
    NoJsonObject,
    MalformedJson(String),
    NotAnObject,
    WrongKeyCount(usize),
    UnknownCategory(String),
    DuplicateCategory(String),
    NotAList(String),
}

impl fmt::Display for MapRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapRejection::NotConfigured => write!(f, "no LLM credential configured"),
            MapRejection::CallFailed(e) => write!(f, "LLM call failed: {e}"),
            MapRejection::NoJsonObject => write!(f, "no JSON object in response"),
            MapRejection::MalformedJson(e) => write!(f, "malformed JSON: {e}"),
            MapRejection::NotAnObject => write!(f, "JSON value is not an object"),
            MapRejection::WrongKeyCount(n) => write!(f, "expected {MAP_CATEGORIES} categories, got {n}"),
            MapRejection::UnknownCategory(c) => write!(f, "unknown main category {c:?}"),
            MapRejection::DuplicateCategory(c) => write!(f, "main category {c:?} listed twice"),
            MapRejection::NotAList(c) => write!(f, "subcategories of {c:?} are not a list"),
        }
    }
}

/// Outcome of classifying a query, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub map: CategoryMap,
    pub prompt: String,
    pub response: Option<String>,
    /// Set when the default map was used instead of the model's answer.
    pub fallback_reason: Option<String>,
}

impl Classification {
    pub fn used_default(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

pub struct QueryClassifier<'a, L> {
    model: &'a L,
    taxonomy: Taxonomy,
    timeout: Duration,
}

impl<'a, L: LanguageModel> QueryClassifier<'a, L> {
    pub fn new(model: &'a L, taxonomy: Taxonomy, timeout: Duration) -> Self {
        Self { model, taxonomy, timeout }
    }

    /// Never fails: every problem degrades to the taxonomy's default map.
    pub async fn classify(&self, query: &str) -> Classification {
        let prompt = build_prompt(query, &self.taxonomy);

        if !self.model.is_configured() {
            return self.fallback(prompt, None, MapRejection::NotConfigured);
        }

        let response = match complete_within(self.model, &prompt, self.timeout).await {
            Ok(text) => text,
            Err(e) => return self.fallback(prompt, None, MapRejection::CallFailed(e.to_string())),
        };
        tracing::debug!("Classifier response: {}", response);

        match decode_category_map(&response, &self.taxonomy) {
            Ok(map) => {
                tracing::info!("Classified {:?} into {:?}", query, map.categories().collect::<Vec<_>>());
                Classification { map, prompt, response: Some(response), fallback_reason: None }
            }
            Err(rejection) => self.fallback(prompt, Some(response), rejection),
        }
    }

    fn fallback(&self, prompt: String, response: Option<String>, rejection: MapRejection) -> Classification {
        tracing::warn!("Using default categories: {}", rejection);
        Classification {
            map: self.taxonomy.default_map(),
            prompt,
            response,
            fallback_reason: Some(rejection.to_string()),
        }
    }
}

pub fn build_prompt(query: &str, taxonomy: &Taxonomy) -> String {
    let mut prompt = format!(
        "You are an expert research librarian. Classify the research query below into arXiv subject categories.\n\n\
         Query: \"{}\"\n\nAvailable main categories and their subcategory codes:\n",
        query.trim()
    );
    for category in taxonomy.categories() {
        prompt.push_str(&format!("- {}: {}\n", category.name, category.codes().collect::<Vec<_>>().join(", ")));
    }
    prompt.push_str(&format!(
        "\nChoose exactly {MAP_CATEGORIES} main categories most relevant to the query. For each, choose exactly \
         {MAP_SUBCATEGORIES} subcategory codes from that category's list.\n\
         Respond with a single JSON object whose keys are the main category names and whose values are arrays of \
         subcategory codes, for example:\n\
         {{\"Computer Science\": [\"cs.AI\", \"cs.LG\", \"cs.CL\"], \"Statistics\": [\"stat.ML\", \"stat.ME\", \"stat.CO\"], \
         \"Mathematics\": [\"math.OC\", \"math.PR\", \"math.ST\"]}}\n\
         Return only the JSON object."
    ));
    prompt
}

/// Returns the first balanced `{...}` object in `text`, ignoring braces
/// inside JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decodes and validates a classifier reply.
///
/// The top-level shape must be exactly right or the whole reply is rejected;
/// only the subcategory lists of an accepted shape are repaired.
pub fn decode_category_map(response: &str, taxonomy: &Taxonomy) -> Result<CategoryMap, MapRejection> {
    let raw = extract_json_object(response).ok_or(MapRejection::NoJsonObject)?;
    let value: Value = serde_json::from_str(raw).map_err(|e| MapRejection::MalformedJson(e.to_string()))?;
    let object = value.as_object().ok_or(MapRejection::NotAnObject)?;
    if object.len() != MAP_CATEGORIES {
        return Err(MapRejection::WrongKeyCount(object.len()));
    }

    let mut checked: Vec<(&'static MainCategory, &Vec<Value>)> = Vec::with_capacity(MAP_CATEGORIES);
    for (key, codes) in object {
        let category = taxonomy
            .category(key)
            .ok_or_else(|| MapRejection::UnknownCategory(key.clone()))?;
        if checked.iter().any(|(seen, _)| seen.name == category.name) {
            return Err(MapRejection::DuplicateCategory(category.name.to_string()));
        }
        let codes = codes.as_array().ok_or_else(|| MapRejection::NotAList(key.clone()))?;
        checked.push((category, codes));
    }

    let entries = checked
        .into_iter()
        .map(|(category, codes)| CategoryEntry {
            category: category.name.to_string(),
            subcategories: repair_subcategories(taxonomy, category, codes),
        })
        .collect();
    Ok(CategoryMap::from_entries(entries))
}

/// Brings a subcategory list to exactly [`MAP_SUBCATEGORIES`] valid, distinct
/// codes of `category`. Invalid entries are dropped and the gaps filled with
/// the first unused codes in taxonomy order, defaults first.
fn repair_subcategories(taxonomy: &Taxonomy, category: &MainCategory, codes: &[Value]) -> Vec<String> {
    let mut chosen: Vec<&'static str> = Vec::with_capacity(MAP_SUBCATEGORIES);
    let mut replaced = 0usize;

    for raw in codes {
        let resolved = raw.as_str().and_then(|s| taxonomy.resolve_subcategory(category, s));
        match resolved {
            Some(code) if chosen.contains(&code) => {}
            Some(code) => chosen.push(code),
            None => replaced += 1,
        }
    }

    if chosen.len() > MAP_SUBCATEGORIES {
        chosen.truncate(MAP_SUBCATEGORIES);
    }
    for code in category.codes() {
        if chosen.len() == MAP_SUBCATEGORIES {
            break;
        }
        if !chosen.contains(&code) {
            chosen.push(code);
        }
    }

    if replaced > 0 {
        tracing::debug!("Replaced {} invalid subcategories under {}", replaced, category.name);
    }
    chosen.into_iter().map(str::to_string).collect()
}
