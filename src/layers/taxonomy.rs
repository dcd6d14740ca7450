// Static arXiv subject taxonomy used for classification, repair and regrouping.
use strsim::normalized_levenshtein;

use crate::layers::{CategoryEntry, CategoryMap};

/// Minimum similarity for a human-readable name to count as a near-miss.
const NAME_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Number of main categories and subcategories per category in a map.
pub const MAP_CATEGORIES: usize = 3;
pub const MAP_SUBCATEGORIES: usize = 3;

#[derive(Debug)]
pub struct Subcategory {
    pub code: &'static str,
    pub name: &'static str,
}

/// A main category. The first [`MAP_SUBCATEGORIES`] entries are its defaults.
#[derive(Debug)]
pub struct MainCategory {
    pub name: &'static str,
    pub subcategories: &'static [Subcategory],
}

impl MainCategory {
    pub fn codes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.subcategories.iter().map(|s| s.code)
    }

    pub fn default_codes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codes().take(MAP_SUBCATEGORIES)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.subcategories.iter().any(|s| s.code == code)
    }
}

macro_rules! subcategories {
    ($($code:literal => $name:literal),+ $(,)?) => {
        &[$(Subcategory { code: $code, name: $name }),+]
    };
}

static ARXIV: &[MainCategory] = &[
    MainCategory {
        name: "Computer Science",
        subcategories: subcategories![
            "cs.AI" => "Artificial Intelligence",
            "cs.LG" => "Machine Learning",
            "cs.CL" => "Computation and Language",
            "cs.CV" => "Computer Vision and Pattern Recognition",
            "cs.CR" => "Cryptography and Security",
            "cs.DS" => "Data Structures and Algorithms",
            "cs.DC" => "Distributed, Parallel, and Cluster Computing",
            "cs.ET" => "Emerging Technologies",
            "cs.HC" => "Human-Computer Interaction",
            "cs.IR" => "Information Retrieval",
            "cs.IT" => "Information Theory",
            "cs.NE" => "Neural and Evolutionary Computing",
            "cs.PL" => "Programming Languages",
            "cs.RO" => "Robotics",
            "cs.SE" => "Software Engineering",
        ],
    },
    MainCategory {
        name: "Physics",
        subcategories: subcategories![
            "quant-ph" => "Quantum Physics",
            "hep-th" => "High Energy Physics - Theory",
            "cond-mat.mes-hall" => "Mesoscale and Nanoscale Physics",
            "hep-ph" => "High Energy Physics - Phenomenology",
            "hep-ex" => "High Energy Physics - Experiment",
            "gr-qc" => "General Relativity and Quantum Cosmology",
            "cond-mat.str-el" => "Strongly Correlated Electrons",
            "cond-mat.stat-mech" => "Statistical Mechanics",
            "cond-mat.supr-con" => "Superconductivity",
            "physics.optics" => "Optics",
            "physics.comp-ph" => "Computational Physics",
            "astro-ph.CO" => "Cosmology and Nongalactic Astrophysics",
            "astro-ph.GA" => "Astrophysics of Galaxies",
            "astro-ph.HE" => "High Energy Astrophysical Phenomena",
            "nucl-th" => "Nuclear Theory",
        ],
    },
    MainCategory {
        name: "Mathematics",
        subcategories: subcategories![
            "math.CO" => "Combinatorics",
            "math.PR" => "Probability",
            "math.OC" => "Optimization and Control",
            "math.AG" => "Algebraic Geometry",
            "math.NT" => "Number Theory",
            "math.ST" => "Statistics Theory",
            "math.NA" => "Numerical Analysis",
            "math.LO" => "Logic",
            "math.DS" => "Dynamical Systems",
            "math.AP" => "Analysis of PDEs",
            "math.QA" => "Quantum Algebra",
            "math.MP" => "Mathematical Physics",
        ],
    },
    MainCategory {
        name: "Statistics",
        subcategories: subcategories![
            "stat.ML" => "Machine Learning (Statistics)",
            "stat.ME" => "Methodology",
            "stat.AP" => "Applications",
            "stat.CO" => "Computation",
            "stat.TH" => "Statistics Theory (Statistics)",
        ],
    },
    MainCategory {
        name: "Quantitative Biology",
        subcategories: subcategories![
            "q-bio.NC" => "Neurons and Cognition",
            "q-bio.QM" => "Quantitative Methods",
            "q-bio.GN" => "Genomics",
            "q-bio.BM" => "Biomolecules",
            "q-bio.PE" => "Populations and Evolution",
            "q-bio.MN" => "Molecular Networks",
        ],
    },
    MainCategory {
        name: "Quantitative Finance",
        subcategories: subcategories![
            "q-fin.CP" => "Computational Finance",
            "q-fin.MF" => "Mathematical Finance",
            "q-fin.PM" => "Portfolio Management",
            "q-fin.RM" => "Risk Management",
            "q-fin.ST" => "Statistical Finance",
            "q-fin.TR" => "Trading and Market Microstructure",
        ],
    },
    MainCategory {
        name: "Electrical Engineering and Systems Science",
        subcategories: subcategories![
            "eess.SP" => "Signal Processing",
            "eess.SY" => "Systems and Control",
            "eess.IV" => "Image and Video Processing",
            "eess.AS" => "Audio and Speech Processing",
        ],
    },
    MainCategory {
        name: "Economics",
        subcategories: subcategories![
            "econ.EM" => "Econometrics",
            "econ.GN" => "General Economics",
            "econ.TH" => "Theoretical Economics",
        ],
    },
];

/// Topic names for arXiv archives that span several subcategories, with the
/// code prefix they cover.
const ARCHIVE_TOPICS: &[(&str, &str)] = &[
    ("Astrophysics", "astro-ph"),
    ("Condensed Matter", "cond-mat"),
    ("High Energy Physics", "hep-"),
];

/// Main categories of the map used whenever classification is unavailable.
const DEFAULT_MAP_CATEGORIES: [&str; MAP_CATEGORIES] = ["Physics", "Computer Science", "Mathematics"];

#[derive(Debug, Clone, Copy)]
pub struct Taxonomy {
    categories: &'static [MainCategory],
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::arxiv()
    }
}

impl Taxonomy {
    pub fn arxiv() -> Self {
        Self { categories: ARXIV }
    }

    pub fn categories(&self) -> &'static [MainCategory] {
        self.categories
    }

    /// Canonical main category for `name`, ignoring ASCII case.
    pub fn category(&self, name: &str) -> Option<&'static MainCategory> {
        let name = name.trim();
        self.categories.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, category: &str, code: &str) -> bool {
        self.category(category).is_some_and(|c| c.contains(code))
    }

    /// Main category owning the subcategory `code`.
    pub fn owner_of(&self, code: &str) -> Option<&'static str> {
        self.categories.iter().find(|c| c.contains(code)).map(|c| c.name)
    }

    /// Subcategory code for a human-readable subcategory name.
    pub fn code_for_name(&self, name: &str) -> Option<&'static str> {
        let name = name.trim();
        self.categories
            .iter()
            .flat_map(|c| c.subcategories.iter())
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.code)
    }

    /// Maps a raw model-supplied entry to a valid code of `category`.
    ///
    /// Accepts the code itself (any case), the subcategory's name, or a name
    /// close enough to pass [`NAME_SIMILARITY_THRESHOLD`].
    pub fn resolve_subcategory(&self, category: &MainCategory, raw: &str) -> Option<&'static str> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(sub) = category.subcategories.iter().find(|s| s.code.eq_ignore_ascii_case(raw)) {
            return Some(sub.code);
        }
        if let Some(sub) = category.subcategories.iter().find(|s| s.name.eq_ignore_ascii_case(raw)) {
            return Some(sub.code);
        }
        closest_name(category.subcategories.iter(), raw).map(|s| s.code)
    }

    /// Category codes a topic display name stands for.
    ///
    /// A main category name expands to all of its codes; a subcategory name or
    /// code yields that single code.
    pub fn resolve_topic(&self, topic: &str) -> Vec<&'static str> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Vec::new();
        }
        if let Some(category) = self.category(topic) {
            return category.codes().collect();
        }
        let all = || self.categories.iter().flat_map(|c| c.subcategories.iter());
        if let Some(sub) = all().find(|s| s.code.eq_ignore_ascii_case(topic)) {
            return vec![sub.code];
        }
        if let Some(codes) = self.archive_codes(topic) {
            return codes;
        }
        if let Some(code) = self.code_for_name(topic) {
            return vec![code];
        }
        closest_name(all(), topic).map(|s| vec![s.code]).unwrap_or_default()
    }

    /// Every code under an archive, named either by its topic name or its
    /// archive code (`astro-ph`).
    fn archive_codes(&self, topic: &str) -> Option<Vec<&'static str>> {
        let prefix = ARCHIVE_TOPICS
            .iter()
            .find(|(name, prefix)| {
                name.eq_ignore_ascii_case(topic) || prefix.trim_end_matches('-').eq_ignore_ascii_case(topic)
            })
            .map(|(_, prefix)| *prefix)?;
        let codes: Vec<&'static str> = self
            .categories
            .iter()
            .flat_map(|c| c.codes())
            .filter(|code| code.starts_with(prefix))
            .collect();
        (!codes.is_empty()).then_some(codes)
    }

    pub fn default_map(&self) -> CategoryMap {
        let entries = DEFAULT_MAP_CATEGORIES
            .iter()
            .filter_map(|name| self.category(name))
            .map(|c| CategoryEntry {
                category: c.name.to_string(),
                subcategories: c.default_codes().map(str::to_string).collect(),
            })
            .collect();
        CategoryMap::from_entries(entries)
    }
}

fn closest_name<'a>(candidates: impl Iterator<Item = &'a Subcategory>, raw: &str) -> Option<&'a Subcategory> {
    let raw = raw.to_lowercase();
    candidates
        .map(|s| (s, normalized_levenshtein(&raw, &s.name.to_lowercase())))
        .filter(|(_, similarity)| *similarity >= NAME_SIMILARITY_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, _)| s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_enough_defaults() {
        for category in Taxonomy::arxiv().categories() {
            assert!(category.subcategories.len() >= MAP_SUBCATEGORIES, "{}", category.name);
        }
    }

    #[test]
    fn codes_are_unique_across_categories() {
        let taxonomy = Taxonomy::arxiv();
        let mut seen = std::collections::HashSet::new();
        for category in taxonomy.categories() {
            for code in category.codes() {
                assert!(seen.insert(code), "duplicate code {code}");
                assert_eq!(taxonomy.owner_of(code), Some(category.name));
            }
        }
    }

    #[test]
    fn default_map_is_physics_cs_math() {
        let map = Taxonomy::arxiv().default_map();
        let categories: Vec<_> = map.categories().collect();
        assert_eq!(categories, ["Physics", "Computer Science", "Mathematics"]);
        assert_eq!(map.subcategories("Physics").unwrap(), ["quant-ph", "hep-th", "cond-mat.mes-hall"]);
        assert_eq!(map.subcategories("Computer Science").unwrap(), ["cs.AI", "cs.LG", "cs.CL"]);
        assert_eq!(map.subcategories("Mathematics").unwrap(), ["math.CO", "math.PR", "math.OC"]);
    }

    #[test]
    fn resolves_names_and_near_misses() {
        let taxonomy = Taxonomy::arxiv();
        let cs = taxonomy.category("computer science").unwrap();
        assert_eq!(taxonomy.resolve_subcategory(cs, "cs.ai"), Some("cs.AI"));
        assert_eq!(taxonomy.resolve_subcategory(cs, "Machine Learning"), Some("cs.LG"));
        assert_eq!(taxonomy.resolve_subcategory(cs, "Machine Lerning"), Some("cs.LG"));
        assert_eq!(taxonomy.resolve_subcategory(cs, "quant-ph"), None);
        assert_eq!(taxonomy.resolve_subcategory(cs, "Gardening"), None);
    }

    #[test]
    fn topics_expand_main_categories() {
        let taxonomy = Taxonomy::arxiv();
        assert_eq!(taxonomy.resolve_topic("Quantum Physics"), ["quant-ph"]);
        assert_eq!(taxonomy.resolve_topic("cs.LG"), ["cs.LG"]);
        assert_eq!(taxonomy.resolve_topic("Economics").len(), 3);
        assert!(taxonomy.resolve_topic("Underwater Basket Weaving").is_empty());
    }

    #[test]
    fn browser_topic_names_all_resolve() {
        let taxonomy = Taxonomy::arxiv();
        assert_eq!(taxonomy.resolve_topic("Artificial Intelligence"), ["cs.AI"]);
        assert_eq!(taxonomy.resolve_topic("Machine Learning"), ["cs.LG"]);
        assert_eq!(taxonomy.resolve_topic("Quantum Physics"), ["quant-ph"]);
        assert_eq!(taxonomy.resolve_topic("Astrophysics"), ["astro-ph.CO", "astro-ph.GA", "astro-ph.HE"]);
        assert_eq!(
            taxonomy.resolve_topic("condensed matter"),
            ["cond-mat.mes-hall", "cond-mat.str-el", "cond-mat.stat-mech", "cond-mat.supr-con"]
        );
        assert_eq!(taxonomy.resolve_topic("High Energy Physics"), ["hep-th", "hep-ph", "hep-ex"]);
        assert_eq!(taxonomy.resolve_topic("astro-ph").len(), 3);
    }
}
