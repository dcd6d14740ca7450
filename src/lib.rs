pub mod config;
pub mod layers;

pub use config::Config;
pub use layers::pipeline::{Degradation, Pipeline, SearchOutcome};
pub use layers::{CategoryGroups, CategoryMap, Paper, Provenance, SearchResult};
