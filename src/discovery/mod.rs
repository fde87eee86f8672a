//! Metric discovery: classify model columns by naming convention and turn them
//! into metric candidates.
//!
//! Nothing in here performs I/O or logs; callers pass models and the current
//! catalog in and report on the structured results they get back.

mod candidate;
mod engine;
mod matcher;
mod pairing;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use candidate::ScoringWeights;
use matcher::PatternSettings;

pub use candidate::{CandidateSource, MetricCandidate, ShortCodeAllocator, UNCATEGORIZED};
pub use engine::{DiscoveryEngine, DiscoveryResult};

/// Columns that never hold metrics
pub const DEFAULT_SYSTEM_COLUMNS: [&str; 7] = [
    "id",
    "created_at",
    "updated_at",
    "_fivetran_synced",
    "_dbt_source_relation",
    "_dbt_copied_at",
    "etl_updated",
];

/// Everything that shapes a discovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub patterns: PatternSettings,
    pub weights: ScoringWeights,
    pub system_columns: BTreeSet<String>,
    pub rollup_prefix: String,
    /// Model name token -> category
    pub category_synonyms: BTreeMap<String, String>,
    /// Multiplier given to ratio candidates (100 = percentage)
    pub default_multiplier: i64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        DiscoverySettings {
            patterns: PatternSettings::default(),
            weights: ScoringWeights::default(),
            system_columns: DEFAULT_SYSTEM_COLUMNS.iter().map(|s| s.to_string()).collect(),
            rollup_prefix: "rollup_".to_string(),
            category_synonyms: BTreeMap::new(),
            default_multiplier: 100,
        }
    }
}
