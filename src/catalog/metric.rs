//! Catalog metric entries.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::{CandidateSource, MetricCandidate};

/// Maximum length of a short code, in characters
pub const MAX_SHORT_CODE_LEN: usize = 20;

/// How a metric's value is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Direct,
    Ratio,
    Custom,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [MetricKind::Direct, MetricKind::Ratio, MetricKind::Custom];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Direct => "direct",
            MetricKind::Ratio => "ratio",
            MetricKind::Custom => "custom",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(MetricKind::Direct),
            "ratio" => Ok(MetricKind::Ratio),
            "custom" => Ok(MetricKind::Custom),
            other => Err(format!("unknown metric type: {other:?}")),
        }
    }
}

/// Kind-specific definition of a catalog metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricDefinition {
    Direct { value: String },
    Ratio { numerator: String, denominator: String },
    Custom { expression: String },
}

impl MetricDefinition {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricDefinition::Direct { .. } => MetricKind::Direct,
            MetricDefinition::Ratio { .. } => MetricKind::Ratio,
            MetricDefinition::Custom { .. } => MetricKind::Custom,
        }
    }
}

impl From<&CandidateSource> for MetricDefinition {
    fn from(source: &CandidateSource) -> Self {
        match source {
            CandidateSource::Direct { value } => MetricDefinition::Direct {
                value: value.clone(),
            },
            CandidateSource::Ratio {
                numerator,
                denominator,
            } => MetricDefinition::Ratio {
                numerator: numerator.clone(),
                denominator: denominator.clone(),
            },
            CandidateSource::Custom { expression } => MetricDefinition::Custom {
                expression: expression.clone(),
            },
        }
    }
}

/// A metric persisted in the catalog file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMetric {
    pub category: String,
    pub name: String,
    pub short_code: String,
    pub definition: MetricDefinition,
    pub multiplier: Option<i64>,
    pub description: Option<String>,
    pub source_model: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogMetric {
    /// Convert an accepted candidate, stamping both timestamps with `now`
    pub fn from_candidate(candidate: &MetricCandidate, now: DateTime<Utc>) -> Self {
        CatalogMetric {
            category: candidate
                .category
                .clone()
                .unwrap_or_else(|| crate::discovery::UNCATEGORIZED.to_string()),
            name: candidate.suggested_name.clone(),
            short_code: candidate.suggested_short_code.clone(),
            definition: MetricDefinition::from(&candidate.source),
            multiplier: candidate.multiplier,
            description: candidate.description.clone(),
            source_model: Some(candidate.source_model.clone()),
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.definition.kind()
    }

    /// Replace the fields a candidate carries. Tags and `created_at` are kept.
    pub fn apply_candidate(&mut self, candidate: &MetricCandidate, now: DateTime<Utc>) {
        if let Some(category) = &candidate.category {
            self.category = category.clone();
        }
        self.name = candidate.suggested_name.clone();
        self.definition = MetricDefinition::from(&candidate.source);
        self.multiplier = candidate.multiplier;
        self.description = candidate.description.clone();
        self.source_model = Some(candidate.source_model.clone());
        self.touch(now);
    }

    /// Record a mutation
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Human-readable validation errors; empty when the metric is valid
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Name is required".to_string());
        }

        if self.short_code.trim().is_empty() {
            errors.push("Short code is required".to_string());
        } else if self.short_code.chars().count() > MAX_SHORT_CODE_LEN {
            errors.push(format!(
                "Short code '{}' exceeds {MAX_SHORT_CODE_LEN} characters",
                self.short_code
            ));
        }

        match &self.definition {
            MetricDefinition::Direct { value } => {
                if value.trim().is_empty() {
                    errors.push("Direct metrics require a value column".to_string());
                }
            }
            MetricDefinition::Ratio {
                numerator,
                denominator,
            } => {
                if numerator.trim().is_empty() || denominator.trim().is_empty() {
                    errors.push("Ratio metrics require numerator and denominator".to_string());
                } else if numerator == denominator {
                    errors.push("Ratio numerator and denominator must differ".to_string());
                }
            }
            MetricDefinition::Custom { expression } => {
                if expression.trim().is_empty() {
                    errors.push("Custom metrics require an expression".to_string());
                }
            }
        }

        errors
    }
}
