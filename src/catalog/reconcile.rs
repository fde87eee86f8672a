//! Merging accepted candidates into an existing catalog.
//!
//! The merge never removes or reorders entries it does not touch. Overwritten
//! entries stay where they were; new entries are appended in acceptance order.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metric::CatalogMetric;
use crate::discovery::{MetricCandidate, ShortCodeAllocator};

/// What to do when an accepted candidate's short code is already in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Skip,
    Overwrite,
    Rename,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "rename" => Ok(ConflictPolicy::Rename),
            other => Err(format!("unknown conflict policy: {other:?}")),
        }
    }
}

/// One decision taken during a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAction {
    Inserted { short_code: String },
    Skipped { short_code: String },
    Overwritten { short_code: String },
    Renamed { from: String, to: String },
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeAction::Inserted { short_code } => write!(f, "insert {short_code}"),
            MergeAction::Skipped { short_code } => write!(f, "skip {short_code}"),
            MergeAction::Overwritten { short_code } => write!(f, "overwrite {short_code}"),
            MergeAction::Renamed { from, to } => write!(f, "rename {from} -> {to}"),
        }
    }
}

/// Result of a merge
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub result: Vec<CatalogMetric>,
    pub applied: Vec<MergeAction>,
    /// Short codes of accepted candidates that collided with an entry
    pub conflicts: Vec<String>,
}

impl MergeOutcome {
    pub fn inserted(&self) -> usize {
        self.applied
            .iter()
            .filter(|a| matches!(a, MergeAction::Inserted { .. } | MergeAction::Renamed { .. }))
            .count()
    }

    /// Whether the merge changed anything worth persisting
    pub fn is_changed(&self) -> bool {
        self.applied
            .iter()
            .any(|a| !matches!(a, MergeAction::Skipped { .. }))
    }
}

/// Merge `accepted` into `existing` using the current time for new timestamps
pub fn merge(
    existing: &[CatalogMetric],
    accepted: &[MetricCandidate],
    policy: ConflictPolicy,
) -> MergeOutcome {
    merge_at(existing, accepted, policy, Utc::now())
}

/// Merge with an explicit timestamp for created and updated entries
pub fn merge_at(
    existing: &[CatalogMetric],
    accepted: &[MetricCandidate],
    policy: ConflictPolicy,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let mut result = existing.to_vec();
    // Short code -> position in `result`. Later duplicates in a malformed
    // catalog never shadow the first entry.
    let mut index: HashMap<String, usize> = HashMap::new();
    for (pos, metric) in result.iter().enumerate() {
        index.entry(metric.short_code.clone()).or_insert(pos);
    }

    let mut applied = Vec::with_capacity(accepted.len());
    let mut conflicts = Vec::new();

    for candidate in accepted {
        let code = &candidate.suggested_short_code;

        let Some(&pos) = index.get(code) else {
            index.insert(code.clone(), result.len());
            result.push(CatalogMetric::from_candidate(candidate, now));
            applied.push(MergeAction::Inserted {
                short_code: code.clone(),
            });
            continue;
        };

        conflicts.push(code.clone());

        match policy {
            ConflictPolicy::Skip => applied.push(MergeAction::Skipped {
                short_code: code.clone(),
            }),
            ConflictPolicy::Overwrite => {
                result[pos].apply_candidate(candidate, now);
                applied.push(MergeAction::Overwritten {
                    short_code: code.clone(),
                });
            }
            ConflictPolicy::Rename => {
                let mut allocator = ShortCodeAllocator::with_taken(index.keys().cloned());
                let renamed = allocator.allocate(code);

                let mut metric = CatalogMetric::from_candidate(candidate, now);
                metric.short_code = renamed.clone();
                index.insert(renamed.clone(), result.len());
                result.push(metric);
                applied.push(MergeAction::Renamed {
                    from: code.clone(),
                    to: renamed,
                });
            }
        }
    }

    MergeOutcome {
        result,
        applied,
        conflicts,
    }
}

/// Remove entries by short code. Returns the remaining catalog and the number removed.
pub fn remove(existing: &[CatalogMetric], short_codes: &[String]) -> (Vec<CatalogMetric>, usize) {
    let remaining: Vec<CatalogMetric> = existing
        .iter()
        .filter(|m| !short_codes.contains(&m.short_code))
        .cloned()
        .collect();
    let removed = existing.len() - remaining.len();
    (remaining, removed)
}
