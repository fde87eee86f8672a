//! Whole-catalog validation.

use std::collections::{BTreeSet, HashSet};

use super::metric::CatalogMetric;

/// Outcome of validating a catalog before it is persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub row_count: usize,
    pub duplicate_short_codes: Vec<String>,
    pub duplicate_names: Vec<String>,
}

impl CatalogValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn duplicates<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut dups = BTreeSet::new();
    for value in values {
        if !seen.insert(value) {
            dups.insert(value.to_string());
        }
    }
    dups.into_iter().collect()
}

/// Check every metric plus the catalog-wide short code uniqueness
pub fn validate_catalog(metrics: &[CatalogMetric]) -> CatalogValidation {
    let mut validation = CatalogValidation {
        row_count: metrics.len(),
        ..CatalogValidation::default()
    };

    for (i, metric) in metrics.iter().enumerate() {
        validation
            .errors
            .extend(metric.validate().into_iter().map(|e| format!("Row {}: {e}", i + 1)));
    }

    validation.duplicate_short_codes = duplicates(metrics.iter().map(|m| m.short_code.as_str()));
    if !validation.duplicate_short_codes.is_empty() {
        validation.errors.push(format!(
            "Duplicate short codes: {}",
            validation.duplicate_short_codes.join(", ")
        ));
    }

    // Names are display labels; repeating one is allowed but suspicious
    validation.duplicate_names = duplicates(metrics.iter().map(|m| m.name.as_str()));
    if !validation.duplicate_names.is_empty() {
        validation.warnings.push(format!(
            "Duplicate metric names: {}",
            validation.duplicate_names.join(", ")
        ));
    }

    validation
}
