//! Catalog statistics for the dashboard.

use std::collections::{BTreeMap, BTreeSet};

use super::metric::{CatalogMetric, MetricKind};
use crate::data::Model;

/// Counts over a catalog, optionally related to the project's rollup models
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSummary {
    pub total: usize,
    pub by_kind: BTreeMap<MetricKind, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_model: BTreeMap<String, usize>,
    pub total_models: usize,
    pub models_with_metrics: usize,
}

impl CatalogSummary {
    pub fn new(metrics: &[CatalogMetric], models: &[Model]) -> Self {
        let mut summary = CatalogSummary {
            total: metrics.len(),
            total_models: models.len(),
            ..CatalogSummary::default()
        };

        for kind in MetricKind::ALL {
            summary.by_kind.insert(kind, 0);
        }

        for metric in metrics {
            *summary.by_kind.entry(metric.kind()).or_default() += 1;
            *summary.by_category.entry(metric.category.clone()).or_default() += 1;
            let model = metric.source_model.as_deref().unwrap_or("unknown");
            *summary.by_model.entry(model.to_string()).or_default() += 1;
        }

        let covered: BTreeSet<&str> = metrics
            .iter()
            .filter_map(|m| m.source_model.as_deref())
            .collect();
        summary.models_with_metrics = models
            .iter()
            .filter(|m| covered.contains(m.name.as_str()))
            .count();

        summary
    }

    /// Percentage of rollup models with at least one metric
    pub fn coverage_percentage(&self) -> f64 {
        if self.total_models == 0 {
            return 0.0;
        }
        self.models_with_metrics as f64 / self.total_models as f64 * 100.0
    }
}
