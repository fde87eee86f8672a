//! Discovery over one model or a batch of models.
//!
//! Per-model work (filtering, classification, pairing, candidate building) is
//! independent and runs in parallel for batches. Short codes are allocated
//! afterwards in a single pass in model order, so a batch assigns exactly the
//! codes that analysing the models one after another would.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rayon::prelude::*;
use serde::Serialize;

use super::candidate::{CandidateBuilder, MetricCandidate, ShortCodeAllocator};
use super::matcher::{Classification, ColumnKind, PatternError, PatternRules};
use super::pairing::pair_by;
use super::DiscoverySettings;
use crate::catalog::{CatalogMetric, MetricKind};
use crate::data::Model;

/// What happened to a single column during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOutcome {
    /// Bookkeeping column filtered out before classification
    System,
    Unmatched,
    Matched(ColumnKind),
}

/// A ratio column without a counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanColumn {
    pub column: String,
    pub kind: ColumnKind,
}

/// Discovery output for one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryResult {
    pub model_name: String,
    /// Direct candidates in column order, then ratio candidates by stem
    pub candidates: Vec<MetricCandidate>,
    pub total_columns: usize,
    pub matched_columns: usize,
    pub confidence_by_short_code: BTreeMap<String, f64>,
    pub orphans: Vec<OrphanColumn>,
    pub column_analysis: BTreeMap<String, ColumnOutcome>,
}

impl DiscoveryResult {
    /// Candidates whose short code is not in the catalog yet
    pub fn new_candidates(&self) -> impl Iterator<Item = &MetricCandidate> {
        self.candidates.iter().filter(|c| !c.already_exists)
    }

    /// Drop candidates scored below `min_confidence`
    pub fn retain_confident(&mut self, min_confidence: f64) {
        self.candidates.retain(|c| c.confidence >= min_confidence);
        self.confidence_by_short_code
            .retain(|_, confidence| *confidence >= min_confidence);
    }

    /// Mean candidate confidence with a small boost for models yielding several metrics
    pub fn overall_confidence(&self) -> f64 {
        if self.candidates.is_empty() {
            return 0.0;
        }
        let n = self.candidates.len() as f64;
        let mean = self.candidates.iter().map(|c| c.confidence).sum::<f64>() / n;
        let count_boost = (0.05 * n).min(0.2);
        (mean + count_boost).clamp(0.0, 1.0)
    }

    /// Summary lines for the operator
    pub fn notes(&self) -> Vec<String> {
        let mut notes = Vec::new();

        if self.candidates.is_empty() {
            notes.push("No metric candidates found".to_string());
        } else {
            let count = |kind: MetricKind| self.candidates.iter().filter(|c| c.kind() == kind).count();
            notes.push(format!(
                "Found {} candidates ({} direct, {} ratio)",
                self.candidates.len(),
                count(MetricKind::Direct),
                count(MetricKind::Ratio)
            ));
        }

        let existing = self.candidates.iter().filter(|c| c.already_exists).count();
        if existing > 0 {
            notes.push(format!("{existing} already in the catalog"));
        }

        for orphan in &self.orphans {
            let missing = match orphan.kind {
                ColumnKind::RatioNumerator => "denominator",
                _ => "numerator",
            };
            notes.push(format!("{} has no matching {missing}", orphan.column));
        }

        let system = self
            .column_analysis
            .values()
            .filter(|o| **o == ColumnOutcome::System)
            .count();
        notes.push(format!(
            "Analyzed {} columns ({} matched, {} system)",
            self.total_columns, self.matched_columns, system
        ));

        notes
    }
}

/// Per-model work that does not depend on other models
#[derive(Debug)]
struct ModelClassification {
    model_name: String,
    drafts: Vec<MetricCandidate>,
    total_columns: usize,
    matched_columns: usize,
    orphans: Vec<OrphanColumn>,
    column_analysis: BTreeMap<String, ColumnOutcome>,
}

/// Classifies model columns and turns them into metric candidates
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    rules: PatternRules,
    builder: CandidateBuilder,
    system_columns: BTreeSet<String>,
}

impl DiscoveryEngine {
    /// Build an engine; fails if a pattern rule does not compile
    pub fn new(settings: &DiscoverySettings) -> Result<Self, PatternError> {
        Ok(DiscoveryEngine {
            rules: PatternRules::new(&settings.patterns)?,
            builder: CandidateBuilder::new(
                settings.weights.clone(),
                &settings.rollup_prefix,
                settings.category_synonyms.clone(),
                settings.default_multiplier,
            ),
            system_columns: settings.system_columns.clone(),
        })
    }

    pub fn is_system_column(&self, column: &str) -> bool {
        self.system_columns.contains(column)
    }

    /// Analyze one model against a read-only catalog snapshot
    pub fn analyze(&self, model: &Model, catalog: &[CatalogMetric]) -> DiscoveryResult {
        let catalog_codes = catalog_codes(catalog);
        let mut allocator = ShortCodeAllocator::new();
        self.finish(self.classify_model(model), &mut allocator, &catalog_codes)
    }

    /// Analyze a batch. Later models see the short codes given to earlier ones.
    pub fn analyze_all(&self, models: &[Model], catalog: &[CatalogMetric]) -> Vec<DiscoveryResult> {
        let classified: Vec<ModelClassification> = models
            .par_iter()
            .map(|model| self.classify_model(model))
            .collect();

        let catalog_codes = catalog_codes(catalog);
        let mut allocator = ShortCodeAllocator::new();
        classified
            .into_iter()
            .map(|c| self.finish(c, &mut allocator, &catalog_codes))
            .collect()
    }

    fn classify_model(&self, model: &Model) -> ModelClassification {
        let mut seen = HashSet::new();
        let mut column_analysis = BTreeMap::new();
        let mut drafts = Vec::new();
        let mut numerators = BTreeSet::new();
        let mut denominators = BTreeSet::new();
        let mut matched_columns = 0;

        for column in model.column_names() {
            if column.is_empty() || !seen.insert(column) {
                continue;
            }

            if self.is_system_column(column) {
                column_analysis.insert(column.to_string(), ColumnOutcome::System);
                continue;
            }

            let Classification::Matched(kind) = self.rules.classify(column) else {
                column_analysis.insert(column.to_string(), ColumnOutcome::Unmatched);
                continue;
            };

            matched_columns += 1;
            column_analysis.insert(column.to_string(), ColumnOutcome::Matched(kind));

            match kind {
                ColumnKind::DirectValue | ColumnKind::DirectCount => {
                    let stem = self.rules.stem(column, kind);
                    drafts.push(self.builder.build_direct(column, kind, stem, &model.name));
                }
                ColumnKind::RatioNumerator => {
                    numerators.insert(column.to_string());
                }
                ColumnKind::RatioDenominator => {
                    denominators.insert(column.to_string());
                }
            }
        }

        let pairing = pair_by(&numerators, &denominators, |column, kind| {
            self.rules.stem(column, kind).to_string()
        });

        for pair in &pairing.pairs {
            drafts.push(self.builder.build_ratio(
                &pair.numerator,
                &pair.denominator,
                &pair.stem,
                &model.name,
            ));
        }

        let orphans = pairing
            .orphan_numerators
            .into_iter()
            .map(|column| OrphanColumn {
                column,
                kind: ColumnKind::RatioNumerator,
            })
            .chain(
                pairing
                    .orphan_denominators
                    .into_iter()
                    .map(|column| OrphanColumn {
                        column,
                        kind: ColumnKind::RatioDenominator,
                    }),
            )
            .collect();

        ModelClassification {
            model_name: model.name.clone(),
            drafts,
            total_columns: seen.len(),
            matched_columns,
            orphans,
            column_analysis,
        }
    }

    fn finish(
        &self,
        classification: ModelClassification,
        allocator: &mut ShortCodeAllocator,
        catalog_codes: &HashSet<&str>,
    ) -> DiscoveryResult {
        let mut candidates = classification.drafts;
        let mut confidence_by_short_code = BTreeMap::new();

        for candidate in &mut candidates {
            candidate.suggested_short_code = allocator.allocate(&candidate.suggested_short_code);
            candidate.already_exists = catalog_codes.contains(candidate.suggested_short_code.as_str());
            confidence_by_short_code.insert(candidate.suggested_short_code.clone(), candidate.confidence);
        }

        DiscoveryResult {
            model_name: classification.model_name,
            candidates,
            total_columns: classification.total_columns,
            matched_columns: classification.matched_columns,
            confidence_by_short_code,
            orphans: classification.orphans,
            column_analysis: classification.column_analysis,
        }
    }
}

fn catalog_codes(catalog: &[CatalogMetric]) -> HashSet<&str> {
    catalog.iter().map(|m| m.short_code.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetricDefinition;
    use crate::discovery::CandidateSource;
    use chrono::Utc;

    fn engine() -> DiscoveryEngine {
        DiscoveryEngine::new(&DiscoverySettings::default()).unwrap()
    }

    fn emergency_model() -> Model {
        Model::with_columns(
            "rollup_emergency_exec",
            [
                "presentations_value",
                "los_4hr_numerator",
                "los_4hr_denominator",
                "created_at",
            ],
        )
    }

    fn catalog_entry(short: &str) -> CatalogMetric {
        let now = Utc::now();
        CatalogMetric {
            category: "emergency".to_string(),
            name: "Presentations".to_string(),
            short_code: short.to_string(),
            definition: MetricDefinition::Direct {
                value: "presentations_value".to_string(),
            },
            multiplier: None,
            description: None,
            source_model: None,
            tags: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_analyze_emergency_model() {
        let result = engine().analyze(&emergency_model(), &[]);

        assert_eq!(result.model_name, "rollup_emergency_exec");
        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.total_columns, 4);
        assert_eq!(result.matched_columns, 3);
        assert_eq!(result.column_analysis["created_at"], ColumnOutcome::System);

        let direct = &result.candidates[0];
        assert_eq!(
            direct.source,
            CandidateSource::Direct {
                value: "presentations_value".to_string()
            }
        );
        assert_eq!(direct.confidence, 0.9);

        let ratio = &result.candidates[1];
        assert_eq!(
            ratio.source,
            CandidateSource::Ratio {
                numerator: "los_4hr_numerator".to_string(),
                denominator: "los_4hr_denominator".to_string(),
            }
        );
        assert!(result.orphans.is_empty());
        assert_eq!(result.confidence_by_short_code.len(), 2);
        assert_eq!(result.confidence_by_short_code["PRESENTATIONS"], 0.9);
    }

    #[test]
    fn test_empty_model() {
        let result = engine().analyze(&Model::with_columns("rollup_empty", Vec::<String>::new()), &[]);
        assert!(result.candidates.is_empty());
        assert_eq!(result.total_columns, 0);
        assert_eq!(result.matched_columns, 0);
        assert_eq!(result.overall_confidence(), 0.0);
    }

    #[test]
    fn test_empty_and_duplicate_column_names_are_skipped() {
        let model = Model::with_columns("rollup_ward", ["", "beds_count", "beds_count", ""]);
        let result = engine().analyze(&model, &[]);
        assert_eq!(result.total_columns, 1);
        assert_eq!(result.matched_columns, 1);
        assert_eq!(result.candidates.len(), 1);
    }

    #[test]
    fn test_orphans_are_diagnostics_not_candidates() {
        let model = Model::with_columns(
            "rollup_theatre",
            ["cancelled_numerator", "utilisation_denominator", "sessions_value"],
        );
        let result = engine().analyze(&model, &[]);

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.matched_columns, 3);
        assert_eq!(
            result.orphans,
            vec![
                OrphanColumn {
                    column: "cancelled_numerator".to_string(),
                    kind: ColumnKind::RatioNumerator
                },
                OrphanColumn {
                    column: "utilisation_denominator".to_string(),
                    kind: ColumnKind::RatioDenominator
                },
            ]
        );
        let notes = result.notes();
        assert!(notes.contains(&"cancelled_numerator has no matching denominator".to_string()));
    }

    #[test]
    fn test_existing_short_code_is_flagged_not_dropped() {
        let catalog = vec![catalog_entry("PRESENTATIONS")];
        let result = engine().analyze(&emergency_model(), &catalog);

        assert_eq!(result.candidates.len(), 2);
        assert!(result.candidates[0].already_exists);
        assert!(!result.candidates[1].already_exists);
        assert_eq!(result.new_candidates().count(), 1);
    }

    #[test]
    fn test_in_model_collisions_are_suffixed() {
        let model = Model::with_columns("rollup_ward", ["beds_value", "beds_count"]);
        let result = engine().analyze(&model, &[]);
        let codes: Vec<&str> = result
            .candidates
            .iter()
            .map(|c| c.suggested_short_code.as_str())
            .collect();
        assert_eq!(codes, vec!["BEDS", "BEDS_2"]);
        assert_eq!(result.candidates[1].confidence, 0.85);
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let engine = engine();
        let catalog = vec![catalog_entry("LOS_4HR")];
        let first = engine.analyze(&emergency_model(), &catalog);
        let second = engine.analyze(&emergency_model(), &catalog);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_batch_matches_sequential_allocation() {
        let engine = engine();
        let models = vec![
            Model::with_columns("rollup_emergency_exec", ["presentations_value", "beds_count"]),
            Model::with_columns("rollup_ward_daily", ["beds_count", "presentations_value"]),
            Model::with_columns("rollup_ward_weekly", ["beds_value"]),
        ];

        let batch = engine.analyze_all(&models, &[]);
        let codes: Vec<Vec<&str>> = batch
            .iter()
            .map(|r| r.candidates.iter().map(|c| c.suggested_short_code.as_str()).collect())
            .collect();

        assert_eq!(
            codes,
            vec![
                vec!["PRESENTATIONS", "BEDS"],
                vec!["BEDS_2", "PRESENTATIONS_2"],
                vec!["BEDS_3"],
            ]
        );

        // Running again yields the same assignment
        assert_eq!(engine.analyze_all(&models, &[]), batch);
    }

    #[test]
    fn test_batch_models_do_not_affect_each_others_candidates() {
        let engine = engine();
        let models = vec![
            emergency_model(),
            Model::with_columns("rollup_finance", ["revenue_value"]),
        ];
        let batch = engine.analyze_all(&models, &[]);
        let single = engine.analyze(&models[1], &[]);
        assert_eq!(batch[1], single);
    }

    #[test]
    fn test_invalid_pattern_rejected_at_construction() {
        let mut settings = DiscoverySettings::default();
        settings.patterns.direct_value = "[".to_string();
        assert!(DiscoveryEngine::new(&settings).is_err());
    }

    #[test]
    fn test_confidence_always_in_range() {
        let model = Model::with_columns(
            "rollup_x",
            ["a_value", "1_count", "b_c_d_numerator", "b_c_d_denominator", "x_numerator", "x_denominator"],
        );
        let result = engine().analyze(&model, &[]);
        assert_eq!(result.candidates.len(), 4);
        assert!(result
            .candidates
            .iter()
            .all(|c| (0.0..=1.0).contains(&c.confidence)));
        assert!((0.0..=1.0).contains(&result.overall_confidence()));
    }
}
