//! Plain-text rendering of command results.

use std::fmt::Write;

use crate::catalog::{Backup, CatalogMetric, CatalogSummary, CatalogValidation, MergeOutcome, MetricDefinition};
use crate::data::{Model, RecentProject};
use crate::discovery::{CandidateSource, DiscoveryResult, MetricCandidate};

/// Rollup models with what discovery finds in each, paired by position
pub fn models_report(models: &[Model], results: &[DiscoveryResult]) -> String {
    if models.is_empty() {
        return "No rollup models found\n".to_string();
    }

    let width = models.iter().map(|m| m.name.len()).max().unwrap_or(0).max(5);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:>7}  {:>7}  {:>10}  {:>3}  RELATION",
        "MODEL", "COLUMNS", "MATCHED", "CANDIDATES", "NEW"
    );
    for (model, result) in models.iter().zip(results) {
        let _ = writeln!(
            out,
            "{:<width$}  {:>7}  {:>7}  {:>10}  {:>3}  {}",
            model.name,
            result.total_columns,
            result.matched_columns,
            result.candidates.len(),
            result.new_candidates().count(),
            model.full_name()
        );
    }
    out
}

fn describe_source(source: &CandidateSource) -> String {
    match source {
        CandidateSource::Direct { value } => value.clone(),
        CandidateSource::Ratio {
            numerator,
            denominator,
        } => format!("{numerator} / {denominator}"),
        CandidateSource::Custom { expression } => expression.clone(),
    }
}

fn candidate_line(candidate: &MetricCandidate) -> String {
    let marker = if candidate.already_exists { " (exists)" } else { "" };
    format!(
        "  {:<20}  {:<6}  {:.2}  {}  [{}]{marker}",
        candidate.suggested_short_code,
        candidate.kind(),
        candidate.confidence,
        candidate.suggested_name,
        describe_source(&candidate.source),
    )
}

/// One model's candidates and notes, hiding candidates below `min_confidence`
pub fn discovery_report(result: &DiscoveryResult, min_confidence: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} (overall confidence {:.2})",
        result.model_name,
        result.overall_confidence()
    );

    let shown: Vec<&MetricCandidate> = result
        .candidates
        .iter()
        .filter(|c| c.confidence >= min_confidence)
        .collect();
    for candidate in &shown {
        let _ = writeln!(out, "{}", candidate_line(candidate));
    }
    let hidden = result.candidates.len() - shown.len();
    if hidden > 0 {
        let _ = writeln!(out, "  ... {hidden} below confidence {min_confidence:.2}");
    }

    for note in result.notes() {
        let _ = writeln!(out, "  - {note}");
    }
    out
}

fn definition_text(definition: &MetricDefinition) -> String {
    match definition {
        MetricDefinition::Direct { value } => value.clone(),
        MetricDefinition::Ratio {
            numerator,
            denominator,
        } => format!("{numerator} / {denominator}"),
        MetricDefinition::Custom { expression } => expression.clone(),
    }
}

/// One line per catalog entry
pub fn catalog_report(metrics: &[CatalogMetric]) -> String {
    if metrics.is_empty() {
        return "Catalog is empty\n".to_string();
    }

    let mut out = String::new();
    for metric in metrics {
        let _ = writeln!(
            out,
            "{:<20}  {:<6}  {:<16}  {}  [{}]",
            metric.short_code,
            metric.kind(),
            metric.category,
            metric.name,
            definition_text(&metric.definition)
        );
    }
    let _ = writeln!(out, "{} metrics", metrics.len());
    out
}

pub fn validation_report(validation: &CatalogValidation) -> String {
    let mut out = String::new();
    if validation.is_valid() {
        let _ = writeln!(out, "Catalog is valid ({} rows)", validation.row_count);
    } else {
        let _ = writeln!(
            out,
            "Catalog has {} errors ({} rows)",
            validation.errors.len(),
            validation.row_count
        );
    }
    for error in &validation.errors {
        let _ = writeln!(out, "  error: {error}");
    }
    for warning in &validation.warnings {
        let _ = writeln!(out, "  warning: {warning}");
    }
    out
}

pub fn summary_report(summary: &CatalogSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total metrics: {}", summary.total);
    let _ = writeln!(
        out,
        "Models with metrics: {} of {} ({:.1}%)",
        summary.models_with_metrics,
        summary.total_models,
        summary.coverage_percentage()
    );

    let _ = writeln!(out, "By type:");
    for (kind, count) in &summary.by_kind {
        let _ = writeln!(out, "  {kind:<16} {count}");
    }
    let _ = writeln!(out, "By category:");
    for (category, count) in &summary.by_category {
        let _ = writeln!(out, "  {category:<16} {count}");
    }
    let _ = writeln!(out, "By model:");
    for (model, count) in &summary.by_model {
        let _ = writeln!(out, "  {model:<16} {count}");
    }
    out
}

pub fn merge_report(outcome: &MergeOutcome) -> String {
    let mut out = String::new();
    for action in &outcome.applied {
        let _ = writeln!(out, "  {action}");
    }
    let _ = writeln!(
        out,
        "{} added, {} conflicts, {} metrics total",
        outcome.inserted(),
        outcome.conflicts.len(),
        outcome.result.len()
    );
    out
}

pub fn backups_report(backups: &[Backup]) -> String {
    if backups.is_empty() {
        return "No backups\n".to_string();
    }
    let mut out = String::new();
    for (i, backup) in backups.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>3}  {}  {}",
            i + 1,
            backup.taken_at.format("%Y-%m-%d %H:%M:%S"),
            backup.path.display()
        );
    }
    out
}

pub fn history_report(projects: &[RecentProject]) -> String {
    if projects.is_empty() {
        return "No recent projects\n".to_string();
    }
    let mut out = String::new();
    for project in projects {
        let opened = project
            .last_opened
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{opened}  {}  ({} models, {} metrics)  {}",
            project.name, project.model_count, project.metric_count, project.path
        );
    }
    out
}
