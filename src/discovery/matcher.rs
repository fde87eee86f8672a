//! Column pattern rules.
//!
//! A column is classified by evaluating the configured regular expressions in a
//! fixed priority order. The first rule matching the whole column name decides
//! the column's kind; a column matching nothing is simply not a metric column.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a metric-like column contributes to a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    DirectValue,
    DirectCount,
    RatioNumerator,
    RatioDenominator,
}

impl ColumnKind {
    /// Evaluation order of the rules
    pub const PRIORITY: [ColumnKind; 4] = [
        ColumnKind::DirectValue,
        ColumnKind::DirectCount,
        ColumnKind::RatioNumerator,
        ColumnKind::RatioDenominator,
    ];

    /// Conventional suffix stripped to obtain a column's stem
    pub fn suffix(self) -> &'static str {
        match self {
            ColumnKind::DirectValue => "_value",
            ColumnKind::DirectCount => "_count",
            ColumnKind::RatioNumerator => "_numerator",
            ColumnKind::RatioDenominator => "_denominator",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ColumnKind::DirectValue => "direct value",
            ColumnKind::DirectCount => "direct count",
            ColumnKind::RatioNumerator => "ratio numerator",
            ColumnKind::RatioDenominator => "ratio denominator",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Outcome of classifying one column name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Matched(ColumnKind),
    Unmatched,
}

/// Regular expressions for each column kind, as written in the settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    pub direct_value: String,
    pub direct_count: String,
    pub ratio_numerator: String,
    pub ratio_denominator: String,
}

impl Default for PatternSettings {
    fn default() -> Self {
        PatternSettings {
            direct_value: r".*_value$".to_string(),
            direct_count: r".*_count$".to_string(),
            ratio_numerator: r".*_numerator$".to_string(),
            ratio_denominator: r".*_denominator$".to_string(),
        }
    }
}

impl PatternSettings {
    pub fn pattern(&self, kind: ColumnKind) -> &str {
        match kind {
            ColumnKind::DirectValue => &self.direct_value,
            ColumnKind::DirectCount => &self.direct_count,
            ColumnKind::RatioNumerator => &self.ratio_numerator,
            ColumnKind::RatioDenominator => &self.ratio_denominator,
        }
    }
}

/// A rule whose regular expression failed to compile
#[derive(Debug, Error)]
#[error("invalid pattern for {kind} columns: {pattern:?}")]
pub struct PatternError {
    pub kind: ColumnKind,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug, Clone)]
struct PatternRule {
    kind: ColumnKind,
    regex: Regex,
}

/// Compiled, immutable rule set
#[derive(Debug, Clone)]
pub struct PatternRules {
    rules: Vec<PatternRule>,
}

impl PatternRules {
    /// Compile the rules. Patterns are anchored at both ends so that a rule
    /// has to match the whole column name.
    pub fn new(settings: &PatternSettings) -> Result<Self, PatternError> {
        let rules = ColumnKind::PRIORITY
            .iter()
            .map(|&kind| {
                let pattern = settings.pattern(kind);
                Regex::new(&format!("^(?:{pattern})$"))
                    .map(|regex| PatternRule { kind, regex })
                    .map_err(|source| PatternError {
                        kind,
                        pattern: pattern.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PatternRules { rules })
    }

    /// Classify a column name. Case-sensitive; callers normalize if they need to.
    pub fn classify(&self, column: &str) -> Classification {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(column))
            .map_or(Classification::Unmatched, |rule| {
                Classification::Matched(rule.kind)
            })
    }

    /// The stem of a column matched as `kind`.
    ///
    /// A `stem` named capture group in the rule wins; otherwise the kind's
    /// conventional suffix is stripped, and failing that the whole name is used.
    pub fn stem<'a>(&self, column: &'a str, kind: ColumnKind) -> &'a str {
        let captured = self
            .rules
            .iter()
            .find(|rule| rule.kind == kind)
            .and_then(|rule| rule.regex.captures(column))
            .and_then(|caps| caps.name("stem"))
            .map(|m| m.as_str());

        captured
            .or_else(|| column.strip_suffix(kind.suffix()))
            .unwrap_or(column)
    }
}

impl Default for PatternRules {
    fn default() -> Self {
        // The built-in patterns are known to compile.
        let rules = ColumnKind::PRIORITY
            .iter()
            .filter_map(|&kind| {
                let pattern = PatternSettings::default().pattern(kind).to_string();
                Regex::new(&format!("^(?:{pattern})$"))
                    .ok()
                    .map(|regex| PatternRule { kind, regex })
            })
            .collect();
        PatternRules { rules }
    }
}
