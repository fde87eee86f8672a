//! Metric candidates and how they are derived from matched columns.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::matcher::ColumnKind;
use crate::catalog::{MetricKind, MAX_SHORT_CODE_LEN};

/// Category given to models whose name yields no usable token
pub const UNCATEGORIZED: &str = "uncategorized";

/// Tunable confidence weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub direct_value: f64,
    pub direct_count: f64,
    pub ratio_numerator: f64,
    pub ratio_denominator: f64,
    /// Subtracted from a ratio's score for every ambiguous stem token
    pub ambiguity_penalty: f64,
    /// Stems and tokens shorter than this are considered ambiguous
    pub min_stem_len: usize,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            direct_value: 0.9,
            direct_count: 0.85,
            ratio_numerator: 0.85,
            ratio_denominator: 0.85,
            ambiguity_penalty: 0.05,
            min_stem_len: 4,
        }
    }
}

impl ScoringWeights {
    fn base(&self, kind: ColumnKind) -> f64 {
        match kind {
            ColumnKind::DirectValue => self.direct_value,
            ColumnKind::DirectCount => self.direct_count,
            ColumnKind::RatioNumerator => self.ratio_numerator,
            ColumnKind::RatioDenominator => self.ratio_denominator,
        }
    }

    fn is_ambiguous(&self, token: &str) -> bool {
        token.chars().count() < self.min_stem_len || token.chars().all(|c| c.is_ascii_digit())
    }

    /// Number of stem tokens that carry little meaning on their own
    pub fn ambiguous_tokens(&self, stem: &str) -> usize {
        stem.split('_')
            .filter(|token| !token.is_empty())
            .filter(|token| self.is_ambiguous(token))
            .count()
    }

    pub fn direct_confidence(&self, kind: ColumnKind) -> f64 {
        self.base(kind).clamp(0.0, 1.0)
    }

    pub fn ratio_confidence(&self, stem: &str) -> f64 {
        let base = (self.ratio_numerator + self.ratio_denominator) / 2.0;
        let penalty = self.ambiguity_penalty * self.ambiguous_tokens(stem) as f64;
        (base - penalty).clamp(0.0, 1.0)
    }
}

/// Where a candidate's values come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateSource {
    Direct { value: String },
    Ratio { numerator: String, denominator: String },
    /// Only created by manual entry, never by discovery
    Custom { expression: String },
}

/// A suggested metric, not yet part of the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCandidate {
    pub source_model: String,
    pub source: CandidateSource,
    pub suggested_name: String,
    pub suggested_short_code: String,
    pub category: Option<String>,
    pub confidence: f64,
    pub multiplier: Option<i64>,
    pub description: Option<String>,
    /// The short code is already present in the catalog discovery ran against
    pub already_exists: bool,
}

impl MetricCandidate {
    /// A candidate typed in by the operator rather than discovered
    pub fn manual(
        source_model: &str,
        name: &str,
        short_code: &str,
        category: Option<String>,
        source: CandidateSource,
    ) -> Self {
        let multiplier = match source {
            CandidateSource::Ratio { .. } => Some(100),
            _ => None,
        };
        MetricCandidate {
            source_model: source_model.to_string(),
            source,
            suggested_name: name.to_string(),
            suggested_short_code: short_code.to_string(),
            category,
            confidence: 1.0,
            multiplier,
            description: None,
            already_exists: false,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self.source {
            CandidateSource::Direct { .. } => MetricKind::Direct,
            CandidateSource::Ratio { .. } => MetricKind::Ratio,
            CandidateSource::Custom { .. } => MetricKind::Custom,
        }
    }

    /// Human-readable problems that prevent accepting this candidate
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.source_model.trim().is_empty() {
            errors.push("Source model is required".to_string());
        }
        if self.suggested_name.trim().is_empty() {
            errors.push("Name is required".to_string());
        }
        if self.suggested_short_code.trim().is_empty() {
            errors.push("Short code is required".to_string());
        } else if self.suggested_short_code.chars().count() > MAX_SHORT_CODE_LEN {
            errors.push(format!(
                "Short code must be at most {MAX_SHORT_CODE_LEN} characters"
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            errors.push("Confidence must be between 0 and 1".to_string());
        }

        match &self.source {
            CandidateSource::Direct { value } if value.trim().is_empty() => {
                errors.push("Direct metrics require a value column".to_string());
            }
            CandidateSource::Ratio {
                numerator,
                denominator,
            } => {
                if numerator.trim().is_empty() || denominator.trim().is_empty() {
                    errors.push("Ratio metrics require numerator and denominator".to_string());
                } else if numerator == denominator {
                    errors.push("Ratio numerator and denominator must differ".to_string());
                }
            }
            CandidateSource::Custom { expression } if expression.trim().is_empty() => {
                errors.push("Custom metrics require an expression".to_string());
            }
            _ => {}
        }

        errors
    }
}

/// Hands out short codes that are unique within one session.
///
/// A code that is already taken gets `_2`, `_3`, … appended, in the order the
/// codes are requested.
#[derive(Debug, Clone, Default)]
pub struct ShortCodeAllocator {
    taken: HashSet<String>,
}

impl ShortCodeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a set of codes that must not be handed out again
    pub fn with_taken<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ShortCodeAllocator {
            taken: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allocate(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }

        let mut n = 2usize;
        loop {
            let suffix = format!("_{n}");
            let keep = MAX_SHORT_CODE_LEN.saturating_sub(suffix.len());
            let code = format!("{}{suffix}", truncate_chars(base, keep));
            if self.taken.insert(code.clone()) {
                return code;
            }
            n += 1;
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn title_case(words: &str) -> String {
    words
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Last `.` or `/` separated segment of a model name
fn model_segment(model_name: &str) -> &str {
    model_name
        .rsplit(['.', '/'])
        .next()
        .unwrap_or(model_name)
}

/// Derives names, short codes, categories and confidence for candidates
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    weights: ScoringWeights,
    rollup_prefix: String,
    category_synonyms: BTreeMap<String, String>,
    default_multiplier: i64,
}

impl CandidateBuilder {
    pub fn new(
        weights: ScoringWeights,
        rollup_prefix: &str,
        category_synonyms: BTreeMap<String, String>,
        default_multiplier: i64,
    ) -> Self {
        CandidateBuilder {
            weights,
            rollup_prefix: rollup_prefix.to_string(),
            category_synonyms,
            default_multiplier,
        }
    }

    /// Model name without path qualifiers and rollup prefix
    fn model_context<'a>(&self, model_name: &'a str) -> &'a str {
        let segment = model_segment(model_name);
        segment.strip_prefix(self.rollup_prefix.as_str()).unwrap_or(segment)
    }

    /// Human-readable name; short stems get the model appended for context
    pub fn derive_name(&self, stem: &str, model_name: &str) -> String {
        let name = title_case(stem);
        if stem.chars().count() >= self.weights.min_stem_len {
            return name;
        }

        let context = title_case(self.model_context(model_name));
        match (name.is_empty(), context.is_empty()) {
            (_, true) => name,
            (true, false) => context,
            (false, false) => format!("{name} ({context})"),
        }
    }

    /// Uppercased stem, truncated to the catalog's short code limit
    pub fn derive_short_code(&self, stem: &str) -> String {
        let code = stem.trim().to_uppercase().replace(' ', "_");
        truncate_chars(&code, MAX_SHORT_CODE_LEN).to_string()
    }

    pub fn infer_category(&self, model_name: &str) -> String {
        let token = self
            .model_context(model_name)
            .split('_')
            .find(|t| !t.is_empty());

        match token {
            Some(token) => self
                .category_synonyms
                .get(token)
                .cloned()
                .unwrap_or_else(|| token.to_string()),
            None => UNCATEGORIZED.to_string(),
        }
    }

    pub fn build_direct(
        &self,
        column: &str,
        kind: ColumnKind,
        stem: &str,
        model_name: &str,
    ) -> MetricCandidate {
        let stem = if stem.is_empty() { column } else { stem };
        MetricCandidate {
            source_model: model_name.to_string(),
            source: CandidateSource::Direct {
                value: column.to_string(),
            },
            suggested_name: self.derive_name(stem, model_name),
            suggested_short_code: self.derive_short_code(stem),
            category: Some(self.infer_category(model_name)),
            confidence: self.weights.direct_confidence(kind),
            multiplier: None,
            description: Some(format!("Direct metric from {column}")),
            already_exists: false,
        }
    }

    pub fn build_ratio(
        &self,
        numerator: &str,
        denominator: &str,
        stem: &str,
        model_name: &str,
    ) -> MetricCandidate {
        let stem = if stem.is_empty() { numerator } else { stem };
        MetricCandidate {
            source_model: model_name.to_string(),
            source: CandidateSource::Ratio {
                numerator: numerator.to_string(),
                denominator: denominator.to_string(),
            },
            suggested_name: self.derive_name(stem, model_name),
            suggested_short_code: self.derive_short_code(stem),
            category: Some(self.infer_category(model_name)),
            confidence: self.weights.ratio_confidence(stem),
            multiplier: Some(self.default_multiplier),
            description: Some(format!("Ratio metric: {numerator} / {denominator}")),
            already_exists: false,
        }
    }
}

impl Default for CandidateBuilder {
    fn default() -> Self {
        CandidateBuilder::new(ScoringWeights::default(), "rollup_", BTreeMap::new(), 100)
    }
}
