//! Numerator/denominator pairing for ratio metrics.

use std::collections::{BTreeMap, BTreeSet};

use super::matcher::ColumnKind;

/// A numerator and denominator sharing the same stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatioPair {
    pub stem: String,
    pub numerator: String,
    pub denominator: String,
}

/// Result of pairing one model's ratio columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatioPairing {
    /// Ordered by ascending stem
    pub pairs: Vec<RatioPair>,
    pub orphan_numerators: BTreeSet<String>,
    pub orphan_denominators: BTreeSet<String>,
}

/// Pair columns using the conventional `_numerator` / `_denominator` suffixes.
/// Discovery pairs through `pair_by` with the stems its rules produce.
#[cfg(test)]
pub fn pair(numerators: &BTreeSet<String>, denominators: &BTreeSet<String>) -> RatioPairing {
    pair_by(numerators, denominators, |column, kind| {
        column.strip_suffix(kind.suffix()).unwrap_or(column).to_string()
    })
}

/// Pair columns whose stems, as computed by `stem_of`, are identical.
///
/// A stem that shows up more than once on the same side cannot be paired one to
/// one, so every column carrying it is reported as an orphan.
pub fn pair_by<F>(
    numerators: &BTreeSet<String>,
    denominators: &BTreeSet<String>,
    stem_of: F,
) -> RatioPairing
where
    F: Fn(&str, ColumnKind) -> String,
{
    let by_stem = |columns: &BTreeSet<String>, kind: ColumnKind| {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for column in columns {
            map.entry(stem_of(column, kind))
                .or_default()
                .push(column.clone());
        }
        map
    };

    let numerators_by_stem = by_stem(numerators, ColumnKind::RatioNumerator);
    let mut denominators_by_stem = by_stem(denominators, ColumnKind::RatioDenominator);

    let mut pairing = RatioPairing::default();

    for (stem, mut nums) in numerators_by_stem {
        match denominators_by_stem.remove(&stem) {
            Some(mut dens) if nums.len() == 1 && dens.len() == 1 => {
                let numerator = nums.remove(0);
                let denominator = dens.remove(0);
                // A column can only be its own counterpart under odd custom rules
                if numerator == denominator {
                    pairing.orphan_numerators.insert(numerator);
                    pairing.orphan_denominators.insert(denominator);
                } else {
                    pairing.pairs.push(RatioPair {
                        stem,
                        numerator,
                        denominator,
                    });
                }
            }
            Some(dens) => {
                pairing.orphan_numerators.extend(nums);
                pairing.orphan_denominators.extend(dens);
            }
            None => pairing.orphan_numerators.extend(nums),
        }
    }

    for (_, dens) in denominators_by_stem {
        pairing.orphan_denominators.extend(dens);
    }

    pairing
}
