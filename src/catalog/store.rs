//! Flat-file storage for the metric catalog.
//!
//! Catalog file layout (`metric_definitions.csv`):
//! - header: category, name, short, type, value, numerator, denominator,
//!   expression, multiplier, description, source_model, tags, created_at, updated_at
//! - `tags` is a comma-separated list inside one field
//! - timestamps are RFC 3339 and optional when reading
//!
//! Writes go to a temporary file next to the target which is then renamed over
//! it, after the previous version has been copied to the backup directory.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::metric::{CatalogMetric, MetricDefinition, MetricKind};
use super::validation::validate_catalog;
use crate::discovery::UNCATEGORIZED;

/// Conventional catalog file name inside a dbt project
pub const CATALOG_FILE_NAME: &str = "metric_definitions.csv";

/// Column order of the catalog file; matches the field order of `MetricRow`
pub const CATALOG_COLUMNS: [&str; 14] = [
    "category",
    "name",
    "short",
    "type",
    "value",
    "numerator",
    "denominator",
    "expression",
    "multiplier",
    "description",
    "source_model",
    "tags",
    "created_at",
    "updated_at",
];

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One CSV row. Every field is text so that partially filled rows still load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MetricRow {
    #[serde(alias = "metric_category")]
    category: String,
    name: String,
    short: String,
    #[serde(rename = "type")]
    kind: String,
    value: String,
    numerator: String,
    denominator: String,
    #[serde(alias = "sql")]
    expression: String,
    multiplier: String,
    description: String,
    #[serde(alias = "model_name")]
    source_model: String,
    tags: String,
    created_at: String,
    updated_at: String,
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl MetricRow {
    fn into_metric(self, now: DateTime<Utc>) -> Result<CatalogMetric, String> {
        let name = self.name.trim().to_string();
        let short_code = self.short.trim().to_string();
        if name.is_empty() || short_code.is_empty() || self.kind.trim().is_empty() {
            return Err("missing name, short or type".to_string());
        }

        let kind: MetricKind = self.kind.parse()?;
        let definition = match kind {
            MetricKind::Direct => MetricDefinition::Direct {
                value: self.value.trim().to_string(),
            },
            MetricKind::Ratio => MetricDefinition::Ratio {
                numerator: self.numerator.trim().to_string(),
                denominator: self.denominator.trim().to_string(),
            },
            MetricKind::Custom => MetricDefinition::Custom {
                expression: self.expression.trim().to_string(),
            },
        };

        let multiplier = match non_empty(self.multiplier) {
            Some(m) => Some(
                m.parse::<i64>()
                    .map_err(|e| format!("invalid multiplier {m:?}: {e}"))?,
            ),
            None => None,
        };

        let created_at = parse_timestamp(&self.created_at).unwrap_or(now);
        let updated_at = parse_timestamp(&self.updated_at).unwrap_or(created_at);

        Ok(CatalogMetric {
            category: non_empty(self.category).unwrap_or_else(|| UNCATEGORIZED.to_string()),
            name,
            short_code,
            definition,
            multiplier,
            description: non_empty(self.description),
            source_model: non_empty(self.source_model),
            tags: self
                .tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            created_at,
            updated_at,
        })
    }

    fn from_metric(metric: &CatalogMetric) -> Self {
        let mut row = MetricRow {
            category: metric.category.clone(),
            name: metric.name.clone(),
            short: metric.short_code.clone(),
            kind: metric.kind().to_string(),
            multiplier: metric.multiplier.map(|m| m.to_string()).unwrap_or_default(),
            description: metric.description.clone().unwrap_or_default(),
            source_model: metric.source_model.clone().unwrap_or_default(),
            tags: metric.tags.iter().cloned().collect::<Vec<_>>().join(","),
            created_at: metric.created_at.to_rfc3339(),
            updated_at: metric.updated_at.to_rfc3339(),
            ..MetricRow::default()
        };

        match &metric.definition {
            MetricDefinition::Direct { value } => row.value = value.clone(),
            MetricDefinition::Ratio {
                numerator,
                denominator,
            } => {
                row.numerator = numerator.clone();
                row.denominator = denominator.clone();
            }
            MetricDefinition::Custom { expression } => row.expression = expression.clone(),
        }

        row
    }
}

/// Rows that could not be turned into metrics, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based data row number (the header is not counted)
    pub row: usize,
    pub reason: String,
}

/// Parse catalog CSV. Rows that cannot form a metric are skipped and reported.
pub fn parse_catalog<R: Read>(
    reader: R,
    now: DateTime<Utc>,
) -> Result<(Vec<CatalogMetric>, Vec<SkippedRow>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut metrics = Vec::new();
    let mut skipped = Vec::new();

    for (idx, record) in rdr.deserialize::<MetricRow>().enumerate() {
        let row = idx + 1;
        match record {
            Ok(r) => match r.into_metric(now) {
                Ok(metric) => metrics.push(metric),
                Err(reason) => skipped.push(SkippedRow { row, reason }),
            },
            Err(e) => skipped.push(SkippedRow {
                row,
                reason: e.to_string(),
            }),
        }
    }

    Ok((metrics, skipped))
}

/// Serialize the catalog as CSV, header included
pub fn write_catalog<W: Write>(writer: W, metrics: &[CatalogMetric]) -> Result<()> {
    // The header is written explicitly so that an empty catalog still has one
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(CATALOG_COLUMNS)
        .context("Failed to write catalog header")?;
    for metric in metrics {
        wtr.serialize(MetricRow::from_metric(metric))
            .with_context(|| format!("Failed to write metric {}", metric.short_code))?;
    }
    wtr.flush().context("Failed to flush catalog")?;
    Ok(())
}

/// A backup copy of a catalog file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub path: PathBuf,
    pub taken_at: NaiveDateTime,
}

/// Reads and writes catalog files, keeping rotating backups
#[derive(Debug, Clone)]
pub struct CatalogStore {
    backup_dir: PathBuf,
    backup_count: usize,
}

impl CatalogStore {
    pub fn new(backup_dir: PathBuf, backup_count: usize) -> Self {
        CatalogStore {
            backup_dir,
            backup_count,
        }
    }

    /// Load a catalog file
    pub fn read(&self, path: &Path) -> Result<Vec<CatalogMetric>> {
        if !path.exists() {
            anyhow::bail!("Catalog file not found: {path:?}");
        }
        let file = fs::File::open(path).with_context(|| format!("Failed to open catalog: {path:?}"))?;
        let (metrics, skipped) = parse_catalog(file, Utc::now())
            .with_context(|| format!("Failed to read catalog: {path:?}"))?;

        for row in &skipped {
            log::warn!("{}: skipping row {}: {}", path.display(), row.row, row.reason);
        }
        log::debug!("loaded {} metrics from {}", metrics.len(), path.display());

        Ok(metrics)
    }

    /// Load a catalog file, treating a missing file as an empty catalog
    pub fn read_or_empty(&self, path: &Path) -> Result<Vec<CatalogMetric>> {
        if path.exists() {
            self.read(path)
        } else {
            log::info!("no catalog at {}, starting empty", path.display());
            Ok(Vec::new())
        }
    }

    /// Validate and persist the catalog. Returns the backup taken, if any.
    pub fn write(&self, path: &Path, metrics: &[CatalogMetric]) -> Result<Option<Backup>> {
        let validation = validate_catalog(metrics);
        if !validation.is_valid() {
            anyhow::bail!("Invalid metrics data: {}", validation.errors.join("; "));
        }

        let backup = if path.exists() {
            Some(self.backup(path)?)
        } else {
            None
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {parent:?}"))?;
        }

        let tmp_path = path.with_extension("csv.tmp");
        {
            let file = fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create temporary file: {tmp_path:?}"))?;
            write_catalog(&file, metrics)?;
            file.sync_all()
                .with_context(|| format!("Failed to sync temporary file: {tmp_path:?}"))?;
        }
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace catalog: {path:?}"))?;

        log::info!("wrote {} metrics to {}", metrics.len(), path.display());
        Ok(backup)
    }

    /// Copy the current catalog into the backup directory and prune old copies
    pub fn backup(&self, path: &Path) -> Result<Backup> {
        fs::create_dir_all(&self.backup_dir)
            .with_context(|| format!("Failed to create backup directory: {:?}", self.backup_dir))?;

        let stem = file_stem(path);
        let now = Utc::now().naive_utc();
        let stamp = now.format(BACKUP_TIMESTAMP_FORMAT).to_string();

        let mut backup_path = self.backup_dir.join(format!("{stem}_{stamp}.csv"));
        let mut n = 2;
        while backup_path.exists() {
            backup_path = self.backup_dir.join(format!("{stem}_{stamp}_{n}.csv"));
            n += 1;
        }

        fs::copy(path, &backup_path)
            .with_context(|| format!("Failed to back up {path:?} to {backup_path:?}"))?;
        log::info!("backed up {} to {}", path.display(), backup_path.display());

        self.prune_backups(path)?;

        Ok(Backup {
            path: backup_path,
            // The stamp has second precision
            taken_at: NaiveDateTime::parse_from_str(&stamp, BACKUP_TIMESTAMP_FORMAT)
                .unwrap_or(now),
        })
    }

    /// Backups of `path`, newest first
    pub fn list_backups(&self, path: &Path) -> Result<Vec<Backup>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let stem = file_stem(path);
        let prefix = format!("{stem}_");
        let entries = fs::read_dir(&self.backup_dir)
            .with_context(|| format!("Failed to read directory: {:?}", self.backup_dir))?;

        let mut backups: Vec<((NaiveDateTime, u32), Backup)> = entries
            .flatten()
            .filter_map(|entry| {
                let file_name = entry.file_name().to_str()?.to_string();
                let rest = file_name.strip_prefix(&prefix)?.strip_suffix(".csv")?;
                let taken_at =
                    NaiveDateTime::parse_from_str(rest.get(..15)?, BACKUP_TIMESTAMP_FORMAT).ok()?;
                // `_n` disambiguates backups taken within the same second
                let seq = match rest.get(15..)? {
                    "" => 1,
                    n => n.strip_prefix('_')?.parse().ok()?,
                };
                Some((
                    (taken_at, seq),
                    Backup {
                        path: entry.path(),
                        taken_at,
                    },
                ))
            })
            .collect();

        backups.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(backups.into_iter().map(|(_, b)| b).collect())
    }

    fn prune_backups(&self, path: &Path) -> Result<()> {
        let backups = self.list_backups(path)?;
        for old in backups.iter().skip(self.backup_count.max(1)) {
            fs::remove_file(&old.path)
                .with_context(|| format!("Failed to remove old backup: {:?}", old.path))?;
            log::debug!("pruned backup {}", old.path.display());
        }
        Ok(())
    }

    /// Put a backup back in place, backing up the current file first.
    ///
    /// The chosen backup is staged next to the target before the current file
    /// is backed up, since that backup may rotate the chosen one away.
    pub fn restore(&self, backup: &Backup, target: &Path) -> Result<()> {
        if !backup.path.exists() {
            anyhow::bail!("Backup file not found: {:?}", backup.path);
        }

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {parent:?}"))?;
        }

        let staged = target.with_extension("csv.restore");
        fs::copy(&backup.path, &staged)
            .with_context(|| format!("Failed to stage {:?} at {staged:?}", backup.path))?;

        if target.exists() {
            if let Err(e) = self.backup(target) {
                let _ = fs::remove_file(&staged);
                return Err(e);
            }
        }

        fs::rename(&staged, target)
            .with_context(|| format!("Failed to restore {:?} to {target:?}", backup.path))?;
        log::info!("restored {} from {}", target.display(), backup.path.display());
        Ok(())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("catalog")
        .to_string()
}

/// Catalog files inside a dbt project, conventional locations first
pub fn find_catalog_files(project_dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = ["seeds", "data", "seeds/metrics", "data/metrics"]
        .iter()
        .map(|dir| project_dir.join(dir).join(CATALOG_FILE_NAME))
        .filter(|p| p.is_file())
        .collect();

    for entry in WalkDir::new(project_dir)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_str().unwrap_or("");
            // dbt build output and dependencies never hold the catalog
            !(e.depth() > 0 && (name.starts_with('.') || name == "target" || name == "dbt_packages"))
        })
        .flatten()
    {
        if entry.file_type().is_file() && entry.file_name() == CATALOG_FILE_NAME {
            let path = entry.into_path();
            if !found.contains(&path) {
                found.push(path);
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ratio(short: &str) -> CatalogMetric {
        CatalogMetric {
            category: "emergency".to_string(),
            name: "Los 4hr".to_string(),
            short_code: short.to_string(),
            definition: MetricDefinition::Ratio {
                numerator: "los_4hr_numerator".to_string(),
                denominator: "los_4hr_denominator".to_string(),
            },
            multiplier: Some(100),
            description: Some("Share seen within, four hours".to_string()),
            source_model: Some("rollup_emergency_exec".to_string()),
            tags: ["ed", "kpi"].iter().map(|s| s.to_string()).collect(),
            created_at: ts(1_700_000_000),
            updated_at: ts(1_700_000_500),
        }
    }

    #[test]
    fn test_parse_legacy_headers_and_bad_rows() {
        let csv = "\
metric_category,name,short,type,value,numerator,denominator,sql,multiplier,description,model_name,tags
finance,Revenue,REVENUE,direct,revenue_value,,,,,,rollup_finance,\"kpi, money\"
,Missing Type,MT,,,,,,,,,
finance,Odd,ODD,derived,,,,,,,,
finance,Margin,MARGIN,custom,,,,revenue - cost,abc,,,
";
        let (metrics, skipped) = parse_catalog(csv.as_bytes(), ts(5)).unwrap();

        assert_eq!(metrics.len(), 1);
        let revenue = &metrics[0];
        assert_eq!(revenue.short_code, "REVENUE");
        assert_eq!(revenue.category, "finance");
        assert_eq!(revenue.source_model.as_deref(), Some("rollup_finance"));
        assert_eq!(
            revenue.tags,
            ["kpi", "money"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
        );
        assert_eq!(revenue.created_at, ts(5));

        let rows: Vec<usize> = skipped.iter().map(|s| s.row).collect();
        assert_eq!(rows, vec![2, 3, 4]);
        assert!(skipped[2].reason.contains("invalid multiplier"));
    }

    #[test]
    fn test_write_then_read_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seeds").join(CATALOG_FILE_NAME);
        let store = CatalogStore::new(dir.path().join("backups"), 3);

        let metrics = vec![ratio("LOS_4HR")];
        let backup = store.write(&path, &metrics).unwrap();
        assert!(backup.is_none());

        let loaded = store.read(&path).unwrap();
        assert_eq!(loaded, metrics);
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_write_refuses_invalid_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE_NAME);
        let store = CatalogStore::new(dir.path().join("backups"), 3);

        let err = store
            .write(&path, &[ratio("DUP"), ratio("DUP")])
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate short codes"));
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_catalog_round_trips_to_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE_NAME);
        let store = CatalogStore::new(dir.path().join("backups"), 3);

        store.write(&path, &[]).unwrap();
        assert!(store.read(&path).unwrap().is_empty());
        assert!(store.read_or_empty(&dir.path().join("missing.csv")).unwrap().is_empty());
    }

    #[test]
    fn test_backups_rotate_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE_NAME);
        let store = CatalogStore::new(dir.path().join("backups"), 2);

        store.write(&path, &[ratio("V1")]).unwrap();
        store.write(&path, &[ratio("V2")]).unwrap();
        store.write(&path, &[ratio("V3")]).unwrap();
        store.write(&path, &[ratio("V4")]).unwrap();

        let backups = store.list_backups(&path).unwrap();
        assert_eq!(backups.len(), 2);

        // Newest backup holds the previous version
        store.restore(&backups[0], &path).unwrap();
        let restored = store.read(&path).unwrap();
        assert_eq!(restored[0].short_code, "V3");
    }

    #[test]
    fn test_restore_oldest_backup_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE_NAME);
        let store = CatalogStore::new(dir.path().join("backups"), 2);

        store.write(&path, &[ratio("V1")]).unwrap();
        store.write(&path, &[ratio("V2")]).unwrap();
        store.write(&path, &[ratio("V3")]).unwrap();

        let backups = store.list_backups(&path).unwrap();
        assert_eq!(backups.len(), 2);
        let oldest = backups.last().unwrap().clone();

        // Backing up V3 rotates the oldest backup out while it is being restored
        store.restore(&oldest, &path).unwrap();

        let restored = store.read(&path).unwrap();
        assert_eq!(restored[0].short_code, "V1");
        assert!(!path.with_extension("csv.restore").exists());

        let after = store.list_backups(&path).unwrap();
        assert_eq!(after.len(), 2);
        let newest = store.read(&after[0].path).unwrap();
        assert_eq!(newest[0].short_code, "V3");
    }

    #[test]
    fn test_find_catalog_files() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds");
        let nested = dir.path().join("seeds").join("finance");
        let target = dir.path().join("target");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(seeds.join(CATALOG_FILE_NAME), "").unwrap();
        fs::write(nested.join(CATALOG_FILE_NAME), "").unwrap();
        fs::write(target.join(CATALOG_FILE_NAME), "").unwrap();

        let found = find_catalog_files(dir.path());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], seeds.join(CATALOG_FILE_NAME));
        assert!(found.contains(&nested.join(CATALOG_FILE_NAME)));
    }
}
