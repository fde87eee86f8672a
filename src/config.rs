//! User settings stored as `config.json` in the application home.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::discovery::DiscoverySettings;

pub const SETTINGS_FILE_NAME: &str = "config.json";

/// Project-level preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Project used when a command is given none
    pub default_path: Option<PathBuf>,
    /// Catalog backups kept per file
    pub backup_count: usize,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        ProjectSettings {
            default_path: None,
            backup_count: 10,
        }
    }
}

/// Everything read from `config.json`; missing keys take their defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub discovery: DiscoverySettings,
    pub project: ProjectSettings,
}

impl Settings {
    /// Load settings, falling back to defaults if the file is missing or unreadable
    pub fn load(path: &Path) -> Settings {
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Settings::default();
        }

        let parsed = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {path:?}"))
            .and_then(|text| {
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse settings: {path:?}"))
            });

        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{e:#}; using default settings");
                Settings::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {parent:?}"))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).with_context(|| format!("Failed to write settings: {path:?}"))?;
        Ok(())
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join(SETTINGS_FILE_NAME));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.project.backup_count, 10);
        assert_eq!(settings.discovery.rollup_prefix, "rollup_");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(
            &path,
            r#"{"discovery": {"rollup_prefix": "agg_", "patterns": {"direct_value": ".*_total"}},
                "project": {"backup_count": 3}}"#,
        )
        .unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.discovery.rollup_prefix, "agg_");
        assert_eq!(settings.discovery.patterns.direct_value, ".*_total");
        assert_eq!(settings.discovery.patterns.direct_count, ".*_count$");
        assert_eq!(settings.discovery.default_multiplier, 100);
        assert_eq!(settings.project.backup_count, 3);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "{ nope").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let mut settings = Settings::default();
        settings.discovery.category_synonyms.insert("ed".to_string(), "emergency".to_string());
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);
    }
}
