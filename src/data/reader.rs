//! Reader for a dbt project's build artifacts.
//!
//! dbt project layout:
//! - `dbt_project.yml` at the project root
//! - `target/manifest.json`: nodes keyed by unique id, with declared columns
//! - `target/catalog.json` (optional): warehouse column types, keyed by unique id

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

use super::models::{Column, Model, Project};

/// Why a directory could not be read as a dbt project
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("project path does not exist: {0:?}")]
    ProjectNotFound(PathBuf),
    #[error("no dbt_project.yml found in {0:?}; this doesn't appear to be a dbt project")]
    NotADbtProject(PathBuf),
    #[error("manifest.json not found at {0:?}; run 'dbt docs generate' first")]
    ManifestMissing(PathBuf),
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Manifest {
    metadata: ManifestMetadata,
    nodes: BTreeMap<String, ManifestNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestMetadata {
    project_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestNode {
    name: String,
    resource_type: String,
    database: Option<String>,
    schema: Option<String>,
    alias: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
    original_file_path: Option<String>,
    #[serde(deserialize_with = "columns_in_declared_order")]
    columns: Vec<(String, ManifestColumn)>,
    depends_on: DependsOn,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestColumn {
    description: Option<String>,
    data_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DependsOn {
    nodes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogArtifact {
    nodes: BTreeMap<String, CatalogNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogNode {
    columns: BTreeMap<String, CatalogColumn>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogColumn {
    #[serde(rename = "type")]
    data_type: Option<String>,
    comment: Option<String>,
    index: Option<u32>,
}

/// Read a JSON object of columns as a list, keeping the order the columns are declared in
fn columns_in_declared_order<'de, D>(
    deserializer: D,
) -> Result<Vec<(String, ManifestColumn)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ColumnsVisitor;

    impl<'de> Visitor<'de> for ColumnsVisitor {
        type Value = Vec<(String, ManifestColumn)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of column name to column")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut columns = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, column)) = map.next_entry::<String, ManifestColumn>()? {
                columns.push((name, column));
            }
            Ok(columns)
        }
    }

    deserializer.deserialize_map(ColumnsVisitor)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Reads rollup models out of a dbt project's `target/` artifacts
#[derive(Debug, Clone)]
pub struct DbtReader {
    project_path: PathBuf,
    rollup_prefix: String,
}

impl DbtReader {
    pub fn new(project_path: PathBuf, rollup_prefix: &str) -> Self {
        DbtReader {
            project_path,
            rollup_prefix: rollup_prefix.to_string(),
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.project_path.join("target").join("manifest.json")
    }

    fn catalog_path(&self) -> PathBuf {
        self.project_path.join("target").join("catalog.json")
    }

    /// Check the project layout without loading models
    pub fn validate(&self) -> Result<(), ReaderError> {
        if !self.project_path.exists() {
            return Err(ReaderError::ProjectNotFound(self.project_path.clone()));
        }
        if !self.project_path.join("dbt_project.yml").exists() {
            return Err(ReaderError::NotADbtProject(self.project_path.clone()));
        }
        let manifest = self.manifest_path();
        if !manifest.exists() {
            return Err(ReaderError::ManifestMissing(manifest));
        }
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ReaderError> {
        let text = fs::read_to_string(path).map_err(|source| ReaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ReaderError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_catalog_artifact(&self) -> CatalogArtifact {
        let path = self.catalog_path();
        if !path.exists() {
            return CatalogArtifact::default();
        }
        // Column types are a nice-to-have; a broken catalog.json is not fatal
        Self::read_json(&path).unwrap_or_else(|e| {
            log::warn!("ignoring {}: {e}", path.display());
            CatalogArtifact::default()
        })
    }

    /// Validate the project and load its name and rollup models
    pub fn load_project(&self) -> Result<Project, ReaderError> {
        self.validate()?;

        let manifest: Manifest = Self::read_json(&self.manifest_path())?;
        let catalog = self.load_catalog_artifact();

        let mut models: Vec<Model> = manifest
            .nodes
            .into_iter()
            .filter(|(_, node)| {
                node.resource_type == "model" && node.name.starts_with(&self.rollup_prefix)
            })
            .map(|(unique_id, node)| {
                let catalog_columns = catalog.nodes.get(&unique_id).map(|n| &n.columns);
                build_model(unique_id, node, catalog_columns)
            })
            .collect();

        models.sort_by(|a, b| a.name.cmp(&b.name));

        let name = manifest
            .metadata
            .project_name
            .unwrap_or_else(|| "Unknown Project".to_string());
        log::info!(
            "loaded project {name} with {} rollup models from {}",
            models.len(),
            self.project_path.display()
        );

        Ok(Project {
            name,
            path: self.project_path.display().to_string(),
            models,
        })
    }
}

/// Merge manifest columns with catalog column types. Columns keep their
/// declaration order unless the catalog records a column index; columns only
/// known to the catalog are added.
fn build_model(
    unique_id: String,
    node: ManifestNode,
    catalog_columns: Option<&BTreeMap<String, CatalogColumn>>,
) -> Model {
    let mut ordered: Vec<(Option<u32>, Column)> = Vec::with_capacity(node.columns.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for (name, col) in node.columns {
        // A repeated key keeps its first position
        if position.contains_key(&name) {
            continue;
        }
        position.insert(name.clone(), ordered.len());
        ordered.push((
            None,
            Column {
                name,
                declared_type: non_empty(col.data_type),
                description: non_empty(col.description),
            },
        ));
    }

    if let Some(catalog_columns) = catalog_columns {
        for (name, info) in catalog_columns {
            let pos = match position.get(name) {
                Some(&pos) => pos,
                None => {
                    position.insert(name.clone(), ordered.len());
                    ordered.push((
                        None,
                        Column {
                            name: name.clone(),
                            declared_type: None,
                            description: non_empty(info.comment.clone()),
                        },
                    ));
                    ordered.len() - 1
                }
            };
            let entry = &mut ordered[pos];
            entry.0 = info.index;
            if let Some(data_type) = non_empty(info.data_type.clone()) {
                entry.1.declared_type = Some(data_type);
            }
        }
    }

    // Stable, so columns without a catalog index stay in declaration order
    if ordered.iter().any(|(index, _)| index.is_some()) {
        ordered.sort_by_key(|(index, _)| index.unwrap_or(u32::MAX));
    }

    Model {
        unique_id,
        name: node.name,
        database: node.database,
        schema: node.schema,
        alias: node.alias,
        description: non_empty(node.description),
        tags: node.tags,
        original_file_path: node.original_file_path,
        depends_on: node.depends_on.nodes,
        columns: ordered.into_iter().map(|(_, c)| c).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_project(dir: &Path, with_catalog: bool) {
        fs::create_dir_all(dir.join("target")).unwrap();
        fs::write(dir.join("dbt_project.yml"), "name: test_project\n").unwrap();

        let manifest = serde_json::json!({
            "metadata": {"project_name": "test_project"},
            "nodes": {
                "model.test_project.rollup_emergency": {
                    "name": "rollup_emergency",
                    "resource_type": "model",
                    "database": "analytics",
                    "schema": "marts",
                    "description": "Emergency rollup model",
                    "columns": {
                        "presentations_value": {
                            "name": "presentations_value",
                            "description": "Total presentations",
                            "data_type": "INTEGER"
                        },
                        "los_4hr_numerator": {
                            "name": "los_4hr_numerator",
                            "description": ""
                        }
                    },
                    "depends_on": {"nodes": ["model.test_project.stg_emergency"]},
                    "original_file_path": "models/rollup/rollup_emergency.sql"
                },
                "model.test_project.regular_model": {
                    "name": "regular_model",
                    "resource_type": "model"
                },
                "test.test_project.rollup_check": {
                    "name": "rollup_check",
                    "resource_type": "test"
                }
            }
        });
        fs::write(dir.join("target/manifest.json"), manifest.to_string()).unwrap();

        if with_catalog {
            let catalog = serde_json::json!({
                "nodes": {
                    "model.test_project.rollup_emergency": {
                        "columns": {
                            "los_4hr_numerator": {"type": "BIGINT", "index": 2},
                            "los_4hr_denominator": {"type": "BIGINT", "index": 3, "comment": "All presentations"},
                            "presentations_value": {"type": "BIGINT", "index": 1}
                        }
                    }
                }
            });
            fs::write(dir.join("target/catalog.json"), catalog.to_string()).unwrap();
        }
    }

    #[test]
    fn test_load_rollup_models_only() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path(), false);

        let project = DbtReader::new(dir.path().to_path_buf(), "rollup_")
            .load_project()
            .unwrap();

        assert_eq!(project.name, "test_project");
        assert_eq!(project.models.len(), 1);
        let model = &project.models[0];
        assert_eq!(model.name, "rollup_emergency");
        assert_eq!(model.full_name(), "analytics.marts.rollup_emergency");
        assert_eq!(model.depends_on, vec!["model.test_project.stg_emergency"]);
        assert_eq!(model.columns.len(), 2);

        let numerator = model.columns.iter().find(|c| c.name == "los_4hr_numerator").unwrap();
        assert_eq!(numerator.description, None);
    }

    #[test]
    fn test_catalog_adds_types_and_order() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path(), true);

        let project = DbtReader::new(dir.path().to_path_buf(), "rollup_")
            .load_project()
            .unwrap();
        let model = &project.models[0];

        let names: Vec<&str> = model.column_names().collect();
        assert_eq!(
            names,
            vec!["presentations_value", "los_4hr_numerator", "los_4hr_denominator"]
        );
        assert_eq!(model.columns[0].declared_type.as_deref(), Some("BIGINT"));
        assert_eq!(model.columns[2].description.as_deref(), Some("All presentations"));
    }

    #[test]
    fn test_columns_keep_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path(), false);
        // Written by hand: the column order in the file is what is under test
        let manifest = r#"{
            "metadata": {"project_name": "beds"},
            "nodes": {
                "model.beds.rollup_beds": {
                    "name": "rollup_beds",
                    "resource_type": "model",
                    "columns": {
                        "beds_value": {"name": "beds_value"},
                        "beds_count": {"name": "beds_count"},
                        "available_numerator": {"name": "available_numerator"}
                    }
                }
            }
        }"#;
        fs::write(dir.path().join("target/manifest.json"), manifest).unwrap();

        let project = DbtReader::new(dir.path().to_path_buf(), "rollup_")
            .load_project()
            .unwrap();
        let model = &project.models[0];
        let names: Vec<&str> = model.column_names().collect();
        assert_eq!(names, vec!["beds_value", "beds_count", "available_numerator"]);

        let engine =
            crate::discovery::DiscoveryEngine::new(&crate::discovery::DiscoverySettings::default())
                .unwrap();
        let result = engine.analyze(model, &[]);
        let codes: Vec<(&str, &crate::discovery::CandidateSource)> = result
            .candidates
            .iter()
            .map(|c| (c.suggested_short_code.as_str(), &c.source))
            .collect();
        let direct = |value: &str| crate::discovery::CandidateSource::Direct {
            value: value.to_string(),
        };
        assert_eq!(
            codes,
            vec![("BEDS", &direct("beds_value")), ("BEDS_2", &direct("beds_count"))]
        );
    }

    #[test]
    fn test_broken_catalog_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path(), false);
        fs::write(dir.path().join("target/catalog.json"), "{not json").unwrap();

        let project = DbtReader::new(dir.path().to_path_buf(), "rollup_")
            .load_project()
            .unwrap();
        assert_eq!(project.models[0].columns.len(), 2);
    }

    #[test]
    fn test_validation_failures() {
        let reader = DbtReader::new(PathBuf::from("/definitely/not/here"), "rollup_");
        assert!(matches!(reader.validate(), Err(ReaderError::ProjectNotFound(_))));

        let dir = tempfile::tempdir().unwrap();
        let reader = DbtReader::new(dir.path().to_path_buf(), "rollup_");
        assert!(matches!(reader.validate(), Err(ReaderError::NotADbtProject(_))));

        fs::write(dir.path().join("dbt_project.yml"), "name: x\n").unwrap();
        assert!(matches!(reader.validate(), Err(ReaderError::ManifestMissing(_))));

        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/manifest.json"), "{\"nodes\": 42").unwrap();
        assert!(matches!(reader.load_project(), Err(ReaderError::Parse { .. })));
    }
}
