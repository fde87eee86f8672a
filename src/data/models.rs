//! Data models representing a dbt project's rollup models.

use serde::{Deserialize, Serialize};

/// A dbt project as seen from its build artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: String,
    pub models: Vec<Model>,
}

/// A single output column of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub declared_type: Option<String>,
    pub description: Option<String>,
}

impl Column {
    /// Create a column carrying only a name
    #[cfg(test)]
    pub fn named(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            declared_type: None,
            description: None,
        }
    }
}

/// A dbt model whose output columns are candidates for metric extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub unique_id: String,
    pub name: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub alias: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub original_file_path: Option<String>,
    pub depends_on: Vec<String>,
    pub columns: Vec<Column>,
}

impl Model {
    /// Create a model from a name and a list of column names
    #[cfg(test)]
    pub fn with_columns<I, S>(name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Model {
            unique_id: format!("model.{name}"),
            name: name.to_string(),
            columns: columns.into_iter().map(Column::named).collect(),
            ..Model::default()
        }
    }

    /// Fully qualified `database.schema.alias` name
    pub fn full_name(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(database) = self.database.as_deref() {
            parts.push(database);
        }
        if let Some(schema) = self.schema.as_deref() {
            parts.push(schema);
        }
        parts.push(self.alias.as_deref().unwrap_or(&self.name));
        parts.join(".")
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
