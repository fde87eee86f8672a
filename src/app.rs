//! Main application logic: one method per command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::catalog::{
    self, find_catalog_files, validate_catalog, CatalogMetric, CatalogStore, CatalogSummary,
    ConflictPolicy, CATALOG_FILE_NAME,
};
use crate::cli::{AppConfig, CatalogArgs, CatalogCommand, Commands, ConfigCommand};
use crate::config::Settings;
use crate::data::{DbtReader, Model, Project, ProjectHistory};
use crate::discovery::{CandidateSource, DiscoveryEngine, DiscoveryResult, MetricCandidate};
use crate::report;

/// Options shared by `discover` and `accept`
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    pub models: Vec<String>,
    pub min_confidence: f64,
}

/// Options for `accept`
#[derive(Debug, Clone, Default)]
pub struct AcceptOptions {
    pub discover: DiscoverOptions,
    pub policy: ConflictPolicy,
    pub include_existing: bool,
    pub dry_run: bool,
}

/// Application state
pub struct App {
    config: AppConfig,
    settings: Settings,
    engine: DiscoveryEngine,
    store: CatalogStore,
}

impl App {
    /// Create a new App instance
    pub fn new(config: AppConfig) -> Result<Self> {
        let settings = Settings::load(&config.settings_path());
        App::with_settings(config, settings)
    }

    pub fn with_settings(config: AppConfig, settings: Settings) -> Result<Self> {
        let engine = DiscoveryEngine::new(&settings.discovery)
            .with_context(|| format!("Invalid discovery settings in {:?}", config.settings_path()))?;
        let store = CatalogStore::new(config.backup_dir(), settings.project.backup_count);

        Ok(App {
            config,
            settings,
            engine,
            store,
        })
    }

    fn project_path(&self, project: Option<&str>) -> PathBuf {
        project
            .map(PathBuf::from)
            .or_else(|| self.settings.project.default_path.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Catalog given on the command line, else the one found in the project,
    /// else `seeds/metric_definitions.csv`
    fn catalog_path(&self, target: &CatalogArgs) -> PathBuf {
        if let Some(catalog) = &target.catalog {
            return PathBuf::from(catalog);
        }
        let project_dir = self.project_path(target.project.as_deref());
        find_catalog_files(&project_dir)
            .into_iter()
            .next()
            .unwrap_or_else(|| project_dir.join("seeds").join(CATALOG_FILE_NAME))
    }

    fn open_project(&self, path: &Path) -> Result<Project> {
        let reader = DbtReader::new(path.to_path_buf(), &self.settings.discovery.rollup_prefix);
        let project = reader
            .load_project()
            .with_context(|| format!("Failed to load dbt project at {path:?}"))?;
        Ok(project)
    }

    /// Remember an opened project; failures here never abort a command
    fn record_history(&self, project: &Project, metric_count: usize) {
        let recorded = ProjectHistory::open(&self.config.history_db_path()).and_then(|history| {
            history.record(&project.path, &project.name, project.models.len(), metric_count)
        });
        if let Err(e) = recorded {
            log::warn!("could not update project history: {e:#}");
        }
    }

    fn history(&self) -> Result<ProjectHistory> {
        ProjectHistory::open(&self.config.history_db_path())
    }

    /// List rollup models with what discovery would find in each
    pub fn models(&self, project: Option<&str>) -> Result<String> {
        let project = self.open_project(&self.project_path(project))?;
        let catalog = match find_catalog_files(Path::new(&project.path)).first() {
            Some(path) => self.store.read(path).unwrap_or_else(|e| {
                log::warn!("could not read catalog {}: {e:#}", path.display());
                Vec::new()
            }),
            None => Vec::new(),
        };
        self.record_history(&project, catalog.len());

        let results: Vec<DiscoveryResult> = project
            .models
            .iter()
            .map(|model| self.engine.analyze(model, &catalog))
            .collect();
        Ok(report::models_report(&project.models, &results))
    }

    /// Run discovery over the selected models against the current catalog
    pub fn discover(
        &self,
        target: &CatalogArgs,
        options: &DiscoverOptions,
    ) -> Result<(Vec<DiscoveryResult>, Vec<CatalogMetric>, PathBuf)> {
        let project = self.open_project(&self.project_path(target.project.as_deref()))?;
        let catalog_path = self.catalog_path(target);
        let existing = self.store.read_or_empty(&catalog_path)?;
        self.record_history(&project, existing.len());

        let models = select_models(&project.models, &options.models)?;
        log::info!(
            "analyzing {} models against {} catalog entries",
            models.len(),
            existing.len()
        );
        let results = self.engine.analyze_all(&models, &existing);
        Ok((results, existing, catalog_path))
    }

    /// Discovery results as JSON, without candidates below the confidence floor
    pub fn discover_json(&self, target: &CatalogArgs, options: &DiscoverOptions) -> Result<String> {
        let (mut results, _, _) = self.discover(target, options)?;
        for result in &mut results {
            result.retain_confident(options.min_confidence);
        }
        Ok(serde_json::to_string_pretty(&results)? + "\n")
    }

    /// Discover, then merge the accepted candidates into the catalog
    pub fn accept(&self, target: &CatalogArgs, options: &AcceptOptions) -> Result<String> {
        let (results, existing, catalog_path) = self.discover(target, &options.discover)?;

        let offered: Vec<&MetricCandidate> = if options.include_existing {
            results.iter().flat_map(|r| r.candidates.iter()).collect()
        } else {
            results.iter().flat_map(|r| r.new_candidates()).collect()
        };

        let mut accepted: Vec<MetricCandidate> = Vec::new();
        for candidate in offered {
            if candidate.confidence < options.discover.min_confidence {
                continue;
            }
            let errors = candidate.validate();
            if !errors.is_empty() {
                log::warn!(
                    "not accepting {}: {}",
                    candidate.suggested_short_code,
                    errors.join("; ")
                );
                continue;
            }
            accepted.push(candidate.clone());
        }

        let outcome = catalog::merge(&existing, &accepted, options.policy);
        let mut out = report::merge_report(&outcome);

        if options.dry_run {
            out.push_str("Dry run, catalog not written\n");
        } else if outcome.is_changed() {
            let backup = self.store.write(&catalog_path, &outcome.result)?;
            out.push_str(&format!("Wrote {}\n", catalog_path.display()));
            if let Some(backup) = backup {
                out.push_str(&format!("Backup at {}\n", backup.path.display()));
            }
        } else {
            out.push_str("Nothing to write\n");
        }
        Ok(out)
    }

    /// Load project models for the summary; a missing project only loses coverage
    fn models_for_summary(&self, target: &CatalogArgs) -> Vec<Model> {
        match self.open_project(&self.project_path(target.project.as_deref())) {
            Ok(project) => project.models,
            Err(e) => {
                log::warn!("{e:#}; coverage will not be reported");
                Vec::new()
            }
        }
    }

    pub fn catalog(&self, action: CatalogCommand) -> Result<String> {
        match action {
            CatalogCommand::List { target } => {
                let metrics = self.store.read(&self.catalog_path(&target))?;
                Ok(report::catalog_report(&metrics))
            }
            CatalogCommand::Validate { target } => {
                let metrics = self.store.read(&self.catalog_path(&target))?;
                let validation = validate_catalog(&metrics);
                let out = report::validation_report(&validation);
                if !validation.is_valid() {
                    anyhow::bail!("{}", out.trim_end());
                }
                Ok(out)
            }
            CatalogCommand::Summary { target } => {
                let metrics = self.store.read_or_empty(&self.catalog_path(&target))?;
                let models = self.models_for_summary(&target);
                Ok(report::summary_report(&CatalogSummary::new(&metrics, &models)))
            }
            CatalogCommand::Add {
                target,
                model,
                name,
                short,
                category,
                value,
                numerator,
                denominator,
                expression,
                description,
            } => {
                let source = match (value, numerator, denominator, expression) {
                    (Some(value), None, None, None) => CandidateSource::Direct { value },
                    (None, Some(numerator), Some(denominator), None) => CandidateSource::Ratio {
                        numerator,
                        denominator,
                    },
                    (None, None, None, Some(expression)) => CandidateSource::Custom { expression },
                    _ => anyhow::bail!(
                        "Give exactly one of --value, --numerator/--denominator or --expression"
                    ),
                };
                let mut candidate = MetricCandidate::manual(&model, &name, &short, category, source);
                candidate.description = description;

                let errors = candidate.validate();
                if !errors.is_empty() {
                    anyhow::bail!("Invalid metric: {}", errors.join("; "));
                }

                let path = self.catalog_path(&target);
                let existing = self.store.read_or_empty(&path)?;
                let outcome = catalog::merge(&existing, &[candidate], ConflictPolicy::Skip);
                if !outcome.conflicts.is_empty() {
                    anyhow::bail!("Short code {short} is already in {path:?}");
                }
                self.store.write(&path, &outcome.result)?;
                Ok(report::merge_report(&outcome))
            }
            CatalogCommand::Remove {
                target,
                short_codes,
            } => {
                let path = self.catalog_path(&target);
                let existing = self.store.read(&path)?;
                let (remaining, removed) = catalog::reconcile::remove(&existing, &short_codes);
                if removed == 0 {
                    return Ok("No matching metrics\n".to_string());
                }
                self.store.write(&path, &remaining)?;
                Ok(format!("Removed {removed} metrics from {}\n", path.display()))
            }
            CatalogCommand::Backups { target } => {
                let backups = self.store.list_backups(&self.catalog_path(&target))?;
                Ok(report::backups_report(&backups))
            }
            CatalogCommand::Restore { target, index } => {
                let path = self.catalog_path(&target);
                let backups = self.store.list_backups(&path)?;
                let backup = index
                    .checked_sub(1)
                    .and_then(|i| backups.get(i))
                    .with_context(|| format!("No backup #{index} for {path:?}"))?;
                self.store.restore(backup, &path)?;
                Ok(format!(
                    "Restored {} from {}\n",
                    path.display(),
                    backup.path.display()
                ))
            }
        }
    }

    pub fn history_report(&self, limit: usize, forget: Option<&str>) -> Result<String> {
        let history = self.history()?;
        if let Some(path) = forget {
            if history.forget(path)? {
                log::info!("removed {path} from history");
            } else {
                log::warn!("{path} was not in the history");
            }
        }
        Ok(report::history_report(&history.recent(limit)?))
    }

    pub fn config(&self, action: ConfigCommand) -> Result<String> {
        match action {
            ConfigCommand::Show => self.settings.to_pretty_json().map(|s| s + "\n"),
            ConfigCommand::Init { force } => {
                let path = self.config.settings_path();
                if path.exists() && !force {
                    anyhow::bail!("{path:?} already exists; use --force to replace it");
                }
                Settings::default().save(&path)?;
                Ok(format!("Wrote default settings to {}\n", path.display()))
            }
        }
    }
}

/// Pick models by name, keeping the requested order. No names selects all.
fn select_models(models: &[Model], names: &[String]) -> Result<Vec<Model>> {
    if names.is_empty() {
        return Ok(models.to_vec());
    }
    names
        .iter()
        .map(|name| {
            models
                .iter()
                .find(|m| &m.name == name)
                .cloned()
                .with_context(|| {
                    let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                    format!(
                        "Unknown model {name:?}; rollup models are: {}",
                        available.join(", ")
                    )
                })
        })
        .collect()
}

/// Run a parsed command and print its output
pub fn run(config: AppConfig, command: Commands) -> Result<()> {
    let app = App::new(config)?;

    let output = match command {
        Commands::Models { project } => app.models(project.as_deref())?,
        Commands::Discover {
            target,
            models,
            min_confidence,
            json,
        } => {
            let options = DiscoverOptions {
                models,
                min_confidence,
            };
            if json {
                app.discover_json(&target, &options)?
            } else {
                let (results, _, _) = app.discover(&target, &options)?;
                results
                    .iter()
                    .map(|r| report::discovery_report(r, min_confidence))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Commands::Accept {
            target,
            models,
            on_conflict,
            min_confidence,
            include_existing,
            dry_run,
        } => {
            let options = AcceptOptions {
                discover: DiscoverOptions {
                    models,
                    min_confidence,
                },
                policy: on_conflict,
                include_existing,
                dry_run,
            };
            app.accept(&target, &options)?
        }
        Commands::Catalog { action } => app.catalog(action)?,
        Commands::History { limit, forget } => app.history_report(limit, forget.as_deref())?,
        Commands::Config { action } => app.config(action)?,
    };

    print!("{output}");
    Ok(())
}
