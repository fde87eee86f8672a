//! Command-line interface argument parsing for dbt-metrics.
//!
//! - `dbt-metrics models ./analytics`
//! - `dbt-metrics discover ./analytics --model rollup_emergency`
//! - `dbt-metrics accept ./analytics --on-conflict rename --dry-run`
//! - `dbt-metrics catalog summary ./analytics`

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::catalog::ConflictPolicy;

/// Discover metrics in dbt rollup models and maintain the metric catalog.
#[derive(Parser, Debug)]
#[command(name = "dbt-metrics")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Application home holding config.json, history and backups.
    /// Defaults to $DBT_METRICS_HOME, then ~/.dbt-metrics-manager/
    #[arg(long, global = true)]
    pub home: Option<String>,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the catalog file lives
#[derive(Args, Debug, Clone, Default)]
pub struct CatalogArgs {
    /// Path to the dbt project (defaults to the configured project, then ".")
    pub project: Option<String>,

    /// Catalog CSV to use instead of the one found in the project
    #[arg(long)]
    pub catalog: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List rollup models with column counts
    Models {
        /// Path to the dbt project
        project: Option<String>,
    },

    /// Suggest metrics for rollup models
    Discover {
        #[command(flatten)]
        target: CatalogArgs,

        /// Only analyse these models (repeatable)
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// Hide candidates below this confidence
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discover and add the suggested metrics to the catalog
    Accept {
        #[command(flatten)]
        target: CatalogArgs,

        /// Only analyse these models (repeatable)
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// What to do when a short code is already in the catalog: skip, overwrite or rename
        #[arg(long, default_value = "skip")]
        on_conflict: ConflictPolicy,

        /// Only accept candidates at or above this confidence
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,

        /// Also accept candidates whose short code already exists
        #[arg(long)]
        include_existing: bool,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect and edit the catalog file
    Catalog {
        #[command(subcommand)]
        action: CatalogCommand,
    },

    /// Show recently opened projects
    History {
        /// Number of projects to show
        #[arg(short, long, default_value_t = crate::data::RECENT_LIMIT)]
        limit: usize,

        /// Remove a project from the history
        #[arg(long)]
        forget: Option<String>,
    },

    /// Show or initialise config.json
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Print every metric in the catalog
    List {
        #[command(flatten)]
        target: CatalogArgs,
    },
    /// Check the catalog for invalid rows and duplicates
    Validate {
        #[command(flatten)]
        target: CatalogArgs,
    },
    /// Totals by kind, category and model, with model coverage
    Summary {
        #[command(flatten)]
        target: CatalogArgs,
    },
    /// Add a metric by hand
    Add {
        #[command(flatten)]
        target: CatalogArgs,

        /// Source model name
        #[arg(long)]
        model: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Unique short code
        #[arg(long)]
        short: String,

        #[arg(long)]
        category: Option<String>,

        /// Value column of a direct metric
        #[arg(long, conflicts_with_all = ["numerator", "denominator", "expression"])]
        value: Option<String>,

        /// Numerator column of a ratio metric
        #[arg(long, requires = "denominator", conflicts_with = "expression")]
        numerator: Option<String>,

        /// Denominator column of a ratio metric
        #[arg(long, requires = "numerator", conflicts_with = "expression")]
        denominator: Option<String>,

        /// Expression of a custom metric
        #[arg(long)]
        expression: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },
    /// Delete metrics by short code
    Remove {
        #[command(flatten)]
        target: CatalogArgs,

        /// Short codes to delete
        #[arg(short, long = "short", required = true)]
        short_codes: Vec<String>,
    },
    /// List backups of the catalog, newest first
    Backups {
        #[command(flatten)]
        target: CatalogArgs,
    },
    /// Put a backup back in place
    Restore {
        #[command(flatten)]
        target: CatalogArgs,

        /// Which backup to restore, 1 being the newest
        #[arg(long, default_value_t = 1)]
        index: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective settings
    Show,
    /// Write the default settings to config.json
    Init {
        /// Replace an existing config.json
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub home: PathBuf,
    pub verbosity: u8,
}

impl AppConfig {
    /// Create AppConfig from the global CLI options
    pub fn from_cli(home: Option<String>, verbosity: u8) -> Self {
        AppConfig::resolve(home, std::env::var("DBT_METRICS_HOME").ok(), verbosity)
    }

    fn resolve(home: Option<String>, env_home: Option<String>, verbosity: u8) -> Self {
        let home = home
            .or(env_home)
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".dbt-metrics-manager")
            });

        AppConfig { home, verbosity }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.home.join(crate::config::SETTINGS_FILE_NAME)
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.home.join("app_state.db")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.home.join("backups")
    }

    /// Log filter used when RUST_LOG is not set
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_home_resolution_order() {
        let config = AppConfig::resolve(Some("/a".to_string()), Some("/b".to_string()), 0);
        assert_eq!(config.home, PathBuf::from("/a"));

        let config = AppConfig::resolve(None, Some("/b".to_string()), 0);
        assert_eq!(config.home, PathBuf::from("/b"));
        assert_eq!(config.settings_path(), PathBuf::from("/b/config.json"));

        let config = AppConfig::resolve(None, None, 0);
        assert!(config.home.ends_with(".dbt-metrics-manager"));
    }

    #[test]
    fn test_log_level() {
        assert_eq!(AppConfig::resolve(None, None, 0).log_level(), "warn");
        assert_eq!(AppConfig::resolve(None, None, 1).log_level(), "info");
        assert_eq!(AppConfig::resolve(None, None, 3).log_level(), "debug");
    }

    #[test]
    fn test_parse_accept() {
        let cli = Cli::try_parse_from([
            "dbt-metrics",
            "-v",
            "accept",
            "./proj",
            "--model",
            "rollup_a",
            "--model",
            "rollup_b",
            "--on-conflict",
            "rename",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Accept {
                target,
                models,
                on_conflict,
                dry_run,
                include_existing,
                ..
            } => {
                assert_eq!(target.project.as_deref(), Some("./proj"));
                assert_eq!(models, vec!["rollup_a", "rollup_b"]);
                assert_eq!(on_conflict, ConflictPolicy::Rename);
                assert!(dry_run);
                assert!(!include_existing);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_bad_conflict_policy_rejected() {
        let result = Cli::try_parse_from(["dbt-metrics", "accept", "--on-conflict", "merge"]);
        assert!(result.is_err());
    }
}
