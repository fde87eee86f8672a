//! dbt-metrics: discover metrics in dbt rollup models and keep the metric
//! catalog seed file in sync with them.

mod app;
mod catalog;
mod cli;
mod config;
mod data;
mod discovery;
mod report;

use anyhow::Result;
use cli::{AppConfig, Cli};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();
    let config = AppConfig::from_cli(cli.home, cli.verbose);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level()))
        .format_timestamp(None)
        .init();

    app::run(config, cli.command)
}
