//! Data layer for dbt project artifacts and local application state.
//!
//! Handles loading rollup models from a project's `target/` directory and
//! remembering which projects were opened recently.

mod history;
mod models;
mod reader;

pub use history::{ProjectHistory, RecentProject, RECENT_LIMIT};
pub use models::{Model, Project};
pub use reader::DbtReader;
