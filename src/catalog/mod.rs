//! The metric catalog: entries, validation, reconciliation and file storage.

mod metric;
pub mod reconcile;
mod store;
mod summary;
mod validation;

pub use metric::{CatalogMetric, MetricDefinition, MetricKind, MAX_SHORT_CODE_LEN};
pub use reconcile::{merge, ConflictPolicy, MergeOutcome};
pub use store::{find_catalog_files, Backup, CatalogStore, CATALOG_FILE_NAME};
pub use summary::CatalogSummary;
pub use validation::{validate_catalog, CatalogValidation};
