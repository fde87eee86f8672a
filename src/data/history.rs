//! SQLite-backed history of recently opened dbt projects.
//!
//! Schema:
//! - `project_history` table: id, path (unique), name, last_opened, model_count, metric_count

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// How many projects `recent` returns by default
pub const RECENT_LIMIT: usize = 10;

/// A project the user opened before
#[derive(Debug, Clone, PartialEq)]
pub struct RecentProject {
    pub path: String,
    pub name: String,
    pub last_opened: Option<DateTime<Utc>>,
    pub model_count: usize,
    pub metric_count: usize,
}

/// Parse a timestamp string into a DateTime<Utc>
fn parse_timestamp(timestamp: Option<String>) -> Option<DateTime<Utc>> {
    timestamp.and_then(|t| {
        DateTime::parse_from_rfc3339(&t)
            .or_else(|_| DateTime::parse_from_str(&t, "%Y-%m-%dT%H:%M:%S%.f%z"))
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Project history stored in `<app home>/app_state.db`
pub struct ProjectHistory {
    conn: Connection,
}

impl ProjectHistory {
    /// Open (creating if needed) the history database
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {parent:?}"))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {db_path:?}"))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS project_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                last_opened TEXT NOT NULL,
                model_count INTEGER NOT NULL DEFAULT 0,
                metric_count INTEGER NOT NULL DEFAULT 0
            )",
        )
        .with_context(|| format!("Failed to initialise history table in {db_path:?}"))?;

        Ok(ProjectHistory { conn })
    }

    /// Record that a project was opened now
    pub fn record(
        &self,
        path: &str,
        name: &str,
        model_count: usize,
        metric_count: usize,
    ) -> Result<()> {
        self.record_at(path, name, model_count, metric_count, Utc::now())
    }

    pub fn record_at(
        &self,
        path: &str,
        name: &str,
        model_count: usize,
        metric_count: usize,
        opened: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO project_history (path, name, last_opened, model_count, metric_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET
                    name = excluded.name,
                    last_opened = excluded.last_opened,
                    model_count = excluded.model_count,
                    metric_count = excluded.metric_count",
                params![
                    path,
                    name,
                    opened.to_rfc3339(),
                    model_count as i64,
                    metric_count as i64
                ],
            )
            .with_context(|| format!("Failed to record project {path}"))?;
        Ok(())
    }

    /// Most recently opened projects first
    pub fn recent(&self, limit: usize) -> Result<Vec<RecentProject>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, name, last_opened, model_count, metric_count
             FROM project_history
             ORDER BY last_opened DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let path: String = row.get(0)?;
            let name: String = row.get(1)?;
            let last_opened: Option<String> = row.get(2)?;
            let model_count: i64 = row.get(3)?;
            let metric_count: i64 = row.get(4)?;
            Ok((path, name, last_opened, model_count, metric_count))
        })?;

        let mut projects = Vec::new();
        for row in rows {
            let (path, name, last_opened, model_count, metric_count) = row?;
            projects.push(RecentProject {
                path,
                name,
                last_opened: parse_timestamp(last_opened),
                model_count: model_count.max(0) as usize,
                metric_count: metric_count.max(0) as usize,
            });
        }
        Ok(projects)
    }

    /// Drop a project from the history. Returns whether it was present.
    pub fn forget(&self, path: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM project_history WHERE path = ?1", [path])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_record_and_recent_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = ProjectHistory::open(&dir.path().join("state/app_state.db")).unwrap();

        history.record_at("/p/one", "one", 3, 10, ts(100)).unwrap();
        history.record_at("/p/two", "two", 1, 2, ts(200)).unwrap();

        let recent = history.recent(RECENT_LIMIT).unwrap();
        let paths: Vec<&str> = recent.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["/p/two", "/p/one"]);
        assert_eq!(recent[1].model_count, 3);
        assert_eq!(recent[1].last_opened, Some(ts(100)));
    }

    #[test]
    fn test_reopen_updates_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let history = ProjectHistory::open(&dir.path().join("app_state.db")).unwrap();

        history.record_at("/p/one", "one", 3, 10, ts(100)).unwrap();
        history.record_at("/p/two", "two", 1, 2, ts(200)).unwrap();
        history.record_at("/p/one", "one", 4, 12, ts(300)).unwrap();

        let recent = history.recent(RECENT_LIMIT).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "/p/one");
        assert_eq!(recent[0].metric_count, 12);
    }

    #[test]
    fn test_recent_limit_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let history = ProjectHistory::open(&dir.path().join("app_state.db")).unwrap();
        for i in 0..12 {
            history
                .record_at(&format!("/p/{i}"), "p", 0, 0, ts(i * 10))
                .unwrap();
        }

        assert_eq!(history.recent(RECENT_LIMIT).unwrap().len(), 10);
        assert!(history.forget("/p/11").unwrap());
        assert!(!history.forget("/p/11").unwrap());
        assert_eq!(history.recent(1).unwrap()[0].path, "/p/10");
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp(Some("1970-01-01T00:01:40+00:00".to_string())),
            Some(ts(100))
        );
        assert_eq!(parse_timestamp(Some("garbage".to_string())), None);
        assert_eq!(parse_timestamp(None), None);
    }
}
