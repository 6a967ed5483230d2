//! `repoql summarize commits`: an activity report over `commits` and `stats`.
//!
//! Commits in range are scanned once into a temporary table, then each of
//! them is diffed once into a second one. Every figure in the report is
//! aggregated from those.

use std::fmt::Write as _;

use chrono::NaiveDate;
use comfy_table::Cell;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::cli::output::create_table;
use crate::error::{RepoqlError, Result};
use crate::sql::Engine;

/// Filters for a commit summary. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    /// SQL LIKE pattern; only commits touching a matching path count.
    pub path_pattern: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Effective date bounds (YYYY-MM-DD) after resolving modifiers.
    pub start: Option<String>,
    pub end: Option<String>,
    pub path_pattern: Option<String>,
    pub commits: i64,
    pub non_merge_commits: i64,
    pub distinct_authors: i64,
    pub files_changed: i64,
    pub additions: i64,
    pub deletions: i64,
    /// UTC, `YYYY-MM-DD HH:MM:SS`.
    pub first_commit: Option<String>,
    pub last_commit: Option<String>,
    pub authors: Vec<AuthorSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorSummary {
    pub name: String,
    pub email: String,
    pub commits: i64,
    pub additions: i64,
    pub deletions: i64,
    pub files_changed: i64,
    pub first_commit: Option<String>,
    pub last_commit: Option<String>,
}

/// Resolves a date argument to `YYYY-MM-DD`.
///
/// Accepts a literal date or a SQLite date modifier applied to now, such
/// as `-7 days` or `start of month`.
pub fn resolve_date(conn: &Connection, input: Option<&str>) -> Result<Option<String>> {
    let Some(input) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(Some(date.format("%Y-%m-%d").to_string()));
    }
    let resolved: Option<String> = conn.query_row("SELECT date('now', ?1)", [input], |row| row.get(0))?;
    resolved
        .map(Some)
        .ok_or_else(|| RepoqlError::InvalidDate(input.to_string()))
}

const SCAN_COMMITS: &str = "
CREATE TEMP TABLE summary_commits AS
SELECT hash, author_name, author_email, datetime(author_when) AS authored_at, parents
FROM commits
WHERE (?1 IS NULL OR date(author_when) >= ?1)
  AND (?2 IS NULL OR date(author_when) <= ?2)";

// One single-commit `stats` scan per selected commit; history outside the
// date range is never diffed.
const SCAN_CHANGES: &str = "
CREATE TEMP TABLE summary_changes AS
SELECT s.commit_hash, s.file_path, s.additions, s.deletions
FROM temp.summary_commits c
JOIN stats s ON s.revision = c.hash AND s.max_count = 1
WHERE (?1 IS NULL OR s.file_path LIKE ?1)";

const TOTALS: &str = "
SELECT count(*), coalesce(sum(parents < 2), 0), min(authored_at), max(authored_at)
FROM temp.summary_commits";

const CHANGE_TOTALS: &str = "
SELECT count(DISTINCT file_path), coalesce(sum(additions), 0), coalesce(sum(deletions), 0)
FROM temp.summary_changes";

const BY_AUTHOR: &str = "
WITH per_author_files AS (
    SELECT c.author_name, c.author_email, count(DISTINCT x.file_path) AS files
    FROM temp.summary_commits c
    JOIN temp.summary_changes x ON x.commit_hash = c.hash
    GROUP BY c.author_name, c.author_email
),
per_commit AS (
    SELECT commit_hash, sum(additions) AS additions, sum(deletions) AS deletions
    FROM temp.summary_changes
    GROUP BY commit_hash
)
SELECT c.author_name, c.author_email, count(*) AS commits,
       coalesce(sum(p.additions), 0), coalesce(sum(p.deletions), 0),
       coalesce(f.files, 0), min(c.authored_at), max(c.authored_at)
FROM temp.summary_commits c
LEFT JOIN per_commit p ON p.commit_hash = c.hash
LEFT JOIN per_author_files f ON f.author_name = c.author_name AND f.author_email = c.author_email
GROUP BY c.author_name, c.author_email
ORDER BY commits DESC, c.author_email, c.author_name";

const CLEANUP: &str = "
DROP TABLE IF EXISTS temp.summary_commits;
DROP TABLE IF EXISTS temp.summary_changes;";

/// Builds the summary for the engine's default repository.
pub fn summarize_commits(engine: &Engine, filter: &SummaryFilter) -> Result<CommitSummary> {
    let conn = engine.connection();
    let start = resolve_date(conn, filter.start.as_deref())?;
    let end = resolve_date(conn, filter.end.as_deref())?;
    let pattern = filter
        .path_pattern
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    engine.context().reset_cancellation();
    conn.execute_batch(CLEANUP)?;
    let summary = collect(conn, start, end, pattern).map_err(|e| match e {
        RepoqlError::Sql(err) => engine.classify(err),
        other => other,
    });
    conn.execute_batch(CLEANUP)?;
    summary
}

fn collect(
    conn: &Connection,
    start: Option<String>,
    end: Option<String>,
    pattern: Option<&str>,
) -> Result<CommitSummary> {
    conn.execute(SCAN_COMMITS, params![start, end])?;
    conn.execute(SCAN_CHANGES, params![pattern])?;
    if pattern.is_some() {
        conn.execute(
            "DELETE FROM temp.summary_commits
             WHERE hash NOT IN (SELECT commit_hash FROM temp.summary_changes)",
            [],
        )?;
    }

    let (commits, non_merge_commits, first_commit, last_commit) =
        conn.query_row(TOTALS, [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
    let (files_changed, additions, deletions) = conn.query_row(CHANGE_TOTALS, [], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?;

    let mut stmt = conn.prepare(BY_AUTHOR)?;
    let authors = stmt
        .query_map([], |row| {
            Ok(AuthorSummary {
                name: row.get(0)?,
                email: row.get(1)?,
                commits: row.get(2)?,
                additions: row.get(3)?,
                deletions: row.get(4)?,
                files_changed: row.get(5)?,
                first_commit: row.get(6)?,
                last_commit: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(CommitSummary {
        start,
        end,
        path_pattern: pattern.map(str::to_string),
        commits,
        non_merge_commits,
        distinct_authors: authors.len() as i64,
        files_changed,
        additions,
        deletions,
        first_commit,
        last_commit,
        authors,
    })
}

impl CommitSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn range(&self) -> String {
        match (&self.start, &self.end) {
            (None, None) => "all time".to_string(),
            (Some(s), None) => format!("since {s}"),
            (None, Some(e)) => format!("until {e}"),
            (Some(s), Some(e)) => format!("{s} to {e}"),
        }
    }

    /// Tables for an interactive terminal.
    pub fn render_table(&self) -> String {
        let mut overview = create_table();
        let rows: Vec<(&str, String)> = vec![
            ("Range", self.range()),
            ("Files", self.path_pattern.clone().unwrap_or_else(|| "%".to_string())),
            ("Commits", self.commits.to_string()),
            ("Non-merge commits", self.non_merge_commits.to_string()),
            ("Authors", self.distinct_authors.to_string()),
            ("Files changed", self.files_changed.to_string()),
            ("Additions", format!("+{}", self.additions)),
            ("Deletions", format!("-{}", self.deletions)),
            ("First commit", self.first_commit.clone().unwrap_or_default()),
            ("Last commit", self.last_commit.clone().unwrap_or_default()),
        ];
        for (label, value) in rows {
            overview.add_row(vec![Cell::new(label), Cell::new(value)]);
        }

        let mut authors = create_table();
        authors.set_header(vec!["Author", "Email", "Commits", "+", "-", "Files", "Last commit"]);
        for a in &self.authors {
            authors.add_row(vec![
                Cell::new(&a.name),
                Cell::new(&a.email),
                Cell::new(a.commits),
                Cell::new(a.additions),
                Cell::new(a.deletions),
                Cell::new(a.files_changed),
                Cell::new(a.last_commit.as_deref().unwrap_or_default()),
            ]);
        }

        format!("{overview}\n{authors}")
    }

    /// Plain text for pipes and files.
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Range: {}", self.range());
        if let Some(pattern) = &self.path_pattern {
            let _ = writeln!(out, "Files: {pattern}");
        }
        let _ = writeln!(out, "Commits: {}", self.commits);
        let _ = writeln!(out, "Non-merge commits: {}", self.non_merge_commits);
        let _ = writeln!(out, "Authors: {}", self.distinct_authors);
        let _ = writeln!(out, "Files changed: {}", self.files_changed);
        let _ = writeln!(out, "Additions: {}", self.additions);
        let _ = writeln!(out, "Deletions: {}", self.deletions);
        if let (Some(first), Some(last)) = (&self.first_commit, &self.last_commit) {
            let _ = writeln!(out, "First commit: {first}");
            let _ = writeln!(out, "Last commit: {last}");
        }
        if !self.authors.is_empty() {
            let _ = writeln!(out);
            for a in &self.authors {
                let _ = writeln!(
                    out,
                    "{} <{}>: {} commits, +{} -{}, {} files",
                    a.name, a.email, a.commits, a.additions, a.deletions, a.files_changed
                );
            }
        }
        out
    }
}
