use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use progress_core::{
    enforce_monotonic, CommentId, ContractId, Criterion, FreelancerId, PageRequest,
    ProgressComment, ProgressError, ProgressUpdate, ProjectId, SortDirection, SortField, SortSpec,
    UpdateDraft, UpdateFilter, UpdateId,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, DatabaseName, TransactionBehavior};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS progress_updates (
  update_id TEXT PRIMARY KEY,
  project_id INTEGER NOT NULL,
  contract_id INTEGER NOT NULL,
  freelancer_id INTEGER NOT NULL,
  title TEXT NOT NULL,
  description TEXT,
  progress_percentage INTEGER NOT NULL CHECK (progress_percentage BETWEEN 0 AND 100),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS progress_comments (
  comment_id TEXT PRIMARY KEY,
  update_id TEXT NOT NULL,
  user_id INTEGER NOT NULL,
  message TEXT NOT NULL,
  created_at TEXT NOT NULL,
  FOREIGN KEY (update_id) REFERENCES progress_updates(update_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_progress_updates_project ON progress_updates(project_id);
CREATE INDEX IF NOT EXISTS idx_progress_updates_contract ON progress_updates(contract_id);
CREATE INDEX IF NOT EXISTS idx_progress_updates_freelancer ON progress_updates(freelancer_id);
CREATE INDEX IF NOT EXISTS idx_progress_updates_project_updated ON progress_updates(project_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_progress_comments_update ON progress_comments(update_id);
";

const UPDATE_COLUMNS: &str = "update_id, project_id, contract_id, freelancer_id, title, \
                              description, progress_percentage, created_at, updated_at";
const COMMENT_COLUMNS: &str = "comment_id, update_id, user_id, message, created_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// One page of the filtered list scan plus total-count metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdatePage {
    pub items: Vec<ProgressUpdate>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

/// Typed row of the per-project `MAX(updated_at)` aggregate scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectLastUpdate {
    pub project_id: ProjectId,
    pub last_update_at: OffsetDateTime,
}

/// Typed row of the per-freelancer update-count aggregate scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreelancerUpdateCount {
    pub freelancer_id: FreelancerId,
    pub update_count: u64,
}

/// Typed row of the per-project update-count aggregate scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectUpdateCount {
    pub project_id: ProjectId,
    pub update_count: u64,
}

/// Full-table aggregate row backing the dashboard statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DashboardRow {
    pub total_updates: u64,
    pub average_progress_percentage: Option<f64>,
    pub distinct_project_count: u64,
    pub distinct_freelancer_count: u64,
}

impl SqliteStore {
    /// Open a SQLite-backed progress store and configure required runtime
    /// pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema
    /// version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step
    /// fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version < 1 {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Create a SQLite backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup
    /// fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Restore this database from a SQLite backup file, then migrate to
    /// latest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, restore fails, or
    /// migrations fail.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<()> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| {
                format!("failed to restore sqlite backup from {}", in_file.display())
            })?;

        self.migrate()?;
        Ok(())
    }

    /// Persist one new progress update, enforcing the monotonic invariant.
    ///
    /// The `IMMEDIATE` transaction takes the database write lock before the
    /// max-percentage scan, so the check-then-act sequence cannot interleave
    /// with another writer for the same project.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] on field violations,
    /// [`ProgressError::CannotDecrease`] when the percentage regresses, or a
    /// storage error when the write fails.
    pub fn insert_update(&mut self, update: &ProgressUpdate) -> Result<()> {
        update.validate()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start write transaction")?;

        let stored_max = max_percentage_for_project(&tx, update.project_id)?;
        enforce_monotonic(stored_max, update.progress_percentage)?;

        tx.execute(
            "INSERT INTO progress_updates(
                update_id, project_id, contract_id, freelancer_id, title,
                description, progress_percentage, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                update.id.to_string(),
                update.project_id.0,
                update.contract_id.0,
                update.freelancer_id.0,
                update.title,
                update.description,
                i64::from(update.progress_percentage),
                encode_ts(update.created_at),
                encode_ts(update.updated_at),
            ],
        )
        .context("failed to insert progress update")?;

        tx.commit().context("failed to commit write transaction")?;
        Ok(())
    }

    /// Overwrite the mutable fields of an existing update, enforcing the
    /// monotonic invariant against the target project of the write.
    ///
    /// # Errors
    /// Returns [`ProgressError::UpdateNotFound`] when the id is absent,
    /// [`ProgressError::Validation`] / [`ProgressError::CannotDecrease`] on
    /// invariant violations, or a storage error.
    pub fn modify_update(
        &mut self,
        id: UpdateId,
        draft: &UpdateDraft,
        updated_at: OffsetDateTime,
    ) -> Result<ProgressUpdate> {
        draft.validate()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start write transaction")?;

        let existing = fetch_update(&tx, id)?.ok_or(ProgressError::UpdateNotFound(id))?;
        let stored_max = max_percentage_for_project(&tx, draft.project_id)?;
        enforce_monotonic(stored_max, draft.progress_percentage)?;

        tx.execute(
            "UPDATE progress_updates SET
                project_id = ?1, contract_id = ?2, freelancer_id = ?3, title = ?4,
                description = ?5, progress_percentage = ?6, updated_at = ?7
             WHERE update_id = ?8",
            params![
                draft.project_id.0,
                draft.contract_id.0,
                draft.freelancer_id.0,
                draft.title,
                draft.description,
                i64::from(draft.progress_percentage),
                encode_ts(updated_at),
                id.to_string(),
            ],
        )
        .context("failed to overwrite progress update")?;

        tx.commit().context("failed to commit write transaction")?;

        Ok(ProgressUpdate {
            id,
            project_id: draft.project_id,
            contract_id: draft.contract_id,
            freelancer_id: draft.freelancer_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            progress_percentage: draft.progress_percentage,
            created_at: existing.created_at,
            updated_at,
        })
    }

    /// Point lookup by id.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_update(&self, id: UpdateId) -> Result<Option<ProgressUpdate>> {
        fetch_update(&self.conn, id)
    }

    /// Delete one update; comments cascade through the foreign key.
    ///
    /// # Errors
    /// Returns [`ProgressError::UpdateNotFound`] when the id is absent.
    pub fn delete_update(&mut self, id: UpdateId) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start delete transaction")?;
        let deleted = tx
            .execute("DELETE FROM progress_updates WHERE update_id = ?1", params![id.to_string()])
            .context("failed to delete progress update")?;
        if deleted == 0 {
            return Err(ProgressError::UpdateNotFound(id).into());
        }
        tx.commit().context("failed to commit delete transaction")?;
        Ok(())
    }

    /// Load all updates, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_updates(&self) -> Result<Vec<ProgressUpdate>> {
        self.list_updates_where("", &[])
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn updates_by_project(&self, project_id: ProjectId) -> Result<Vec<ProgressUpdate>> {
        self.list_updates_where(" WHERE project_id = ?", &[SqlValue::Integer(project_id.0)])
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn updates_by_contract(&self, contract_id: ContractId) -> Result<Vec<ProgressUpdate>> {
        self.list_updates_where(" WHERE contract_id = ?", &[SqlValue::Integer(contract_id.0)])
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn updates_by_freelancer(
        &self,
        freelancer_id: FreelancerId,
    ) -> Result<Vec<ProgressUpdate>> {
        self.list_updates_where(" WHERE freelancer_id = ?", &[SqlValue::Integer(freelancer_id.0)])
    }

    /// Range scan backing the trend series: one project's updates whose
    /// `created_at` falls within `[from, to]`.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn updates_by_project_between(
        &self,
        project_id: ProjectId,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<ProgressUpdate>> {
        self.list_updates_where(
            " WHERE project_id = ? AND created_at >= ? AND created_at <= ?",
            &[
                SqlValue::Integer(project_id.0),
                SqlValue::Text(encode_ts(from)),
                SqlValue::Text(encode_ts(to)),
            ],
        )
    }

    /// Predicate-filtered, sorted, paginated scan with total-count metadata.
    ///
    /// Every present filter criterion contributes one SQL conjunct; the
    /// criterion list is the same one that drives the in-memory predicate.
    /// Each sort order carries an id tie-break so pagination is stable.
    ///
    /// # Errors
    /// Returns an error when the scan fails or rows cannot be decoded.
    pub fn query_updates(&self, filter: &UpdateFilter, page: &PageRequest) -> Result<UpdatePage> {
        let criteria = filter.criteria();
        let (where_sql, criteria_params) = render_criteria(&criteria);

        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM progress_updates{where_sql}"),
                params_from_iter(criteria_params.iter()),
                |row| row.get(0),
            )
            .context("failed to count filtered progress updates")?;

        let size = page.size.max(1);
        let offset = i64::from(page.page) * i64::from(size);
        let sql = format!(
            "SELECT {UPDATE_COLUMNS} FROM progress_updates{where_sql}{} LIMIT ? OFFSET ?",
            order_sql(&page.sort)
        );

        let mut scan_params = criteria_params;
        scan_params.push(SqlValue::Integer(i64::from(size)));
        scan_params.push(SqlValue::Integer(offset));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(scan_params.iter()))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(decode_update_row(row)?);
        }

        Ok(UpdatePage {
            items,
            page: page.page,
            size,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    /// Lookup backing the staleness report's second step: the update of one
    /// project at exactly `updated_at` (latest id wins on collisions).
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn find_update_at(
        &self,
        project_id: ProjectId,
        updated_at: OffsetDateTime,
    ) -> Result<Option<ProgressUpdate>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {UPDATE_COLUMNS} FROM progress_updates
             WHERE project_id = ?1 AND updated_at = ?2
             ORDER BY update_id DESC LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![project_id.0, encode_ts(updated_at)])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_update_row(row)?)),
            None => Ok(None),
        }
    }

    /// Grouped aggregate scan: every project with the timestamp of its most
    /// recent update.
    ///
    /// # Errors
    /// Returns an error when the scan fails or rows cannot be decoded.
    pub fn project_last_updates(&self) -> Result<Vec<ProjectLastUpdate>> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, MAX(updated_at) FROM progress_updates
             GROUP BY project_id ORDER BY project_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(1)?;
            result.push(ProjectLastUpdate {
                project_id: ProjectId(row.get(0)?),
                last_update_at: decode_ts(&raw)?,
            });
        }
        Ok(result)
    }

    /// Grouped aggregate scan: freelancers by update count descending, id
    /// ascending on ties, at most `limit` rows.
    ///
    /// # Errors
    /// Returns an error when the scan fails or rows cannot be decoded.
    pub fn freelancer_update_counts(&self, limit: u32) -> Result<Vec<FreelancerUpdateCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT freelancer_id, COUNT(*) FROM progress_updates
             GROUP BY freelancer_id ORDER BY COUNT(*) DESC, freelancer_id ASC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![i64::from(limit)])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let count: i64 = row.get(1)?;
            result.push(FreelancerUpdateCount {
                freelancer_id: FreelancerId(row.get(0)?),
                update_count: u64::try_from(count).unwrap_or(0),
            });
        }
        Ok(result)
    }

    /// Grouped aggregate scan: projects by update count descending within an
    /// optional inclusive `created_at` window.
    ///
    /// # Errors
    /// Returns an error when the scan fails or rows cannot be decoded.
    pub fn project_update_counts(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
        limit: u32,
    ) -> Result<Vec<ProjectUpdateCount>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(bound) = from {
            clauses.push("created_at >= ?");
            values.push(SqlValue::Text(encode_ts(bound)));
        }
        if let Some(bound) = to {
            clauses.push("created_at <= ?");
            values.push(SqlValue::Text(encode_ts(bound)));
        }
        let where_sql =
            if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) };
        values.push(SqlValue::Integer(i64::from(limit)));

        let sql = format!(
            "SELECT project_id, COUNT(*) FROM progress_updates{where_sql}
             GROUP BY project_id ORDER BY COUNT(*) DESC, project_id ASC LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let count: i64 = row.get(1)?;
            result.push(ProjectUpdateCount {
                project_id: ProjectId(row.get(0)?),
                update_count: u64::try_from(count).unwrap_or(0),
            });
        }
        Ok(result)
    }

    /// Full-table aggregate backing the dashboard statistics. The average is
    /// `None`, not zero, when the table is empty.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn dashboard_row(&self) -> Result<DashboardRow> {
        let row = self
            .conn
            .query_row(
                "SELECT COUNT(*), AVG(progress_percentage),
                        COUNT(DISTINCT project_id), COUNT(DISTINCT freelancer_id)
                 FROM progress_updates",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .context("failed to aggregate dashboard statistics")?;

        Ok(DashboardRow {
            total_updates: u64::try_from(row.0).unwrap_or(0),
            average_progress_percentage: row.1,
            distinct_project_count: u64::try_from(row.2).unwrap_or(0),
            distinct_freelancer_count: u64::try_from(row.3).unwrap_or(0),
        })
    }

    /// Persist one comment; the caller has already verified the parent
    /// update and the author.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] on a blank message or a storage
    /// error when the write fails.
    pub fn insert_comment(&mut self, comment: &ProgressComment) -> Result<()> {
        comment.validate()?;

        let tx = self.conn.transaction().context("failed to start comment transaction")?;
        tx.execute(
            "INSERT INTO progress_comments(comment_id, update_id, user_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id.to_string(),
                comment.progress_update_id.to_string(),
                comment.user_id.0,
                comment.message,
                encode_ts(comment.created_at),
            ],
        )
        .context("failed to insert progress comment")?;
        tx.commit().context("failed to commit comment transaction")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_comment(&self, id: CommentId) -> Result<Option<ProgressComment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM progress_comments WHERE comment_id = ?1"
        ))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_comment_row(row)?)),
            None => Ok(None),
        }
    }

    /// Load all comments, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_comments(&self) -> Result<Vec<ProgressComment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM progress_comments
             ORDER BY created_at DESC, comment_id ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next()? {
            comments.push(decode_comment_row(row)?);
        }
        Ok(comments)
    }

    /// Comments of one update in conversation order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn comments_by_update(&self, update_id: UpdateId) -> Result<Vec<ProgressComment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM progress_comments
             WHERE update_id = ?1 ORDER BY created_at ASC, comment_id ASC"
        ))?;
        let mut rows = stmt.query(params![update_id.to_string()])?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next()? {
            comments.push(decode_comment_row(row)?);
        }
        Ok(comments)
    }

    /// Replace one comment's message; the only mutable field.
    ///
    /// # Errors
    /// Returns [`ProgressError::CommentNotFound`] when the id is absent or
    /// [`ProgressError::Validation`] on a blank message.
    pub fn set_comment_message(&mut self, id: CommentId, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(ProgressError::Validation("message MUST be non-blank".to_string()).into());
        }
        let changed = self
            .conn
            .execute(
                "UPDATE progress_comments SET message = ?1 WHERE comment_id = ?2",
                params![message, id.to_string()],
            )
            .context("failed to update progress comment")?;
        if changed == 0 {
            return Err(ProgressError::CommentNotFound(id).into());
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`ProgressError::CommentNotFound`] when the id is absent.
    pub fn delete_comment(&mut self, id: CommentId) -> Result<()> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM progress_comments WHERE comment_id = ?1",
                params![id.to_string()],
            )
            .context("failed to delete progress comment")?;
        if deleted == 0 {
            return Err(ProgressError::CommentNotFound(id).into());
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_comments(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM progress_comments", [], |row| row.get(0))
            .context("failed to count progress comments")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_comments_by_project(&self, project_id: ProjectId) -> Result<u64> {
        self.count_comments_where("u.project_id", project_id.0)
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_comments_by_contract(&self, contract_id: ContractId) -> Result<u64> {
        self.count_comments_where("u.contract_id", contract_id.0)
    }

    /// Count comments on updates submitted by one freelancer.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count_comments_by_freelancer(&self, freelancer_id: FreelancerId) -> Result<u64> {
        self.count_comments_where("u.freelancer_id", freelancer_id.0)
    }

    fn count_comments_where(&self, column: &str, id: i64) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM progress_comments c
             JOIN progress_updates u ON u.update_id = c.update_id
             WHERE {column} = ?1"
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params![id], |row| row.get(0))
            .context("failed to count comments for subset")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn list_updates_where(&self, where_sql: &str, values: &[SqlValue]) -> Result<Vec<ProgressUpdate>> {
        let sql = format!(
            "SELECT {UPDATE_COLUMNS} FROM progress_updates{where_sql}
             ORDER BY created_at DESC, update_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut updates = Vec::new();
        while let Some(row) = rows.next()? {
            updates.push(decode_update_row(row)?);
        }
        Ok(updates)
    }
}

fn max_percentage_for_project(conn: &Connection, project_id: ProjectId) -> Result<Option<u8>> {
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(progress_percentage) FROM progress_updates WHERE project_id = ?1",
            params![project_id.0],
            |row| row.get(0),
        )
        .context("failed to scan max progress percentage")?;
    Ok(max.and_then(|value| u8::try_from(value).ok()))
}

fn fetch_update(conn: &Connection, id: UpdateId) -> Result<Option<ProgressUpdate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UPDATE_COLUMNS} FROM progress_updates WHERE update_id = ?1"
    ))?;
    let mut rows = stmt.query(params![id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(decode_update_row(row)?)),
        None => Ok(None),
    }
}

fn render_criteria(criteria: &[Criterion]) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    for criterion in criteria {
        match criterion {
            Criterion::ProjectEquals(id) => {
                clauses.push("project_id = ?".to_string());
                values.push(SqlValue::Integer(id.0));
            }
            Criterion::FreelancerEquals(id) => {
                clauses.push("freelancer_id = ?".to_string());
                values.push(SqlValue::Integer(id.0));
            }
            Criterion::ContractEquals(id) => {
                clauses.push("contract_id = ?".to_string());
                values.push(SqlValue::Integer(id.0));
            }
            Criterion::ProgressAtLeast(min) => {
                clauses.push("progress_percentage >= ?".to_string());
                values.push(SqlValue::Integer(i64::from(*min)));
            }
            Criterion::ProgressAtMost(max) => {
                clauses.push("progress_percentage <= ?".to_string());
                values.push(SqlValue::Integer(i64::from(*max)));
            }
            Criterion::CreatedAtOrAfter(bound) => {
                clauses.push("created_at >= ?".to_string());
                values.push(SqlValue::Text(encode_ts(*bound)));
            }
            Criterion::CreatedAtOrBefore(bound) => {
                clauses.push("created_at <= ?".to_string());
                values.push(SqlValue::Text(encode_ts(*bound)));
            }
            Criterion::TextContains(term) => {
                clauses.push(
                    "(LOWER(title) LIKE ? OR (description IS NOT NULL AND LOWER(description) LIKE ?))"
                        .to_string(),
                );
                let pattern = format!("%{term}%");
                values.push(SqlValue::Text(pattern.clone()));
                values.push(SqlValue::Text(pattern));
            }
        }
    }

    let where_sql =
        if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) };
    (where_sql, values)
}

fn order_sql(sort: &SortSpec) -> String {
    let column = match sort.field {
        SortField::CreatedAt => "created_at",
        SortField::UpdatedAt => "updated_at",
        SortField::ProgressPercentage => "progress_percentage",
        SortField::Title => "title",
        SortField::Id => "update_id",
    };
    let direction = match sort.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    format!(" ORDER BY {column} {direction}, update_id ASC")
}

fn decode_update_row(row: &rusqlite::Row<'_>) -> Result<ProgressUpdate> {
    let id_raw: String = row.get(0)?;
    let pct: i64 = row.get(6)?;
    let created_raw: String = row.get(7)?;
    let updated_raw: String = row.get(8)?;

    Ok(ProgressUpdate {
        id: UpdateId(parse_ulid(&id_raw)?),
        project_id: ProjectId(row.get(1)?),
        contract_id: ContractId(row.get(2)?),
        freelancer_id: FreelancerId(row.get(3)?),
        title: row.get(4)?,
        description: row.get(5)?,
        progress_percentage: u8::try_from(pct)
            .map_err(|_| anyhow!("progress_percentage out of range: {pct}"))?,
        created_at: decode_ts(&created_raw)?,
        updated_at: decode_ts(&updated_raw)?,
    })
}

fn decode_comment_row(row: &rusqlite::Row<'_>) -> Result<ProgressComment> {
    let id_raw: String = row.get(0)?;
    let update_raw: String = row.get(1)?;
    let created_raw: String = row.get(4)?;

    Ok(ProgressComment {
        id: CommentId(parse_ulid(&id_raw)?),
        progress_update_id: UpdateId(parse_ulid(&update_raw)?),
        user_id: progress_core::UserId(row.get(2)?),
        message: row.get(3)?,
        created_at: decode_ts(&created_raw)?,
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, encode_ts(OffsetDateTime::now_utc())],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

/// Fixed-width UTC timestamp text (nine subsecond digits) so lexicographic
/// order equals chronological order and SQL MAX/range comparisons are exact.
fn encode_ts(value: OffsetDateTime) -> String {
    let utc = value.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.nanosecond(),
    )
}

fn decode_ts(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).with_context(|| format!("invalid timestamp: {raw}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}
