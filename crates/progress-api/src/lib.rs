use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use progress_core::{
    clamp_ranking_limit, default_trend_window, end_of_day, is_stalled, progress_trend,
    start_of_day, subset_stats, updates_within_days, CommentId, ContractId, FreelancerId,
    PageRequest, ProgressComment, ProgressError, ProgressUpdate, ProjectId, TrendPoint,
    UpdateDraft, UpdateFilter, UpdateId, UserId,
};
use progress_store_sqlite::{SchemaStatus, SqliteStore, UpdatePage};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Profile returned by the user-directory collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
}

/// Identity-lookup collaborator used when attaching comments.
///
/// The create path treats a lookup failure as fatal; read-path enrichment
/// treats it as a degradation (see [`ProgressApi::comments_for_update`]).
pub trait UserDirectory: Send + Sync {
    /// Resolve a user id to a profile.
    ///
    /// # Errors
    /// Returns [`ProgressError::UnknownUser`] when the directory rejects the
    /// id and [`ProgressError::DirectoryUnavailable`] on transport failure.
    fn find_user(&self, id: UserId) -> Result<UserProfile, ProgressError>;
}

/// `UserDirectory` over the platform's user service HTTP API.
pub struct HttpUserDirectory {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpUserDirectory {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();
        Self { agent, base_url: base_url.into() }
    }
}

impl UserDirectory for HttpUserDirectory {
    fn find_user(&self, id: UserId) -> Result<UserProfile, ProgressError> {
        let url = format!("{}/api/users/{id}", self.base_url.trim_end_matches('/'));
        match self.agent.get(&url).call() {
            Ok(response) => response.into_json::<UserProfile>().map_err(|err| {
                ProgressError::DirectoryUnavailable(format!("invalid user payload: {err}"))
            }),
            Err(ureq::Error::Status(404, _)) => Err(ProgressError::UnknownUser(id)),
            Err(ureq::Error::Status(code, _)) => Err(ProgressError::DirectoryUnavailable(
                format!("user service returned status {code}"),
            )),
            Err(err) => Err(ProgressError::DirectoryUnavailable(err.to_string())),
        }
    }
}

/// Create/overwrite payload for a progress update; the server assigns the id
/// and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitUpdateRequest {
    pub project_id: ProjectId,
    pub contract_id: ContractId,
    pub freelancer_id: FreelancerId,
    pub title: String,
    pub description: Option<String>,
    pub progress_percentage: u8,
}

impl SubmitUpdateRequest {
    fn into_draft(self) -> UpdateDraft {
        UpdateDraft {
            project_id: self.project_id,
            contract_id: self.contract_id,
            freelancer_id: self.freelancer_id,
            title: self.title,
            description: self.description,
            progress_percentage: self.progress_percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CreateCommentRequest {
    pub progress_update_id: UpdateId,
    pub user_id: UserId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FreelancerProgressStats {
    pub freelancer_id: FreelancerId,
    pub update_count: u64,
    pub comment_count: u64,
    pub current_progress_percentage: Option<u8>,
    pub average_progress_percentage: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_update_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update_at: Option<OffsetDateTime>,
    pub updates_last_30_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectProgressStats {
    pub project_id: ProjectId,
    pub update_count: u64,
    pub comment_count: u64,
    pub current_progress_percentage: Option<u8>,
    pub average_progress_percentage: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_update_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractProgressStats {
    pub contract_id: ContractId,
    pub update_count: u64,
    pub comment_count: u64,
    pub current_progress_percentage: Option<u8>,
    pub average_progress_percentage: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_update_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub total_updates: u64,
    pub total_comments: u64,
    pub average_progress_percentage: Option<f64>,
    pub distinct_project_count: u64,
    pub distinct_freelancer_count: u64,
}

/// A project whose most recent update is older than the staleness threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StalledProject {
    pub project_id: ProjectId,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update_at: OffsetDateTime,
    /// Percentage recorded at exactly `last_update_at`; absent when no record
    /// matches, which should not occur but is handled defensively.
    pub last_progress_percentage: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreelancerActivity {
    pub freelancer_id: FreelancerId,
    pub update_count: u64,
    pub comment_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectActivity {
    pub project_id: ProjectId,
    pub update_count: u64,
}

/// One comment plus its best-effort author enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentView {
    pub comment: ProgressComment,
    pub author: Option<UserProfile>,
}

/// Operation layer of the progress tracker.
///
/// Every call opens the store at the configured path and migrates it to the
/// latest schema, mirroring the stateless request model: no connection or
/// cache survives between operations.
#[derive(Clone)]
pub struct ProgressApi {
    db_path: PathBuf,
    user_directory: Option<Arc<dyn UserDirectory>>,
}

impl ProgressApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, user_directory: None }
    }

    /// Attach the identity-lookup collaborator. Without one, comment author
    /// validation is skipped and read enrichment stays empty.
    #[must_use]
    pub fn with_user_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.user_directory = Some(directory);
        self
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// # Errors
    /// Returns an error when the scan fails.
    pub fn list_updates(&self) -> Result<Vec<ProgressUpdate>> {
        self.open_store()?.list_updates()
    }

    /// Filtered, sorted, paginated listing with total-count metadata.
    ///
    /// # Errors
    /// Returns an error when the scan fails.
    pub fn list_updates_filtered(
        &self,
        filter: &UpdateFilter,
        page: &PageRequest,
    ) -> Result<UpdatePage> {
        self.open_store()?.query_updates(filter, page)
    }

    /// # Errors
    /// Returns [`ProgressError::UpdateNotFound`] when the id is absent.
    pub fn find_update(&self, id: UpdateId) -> Result<ProgressUpdate> {
        let store = self.open_store()?;
        let update = store.get_update(id)?.ok_or(ProgressError::UpdateNotFound(id))?;
        Ok(update)
    }

    /// # Errors
    /// Returns an error when the scan fails.
    pub fn updates_by_project(&self, project_id: ProjectId) -> Result<Vec<ProgressUpdate>> {
        self.open_store()?.updates_by_project(project_id)
    }

    /// # Errors
    /// Returns an error when the scan fails.
    pub fn updates_by_contract(&self, contract_id: ContractId) -> Result<Vec<ProgressUpdate>> {
        self.open_store()?.updates_by_contract(contract_id)
    }

    /// # Errors
    /// Returns an error when the scan fails.
    pub fn updates_by_freelancer(
        &self,
        freelancer_id: FreelancerId,
    ) -> Result<Vec<ProgressUpdate>> {
        self.open_store()?.updates_by_freelancer(freelancer_id)
    }

    /// Create one progress update; the id and both timestamps are assigned
    /// here.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] or
    /// [`ProgressError::CannotDecrease`] on invariant violations.
    pub fn create_update(&self, request: SubmitUpdateRequest) -> Result<ProgressUpdate> {
        let mut store = self.open_store()?;
        let update = ProgressUpdate::from_draft(
            request.into_draft(),
            UpdateId::new(),
            OffsetDateTime::now_utc(),
        );
        store.insert_update(&update)?;
        Ok(update)
    }

    /// Overwrite all mutable fields of an existing update.
    ///
    /// # Errors
    /// Returns [`ProgressError::UpdateNotFound`] when the id is absent, or
    /// the invariant errors of [`Self::create_update`].
    pub fn modify_update(
        &self,
        id: UpdateId,
        request: SubmitUpdateRequest,
    ) -> Result<ProgressUpdate> {
        let mut store = self.open_store()?;
        store.modify_update(id, &request.into_draft(), OffsetDateTime::now_utc())
    }

    /// Delete one update and, through the store cascade, all its comments.
    ///
    /// # Errors
    /// Returns [`ProgressError::UpdateNotFound`] when the id is absent.
    pub fn delete_update(&self, id: UpdateId) -> Result<()> {
        self.open_store()?.delete_update(id)
    }

    /// Trend series for one project. Defaults: `to` = today, `from` =
    /// `to` − 30 days.
    ///
    /// # Errors
    /// Returns an error when the range scan fails.
    pub fn trend_by_project(
        &self,
        project_id: ProjectId,
        from: Option<Date>,
        to: Option<Date>,
    ) -> Result<Vec<TrendPoint>> {
        let store = self.open_store()?;
        let to = to.unwrap_or_else(|| OffsetDateTime::now_utc().date());
        let from = from.unwrap_or_else(|| default_trend_window(to).0);
        let updates =
            store.updates_by_project_between(project_id, start_of_day(from), end_of_day(to))?;
        Ok(progress_trend(&updates, from, to))
    }

    /// Projects whose most recent update is older than the threshold.
    ///
    /// # Errors
    /// Returns an error when the aggregate scans fail.
    pub fn stalled_projects(&self, days_without_update: u32) -> Result<Vec<StalledProject>> {
        let store = self.open_store()?;
        let now = OffsetDateTime::now_utc();
        let mut stalled = Vec::new();
        for row in store.project_last_updates()? {
            if !is_stalled(row.last_update_at, now, i64::from(days_without_update)) {
                continue;
            }
            let last = store.find_update_at(row.project_id, row.last_update_at)?;
            stalled.push(StalledProject {
                project_id: row.project_id,
                last_update_at: row.last_update_at,
                last_progress_percentage: last.map(|update| update.progress_percentage),
            });
        }
        Ok(stalled)
    }

    /// Freelancers ranked by update count, annotated with the comment count
    /// on their updates. `limit` is clamped to at least 1.
    ///
    /// # Errors
    /// Returns an error when the aggregate scans fail.
    pub fn freelancers_by_activity(&self, limit: u32) -> Result<Vec<FreelancerActivity>> {
        let store = self.open_store()?;
        let mut ranking = Vec::new();
        for row in store.freelancer_update_counts(clamp_ranking_limit(limit))? {
            ranking.push(FreelancerActivity {
                freelancer_id: row.freelancer_id,
                update_count: row.update_count,
                comment_count: store.count_comments_by_freelancer(row.freelancer_id)?,
            });
        }
        Ok(ranking)
    }

    /// Projects ranked by update count within an optional created-at window.
    /// `limit` is clamped to at least 1.
    ///
    /// # Errors
    /// Returns an error when the aggregate scan fails.
    pub fn most_active_projects(
        &self,
        limit: u32,
        from: Option<Date>,
        to: Option<Date>,
    ) -> Result<Vec<ProjectActivity>> {
        let store = self.open_store()?;
        let rows = store.project_update_counts(
            from.map(start_of_day),
            to.map(end_of_day),
            clamp_ranking_limit(limit),
        )?;
        Ok(rows
            .into_iter()
            .map(|row| ProjectActivity { project_id: row.project_id, update_count: row.update_count })
            .collect())
    }

    /// # Errors
    /// Returns an error when the scans fail.
    pub fn stats_by_freelancer(
        &self,
        freelancer_id: FreelancerId,
    ) -> Result<FreelancerProgressStats> {
        let store = self.open_store()?;
        let updates = store.updates_by_freelancer(freelancer_id)?;
        let stats = subset_stats(&updates);
        Ok(FreelancerProgressStats {
            freelancer_id,
            update_count: stats.update_count,
            comment_count: store.count_comments_by_freelancer(freelancer_id)?,
            current_progress_percentage: stats.current_progress_percentage,
            average_progress_percentage: stats.average_progress_percentage,
            first_update_at: stats.first_update_at,
            last_update_at: stats.last_update_at,
            updates_last_30_days: updates_within_days(&updates, OffsetDateTime::now_utc(), 30),
        })
    }

    /// # Errors
    /// Returns an error when the scans fail.
    pub fn stats_by_project(&self, project_id: ProjectId) -> Result<ProjectProgressStats> {
        let store = self.open_store()?;
        let updates = store.updates_by_project(project_id)?;
        let stats = subset_stats(&updates);
        Ok(ProjectProgressStats {
            project_id,
            update_count: stats.update_count,
            comment_count: store.count_comments_by_project(project_id)?,
            current_progress_percentage: stats.current_progress_percentage,
            average_progress_percentage: stats.average_progress_percentage,
            first_update_at: stats.first_update_at,
            last_update_at: stats.last_update_at,
        })
    }

    /// # Errors
    /// Returns an error when the scans fail.
    pub fn stats_by_contract(&self, contract_id: ContractId) -> Result<ContractProgressStats> {
        let store = self.open_store()?;
        let updates = store.updates_by_contract(contract_id)?;
        let stats = subset_stats(&updates);
        Ok(ContractProgressStats {
            contract_id,
            update_count: stats.update_count,
            comment_count: store.count_comments_by_contract(contract_id)?,
            current_progress_percentage: stats.current_progress_percentage,
            average_progress_percentage: stats.average_progress_percentage,
            first_update_at: stats.first_update_at,
            last_update_at: stats.last_update_at,
        })
    }

    /// Full-table dashboard aggregates; the comment count comes from a
    /// separate scan (eventual-within-request consistency is acceptable
    /// here).
    ///
    /// # Errors
    /// Returns an error when the aggregate queries fail.
    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let store = self.open_store()?;
        let row = store.dashboard_row()?;
        Ok(DashboardStats {
            total_updates: row.total_updates,
            total_comments: store.count_comments()?,
            average_progress_percentage: row.average_progress_percentage,
            distinct_project_count: row.distinct_project_count,
            distinct_freelancer_count: row.distinct_freelancer_count,
        })
    }

    /// # Errors
    /// Returns an error when the scan fails.
    pub fn list_comments(&self) -> Result<Vec<ProgressComment>> {
        self.open_store()?.list_comments()
    }

    /// # Errors
    /// Returns [`ProgressError::CommentNotFound`] when the id is absent.
    pub fn find_comment(&self, id: CommentId) -> Result<ProgressComment> {
        let store = self.open_store()?;
        let comment = store.get_comment(id)?.ok_or(ProgressError::CommentNotFound(id))?;
        Ok(comment)
    }

    /// Comments of one update with best-effort author enrichment: a
    /// directory failure degrades the view to an absent author and logs a
    /// warning, it never fails the read.
    ///
    /// # Errors
    /// Returns an error when the comment scan fails.
    pub fn comments_for_update(&self, update_id: UpdateId) -> Result<Vec<CommentView>> {
        let store = self.open_store()?;
        let comments = store.comments_by_update(update_id)?;
        Ok(comments
            .into_iter()
            .map(|comment| {
                let author = self.enrich_author(&comment);
                CommentView { comment, author }
            })
            .collect())
    }

    /// Attach one comment to an update.
    ///
    /// The parent update must exist, and when a directory is configured the
    /// author must resolve through it. This is the required path: a lookup
    /// failure aborts the operation and nothing is persisted.
    ///
    /// # Errors
    /// Returns [`ProgressError::UpdateNotFound`] for a missing parent,
    /// [`ProgressError::UnknownUser`] / [`ProgressError::DirectoryUnavailable`]
    /// from the collaborator, or [`ProgressError::Validation`] on a blank
    /// message.
    pub fn create_comment(&self, request: CreateCommentRequest) -> Result<ProgressComment> {
        let mut store = self.open_store()?;
        let parent = store
            .get_update(request.progress_update_id)?
            .ok_or(ProgressError::UpdateNotFound(request.progress_update_id))?;

        let user_id = match &self.user_directory {
            Some(directory) => directory.find_user(request.user_id)?.id,
            None => request.user_id,
        };

        let comment = ProgressComment {
            id: CommentId::new(),
            progress_update_id: parent.id,
            user_id,
            message: request.message,
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_comment(&comment)?;
        Ok(comment)
    }

    /// Replace one comment's message; the only mutable field.
    ///
    /// # Errors
    /// Returns [`ProgressError::CommentNotFound`] when the id is absent or
    /// [`ProgressError::Validation`] on a blank message.
    pub fn modify_comment(&self, id: CommentId, message: &str) -> Result<ProgressComment> {
        let mut store = self.open_store()?;
        store.set_comment_message(id, message)?;
        let comment = store.get_comment(id)?.ok_or(ProgressError::CommentNotFound(id))?;
        Ok(comment)
    }

    /// # Errors
    /// Returns [`ProgressError::CommentNotFound`] when the id is absent.
    pub fn delete_comment(&self, id: CommentId) -> Result<()> {
        self.open_store()?.delete_comment(id)
    }

    fn enrich_author(&self, comment: &ProgressComment) -> Option<UserProfile> {
        let directory = self.user_directory.as_ref()?;
        match directory.find_user(comment.user_id) {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::warn!(user_id = %comment.user_id, "author enrichment degraded: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use progress_core::ProgressError;
    use time::macros::datetime;
    use time::Duration;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("progress-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn submit_request(project: i64, pct: u8) -> SubmitUpdateRequest {
        SubmitUpdateRequest {
            project_id: ProjectId(project),
            contract_id: ContractId(40),
            freelancer_id: FreelancerId(10),
            title: format!("report {pct}"),
            description: Some("milestone review".to_string()),
            progress_percentage: pct,
        }
    }

    fn seed_update(
        api_db: &PathBuf,
        project: i64,
        freelancer: i64,
        pct: u8,
        at: OffsetDateTime,
    ) -> Result<ProgressUpdate> {
        let mut store = SqliteStore::open(api_db)?;
        store.migrate()?;
        let update = ProgressUpdate {
            id: UpdateId::new(),
            project_id: ProjectId(project),
            contract_id: ContractId(40),
            freelancer_id: FreelancerId(freelancer),
            title: format!("report {pct}"),
            description: None,
            progress_percentage: pct,
            created_at: at,
            updated_at: at,
        };
        store.insert_update(&update)?;
        Ok(update)
    }

    struct StaticDirectory {
        users: Vec<UserProfile>,
    }

    impl UserDirectory for StaticDirectory {
        fn find_user(&self, id: UserId) -> Result<UserProfile, ProgressError> {
            self.users
                .iter()
                .find(|user| user.id == id)
                .cloned()
                .ok_or(ProgressError::UnknownUser(id))
        }
    }

    struct DownDirectory;

    impl UserDirectory for DownDirectory {
        fn find_user(&self, _id: UserId) -> Result<UserProfile, ProgressError> {
            Err(ProgressError::DirectoryUnavailable("connection refused".to_string()))
        }
    }

    fn known_user(id: i64) -> UserProfile {
        UserProfile {
            id: UserId(id),
            first_name: "Nour".to_string(),
            last_name: "Haddad".to_string(),
            email: "nour@example.com".to_string(),
            role: "CLIENT".to_string(),
        }
    }

    #[test]
    fn update_lifecycle_round_trip() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());

        let created = api.create_update(submit_request(1, 20))?;
        assert_eq!(api.find_update(created.id)?, created);

        let revised = api.modify_update(created.id, submit_request(1, 35))?;
        assert_eq!(revised.progress_percentage, 35);
        assert_eq!(revised.created_at, created.created_at);

        api.delete_update(created.id)?;
        let err = match api.find_update(created.id) {
            Err(err) => err,
            Ok(_) => panic!("deleted update should be gone"),
        };
        assert_eq!(
            err.downcast_ref::<ProgressError>(),
            Some(&ProgressError::UpdateNotFound(created.id))
        );

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn regression_surfaces_the_structured_invariant_error() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());

        api.create_update(submit_request(1, 10))?;
        let err = match api.create_update(submit_request(1, 5)) {
            Err(err) => err,
            Ok(_) => panic!("regression should have been rejected"),
        };
        assert_eq!(
            err.downcast_ref::<ProgressError>(),
            Some(&ProgressError::CannotDecrease { min_allowed: 10, provided: 5 })
        );
        api.create_update(submit_request(1, 15))?;

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn trend_uses_the_latest_update_per_day() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());
        seed_update(&db_path, 1, 10, 20, datetime!(2026-03-01 10:00 UTC))?;
        seed_update(&db_path, 1, 10, 30, datetime!(2026-03-01 15:00 UTC))?;
        seed_update(&db_path, 1, 10, 50, datetime!(2026-03-02 09:00 UTC))?;

        let trend = api.trend_by_project(
            ProjectId(1),
            Some(time::macros::date!(2026-03-01)),
            Some(time::macros::date!(2026-03-02)),
        )?;
        let points: Vec<(Date, u8)> =
            trend.iter().map(|point| (point.date, point.progress_percentage)).collect();
        assert_eq!(
            points,
            vec![
                (time::macros::date!(2026-03-01), 30),
                (time::macros::date!(2026-03-02), 50),
            ]
        );

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn stalled_projects_report_the_percentage_at_the_last_update() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());
        let now = OffsetDateTime::now_utc();
        seed_update(&db_path, 1, 10, 45, now - Duration::days(10))?;
        seed_update(&db_path, 2, 10, 80, now - Duration::days(2))?;

        let stalled = api.stalled_projects(7)?;
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].project_id, ProjectId(1));
        assert_eq!(stalled[0].last_progress_percentage, Some(45));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn rankings_are_bounded_and_annotated_with_comment_counts() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());
        let now = OffsetDateTime::now_utc();
        let first = seed_update(&db_path, 1, 7, 10, now - Duration::hours(5))?;
        seed_update(&db_path, 1, 7, 20, now - Duration::hours(4))?;
        seed_update(&db_path, 2, 9, 30, now - Duration::hours(3))?;
        api.create_comment(CreateCommentRequest {
            progress_update_id: first.id,
            user_id: UserId(5),
            message: "nice pace".to_string(),
        })?;

        let freelancers = api.freelancers_by_activity(0)?;
        assert_eq!(freelancers.len(), 1);
        assert_eq!(
            freelancers[0],
            FreelancerActivity {
                freelancer_id: FreelancerId(7),
                update_count: 2,
                comment_count: 1
            }
        );

        let projects = api.most_active_projects(10, None, None)?;
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0], ProjectActivity { project_id: ProjectId(1), update_count: 2 });

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn freelancer_stats_cover_the_trailing_window() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());
        let now = OffsetDateTime::now_utc();
        seed_update(&db_path, 1, 7, 10, now - Duration::days(40))?;
        seed_update(&db_path, 1, 7, 30, now - Duration::days(3))?;
        seed_update(&db_path, 2, 8, 90, now - Duration::days(1))?;

        let stats = api.stats_by_freelancer(FreelancerId(7))?;
        assert_eq!(stats.update_count, 2);
        assert_eq!(stats.current_progress_percentage, Some(30));
        assert_eq!(stats.average_progress_percentage, Some(20.0));
        assert_eq!(stats.updates_last_30_days, 1);

        let empty = api.stats_by_freelancer(FreelancerId(999))?;
        assert_eq!(empty.update_count, 0);
        assert_eq!(empty.average_progress_percentage, None);
        assert_eq!(empty.current_progress_percentage, None);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn dashboard_stats_aggregate_the_whole_table() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());
        let now = OffsetDateTime::now_utc();
        let first = seed_update(&db_path, 1, 7, 10, now - Duration::hours(2))?;
        seed_update(&db_path, 2, 8, 50, now - Duration::hours(1))?;
        api.create_comment(CreateCommentRequest {
            progress_update_id: first.id,
            user_id: UserId(5),
            message: "checking in".to_string(),
        })?;

        let stats = api.dashboard_stats()?;
        assert_eq!(stats.total_updates, 2);
        assert_eq!(stats.total_comments, 1);
        assert_eq!(stats.average_progress_percentage, Some(30.0));
        assert_eq!(stats.distinct_project_count, 2);
        assert_eq!(stats.distinct_freelancer_count, 2);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn comment_creation_validates_the_author_through_the_directory() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone())
            .with_user_directory(Arc::new(StaticDirectory { users: vec![known_user(5)] }));
        let update = api.create_update(submit_request(1, 10))?;

        let comment = api.create_comment(CreateCommentRequest {
            progress_update_id: update.id,
            user_id: UserId(5),
            message: "resolved through the directory".to_string(),
        })?;
        assert_eq!(comment.user_id, UserId(5));

        let err = match api.create_comment(CreateCommentRequest {
            progress_update_id: update.id,
            user_id: UserId(42),
            message: "ghost author".to_string(),
        }) {
            Err(err) => err,
            Ok(_) => panic!("unknown author should have been rejected"),
        };
        assert_eq!(
            err.downcast_ref::<ProgressError>(),
            Some(&ProgressError::UnknownUser(UserId(42)))
        );

        let store = SqliteStore::open(&db_path)?;
        assert_eq!(store.count_comments()?, 1);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn unreachable_directory_aborts_comment_creation_without_persisting() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api =
            ProgressApi::new(db_path.clone()).with_user_directory(Arc::new(DownDirectory));
        let update = api.create_update(submit_request(1, 10))?;

        let err = match api.create_comment(CreateCommentRequest {
            progress_update_id: update.id,
            user_id: UserId(5),
            message: "should not persist".to_string(),
        }) {
            Err(err) => err,
            Ok(_) => panic!("unreachable directory should have aborted the create"),
        };
        assert!(matches!(
            err.downcast_ref::<ProgressError>(),
            Some(&ProgressError::DirectoryUnavailable(_))
        ));

        let store = SqliteStore::open(&db_path)?;
        assert_eq!(store.count_comments()?, 0);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn read_enrichment_degrades_instead_of_failing() -> Result<()> {
        let db_path = unique_temp_db_path();

        // Seed the comment while the directory is absent, then read it back
        // through a failing directory: the view degrades to no author.
        let seeding_api = ProgressApi::new(db_path.clone());
        let update = seeding_api.create_update(submit_request(1, 10))?;
        seeding_api.create_comment(CreateCommentRequest {
            progress_update_id: update.id,
            user_id: UserId(5),
            message: "pending author".to_string(),
        })?;

        let api =
            ProgressApi::new(db_path.clone()).with_user_directory(Arc::new(DownDirectory));
        let views = api.comments_for_update(update.id)?;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].author, None);

        let enriched_api = ProgressApi::new(db_path.clone())
            .with_user_directory(Arc::new(StaticDirectory { users: vec![known_user(5)] }));
        let views = enriched_api.comments_for_update(update.id)?;
        assert_eq!(views[0].author.as_ref().map(|profile| profile.id), Some(UserId(5)));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn comment_message_edit_and_missing_parent_are_typed() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = ProgressApi::new(db_path.clone());
        let update = api.create_update(submit_request(1, 10))?;
        let comment = api.create_comment(CreateCommentRequest {
            progress_update_id: update.id,
            user_id: UserId(5),
            message: "first draft".to_string(),
        })?;

        let edited = api.modify_comment(comment.id, "second draft")?;
        assert_eq!(edited.message, "second draft");

        let missing_parent = UpdateId::new();
        let err = match api.create_comment(CreateCommentRequest {
            progress_update_id: missing_parent,
            user_id: UserId(5),
            message: "orphan".to_string(),
        }) {
            Err(err) => err,
            Ok(_) => panic!("missing parent should have been rejected"),
        };
        assert_eq!(
            err.downcast_ref::<ProgressError>(),
            Some(&ProgressError::UpdateNotFound(missing_parent))
        );

        api.delete_comment(comment.id)?;
        let err = match api.find_comment(comment.id) {
            Err(err) => err,
            Ok(_) => panic!("deleted comment should be gone"),
        };
        assert_eq!(
            err.downcast_ref::<ProgressError>(),
            Some(&ProgressError::CommentNotFound(comment.id))
        );

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
