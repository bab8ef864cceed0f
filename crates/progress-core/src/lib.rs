use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::time;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time};
use ulid::Ulid;

/// Failure taxonomy shared by every operation of the progress tracker.
///
/// Storage and orchestration layers surface these through `anyhow::Error`;
/// the transport boundary downcasts to map each variant onto a client-visible
/// outcome.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ProgressError {
    #[error("progress update not found with id: {0}")]
    UpdateNotFound(UpdateId),
    #[error("progress comment not found with id: {0}")]
    CommentNotFound(CommentId),
    #[error("progress cannot be less than the previous update: minimum allowed {min_allowed}%, provided {provided}%")]
    CannotDecrease { min_allowed: u8, provided: u8 },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown user: {0}")]
    UnknownUser(UserId),
    #[error("user directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UpdateId(pub Ulid);

impl UpdateId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for UpdateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CommentId(pub Ulid);

impl CommentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CommentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CommentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a project owned by the project service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProjectId(pub i64);

impl Display for ProjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a contract owned by the contract service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContractId(pub i64);

impl Display for ContractId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a freelancer profile owned by the user service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FreelancerId(pub i64);

impl Display for FreelancerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a user account owned by the user service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UserId(pub i64);

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One reported progress snapshot for a project/contract.
///
/// `created_at` is set once at creation; `updated_at` moves on every
/// mutation. For a fixed project the stored percentages are non-decreasing
/// in write order (see [`enforce_monotonic`]).
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProgressUpdate {
    pub id: UpdateId,
    pub project_id: ProjectId,
    pub contract_id: ContractId,
    pub freelancer_id: FreelancerId,
    pub title: String,
    pub description: Option<String>,
    pub progress_percentage: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProgressUpdate {
    /// Build a fresh record from a draft; both timestamps start at `at`.
    #[must_use]
    pub fn from_draft(draft: UpdateDraft, id: UpdateId, at: OffsetDateTime) -> Self {
        Self {
            id,
            project_id: draft.project_id,
            contract_id: draft.contract_id,
            freelancer_id: draft.freelancer_id,
            title: draft.title,
            description: draft.description,
            progress_percentage: draft.progress_percentage,
            created_at: at,
            updated_at: at,
        }
    }

    /// Validate field-level constraints on one record.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] when the title is blank or the
    /// percentage is outside `[0, 100]`.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.title.trim().is_empty() {
            return Err(ProgressError::Validation("title MUST be non-blank".to_string()));
        }
        if self.progress_percentage > 100 {
            return Err(ProgressError::Validation(
                "progress_percentage MUST be in [0, 100]".to_string(),
            ));
        }
        Ok(())
    }
}

/// The mutable fields of a progress update, as accepted on create and on
/// overwrite.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UpdateDraft {
    pub project_id: ProjectId,
    pub contract_id: ContractId,
    pub freelancer_id: FreelancerId,
    pub title: String,
    pub description: Option<String>,
    pub progress_percentage: u8,
}

impl UpdateDraft {
    /// # Errors
    /// Returns [`ProgressError::Validation`] when the title is blank or the
    /// percentage is outside `[0, 100]`.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.title.trim().is_empty() {
            return Err(ProgressError::Validation("title MUST be non-blank".to_string()));
        }
        if self.progress_percentage > 100 {
            return Err(ProgressError::Validation(
                "progress_percentage MUST be in [0, 100]".to_string(),
            ));
        }
        Ok(())
    }
}

/// A remark attached to a progress update. The update exclusively owns its
/// comments; deleting the update deletes them.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProgressComment {
    pub id: CommentId,
    pub progress_update_id: UpdateId,
    pub user_id: UserId,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ProgressComment {
    /// # Errors
    /// Returns [`ProgressError::Validation`] when the message is blank.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.message.trim().is_empty() {
            return Err(ProgressError::Validation("message MUST be non-blank".to_string()));
        }
        Ok(())
    }
}

/// Enforce the monotonic-progress invariant for one candidate write.
///
/// `stored_max` is the highest percentage currently stored for the target
/// project (`None` when the project has no prior records).
///
/// # Errors
/// Returns [`ProgressError::CannotDecrease`] carrying the minimum allowed and
/// the provided percentage when the candidate regresses.
pub fn enforce_monotonic(stored_max: Option<u8>, candidate: u8) -> Result<(), ProgressError> {
    let min_allowed = stored_max.unwrap_or(0);
    if candidate < min_allowed {
        return Err(ProgressError::CannotDecrease { min_allowed, provided: candidate });
    }
    Ok(())
}

/// Independently-optional list/query criteria over progress updates.
///
/// Each present field lowers to exactly one [`Criterion`] conjunct; absent
/// fields contribute no constraint. The same criterion list drives the
/// in-memory [`UpdateFilter::matches`] predicate and the store's SQL `WHERE`
/// rendering, so both backends share one logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct UpdateFilter {
    pub project_id: Option<ProjectId>,
    pub freelancer_id: Option<FreelancerId>,
    pub contract_id: Option<ContractId>,
    pub progress_min: Option<u8>,
    pub progress_max: Option<u8>,
    pub created_from: Option<Date>,
    pub created_to: Option<Date>,
    pub search: Option<String>,
}

impl UpdateFilter {
    /// Lower the present fields into conjuncts.
    ///
    /// Date bounds are normalized to full-day boundaries here, and the search
    /// term is trimmed and lowercased; a blank term lowers to nothing.
    #[must_use]
    pub fn criteria(&self) -> Vec<Criterion> {
        let mut criteria = Vec::new();
        if let Some(id) = self.project_id {
            criteria.push(Criterion::ProjectEquals(id));
        }
        if let Some(id) = self.freelancer_id {
            criteria.push(Criterion::FreelancerEquals(id));
        }
        if let Some(id) = self.contract_id {
            criteria.push(Criterion::ContractEquals(id));
        }
        if let Some(min) = self.progress_min {
            criteria.push(Criterion::ProgressAtLeast(min));
        }
        if let Some(max) = self.progress_max {
            criteria.push(Criterion::ProgressAtMost(max));
        }
        if let Some(from) = self.created_from {
            criteria.push(Criterion::CreatedAtOrAfter(start_of_day(from)));
        }
        if let Some(to) = self.created_to {
            criteria.push(Criterion::CreatedAtOrBefore(end_of_day(to)));
        }
        if let Some(term) = &self.search {
            let normalized = term.trim().to_lowercase();
            if !normalized.is_empty() {
                criteria.push(Criterion::TextContains(normalized));
            }
        }
        criteria
    }

    /// Conjunction of all present criteria; the empty filter accepts every
    /// record.
    #[must_use]
    pub fn matches(&self, update: &ProgressUpdate) -> bool {
        self.criteria().iter().all(|criterion| criterion.matches(update))
    }
}

/// One lowered filter conjunct.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Criterion {
    ProjectEquals(ProjectId),
    FreelancerEquals(FreelancerId),
    ContractEquals(ContractId),
    ProgressAtLeast(u8),
    ProgressAtMost(u8),
    CreatedAtOrAfter(OffsetDateTime),
    CreatedAtOrBefore(OffsetDateTime),
    /// Trimmed, lowercased substring matched against title or description.
    TextContains(String),
}

impl Criterion {
    #[must_use]
    pub fn matches(&self, update: &ProgressUpdate) -> bool {
        match self {
            Self::ProjectEquals(id) => update.project_id == *id,
            Self::FreelancerEquals(id) => update.freelancer_id == *id,
            Self::ContractEquals(id) => update.contract_id == *id,
            Self::ProgressAtLeast(min) => update.progress_percentage >= *min,
            Self::ProgressAtMost(max) => update.progress_percentage <= *max,
            Self::CreatedAtOrAfter(bound) => update.created_at >= *bound,
            Self::CreatedAtOrBefore(bound) => update.created_at <= *bound,
            Self::TextContains(term) => {
                update.title.to_lowercase().contains(term)
                    || update
                        .description
                        .as_deref()
                        .is_some_and(|description| description.to_lowercase().contains(term))
            }
        }
    }
}

/// Start of the calendar day, UTC.
#[must_use]
pub fn start_of_day(date: Date) -> OffsetDateTime {
    PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc()
}

/// End of the calendar day (23:59:59.999999999), UTC.
#[must_use]
pub fn end_of_day(date: Date) -> OffsetDateTime {
    PrimitiveDateTime::new(date, time!(23:59:59.999999999)).assume_utc()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    ProgressPercentage,
    Title,
    Id,
}

impl SortField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::ProgressPercentage => "progress_percentage",
            Self::Title => "title",
            Self::Id => "id",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created_at" => Some(Self::CreatedAt),
            "updated_at" => Some(Self::UpdatedAt),
            "progress_percentage" => Some(Self::ProgressPercentage),
            "title" => Some(Self::Title),
            "id" => Some(Self::Id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort specification for the paged list scan. Defaults to `created_at`
/// descending, matching the list operation's contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self { field: SortField::CreatedAt, direction: SortDirection::Desc }
    }
}

impl SortSpec {
    /// Parse a `field` or `field,asc|desc` expression; a bare field sorts
    /// ascending, a blank expression yields the default.
    ///
    /// # Errors
    /// Returns [`ProgressError::Validation`] on an unknown field or
    /// direction.
    pub fn parse(value: &str) -> Result<Self, ProgressError> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut parts = value.splitn(2, ',');
        let field_raw = parts.next().unwrap_or("").trim();
        let field = SortField::parse(field_raw)
            .ok_or_else(|| ProgressError::Validation(format!("unknown sort field: {field_raw}")))?;
        let direction = match parts.next().map(str::trim) {
            None => SortDirection::Asc,
            Some(raw) if raw.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(raw) if raw.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(raw) => {
                return Err(ProgressError::Validation(format!("unknown sort direction: {raw}")));
            }
        };
        Ok(Self { field, direction })
    }
}

/// Zero-based page request for the filtered list scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: SortSpec,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20, sort: SortSpec::default() }
    }
}

/// One `(date, percentage)` trend sample: the latest update of that calendar
/// day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct TrendPoint {
    pub date: Date,
    pub progress_percentage: u8,
}

fn later_write(a: &ProgressUpdate, b: &ProgressUpdate) -> bool {
    (a.created_at, a.id) > (b.created_at, b.id)
}

/// Compute the trend series for one project's updates.
///
/// Partitions the updates whose `created_at` falls within `[from, to]`
/// (inclusive, calendar days) by day, takes the latest write of each day
/// (ties on `created_at` broken by id), and emits one point per non-empty
/// day in ascending date order. Days without updates produce no point.
#[must_use]
pub fn progress_trend(updates: &[ProgressUpdate], from: Date, to: Date) -> Vec<TrendPoint> {
    let mut latest_per_day: BTreeMap<Date, &ProgressUpdate> = BTreeMap::new();
    for update in updates {
        let day = update.created_at.date();
        if day < from || day > to {
            continue;
        }
        match latest_per_day.entry(day) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(update);
            }
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                if later_write(update, slot.get()) {
                    slot.insert(update);
                }
            }
        }
    }
    latest_per_day
        .into_iter()
        .map(|(date, update)| TrendPoint { date, progress_percentage: update.progress_percentage })
        .collect()
}

/// Default trend window: the 30 days ending at `to`.
#[must_use]
pub fn default_trend_window(to: Date) -> (Date, Date) {
    (to.checked_sub(Duration::days(30)).unwrap_or(to), to)
}

/// Statistics over one subset of updates (per freelancer, project, or
/// contract; the subset selection is the caller's concern).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubsetStats {
    pub update_count: u64,
    pub current_progress_percentage: Option<u8>,
    pub average_progress_percentage: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_update_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update_at: Option<OffsetDateTime>,
}

/// Aggregate one subset of updates.
///
/// The "current" percentage belongs to the member with the maximum
/// `updated_at` (ties broken by id). An empty subset yields `None` for the
/// current and average values, never zero.
#[must_use]
pub fn subset_stats(updates: &[ProgressUpdate]) -> SubsetStats {
    let update_count = u64::try_from(updates.len()).unwrap_or(u64::MAX);
    let current_progress_percentage = updates
        .iter()
        .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)))
        .map(|update| update.progress_percentage);
    let average_progress_percentage = if updates.is_empty() {
        None
    } else {
        let sum: f64 = updates.iter().map(|update| f64::from(update.progress_percentage)).sum();
        #[allow(clippy::cast_precision_loss)]
        let count = updates.len() as f64;
        Some(sum / count)
    };
    let first_update_at = updates.iter().map(|update| update.created_at).min();
    let last_update_at = updates.iter().map(|update| update.updated_at).max();

    SubsetStats {
        update_count,
        current_progress_percentage,
        average_progress_percentage,
        first_update_at,
        last_update_at,
    }
}

/// Count subset members whose `updated_at` falls within the trailing
/// `days`-day window ending at `now`.
#[must_use]
pub fn updates_within_days(updates: &[ProgressUpdate], now: OffsetDateTime, days: i64) -> u64 {
    let cutoff = now - Duration::days(days);
    let count = updates.iter().filter(|update| update.updated_at >= cutoff).count();
    u64::try_from(count).unwrap_or(u64::MAX)
}

/// A project is stalled when its most recent update is strictly earlier than
/// `now - days_without_update`.
#[must_use]
pub fn is_stalled(last_update_at: OffsetDateTime, now: OffsetDateTime, days_without_update: i64) -> bool {
    last_update_at < now - Duration::days(days_without_update)
}

/// Ranking limits are clamped to at least one entry.
#[must_use]
pub fn clamp_ranking_limit(limit: u32) -> u32 {
    limit.max(1)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::{date, datetime};

    use super::*;

    fn sample_update(
        project: i64,
        pct: u8,
        created_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> ProgressUpdate {
        ProgressUpdate {
            id: UpdateId::new(),
            project_id: ProjectId(project),
            contract_id: ContractId(7),
            freelancer_id: FreelancerId(3),
            title: "Sprint report".to_string(),
            description: Some("Implemented the payment flow".to_string()),
            progress_percentage: pct,
            created_at,
            updated_at,
        }
    }

    #[test]
    fn monotonic_accepts_first_write_and_growth() {
        assert_eq!(enforce_monotonic(None, 0), Ok(()));
        assert_eq!(enforce_monotonic(None, 10), Ok(()));
        assert_eq!(enforce_monotonic(Some(10), 10), Ok(()));
        assert_eq!(enforce_monotonic(Some(10), 15), Ok(()));
    }

    #[test]
    fn monotonic_rejects_regression_with_structured_payload() {
        assert_eq!(
            enforce_monotonic(Some(10), 5),
            Err(ProgressError::CannotDecrease { min_allowed: 10, provided: 5 })
        );
    }

    #[test]
    fn validation_rejects_blank_title_and_overflowing_percentage() {
        let now = datetime!(2026-03-01 10:00 UTC);
        let mut update = sample_update(1, 50, now, now);
        update.title = "   ".to_string();
        assert!(matches!(update.validate(), Err(ProgressError::Validation(_))));

        let mut update = sample_update(1, 50, now, now);
        update.progress_percentage = 101;
        assert!(matches!(update.validate(), Err(ProgressError::Validation(_))));

        assert_eq!(sample_update(1, 100, now, now).validate(), Ok(()));
    }

    #[test]
    fn empty_filter_accepts_every_record() {
        let now = datetime!(2026-03-01 10:00 UTC);
        let update = sample_update(1, 40, now, now);
        let filter = UpdateFilter::default();
        assert!(filter.criteria().is_empty());
        assert!(filter.matches(&update));
    }

    #[test]
    fn filter_date_bounds_cover_the_full_day() {
        let first_instant = datetime!(2026-03-01 00:00:00 UTC);
        let last_instant = datetime!(2026-03-01 23:59:59.999999999 UTC);
        let next_day = datetime!(2026-03-02 00:00:00 UTC);
        let filter = UpdateFilter {
            created_from: Some(date!(2026-03-01)),
            created_to: Some(date!(2026-03-01)),
            ..UpdateFilter::default()
        };

        assert!(filter.matches(&sample_update(1, 10, first_instant, first_instant)));
        assert!(filter.matches(&sample_update(1, 10, last_instant, last_instant)));
        assert!(!filter.matches(&sample_update(1, 10, next_day, next_day)));
    }

    #[test]
    fn filter_search_is_case_insensitive_over_title_and_description() {
        let now = datetime!(2026-03-01 10:00 UTC);
        let mut update = sample_update(1, 40, now, now);
        update.title = "Sprint Report".to_string();
        update.description = Some("Payment flow done".to_string());

        let by_title =
            UpdateFilter { search: Some("  sPrInT ".to_string()), ..UpdateFilter::default() };
        assert!(by_title.matches(&update));

        let by_description =
            UpdateFilter { search: Some("PAYMENT".to_string()), ..UpdateFilter::default() };
        assert!(by_description.matches(&update));

        update.description = None;
        assert!(!by_description.matches(&update));

        let blank = UpdateFilter { search: Some("   ".to_string()), ..UpdateFilter::default() };
        assert!(blank.criteria().is_empty());
    }

    #[test]
    fn filter_progress_range_is_inclusive() {
        let now = datetime!(2026-03-01 10:00 UTC);
        let filter = UpdateFilter {
            progress_min: Some(20),
            progress_max: Some(60),
            ..UpdateFilter::default()
        };
        assert!(filter.matches(&sample_update(1, 20, now, now)));
        assert!(filter.matches(&sample_update(1, 60, now, now)));
        assert!(!filter.matches(&sample_update(1, 19, now, now)));
        assert!(!filter.matches(&sample_update(1, 61, now, now)));
    }

    #[test]
    fn sort_spec_parses_field_and_direction() {
        assert_eq!(SortSpec::parse(""), Ok(SortSpec::default()));
        assert_eq!(
            SortSpec::parse("progress_percentage,asc"),
            Ok(SortSpec { field: SortField::ProgressPercentage, direction: SortDirection::Asc })
        );
        assert_eq!(
            SortSpec::parse("updated_at"),
            Ok(SortSpec { field: SortField::UpdatedAt, direction: SortDirection::Asc })
        );
        assert_eq!(
            SortSpec::parse("title, DESC"),
            Ok(SortSpec { field: SortField::Title, direction: SortDirection::Desc })
        );
        assert!(matches!(SortSpec::parse("priority,asc"), Err(ProgressError::Validation(_))));
        assert!(matches!(SortSpec::parse("title,sideways"), Err(ProgressError::Validation(_))));
    }

    #[test]
    fn trend_keeps_the_latest_update_of_each_day_sorted_ascending() {
        let updates = vec![
            sample_update(1, 20, datetime!(2026-03-01 10:00 UTC), datetime!(2026-03-01 10:00 UTC)),
            sample_update(1, 30, datetime!(2026-03-01 15:00 UTC), datetime!(2026-03-01 15:00 UTC)),
            sample_update(1, 50, datetime!(2026-03-02 09:00 UTC), datetime!(2026-03-02 09:00 UTC)),
        ];

        let trend = progress_trend(&updates, date!(2026-03-01), date!(2026-03-02));
        assert_eq!(
            trend,
            vec![
                TrendPoint { date: date!(2026-03-01), progress_percentage: 30 },
                TrendPoint { date: date!(2026-03-02), progress_percentage: 50 },
            ]
        );
    }

    #[test]
    fn trend_breaks_same_instant_ties_by_id() {
        let at = datetime!(2026-03-01 10:00 UTC);
        let mut first = sample_update(1, 20, at, at);
        let mut second = sample_update(1, 35, at, at);
        // ULIDs sort by creation order; force a known ordering regardless.
        if first.id > second.id {
            std::mem::swap(&mut first.id, &mut second.id);
        }

        let trend = progress_trend(&[first, second], date!(2026-03-01), date!(2026-03-01));
        assert_eq!(trend, vec![TrendPoint { date: date!(2026-03-01), progress_percentage: 35 }]);
    }

    #[test]
    fn trend_excludes_days_outside_the_window() {
        let updates = vec![
            sample_update(1, 10, datetime!(2026-02-28 10:00 UTC), datetime!(2026-02-28 10:00 UTC)),
            sample_update(1, 40, datetime!(2026-03-01 10:00 UTC), datetime!(2026-03-01 10:00 UTC)),
        ];
        let trend = progress_trend(&updates, date!(2026-03-01), date!(2026-03-05));
        assert_eq!(trend, vec![TrendPoint { date: date!(2026-03-01), progress_percentage: 40 }]);
    }

    #[test]
    fn subset_stats_computes_mean_and_latest() {
        let updates = vec![
            sample_update(1, 10, datetime!(2026-03-01 08:00 UTC), datetime!(2026-03-01 08:00 UTC)),
            sample_update(1, 20, datetime!(2026-03-02 08:00 UTC), datetime!(2026-03-03 08:00 UTC)),
            sample_update(1, 60, datetime!(2026-03-02 12:00 UTC), datetime!(2026-03-02 12:00 UTC)),
        ];

        let stats = subset_stats(&updates);
        assert_eq!(stats.update_count, 3);
        assert_eq!(stats.current_progress_percentage, Some(20));
        assert_eq!(stats.average_progress_percentage, Some(30.0));
        assert_eq!(stats.first_update_at, Some(datetime!(2026-03-01 08:00 UTC)));
        assert_eq!(stats.last_update_at, Some(datetime!(2026-03-03 08:00 UTC)));
    }

    #[test]
    fn subset_stats_on_empty_subset_is_null_not_zero() {
        let stats = subset_stats(&[]);
        assert_eq!(stats.update_count, 0);
        assert_eq!(stats.current_progress_percentage, None);
        assert_eq!(stats.average_progress_percentage, None);
        assert_eq!(stats.first_update_at, None);
        assert_eq!(stats.last_update_at, None);
    }

    #[test]
    fn trailing_window_count_is_inclusive_of_the_cutoff() {
        let now = datetime!(2026-03-31 12:00 UTC);
        let updates = vec![
            sample_update(1, 10, now - Duration::days(40), now - Duration::days(40)),
            sample_update(1, 20, now - Duration::days(30), now - Duration::days(30)),
            sample_update(1, 30, now - Duration::days(1), now - Duration::days(1)),
        ];
        assert_eq!(updates_within_days(&updates, now, 30), 2);
    }

    #[test]
    fn staleness_is_strictly_before_the_cutoff() {
        let now = datetime!(2026-03-31 12:00 UTC);
        assert!(is_stalled(now - Duration::days(10), now, 7));
        assert!(!is_stalled(now - Duration::days(2), now, 7));
        assert!(!is_stalled(now - Duration::days(7), now, 7));
    }

    #[test]
    fn ranking_limit_is_clamped_to_one() {
        assert_eq!(clamp_ranking_limit(0), 1);
        assert_eq!(clamp_ranking_limit(1), 1);
        assert_eq!(clamp_ranking_limit(25), 25);
    }

    fn arb_update() -> impl Strategy<Value = ProgressUpdate> {
        (
            0_i64..4,
            0_i64..4,
            0_i64..4,
            0_u8..=100,
            0_i64..3_000_000,
            "[a-z ]{1,12}",
            proptest::option::of("[a-z ]{0,12}"),
        )
            .prop_map(|(project, contract, freelancer, pct, offset_secs, title, description)| {
                let at = datetime!(2026-01-01 00:00 UTC) + Duration::seconds(offset_secs);
                ProgressUpdate {
                    id: UpdateId::new(),
                    project_id: ProjectId(project),
                    contract_id: ContractId(contract),
                    freelancer_id: FreelancerId(freelancer),
                    title,
                    description,
                    progress_percentage: pct,
                    created_at: at,
                    updated_at: at,
                }
            })
    }

    fn arb_filter() -> impl Strategy<Value = UpdateFilter> {
        (
            proptest::option::of(0_i64..4),
            proptest::option::of(0_i64..4),
            proptest::option::of(0_i64..4),
            proptest::option::of(0_u8..=100),
            proptest::option::of(0_u8..=100),
            proptest::option::of(0_i64..40),
            proptest::option::of(0_i64..40),
            proptest::option::of("[a-z]{0,3}"),
        )
            .prop_map(|(project, freelancer, contract, min, max, from, to, search)| UpdateFilter {
                project_id: project.map(ProjectId),
                freelancer_id: freelancer.map(FreelancerId),
                contract_id: contract.map(ContractId),
                progress_min: min,
                progress_max: max,
                created_from: from.and_then(|days| {
                    date!(2026-01-01).checked_add(Duration::days(days))
                }),
                created_to: to.and_then(|days| date!(2026-01-01).checked_add(Duration::days(days))),
                search,
            })
    }

    proptest! {
        #[test]
        fn filtered_records_satisfy_every_present_criterion(
            updates in proptest::collection::vec(arb_update(), 0..24),
            filter in arb_filter(),
        ) {
            let criteria = filter.criteria();
            let kept: Vec<&ProgressUpdate> =
                updates.iter().filter(|update| filter.matches(update)).collect();

            for update in &kept {
                prop_assert!(criteria.iter().all(|criterion| criterion.matches(update)));
            }
            for update in &updates {
                if !filter.matches(update) {
                    prop_assert!(criteria.iter().any(|criterion| !criterion.matches(update)));
                }
            }
            if criteria.is_empty() {
                prop_assert_eq!(kept.len(), updates.len());
            }
        }

        #[test]
        fn monotonic_rejects_exactly_the_regressions(
            stored in proptest::option::of(0_u8..=100),
            candidate in 0_u8..=100,
        ) {
            let outcome = enforce_monotonic(stored, candidate);
            let min_allowed = stored.unwrap_or(0);
            if candidate < min_allowed {
                prop_assert_eq!(
                    outcome,
                    Err(ProgressError::CannotDecrease { min_allowed, provided: candidate })
                );
            } else {
                prop_assert_eq!(outcome, Ok(()));
            }
        }
    }
}
