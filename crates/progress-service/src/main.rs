use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use progress_api::{
    CreateCommentRequest, HttpUserDirectory, ProgressApi, SubmitUpdateRequest,
    API_CONTRACT_VERSION,
};
use progress_core::{
    CommentId, ContractId, FreelancerId, PageRequest, ProgressError, ProjectId, SortSpec,
    UpdateFilter, UpdateId,
};
use serde::{Deserialize, Serialize};
use time::Date;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    api: ProgressApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_allowed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provided: Option<u8>,
    #[serde(skip)]
    status: StatusCode,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct EditCommentRequest {
    message: String,
}

fn default_page_size() -> u32 {
    20
}

fn default_stalled_days() -> u32 {
    7
}

fn default_ranking_limit() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    size: u32,
    sort: Option<String>,
    project_id: Option<i64>,
    freelancer_id: Option<i64>,
    contract_id: Option<i64>,
    progress_min: Option<u8>,
    progress_max: Option<u8>,
    date_from: Option<Date>,
    date_to: Option<Date>,
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrendParams {
    from: Option<Date>,
    to: Option<Date>,
}

#[derive(Debug, Deserialize)]
struct StalledParams {
    #[serde(default = "default_stalled_days")]
    days_without_update: u32,
}

#[derive(Debug, Deserialize)]
struct RankingParams {
    #[serde(default = "default_ranking_limit")]
    limit: u32,
    from: Option<Date>,
    to: Option<Date>,
}

#[derive(Debug, Parser)]
#[command(name = "progress-service")]
#[command(about = "HTTP service for freelancer progress tracking")]
struct Args {
    #[arg(long, default_value = "./progress_tracker.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Base URL of the user service; author validation is skipped when
    /// absent.
    #[arg(long)]
    user_service_url: Option<String>,
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
            min_allowed: None,
            provided: None,
            status,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ProgressError>() {
            Some(
                domain_err @ (ProgressError::UpdateNotFound(_) | ProgressError::CommentNotFound(_)),
            ) => Self::new(StatusCode::NOT_FOUND, domain_err.to_string()),
            Some(domain_err @ ProgressError::CannotDecrease { min_allowed, provided }) => Self {
                service_contract_version: SERVICE_CONTRACT_VERSION,
                error: domain_err.to_string(),
                min_allowed: Some(*min_allowed),
                provided: Some(*provided),
                status: StatusCode::BAD_REQUEST,
            },
            Some(domain_err @ (ProgressError::Validation(_) | ProgressError::UnknownUser(_))) => {
                Self::bad_request(domain_err.to_string())
            }
            Some(domain_err @ ProgressError::DirectoryUnavailable(_)) => {
                Self::new(StatusCode::BAD_GATEWAY, domain_err.to_string())
            }
            None => {
                tracing::error!("internal error: {err:#}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn parse_update_id(raw: &str) -> Result<UpdateId, ServiceError> {
    Ulid::from_string(raw)
        .map(UpdateId)
        .map_err(|_| ServiceError::bad_request(format!("invalid progress update id: {raw}")))
}

fn parse_comment_id(raw: &str) -> Result<CommentId, ServiceError> {
    Ulid::from_string(raw)
        .map(CommentId)
        .map_err(|_| ServiceError::bad_request(format!("invalid progress comment id: {raw}")))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/openapi", get(openapi))
        .route("/api/progress-updates", get(list_updates).post(create_update))
        .route(
            "/api/progress-updates/:id",
            get(get_update).put(put_update).delete(delete_update),
        )
        .route("/api/progress-updates/project/:project_id", get(updates_by_project))
        .route("/api/progress-updates/contract/:contract_id", get(updates_by_contract))
        .route("/api/progress-updates/freelancer/:freelancer_id", get(updates_by_freelancer))
        .route("/api/progress-updates/trend/project/:project_id", get(trend_by_project))
        .route("/api/progress-updates/stalled/projects", get(stalled_projects))
        .route("/api/progress-updates/rankings/freelancers", get(freelancer_rankings))
        .route("/api/progress-updates/rankings/projects", get(project_rankings))
        .route("/api/progress-updates/stats/freelancer/:freelancer_id", get(stats_by_freelancer))
        .route("/api/progress-updates/stats/project/:project_id", get(stats_by_project))
        .route("/api/progress-updates/stats/contract/:contract_id", get(stats_by_contract))
        .route("/api/progress-updates/stats/dashboard", get(dashboard_stats))
        .route("/api/progress-comments", get(list_comments).post(create_comment))
        .route(
            "/api/progress-comments/:id",
            get(get_comment).put(put_comment).delete(delete_comment),
        )
        .route("/api/progress-comments/update/:update_id", get(comments_for_update))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut api = ProgressApi::new(args.db);
    if let Some(base_url) = args.user_service_url {
        api = api.with_user_directory(Arc::new(HttpUserDirectory::new(base_url)));
    }

    tracing::info!("listening on {}", args.bind);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn list_updates(
    State(state): State<ServiceState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ServiceEnvelope<progress_store_sqlite::UpdatePage>>, ServiceError> {
    let sort = match &params.sort {
        Some(raw) => SortSpec::parse(raw).map_err(|err| ServiceError::bad_request(err.to_string()))?,
        None => SortSpec::default(),
    };
    let filter = UpdateFilter {
        project_id: params.project_id.map(ProjectId),
        freelancer_id: params.freelancer_id.map(FreelancerId),
        contract_id: params.contract_id.map(ContractId),
        progress_min: params.progress_min,
        progress_max: params.progress_max,
        created_from: params.date_from,
        created_to: params.date_to,
        search: params.search,
    };
    let page = PageRequest { page: params.page, size: params.size, sort };
    let result = state.api.list_updates_filtered(&filter, &page)?;
    Ok(Json(envelope(result)))
}

async fn get_update(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<progress_core::ProgressUpdate>>, ServiceError> {
    let id = parse_update_id(&id)?;
    let update = state.api.find_update(id)?;
    Ok(Json(envelope(update)))
}

async fn updates_by_project(
    State(state): State<ServiceState>,
    Path(project_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<Vec<progress_core::ProgressUpdate>>>, ServiceError> {
    let updates = state.api.updates_by_project(ProjectId(project_id))?;
    Ok(Json(envelope(updates)))
}

async fn updates_by_contract(
    State(state): State<ServiceState>,
    Path(contract_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<Vec<progress_core::ProgressUpdate>>>, ServiceError> {
    let updates = state.api.updates_by_contract(ContractId(contract_id))?;
    Ok(Json(envelope(updates)))
}

async fn updates_by_freelancer(
    State(state): State<ServiceState>,
    Path(freelancer_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<Vec<progress_core::ProgressUpdate>>>, ServiceError> {
    let updates = state.api.updates_by_freelancer(FreelancerId(freelancer_id))?;
    Ok(Json(envelope(updates)))
}

async fn trend_by_project(
    State(state): State<ServiceState>,
    Path(project_id): Path<i64>,
    Query(params): Query<TrendParams>,
) -> Result<Json<ServiceEnvelope<Vec<progress_core::TrendPoint>>>, ServiceError> {
    let trend = state.api.trend_by_project(ProjectId(project_id), params.from, params.to)?;
    Ok(Json(envelope(trend)))
}

async fn stalled_projects(
    State(state): State<ServiceState>,
    Query(params): Query<StalledParams>,
) -> Result<Json<ServiceEnvelope<Vec<progress_api::StalledProject>>>, ServiceError> {
    let stalled = state.api.stalled_projects(params.days_without_update)?;
    Ok(Json(envelope(stalled)))
}

async fn freelancer_rankings(
    State(state): State<ServiceState>,
    Query(params): Query<RankingParams>,
) -> Result<Json<ServiceEnvelope<Vec<progress_api::FreelancerActivity>>>, ServiceError> {
    let ranking = state.api.freelancers_by_activity(params.limit)?;
    Ok(Json(envelope(ranking)))
}

async fn project_rankings(
    State(state): State<ServiceState>,
    Query(params): Query<RankingParams>,
) -> Result<Json<ServiceEnvelope<Vec<progress_api::ProjectActivity>>>, ServiceError> {
    let ranking = state.api.most_active_projects(params.limit, params.from, params.to)?;
    Ok(Json(envelope(ranking)))
}

async fn stats_by_freelancer(
    State(state): State<ServiceState>,
    Path(freelancer_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<progress_api::FreelancerProgressStats>>, ServiceError> {
    let stats = state.api.stats_by_freelancer(FreelancerId(freelancer_id))?;
    Ok(Json(envelope(stats)))
}

async fn stats_by_project(
    State(state): State<ServiceState>,
    Path(project_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<progress_api::ProjectProgressStats>>, ServiceError> {
    let stats = state.api.stats_by_project(ProjectId(project_id))?;
    Ok(Json(envelope(stats)))
}

async fn stats_by_contract(
    State(state): State<ServiceState>,
    Path(contract_id): Path<i64>,
) -> Result<Json<ServiceEnvelope<progress_api::ContractProgressStats>>, ServiceError> {
    let stats = state.api.stats_by_contract(ContractId(contract_id))?;
    Ok(Json(envelope(stats)))
}

async fn dashboard_stats(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<progress_api::DashboardStats>>, ServiceError> {
    let stats = state.api.dashboard_stats()?;
    Ok(Json(envelope(stats)))
}

async fn create_update(
    State(state): State<ServiceState>,
    Json(request): Json<SubmitUpdateRequest>,
) -> Result<(StatusCode, Json<ServiceEnvelope<progress_core::ProgressUpdate>>), ServiceError> {
    let update = state.api.create_update(request)?;
    Ok((StatusCode::CREATED, Json(envelope(update))))
}

async fn put_update(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<SubmitUpdateRequest>,
) -> Result<Json<ServiceEnvelope<progress_core::ProgressUpdate>>, ServiceError> {
    let id = parse_update_id(&id)?;
    let update = state.api.modify_update(id, request)?;
    Ok(Json(envelope(update)))
}

async fn delete_update(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    let id = parse_update_id(&id)?;
    state.api.delete_update(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_comments(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<progress_core::ProgressComment>>>, ServiceError> {
    let comments = state.api.list_comments()?;
    Ok(Json(envelope(comments)))
}

async fn get_comment(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceEnvelope<progress_core::ProgressComment>>, ServiceError> {
    let id = parse_comment_id(&id)?;
    let comment = state.api.find_comment(id)?;
    Ok(Json(envelope(comment)))
}

async fn comments_for_update(
    State(state): State<ServiceState>,
    Path(update_id): Path<String>,
) -> Result<Json<ServiceEnvelope<Vec<progress_api::CommentView>>>, ServiceError> {
    let update_id = parse_update_id(&update_id)?;
    let views = state.api.comments_for_update(update_id)?;
    Ok(Json(envelope(views)))
}

async fn create_comment(
    State(state): State<ServiceState>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<ServiceEnvelope<progress_core::ProgressComment>>), ServiceError> {
    let comment = state.api.create_comment(request)?;
    Ok((StatusCode::CREATED, Json(envelope(comment))))
}

async fn put_comment(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<EditCommentRequest>,
) -> Result<Json<ServiceEnvelope<progress_core::ProgressComment>>, ServiceError> {
    let id = parse_comment_id(&id)?;
    let comment = state.api.modify_comment(id, &request.message)?;
    Ok(Json(envelope(comment)))
}

async fn delete_comment(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    let id = parse_comment_id(&id)?;
    state.api.delete_comment(id)?;
    Ok(StatusCode::NO_CONTENT)
}
