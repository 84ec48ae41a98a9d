//! HTTP control surface
//!
//! JSON routes over [`AdminService`]. Every write goes through the same
//! store the scheduler reads, so timers follow the change immediately.
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | GET | `/api/config` | masked snapshot |
//! | POST | `/api/config` | whole-config write |
//! | PUT | `/api/timezone` | change timezone |
//! | POST | `/api/jobs` | create job |
//! | GET / PUT / DELETE | `/api/jobs/{id}` | read / replace / delete job |
//! | POST | `/api/run/{id}` | run now |
//! | GET / POST / DELETE | `/api/domains/{job}/{rule}` | rule domains |
//!
//! The surface has no authentication of its own; bind it to loopback or put
//! it behind an authenticating proxy.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use nyansync_core::{AdminService, ConfigUpdate, Error, Job, JobDefinition, Snapshot, TriggerOutcome};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Core error carried to an HTTP response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Control request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct TimezoneRequest {
    timezone: String,
}

#[derive(Debug, Deserialize)]
struct DomainsRequest {
    domains: Vec<String>,
}

/// Build the control router
pub fn router(admin: Arc<AdminService>) -> Router {
    let api = Router::new()
        .route("/config", get(get_config).post(update_config))
        .route("/timezone", put(set_timezone))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job).put(update_job).delete(delete_job))
        .route("/run/{id}", post(trigger_run))
        .route(
            "/domains/{job}/{rule}",
            get(get_domains).post(set_domains).delete(clear_domains),
        );

    Router::new().nest("/api", api).with_state(admin)
}

async fn get_config(State(admin): State<Arc<AdminService>>) -> ApiResult<Json<Snapshot>> {
    Ok(Json(admin.masked_snapshot().await?))
}

async fn update_config(
    State(admin): State<Arc<AdminService>>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<Json<Value>> {
    let snapshot = admin.apply_config(update).await?;
    Ok(Json(json!({ "status": "saved", "jobs": snapshot.jobs.len() })))
}

async fn set_timezone(
    State(admin): State<Arc<AdminService>>,
    Json(req): Json<TimezoneRequest>,
) -> ApiResult<Json<Value>> {
    admin.set_timezone(&req.timezone).await?;
    Ok(Json(json!({ "timezone": req.timezone })))
}

async fn create_job(
    State(admin): State<Arc<AdminService>>,
    Json(definition): Json<JobDefinition>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = admin.create_job(definition).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn get_job(
    State(admin): State<Arc<AdminService>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(admin.job(&id).await?))
}

async fn update_job(
    State(admin): State<Arc<AdminService>>,
    Path(id): Path<String>,
    Json(definition): Json<JobDefinition>,
) -> ApiResult<Json<Job>> {
    Ok(Json(admin.update_job(&id, definition).await?))
}

async fn delete_job(
    State(admin): State<Arc<AdminService>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    admin.delete_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_run(
    State(admin): State<Arc<AdminService>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let status = match admin.trigger(&id).await? {
        TriggerOutcome::Started => "started",
        TriggerOutcome::FollowUpQueued => "follow_up_queued",
        TriggerOutcome::Coalesced => "coalesced",
        TriggerOutcome::Dropped => "dropped",
    };
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": status }))))
}

async fn get_domains(
    State(admin): State<Arc<AdminService>>,
    Path((job, rule)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let domains = admin.rule_domains(&job, &rule).await?;
    Ok(Json(json!({ "domains": domains })))
}

async fn set_domains(
    State(admin): State<Arc<AdminService>>,
    Path((job, rule)): Path<(String, String)>,
    Json(req): Json<DomainsRequest>,
) -> ApiResult<Json<Value>> {
    let domains = admin.set_rule_domains(&job, &rule, req.domains).await?;
    Ok(Json(json!({ "status": "saved", "domains": domains })))
}

async fn clear_domains(
    State(admin): State<Arc<AdminService>>,
    Path((job, rule)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    admin.clear_rule_domains(&job, &rule).await?;
    Ok(Json(json!({ "status": "deleted" })))
}
