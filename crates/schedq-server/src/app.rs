use std::collections::BTreeMap;

use crate::auth::ApiAuth;
use crate::metrics;
use crate::rate_limit::{self, RateLimiter};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use schedq_core::{
    EntryId, EntryStatus, JobDescriptor, JobStatus, MaxSchedules, QueueEntry, QueueError,
    QueueManager,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub queue: QueueManager,
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct PushRequest {
    pub queue: String,
    pub kind: String,
    /// Serialized job state, opaque to the queue.
    #[serde(default)]
    pub state: serde_json::Value,
    pub priority: Option<i32>,
    pub max_schedules: Option<MaxSchedules>,
    /// Not-before gate; the job stays ineligible until this passes.
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct PushResponse {
    #[schema(example = 42)]
    pub job_id: EntryId,
}

/// A claimed entry together with the reconstructed job descriptor.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct PoppedJob {
    pub entry: QueueEntry,
    pub job: JobDescriptor,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct PopResponse {
    /// Null when the queue has no eligible entry.
    pub job: Option<PoppedJob>,
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct QueueStatusResponse {
    /// Queue name to eligible-entry count, for queues with pending work.
    pub queues: BTreeMap<String, i64>,
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct UpdateStatusRequest {
    pub description: String,
    /// Only `"error"` is accepted; omit to annotate without changing status.
    pub status: Option<EntryStatus>,
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct RescheduleRequest {
    pub job: JobDescriptor,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct FinishRequest {
    pub job: JobDescriptor,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "schedq API",
        version = "0.1.0",
        description = "REST facade over the schedq job queue: push, pop, report, reschedule, finish."
    ),
    paths(
        push_job,
        pop_job,
        queue_status,
        queue_job_statuses,
        queue_job_status,
        update_status,
        reschedule_job,
        finish_job
    ),
    components(schemas(
        schedq_core::QueueEntry,
        schedq_core::EntryStatus,
        schedq_core::JobDescriptor,
        schedq_core::MaxSchedules,
        schedq_core::Placement,
        schedq_core::JobStatus,
        PushRequest,
        PushResponse,
        PoppedJob,
        PopResponse,
        QueueStatusResponse,
        UpdateStatusRequest,
        RescheduleRequest,
        FinishRequest
    ))
)]
struct ApiDoc;

async fn metrics_handler() -> ([(axum::http::header::HeaderName, &'static str); 1], String) {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8",
        )],
        metrics::gather(),
    )
}

type ApiState = (AppState, ApiAuth, RateLimiter);

pub fn build_app(state: AppState, api_auth: ApiAuth, limiter: RateLimiter) -> Router {
    let unauthenticated = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler));

    let api_state: ApiState = (state, api_auth, limiter);
    let api = Router::new()
        .route("/v1/jobs", post(push_job))
        .route("/v1/jobs/{id}", get(queue_job_status))
        .route("/v1/jobs/{id}/status", post(update_status))
        .route("/v1/jobs/reschedule", post(reschedule_job))
        .route("/v1/jobs/finish", post(finish_job))
        .route("/v1/queues", get(queue_status))
        .route("/v1/queues/{queue}/pop", post(pop_job))
        .route("/v1/queues/{queue}/jobs", get(queue_job_statuses))
        .route_layer(middleware::from_fn_with_state(
            api_state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            api_state.clone(),
            auth_middleware,
        ))
        .with_state(api_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(unauthenticated)
        .merge(api)
}

async fn rate_limit_middleware(
    State((_state, _auth, limiter)): State<ApiState>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, axum::response::Response> {
    let key = rate_limit::client_key(req.headers());
    limiter
        .check(&key)
        .await
        .map_err(|code| (code, "rate limit exceeded").into_response())?;
    Ok(next.run(req).await)
}

async fn auth_middleware(
    State((_state, auth, _limiter)): State<ApiState>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, StatusCode> {
    if auth.allows(req.headers()) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Push a job onto its queue. Requires auth if API_TOKEN is set.
#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = PushRequest,
    responses(
        (status = 200, description = "Job queued", body = PushResponse),
        (status = 400, description = "Descriptor rejected (e.g. no queue name)"),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn push_job(
    State((state, _auth, _limiter)): State<ApiState>,
    Json(req): Json<PushRequest>,
) -> Result<Json<PushResponse>, (StatusCode, String)> {
    let mut job = JobDescriptor::new(req.queue, req.kind, req.state);
    if let Some(priority) = req.priority {
        job.priority = priority;
    }
    if let Some(max_schedules) = req.max_schedules {
        job.max_schedules = max_schedules;
    }

    let entry = state
        .queue
        .push(&mut job, req.scheduled_at)
        .await
        .map_err(map_err)?;

    metrics::JOBS_PUSHED.inc();
    Ok(Json(PushResponse { job_id: entry.id }))
}

/// Claim the oldest eligible highest-priority job of a queue.
/// Responds with a null job when the queue is empty; that is not an error.
#[utoipa::path(
    post,
    path = "/v1/queues/{queue}/pop",
    params(("queue" = String, Path, description = "Queue name")),
    responses(
        (status = 200, description = "Claim result", body = PopResponse),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn pop_job(
    State((state, _auth, _limiter)): State<ApiState>,
    Path(queue): Path<String>,
) -> Result<Json<PopResponse>, (StatusCode, String)> {
    let Some(entry) = state.queue.pop(&queue).await.map_err(map_err)? else {
        return Ok(Json(PopResponse { job: None }));
    };

    let job = JobDescriptor::from_entry(&entry).map_err(map_err)?;
    metrics::JOBS_POPPED.inc();

    Ok(Json(PopResponse {
        job: Some(PoppedJob { entry, job }),
    }))
}

/// Eligible-entry counts for every queue with pending work, sorted by name.
#[utoipa::path(
    get,
    path = "/v1/queues",
    responses(
        (status = 200, description = "Queue status", body = QueueStatusResponse),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn queue_status(
    State((state, _auth, _limiter)): State<ApiState>,
) -> Result<Json<QueueStatusResponse>, (StatusCode, String)> {
    let queues = state.queue.queue_status().await.map_err(map_err)?;
    Ok(Json(QueueStatusResponse { queues }))
}

/// Every entry of a queue (any status) with positional slot numbers.
#[utoipa::path(
    get,
    path = "/v1/queues/{queue}/jobs",
    params(("queue" = String, Path, description = "Queue name")),
    responses(
        (status = 200, description = "Entries with placements", body = [JobStatus]),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn queue_job_statuses(
    State((state, _auth, _limiter)): State<ApiState>,
    Path(queue): Path<String>,
) -> Result<Json<Vec<JobStatus>>, (StatusCode, String)> {
    let statuses = state
        .queue
        .queue_job_statuses(&queue)
        .await
        .map_err(map_err)?;
    Ok(Json(statuses))
}

/// One entry with its rank among the eligible entries of its queue.
/// 404 when the job is unknown or already finished.
#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(("id" = i64, Path, description = "Entry id")),
    responses(
        (status = 200, description = "Entry with placement", body = JobStatus),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 404, description = "No such entry"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn queue_job_status(
    State((state, _auth, _limiter)): State<ApiState>,
    Path(id): Path<EntryId>,
) -> Result<Json<JobStatus>, (StatusCode, String)> {
    let status = state.queue.queue_job_status(id).await.map_err(map_err)?;
    match status {
        Some(status) => Ok(Json(status)),
        None => Err((StatusCode::NOT_FOUND, format!("no queue entry with id {id}"))),
    }
}

/// Set a job's progress description, optionally flagging it as errored.
#[utoipa::path(
    post,
    path = "/v1/jobs/{id}/status",
    params(("id" = i64, Path, description = "Entry id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 204, description = "Updated"),
        (status = 400, description = "Status other than error"),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 404, description = "No such entry"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn update_status(
    State((state, _auth, _limiter)): State<ApiState>,
    Path(id): Path<EntryId>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .queue
        .update_status(id, &req.description, req.status)
        .await
        .map_err(map_err)?;

    if req.status == Some(EntryStatus::Error) {
        metrics::JOB_ERRORS.inc();
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Put a popped job back into the waiting state, gated until `scheduled_at`.
#[utoipa::path(
    post,
    path = "/v1/jobs/reschedule",
    request_body = RescheduleRequest,
    responses(
        (status = 204, description = "Rescheduled"),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 404, description = "No such entry"),
        (status = 409, description = "Schedule limit exhausted"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn reschedule_job(
    State((state, _auth, _limiter)): State<ApiState>,
    Json(req): Json<RescheduleRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .queue
        .reschedule_job(&req.job, req.scheduled_at)
        .await
        .map_err(map_err)?;

    metrics::JOBS_RESCHEDULED.inc();
    Ok(StatusCode::NO_CONTENT)
}

/// Terminal success: removes the entry from the store.
#[utoipa::path(
    post,
    path = "/v1/jobs/finish",
    request_body = FinishRequest,
    responses(
        (status = 204, description = "Finished and removed"),
        (status = 401, description = "Unauthorized (API_TOKEN required)"),
        (status = 404, description = "No such entry"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Internal error")
    )
)]
async fn finish_job(
    State((state, _auth, _limiter)): State<ApiState>,
    Json(req): Json<FinishRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.queue.finish_job(&req.job).await.map_err(map_err)?;

    metrics::JOBS_FINISHED.inc();
    Ok(StatusCode::NO_CONTENT)
}

fn map_err(e: QueueError) -> (StatusCode, String) {
    let status = match &e {
        QueueError::Validation(_) => StatusCode::BAD_REQUEST,
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::ScheduleLimitExceeded(_) => StatusCode::CONFLICT,
        QueueError::Payload(_) | QueueError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
