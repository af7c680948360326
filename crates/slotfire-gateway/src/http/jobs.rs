//! Job endpoints.
//!
//! Auth: `Authorization: Bearer <token>` on every route here.
//!
//! | Route                      | Action                              |
//! |----------------------------|-------------------------------------|
//! | `POST /jobs`               | create, 201 with the job            |
//! | `GET /jobs?owner&limit`    | owner's jobs, newest first          |
//! | `GET /jobs/{id}`           | single job                          |
//! | `DELETE /jobs/{id}?owner`  | cancel while pending                |
//! | `GET /stats?owner`         | per-status counts and success rate  |
//! | `POST /purge`              | drop old failed/cancelled rows      |

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use slotfire_core::{JobId, JobPayload, OwnerId, ResourceKey};
use slotfire_scheduler::{Job, JobRequest, JobStats};
use std::sync::Arc;

use super::error::ApiError;
use crate::app::AppState;
use crate::auth::check_auth;

#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub owner: String,
    /// Derived from a slot booking payload when omitted.
    #[serde(default)]
    pub resource_key: Option<String>,
    pub payload: JobPayload,
    pub target_date: NaiveDate,
    #[serde(default)]
    pub lead_days: Option<i64>,
    /// `HH:MM`.
    #[serde(default)]
    pub trigger_time: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurgeBody {
    #[serde(default = "default_purge_days")]
    pub older_than_days: u32,
}

fn default_purge_days() -> u32 {
    30
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if check_auth(&state.config.gateway.auth, headers) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Fill unset fields from `[scheduler]` config.
fn to_request(state: &AppState, body: CreateJobBody) -> Result<JobRequest, ApiError> {
    let defaults = &state.config.scheduler;
    let trigger_time = match body.trigger_time {
        Some(t) => NaiveTime::parse_from_str(&t, "%H:%M")
            .map_err(|_| ApiError::Invalid(format!("trigger_time '{t}' is not HH:MM")))?,
        None => defaults
            .trigger_time()
            .map_err(|e| ApiError::Scheduler(e.into()))?,
    };
    let resource_key = match body.resource_key {
        Some(k) => ResourceKey::from(k),
        None => match &body.payload {
            JobPayload::SlotBooking {
                venue,
                date,
                time,
                resource,
            } => {
                let date = date.to_string();
                ResourceKey::from_parts(&[
                    venue.as_str(),
                    resource.as_deref().unwrap_or_default(),
                    date.as_str(),
                    time.as_str(),
                ])
            }
            JobPayload::Custom { .. } => {
                return Err(ApiError::Invalid(
                    "resource_key is required for custom payloads".into(),
                ))
            }
        },
    };
    Ok(JobRequest {
        owner: OwnerId::from(body.owner),
        resource_key,
        payload: body.payload,
        target_date: body.target_date,
        lead_days: body.lead_days.unwrap_or(defaults.default_lead_days),
        trigger_time,
        timezone: body
            .timezone
            .unwrap_or_else(|| defaults.default_timezone.clone()),
        max_attempts: body.max_attempts.unwrap_or(defaults.max_attempts),
    })
}

/// POST /jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    authorize(&state, &headers)?;
    let req = to_request(&state, body)?;
    let job = state.scheduler.create_job(req)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs?owner=..&limit=..
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<JobList>, ApiError> {
    authorize(&state, &headers)?;
    let owner = OwnerId::from(query.owner);
    let jobs = match query.limit {
        Some(limit) => state.scheduler.history(&owner, limit)?,
        None => state.scheduler.list_jobs(&owner)?,
    };
    Ok(Json(JobList { jobs }))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.scheduler.job(&JobId::from(id))?))
}

/// DELETE /jobs/{id}?owner=..
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let cancelled = state
        .scheduler
        .cancel_job(&JobId::from(id), &OwnerId::from(query.owner))?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// GET /stats?owner=..
pub async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let owner = query.owner.map(OwnerId::from);
    let stats: JobStats = state.scheduler.stats(owner.as_ref())?;
    let success_rate = stats.success_rate();
    Ok(Json(json!({
        "stats": stats,
        "success_rate": success_rate,
    })))
}

/// POST /purge
pub async fn purge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PurgeBody>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let removed = state.scheduler.purge(body.older_than_days)?;
    Ok(Json(json!({ "removed": removed })))
}
