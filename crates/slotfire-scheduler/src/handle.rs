use std::sync::Arc;

use slotfire_core::config::MAX_ATTEMPTS_CAP;
use slotfire_core::{JobId, OwnerId};
use tracing::info;

use crate::engine::SchedulerEngine;
use crate::error::{Result, SchedulerError};
use crate::schedule::compute_fire_at;
use crate::store::JobStore;
use crate::types::{Job, JobRequest, JobStats};

/// Public entry point for creating, cancelling and inspecting jobs.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn JobStore>,
    engine: Arc<SchedulerEngine>,
}

impl SchedulerHandle {
    pub fn new(store: Arc<dyn JobStore>, engine: Arc<SchedulerEngine>) -> Self {
        Self { store, engine }
    }

    pub fn engine(&self) -> &Arc<SchedulerEngine> {
        &self.engine
    }

    /// Validate, persist and arm a new job.
    ///
    /// All parameter problems are reported here as
    /// [`SchedulerError::Validation`]; nothing is written in that case.
    pub fn create_job(&self, req: JobRequest) -> Result<Job> {
        if req.owner.as_str().trim().is_empty() {
            return Err(SchedulerError::Validation("owner must not be empty".into()));
        }
        if req.resource_key.as_str().trim().is_empty() {
            return Err(SchedulerError::Validation(
                "resource key must not be empty".into(),
            ));
        }
        if req.max_attempts == 0 || req.max_attempts > MAX_ATTEMPTS_CAP {
            return Err(SchedulerError::Validation(format!(
                "max_attempts must be between 1 and {MAX_ATTEMPTS_CAP}"
            )));
        }
        req.payload.validate()?;

        let fire_at = compute_fire_at(
            req.target_date,
            req.lead_days,
            req.trigger_time,
            &req.timezone,
        )?;
        let job = Job::new(
            req.owner,
            req.resource_key,
            req.payload,
            fire_at,
            req.timezone,
            req.max_attempts,
        );
        self.store.insert(&job)?;
        info!(job_id = %job.id, owner = %job.owner, %fire_at, "job scheduled");
        self.engine.add_job(job.clone());
        Ok(job)
    }

    /// Cancel a job that has not fired yet. Returns `false` if the job does
    /// not exist, belongs to someone else, or already left `pending`.
    pub fn cancel_job(&self, id: &JobId, owner: &OwnerId) -> Result<bool> {
        if !self.store.cancel_if_pending(id, owner)? {
            return Ok(false);
        }
        self.engine.remove_job(id);
        Ok(true)
    }

    pub fn list_jobs(&self, owner: &OwnerId) -> Result<Vec<Job>> {
        self.store.list_by_owner(owner, None)
    }

    /// Newest `limit` jobs for `owner`.
    pub fn history(&self, owner: &OwnerId, limit: usize) -> Result<Vec<Job>> {
        self.store.list_by_owner(owner, Some(limit))
    }

    pub fn job(&self, id: &JobId) -> Result<Job> {
        self.store
            .get(id)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    pub fn stats(&self, owner: Option<&OwnerId>) -> Result<JobStats> {
        self.store.stats(owner)
    }

    /// Delete failed and cancelled jobs untouched for `older_than_days`.
    pub fn purge(&self, older_than_days: u32) -> Result<usize> {
        self.store.purge_older_than(older_than_days)
    }
}
