use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use slotfire_core::{Artifact, CollisionKey, JobId, JobPayload, OwnerId, ResourceKey};

/// Lifecycle state of a job.
///
/// `pending → executing → {success, failed}`, plus `pending → cancelled` and
/// `pending → failed` (collision). Nothing ever returns to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its fire time.
    Pending,
    /// Claimed by a dispatcher run.
    Executing,
    /// The executor reported success.
    Success,
    /// Attempts exhausted, fatal executor outcome, or collision.
    Failed,
    /// Withdrawn by its owner before firing.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Executing => "executing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Edges of the lifecycle graph.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Executing)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Executing, JobStatus::Success)
                | (JobStatus::Executing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "executing" => Ok(JobStatus::Executing),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner: OwnerId,
    pub resource_key: ResourceKey,
    pub payload: JobPayload,
    /// Absolute trigger instant, computed once at creation.
    pub fire_at: DateTime<Utc>,
    /// IANA zone the fire time was localized in.
    pub timezone: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_message: Option<String>,
    /// Blob returned by the most recent attempt, if any.
    pub artifact: Option<Artifact>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh pending job with a new id.
    pub fn new(
        owner: OwnerId,
        resource_key: ResourceKey,
        payload: JobPayload,
        fire_at: DateTime<Utc>,
        timezone: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner,
            resource_key,
            payload,
            fire_at,
            timezone: timezone.into(),
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts,
            last_message: None,
            artifact: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn collision_key(&self) -> CollisionKey {
        CollisionKey::new(&self.owner, &self.resource_key)
    }

    /// True once `fire_at` is at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }
}

/// Parameters for creating a job. The fire time is derived from
/// `target_date`, `lead_days`, `trigger_time` and `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub owner: OwnerId,
    pub resource_key: ResourceKey,
    pub payload: JobPayload,
    pub target_date: NaiveDate,
    pub lead_days: i64,
    pub trigger_time: NaiveTime,
    pub timezone: String,
    pub max_attempts: u32,
}

/// Per-status counts, globally or for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    pub pending: u64,
    pub executing: u64,
    pub success: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl JobStats {
    /// Percentage of finished (success + failed) jobs that succeeded.
    pub fn success_rate(&self) -> f64 {
        let finished = self.success + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.success as f64 / finished as f64 * 100.0
        }
    }
}
