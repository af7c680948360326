use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use slotfire_core::{Artifact, JobId, JobPayload, OwnerId};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::executor::{ExecutionReport, Executor, ExecutorError};
use crate::guard::CollisionGuard;
use crate::notify::Notifier;
use crate::policy::DispatchPolicy;
use crate::store::JobStore;
use crate::types::{Job, JobStatus};

/// How a dispatcher run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
    /// Another job with the same collision key was in flight.
    Collision,
    /// The job was no longer pending (cancelled, already claimed) or the
    /// same job was already being dispatched. Nothing was written.
    Skipped,
    /// The store kept rejecting the claim. The job is still `pending` and has
    /// to be fired again.
    Deferred,
}

/// Final state of the retry loop.
struct Finished {
    success: bool,
    attempts: u32,
    message: String,
    artifact: Option<Artifact>,
}

/// Executes one fired job: collision check, claim, retry loop, outcome,
/// notification.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    guard: Arc<CollisionGuard>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        guard: Arc<CollisionGuard>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            store,
            guard,
            executor,
            notifier,
            policy,
        }
    }

    pub fn guard(&self) -> &Arc<CollisionGuard> {
        &self.guard
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Run `job` to a terminal status. Never panics and never returns an
    /// error: every failure ends up in the job record and the owner's inbox.
    #[instrument(skip(self, job), fields(job_id = %job.id, owner = %job.owner))]
    pub async fn run(&self, job: Job) -> DispatchOutcome {
        let key = job.collision_key();
        let permit = match self.guard.acquire(key.clone(), &job.id) {
            Ok(permit) => permit,
            Err(holder) if holder == job.id => {
                debug!("job already in flight, duplicate fire ignored");
                return DispatchOutcome::Skipped;
            }
            Err(holder) => return self.fail_collision(&job, key.to_string(), holder).await,
        };

        let claimed = self
            .persist("claim", &job.id, || {
                self.store
                    .try_transition(&job.id, JobStatus::Pending, JobStatus::Executing)
            })
            .await;
        match claimed {
            Some(true) => {}
            Some(false) => {
                debug!("job is no longer pending, skipping");
                return DispatchOutcome::Skipped;
            }
            None => return DispatchOutcome::Deferred,
        }

        info!(max_attempts = job.max_attempts, "dispatching job");
        if self.policy.notify_on_start {
            self.notify(
                &job.owner,
                &format!("Firing now: {}", job.payload.summary()),
                None,
            )
            .await;
        }

        let finished = self.attempt_loop(&job).await;
        let status = if finished.success {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };

        // A row left `executing` is never re-armed, so this write does not give up.
        let written = self
            .persist_until_written("outcome", &job.id, || {
                self.store
                    .update_outcome(&job.id, status, &finished.message, finished.attempts)
            })
            .await;
        if !written {
            warn!(%status, "job left executing state before its outcome was written");
        }
        drop(permit);

        info!(%status, attempts = finished.attempts, "job finished");
        let summary = job.payload.summary();
        let message = if finished.success {
            format!(
                "Done: {summary} (attempt {} of {}). {}",
                finished.attempts, job.max_attempts, finished.message
            )
        } else {
            format!(
                "Failed: {summary} after {} attempt(s). Last error: {}",
                finished.attempts, finished.message
            )
        };
        self.notify(&job.owner, &message, finished.artifact.as_ref())
            .await;

        if finished.success {
            DispatchOutcome::Succeeded {
                attempts: finished.attempts,
            }
        } else {
            DispatchOutcome::Failed {
                attempts: finished.attempts,
            }
        }
    }

    async fn fail_collision(&self, job: &Job, key: String, holder: JobId) -> DispatchOutcome {
        let reason = SchedulerError::Collision { key: key.clone() }.to_string();
        warn!(%key, %holder, "collision key busy, failing job");

        // Only a job that is still pending may be failed this way.
        let written = self
            .persist("collision outcome", &job.id, || {
                self.store
                    .update_outcome(&job.id, JobStatus::Failed, &reason, job.attempt_count)
            })
            .await;
        match written {
            Some(true) => {}
            Some(false) => return DispatchOutcome::Skipped,
            None => return DispatchOutcome::Deferred,
        }
        self.notify(
            &job.owner,
            &format!("Failed: {}. {reason}", job.payload.summary()),
            None,
        )
        .await;
        DispatchOutcome::Collision
    }

    async fn attempt_loop(&self, job: &Job) -> Finished {
        if let Err(e) = job.payload.validate() {
            let message =
                SchedulerError::from(ExecutorError::InvalidPayload(e.to_string())).to_string();
            warn!(%message, "payload rejected before first attempt");
            return Finished {
                success: false,
                attempts: 0,
                message,
                artifact: None,
            };
        }

        let max = job.max_attempts.max(1);
        let mut message = String::new();
        let mut artifact: Option<Artifact> = None;

        for attempt in 1..=max {
            let fatal = match self.attempt(&job.payload).await {
                Ok(report) if report.success => {
                    artifact = report.artifact.or(artifact);
                    self.persist("attempt", &job.id, || {
                        self.store.record_attempt(
                            &job.id,
                            attempt,
                            &report.message,
                            artifact.as_ref(),
                        )
                    })
                    .await;
                    return Finished {
                        success: true,
                        attempts: attempt,
                        message: report.message,
                        artifact,
                    };
                }
                Ok(report) => {
                    message = report.message;
                    artifact = report.artifact.or(artifact);
                    false
                }
                Err(e) => {
                    let err = SchedulerError::from(e);
                    message = err.to_string();
                    !err.is_retryable()
                }
            };

            warn!(attempt, max, fatal, %message, "attempt failed");
            self.persist("attempt", &job.id, || {
                self.store
                    .record_attempt(&job.id, attempt, &message, artifact.as_ref())
            })
            .await;

            if fatal {
                return Finished {
                    success: false,
                    attempts: attempt,
                    message,
                    artifact,
                };
            }
            if attempt < max {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        Finished {
            success: false,
            attempts: max,
            message,
            artifact,
        }
    }

    /// One executor call. Timeouts and panics come back as errors.
    async fn attempt(
        &self,
        payload: &JobPayload,
    ) -> std::result::Result<ExecutionReport, ExecutorError> {
        let budget = self.policy.attempt_timeout;
        let call = AssertUnwindSafe(self.executor.run(payload, budget)).catch_unwind();
        match tokio::time::timeout(budget, call).await {
            Err(_) => Err(ExecutorError::TimedOut(budget)),
            Ok(Err(panic)) => Err(ExecutorError::Panicked(panic_message(&*panic))),
            Ok(Ok(result)) => result,
        }
    }

    async fn notify(&self, owner: &OwnerId, message: &str, attachment: Option<&Artifact>) {
        let send = self.notifier.send(owner, message, attachment);
        match tokio::time::timeout(self.policy.notify_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(owner = %owner, error = %e, "notification failed"),
            Err(_) => warn!(owner = %owner, "notification timed out"),
        }
    }

    /// Run a store write, retrying with exponential back-off. Returns `None`
    /// once the retries are used up; the error is logged, not propagated.
    async fn persist<T>(
        &self,
        what: &'static str,
        job_id: &JobId,
        mut op: impl FnMut() -> Result<T>,
    ) -> Option<T> {
        let tries = self.policy.persistence_retries.max(1);
        for n in 1..=tries {
            match op() {
                Ok(v) => return Some(v),
                Err(e) if n < tries => {
                    warn!(%job_id, op = what, try_no = n, error = %e, "store write failed, retrying");
                    tokio::time::sleep(self.policy.persistence_delay(n)).await;
                }
                Err(e) => {
                    error!(%job_id, op = what, error = %e, "store write abandoned");
                }
            }
        }
        None
    }

    /// Retry a store write until it goes through. Back-off doubles up to
    /// `max_persistence_backoff` and stays there.
    async fn persist_until_written<T>(
        &self,
        what: &'static str,
        job_id: &JobId,
        mut op: impl FnMut() -> Result<T>,
    ) -> T {
        let mut n: u32 = 0;
        loop {
            n = n.saturating_add(1);
            match op() {
                Ok(v) => {
                    if n > 1 {
                        info!(%job_id, op = what, tries = n, "store write went through");
                    }
                    return v;
                }
                Err(e) if n < self.policy.persistence_retries => {
                    warn!(%job_id, op = what, try_no = n, error = %e, "store write failed, retrying");
                }
                Err(e) => {
                    error!(%job_id, op = what, try_no = n, error = %e, "store write still failing, retrying");
                }
            }
            tokio::time::sleep(self.policy.persistence_delay(n)).await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use slotfire_core::ResourceKey;

    use crate::notify::NotifyError;
    use crate::store::SqliteJobStore;

    /// Fails until call number `succeed_on`, then succeeds.
    struct SucceedOn {
        succeed_on: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Executor for SucceedOn {
        async fn run(
            &self,
            _payload: &JobPayload,
            _timeout: Duration,
        ) -> std::result::Result<ExecutionReport, ExecutorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(ExecutionReport::success("booked"))
            } else {
                Ok(ExecutionReport::failure(format!("slot busy ({n})"))
                    .with_artifact(Artifact::new(format!("/tmp/{n}.png"))))
            }
        }
    }

    struct Fatal;

    #[async_trait]
    impl Executor for Fatal {
        async fn run(
            &self,
            _payload: &JobPayload,
            _timeout: Duration,
        ) -> std::result::Result<ExecutionReport, ExecutorError> {
            Err(ExecutorError::Fatal("time not available".into()))
        }
    }

    struct Panics;

    #[async_trait]
    impl Executor for Panics {
        async fn run(
            &self,
            _payload: &JobPayload,
            _timeout: Duration,
        ) -> std::result::Result<ExecutionReport, ExecutorError> {
            panic!("driver crashed")
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String, bool)>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(
            &self,
            owner: &OwnerId,
            message: &str,
            attachment: Option<&Artifact>,
        ) -> std::result::Result<(), NotifyError> {
            self.sent.lock().unwrap().push((
                owner.to_string(),
                message.to_string(),
                attachment.is_some(),
            ));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        async fn send(
            &self,
            _owner: &OwnerId,
            _message: &str,
            _attachment: Option<&Artifact>,
        ) -> std::result::Result<(), NotifyError> {
            Err(NotifyError::Delivery("bot blocked".into()))
        }
    }

    fn fast_policy() -> DispatchPolicy {
        DispatchPolicy {
            retry_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(200),
            persistence_backoff: Duration::from_millis(1),
            notify_on_start: false,
            ..Default::default()
        }
    }

    fn pending_job(store: &SqliteJobStore, max_attempts: u32) -> Job {
        let job = Job::new(
            OwnerId::from("42"),
            ResourceKey::from("court-1:2024-03-10:18:00"),
            JobPayload::SlotBooking {
                venue: "club".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                time: "18:00".into(),
                resource: None,
            },
            Utc::now(),
            "UTC",
            max_attempts,
        );
        store.insert(&job).unwrap();
        job
    }

    fn dispatcher(
        store: Arc<SqliteJobStore>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        policy: DispatchPolicy,
    ) -> Dispatcher {
        Dispatcher::new(
            store,
            Arc::new(CollisionGuard::new()),
            executor,
            notifier,
            policy,
        )
    }

    #[tokio::test]
    async fn success_on_third_attempt() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = pending_job(&store, 5);
        let exec = Arc::new(SucceedOn {
            succeed_on: 3,
            calls: AtomicU32::new(0),
        });
        let notes = Arc::new(Recorder::default());
        let d = dispatcher(store.clone(), exec.clone(), notes.clone(), fast_policy());

        let outcome = d.run(job.clone()).await;
        assert_eq!(outcome, DispatchOutcome::Succeeded { attempts: 3 });
        assert_eq!(exec.calls.load(Ordering::SeqCst), 3);

        let row = store.get(&job.id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Success);
        assert_eq!(row.attempt_count, 3);
        // Artifact from the last failed attempt is kept with the record.
        assert_eq!(row.artifact, Some(Artifact::new("/tmp/2.png")));

        let sent = notes.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("Done:"));
        assert!(sent[0].2);
        assert_eq!(d.guard().active_count(), 0);
    }

    #[tokio::test]
    async fn fatal_error_stops_after_one_call() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = pending_job(&store, 5);
        let notes = Arc::new(Recorder::default());
        let d = dispatcher(store.clone(), Arc::new(Fatal), notes.clone(), fast_policy());

        assert_eq!(
            d.run(job.clone()).await,
            DispatchOutcome::Failed { attempts: 1 }
        );
        let row = store.get(&job.id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.last_message.as_deref(), Some("time not available"));
        assert!(notes.sent.lock().unwrap()[0].1.contains("time not available"));
    }

    #[tokio::test]
    async fn panic_is_a_failed_attempt_and_releases_key() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = pending_job(&store, 2);
        let d = dispatcher(
            store.clone(),
            Arc::new(Panics),
            Arc::new(Recorder::default()),
            fast_policy(),
        );

        assert_eq!(
            d.run(job.clone()).await,
            DispatchOutcome::Failed { attempts: 2 }
        );
        let row = store.get(&job.id).unwrap().unwrap();
        assert!(row.last_message.unwrap().contains("driver crashed"));
        assert!(!d.guard().is_held(&job.collision_key()));
    }

    #[tokio::test]
    async fn start_notice_precedes_outcome() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = pending_job(&store, 1);
        let notes = Arc::new(Recorder::default());
        let policy = DispatchPolicy {
            notify_on_start: true,
            ..fast_policy()
        };
        let exec = Arc::new(SucceedOn {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });
        let d = dispatcher(store, exec, notes.clone(), policy);
        d.run(job).await;

        let sent = notes.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.starts_with("Firing now:"));
        assert!(sent[1].1.starts_with("Done:"));
    }

    #[tokio::test]
    async fn notifier_failure_does_not_change_status() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = pending_job(&store, 1);
        let exec = Arc::new(SucceedOn {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });
        let d = dispatcher(store.clone(), exec, Arc::new(Broken), fast_policy());
        assert_eq!(
            d.run(job.clone()).await,
            DispatchOutcome::Succeeded { attempts: 1 }
        );
        assert_eq!(
            store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Success
        );
    }

    #[tokio::test]
    async fn already_claimed_job_is_skipped() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = pending_job(&store, 1);
        store
            .try_transition(&job.id, JobStatus::Pending, JobStatus::Executing)
            .unwrap();
        let exec = Arc::new(SucceedOn {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });
        let d = dispatcher(store, exec.clone(), Arc::new(Recorder::default()), fast_policy());
        assert_eq!(d.run(job).await, DispatchOutcome::Skipped);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_payload_fails_without_calling_executor() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let job = Job::new(
            OwnerId::from("42"),
            ResourceKey::from("x"),
            JobPayload::Custom {
                action: " ".into(),
                params: serde_json::Value::Null,
            },
            Utc::now(),
            "UTC",
            3,
        );
        store.insert(&job).unwrap();
        let exec = Arc::new(SucceedOn {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });
        let d = dispatcher(store.clone(), exec.clone(), Arc::new(Recorder::default()), fast_policy());

        assert_eq!(
            d.run(job.clone()).await,
            DispatchOutcome::Failed { attempts: 0 }
        );
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
        assert!(store
            .get(&job.id)
            .unwrap()
            .unwrap()
            .last_message
            .unwrap()
            .starts_with("invalid payload"));
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
