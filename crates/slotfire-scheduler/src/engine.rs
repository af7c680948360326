use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use slotfire_core::JobId;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::store::JobStore;
use crate::types::Job;

type TimerMap = HashMap<JobId, JoinHandle<()>>;

/// One-shot timer per pending job.
///
/// A timer sleeps until the job's `fire_at`, removes itself from the map and
/// hands the job to the [`Dispatcher`] on a fresh task. Removing the map entry
/// first means a concurrent [`remove_job`](Self::remove_job) either aborts the
/// sleep or finds nothing left to cancel, never both.
///
/// A run that comes back [`DispatchOutcome::Deferred`] (claim write failed)
/// is re-armed after the policy's redispatch delay.
pub struct SchedulerEngine {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    timers: Arc<Mutex<TimerMap>>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Arm every pending job in the store. Past-due jobs are dispatched right
    /// away. Jobs that already have a timer are left alone, so calling this
    /// twice is harmless. Returns how many jobs were scheduled.
    pub fn start(&self) -> Result<usize> {
        let pending = self.store.list_pending()?;
        let mut scheduled = 0;
        for job in pending {
            if self.is_armed(&job.id) {
                continue;
            }
            self.add_job(job);
            scheduled += 1;
        }
        info!(count = scheduled, "scheduler started");
        Ok(scheduled)
    }

    /// Arm a timer for `job`, or dispatch it now if `fire_at` has passed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_job(&self, job: Job) {
        let now = Utc::now();
        if job.is_due(now) {
            info!(job_id = %job.id, fire_at = %job.fire_at, "fire time reached, dispatching now");
            spawn_dispatch(Arc::clone(&self.timers), Arc::clone(&self.dispatcher), job);
            return;
        }
        let delay = (job.fire_at - now).to_std().unwrap_or_default();
        arm(&self.timers, &self.dispatcher, job, delay);
    }

    /// Abort the timer for `id`. Returns `false` if there was none, which
    /// includes a job already handed to the dispatcher.
    pub fn remove_job(&self, id: &JobId) -> bool {
        match lock(&self.timers).remove(id) {
            Some(handle) => {
                handle.abort();
                debug!(job_id = %id, "timer disarmed");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, id: &JobId) -> bool {
        lock(&self.timers).contains_key(id)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Abort every armed timer. The jobs stay pending in the store and are
    /// re-armed by the next [`start`](Self::start). In-flight dispatcher runs
    /// are not touched.
    pub fn shutdown(&self) {
        let drained: Vec<_> = lock(&self.timers).drain().collect();
        for (_, handle) in &drained {
            handle.abort();
        }
        if !drained.is_empty() {
            warn!(count = drained.len(), "scheduler stopped with timers still armed");
        }
        info!("scheduler shut down");
    }
}

fn arm(timers: &Arc<Mutex<TimerMap>>, dispatcher: &Arc<Dispatcher>, job: Job, delay: Duration) {
    let mut map = lock(timers);
    if map.contains_key(&job.id) {
        debug!(job_id = %job.id, "timer already armed");
        return;
    }

    let id = job.id.clone();
    let task_timers = Arc::clone(timers);
    let task_dispatcher = Arc::clone(dispatcher);
    // The spawned task cannot observe the map before the insert below:
    // it has to take the same lock we are holding.
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if lock(&task_timers).remove(&job.id).is_none() {
            return;
        }
        debug!(job_id = %job.id, "timer fired");
        spawn_dispatch(task_timers, task_dispatcher, job);
    });
    map.insert(id.clone(), handle);
    debug!(job_id = %id, delay_ms = delay.as_millis() as u64, "timer armed");
}

fn spawn_dispatch(timers: Arc<Mutex<TimerMap>>, dispatcher: Arc<Dispatcher>, job: Job) {
    tokio::spawn(async move {
        if dispatcher.run(job.clone()).await == DispatchOutcome::Deferred {
            let delay = dispatcher.policy().redispatch_delay();
            warn!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "claim not written, re-arming");
            arm(&timers, &dispatcher, job, delay);
        }
    });
}

fn lock(timers: &Mutex<TimerMap>) -> MutexGuard<'_, TimerMap> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}
