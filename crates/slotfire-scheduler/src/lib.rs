//! `slotfire-scheduler`: one-shot job scheduling with SQLite persistence.
//!
//! # Overview
//!
//! A job is created with a target date, a lead window and a local trigger
//! time. [`schedule::compute_fire_at`] turns those into an absolute instant
//! once, at creation. The [`engine::SchedulerEngine`] arms one Tokio timer per
//! pending job; when it fires, the [`dispatcher::Dispatcher`] takes over:
//!
//! 1. claim the job's collision key in the [`guard::CollisionGuard`]
//! 2. flip the row `pending → executing` with a compare-and-swap
//! 3. call the [`executor::Executor`] up to `max_attempts` times
//! 4. write `success` or `failed`, release the key, notify the owner
//!
//! Pending jobs survive restarts: [`engine::SchedulerEngine::start`] re-arms
//! them from the store and dispatches the ones whose time already passed.

pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod guard;
pub mod handle;
pub mod notify;
pub mod policy;
pub mod schedule;
pub mod store;
pub mod types;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use executor::{ExecutionReport, Executor, ExecutorError};
pub use guard::{CollisionGuard, CollisionPermit};
pub use handle::SchedulerHandle;
pub use notify::{ChannelNotifier, Notification, Notifier, NotifyError};
pub use policy::DispatchPolicy;
pub use store::{JobStore, SqliteJobStore};
pub use types::{Job, JobRequest, JobStats, JobStatus};
