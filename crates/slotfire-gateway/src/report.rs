//! Offline `stats` and `export` subcommands.

use std::io::Write;

use anyhow::Context;
use serde::Serialize;
use slotfire_core::OwnerId;
use slotfire_scheduler::{JobStats, JobStore};

#[derive(Debug, Serialize)]
pub struct StatsReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerId>,
    #[serde(flatten)]
    pub counts: JobStats,
    /// Percent of finished jobs that succeeded.
    pub success_rate: f64,
}

pub fn stats(store: &dyn JobStore, owner: Option<&OwnerId>) -> anyhow::Result<StatsReport> {
    let counts = store.stats(owner)?;
    Ok(StatsReport {
        owner: owner.cloned(),
        success_rate: counts.success_rate(),
        counts,
    })
}

/// Write every job of `owner` as JSON Lines, newest first. Returns the row count.
pub fn export_history<W: Write>(
    store: &dyn JobStore,
    owner: &OwnerId,
    mut out: W,
) -> anyhow::Result<usize> {
    let jobs = store.list_by_owner(owner, None)?;
    for job in &jobs {
        serde_json::to_writer(&mut out, job).context("encoding job")?;
        out.write_all(b"\n").context("writing export")?;
    }
    out.flush().context("writing export")?;
    Ok(jobs.len())
}
