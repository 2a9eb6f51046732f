//! Expected outcomes for sharded job template runs
//!
//! A job template with shard count `c` launched against `h` hosts becomes a
//! workflow job with `c` child jobs. Hosts are dealt round-robin in
//! inventory order, so host `i` lands in shard `i % c` and the per-shard
//! host counts are fully determined by `h` and `c`.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Host count each shard should run against, in shard order.
///
/// `expected_shard_host_counts(5, 3) == [2, 2, 1]`.
pub fn expected_shard_host_counts(hosts: usize, shards: usize) -> Result<Vec<usize>> {
    if shards == 0 {
        return Err(Error::InvalidInput("shard count must be at least 1".to_string()));
    }
    Ok((0..shards)
        .map(|k| if k < hosts { (hosts - k).div_ceil(shards) } else { 0 })
        .collect())
}

/// Shard index the host at `index` (0-based, inventory order) is assigned to
pub fn shard_for_host(index: usize, shards: usize) -> Result<usize> {
    if shards == 0 {
        return Err(Error::InvalidInput("shard count must be at least 1".to_string()));
    }
    Ok(index % shards)
}

/// The observed run interval of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobWindow {
    pub id: i64,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
}

/// True when every job was running at one common instant.
///
/// Fewer than two jobs trivially overlap. A job that never started or never
/// finished cannot be shown to overlap, so the answer is `false`.
pub fn all_jobs_overlap(jobs: &[JobWindow]) -> bool {
    if jobs.len() < 2 {
        return true;
    }

    let mut latest_start: Option<DateTime<Utc>> = None;
    let mut earliest_finish: Option<DateTime<Utc>> = None;

    for job in jobs {
        let (Some(started), Some(finished)) = (job.started, job.finished) else {
            tracing::debug!("Job {} has no complete run window", job.id);
            return false;
        };
        latest_start = Some(latest_start.map_or(started, |s| s.max(started)));
        earliest_finish = Some(earliest_finish.map_or(finished, |f| f.min(finished)));
    }

    matches!((latest_start, earliest_finish), (Some(s), Some(f)) if s < f)
}
