//! Merge-preserving reconciliation of authoritative server snapshots into
//! locally-accumulated session state.
//!
//! Snapshots are authoritative for what they contain, but they can omit
//! facts the session already learned (a PR that merged mid-run drops out of
//! the "open" list). These merges keep the monotonic local facts.

use crate::types::{BackgroundWorker, PrRecord, StageBuckets};

/// Merge the server's current open-PR list into the local list.
///
/// Server version wins per PR number, except `merged`, which is monotonic.
/// Locally merged PRs that the snapshot no longer lists are re-added.
pub fn merge_open_prs(local: &[PrRecord], server: Vec<PrRecord>) -> Vec<PrRecord> {
    let mut result = server;

    for entry in result.iter_mut() {
        let locally_merged = local
            .iter()
            .any(|pr| pr.pr_number == entry.pr_number && pr.merged);
        if locally_merged {
            entry.merged = true;
        }
    }

    for pr in local {
        if pr.merged && !result.iter().any(|entry| entry.pr_number == pr.pr_number) {
            result.push(pr.clone());
        }
    }

    result
}

/// Replace every stage bucket with the snapshot's version, except `merged`,
/// which is additive: local entries survive, entries present in both are
/// deduplicated by issue number with the snapshot's fields winning.
pub fn merge_stage_buckets(local: &StageBuckets, incoming: StageBuckets) -> StageBuckets {
    let mut result = incoming;

    let mut merged = local.merged.clone();
    for entry in std::mem::take(&mut result.merged) {
        match merged
            .iter_mut()
            .find(|existing| existing.issue_number == entry.issue_number)
        {
            Some(existing) => *existing = entry,
            None => merged.push(entry),
        }
    }
    result.merged = merged;

    result
}

/// Merge one background-worker heartbeat or snapshot row into the local
/// list, upserting by name.
///
/// `enabled` is local-wins: an in-flight user toggle beats a stale server
/// value until the server catches up. A heartbeat that omits
/// `interval_seconds` keeps the previously known interval.
pub fn merge_background_heartbeat(workers: &mut Vec<BackgroundWorker>, incoming: BackgroundWorker) {
    match workers
        .iter_mut()
        .find(|worker| worker.name == incoming.name)
    {
        Some(existing) => *existing = merge_background_fields(existing, incoming),
        None => workers.push(incoming),
    }
}

/// Merge a full background-worker snapshot. The snapshot defines the set of
/// workers; per-worker fields follow the heartbeat rules.
pub fn merge_background_workers(
    local: &[BackgroundWorker],
    incoming: Vec<BackgroundWorker>,
) -> Vec<BackgroundWorker> {
    incoming
        .into_iter()
        .map(|entry| match local.iter().find(|w| w.name == entry.name) {
            Some(existing) => merge_background_fields(existing, entry),
            None => entry,
        })
        .collect()
}

fn merge_background_fields(
    existing: &BackgroundWorker,
    mut incoming: BackgroundWorker,
) -> BackgroundWorker {
    if incoming.interval_seconds.is_none() {
        incoming.interval_seconds = existing.interval_seconds;
    }

    match existing.enabled_override {
        Some(wanted) if wanted == incoming.enabled => {
            // Server caught up with the local toggle.
            incoming.enabled_override = None;
        }
        Some(wanted) => {
            incoming.enabled = wanted;
            incoming.enabled_override = Some(wanted);
        }
        None => {
            incoming.enabled_override = None;
        }
    }

    incoming
}
