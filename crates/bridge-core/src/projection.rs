//! The state projection: a pure reduction of event records into the
//! dashboard state tree.
//!
//! `DashboardState::reduce` is total and side-effect free so any event
//! sequence can be replayed deterministically in tests. All invariant
//! violations (terminal-state transitions, merges for unknown PRs) are
//! ignored rather than raised.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::{
    EventKind, EventRecord, MergeUpdatePayload, PrCreatedPayload, ReviewUpdatePayload,
    TranscriptLinePayload, WorkerUpdatePayload,
};
use crate::snapshot;
use crate::types::{
    BackgroundWorker, GithubMetrics, HitlItem, IssueSummary, LifetimeStats, PrRecord, ReviewRecord,
    RunPhase, SessionCounters, Stage, StageBuckets, WorkerKey, WorkerRole, WorkerState,
    WorkerStatus,
};

/// The full projected view of the pipeline. Owned by a single reduction
/// path; everything else reads derived copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardState {
    pub connected: bool,
    pub phase: RunPhase,
    pub orchestrator_status: String,
    pub workers: BTreeMap<WorkerKey, WorkerState>,
    pub prs: Vec<PrRecord>,
    pub reviews: Vec<ReviewRecord>,
    pub hitl: Vec<HitlItem>,
    pub buckets: StageBuckets,
    pub counters: SessionCounters,
    pub lifetime: LifetimeStats,
    pub metrics: GithubMetrics,
    pub background: Vec<BackgroundWorker>,
    pub pending_input: BTreeMap<u64, String>,
    /// High-water mark of applied event timestamps. Moves forward only.
    pub last_event_at: Option<DateTime<Utc>>,
}

impl DashboardState {
    /// Apply one event record, producing the next state. Pure: the receiver
    /// is untouched and the same `(state, event)` pair always yields the
    /// same result.
    pub fn reduce(&self, event: &EventRecord) -> DashboardState {
        let mut next = self.clone();
        next.advance_high_water(event.timestamp);

        match event.kind() {
            EventKind::PhaseChange(payload) => next.transition_phase(payload.phase),
            EventKind::OrchestratorStatus(payload) => {
                next.apply_orchestrator_status(&payload.status)
            }
            EventKind::WorkerUpdate(role, payload) => next.apply_worker_update(role, payload),
            EventKind::ReviewUpdate(payload) => next.apply_review_update(payload),
            EventKind::TranscriptLine(payload) => next.apply_transcript_line(payload),
            EventKind::PrCreated(payload) => next.apply_pr_created(payload),
            EventKind::MergeUpdate(payload) => next.apply_merge_update(payload),
            EventKind::BackgroundWorkerStatus(worker) => {
                snapshot::merge_background_heartbeat(&mut next.background, worker);
            }
            // Raw-log-only events: hitl_update is a re-fetch trigger handled
            // by the transport, the rest carry no projectable state.
            EventKind::HitlUpdate
            | EventKind::BatchStart
            | EventKind::BatchComplete
            | EventKind::ErrorReport
            | EventKind::Other => {}
        }

        next
    }

    fn advance_high_water(&mut self, timestamp: DateTime<Utc>) {
        self.last_event_at = Some(match self.last_event_at {
            Some(seen) => seen.max(timestamp),
            None => timestamp,
        });
    }

    fn transition_phase(&mut self, next_phase: RunPhase) {
        if RunPhase::is_new_run_boundary(self.phase, next_phase) {
            self.session_reset();
        }
        self.phase = next_phase;
    }

    /// Shared by `orchestrator_status` events and the bootstrap fetch of
    /// `/control/status`: status strings that name a lifecycle phase also
    /// drive run-boundary detection.
    pub fn apply_orchestrator_status(&mut self, status: &str) {
        self.orchestrator_status = status.to_string();
        if let Ok(phase) = status.parse::<RunPhase>() {
            self.transition_phase(phase);
        }
    }

    /// Clear all per-run collections and counters. Lifetime aggregates,
    /// background workers (and their local toggles), and the event
    /// high-water mark survive.
    pub fn session_reset(&mut self) {
        self.workers.clear();
        self.prs.clear();
        self.reviews.clear();
        self.hitl.clear();
        self.buckets.clear();
        self.counters = SessionCounters::default();
    }

    fn apply_worker_update(&mut self, role: WorkerRole, payload: WorkerUpdatePayload) {
        let status = self.upsert_worker(
            role,
            payload.issue_number,
            payload.status,
            payload.worker_id,
            payload.title,
            payload.branch_name,
        );

        self.buckets.place(
            role.stage(),
            IssueSummary {
                issue_number: payload.issue_number,
                title: self
                    .workers
                    .get(&WorkerKey::new(role, payload.issue_number))
                    .map(|w| w.title.clone())
                    .unwrap_or_default(),
                url: payload.url.unwrap_or_default(),
                status: status.to_string(),
            },
        );
    }

    fn apply_review_update(&mut self, payload: ReviewUpdatePayload) {
        let key = WorkerKey::new(WorkerRole::Reviewer, payload.pr_number);
        let previously_done = self
            .workers
            .get(&key)
            .map(|w| w.status.is_done())
            .unwrap_or(false);

        let status = self.upsert_worker(
            WorkerRole::Reviewer,
            payload.pr_number,
            payload.status,
            payload.worker_id,
            payload.title,
            payload.branch_name,
        );
        if let Some(worker) = self.workers.get_mut(&key) {
            worker.pr_number = Some(payload.pr_number);
        }

        // The review record appends only on the not-done -> done edge, so
        // replays cannot duplicate it.
        if !previously_done && status.is_done() {
            self.reviews.push(ReviewRecord {
                pr_number: payload.pr_number,
                verdict: payload.verdict.unwrap_or_default(),
                summary: payload.summary.unwrap_or_default(),
                duration_ms: payload.duration_ms,
            });
        }

        let issue_number = payload.issue_number.or_else(|| {
            self.prs
                .iter()
                .find(|pr| pr.pr_number == payload.pr_number)
                .map(|pr| pr.issue_number)
        });
        if let Some(issue_number) = issue_number {
            self.buckets.place(
                Stage::Review,
                IssueSummary {
                    issue_number,
                    title: self
                        .workers
                        .get(&key)
                        .map(|w| w.title.clone())
                        .unwrap_or_default(),
                    url: String::new(),
                    status: status.to_string(),
                },
            );
        }
    }

    /// Look up or lazily create the worker, apply the status transition
    /// under the terminal-state and counter guards, and return the status
    /// the worker ended up with.
    fn upsert_worker(
        &mut self,
        role: WorkerRole,
        number: u64,
        status: WorkerStatus,
        worker_id: Option<u64>,
        title: Option<String>,
        branch_name: Option<String>,
    ) -> WorkerStatus {
        let key = WorkerKey::new(role, number);
        let worker = self
            .workers
            .entry(key)
            .or_insert_with(|| WorkerState::new(role, number));

        if let Some(id) = worker_id {
            worker.worker_id = id;
        }
        if let Some(title) = title {
            worker.title = title;
        }
        if let Some(branch) = branch_name {
            worker.branch_name = Some(branch);
        }

        let previous = worker.status;
        if !previous.is_terminal() {
            worker.status = status;
        }
        let current = worker.status;

        if !previous.is_done() && current.is_done() {
            self.counters.bump_done(role);
        }

        current
    }

    fn apply_transcript_line(&mut self, payload: TranscriptLinePayload) {
        let Some(number) = payload.target_number() else {
            return;
        };
        let key = WorkerKey::new(payload.source, number);
        // An append for a worker we have never seen does not fabricate one.
        if let Some(worker) = self.workers.get_mut(&key) {
            worker.append_transcript(payload.line);
        }
    }

    fn apply_pr_created(&mut self, payload: PrCreatedPayload) {
        if self.prs.iter().any(|pr| pr.pr_number == payload.pr_number) {
            return;
        }

        let key = WorkerKey::new(WorkerRole::Implementer, payload.issue_number);
        if let Some(worker) = self.workers.get_mut(&key) {
            worker.pr_number = Some(payload.pr_number);
        }

        self.prs.push(PrRecord {
            pr_number: payload.pr_number,
            issue_number: payload.issue_number,
            branch_name: payload.branch_name,
            draft: payload.draft,
            url: payload.url,
            merged: false,
        });
        self.counters.session_pr_count += 1;
    }

    fn apply_merge_update(&mut self, payload: MergeUpdatePayload) {
        if !payload.is_merged() {
            return;
        }
        let Some(pr) = self
            .prs
            .iter_mut()
            .find(|pr| pr.pr_number == payload.pr_number)
        else {
            return;
        };
        if pr.merged {
            return;
        }
        pr.merged = true;
        let issue_number = pr.issue_number;
        self.counters.merged_count += 1;

        let title = self
            .workers
            .get(&WorkerKey::new(WorkerRole::Implementer, issue_number))
            .map(|w| w.title.clone())
            .unwrap_or_default();
        self.buckets.place(
            Stage::Merged,
            IssueSummary {
                issue_number,
                title,
                url: String::new(),
                status: "merged".to_string(),
            },
        );
    }

    // ---- Snapshot reconciliation entry points (client-driven) ----

    pub fn apply_lifetime_stats(&mut self, stats: LifetimeStats) {
        self.lifetime = stats;
    }

    pub fn apply_metrics(&mut self, metrics: GithubMetrics) {
        self.metrics = metrics;
    }

    pub fn apply_open_prs(&mut self, server: Vec<PrRecord>) {
        self.prs = snapshot::merge_open_prs(&self.prs, server);
    }

    pub fn apply_stage_snapshot(&mut self, incoming: StageBuckets) {
        self.buckets = snapshot::merge_stage_buckets(&self.buckets, incoming);
    }

    /// Full replacement: the server is the sole authority for HITL items.
    pub fn apply_hitl_items(&mut self, items: Vec<HitlItem>) {
        self.hitl = items;
    }

    pub fn apply_background_workers(&mut self, incoming: Vec<BackgroundWorker>) {
        self.background = snapshot::merge_background_workers(&self.background, incoming);
    }

    /// Record a user toggle locally. The override holds against incoming
    /// heartbeats until the server reports the same value.
    pub fn set_background_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(worker) = self.background.iter_mut().find(|w| w.name == name) {
            worker.enabled = enabled;
            worker.enabled_override = Some(enabled);
        }
    }

    pub fn apply_pending_input(&mut self, pending: BTreeMap<u64, String>) {
        self.pending_input = pending;
    }

    /// Optimistic removal on submit, before server confirmation.
    pub fn remove_pending_input(&mut self, issue_number: u64) {
        self.pending_input.remove(&issue_number);
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}
