//! Domain types for the pipeline dashboard projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The pipeline role a worker slot is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Triage,
    Planner,
    Implementer,
    Reviewer,
}

impl WorkerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerRole::Triage => "triage",
            WorkerRole::Planner => "planner",
            WorkerRole::Implementer => "implementer",
            WorkerRole::Reviewer => "reviewer",
        }
    }

    /// Key prefix for this role. Implementer workers are keyed by the bare
    /// issue number so one issue can hold independent workers per stage.
    pub fn key_prefix(self) -> Option<&'static str> {
        match self {
            WorkerRole::Triage => Some("triage"),
            WorkerRole::Planner => Some("plan"),
            WorkerRole::Implementer => None,
            WorkerRole::Reviewer => Some("review"),
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            WorkerRole::Triage => Stage::Triage,
            WorkerRole::Planner => Stage::Plan,
            WorkerRole::Implementer => Stage::Implement,
            WorkerRole::Reviewer => Stage::Review,
        }
    }
}

impl std::str::FromStr for WorkerRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "triage" => Ok(WorkerRole::Triage),
            "planner" | "plan" => Ok(WorkerRole::Planner),
            "implementer" | "implement" | "worker" => Ok(WorkerRole::Implementer),
            "reviewer" | "review" => Ok(WorkerRole::Reviewer),
            other => Err(format!(
                "invalid worker role '{other}'. valid values: triage, planner, implementer, reviewer"
            )),
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker lifecycle: `Queued` through role-specific in-progress substates
/// into `Done` or `Failed`. The terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Queued,
    Analyzing,
    Planning,
    Implementing,
    Reviewing,
    Done,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Queued => "queued",
            WorkerStatus::Analyzing => "analyzing",
            WorkerStatus::Planning => "planning",
            WorkerStatus::Implementing => "implementing",
            WorkerStatus::Reviewing => "reviewing",
            WorkerStatus::Done => "done",
            WorkerStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Done | WorkerStatus::Failed)
    }

    pub fn is_done(self) -> bool {
        matches!(self, WorkerStatus::Done)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite worker key: `"42"` for an implementer on issue 42,
/// `"triage-42"` / `"plan-42"` / `"review-7"` for the other roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerKey(pub String);

impl WorkerKey {
    pub fn new(role: WorkerRole, number: u64) -> Self {
        match role.key_prefix() {
            Some(prefix) => Self(format!("{prefix}-{number}")),
            None => Self(number.to_string()),
        }
    }
}

impl std::fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One active processing unit: an issue being triaged/planned/implemented or
/// a pull request under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    pub role: WorkerRole,
    pub number: u64,
    pub status: WorkerStatus,
    pub worker_id: u64,
    pub title: String,
    pub branch_name: Option<String>,
    pub transcript: Vec<String>,
    pub pr_number: Option<u64>,
}

impl WorkerState {
    pub fn new(role: WorkerRole, number: u64) -> Self {
        Self {
            role,
            number,
            status: WorkerStatus::Queued,
            worker_id: 0,
            title: String::new(),
            branch_name: None,
            transcript: Vec::new(),
            pr_number: None,
        }
    }

    pub fn append_transcript(&mut self, line: impl Into<String>) {
        self.transcript.push(line.into());
    }
}

/// A pull request tracked for the current run. `merged` is monotonic: once
/// set it never reverts, even when a later snapshot disagrees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrRecord {
    pub pr_number: u64,
    pub issue_number: u64,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub merged: bool,
}

/// Outcome of one completed review pass. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub pr_number: u64,
    pub verdict: String,
    pub summary: String,
    pub duration_ms: Option<u64>,
}

/// An item waiting on a human. The server list is the sole authority; the
/// projection replaces the whole set on every fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitlItem {
    pub issue_number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub issue_url: String,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub branch_name: Option<String>,
    #[serde(default)]
    pub cause: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub memory_suggestion: bool,
}

/// Lightweight issue row shown inside a stage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub issue_number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: String,
}

/// The fixed set of pipeline stage buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Triage,
    Plan,
    Implement,
    Review,
    Merged,
    Hitl,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Triage,
        Stage::Plan,
        Stage::Implement,
        Stage::Review,
        Stage::Merged,
        Stage::Hitl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Triage => "triage",
            Stage::Plan => "plan",
            Stage::Implement => "implement",
            Stage::Review => "review",
            Stage::Merged => "merged",
            Stage::Hitl => "hitl",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered issue lists per stage. An issue lives in exactly one bucket at a
/// time, except `merged`, which is strictly additive within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StageBuckets {
    pub triage: Vec<IssueSummary>,
    pub plan: Vec<IssueSummary>,
    pub implement: Vec<IssueSummary>,
    pub review: Vec<IssueSummary>,
    pub merged: Vec<IssueSummary>,
    pub hitl: Vec<IssueSummary>,
}

impl StageBuckets {
    pub fn get(&self, stage: Stage) -> &Vec<IssueSummary> {
        match stage {
            Stage::Triage => &self.triage,
            Stage::Plan => &self.plan,
            Stage::Implement => &self.implement,
            Stage::Review => &self.review,
            Stage::Merged => &self.merged,
            Stage::Hitl => &self.hitl,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut Vec<IssueSummary> {
        match stage {
            Stage::Triage => &mut self.triage,
            Stage::Plan => &mut self.plan,
            Stage::Implement => &mut self.implement,
            Stage::Review => &mut self.review,
            Stage::Merged => &mut self.merged,
            Stage::Hitl => &mut self.hitl,
        }
    }

    /// Place an issue into `stage`, removing it from every other bucket
    /// first. The `merged` bucket is never a source of removal: entries
    /// there stay until a session reset.
    pub fn place(&mut self, stage: Stage, issue: IssueSummary) {
        for other in Stage::ALL {
            if other == Stage::Merged || other == stage {
                continue;
            }
            self.get_mut(other)
                .retain(|entry| entry.issue_number != issue.issue_number);
        }

        let bucket = self.get_mut(stage);
        if let Some(existing) = bucket
            .iter_mut()
            .find(|entry| entry.issue_number == issue.issue_number)
        {
            if !issue.title.is_empty() {
                existing.title = issue.title;
            }
            if !issue.url.is_empty() {
                existing.url = issue.url;
            }
            if !issue.status.is_empty() {
                existing.status = issue.status;
            }
        } else {
            bucket.push(issue);
        }
    }

    pub fn clear(&mut self) {
        *self = StageBuckets::default();
    }
}

/// Orchestrator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Plan,
    Implement,
    Running,
    Done,
    Stopping,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Plan => "plan",
            RunPhase::Implement => "implement",
            RunPhase::Running => "running",
            RunPhase::Done => "done",
            RunPhase::Stopping => "stopping",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, RunPhase::Plan | RunPhase::Implement | RunPhase::Running)
    }

    /// A new run begins when an inactive phase hands over to an active one.
    pub fn is_new_run_boundary(previous: RunPhase, next: RunPhase) -> bool {
        !previous.is_active() && next.is_active()
    }
}

impl std::str::FromStr for RunPhase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "idle" => Ok(RunPhase::Idle),
            "plan" | "planning" => Ok(RunPhase::Plan),
            "implement" | "implementing" => Ok(RunPhase::Implement),
            "running" => Ok(RunPhase::Running),
            "done" => Ok(RunPhase::Done),
            "stopping" | "stopped" => Ok(RunPhase::Stopping),
            other => Err(format!("unknown run phase '{other}'")),
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run counters, zeroed on session reset. Each is incremented exactly
/// once per issue/PR reaching its terminal done state for that stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionCounters {
    pub session_triaged: u64,
    pub session_planned: u64,
    pub session_implemented: u64,
    pub session_reviewed: u64,
    pub merged_count: u64,
    pub session_pr_count: u64,
}

impl SessionCounters {
    pub fn bump_done(&mut self, role: WorkerRole) {
        match role {
            WorkerRole::Triage => self.session_triaged += 1,
            WorkerRole::Planner => self.session_planned += 1,
            WorkerRole::Implementer => self.session_implemented += 1,
            WorkerRole::Reviewer => self.session_reviewed += 1,
        }
    }
}

/// Externally-sourced lifetime counters. Session resets never touch these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LifetimeStats(pub BTreeMap<String, serde_json::Value>);

/// Externally-sourced GitHub-side metrics. Session resets never touch these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GithubMetrics(pub BTreeMap<String, serde_json::Value>);

/// Status of one background maintenance loop, as reported by heartbeats and
/// the `/system/workers` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundWorker {
    pub name: String,
    #[serde(default)]
    pub status: String,
    pub last_run: Option<DateTime<Utc>>,
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub details: serde_json::Value,
    /// A user toggle applied locally but not yet confirmed by the server.
    /// While set, it wins over the `enabled` value of incoming snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_override: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_key_uses_bare_number_for_implementer() {
        assert_eq!(WorkerKey::new(WorkerRole::Implementer, 42).0, "42");
    }

    #[test]
    fn worker_key_prefixes_other_roles() {
        assert_eq!(WorkerKey::new(WorkerRole::Triage, 42).0, "triage-42");
        assert_eq!(WorkerKey::new(WorkerRole::Planner, 42).0, "plan-42");
        assert_eq!(WorkerKey::new(WorkerRole::Reviewer, 7).0, "review-7");
    }

    #[test]
    fn worker_status_terminal_states() {
        assert!(WorkerStatus::Done.is_terminal());
        assert!(WorkerStatus::Failed.is_terminal());
        assert!(!WorkerStatus::Queued.is_terminal());
        assert!(!WorkerStatus::Implementing.is_terminal());
        assert!(WorkerStatus::Done.is_done());
        assert!(!WorkerStatus::Failed.is_done());
    }

    #[test]
    fn worker_role_parses_aliases() {
        assert_eq!("plan".parse::<WorkerRole>().unwrap(), WorkerRole::Planner);
        assert_eq!(
            "worker".parse::<WorkerRole>().unwrap(),
            WorkerRole::Implementer
        );
        assert!("ops".parse::<WorkerRole>().is_err());
    }

    #[test]
    fn run_phase_boundary_requires_inactive_to_active() {
        assert!(RunPhase::is_new_run_boundary(RunPhase::Idle, RunPhase::Plan));
        assert!(RunPhase::is_new_run_boundary(
            RunPhase::Done,
            RunPhase::Running
        ));
        assert!(RunPhase::is_new_run_boundary(
            RunPhase::Stopping,
            RunPhase::Implement
        ));
        assert!(!RunPhase::is_new_run_boundary(
            RunPhase::Plan,
            RunPhase::Implement
        ));
        assert!(!RunPhase::is_new_run_boundary(RunPhase::Running, RunPhase::Done));
        assert!(!RunPhase::is_new_run_boundary(RunPhase::Idle, RunPhase::Done));
    }

    #[test]
    fn run_phase_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RunPhase::Stopping).unwrap(), "\"stopping\"");
        let parsed: RunPhase = serde_json::from_str("\"implement\"").unwrap();
        assert_eq!(parsed, RunPhase::Implement);
    }

    #[test]
    fn buckets_place_moves_issue_between_stages() {
        let mut buckets = StageBuckets::default();
        let issue = IssueSummary {
            issue_number: 10,
            title: "Add parser".to_string(),
            url: String::new(),
            status: "queued".to_string(),
        };
        buckets.place(Stage::Triage, issue.clone());
        assert_eq!(buckets.triage.len(), 1);

        buckets.place(Stage::Plan, issue);
        assert!(buckets.triage.is_empty());
        assert_eq!(buckets.plan.len(), 1);
    }

    #[test]
    fn buckets_place_never_removes_from_merged() {
        let mut buckets = StageBuckets::default();
        let issue = IssueSummary {
            issue_number: 10,
            title: "Add parser".to_string(),
            url: String::new(),
            status: "merged".to_string(),
        };
        buckets.place(Stage::Merged, issue.clone());
        buckets.place(Stage::Review, issue);

        assert_eq!(buckets.merged.len(), 1);
        assert_eq!(buckets.review.len(), 1);
    }

    #[test]
    fn buckets_place_dedupes_within_a_bucket() {
        let mut buckets = StageBuckets::default();
        let issue = IssueSummary {
            issue_number: 3,
            title: "First title".to_string(),
            url: String::new(),
            status: String::new(),
        };
        buckets.place(Stage::Implement, issue.clone());
        buckets.place(
            Stage::Implement,
            IssueSummary {
                title: "Renamed".to_string(),
                ..issue
            },
        );

        assert_eq!(buckets.implement.len(), 1);
        assert_eq!(buckets.implement[0].title, "Renamed");
    }

    #[test]
    fn counters_bump_done_maps_roles() {
        let mut counters = SessionCounters::default();
        counters.bump_done(WorkerRole::Triage);
        counters.bump_done(WorkerRole::Reviewer);
        counters.bump_done(WorkerRole::Reviewer);

        assert_eq!(counters.session_triaged, 1);
        assert_eq!(counters.session_reviewed, 2);
        assert_eq!(counters.session_implemented, 0);
    }

    #[test]
    fn hitl_item_deserializes_with_defaults() {
        let item: HitlItem = serde_json::from_str(
            r#"{"issue_number": 9, "pr_number": null, "pr_url": null, "branch_name": null}"#,
        )
        .expect("deserialize hitl item");
        assert_eq!(item.issue_number, 9);
        assert!(item.title.is_empty());
        assert!(!item.memory_suggestion);
    }
}
