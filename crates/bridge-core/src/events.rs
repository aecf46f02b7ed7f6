//! Event records pushed by the orchestrator and their typed payloads.
//!
//! Wire shape is `{type, data, timestamp}`. Payloads are duck-typed JSON;
//! each recognized type is validated into its variant on demand, and
//! anything that fails validation degrades to [`EventKind::Other`] so the
//! raw log still captures it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BackgroundWorker, RunPhase, WorkerRole, WorkerStatus};

pub const EVENT_PHASE_CHANGE: &str = "phase_change";
pub const EVENT_ORCHESTRATOR_STATUS: &str = "orchestrator_status";
pub const EVENT_WORKER_UPDATE: &str = "worker_update";
pub const EVENT_TRIAGE_UPDATE: &str = "triage_update";
pub const EVENT_PLANNER_UPDATE: &str = "planner_update";
pub const EVENT_REVIEW_UPDATE: &str = "review_update";
pub const EVENT_TRANSCRIPT_LINE: &str = "transcript_line";
pub const EVENT_PR_CREATED: &str = "pr_created";
pub const EVENT_MERGE_UPDATE: &str = "merge_update";
pub const EVENT_HITL_UPDATE: &str = "hitl_update";
pub const EVENT_BACKGROUND_WORKER_STATUS: &str = "background_worker_status";
pub const EVENT_BATCH_START: &str = "batch_start";
pub const EVENT_BATCH_COMPLETE: &str = "batch_complete";
pub const EVENT_ERROR: &str = "error";

/// One `{type, data, timestamp}` message. Immutable once received.
///
/// Identity for dedup purposes is `(event_type, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp,
        }
    }

    pub fn identity(&self) -> (&str, DateTime<Utc>) {
        (&self.event_type, self.timestamp)
    }

    /// Resolve the typed payload for this record. Unrecognized types and
    /// recognized types whose payload fails validation both map to
    /// [`EventKind::Other`]; the reducer treats those as raw-log-only.
    pub fn kind(&self) -> EventKind {
        fn parse<T: serde::de::DeserializeOwned>(data: &serde_json::Value) -> Option<T> {
            serde_json::from_value(data.clone()).ok()
        }

        let kind = match self.event_type.as_str() {
            EVENT_BATCH_START => Some(EventKind::BatchStart),
            EVENT_BATCH_COMPLETE => Some(EventKind::BatchComplete),
            EVENT_HITL_UPDATE => Some(EventKind::HitlUpdate),
            EVENT_ERROR => Some(EventKind::ErrorReport),
            EVENT_PHASE_CHANGE => parse(&self.data).map(EventKind::PhaseChange),
            EVENT_ORCHESTRATOR_STATUS => parse(&self.data).map(EventKind::OrchestratorStatus),
            EVENT_WORKER_UPDATE => parse(&self.data)
                .map(|payload| EventKind::WorkerUpdate(WorkerRole::Implementer, payload)),
            EVENT_TRIAGE_UPDATE => parse(&self.data)
                .map(|payload| EventKind::WorkerUpdate(WorkerRole::Triage, payload)),
            EVENT_PLANNER_UPDATE => parse(&self.data)
                .map(|payload| EventKind::WorkerUpdate(WorkerRole::Planner, payload)),
            EVENT_REVIEW_UPDATE => parse(&self.data).map(EventKind::ReviewUpdate),
            EVENT_TRANSCRIPT_LINE => parse(&self.data).map(EventKind::TranscriptLine),
            EVENT_PR_CREATED => parse(&self.data).map(EventKind::PrCreated),
            EVENT_MERGE_UPDATE => parse(&self.data).map(EventKind::MergeUpdate),
            EVENT_BACKGROUND_WORKER_STATUS => parse(&self.data).map(EventKind::BackgroundWorkerStatus),
            _ => None,
        };
        kind.unwrap_or(EventKind::Other)
    }
}

/// Typed view of a record, keyed by its wire `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    BatchStart,
    BatchComplete,
    PhaseChange(PhaseChangePayload),
    OrchestratorStatus(OrchestratorStatusPayload),
    WorkerUpdate(WorkerRole, WorkerUpdatePayload),
    ReviewUpdate(ReviewUpdatePayload),
    TranscriptLine(TranscriptLinePayload),
    PrCreated(PrCreatedPayload),
    MergeUpdate(MergeUpdatePayload),
    /// Trigger-only: the authoritative HITL list is re-fetched, the event
    /// payload itself is never merged.
    HitlUpdate,
    BackgroundWorkerStatus(BackgroundWorker),
    ErrorReport,
    /// Unrecognized type or malformed payload. Raw-log only.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChangePayload {
    pub phase: RunPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatusPayload {
    pub status: String,
}

impl OrchestratorStatusPayload {
    /// Status strings that name a lifecycle phase participate in run
    /// boundary detection; anything else only updates the status text.
    pub fn phase(&self) -> Option<RunPhase> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerUpdatePayload {
    pub issue_number: u64,
    pub status: WorkerStatus,
    pub worker_id: Option<u64>,
    pub title: Option<String>,
    pub branch_name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewUpdatePayload {
    pub pr_number: u64,
    pub status: WorkerStatus,
    pub worker_id: Option<u64>,
    pub title: Option<String>,
    pub branch_name: Option<String>,
    pub issue_number: Option<u64>,
    pub verdict: Option<String>,
    pub summary: Option<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLinePayload {
    pub source: WorkerRole,
    pub issue_number: Option<u64>,
    pub pr_number: Option<u64>,
    pub line: String,
}

impl TranscriptLinePayload {
    pub fn target_number(&self) -> Option<u64> {
        self.issue_number.or(self.pr_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCreatedPayload {
    pub pr_number: u64,
    pub issue_number: u64,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeUpdatePayload {
    pub pr_number: u64,
    pub status: String,
}

impl MergeUpdatePayload {
    pub fn is_merged(&self) -> bool {
        self.status.eq_ignore_ascii_case("merged")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn record_deserializes_wire_type_field() {
        let record: EventRecord = serde_json::from_str(
            r#"{"type": "pr_created", "data": {"pr_number": 7, "issue_number": 42}, "timestamp": "2026-03-01T12:00:00Z"}"#,
        )
        .expect("deserialize record");

        assert_eq!(record.event_type, "pr_created");
        match record.kind() {
            EventKind::PrCreated(payload) => {
                assert_eq!(payload.pr_number, 7);
                assert_eq!(payload.issue_number, 42);
                assert!(!payload.draft);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn triage_update_maps_to_triage_role() {
        let record = EventRecord::new(
            EVENT_TRIAGE_UPDATE,
            json!({"issue_number": 42, "status": "done"}),
            at(0),
        );
        match record.kind() {
            EventKind::WorkerUpdate(role, payload) => {
                assert_eq!(role, WorkerRole::Triage);
                assert_eq!(payload.status, WorkerStatus::Done);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn worker_update_maps_to_implementer_role() {
        let record = EventRecord::new(
            EVENT_WORKER_UPDATE,
            json!({"issue_number": 5, "status": "implementing", "worker_id": 2}),
            at(0),
        );
        match record.kind() {
            EventKind::WorkerUpdate(role, payload) => {
                assert_eq!(role, WorkerRole::Implementer);
                assert_eq!(payload.worker_id, Some(2));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_degrades_to_other() {
        let record = EventRecord::new("telemetry_blob", json!({"anything": true}), at(0));
        assert_eq!(record.kind(), EventKind::Other);
    }

    #[test]
    fn malformed_payload_of_known_type_degrades_to_other() {
        let record = EventRecord::new(EVENT_PR_CREATED, json!({"pr_number": "seven"}), at(0));
        assert_eq!(record.kind(), EventKind::Other);
    }

    #[test]
    fn orchestrator_status_maps_known_phases() {
        let payload = OrchestratorStatusPayload {
            status: "running".to_string(),
        };
        assert_eq!(payload.phase(), Some(RunPhase::Running));

        let payload = OrchestratorStatusPayload {
            status: "degraded".to_string(),
        };
        assert_eq!(payload.phase(), None);
    }

    #[test]
    fn merge_update_is_merged_ignores_case() {
        let payload = MergeUpdatePayload {
            pr_number: 7,
            status: "Merged".to_string(),
        };
        assert!(payload.is_merged());

        let payload = MergeUpdatePayload {
            pr_number: 7,
            status: "closed".to_string(),
        };
        assert!(!payload.is_merged());
    }

    #[test]
    fn transcript_target_prefers_issue_number() {
        let payload = TranscriptLinePayload {
            source: WorkerRole::Reviewer,
            issue_number: Some(4),
            pr_number: Some(9),
            line: "checking diff".to_string(),
        };
        assert_eq!(payload.target_number(), Some(4));

        let payload = TranscriptLinePayload {
            source: WorkerRole::Reviewer,
            issue_number: None,
            pr_number: Some(9),
            line: "checking diff".to_string(),
        };
        assert_eq!(payload.target_number(), Some(9));
    }

    #[test]
    fn identity_is_type_and_timestamp() {
        let record = EventRecord::new(EVENT_BATCH_START, json!({}), at(30));
        let (kind, ts) = record.identity();
        assert_eq!(kind, "batch_start");
        assert_eq!(ts, at(30));
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = EventRecord::new(
            EVENT_MERGE_UPDATE,
            json!({"pr_number": 7, "status": "merged"}),
            at(15),
        );
        let encoded = serde_json::to_string(&record).expect("serialize record");
        assert!(encoded.contains("\"type\":\"merge_update\""));
        let decoded: EventRecord = serde_json::from_str(&encoded).expect("deserialize record");
        assert_eq!(decoded, record);
    }
}
