//! The transport session: one persistent websocket connection, a fixed-delay
//! reconnect loop, and the single serialized reduction path that owns the
//! dashboard state.
//!
//! Every producer (socket frames, snapshot fetches, the human-input poll,
//! user actions) funnels a [`SessionInput`] into one mpsc consumer; nothing
//! else ever touches the state value. Consumers observe it through `watch`
//! channels.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use bridge_core::{
    BackgroundWorker, BridgeConfig, DashboardState, EventKind, EventLog, EventRecord,
    GithubMetrics, HitlItem, LifetimeStats, PrRecord,
};

use crate::api::{ApiClient, ControlStatus};
use crate::{poller, sync};

/// Everything that can mutate the session state, serialized through one
/// channel so the reduction path stays single-writer.
#[derive(Debug)]
pub enum SessionInput {
    /// A live event from the socket: raw-logged and reduced.
    Event(EventRecord),
    /// Gap-recovered events: raw-logged only, never reduced again.
    Backfill(Vec<EventRecord>),
    Connected(bool),
    ControlStatus(ControlStatus),
    LifetimeStats(LifetimeStats),
    OpenPrs(Vec<PrRecord>),
    HitlItems(Vec<HitlItem>),
    BackgroundWorkers(Vec<BackgroundWorker>),
    Metrics(GithubMetrics),
    PendingInput(BTreeMap<u64, String>),
    /// Optimistic removal after a human-input submission.
    AnswerSubmitted(u64),
    /// A local user toggle for a background worker.
    ToggleBackground { name: String, enabled: bool },
}

/// Apply one input to the owned state and raw log. Returns whether the raw
/// log changed, so the log watch only publishes when it has to.
pub(crate) fn apply_input(
    state: &mut DashboardState,
    log: &mut EventLog,
    input: SessionInput,
) -> bool {
    match input {
        SessionInput::Event(event) => {
            log.record(event.clone());
            *state = state.reduce(&event);
            true
        }
        SessionInput::Backfill(events) => {
            let added = log.backfill(events);
            if added > 0 {
                debug!(added, "backfilled missed events into raw log");
            }
            added > 0
        }
        SessionInput::Connected(connected) => {
            state.set_connected(connected);
            false
        }
        SessionInput::ControlStatus(status) => {
            state.apply_orchestrator_status(&status.status);
            if let Some(pipeline) = status.pipeline {
                state.apply_stage_snapshot(pipeline);
            }
            false
        }
        SessionInput::LifetimeStats(stats) => {
            state.apply_lifetime_stats(stats);
            false
        }
        SessionInput::OpenPrs(prs) => {
            state.apply_open_prs(prs);
            false
        }
        SessionInput::HitlItems(items) => {
            state.apply_hitl_items(items);
            false
        }
        SessionInput::BackgroundWorkers(workers) => {
            state.apply_background_workers(workers);
            false
        }
        SessionInput::Metrics(metrics) => {
            state.apply_metrics(metrics);
            false
        }
        SessionInput::PendingInput(pending) => {
            state.apply_pending_input(pending);
            false
        }
        SessionInput::AnswerSubmitted(issue_number) => {
            state.remove_pending_input(issue_number);
            false
        }
        SessionInput::ToggleBackground { name, enabled } => {
            state.set_background_enabled(&name, enabled);
            false
        }
    }
}

/// A running session: the reduction task plus the transport, snapshot-sync,
/// and human-input loops. Dropping the handle via [`Session::shutdown`]
/// cancels every loop, including a pending reconnect timer.
pub struct Session {
    api: ApiClient,
    input: mpsc::Sender<SessionInput>,
    state: watch::Receiver<DashboardState>,
    events: watch::Receiver<EventLog>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn spawn(config: BridgeConfig) -> Session {
        let api = ApiClient::new(&config.server_url);
        let (input_tx, mut input_rx) = mpsc::channel::<SessionInput>(256);
        let (state_tx, state_rx) = watch::channel(DashboardState::default());
        let (events_tx, events_rx) = watch::channel(EventLog::new(config.event_log_capacity));

        let log_capacity = config.event_log_capacity;
        let reducer = tokio::spawn(async move {
            let mut state = DashboardState::default();
            let mut log = EventLog::new(log_capacity);
            while let Some(input) = input_rx.recv().await {
                let log_changed = apply_input(&mut state, &mut log, input);
                let _ = state_tx.send(state.clone());
                if log_changed {
                    let _ = events_tx.send(log.clone());
                }
            }
        });

        let transport = tokio::spawn(run_transport(
            config.clone(),
            api.clone(),
            input_tx.clone(),
            state_rx.clone(),
        ));
        let snapshot_sync = tokio::spawn(sync::run_snapshot_sync(
            api.clone(),
            input_tx.clone(),
            Duration::from_millis(config.sync_interval_ms),
        ));
        let human_input = tokio::spawn(poller::run_human_input_poll(
            api.clone(),
            input_tx.clone(),
            Duration::from_millis(config.poll_interval_ms),
        ));

        Session {
            api,
            input: input_tx,
            state: state_rx,
            events: events_rx,
            tasks: vec![reducer, transport, snapshot_sync, human_input],
        }
    }

    /// Live view of the projected state.
    pub fn state(&self) -> watch::Receiver<DashboardState> {
        self.state.clone()
    }

    /// Live view of the bounded raw event log.
    pub fn events(&self) -> watch::Receiver<EventLog> {
        self.events.clone()
    }

    /// Submit an answer for a pending human-input request. The key is
    /// removed optimistically; the POST is fire-and-forget.
    pub fn submit_answer(&self, issue_number: u64, answer: String) {
        let api = self.api.clone();
        let input = self.input.clone();
        tokio::spawn(async move {
            poller::submit_answer(&api, &input, issue_number, answer).await;
        });
    }

    /// Record a local background-worker toggle. It wins over stale
    /// heartbeats until the server reports the same value.
    pub async fn toggle_background(&self, name: String, enabled: bool) {
        let _ = self
            .input
            .send(SessionInput::ToggleBackground { name, enabled })
            .await;
    }

    /// Tear the session down, cancelling all loops and any pending
    /// reconnect timer.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Connect, bootstrap, recover the gap, then pump frames until the socket
/// drops; reconnect after a fixed delay, forever.
async fn run_transport(
    config: BridgeConfig,
    api: ApiClient,
    input: mpsc::Sender<SessionInput>,
    state: watch::Receiver<DashboardState>,
) {
    let ws_url = config.websocket_url();
    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);

    loop {
        match connect_async(ws_url.as_str()).await {
            Ok((mut socket, _)) => {
                info!(url = %ws_url, "connected to orchestrator");
                if input.send(SessionInput::Connected(true)).await.is_err() {
                    return;
                }

                bootstrap(&api, &input).await;
                let since = state.borrow().last_event_at;
                if let Some(since) = since {
                    recover_gap(&api, &input, since).await;
                }

                while let Some(frame) = socket.next().await {
                    match frame {
                        Ok(Message::Text(text)) => handle_frame(&api, &input, &text).await,
                        Ok(Message::Close(_)) => {
                            debug!("orchestrator sent close frame");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "websocket stream error");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(url = %ws_url, error = %err, "connection attempt failed");
            }
        }

        if input.send(SessionInput::Connected(false)).await.is_err() {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Parse and dispatch one text frame. Malformed frames are dropped without
/// disturbing the session.
async fn handle_frame(api: &ApiClient, input: &mpsc::Sender<SessionInput>, text: &str) {
    let event: EventRecord = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "dropping malformed message");
            return;
        }
    };

    // hitl_update never mutates the HITL set directly; it triggers a fetch
    // of the authoritative list instead.
    if event.kind() == EventKind::HitlUpdate {
        let api = api.clone();
        let input = input.clone();
        tokio::spawn(async move {
            match api.hitl_items().await {
                Ok(items) => {
                    let _ = input.send(SessionInput::HitlItems(items)).await;
                }
                Err(err) => warn!(error = %err, "hitl refresh failed"),
            }
        });
    }

    let _ = input.send(SessionInput::Event(event)).await;
}

/// Fetch the authoritative snapshots once after connecting. Each fetch is
/// independent; a failure leaves that slice stale until the sync loop
/// retries it.
async fn bootstrap(api: &ApiClient, input: &mpsc::Sender<SessionInput>) {
    match api.control_status().await {
        Ok(status) => {
            let _ = input.send(SessionInput::ControlStatus(status)).await;
        }
        Err(err) => warn!(error = %err, "control status fetch failed"),
    }
    match api.lifetime_stats().await {
        Ok(stats) => {
            let _ = input.send(SessionInput::LifetimeStats(stats)).await;
        }
        Err(err) => warn!(error = %err, "lifetime stats fetch failed"),
    }
    match api.open_prs().await {
        Ok(prs) => {
            let _ = input.send(SessionInput::OpenPrs(prs)).await;
        }
        Err(err) => warn!(error = %err, "open pr fetch failed"),
    }
    match api.hitl_items().await {
        Ok(items) => {
            let _ = input.send(SessionInput::HitlItems(items)).await;
        }
        Err(err) => warn!(error = %err, "hitl fetch failed"),
    }
    match api.background_workers().await {
        Ok(workers) => {
            let _ = input.send(SessionInput::BackgroundWorkers(workers)).await;
        }
        Err(err) => warn!(error = %err, "background worker fetch failed"),
    }
    match api.metrics().await {
        Ok(metrics) => {
            let _ = input.send(SessionInput::Metrics(metrics)).await;
        }
        Err(err) => warn!(error = %err, "metrics fetch failed"),
    }
}

/// Fetch everything newer than the high-water mark and merge it into the
/// raw log. Recovered events were either applied live already or belong to
/// the disconnect window; either way they only backfill the log, so session
/// counters cannot double-increment.
async fn recover_gap(
    api: &ApiClient,
    input: &mpsc::Sender<SessionInput>,
    since: chrono::DateTime<chrono::Utc>,
) {
    match api.events_since(since).await {
        Ok(events) if !events.is_empty() => {
            info!(count = events.len(), since = %since, "recovering missed events");
            let _ = input.send(SessionInput::Backfill(events)).await;
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "gap recovery fetch failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::{RunPhase, WorkerKey, WorkerRole};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(secs: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, secs)
            .single()
            .expect("valid timestamp")
    }

    fn event(event_type: &str, data: serde_json::Value, secs: u32) -> EventRecord {
        EventRecord::new(event_type, data, at(secs))
    }

    #[test]
    fn live_event_is_logged_and_reduced() {
        let mut state = DashboardState::default();
        let mut log = EventLog::new(10);

        let changed = apply_input(
            &mut state,
            &mut log,
            SessionInput::Event(event(
                "worker_update",
                json!({"issue_number": 5, "status": "implementing"}),
                1,
            )),
        );

        assert!(changed);
        assert_eq!(log.len(), 1);
        assert!(state
            .workers
            .contains_key(&WorkerKey::new(WorkerRole::Implementer, 5)));
    }

    #[test]
    fn backfill_touches_only_the_raw_log() {
        let mut state = DashboardState::default();
        let mut log = EventLog::new(10);

        let changed = apply_input(
            &mut state,
            &mut log,
            SessionInput::Backfill(vec![event(
                "worker_update",
                json!({"issue_number": 5, "status": "done"}),
                1,
            )]),
        );

        assert!(changed);
        assert_eq!(log.len(), 1);
        // Never reduced: no worker, no counter.
        assert!(state.workers.is_empty());
        assert_eq!(state.counters.session_implemented, 0);
    }

    #[test]
    fn backfill_of_already_applied_event_is_discarded() {
        let mut state = DashboardState::default();
        let mut log = EventLog::new(10);
        let done = event(
            "worker_update",
            json!({"issue_number": 5, "status": "done"}),
            1,
        );

        apply_input(&mut state, &mut log, SessionInput::Event(done.clone()));
        let changed = apply_input(&mut state, &mut log, SessionInput::Backfill(vec![done]));

        assert!(!changed);
        assert_eq!(log.len(), 1);
        assert_eq!(state.counters.session_implemented, 1);
    }

    #[test]
    fn control_status_input_applies_status_and_pipeline() {
        let mut state = DashboardState::default();
        let mut log = EventLog::new(10);

        let status = ControlStatus {
            status: "running".to_string(),
            config: serde_json::Value::Null,
            pipeline: None,
        };
        apply_input(&mut state, &mut log, SessionInput::ControlStatus(status));

        assert_eq!(state.phase, RunPhase::Running);
        assert_eq!(state.orchestrator_status, "running");
    }

    #[test]
    fn answer_submitted_removes_only_that_key() {
        let mut state = DashboardState::default();
        let mut log = EventLog::new(10);

        let mut pending = BTreeMap::new();
        pending.insert(42, "Which schema?".to_string());
        pending.insert(43, "Proceed with deletion?".to_string());
        apply_input(&mut state, &mut log, SessionInput::PendingInput(pending));
        apply_input(&mut state, &mut log, SessionInput::AnswerSubmitted(42));

        assert!(!state.pending_input.contains_key(&42));
        assert!(state.pending_input.contains_key(&43));
    }

    #[test]
    fn background_toggle_input_sets_local_override() {
        let mut state = DashboardState::default();
        let mut log = EventLog::new(10);

        apply_input(
            &mut state,
            &mut log,
            SessionInput::BackgroundWorkers(vec![BackgroundWorker {
                name: "triage".to_string(),
                status: "idle".to_string(),
                last_run: None,
                interval_seconds: Some(60),
                enabled: true,
                details: serde_json::Value::Null,
                enabled_override: None,
            }]),
        );
        apply_input(
            &mut state,
            &mut log,
            SessionInput::ToggleBackground {
                name: "triage".to_string(),
                enabled: false,
            },
        );

        assert!(!state.background[0].enabled);
        assert_eq!(state.background[0].enabled_override, Some(false));
    }

    #[test]
    fn connected_flag_round_trips() {
        let mut state = DashboardState::default();
        let mut log = EventLog::new(10);

        apply_input(&mut state, &mut log, SessionInput::Connected(true));
        assert!(state.connected);
        apply_input(&mut state, &mut log, SessionInput::Connected(false));
        assert!(!state.connected);
    }
}
