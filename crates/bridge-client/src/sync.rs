//! Periodic snapshot synchronization for the slow-moving aggregates.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::api::ApiClient;
use crate::session::SessionInput;

/// Re-fetch open PRs, background workers, lifetime stats, and metrics on a
/// fixed cadence. Each fetch is independent and best-effort; the merges on
/// the reduction side make stale or repeated responses harmless.
pub(crate) async fn run_snapshot_sync(
    api: ApiClient,
    input: mpsc::Sender<SessionInput>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = input.closed() => break,
            _ = ticker.tick() => sync_once(&api, &input).await,
        }
    }
}

async fn sync_once(api: &ApiClient, input: &mpsc::Sender<SessionInput>) {
    match api.open_prs().await {
        Ok(prs) => {
            let _ = input.send(SessionInput::OpenPrs(prs)).await;
        }
        Err(err) => warn!(error = %err, "open pr sync failed"),
    }
    match api.background_workers().await {
        Ok(workers) => {
            let _ = input.send(SessionInput::BackgroundWorkers(workers)).await;
        }
        Err(err) => warn!(error = %err, "background worker sync failed"),
    }
    match api.lifetime_stats().await {
        Ok(stats) => {
            let _ = input.send(SessionInput::LifetimeStats(stats)).await;
        }
        Err(err) => warn!(error = %err, "lifetime stats sync failed"),
    }
    match api.metrics().await {
        Ok(metrics) => {
            let _ = input.send(SessionInput::Metrics(metrics)).await;
        }
        Err(err) => warn!(error = %err, "metrics sync failed"),
    }
}
