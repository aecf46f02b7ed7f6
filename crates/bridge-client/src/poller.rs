//! Low-frequency pull channel for pending human-input requests.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::session::SessionInput;

/// Poll `GET /human-input` on a fixed cadence. The pending map is replaced
/// wholesale on every successful fetch.
pub(crate) async fn run_human_input_poll(
    api: ApiClient,
    input: mpsc::Sender<SessionInput>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = input.closed() => break,
            _ = ticker.tick() => {
                match api.human_input().await {
                    Ok(pending) => {
                        let _ = input.send(SessionInput::PendingInput(pending)).await;
                    }
                    Err(err) => debug!(error = %err, "human input poll failed"),
                }
            }
        }
    }
}

/// Submit one answer. The pending key is removed optimistically before the
/// server confirms. A failed POST is logged and otherwise dropped; the
/// next poll restores the question if the server still wants it.
pub(crate) async fn submit_answer(
    api: &ApiClient,
    input: &mpsc::Sender<SessionInput>,
    issue_number: u64,
    answer: String,
) {
    let _ = input.send(SessionInput::AnswerSubmitted(issue_number)).await;
    if let Err(err) = api.submit_human_input(issue_number, &answer).await {
        warn!(issue_number, error = %err, "human input submission failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_answer_removes_key_optimistically_even_when_post_fails() {
        let (tx, mut rx) = mpsc::channel(8);
        // Nothing listens on port 9: the POST fails and is swallowed.
        let api = ApiClient::new("http://127.0.0.1:9");

        submit_answer(&api, &tx, 42, "use the staging cluster".to_string()).await;

        match rx.recv().await {
            Some(SessionInput::AnswerSubmitted(issue)) => assert_eq!(issue, 42),
            other => panic!("unexpected input: {other:?}"),
        }
    }
}
