//! Rendezvous/handoff broker (§4.9): the glue between a Person's
//! `/join <room>` and a room operator's `punch_answer`.
//!
//! The broker owns `PunchSession` lifecycle. A session is created when a
//! Person starts JOINING, addressed by a minted `person_id`, and is torn
//! down either by a matching `punch_answer` arriving within 10 s or by
//! the timeout firing first — never both, since `oneshot::Sender::send`
//! only succeeds once and the loser of the race gets the error it
//! expects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use unn_core::messages::{Candidate, PersonId, PunchAnswerPayload};

pub const PUNCH_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// What a room's `punch_answer` resolves a waiting Person to.
#[derive(Debug, Clone)]
pub struct PunchResult {
    pub candidates: Vec<Candidate>,
    pub ssh_port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("timed out waiting for room operator")]
    Timeout,
}

#[derive(Default)]
pub struct Broker {
    pending: Arc<Mutex<HashMap<PersonId, oneshot::Sender<PunchResult>>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new PunchSession for `person_id` and wait up to
    /// `PUNCH_REPLY_TIMEOUT` for the corresponding `punch_answer`. The
    /// caller is expected to have already sent the `punch_offer` to the
    /// room's control stream before awaiting this.
    pub async fn await_punch_answer(&self, person_id: PersonId) -> Result<PunchResult, HandoffError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(person_id.clone(), tx);

        let result = timeout(PUNCH_REPLY_TIMEOUT, rx).await;
        // Whether we timed out or got an answer, the entry must not
        // linger — a late, stale punch_answer after timeout should be
        // logged as "no session found", not delivered to a Person who
        // already moved on.
        self.pending.lock().await.remove(&person_id);

        match result {
            Ok(Ok(punch_result)) => Ok(punch_result),
            Ok(Err(_)) | Err(_) => Err(HandoffError::Timeout),
        }
    }

    /// Resolve a pending PunchSession from a room's `punch_answer`.
    /// Returns `false` (and logs nothing itself — the caller logs) if no
    /// session matches, which happens when the Person already timed out
    /// or disconnected.
    pub async fn resolve_punch_answer(&self, payload: PunchAnswerPayload) -> bool {
        let sender = self.pending.lock().await.remove(&payload.person_id);
        match sender {
            Some(tx) => tx
                .send(PunchResult {
                    candidates: payload.candidates,
                    ssh_port: payload.ssh_port,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// Mint a `person_id` from a millisecond timestamp and the visitor's
/// username, per §4.8 point 1 ("timestamp + username"). Timestamps come
/// from the caller so the broker itself stays free of wall-clock reads,
/// keeping it trivial to unit test deterministically.
pub fn mint_person_id(now_millis: u128, unn_username: &str) -> PersonId {
    format!("{unn_username}-{now_millis}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_answer_resolves_the_wait() {
        let broker = Broker::new();
        let person_id = mint_person_id(1700, "alice");

        let waiter = {
            let broker = &broker;
            let person_id = person_id.clone();
            async move { broker.await_punch_answer(person_id).await }
        };
        let responder = async {
            // Give the waiter a moment to register before answering.
            tokio::task::yield_now().await;
            let resolved = broker
                .resolve_punch_answer(PunchAnswerPayload {
                    person_id: person_id.clone(),
                    candidates: vec!["1.2.3.4:5000".into()],
                    ssh_port: 2222,
                })
                .await;
            assert!(resolved);
        };

        let (result, _) = tokio::join!(waiter, responder);
        let result = result.unwrap();
        assert_eq!(result.ssh_port, 2222);
        assert_eq!(result.candidates, vec!["1.2.3.4:5000".to_string()]);
    }

    #[tokio::test]
    async fn answer_with_no_matching_session_is_not_resolved() {
        let broker = Broker::new();
        let resolved = broker
            .resolve_punch_answer(PunchAnswerPayload {
                person_id: "nobody-0".into(),
                candidates: vec![],
                ssh_port: 2222,
            })
            .await;
        assert!(!resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_session_times_out() {
        let broker = Broker::new();
        let person_id = mint_person_id(1, "bob");
        let err = broker.await_punch_answer(person_id).await.unwrap_err();
        assert!(matches!(err, HandoffError::Timeout));
    }

    #[test]
    fn person_id_embeds_username_and_timestamp() {
        assert_eq!(mint_person_id(1700, "alice"), "alice-1700");
    }
}
