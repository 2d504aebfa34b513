//! Pure reaction logic for the room-side control stream (§4.6, §4.9),
//! kept separate from the russh transport in `client.rs` so the
//! protocol behavior is testable without a socket.
//!
//! Actual NAT hole-punching is an external collaborator (§1 Non-goals);
//! what this crate offers in a `punch_answer` is whatever candidate set
//! and port the operator configured at startup, not a live-probed one.

use tracing::{info, warn};
use unn_core::messages::{OperatorMessage, PunchAnswerPayload, PunchOfferPayload, RoomSummary};

/// This room's own advertised reachability, fixed for the life of the
/// process (no live NAT probing — see module docs).
#[derive(Debug, Clone)]
pub struct RoomAdvertisement {
    pub candidates: Vec<String>,
    pub ssh_port: u16,
}

/// React to one message received on the `unn-control` stream. Returns
/// the reply to send back, if any.
pub fn react(advertisement: &RoomAdvertisement, msg: OperatorMessage) -> Option<OperatorMessage> {
    match msg {
        OperatorMessage::RoomList(rooms) => {
            log_roster(&rooms);
            None
        }
        OperatorMessage::Error(e) => {
            warn!(message = %e.message, "entry point reported an error");
            None
        }
        OperatorMessage::PunchOffer(offer) => Some(answer_punch_offer(advertisement, offer)),
        OperatorMessage::Unknown { tag, .. } => {
            warn!(tag, "entry point sent an unrecognized message type");
            None
        }
        other => {
            warn!(?other, "unexpected message on room control stream");
            None
        }
    }
}

fn answer_punch_offer(advertisement: &RoomAdvertisement, offer: PunchOfferPayload) -> OperatorMessage {
    info!(
        person_id = %offer.person_id,
        display_name = %offer.display_name,
        "answering punch offer"
    );
    OperatorMessage::PunchAnswer(PunchAnswerPayload {
        person_id: offer.person_id,
        candidates: advertisement.candidates.clone(),
        ssh_port: advertisement.ssh_port,
    })
}

fn log_roster(rooms: &[RoomSummary]) {
    info!(count = rooms.len(), "received room roster");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement() -> RoomAdvertisement {
        RoomAdvertisement {
            candidates: vec!["203.0.113.9:2222".to_string()],
            ssh_port: 2222,
        }
    }

    #[test]
    fn punch_offer_is_answered_with_own_advertisement() {
        let reply = react(
            &advertisement(),
            OperatorMessage::PunchOffer(PunchOfferPayload {
                person_id: "alice-1700".to_string(),
                candidates: vec![],
                person_key: "K".to_string(),
                display_name: "alice (github)".to_string(),
                username: "alice".to_string(),
            }),
        );
        match reply {
            Some(OperatorMessage::PunchAnswer(p)) => {
                assert_eq!(p.person_id, "alice-1700");
                assert_eq!(p.ssh_port, 2222);
                assert_eq!(p.candidates, vec!["203.0.113.9:2222".to_string()]);
            }
            _ => panic!("expected PunchAnswer"),
        }
    }

    #[test]
    fn room_list_and_error_produce_no_reply() {
        assert!(react(&advertisement(), OperatorMessage::RoomList(vec![])).is_none());
        assert!(react(
            &advertisement(),
            OperatorMessage::Error(unn_core::messages::ErrorPayload { message: "x".into() })
        )
        .is_none());
    }

    #[test]
    fn unknown_message_produces_no_reply() {
        assert!(react(
            &advertisement(),
            OperatorMessage::Unknown { tag: "frobnicate".into(), payload: serde_json::json!({}) }
        )
        .is_none());
    }
}
