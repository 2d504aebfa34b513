//! Room-side control stream logic (§4.6).
//!
//! This module is the pure decision layer: given an incoming
//! `OperatorMessage` and the authenticated identity of the connection it
//! arrived on, decide what changes to the room registry to make and what
//! to write back. The actual SSH channel I/O lives in `ssh.rs`, which
//! drives this handler and owns the wire bytes; keeping the two separate
//! means the registration rules can be unit tested without a socket.

use crate::broker::Broker;
use crate::person::PersonRegistry;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use unn_core::fingerprint::PublicKeyFingerprint;
use unn_core::messages::{ErrorPayload, OperatorMessage, RegisterPayload};
use unn_core::room::RoomRegistry;

/// What the control-stream task should do after handling one incoming
/// message: write a reply back on this same stream, and/or fan a roster
/// broadcast out to attached Persons. Per §5's ordering guarantee, the
/// broadcast MUST be issued before the reply when both are present.
pub struct ControlOutcome {
    pub broadcast: Option<Vec<unn_core::messages::RoomSummary>>,
    pub reply: Option<OperatorMessage>,
}

impl ControlOutcome {
    fn reply_only(reply: OperatorMessage) -> Self {
        Self { broadcast: None, reply: Some(reply) }
    }

    fn broadcast_and_reply(
        broadcast: Vec<unn_core::messages::RoomSummary>,
        reply: OperatorMessage,
    ) -> Self {
        Self { broadcast: Some(broadcast), reply: Some(reply) }
    }
}

/// Per-connection state for one room operator's control stream. Created
/// once the SSH channel requests the `unn-control` subsystem.
///
/// `authenticated_username` is `None` when the connection's fingerprint
/// has no verified identity (§4.2) — room registration requires pre-auth
/// (§7, scenario S3), so every `register` on such a session is rejected.
pub struct RoomControlSession {
    rooms: RoomRegistry,
    persons: PersonRegistry,
    broker: Arc<Broker>,
    authenticated_username: Option<String>,
    room_name: Option<String>,
    control_tx: UnboundedSender<OperatorMessage>,
}

impl RoomControlSession {
    pub fn new(
        rooms: RoomRegistry,
        persons: PersonRegistry,
        broker: Arc<Broker>,
        authenticated_username: Option<String>,
        control_tx: UnboundedSender<OperatorMessage>,
    ) -> Self {
        Self {
            rooms,
            persons,
            broker,
            authenticated_username,
            room_name: None,
            control_tx,
        }
    }

    /// Handle one decoded message from the operator's stream (§4.6).
    pub async fn handle(&mut self, msg: OperatorMessage) -> ControlOutcome {
        match msg {
            OperatorMessage::Register(payload) => self.handle_register(payload).await,
            OperatorMessage::Unregister => self.handle_unregister().await,
            OperatorMessage::PunchAnswer(payload) => {
                let resolved = self.broker.resolve_punch_answer(payload.clone()).await;
                if !resolved {
                    warn!(person_id = %payload.person_id, "punch_answer with no matching session");
                }
                ControlOutcome { broadcast: None, reply: None }
            }
            OperatorMessage::Unknown { tag, .. } => ControlOutcome::reply_only(OperatorMessage::Error(
                ErrorPayload { message: format!("unrecognized message type '{tag}'") },
            )),
            // PunchOffer/PunchStart/RoomList/Error only ever flow EP -> room.
            other => ControlOutcome::reply_only(OperatorMessage::Error(ErrorPayload {
                message: format!("message type not accepted on this stream: {other:?}").lines().next().unwrap().to_string(),
            })),
        }
    }

    async fn handle_register(&mut self, payload: RegisterPayload) -> ControlOutcome {
        let Some(authenticated_username) = self.authenticated_username.clone() else {
            warn!(room = %payload.room_name, "register rejected: connection has no verified identity");
            return ControlOutcome::reply_only(OperatorMessage::Error(ErrorPayload {
                message: "room registration requires a verified identity".to_string(),
            }));
        };

        let payload_host_fp = payload
            .public_keys
            .first()
            .and_then(|k| unn_core::decode_wire_key(k))
            .map(|bytes| PublicKeyFingerprint::from_wire_bytes(&bytes));

        let result = self.rooms.register_room(
            &payload.room_name,
            payload_host_fp.as_ref(),
            &authenticated_username,
            payload.doors,
            payload.candidates,
            payload.ssh_port,
            payload.public_keys,
            payload.people_count,
            self.control_tx.clone(),
        );

        match result {
            Ok((outcome, room_list)) => {
                info!(room = %payload.room_name, ?outcome, "room registered");
                self.room_name = Some(payload.room_name);
                ControlOutcome::broadcast_and_reply(
                    room_list.clone(),
                    OperatorMessage::RoomList(room_list),
                )
            }
            Err(e) => ControlOutcome::reply_only(OperatorMessage::Error(ErrorPayload {
                message: e.to_string(),
            })),
        }
    }

    async fn handle_unregister(&mut self) -> ControlOutcome {
        let Some(room_name) = self.room_name.take() else {
            return ControlOutcome { broadcast: None, reply: None };
        };
        let room_list = self.rooms.unregister_room(&room_name);
        ControlOutcome { broadcast: Some(room_list), reply: None }
    }

    /// Called when the control stream closes, whichever side initiated
    /// it (§4.6: "Stream termination — by either side — deletes the
    /// LiveRoom and broadcasts the updated roster").
    pub async fn on_stream_closed(&mut self) -> Option<Vec<unn_core::messages::RoomSummary>> {
        let room_name = self.room_name.take()?;
        Some(self.rooms.unregister_room(&room_name))
    }

    /// Apply a `ControlOutcome`'s broadcast half, delivering the roster
    /// to every attached Person before the caller writes `reply` to the
    /// operator's wire (§5, §8 invariant 3).
    pub async fn deliver_broadcast(&self, rooms: Vec<unn_core::messages::RoomSummary>) {
        self.persons.broadcast_room_list(rooms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use unn_core::messages::Candidate;

    fn rooms_path() -> PathBuf {
        std::env::temp_dir().join(format!("unn-control-test-{}", rand::random::<u64>()))
    }

    fn sender() -> UnboundedSender<OperatorMessage> {
        tokio::sync::mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn register_new_room_broadcasts_and_replies_room_list() {
        let mut session = RoomControlSession::new(
            RoomRegistry::load(rooms_path()),
            PersonRegistry::new(),
            Arc::new(Broker::new()),
            Some("alice".to_string()),
            sender(),
        );
        let outcome = session
            .handle(OperatorMessage::Register(RegisterPayload {
                room_name: "r1".to_string(),
                doors: vec![],
                candidates: vec!["1.2.3.4:5000".to_string() as Candidate],
                ssh_port: 2222,
                public_keys: vec!["K".to_string()],
                people_count: 0,
            }))
            .await;
        assert!(outcome.broadcast.is_some());
        assert!(matches!(outcome.reply, Some(OperatorMessage::RoomList(_))));
        assert_eq!(session.room_name.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn register_conflicting_owner_replies_error_without_broadcast() {
        let rooms = RoomRegistry::load(rooms_path());
        let mut alice = RoomControlSession::new(
            rooms.clone(),
            PersonRegistry::new(),
            Arc::new(Broker::new()),
            Some("alice".to_string()),
            sender(),
        );
        alice
            .handle(OperatorMessage::Register(RegisterPayload {
                room_name: "r1".to_string(),
                doors: vec![],
                candidates: vec![],
                ssh_port: 2222,
                public_keys: vec!["K-alice".to_string()],
                people_count: 0,
            }))
            .await;

        let mut bob = RoomControlSession::new(
            rooms,
            PersonRegistry::new(),
            Arc::new(Broker::new()),
            Some("bob".to_string()),
            sender(),
        );
        let outcome = bob
            .handle(OperatorMessage::Register(RegisterPayload {
                room_name: "r1".to_string(),
                doors: vec![],
                candidates: vec![],
                ssh_port: 2223,
                public_keys: vec!["K-bob".to_string()],
                people_count: 0,
            }))
            .await;
        assert!(outcome.broadcast.is_none());
        match outcome.reply {
            Some(OperatorMessage::Error(e)) => assert!(e.message.contains("already taken")),
            _ => panic!("expected error reply"),
        }
    }

    #[tokio::test]
    async fn unregister_tears_down_live_room() {
        let mut session = RoomControlSession::new(
            RoomRegistry::load(rooms_path()),
            PersonRegistry::new(),
            Arc::new(Broker::new()),
            Some("alice".to_string()),
            sender(),
        );
        session
            .handle(OperatorMessage::Register(RegisterPayload {
                room_name: "r1".to_string(),
                doors: vec![],
                candidates: vec![],
                ssh_port: 2222,
                public_keys: vec![],
                people_count: 0,
            }))
            .await;
        let outcome = session.handle(OperatorMessage::Unregister).await;
        assert_eq!(outcome.broadcast, Some(vec![]));
        assert!(session.room_name.is_none());
    }

    #[tokio::test]
    async fn register_without_verified_identity_is_rejected() {
        let rooms = RoomRegistry::load(rooms_path());
        let mut session = RoomControlSession::new(
            rooms.clone(),
            PersonRegistry::new(),
            Arc::new(Broker::new()),
            None,
            sender(),
        );
        let outcome = session
            .handle(OperatorMessage::Register(RegisterPayload {
                room_name: "r1".to_string(),
                doors: vec![],
                candidates: vec![],
                ssh_port: 2222,
                public_keys: vec!["K".to_string()],
                people_count: 0,
            }))
            .await;
        assert!(outcome.broadcast.is_none());
        match outcome.reply {
            Some(OperatorMessage::Error(e)) => assert!(e.message.contains("verified identity")),
            _ => panic!("expected error reply"),
        }
        assert!(session.room_name.is_none());
        assert!(!rooms.is_live("r1"));
    }

    #[tokio::test]
    async fn unknown_message_type_yields_error_reply() {
        let mut session = RoomControlSession::new(
            RoomRegistry::load(rooms_path()),
            PersonRegistry::new(),
            Arc::new(Broker::new()),
            Some("alice".to_string()),
            sender(),
        );
        let outcome = session
            .handle(OperatorMessage::Unknown {
                tag: "frobnicate".to_string(),
                payload: serde_json::json!({}),
            })
            .await;
        match outcome.reply {
            Some(OperatorMessage::Error(e)) => assert!(e.message.contains("frobnicate")),
            _ => panic!("expected error reply"),
        }
    }
}
