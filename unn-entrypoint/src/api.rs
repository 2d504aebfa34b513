//! Client API stream (`unn-api`, §4.5) — a JSON request/response stream
//! independent of any interactive session, used by tooling and by the
//! `unn://` client-side URL scheme to query the registry without
//! attaching a full Person.

use crate::broker::{mint_person_id, Broker};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use unn_core::fingerprint::PublicKeyFingerprint;
use unn_core::identity::{IdentityRegistry, PlatformInfo};
use unn_core::messages::{
    ApiRequest, ApiResponse, PreparePunchRequest, PunchOfferPayload, UserRegisterRequest,
    UserRegisterResponse, UserStatusRequest,
};
use unn_core::room::RoomRegistry;

pub struct ApiSession {
    identities: IdentityRegistry,
    rooms: RoomRegistry,
    broker: Arc<Broker>,
    fingerprint: PublicKeyFingerprint,
}

impl ApiSession {
    pub fn new(
        identities: IdentityRegistry,
        rooms: RoomRegistry,
        broker: Arc<Broker>,
        fingerprint: PublicKeyFingerprint,
    ) -> Self {
        Self { identities, rooms, broker, fingerprint }
    }

    pub async fn handle(&self, req: ApiRequest) -> ApiResponse {
        match req {
            ApiRequest::RoomList => ApiResponse::RoomList(self.rooms.room_list()),
            ApiRequest::UserStatus(req) => self.handle_user_status(req),
            ApiRequest::UserRegister(req) => self.handle_user_register(req),
            ApiRequest::PreparePunch(req) => self.handle_prepare_punch(req).await,
            ApiRequest::Unknown { tag, .. } => {
                ApiResponse::error(format!("unrecognized request type '{tag}'"))
            }
        }
    }

    fn handle_user_status(&self, req: UserStatusRequest) -> ApiResponse {
        let status = self
            .identities
            .get_status(&self.fingerprint, req.username.as_deref());
        ApiResponse::UserStatus(status)
    }

    fn handle_user_register(&self, req: UserRegisterRequest) -> ApiResponse {
        let Some(platform_info) = PlatformInfo::parse(&req.platform_info) else {
            return ApiResponse::error("invalid platform_info");
        };
        match self
            .identities
            .register(&self.fingerprint, &req.unn_username, platform_info)
        {
            Ok(()) => ApiResponse::UserRegister(UserRegisterResponse {
                status: "registered".to_string(),
                username: req.unn_username,
            }),
            Err(e) => ApiResponse::error(e.to_string()),
        }
    }

    async fn handle_prepare_punch(&self, req: PreparePunchRequest) -> ApiResponse {
        let Some(control_tx) = self.rooms.control_sender(&req.room_name) else {
            return ApiResponse::error(format!("room '{}' is not currently live", req.room_name));
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let person_id = mint_person_id(now, &req.client_peer_id);

        let offer = unn_core::messages::OperatorMessage::PunchOffer(PunchOfferPayload {
            person_id: person_id.clone(),
            candidates: req.client_candidates,
            person_key: self.fingerprint.to_string(),
            display_name: req.client_peer_id.clone(),
            username: req.client_peer_id,
        });
        if control_tx.send(offer).is_err() {
            return ApiResponse::error(format!("room '{}' is not currently live", req.room_name));
        }

        match self.broker.await_punch_answer(person_id).await {
            Ok(_) => ApiResponse::PreparePunch(unn_core::messages::PreparePunchResponse {
                status: "punch_coordinated".to_string(),
            }),
            Err(_) => ApiResponse::error("timed out waiting for room operator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fp(s: &str) -> PublicKeyFingerprint {
        PublicKeyFingerprint::from_hex(s)
    }

    fn tmp() -> PathBuf {
        std::env::temp_dir().join(format!("unn-api-test-{}", rand::random::<u64>()))
    }

    #[tokio::test]
    async fn user_status_reports_unverified_for_unknown_fingerprint() {
        let session = ApiSession::new(
            IdentityRegistry::load(tmp()),
            RoomRegistry::load(tmp()),
            Arc::new(Broker::new()),
            fp("f1"),
        );
        let resp = session
            .handle(ApiRequest::UserStatus(UserStatusRequest { username: None }))
            .await;
        match resp {
            ApiResponse::UserStatus(s) => assert!(!s.verified),
            _ => panic!("expected UserStatus"),
        }
    }

    #[tokio::test]
    async fn user_register_then_status_reflects_registration() {
        let identities = IdentityRegistry::load(tmp());
        let session = ApiSession::new(
            identities.clone(),
            RoomRegistry::load(tmp()),
            Arc::new(Broker::new()),
            fp("f1"),
        );
        let resp = session
            .handle(ApiRequest::UserRegister(UserRegisterRequest {
                unn_username: "alice".to_string(),
                platform_info: "alice@github".to_string(),
            }))
            .await;
        assert!(matches!(resp, ApiResponse::UserRegister(_)));
        let status = identities.get_status(&fp("f1"), None);
        assert_eq!(status.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn prepare_punch_against_offline_room_errors() {
        let session = ApiSession::new(
            IdentityRegistry::load(tmp()),
            RoomRegistry::load(tmp()),
            Arc::new(Broker::new()),
            fp("f1"),
        );
        let resp = session
            .handle(ApiRequest::PreparePunch(PreparePunchRequest {
                room_name: "ghost-room".to_string(),
                client_peer_id: "peer1".to_string(),
                client_candidates: vec![],
            }))
            .await;
        assert!(matches!(resp, ApiResponse::Error(_)));
    }
}
