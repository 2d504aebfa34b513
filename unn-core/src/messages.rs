//! Wire JSON message types (§4.1, §6).
//!
//! Every control/API/signaling message is `{"type": <tag>, "payload": <object>}`.
//! Per §9, each stream's message set is a closed tagged sum type with an
//! explicit `Unknown` variant carrying the raw tag and payload bytes, so a
//! router can *reject* an unrecognized tag rather than silently drop it
//! (§6: "Unknown tags MUST be rejected with an `error` reply... receivers
//! MUST NOT silently discard them on request streams").
//!
//! We hand-roll the tag dispatch instead of deriving
//! `#[serde(tag = "type", content = "payload")]` directly on the enum,
//! because serde's derive has no way to fall through to an `Unknown`
//! variant on an unrecognized tag — it just errors. Parsing in two steps
//! (peek the tag, then decode the matching payload shape) gets us both
//! the closed-set ergonomics and the open-world safety net.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A minted identifier for a `Person` mid-handoff (§3, §4.8): `person_id`.
pub type PersonId = String;

/// A transport address `"ip:port"` (or legacy `"name:ip:port"`), per the
/// GLOSSARY's definition of Candidate.
pub type Candidate = String;

fn decode_payload<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(payload)
}

fn envelope(r#type: &str, payload: Value) -> Value {
    serde_json::json!({ "type": r#type, "payload": payload })
}

// ── Operator <-> entry point (§4.6) ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub room_name: String,
    #[serde(default)]
    pub doors: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub ssh_port: u16,
    pub public_keys: Vec<String>,
    pub people_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub name: String,
    pub owner: String,
    pub people_count: u32,
    #[serde(default)]
    pub doors: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub ssh_port: u16,
    pub public_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchOfferPayload {
    pub person_id: PersonId,
    pub candidates: Vec<Candidate>,
    pub person_key: String,
    pub display_name: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchAnswerPayload {
    pub person_id: PersonId,
    pub candidates: Vec<Candidate>,
    pub ssh_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchStartPayload {
    pub room_name: String,
    pub candidates: Vec<Candidate>,
    pub ssh_port: u16,
    pub public_keys: Vec<String>,
}

/// The closed set of messages on the `unn-control` stream (§4.6, §6).
#[derive(Debug, Clone)]
pub enum OperatorMessage {
    Register(RegisterPayload),
    Unregister,
    RoomList(Vec<RoomSummary>),
    Error(ErrorPayload),
    PunchOffer(PunchOfferPayload),
    PunchAnswer(PunchAnswerPayload),
    PunchStart(PunchStartPayload),
    /// An unrecognized `type` tag. Carries the raw tag and payload so the
    /// receiver can reply with an `error` instead of discarding silently.
    Unknown { tag: String, payload: Value },
}

impl OperatorMessage {
    pub fn to_json(&self) -> Value {
        match self {
            OperatorMessage::Register(p) => envelope("register", serde_json::to_value(p).unwrap()),
            OperatorMessage::Unregister => envelope("unregister", Value::Null),
            OperatorMessage::RoomList(rooms) => {
                envelope("room_list", serde_json::to_value(rooms).unwrap())
            }
            OperatorMessage::Error(p) => envelope("error", serde_json::to_value(p).unwrap()),
            OperatorMessage::PunchOffer(p) => {
                envelope("punch_offer", serde_json::to_value(p).unwrap())
            }
            OperatorMessage::PunchAnswer(p) => {
                envelope("punch_answer", serde_json::to_value(p).unwrap())
            }
            OperatorMessage::PunchStart(p) => {
                envelope("punch_start", serde_json::to_value(p).unwrap())
            }
            OperatorMessage::Unknown { tag, payload } => envelope(tag, payload.clone()),
        }
    }

    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        Ok(match tag.as_str() {
            "register" => OperatorMessage::Register(decode_payload(payload)?),
            "unregister" => OperatorMessage::Unregister,
            "room_list" => OperatorMessage::RoomList(decode_payload(payload)?),
            "error" => OperatorMessage::Error(decode_payload(payload)?),
            "punch_offer" => OperatorMessage::PunchOffer(decode_payload(payload)?),
            "punch_answer" => OperatorMessage::PunchAnswer(decode_payload(payload)?),
            "punch_start" => OperatorMessage::PunchStart(decode_payload(payload)?),
            _ => OperatorMessage::Unknown { tag, payload },
        })
    }
}

// ── Client API (§4.5) ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserStatusRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegisterRequest {
    pub unn_username: String,
    pub platform_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegisterResponse {
    pub status: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparePunchRequest {
    pub room_name: String,
    pub client_peer_id: String,
    pub client_candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparePunchResponse {
    pub status: String,
}

#[derive(Debug, Clone)]
pub enum ApiRequest {
    RoomList,
    UserStatus(UserStatusRequest),
    UserRegister(UserRegisterRequest),
    PreparePunch(PreparePunchRequest),
    Unknown { tag: String, payload: Value },
}

impl ApiRequest {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        Ok(match tag.as_str() {
            "room_list" => ApiRequest::RoomList,
            "user_status" => {
                if payload.is_null() {
                    ApiRequest::UserStatus(UserStatusRequest::default())
                } else {
                    ApiRequest::UserStatus(decode_payload(payload)?)
                }
            }
            "user_register" => ApiRequest::UserRegister(decode_payload(payload)?),
            "prepare_punch" => ApiRequest::PreparePunch(decode_payload(payload)?),
            _ => ApiRequest::Unknown { tag, payload },
        })
    }
}

#[derive(Debug, Clone)]
pub enum ApiResponse {
    RoomList(Vec<RoomSummary>),
    UserStatus(crate::identity::UserStatus),
    UserRegister(UserRegisterResponse),
    PreparePunch(PreparePunchResponse),
    Error(ErrorPayload),
}

impl ApiResponse {
    pub fn to_json(&self) -> Value {
        match self {
            ApiResponse::RoomList(rooms) => {
                envelope("room_list", serde_json::to_value(rooms).unwrap())
            }
            ApiResponse::UserStatus(s) => {
                envelope("user_status", serde_json::to_value(s).unwrap())
            }
            ApiResponse::UserRegister(r) => {
                envelope("user_register", serde_json::to_value(r).unwrap())
            }
            ApiResponse::PreparePunch(r) => {
                envelope("prepare_punch", serde_json::to_value(r).unwrap())
            }
            ApiResponse::Error(e) => envelope("error", serde_json::to_value(e).unwrap()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ApiResponse::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

// ── Signaling (§4.7) ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingRegisterPayload {
    pub peer_id: String,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPeerPayload {
    pub peer_id: String,
}

#[derive(Debug, Clone)]
pub enum SignalingMessage {
    Register(SignalingRegisterPayload),
    GetPeer(GetPeerPayload),
    Unknown { tag: String, payload: Value },
}

impl SignalingMessage {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        Ok(match tag.as_str() {
            "register" => SignalingMessage::Register(decode_payload(payload)?),
            "get_peer" => SignalingMessage::GetPeer(decode_payload(payload)?),
            _ => SignalingMessage::Unknown { tag, payload },
        })
    }
}

#[derive(Debug, Clone)]
pub enum SignalingResponse {
    Candidates(Vec<Candidate>),
    Error(ErrorPayload),
}

impl SignalingResponse {
    pub fn to_json(&self) -> Value {
        match self {
            SignalingResponse::Candidates(c) => {
                envelope("response", serde_json::to_value(c).unwrap())
            }
            SignalingResponse::Error(e) => envelope("error", serde_json::to_value(e).unwrap()),
        }
    }
}

// ── In-band terminal control (§4.1, §4.8, §6) ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeleportPayload {
    pub room_name: String,
    pub candidates: Vec<Candidate>,
    pub ssh_port: u16,
    pub public_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupPayload {
    #[serde(rename = "type")]
    pub severity: String,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBlockPayload {
    pub transfer_id: String,
    pub offset: u64,
    pub data_base64: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub filename: String,
    pub data_base64: String,
}

/// Messages carried inside an OSC envelope (§4.1, §6). `teleport`/`popup`/
/// `transfer_block` use tag 31337; `download` uses the legacy tag 9.
#[derive(Debug, Clone)]
pub enum InBandMessage {
    Teleport(TeleportPayload),
    Popup(PopupPayload),
    TransferBlock(TransferBlockPayload),
    Download(DownloadPayload),
    Unknown { action: String, payload: Value },
}

impl InBandMessage {
    pub fn to_json(&self) -> Value {
        match self {
            InBandMessage::Teleport(p) => envelope_action("teleport", p),
            InBandMessage::Popup(p) => envelope_action("popup", p),
            InBandMessage::TransferBlock(p) => envelope_action("transfer_block", p),
            InBandMessage::Download(p) => envelope_action("download", p),
            InBandMessage::Unknown { action, payload } => {
                let mut obj = payload.clone();
                if let Some(map) = obj.as_object_mut() {
                    map.insert("action".to_string(), Value::String(action.clone()));
                }
                obj
            }
        }
    }

    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(match action.as_str() {
            "teleport" => InBandMessage::Teleport(decode_payload(value)?),
            "popup" => InBandMessage::Popup(decode_payload(value)?),
            "transfer_block" => InBandMessage::TransferBlock(decode_payload(value)?),
            "download" => InBandMessage::Download(decode_payload(value)?),
            _ => InBandMessage::Unknown {
                action,
                payload: value,
            },
        })
    }

    /// The OSC tag this message should be emitted under, per the
    /// "download uses tag 9, everything else uses tag 31337" rule (§4.1,
    /// §9 Open Questions — "implementations SHOULD ... emit 31337 for new
    /// actions").
    pub fn osc_tag(&self) -> u16 {
        match self {
            InBandMessage::Download(_) => 9,
            _ => 31337,
        }
    }
}

fn envelope_action<T: Serialize>(action: &str, payload: &T) -> Value {
    let mut value = serde_json::to_value(payload).unwrap();
    if let Some(map) = value.as_object_mut() {
        map.insert("action".to_string(), Value::String(action.to_string()));
    }
    value
}
