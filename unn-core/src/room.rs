//! Room registry (§4.6, §8 invariant 2) — persistent room ownership plus
//! the live state that exists only while the operator's control stream
//! is open.
//!
//! `RoomRegistration` is persisted exactly like `Identity`: one line per
//! room, rewritten atomically on mutation. `LiveRoom` is pure in-memory
//! state owned by the task servicing that room's control stream (§3);
//! the registry holds a cloneable sender so other tasks (the rendezvous
//! broker) can ask that task to write to the stream without touching it
//! directly, matching §5's "LiveRoom control-stream encoders are used
//! only by the task servicing that room; cross-task use is forbidden."

use crate::error::RoomError;
use crate::fingerprint::PublicKeyFingerprint;
use crate::messages::{Candidate, OperatorMessage, RoomSummary};
use crate::persistence::{load_lines, write_atomic};
use crate::validate::validate_name;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::error;

/// `{room_name, owner_host_key_fingerprint, owner_unn_username, last_seen_date}` (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRegistration {
    pub room_name: String,
    pub owner_host_key_fingerprint: PublicKeyFingerprint,
    pub owner_unn_username: String,
    pub last_seen_date: NaiveDate,
}

/// A `RoomRegistration` plus the fields that only exist while the
/// operator's control stream is open (§3).
pub struct LiveRoom {
    pub registration: RoomRegistration,
    pub doors: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub ssh_port: u16,
    pub host_keys: Vec<String>,
    pub person_count: u32,
    /// Send-only handle to the task holding this room's control stream.
    /// The broker uses this to deliver `punch_offer` (§4.9) without ever
    /// writing to the stream itself.
    pub control_tx: UnboundedSender<OperatorMessage>,
}

impl LiveRoom {
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            name: self.registration.room_name.clone(),
            owner: self.registration.owner_unn_username.clone(),
            people_count: self.person_count,
            doors: self.doors.clone(),
            candidates: self.candidates.clone(),
            ssh_port: self.ssh_port,
            public_keys: self.host_keys.clone(),
        }
    }
}

/// Outcome of a successful `register` (§4.6), distinguishing a brand-new
/// room from a key rotation so the caller can log/reply accordingly.
#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Refreshed,
    KeyRotated,
}

struct Inner {
    registrations: HashMap<String, RoomRegistration>,
    live: HashMap<String, LiveRoomState>,
}

/// The parts of `LiveRoom` the registry itself tracks; the control
/// sender is stored alongside so `room_list()` can be built without
/// taking ownership of anyone's stream.
struct LiveRoomState {
    doors: Vec<String>,
    candidates: Vec<Candidate>,
    ssh_port: u16,
    host_keys: Vec<String>,
    person_count: u32,
    control_tx: UnboundedSender<OperatorMessage>,
}

#[derive(Clone)]
pub struct RoomRegistry {
    inner: std::sync::Arc<RwLock<Inner>>,
    path: PathBuf,
}

impl RoomRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_lines(&path, parse_room_line);
        let registrations = entries
            .into_iter()
            .map(|r| (r.room_name.clone(), r))
            .collect();
        Self {
            inner: std::sync::Arc::new(RwLock::new(Inner {
                registrations,
                live: HashMap::new(),
            })),
            path,
        }
    }

    /// §4.6 `register`. Returns the outcome and the up-to-date room list
    /// snapshot to broadcast; per §5's ordering guarantee, the caller
    /// must broadcast this snapshot to every attached Person *before*
    /// acking the room over the control stream.
    #[allow(clippy::too_many_arguments)]
    pub fn register_room(
        &self,
        room_name: &str,
        payload_host_fp: Option<&PublicKeyFingerprint>,
        authenticated_username: &str,
        doors: Vec<String>,
        candidates: Vec<Candidate>,
        ssh_port: u16,
        host_keys: Vec<String>,
        person_count: u32,
        control_tx: UnboundedSender<OperatorMessage>,
    ) -> Result<(RegisterOutcome, Vec<RoomSummary>), RoomError> {
        let mut inner = self.inner.write().unwrap();
        let today = chrono::Utc::now().date_naive();

        let outcome = if let Some(existing) = inner.registrations.get(room_name).cloned() {
            match payload_host_fp {
                Some(fp) if *fp == existing.owner_host_key_fingerprint => RegisterOutcome::Refreshed,
                Some(_) if authenticated_username == existing.owner_unn_username => {
                    RegisterOutcome::KeyRotated
                }
                None if authenticated_username == existing.owner_unn_username => {
                    RegisterOutcome::Refreshed
                }
                _ => {
                    return Err(RoomError::RoomNameTaken {
                        room_name: room_name.to_string(),
                    });
                }
            }
        } else {
            validate_name(room_name).map_err(RoomError::InvalidRoomName)?;
            RegisterOutcome::Created
        };

        let owner_host_key_fingerprint = match (&outcome, payload_host_fp) {
            (RegisterOutcome::KeyRotated, Some(fp)) => fp.clone(),
            (_, Some(fp)) => fp.clone(),
            (_, None) => inner
                .registrations
                .get(room_name)
                .map(|r| r.owner_host_key_fingerprint.clone())
                .unwrap_or_else(|| PublicKeyFingerprint::from_hex("")),
        };

        let registration = RoomRegistration {
            room_name: room_name.to_string(),
            owner_host_key_fingerprint,
            owner_unn_username: authenticated_username.to_string(),
            last_seen_date: today,
        };
        inner
            .registrations
            .insert(room_name.to_string(), registration.clone());
        inner.live.insert(
            room_name.to_string(),
            LiveRoomState {
                doors,
                candidates,
                ssh_port,
                host_keys,
                person_count,
                control_tx,
            },
        );

        self.persist_registrations_locked(&inner);
        let room_list = self.room_list_locked(&inner);
        Ok((outcome, room_list))
    }

    /// §4.6 `unregister` — tears down the `LiveRoom` but keeps the
    /// persistent `RoomRegistration` (ownership survives the room going
    /// offline).
    pub fn unregister_room(&self, room_name: &str) -> Vec<RoomSummary> {
        let mut inner = self.inner.write().unwrap();
        inner.live.remove(room_name);
        self.room_list_locked(&inner)
    }

    /// Get a clone of the control sender for a live room, for the
    /// rendezvous broker to deliver a `punch_offer` (§4.9).
    pub fn control_sender(&self, room_name: &str) -> Option<UnboundedSender<OperatorMessage>> {
        self.inner
            .read()
            .unwrap()
            .live
            .get(room_name)
            .map(|r| r.control_tx.clone())
    }

    pub fn is_live(&self, room_name: &str) -> bool {
        self.inner.read().unwrap().live.contains_key(room_name)
    }

    pub fn room_list(&self) -> Vec<RoomSummary> {
        let inner = self.inner.read().unwrap();
        self.room_list_locked(&inner)
    }

    fn room_list_locked(&self, inner: &Inner) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = inner
            .live
            .iter()
            .filter_map(|(name, live)| {
                let registration = inner.registrations.get(name)?;
                Some(RoomSummary {
                    name: registration.room_name.clone(),
                    owner: registration.owner_unn_username.clone(),
                    people_count: live.person_count,
                    doors: live.doors.clone(),
                    candidates: live.candidates.clone(),
                    ssh_port: live.ssh_port,
                    public_keys: live.host_keys.clone(),
                })
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    fn persist_registrations_locked(&self, inner: &Inner) {
        let mut contents = String::new();
        for reg in inner.registrations.values() {
            contents.push_str(&format!(
                "{} {} {} {}\n",
                reg.owner_host_key_fingerprint,
                reg.room_name,
                reg.owner_unn_username,
                reg.last_seen_date.format("%Y-%m-%d"),
            ));
        }
        if let Err(e) = write_atomic(&self.path, &contents) {
            error!(error = %e, "failed to persist room registry");
        }
    }
}

fn parse_room_line(line: &str) -> Option<RoomRegistration> {
    let mut parts = line.split_whitespace();
    let owner_host_key_fingerprint = PublicKeyFingerprint::from_hex(parts.next()?);
    let room_name = parts.next()?.to_string();
    let owner_unn_username = parts.next()?.to_string();
    let last_seen_date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
    Some(RoomRegistration {
        room_name,
        owner_host_key_fingerprint,
        owner_unn_username,
        last_seen_date,
    })
}
