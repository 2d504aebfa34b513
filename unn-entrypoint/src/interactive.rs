//! Interactive Person session driver (§4.8).
//!
//! Terminal rendering is explicitly out of scope (§1: "terminal
//! rendering engines" are an external collaborator) — what this module
//! owns is the *protocol* behavior: which prompts are shown, which
//! commands are recognized, when the identity verifier and registries
//! are called, and when a `teleport` envelope is emitted. `ssh.rs`
//! supplies the byte-level PTY plumbing; this module only ever sees
//! assembled lines of input and produces `OutEvent`s to render.

use crate::broker::{mint_person_id, Broker, HandoffError};
use crate::person::{PersonHandle, ToPerson};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};
use unn_core::envelope::encode_osc_frame;
use unn_core::fingerprint::PublicKeyFingerprint;
use unn_core::identity::{IdentityRegistry, PlatformInfo, PlatformTag};
use unn_core::messages::{InBandMessage, OperatorMessage, PopupPayload, PunchOfferPayload, RoomSummary, TeleportPayload};
use unn_core::room::RoomRegistry;
use unn_core::verifier::PlatformVerifier;

const MAX_VERIFY_ATTEMPTS: u32 = 5;

/// Something to render on the Person's PTY. Kept deliberately dumb —
/// a line of text, or raw bytes (an OSC envelope) to splice into the
/// stream verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum OutEvent {
    Line(String),
    Raw(Vec<u8>),
    Disconnect,
}

fn emit_osc(out: &UnboundedSender<OutEvent>, msg: &InBandMessage) {
    let _ = out.send(OutEvent::Raw(encode_osc_frame(
        msg.osc_tag(),
        &msg.to_json(),
    )));
}

fn emit_line(out: &UnboundedSender<OutEvent>, line: impl Into<String>) {
    let _ = out.send(OutEvent::Line(line.into()));
}

pub struct InteractiveSession {
    pub fingerprint: PublicKeyFingerprint,
    /// The wire-format bytes of the public key the visitor authenticated
    /// with, captured during the SSH handshake (§4.4) — this, not the
    /// fingerprint, is what the verifier compares against a platform's
    /// published keys (§4.3).
    pub public_key_wire_bytes: Vec<u8>,
    pub identities: IdentityRegistry,
    pub rooms: RoomRegistry,
    pub broker: Arc<Broker>,
    pub out: UnboundedSender<OutEvent>,
}

impl InteractiveSession {
    /// Drive one Person from attach to close. `lines` yields assembled
    /// lines of keyboard input; `from_system` carries pushes from the
    /// rest of the process (roster broadcasts, a duplicate-session
    /// popup, a `punch_start`). Returns once the session reaches CLOSED.
    pub async fn run(
        &self,
        mut lines: UnboundedReceiver<String>,
        mut from_system: UnboundedReceiver<ToPerson>,
    ) {
        let status = self.identities.get_status(&self.fingerprint, None);
        if !status.verified {
            if !self.run_onboarding(&mut lines, &mut from_system).await {
                emit_line(&self.out, "Goodbye.");
                let _ = self.out.send(OutEvent::Disconnect);
                return;
            }
        }

        self.run_browsing(&mut lines, &mut from_system).await;
        let _ = self.out.send(OutEvent::Disconnect);
    }

    /// ONBOARDING (§4.8): collect platform/username, verify, register.
    /// Returns `true` once registration succeeds, `false` if the visitor
    /// exhausts their attempts or disconnects.
    async fn run_onboarding(
        &self,
        lines: &mut UnboundedReceiver<String>,
        from_system: &mut UnboundedReceiver<ToPerson>,
    ) -> bool {
        emit_line(&self.out, "Welcome to the Underground Node Network.");
        for attempt in 1..=MAX_VERIFY_ATTEMPTS {
            emit_line(&self.out, "Platform (github/gitlab/sourcehut/codeberg):");
            let Some(platform_line) = self.next_line(lines, from_system).await else {
                return false;
            };
            let Some(platform_tag) = PlatformTag::parse(platform_line.trim()) else {
                emit_line(&self.out, "Unrecognized platform.");
                continue;
            };

            emit_line(&self.out, "Platform username:");
            let Some(platform_username) = self.next_line(lines, from_system).await else {
                return false;
            };
            let platform_username = platform_username.trim().to_string();

            emit_line(&self.out, "Desired unn username:");
            let Some(desired_username) = self.next_line(lines, from_system).await else {
                return false;
            };
            let desired_username = desired_username.trim().to_string();

            let verifier = PlatformVerifier::for_platform(platform_tag, std::time::Duration::from_secs(30));
            match verifier.verify(&platform_username, &self.public_key_wire_bytes).await {
                Ok(result) if result.matched => {
                    let platform_info = PlatformInfo {
                        platform_username,
                        platform_tag,
                    };
                    match self.identities.register(&self.fingerprint, &desired_username, platform_info) {
                        Ok(()) => {
                            emit_line(&self.out, format!("Registered as {desired_username}."));
                            return true;
                        }
                        Err(e) => emit_line(&self.out, format!("Registration failed: {e}")),
                    }
                }
                Ok(_) => emit_line(&self.out, "Your key was not found among that account's keys."),
                Err(e) => emit_line(&self.out, format!("Could not reach platform: {e}")),
            }
            if attempt == MAX_VERIFY_ATTEMPTS {
                emit_line(&self.out, "Too many failed attempts.");
            }
        }
        false
    }

    /// BROWSING (§4.8): show rooms, accept `/join <room>` and exit.
    async fn run_browsing(
        &self,
        lines: &mut UnboundedReceiver<String>,
        from_system: &mut UnboundedReceiver<ToPerson>,
    ) {
        loop {
            tokio::select! {
                maybe_line = lines.recv() => {
                    let Some(line) = maybe_line else { return };
                    let line = line.trim();
                    if line == "exit" {
                        return;
                    }
                    if let Some(room_name) = line.strip_prefix("/join ") {
                        if !self.run_joining(room_name.trim(), lines, from_system).await {
                            continue;
                        }
                        return;
                    } else {
                        emit_line(&self.out, "Commands: /join <room>, exit");
                    }
                }
                maybe_msg = from_system.recv() => {
                    match maybe_msg {
                        Some(ToPerson::RoomList(rooms)) => self.render_room_list(&rooms),
                        Some(ToPerson::Popup { title, message, .. }) => {
                            emit_line(&self.out, format!("[{title}] {message}"));
                        }
                        Some(ToPerson::Close) | None => return,
                        Some(ToPerson::PunchStart { .. }) => {
                            // Stray punch_start while not JOINING; ignore.
                        }
                    }
                }
            }
        }
    }

    fn render_room_list(&self, rooms: &[RoomSummary]) {
        if rooms.is_empty() {
            emit_line(&self.out, "No rooms are currently live.");
            return;
        }
        for room in rooms {
            emit_line(
                &self.out,
                format!("{} — {} people, owner {}", room.name, room.people_count, room.owner),
            );
        }
    }

    /// JOINING (§4.8 points 1-5). Returns `true` if the session should
    /// end here (HANDING_OFF -> CLOSED), `false` to fall back to
    /// BROWSING (timeout or room offline).
    async fn run_joining(
        &self,
        room_name: &str,
        _lines: &mut UnboundedReceiver<String>,
        _from_system: &mut UnboundedReceiver<ToPerson>,
    ) -> bool {
        let Some(control_tx) = self.rooms.control_sender(room_name) else {
            emit_line(&self.out, format!("Room '{room_name}' is not currently live."));
            return false;
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let status = self.identities.get_status(&self.fingerprint, None);
        let username = status.username.clone().unwrap_or_default();
        let person_id = mint_person_id(now, &username);

        let offer = OperatorMessage::PunchOffer(PunchOfferPayload {
            person_id: person_id.clone(),
            candidates: vec![],
            person_key: self.fingerprint.to_string(),
            display_name: format!("{username} ({})", status.platform.unwrap_or_default()),
            username,
        });
        if control_tx.send(offer).is_err() {
            emit_line(&self.out, format!("Room '{room_name}' is not currently live."));
            return false;
        }

        match self.broker.await_punch_answer(person_id).await {
            Ok(result) => {
                let host_keys = self
                    .rooms
                    .room_list()
                    .into_iter()
                    .find(|r| r.name == room_name)
                    .map(|r| r.public_keys)
                    .unwrap_or_default();
                let teleport = InBandMessage::Teleport(TeleportPayload {
                    room_name: room_name.to_string(),
                    candidates: result.candidates.clone(),
                    ssh_port: result.ssh_port,
                    public_keys: host_keys.clone(),
                });
                emit_osc(&self.out, &teleport);
                emit_line(
                    &self.out,
                    format!(
                        "Teleporting to {room_name} at {:?} (port {}). Host keys: {:?}",
                        result.candidates, result.ssh_port, host_keys
                    ),
                );
                info!(room = room_name, "person handed off");
                true
            }
            Err(HandoffError::Timeout) => {
                emit_line(&self.out, "Timeout waiting for room operator.");
                warn!(room = room_name, "punch offer timed out");
                false
            }
        }
    }

    async fn next_line(
        &self,
        lines: &mut UnboundedReceiver<String>,
        from_system: &mut UnboundedReceiver<ToPerson>,
    ) -> Option<String> {
        loop {
            tokio::select! {
                line = lines.recv() => return line,
                msg = from_system.recv() => match msg {
                    Some(ToPerson::Close) | None => return None,
                    _ => continue,
                },
            }
        }
    }
}

/// Deliver a `ToPerson` push to a handle, used by callers outside the
/// session (the control-stream task broadcasting a roster, the registry
/// displacing a duplicate session).
pub fn push(handle: &PersonHandle, msg: ToPerson) {
    handle.send(msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn tmp() -> PathBuf {
        std::env::temp_dir().join(format!("unn-interactive-test-{}", rand::random::<u64>()))
    }

    #[tokio::test]
    async fn browsing_renders_room_list_pushes() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let session = InteractiveSession {
            fingerprint: PublicKeyFingerprint::from_hex("f1"),
            public_key_wire_bytes: b"f1".to_vec(),
            identities: IdentityRegistry::load(tmp()),
            rooms: RoomRegistry::load(tmp()),
            broker: Arc::new(Broker::new()),
            out: out_tx,
        };
        let (_lines_tx, lines_rx) = mpsc::unbounded_channel::<String>();
        let (sys_tx, sys_rx) = mpsc::unbounded_channel();
        sys_tx
            .send(ToPerson::RoomList(vec![RoomSummary {
                name: "r1".to_string(),
                owner: "alice".to_string(),
                people_count: 2,
                doors: vec![],
                candidates: vec![],
                ssh_port: 2222,
                public_keys: vec![],
            }]))
            .unwrap();
        sys_tx.send(ToPerson::Close).unwrap();

        let mut lines_rx = lines_rx;
        let mut sys_rx = sys_rx;
        session.run_browsing(&mut lines_rx, &mut sys_rx).await;

        let mut saw_room_line = false;
        while let Ok(event) = out_rx.try_recv() {
            if let OutEvent::Line(line) = event {
                if line.contains("r1") {
                    saw_room_line = true;
                }
            }
        }
        assert!(saw_room_line);
    }

    #[tokio::test]
    async fn joining_nonexistent_room_falls_back_to_browsing() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let session = InteractiveSession {
            fingerprint: PublicKeyFingerprint::from_hex("f1"),
            public_key_wire_bytes: b"f1".to_vec(),
            identities: IdentityRegistry::load(tmp()),
            rooms: RoomRegistry::load(tmp()),
            broker: Arc::new(Broker::new()),
            out: out_tx,
        };
        let (_lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
        let (_sys_tx, mut sys_rx) = mpsc::unbounded_channel();

        let should_end = session.run_joining("ghost", &mut lines_rx, &mut sys_rx).await;
        assert!(!should_end);
        let mut saw_offline_message = false;
        while let Ok(OutEvent::Line(line)) = out_rx.try_recv() {
            if line.contains("not currently live") {
                saw_offline_message = true;
            }
        }
        assert!(saw_offline_message);
    }
}
