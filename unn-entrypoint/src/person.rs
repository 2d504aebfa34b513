//! The interactive Person session: per-visitor state machine (§4.8) and
//! the process-wide registry enforcing "at most one live Person per
//! fingerprint" (§3).
//!
//! Each attached visitor owns exactly one `Person` task. Everything that
//! task needs to receive from the rest of the system — a roster update,
//! a popup, a `punch_start` — arrives as a `ToPerson` message on its own
//! channel; nothing outside the task ever touches the visitor's PTY
//! directly, matching §5's "LiveRoom control-stream encoders are used
//! only by the task servicing that room" discipline applied symmetrically
//! to Persons.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::RwLock;
use unn_core::messages::RoomSummary;
use unn_core::PublicKeyFingerprint;

/// Gap between the displaced-session popup and its teardown (§4.4), long
/// enough for the popup to render before the connection drops.
const DISPLACED_SESSION_CLOSE_DELAY: Duration = Duration::from_millis(200);

/// The states of §4.8's finite machine. Data that only makes sense in one
/// state lives on the variant, not the struct, so an impossible
/// combination (e.g. a `pending_room` while `Browsing`) can't be built.
#[derive(Debug, Clone)]
pub enum PersonState {
    Connected,
    Onboarding { verify_attempts: u32 },
    Browsing,
    Joining { room_name: String, person_id: String },
    HandingOff,
    Closed,
}

/// Messages a Person's own task consumes to update its PTY, pushed in
/// from the rest of the system (roster broadcasts, the broker, a
/// duplicate-session notice).
#[derive(Debug, Clone)]
pub enum ToPerson {
    RoomList(Vec<RoomSummary>),
    Popup { severity: String, title: String, message: String },
    PunchStart { room_name: String, candidates: Vec<String>, ssh_port: u16, public_keys: Vec<String> },
    Close,
}

/// A lightweight, cloneable handle to an attached Person, held by the
/// registry and by anything (the broker, the control-stream handler)
/// that needs to push a message at this visitor without owning its task.
#[derive(Clone)]
pub struct PersonHandle {
    pub session_id: u64,
    pub fingerprint: PublicKeyFingerprint,
    pub unn_username: Option<String>,
    to_ui: UnboundedSender<ToPerson>,
}

impl PersonHandle {
    pub fn send(&self, msg: ToPerson) {
        // The receiving task may already have exited (disconnect race);
        // dropping an undeliverable message is the correct behavior.
        let _ = self.to_ui.send(msg);
    }
}

/// Registry of currently-attached Persons, keyed by fingerprint (§3: "at
/// most one live Person per fingerprint").
#[derive(Clone, Default)]
pub struct PersonRegistry {
    inner: Arc<RwLock<HashMap<PublicKeyFingerprint, PersonHandle>>>,
}

impl PersonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new Person for `fingerprint`. If one is already attached,
    /// it is sent a "duplicate session" warning popup and `Close`, and its
    /// old handle is dropped from the registry in favor of the new one.
    pub async fn attach(
        &self,
        session_id: u64,
        fingerprint: PublicKeyFingerprint,
        unn_username: Option<String>,
    ) -> (PersonHandle, mpsc::UnboundedReceiver<ToPerson>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PersonHandle {
            session_id,
            fingerprint: fingerprint.clone(),
            unn_username,
            to_ui: tx,
        };

        let mut map = self.inner.write().await;
        if let Some(previous) = map.insert(fingerprint, handle.clone()) {
            previous.send(ToPerson::Popup {
                severity: "warning".to_string(),
                title: "Duplicate Session".to_string(),
                message: "You connected from elsewhere; this session is closing.".to_string(),
            });
            tokio::spawn(async move {
                tokio::time::sleep(DISPLACED_SESSION_CLOSE_DELAY).await;
                previous.send(ToPerson::Close);
            });
        }
        (handle, rx)
    }

    /// Remove a Person, but only if it's still the one we attached
    /// (guards against a stale detach racing a newer attach for the same
    /// fingerprint).
    pub async fn detach(&self, fingerprint: &PublicKeyFingerprint, session_id: u64) {
        let mut map = self.inner.write().await;
        if let Some(current) = map.get(fingerprint) {
            if current.session_id == session_id {
                map.remove(fingerprint);
            }
        }
    }

    pub async fn broadcast_room_list(&self, rooms: Vec<RoomSummary>) {
        let map = self.inner.read().await;
        for handle in map.values() {
            handle.send(ToPerson::RoomList(rooms.clone()));
        }
    }

    pub async fn all_handles(&self) -> Vec<PersonHandle> {
        self.inner.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> PublicKeyFingerprint {
        PublicKeyFingerprint::from_hex(s)
    }

    #[tokio::test]
    async fn second_attach_displaces_first_with_warning() {
        let registry = PersonRegistry::new();
        let (_h1, mut rx1) = registry.attach(1, fp("f1"), None).await;
        let (_h2, _rx2) = registry.attach(2, fp("f1"), Some("alice".into())).await;

        let popup = rx1.recv().await.unwrap();
        match popup {
            ToPerson::Popup { severity, .. } => assert_eq!(severity, "warning"),
            _ => panic!("expected popup"),
        }
        assert!(matches!(rx1.recv().await.unwrap(), ToPerson::Close));
    }

    #[tokio::test]
    async fn detach_is_noop_for_stale_session() {
        let registry = PersonRegistry::new();
        let (_h1, _rx1) = registry.attach(1, fp("f1"), None).await;
        let (_h2, _rx2) = registry.attach(2, fp("f1"), None).await;
        // Session 1 was already displaced; detaching it must not remove
        // session 2's handle.
        registry.detach(&fp("f1"), 1).await;
        assert_eq!(registry.all_handles().await.len(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_attached() {
        let registry = PersonRegistry::new();
        let (_h1, mut rx1) = registry.attach(1, fp("f1"), None).await;
        let (_h2, mut rx2) = registry.attach(2, fp("f2"), None).await;
        registry.broadcast_room_list(vec![]).await;
        assert!(matches!(rx1.recv().await.unwrap(), ToPerson::RoomList(_)));
        assert!(matches!(rx2.recv().await.unwrap(), ToPerson::RoomList(_)));
    }
}
