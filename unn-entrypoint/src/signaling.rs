//! P2P candidate-exchange stream (`unn-signaling`, §4.7).
//!
//! A much simpler sibling of the room/API streams: peers publish and
//! retrieve UDP candidate sets for the data-plane P2P transport. Nothing
//! here is persisted — it's scoped to the lifetime of the process, and
//! in practice to the lifetime of a handoff.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use unn_core::messages::Candidate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    PeerNotFound,
}

/// In-memory `peer_id -> candidates` store shared by every signaling
/// connection.
#[derive(Clone, Default)]
pub struct SignalingRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<Candidate>>>>,
}

impl SignalingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.7 `register`. `remote_ip` is the signaling connection's
    /// observed peer address; if it's IPv4 and not already among the
    /// submitted candidates, a server-reflexive candidate is prepended
    /// using the port of the first submitted candidate. IPv6 remotes
    /// never produce a reflexive candidate.
    pub fn register(&self, peer_id: String, mut candidates: Vec<Candidate>, remote_ip: IpAddr) {
        if let IpAddr::V4(v4) = remote_ip {
            let remote = v4.to_string();
            let already_present = candidates
                .iter()
                .any(|c| c.split(':').next() == Some(remote.as_str()));
            if !already_present {
                if let Some(port) = candidates.first().and_then(|c| c.rsplit(':').next()) {
                    candidates.insert(0, format!("{remote}:{port}"));
                }
            }
        }
        self.inner.write().unwrap().insert(peer_id, candidates);
    }

    pub fn get_peer(&self, peer_id: &str) -> Result<Vec<Candidate>, SignalingError> {
        self.inner
            .read()
            .unwrap()
            .get(peer_id)
            .cloned()
            .ok_or(SignalingError::PeerNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn register_prepends_reflexive_candidate_for_new_ipv4_remote() {
        let registry = SignalingRegistry::new();
        registry.register(
            "peer1".to_string(),
            vec!["10.0.0.5:5000".to_string()],
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)),
        );
        let candidates = registry.get_peer("peer1").unwrap();
        assert_eq!(candidates[0], "203.0.113.9:5000");
        assert_eq!(candidates[1], "10.0.0.5:5000");
    }

    #[test]
    fn register_skips_reflexive_when_remote_already_present() {
        let registry = SignalingRegistry::new();
        registry.register(
            "peer1".to_string(),
            vec!["203.0.113.9:5000".to_string()],
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)),
        );
        let candidates = registry.get_peer("peer1").unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn register_skips_reflexive_for_ipv6_remote() {
        let registry = SignalingRegistry::new();
        registry.register(
            "peer1".to_string(),
            vec!["10.0.0.5:5000".to_string()],
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        );
        let candidates = registry.get_peer("peer1").unwrap();
        assert_eq!(candidates, vec!["10.0.0.5:5000".to_string()]);
    }

    #[test]
    fn get_peer_unknown_errors() {
        let registry = SignalingRegistry::new();
        assert_eq!(registry.get_peer("nobody"), Err(SignalingError::PeerNotFound));
    }
}
