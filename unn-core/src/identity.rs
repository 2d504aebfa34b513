//! Identity registry (§4.2) — maps public-key fingerprint to
//! `(unn_username, platform_info, last_seen_date)`.
//!
//! Reads may proceed concurrently; mutation is exclusive and persists
//! before the write lock is released, per the single reader/writer
//! coordination discipline of §3/§5. Network sends in response to a
//! mutation are the caller's job, done *after* the lock is dropped.

use crate::error::IdentityError;
use crate::fingerprint::PublicKeyFingerprint;
use crate::persistence::{load_lines, write_atomic};
use crate::validate::validate_name;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::error;

/// `platform_info` is `"<platform_username>@<platform_tag>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformTag {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    #[serde(rename = "sourcehut")]
    SourceHut,
    #[serde(rename = "codeberg")]
    Codeberg,
}

impl PlatformTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformTag::GitHub => "github",
            PlatformTag::GitLab => "gitlab",
            PlatformTag::SourceHut => "sourcehut",
            PlatformTag::Codeberg => "codeberg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "github" => Some(PlatformTag::GitHub),
            "gitlab" => Some(PlatformTag::GitLab),
            "sourcehut" => Some(PlatformTag::SourceHut),
            "codeberg" => Some(PlatformTag::Codeberg),
            _ => None,
        }
    }

    /// The host that serves `<path>.keys` for this platform (§4.3).
    pub fn keys_host(&self) -> &'static str {
        match self {
            PlatformTag::GitHub => "github.com",
            PlatformTag::GitLab => "gitlab.com",
            PlatformTag::SourceHut => "meta.sr.ht",
            PlatformTag::Codeberg => "codeberg.org",
        }
    }
}

/// `"<platform_username>@<platform_tag>"`, parsed and rendered as a unit
/// since it travels as one string field on the wire (§3, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub platform_username: String,
    pub platform_tag: PlatformTag,
}

impl PlatformInfo {
    pub fn parse(s: &str) -> Option<Self> {
        let (user, tag) = s.rsplit_once('@')?;
        Some(Self {
            platform_username: user.to_string(),
            platform_tag: PlatformTag::parse(tag)?,
        })
    }
}

impl std::fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.platform_username, self.platform_tag.as_str())
    }
}

/// An identity bound to a fingerprint (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub fingerprint: PublicKeyFingerprint,
    pub unn_username: String,
    pub platform_info: PlatformInfo,
    pub last_seen_date: NaiveDate,
}

/// Result of `get_status` (§4.2, also the `user_status` API response, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatus {
    pub verified: bool,
    pub username: Option<String>,
    pub platform: Option<String>,
    pub is_taken: bool,
    pub taken_by_platform: Option<String>,
}

/// The process-wide identity registry. Cheap to clone (an `Arc` inside),
/// so every connection handler can hold its own handle to the same state.
#[derive(Clone)]
pub struct IdentityRegistry {
    inner: std::sync::Arc<RwLock<Inner>>,
    path: PathBuf,
}

struct Inner {
    by_fingerprint: HashMap<PublicKeyFingerprint, Identity>,
}

impl IdentityRegistry {
    /// Load the registry from `path` (permissive — bad lines are
    /// skipped). A missing file means an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_lines(&path, parse_identity_line);
        let by_fingerprint = entries
            .into_iter()
            .map(|identity| (identity.fingerprint.clone(), identity))
            .collect();
        Self {
            inner: std::sync::Arc::new(RwLock::new(Inner { by_fingerprint })),
            path,
        }
    }

    /// §4.2 `get_status`. Read-only.
    pub fn get_status(
        &self,
        fingerprint: &PublicKeyFingerprint,
        requested_username: Option<&str>,
    ) -> UserStatus {
        let inner = self.inner.read().unwrap();
        let own = inner.by_fingerprint.get(fingerprint);
        let (is_taken, taken_by_platform) = match requested_username {
            Some(name) => match inner
                .by_fingerprint
                .values()
                .find(|i| i.unn_username == name)
            {
                Some(other) if Some(&other.fingerprint) != Some(fingerprint) => {
                    (true, Some(other.platform_info.to_string()))
                }
                _ => (false, None),
            },
            None => (false, None),
        };
        UserStatus {
            verified: own.is_some(),
            username: own.map(|i| i.unn_username.clone()),
            platform: own.map(|i| i.platform_info.to_string()),
            is_taken,
            taken_by_platform,
        }
    }

    /// §4.2 `register`. Fails if `unn_username` is taken by a different
    /// fingerprint, or by the same fingerprint under a different
    /// `platform_info` (identities are immutable once bound, per §3).
    pub fn register(
        &self,
        fingerprint: &PublicKeyFingerprint,
        unn_username: &str,
        platform_info: PlatformInfo,
    ) -> Result<(), IdentityError> {
        validate_name(unn_username)?;

        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner
            .by_fingerprint
            .values()
            .find(|i| i.unn_username == unn_username)
        {
            if &existing.fingerprint != fingerprint {
                return Err(IdentityError::UsernameTaken {
                    taken_by: existing.platform_info.to_string(),
                });
            }
            if existing.platform_info != platform_info {
                return Err(IdentityError::PlatformMismatch);
            }
            // Same fingerprint, same platform_info: idempotent re-register.
            return Ok(());
        }

        let today = chrono::Utc::now().date_naive();
        inner.by_fingerprint.insert(
            fingerprint.clone(),
            Identity {
                fingerprint: fingerprint.clone(),
                unn_username: unn_username.to_string(),
                platform_info,
                last_seen_date: today,
            },
        );
        self.persist_locked(&inner);
        Ok(())
    }

    /// §4.2 `touch` — bump `last_seen_date` to today's UTC calendar day.
    pub fn touch(&self, fingerprint: &PublicKeyFingerprint) {
        let mut inner = self.inner.write().unwrap();
        let today = chrono::Utc::now().date_naive();
        if let Some(identity) = inner.by_fingerprint.get_mut(fingerprint) {
            if identity.last_seen_date != today {
                identity.last_seen_date = today;
                self.persist_locked(&inner);
            }
        }
    }

    pub fn lookup(&self, fingerprint: &PublicKeyFingerprint) -> Option<Identity> {
        self.inner.read().unwrap().by_fingerprint.get(fingerprint).cloned()
    }

    /// Rewrite the backing file. Persistence errors are logged, not
    /// propagated — per §7, the in-memory state is already updated, and
    /// a failed write here just means a future restart may lose the
    /// last mutation.
    fn persist_locked(&self, inner: &Inner) {
        let mut contents = String::new();
        for identity in inner.by_fingerprint.values() {
            contents.push_str(&format!(
                "{} {} {} {}\n",
                identity.fingerprint,
                identity.unn_username,
                identity.platform_info,
                identity.last_seen_date.format("%Y-%m-%d"),
            ));
        }
        if let Err(e) = write_atomic(&self.path, &contents) {
            error!(error = %e, "failed to persist identity registry");
        }
    }
}

fn parse_identity_line(line: &str) -> Option<Identity> {
    let mut parts = line.split_whitespace();
    let fingerprint = PublicKeyFingerprint::from_hex(parts.next()?);
    let unn_username = parts.next()?.to_string();
    let platform_info = PlatformInfo::parse(parts.next()?)?;
    let last_seen_date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
    Some(Identity {
        fingerprint,
        unn_username,
        platform_info,
        last_seen_date,
    })
}

fn registry_path_for_tests() -> PathBuf {
    std::env::temp_dir().join(format!("unn-identity-test-{}", rand::random::<u64>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gh(user: &str) -> PlatformInfo {
        PlatformInfo {
            platform_username: user.to_string(),
            platform_tag: PlatformTag::GitHub,
        }
    }

    #[test]
    fn register_then_status_reflects_identity() {
        let reg = IdentityRegistry::load(registry_path_for_tests());
        let fp = PublicKeyFingerprint::from_hex("f1");
        reg.register(&fp, "alice", gh("alice")).unwrap();
        let status = reg.get_status(&fp, None);
        assert!(status.verified);
        assert_eq!(status.username.as_deref(), Some("alice"));
        assert!(!status.is_taken);
    }

    #[test]
    fn username_taken_by_different_fingerprint_is_rejected() {
        let reg = IdentityRegistry::load(registry_path_for_tests());
        let f1 = PublicKeyFingerprint::from_hex("f1");
        let f2 = PublicKeyFingerprint::from_hex("f2");
        reg.register(&f1, "alice", gh("alice")).unwrap();
        let err = reg.register(&f2, "alice", gh("alice2")).unwrap_err();
        assert!(matches!(err, IdentityError::UsernameTaken { .. }));
    }

    #[test]
    fn same_fingerprint_different_platform_is_mismatch() {
        let reg = IdentityRegistry::load(registry_path_for_tests());
        let fp = PublicKeyFingerprint::from_hex("f1");
        reg.register(&fp, "alice", gh("alice")).unwrap();
        let err = reg
            .register(&fp, "alice", gh("someone-else"))
            .unwrap_err();
        assert!(matches!(err, IdentityError::PlatformMismatch));
    }

    #[test]
    fn same_fingerprint_same_platform_is_idempotent() {
        let reg = IdentityRegistry::load(registry_path_for_tests());
        let fp = PublicKeyFingerprint::from_hex("f1");
        reg.register(&fp, "alice", gh("alice")).unwrap();
        assert!(reg.register(&fp, "alice", gh("alice")).is_ok());
    }

    #[test]
    fn invalid_username_is_rejected() {
        let reg = IdentityRegistry::load(registry_path_for_tests());
        let fp = PublicKeyFingerprint::from_hex("f1");
        let err = reg.register(&fp, "ab", gh("alice")).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidUsername(_)));
    }

    #[test]
    fn status_for_unknown_fingerprint_is_unverified() {
        let reg = IdentityRegistry::load(registry_path_for_tests());
        let fp = PublicKeyFingerprint::from_hex("unknown");
        let status = reg.get_status(&fp, Some("alice"));
        assert!(!status.verified);
        assert!(!status.is_taken);
    }

    #[test]
    fn status_reports_taken_by_for_other_fingerprint() {
        let reg = IdentityRegistry::load(registry_path_for_tests());
        let f1 = PublicKeyFingerprint::from_hex("f1");
        let f2 = PublicKeyFingerprint::from_hex("f2");
        reg.register(&f1, "alice", gh("alice")).unwrap();
        let status = reg.get_status(&f2, Some("alice"));
        assert!(status.is_taken);
        assert_eq!(status.taken_by_platform.as_deref(), Some("alice@github"));
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let path = registry_path_for_tests();
        let fp = PublicKeyFingerprint::from_hex("f1");
        {
            let reg = IdentityRegistry::load(&path);
            reg.register(&fp, "alice", gh("alice")).unwrap();
        }
        let reg2 = IdentityRegistry::load(&path);
        let status = reg2.get_status(&fp, None);
        assert_eq!(status.username.as_deref(), Some("alice"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn parse_identity_line_skips_malformed() {
        assert!(parse_identity_line("only two fields").is_none());
        assert!(parse_identity_line("fp alice badplatform 2024-01-01").is_none());
        assert!(parse_identity_line("fp alice alice@github not-a-date").is_none());
        assert!(parse_identity_line("fp alice alice@github 2024-01-01").is_some());
    }
}
