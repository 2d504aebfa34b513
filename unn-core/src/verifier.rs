//! Platform identity verification (§4.3).
//!
//! To prove a claimed `unn_username` on a platform (e.g. GitHub), the
//! entry point fetches that platform's well-known authorized-keys
//! listing and checks whether it contains the same key bytes the
//! connecting client presented. No shared secret, no OAuth — the
//! platform's own public key listing *is* the proof.

use crate::error::VerifierError;
use crate::identity::PlatformTag;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;

/// `https://<platform_host>/<path_prefix><username>.keys` style lookups
/// (GitHub's `https://github.com/<user>.keys` is the canonical example).
pub struct PlatformVerifier {
    client: Client,
    platform_host: String,
    path_template: String,
}

/// Outcome of a verification attempt that completed without a transport
/// or platform-side error. `matched = false` is an ordinary negative
/// result (the key isn't listed), not an error (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationResult {
    pub matched: bool,
}

impl PlatformVerifier {
    /// `path_template` must contain exactly one `{username}` placeholder,
    /// e.g. `"/{username}.keys"` for GitHub.
    pub fn new(platform_host: impl Into<String>, path_template: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client with static config never fails to build");
        Self {
            client,
            platform_host: platform_host.into(),
            path_template: path_template.into(),
        }
    }

    pub fn github(client_timeout: Duration) -> Self {
        Self::for_platform(PlatformTag::GitHub, client_timeout)
    }

    /// Build the verifier for one of the four supported platforms (§3),
    /// each of which publishes authorized keys at a slightly different
    /// path shape under its own host.
    pub fn for_platform(tag: PlatformTag, client_timeout: Duration) -> Self {
        let path_template = match tag {
            PlatformTag::GitHub | PlatformTag::GitLab | PlatformTag::Codeberg => {
                "/{username}.keys"
            }
            PlatformTag::SourceHut => "/~{username}.keys",
        };
        let client = Client::builder()
            .timeout(client_timeout)
            .build()
            .expect("reqwest client with static config never fails to build");
        Self {
            client,
            platform_host: tag.keys_host().to_string(),
            path_template: path_template.to_string(),
        }
    }

    fn url_for(&self, username: &str) -> String {
        let path = self.path_template.replace("{username}", username);
        format!("https://{}{}", self.platform_host, path)
    }

    /// Fetch `username`'s published authorized keys and check whether
    /// `presented_key_wire_bytes` (the exact wire-format bytes the
    /// client's SSH key exchange presented) appears among them.
    ///
    /// A non-2xx platform response is `PlatformStatusError`; a transport
    /// failure (DNS, connect, TLS, timeout) is `Unreachable`. Neither of
    /// those is "no match" — only a successful fetch that doesn't
    /// contain the key is `matched: false`.
    pub async fn verify(
        &self,
        username: &str,
        presented_key_wire_bytes: &[u8],
    ) -> Result<VerificationResult, VerifierError> {
        let response = self.client.get(self.url_for(username)).send().await?;
        if !response.status().is_success() {
            return Err(VerifierError::PlatformStatusError(response.status().as_u16()));
        }
        let body = response.text().await?;
        let matched = parse_authorized_keys(&body)
            .any(|line_bytes| line_bytes == presented_key_wire_bytes);
        Ok(VerificationResult { matched })
    }
}

/// Parse a newline-separated `authorized_keys`-style listing into the
/// wire-format bytes of each entry (the base64-decoded middle field of
/// `<type> <base64> [comment]`). Lines that don't decode are skipped —
/// this is a best-effort match, not a strict parser.
fn parse_authorized_keys(body: &str) -> impl Iterator<Item = Vec<u8>> + '_ {
    body.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let b64 = line.split_whitespace().nth(1)?;
        base64::engine::general_purpose::STANDARD.decode(b64).ok()
    })
}
