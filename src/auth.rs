//! RFC 2617 digest authentication helper (§4.8, §10.5).
//!
//! The core's responsibility is the verification algorithm and the
//! [`CredentialStore`] interface to an external credential source; concrete
//! storage is an "external collaborator" per §1. [`HtdigestFile`] is provided
//! as a minimal, convenient reference implementation for tests and small
//! deployments, not as the canonical credential store.

use std::collections::HashMap;
use std::path::Path;

use crate::error::RpcMuxError;

/// What a handler learns about a successfully authenticated request.
#[derive(Debug, Clone, Default)]
pub struct AuthnInfo {
    pub username: String,
    pub realm: String,
}

/// Looks up the HA1 hash (`md5(username:realm:password)`) for a user in a
/// given realm. Implementations never need to expose the plaintext
/// password.
pub trait CredentialStore {
    fn ha1(&self, realm: &str, username: &str) -> Option<String>;
}

/// Parses a challenge-response string of the form produced by an RFC 2617
/// `Authorization: Digest ...` header value into its key/value pairs.
fn parse_digest_auth(auth: &str) -> HashMap<String, String> {
    auth.trim_start_matches("Digest ")
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            let mut kv = part.splitn(2, '=');
            let key = kv.next()?.trim();
            let value = kv.next()?.trim().trim_matches('"');
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

pub struct DigestVerifier<'a> {
    store: &'a dyn CredentialStore,
    realm: String,
}

impl<'a> DigestVerifier<'a> {
    pub fn new(store: &'a dyn CredentialStore, realm: impl Into<String>) -> Self {
        Self {
            store,
            realm: realm.into(),
        }
    }

    /// Verifies a digest challenge-response string against the configured
    /// credential store for a given request method. Returns the
    /// authenticated username on success.
    pub fn verify(&self, auth_header: &str, method: &str) -> Option<AuthnInfo> {
        let fields = parse_digest_auth(auth_header);
        let username = fields.get("username")?;
        let realm = fields.get("realm").map(String::as_str).unwrap_or(&self.realm);
        if realm != self.realm {
            return None;
        }
        let uri = fields.get("uri")?;
        let nonce = fields.get("nonce")?;
        let response = fields.get("response")?;
        let nc = fields.get("nc");
        let cnonce = fields.get("cnonce");
        let qop = fields.get("qop");

        let ha1 = self.store.ha1(realm, username)?;
        let ha2 = format!("{:x}", md5::compute(format!("{}:{}", method, uri)));

        let expected = match (qop, nc, cnonce) {
            (Some(qop), Some(nc), Some(cnonce)) => format!(
                "{:x}",
                md5::compute(format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2))
            ),
            _ => format!("{:x}", md5::compute(format!("{}:{}:{}", ha1, nonce, ha2))),
        };

        if expected == *response {
            Some(AuthnInfo {
                username: username.clone(),
                realm: realm.to_string(),
            })
        } else {
            None
        }
    }
}

/// Reference [`CredentialStore`] backed by an Apache-style htdigest file
/// (`username:realm:HA1hash` per line).
pub struct HtdigestFile {
    entries: HashMap<(String, String), String>,
}

impl HtdigestFile {
    pub fn load(path: &Path) -> Result<Self, RpcMuxError> {
        let text = std::fs::read_to_string(path)?;
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, ':');
            let (Some(username), Some(realm), Some(ha1)) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            entries.insert((username.to_string(), realm.to_string()), ha1.to_string());
        }
        Ok(Self { entries })
    }
}

impl CredentialStore for HtdigestFile {
    fn ha1(&self, realm: &str, username: &str) -> Option<String> {
        self.entries.get(&(username.to_string(), realm.to_string())).cloned()
    }
}
