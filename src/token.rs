#![forbid(unsafe_code)]

//! Signed capability tokens.
//!
//! Tokens are minted for exactly one purpose and verified against that
//! purpose: a stream-proxy token is useless as a session credential and vice
//! versa. The wire format is `base64url(payload_json).base64url(signature)`
//! where the signature is a keyed BLAKE3 hash of the payload bytes. The key is
//! derived from the configured signing secret, so every server instance
//! configured with the same secret accepts every other instance's tokens.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Purpose tag for tokens that gate the proxy-relay endpoint.
pub const PURPOSE_STREAM_PROXY: &str = "stream-proxy";
/// Purpose tag for bearer session tokens accepted by the URL-mint endpoint.
pub const PURPOSE_SESSION: &str = "session";

/// Fixed validity window for stream-proxy tokens. A client whose token
/// expires mid-session re-requests a playable URL; there is no refresh.
pub const STREAM_TOKEN_TTL_SECS: i64 = 3600;

const KEY_DERIVE_CONTEXT: &str = "streamgate 2026 token signing v1";

/// Claim set carried by a verified stream-proxy token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamClaims {
    pub content_id: String,
    pub episode_id: Option<String>,
    pub user_id: String,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    episode_id: Option<String>,
    user_id: String,
    purpose: String,
    expires_at: i64,
}

/// Stateless signer/verifier. Cheap to clone; the key is immutable after
/// construction.
#[derive(Clone)]
pub struct TokenCodec {
    key: [u8; 32],
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_DERIVE_CONTEXT, secret.as_bytes()),
        }
    }

    /// Mints a stream-proxy token bound to (content, optional episode, user),
    /// valid for [`STREAM_TOKEN_TTL_SECS`] from now.
    pub fn mint_stream(&self, content_id: &str, episode_id: Option<&str>, user_id: &str) -> String {
        self.mint_stream_at(content_id, episode_id, user_id, Utc::now())
    }

    fn mint_stream_at(
        &self,
        content_id: &str,
        episode_id: Option<&str>,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> String {
        self.sign(&Payload {
            content_id: Some(content_id.to_owned()),
            episode_id: episode_id.map(str::to_owned),
            user_id: user_id.to_owned(),
            purpose: PURPOSE_STREAM_PROXY.to_owned(),
            expires_at: now.timestamp() + STREAM_TOKEN_TTL_SECS,
        })
    }

    /// Mints a session bearer token for `user_id`, valid for `ttl_secs`.
    pub fn mint_session(&self, user_id: &str, ttl_secs: i64) -> String {
        self.sign(&Payload {
            content_id: None,
            episode_id: None,
            user_id: user_id.to_owned(),
            purpose: PURPOSE_SESSION.to_owned(),
            expires_at: Utc::now().timestamp() + ttl_secs,
        })
    }

    /// Returns the claim set if the signature validates, the purpose is
    /// `stream-proxy`, and the token is unexpired. Every other condition,
    /// including malformed input, yields `None`; verification failure is a
    /// normal outcome, not an error.
    pub fn verify_stream(&self, token: &str) -> Option<StreamClaims> {
        self.verify_stream_at(token, Utc::now())
    }

    fn verify_stream_at(&self, token: &str, now: DateTime<Utc>) -> Option<StreamClaims> {
        let payload = self.open(token, PURPOSE_STREAM_PROXY, now)?;
        Some(StreamClaims {
            content_id: payload.content_id?,
            episode_id: payload.episode_id,
            user_id: payload.user_id,
        })
    }

    /// Returns the user id carried by a valid, unexpired session token.
    pub fn verify_session(&self, token: &str) -> Option<String> {
        let payload = self.open(token, PURPOSE_SESSION, Utc::now())?;
        Some(payload.user_id)
    }

    fn sign(&self, payload: &Payload) -> String {
        // Payload serialization cannot fail: every field is a string or i64.
        let bytes = serde_json::to_vec(payload).unwrap_or_default();
        let signature = blake3::keyed_hash(&self.key, &bytes);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&bytes),
            URL_SAFE_NO_PAD.encode(signature.as_bytes())
        )
    }

    fn open(&self, token: &str, purpose: &str, now: DateTime<Utc>) -> Option<Payload> {
        let (payload_part, signature_part) = token.split_once('.')?;
        let payload_bytes = URL_SAFE_NO_PAD.decode(payload_part).ok()?;
        let signature_bytes = URL_SAFE_NO_PAD.decode(signature_part).ok()?;
        let signature: [u8; 32] = signature_bytes.try_into().ok()?;

        // blake3::Hash comparison is constant-time.
        if blake3::keyed_hash(&self.key, &payload_bytes) != blake3::Hash::from(signature) {
            return None;
        }

        let payload: Payload = serde_json::from_slice(&payload_bytes).ok()?;
        if payload.purpose != purpose || payload.expires_at <= now.timestamp() {
            return None;
        }
        Some(payload)
    }
}
