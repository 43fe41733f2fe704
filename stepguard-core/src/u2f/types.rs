//! U2F wire and stored data types.
//!
//! Field names follow the browser-facing U2F JavaScript API (camelCase),
//! and all binary payloads travel as base64url strings without padding, so
//! the serialized forms are interchangeable with what a `u2f-api.js` client
//! produces and consumes.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Protocol version reported in every challenge.
pub const U2F_VERSION: &str = "U2F_V2";

/// Length of the server challenge nonce in bytes.
pub const CHALLENGE_BYTES: usize = 32;

/// Length of an X9.62 uncompressed P-256 public key.
pub(crate) const PUBLIC_KEY_BYTES: usize = 65;

/// Base64url (no padding) encode, the encoding of every binary field.
pub(crate) fn websafe_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Base64url (no padding) decode.
pub(crate) fn websafe_decode(s: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| ProtocolError::MalformedResponse(format!("base64 decode: {e}")))
}

/// A stored security-key registration: the binding of a public key, a
/// device-issued key handle and a replay counter to one method record.
///
/// `counter` only ever increases; an authentication response reporting a
/// counter at or below the stored value is rejected as a clone signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRegistration {
    /// Device-issued identifier for the private key (base64url).
    pub key_handle: String,
    /// Uncompressed P-256 public key (base64url).
    pub public_key: String,
    /// Attestation certificate captured at registration time (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_certificate: Option<String>,
    /// Last counter value seen from the authenticator.
    #[serde(default)]
    pub counter: u32,
}

/// Registration challenge issued by [`crate::U2fServer::begin_registration`].
///
/// `excluded_key_handles` lists every handle the user already holds; a
/// conforming client will refuse to re-register one of them, and the server
/// rejects a response binding to one regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationChallenge {
    pub version: String,
    pub app_id: String,
    /// Server nonce (base64url).
    pub challenge: String,
    #[serde(default)]
    pub excluded_key_handles: Vec<String>,
}

/// Authentication challenge bound to the full candidate key-handle set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationChallenge {
    pub version: String,
    pub app_id: String,
    /// Server nonce (base64url), shared by every candidate sign request.
    pub challenge: String,
    /// Key handles the response may answer with.
    #[serde(default)]
    pub key_handles: Vec<String>,
}

impl AuthenticationChallenge {
    /// Render the per-candidate client payloads (`{version, appId,
    /// challenge, keyHandle}`) handed to the authenticator-interaction layer.
    pub fn sign_requests(&self) -> Vec<SignRequest> {
        self.key_handles
            .iter()
            .map(|kh| SignRequest {
                version: self.version.clone(),
                app_id: self.app_id.clone(),
                challenge: self.challenge.clone(),
                key_handle: kh.clone(),
            })
            .collect()
    }
}

/// One client-facing sign request, one per candidate key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub version: String,
    pub app_id: String,
    pub challenge: String,
    pub key_handle: String,
}

/// Raw registration response submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Base64url JSON client data.
    pub client_data: String,
    /// Base64url raw registration message.
    pub registration_data: String,
}

/// Raw authentication response submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    /// Base64url JSON client data.
    pub client_data: String,
    /// Base64url `presence || counter || signature` message.
    pub signature_data: String,
    /// Handle of the key that produced the signature (base64url).
    pub key_handle: String,
}

/// Decoded client data blob, signed over by the authenticator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientData {
    pub typ: String,
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ClientData {
    pub const TYPE_REGISTER: &'static str = "navigator.id.finishEnrollment";
    pub const TYPE_SIGN: &'static str = "navigator.id.getAssertion";

    /// Decode from the base64url JSON blob, returning both the parsed value
    /// and the raw bytes (the raw bytes enter the signing base verbatim).
    pub(crate) fn decode(encoded: &str) -> Result<(Self, Vec<u8>)> {
        let raw = websafe_decode(encoded)?;
        let parsed: Self = serde_json::from_slice(&raw)
            .map_err(|e| ProtocolError::MalformedResponse(format!("client data: {e}")))?;
        Ok((parsed, raw))
    }

    pub(crate) fn expect_type(&self, expected: &str) -> Result<()> {
        if self.typ == expected {
            Ok(())
        } else {
            Err(ProtocolError::MalformedResponse(format!(
                "unexpected client data type {:?}",
                self.typ
            )))
        }
    }
}
