//! The challenge/response verifier.
//!
//! [`U2fServer`] is scoped to one application identity and is stateless:
//! challenges go out, responses come back, and everything in between
//! (session binding, persistence) belongs to the caller. Verification
//! covers four properties: the signature itself, the challenge nonce, the
//! origin binding, and counter monotonicity.

use crate::crypto;
use crate::error::{ProtocolError, Result};
use crate::u2f::attestation;
use crate::u2f::types::{
    websafe_decode, websafe_encode, AuthenticationChallenge, ClientData, KeyRegistration,
    RegisterResponse, RegistrationChallenge, SignResponse, CHALLENGE_BYTES, PUBLIC_KEY_BYTES,
    U2F_VERSION,
};

/// First byte of a raw registration message.
const REGISTRATION_RESERVED_BYTE: u8 = 0x05;

/// Bit 0 of the sign-response flags byte: user presence was verified.
const USER_PRESENCE_FLAG: u8 = 0x01;

/// U2F protocol server bound to one application identity.
#[derive(Debug, Clone)]
pub struct U2fServer {
    app_id: String,
}

impl U2fServer {
    /// Create a server for the given application identity (scheme + host +
    /// port of the site, e.g. `https://example.com`).
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    /// The application identity every challenge is bound to.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Issue a registration challenge.
    ///
    /// Handles already present in `existing` are carried as the exclusion
    /// set: the client must not re-register them, and a response binding to
    /// one is rejected by [`Self::complete_registration`].
    pub fn begin_registration(
        &self,
        existing: &[KeyRegistration],
    ) -> Result<RegistrationChallenge> {
        let excluded: Vec<String> = existing.iter().map(|r| r.key_handle.clone()).collect();

        tracing::debug!(excluded = excluded.len(), "issuing registration challenge");

        Ok(RegistrationChallenge {
            version: U2F_VERSION.to_string(),
            app_id: self.app_id.clone(),
            challenge: self.new_nonce()?,
            excluded_key_handles: excluded,
        })
    }

    /// Verify a registration response against the issued challenge.
    ///
    /// On success returns the new [`KeyRegistration`] with `counter = 0`;
    /// the registration message itself reports no counter. Nothing must be
    /// persisted on failure.
    pub fn complete_registration(
        &self,
        challenge: &RegistrationChallenge,
        response: &RegisterResponse,
    ) -> Result<KeyRegistration> {
        let (client_data, client_data_raw) = ClientData::decode(&response.client_data)?;
        client_data.expect_type(ClientData::TYPE_REGISTER)?;
        self.check_nonce(&challenge.challenge, &client_data)?;
        self.check_origin(&client_data)?;

        let raw = websafe_decode(&response.registration_data)?;
        let message = RawRegistration::parse(&raw)?;

        let key_handle = websafe_encode(&message.key_handle);
        if challenge.excluded_key_handles.contains(&key_handle) {
            return Err(ProtocolError::MalformedResponse(
                "key handle is already registered".into(),
            ));
        }

        // Registration signing base, verified under the attestation key:
        // 0x00 || SHA256(appId) || SHA256(clientData) || keyHandle || publicKey
        let mut base = Vec::with_capacity(1 + 64 + message.key_handle.len() + PUBLIC_KEY_BYTES);
        base.push(0x00);
        base.extend_from_slice(&crypto::sha256(self.app_id.as_bytes()));
        base.extend_from_slice(&crypto::sha256(&client_data_raw));
        base.extend_from_slice(&message.key_handle);
        base.extend_from_slice(&message.public_key);

        let attestation_key = attestation::public_key(&message.certificate)?;
        crypto::verify_p256(&attestation_key, &base, &message.signature)?;

        tracing::info!(key_handle = %key_handle, "security key registered");

        Ok(KeyRegistration {
            key_handle,
            public_key: websafe_encode(&message.public_key),
            attestation_certificate: Some(websafe_encode(&message.certificate)),
            counter: 0,
        })
    }

    /// Issue an authentication challenge bound to the candidate key set.
    ///
    /// An empty candidate set is allowed and produces a challenge no
    /// response can satisfy; verification then fails with
    /// [`ProtocolError::NoMatchingKey`].
    pub fn begin_authentication(
        &self,
        candidates: &[KeyRegistration],
    ) -> Result<AuthenticationChallenge> {
        let key_handles: Vec<String> = candidates.iter().map(|r| r.key_handle.clone()).collect();

        tracing::debug!(
            candidates = key_handles.len(),
            "issuing authentication challenge"
        );

        Ok(AuthenticationChallenge {
            version: U2F_VERSION.to_string(),
            app_id: self.app_id.clone(),
            challenge: self.new_nonce()?,
            key_handles,
        })
    }

    /// Verify an authentication response.
    ///
    /// Identifies which candidate signed, verifies the signature and the
    /// challenge/origin binding, and enforces a strictly increasing counter.
    /// On success returns a copy of the matched registration with the new
    /// counter; the caller persists it back to the record it came from.
    pub fn complete_authentication(
        &self,
        challenge: &AuthenticationChallenge,
        candidates: &[KeyRegistration],
        response: &SignResponse,
    ) -> Result<KeyRegistration> {
        if !challenge.key_handles.contains(&response.key_handle) {
            return Err(ProtocolError::NoMatchingKey);
        }
        let matched = candidates
            .iter()
            .find(|r| r.key_handle == response.key_handle)
            .ok_or(ProtocolError::NoMatchingKey)?;

        let (client_data, client_data_raw) = ClientData::decode(&response.client_data)?;
        client_data.expect_type(ClientData::TYPE_SIGN)?;
        self.check_nonce(&challenge.challenge, &client_data)?;
        self.check_origin(&client_data)?;

        let signature_data = websafe_decode(&response.signature_data)?;
        if signature_data.len() < 6 {
            return Err(ProtocolError::MalformedResponse(
                "signature data too short".into(),
            ));
        }
        let presence = signature_data[0];
        if presence & USER_PRESENCE_FLAG == 0 {
            return Err(ProtocolError::MalformedResponse(
                "user presence flag not set".into(),
            ));
        }
        let counter = u32::from_be_bytes([
            signature_data[1],
            signature_data[2],
            signature_data[3],
            signature_data[4],
        ]);
        let signature = &signature_data[5..];

        // Authentication signing base, verified under the registered key:
        // SHA256(appId) || presence || counterBE || SHA256(clientData)
        let mut base = Vec::with_capacity(32 + 1 + 4 + 32);
        base.extend_from_slice(&crypto::sha256(self.app_id.as_bytes()));
        base.push(presence);
        base.extend_from_slice(&counter.to_be_bytes());
        base.extend_from_slice(&crypto::sha256(&client_data_raw));

        let public_key = websafe_decode(&matched.public_key)
            .map_err(|_| ProtocolError::SignatureInvalid)?;
        crypto::verify_p256(&public_key, &base, signature)?;

        // Checked after the signature so a forged counter cannot probe the
        // stored value, and rejected regardless of signature validity.
        if counter <= matched.counter {
            tracing::warn!(
                key_handle = %matched.key_handle,
                stored = matched.counter,
                reported = counter,
                "counter did not increase; possible cloned authenticator"
            );
            return Err(ProtocolError::ReplayedCounter {
                stored: matched.counter,
                reported: counter,
            });
        }

        tracing::info!(key_handle = %matched.key_handle, counter, "authentication verified");

        let mut updated = matched.clone();
        updated.counter = counter;
        Ok(updated)
    }

    fn new_nonce(&self) -> Result<String> {
        Ok(websafe_encode(&crypto::random_bytes(CHALLENGE_BYTES)?))
    }

    /// The client data must answer the exact nonce that was issued; anything
    /// else means the response was produced for a different challenge.
    fn check_nonce(&self, issued: &str, client_data: &ClientData) -> Result<()> {
        if client_data.challenge == issued {
            Ok(())
        } else {
            Err(ProtocolError::SignatureInvalid)
        }
    }

    /// The origin recorded by the client must match our application
    /// identity. Clients that omit it are still bound through the appId
    /// hash inside the signing base.
    fn check_origin(&self, client_data: &ClientData) -> Result<()> {
        match &client_data.origin {
            Some(origin) if origin != &self.app_id => Err(ProtocolError::OriginMismatch {
                expected: self.app_id.clone(),
                got: origin.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Decoded raw registration message:
/// `0x05 || publicKey(65) || khLen || keyHandle || certificate || signature`.
struct RawRegistration {
    public_key: [u8; PUBLIC_KEY_BYTES],
    key_handle: Vec<u8>,
    certificate: Vec<u8>,
    signature: Vec<u8>,
}

impl RawRegistration {
    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 1 + PUBLIC_KEY_BYTES + 1 {
            return Err(ProtocolError::MalformedResponse(
                "registration message too short".into(),
            ));
        }
        if raw[0] != REGISTRATION_RESERVED_BYTE {
            return Err(ProtocolError::MalformedResponse(
                "bad reserved byte in registration message".into(),
            ));
        }

        let mut public_key = [0u8; PUBLIC_KEY_BYTES];
        public_key.copy_from_slice(&raw[1..1 + PUBLIC_KEY_BYTES]);
        if public_key[0] != 0x04 {
            return Err(ProtocolError::MalformedResponse(
                "public key is not an uncompressed point".into(),
            ));
        }

        let kh_len = raw[1 + PUBLIC_KEY_BYTES] as usize;
        let kh_start = 2 + PUBLIC_KEY_BYTES;
        let kh_end = kh_start + kh_len;
        if kh_len == 0 || raw.len() <= kh_end {
            return Err(ProtocolError::MalformedResponse(
                "truncated key handle in registration message".into(),
            ));
        }
        let key_handle = raw[kh_start..kh_end].to_vec();

        let rest = &raw[kh_end..];
        let cert_len = attestation::certificate_length(rest)?;
        let certificate = rest[..cert_len].to_vec();
        let signature = rest[cert_len..].to_vec();
        if signature.is_empty() {
            return Err(ProtocolError::MalformedResponse(
                "missing registration signature".into(),
            ));
        }

        Ok(Self {
            public_key,
            key_handle,
            certificate,
            signature,
        })
    }
}
