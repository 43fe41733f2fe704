//! A software U2F authenticator.
//!
//! `SoftKey` plays the device side of the protocol in tests and demos: it
//! answers registration challenges with a synthetic attestation and signs
//! authentication challenges with its own monotonically increasing counter.
//! It is a test double for the external hardware component, not an
//! emulation of any real authenticator.

use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

use crate::crypto;
use crate::error::{ProtocolError, Result};
use crate::u2f::types::{
    websafe_encode, AuthenticationChallenge, ClientData, RegisterResponse, RegistrationChallenge,
    SignResponse,
};

/// Length of the synthetic key handle issued per generated key.
const KEY_HANDLE_BYTES: usize = 32;

/// A single software security key holding one P-256 key pair.
pub struct SoftKey {
    key_pair: EcdsaKeyPair,
    key_handle: Vec<u8>,
    counter: u32,
    rng: SystemRandom,
}

impl SoftKey {
    /// Generate a fresh key with a random key handle and counter 0.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|_| ProtocolError::Rng)?;
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|_| ProtocolError::Rng)?;
        let key_handle = crypto::random_bytes(KEY_HANDLE_BYTES)?;

        Ok(Self {
            key_pair,
            key_handle,
            counter: 0,
            rng,
        })
    }

    /// The key handle, base64url encoded as it appears on the wire.
    pub fn key_handle(&self) -> String {
        websafe_encode(&self.key_handle)
    }

    /// The uncompressed public key, base64url encoded.
    pub fn public_key(&self) -> String {
        websafe_encode(self.key_pair.public_key().as_ref())
    }

    /// Current usage counter.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Answer a registration challenge.
    pub fn register(&self, challenge: &RegistrationChallenge) -> Result<RegisterResponse> {
        let client_data_raw = client_data(
            ClientData::TYPE_REGISTER,
            &challenge.challenge,
            &challenge.app_id,
        )?;
        let public_key = self.key_pair.public_key().as_ref().to_vec();
        let certificate = self.attestation_certificate();

        // 0x00 || SHA256(appId) || SHA256(clientData) || keyHandle || publicKey
        let mut base = Vec::with_capacity(1 + 64 + self.key_handle.len() + public_key.len());
        base.push(0x00);
        base.extend_from_slice(&crypto::sha256(challenge.app_id.as_bytes()));
        base.extend_from_slice(&crypto::sha256(&client_data_raw));
        base.extend_from_slice(&self.key_handle);
        base.extend_from_slice(&public_key);
        let signature = self.sign_base(&base)?;

        let mut message = Vec::new();
        message.push(0x05);
        message.extend_from_slice(&public_key);
        message.push(self.key_handle.len() as u8);
        message.extend_from_slice(&self.key_handle);
        message.extend_from_slice(&certificate);
        message.extend_from_slice(&signature);

        Ok(RegisterResponse {
            client_data: websafe_encode(&client_data_raw),
            registration_data: websafe_encode(&message),
        })
    }

    /// Answer an authentication challenge, bumping the internal counter.
    pub fn sign(&mut self, challenge: &AuthenticationChallenge) -> Result<SignResponse> {
        self.counter += 1;
        self.sign_with_counter(challenge, self.counter)
    }

    /// Answer an authentication challenge reporting an explicit counter
    /// value. Lets tests stage replayed and out-of-order counters.
    pub fn sign_with_counter(
        &self,
        challenge: &AuthenticationChallenge,
        counter: u32,
    ) -> Result<SignResponse> {
        let client_data_raw = client_data(
            ClientData::TYPE_SIGN,
            &challenge.challenge,
            &challenge.app_id,
        )?;

        // SHA256(appId) || presence || counterBE || SHA256(clientData)
        let mut base = Vec::with_capacity(32 + 1 + 4 + 32);
        base.extend_from_slice(&crypto::sha256(challenge.app_id.as_bytes()));
        base.push(0x01);
        base.extend_from_slice(&counter.to_be_bytes());
        base.extend_from_slice(&crypto::sha256(&client_data_raw));
        let signature = self.sign_base(&base)?;

        let mut signature_data = Vec::with_capacity(5 + signature.len());
        signature_data.push(0x01);
        signature_data.extend_from_slice(&counter.to_be_bytes());
        signature_data.extend_from_slice(&signature);

        Ok(SignResponse {
            client_data: websafe_encode(&client_data_raw),
            signature_data: websafe_encode(&signature_data),
            key_handle: self.key_handle(),
        })
    }

    fn sign_base(&self, base: &[u8]) -> Result<Vec<u8>> {
        self.key_pair
            .sign(&self.rng, base)
            .map(|sig| sig.as_ref().to_vec())
            .map_err(|_| ProtocolError::Rng)
    }

    /// A minimal stand-in for the device's attestation certificate: a DER
    /// SEQUENCE wrapping filler plus the subjectPublicKey BIT STRING the
    /// server extracts the signing key from.
    fn attestation_certificate(&self) -> Vec<u8> {
        let public_key = self.key_pair.public_key().as_ref();

        let mut body = Vec::new();
        body.extend_from_slice(b"stepguard softkey attestation");
        body.extend_from_slice(&[0x03, 0x42, 0x00]);
        body.extend_from_slice(public_key);

        let mut certificate = vec![
            0x30,
            0x82,
            (body.len() >> 8) as u8,
            (body.len() & 0xff) as u8,
        ];
        certificate.extend_from_slice(&body);
        certificate
    }
}

impl std::fmt::Debug for SoftKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftKey")
            .field("key_handle", &self.key_handle())
            .field("counter", &self.counter)
            .finish()
    }
}

fn client_data(typ: &str, challenge: &str, origin: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(&ClientData {
        typ: typ.to_string(),
        challenge: challenge.to_string(),
        origin: Some(origin.to_string()),
    })
    .map_err(|e| ProtocolError::MalformedResponse(format!("client data encode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_distinct() {
        let a = SoftKey::generate().unwrap();
        let b = SoftKey::generate().unwrap();
        assert_ne!(a.key_handle(), b.key_handle());
        assert_ne!(a.public_key(), b.public_key());
        assert_eq!(a.counter(), 0);
    }

    #[test]
    fn attestation_certificate_embeds_public_key() {
        let key = SoftKey::generate().unwrap();
        let cert = key.attestation_certificate();
        let embedded = crate::u2f::attestation::public_key(&cert).unwrap();
        assert_eq!(websafe_encode(&embedded), key.public_key());
        assert_eq!(
            crate::u2f::attestation::certificate_length(&cert).unwrap(),
            cert.len()
        );
    }

    #[test]
    fn signing_increments_counter() {
        let mut key = SoftKey::generate().unwrap();
        let challenge = AuthenticationChallenge {
            version: crate::u2f::types::U2F_VERSION.into(),
            app_id: "https://example.com".into(),
            challenge: "bm9uY2U".into(),
            key_handles: vec![key.key_handle()],
        };
        key.sign(&challenge).unwrap();
        key.sign(&challenge).unwrap();
        assert_eq!(key.counter(), 2);
    }
}
