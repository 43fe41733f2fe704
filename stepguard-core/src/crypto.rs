//! Thin wrappers over the cryptographic primitives.
//!
//! The engine treats the elliptic-curve library as an already-correct
//! external component; everything protocol-specific (signing bases, message
//! layouts, counters) lives in [`crate::u2f`].

use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};

use crate::error::{ProtocolError, Result};

/// SHA-256 digest of `data`.
pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let d = digest::digest(&digest::SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

/// `len` cryptographically secure random bytes.
pub(crate) fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf).map_err(|_| ProtocolError::Rng)?;
    Ok(buf)
}

/// Verify an ASN.1 DER ECDSA P-256/SHA-256 signature over `message`.
///
/// `public_key` is the X9.62 uncompressed point (65 bytes, leading 0x04).
pub(crate) fn verify_p256(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key)
        .verify(message, signature)
        .map_err(|_| ProtocolError::SignatureInvalid)
}
