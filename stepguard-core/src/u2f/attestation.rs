//! Minimal DER handling for the attestation certificate.
//!
//! The raw registration message carries the certificate and the signature
//! back to back, so we need the certificate's outer TLV length to split
//! them, and the embedded P-256 public key to check the registration
//! signature. Certificate chain semantics are out of scope; only the
//! signing key is extracted.

use crate::error::{ProtocolError, Result};
use crate::u2f::types::PUBLIC_KEY_BYTES;

/// Total encoded length (header + content) of the DER SEQUENCE starting at
/// the beginning of `der`.
pub(crate) fn certificate_length(der: &[u8]) -> Result<usize> {
    if der.len() < 2 || der[0] != 0x30 {
        return Err(ProtocolError::MalformedResponse(
            "attestation certificate is not a DER sequence".into(),
        ));
    }

    let first = der[1];
    let (header_len, content_len) = if first & 0x80 == 0 {
        (2, first as usize)
    } else {
        let num_bytes = (first & 0x7f) as usize;
        if num_bytes == 0 || num_bytes > 4 || der.len() < 2 + num_bytes {
            return Err(ProtocolError::MalformedResponse(
                "invalid DER length in attestation certificate".into(),
            ));
        }
        let mut len = 0usize;
        for &b in &der[2..2 + num_bytes] {
            len = (len << 8) | b as usize;
        }
        (2 + num_bytes, len)
    };

    let total = header_len
        .checked_add(content_len)
        .filter(|&t| t <= der.len())
        .ok_or_else(|| {
            ProtocolError::MalformedResponse("attestation certificate is truncated".into())
        })?;
    Ok(total)
}

/// Extract the uncompressed P-256 subject public key from the certificate.
///
/// The key sits in a BIT STRING of the form `03 42 00 04 || x || y`; we
/// locate that pattern instead of walking the full X.509 structure.
pub(crate) fn public_key(cert: &[u8]) -> Result<[u8; PUBLIC_KEY_BYTES]> {
    const MARKER: [u8; 4] = [0x03, 0x42, 0x00, 0x04];

    let start = cert
        .windows(MARKER.len())
        .position(|w| w == MARKER)
        .ok_or_else(|| {
            ProtocolError::MalformedResponse(
                "no P-256 public key in attestation certificate".into(),
            )
        })?;

    let point = cert
        .get(start + 3..start + 3 + PUBLIC_KEY_BYTES)
        .ok_or_else(|| {
            ProtocolError::MalformedResponse("attestation certificate is truncated".into())
        })?;

    let mut out = [0u8; PUBLIC_KEY_BYTES];
    out.copy_from_slice(point);
    Ok(out)
}
