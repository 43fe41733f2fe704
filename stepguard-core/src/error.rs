use thiserror::Error;

/// Verification errors raised by the protocol engine.
///
/// Every variant is terminal for the current attempt; the caller must issue
/// a fresh challenge before retrying. Callers facing an end user should
/// collapse these to a plain failure so the reason does not leak.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The challenge is missing, expired or could not be decoded.
    #[error("challenge is missing or malformed")]
    MalformedChallenge,

    /// The submitted response could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The response references a key handle outside the challenged set.
    #[error("response does not match any challenged key handle")]
    NoMatchingKey,

    /// The cryptographic signature did not verify, or the response does not
    /// account for the issued challenge nonce.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// The reported usage counter did not increase. A valid signature with a
    /// stale counter indicates a cloned or replayed authenticator.
    #[error("counter did not increase (stored {stored}, reported {reported})")]
    ReplayedCounter { stored: u32, reported: u32 },

    /// The client data was produced for a different origin.
    #[error("origin mismatch: expected {expected}, got {got}")]
    OriginMismatch { expected: String, got: String },

    /// The system random generator failed while producing a nonce.
    #[error("random generator failure")]
    Rng,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
