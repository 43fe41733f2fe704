//! Error types for the method framework.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by method adapters.
#[derive(Debug, Error)]
pub enum TfaError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Protocol(#[from] stepguard_core::ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A setup response arrived with no pending challenge for the session.
    /// Legitimate clients always obtain a challenge first, so this is
    /// treated as a forged or replayed request.
    #[error("a response was submitted without a pending challenge")]
    ResponseWithoutChallenge,
}
