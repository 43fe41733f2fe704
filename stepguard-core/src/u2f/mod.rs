//! U2F challenge/response protocol.
//!
//! - `engine`: the stateless verifier ([`U2fServer`])
//! - `types`: wire and stored data types
//! - `attestation`: minimal DER handling for the attestation certificate

pub(crate) mod attestation;
mod engine;
pub(crate) mod types;

pub use engine::U2fServer;
pub use types::{
    AuthenticationChallenge, ClientData, KeyRegistration, RegisterResponse,
    RegistrationChallenge, SignRequest, SignResponse, CHALLENGE_BYTES, U2F_VERSION,
};
