//! Stepguard Core - U2F challenge/response protocol engine
//!
//! This crate implements the server side of the U2F second-factor
//! protocol: issuing registration and authentication challenges, verifying
//! the cryptographic responses a hardware security key produces, and
//! detecting cloned keys through strictly increasing usage counters.
//!
//! It is deliberately stateless and I/O-free. Session binding, persistence
//! and framework integration live in the `stepguard-tfa` crate; the
//! elliptic-curve primitives come from `ring` and are treated as an
//! external, already-correct component.
//!
//! # Example
//!
//! ```
//! use stepguard_core::{SoftKey, U2fServer};
//!
//! # fn main() -> stepguard_core::Result<()> {
//! let server = U2fServer::new("https://example.com");
//!
//! // Registration ceremony (SoftKey stands in for the hardware key).
//! let key = SoftKey::generate()?;
//! let challenge = server.begin_registration(&[])?;
//! let response = key.register(&challenge)?;
//! let registration = server.complete_registration(&challenge, &response)?;
//!
//! // Authentication ceremony against the stored registration.
//! let mut key = key;
//! let candidates = vec![registration];
//! let challenge = server.begin_authentication(&candidates)?;
//! let response = key.sign(&challenge)?;
//! let updated = server.complete_authentication(&challenge, &candidates, &response)?;
//! assert!(updated.counter > candidates[0].counter);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod softkey;
pub mod u2f;

mod crypto;

// Re-export main types for convenience
pub use error::{ProtocolError, Result};
pub use softkey::SoftKey;
pub use u2f::{
    AuthenticationChallenge, ClientData, KeyRegistration, RegisterResponse,
    RegistrationChallenge, SignRequest, SignResponse, U2fServer, CHALLENGE_BYTES, U2F_VERSION,
};
