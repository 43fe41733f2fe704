//! Pluggable second-factor framework with a U2F security-key method.
//!
//! `stepguard-tfa` hosts the machinery around the protocol engine in
//! [`stepguard-core`](stepguard_core): persisted method records, the
//! session challenge store, candidate resolution across a user's records,
//! and the [`TfaMethod`] trait that lets a host application drive any
//! second factor through one interface.
//!
//! A host wires it together like this: pick a [`RecordStore`] backend,
//! share one [`ChallengeStore`], register a [`U2fMethod`] in a
//! [`MethodRegistry`], and dispatch setup/captive/validate calls to the
//! registry with the record the user selected.

pub mod config;
pub mod error;
pub mod method;
pub mod record;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod u2f_method;

pub use config::{ConfigError, U2fConfig};
pub use error::TfaError;
pub use method::{CaptiveChallenge, MethodDescriptor, MethodRegistry, SetupChallenge, TfaMethod};
pub use record::{MethodOptions, MethodRecord};
pub use resolver::Candidate;
pub use session::{ChallengePurpose, ChallengeStore, SessionId};
pub use storage::{
    MemoryRecordStore, PostgresRecordStore, RecordStore, RegistrationCatalog, StorageError,
};
pub use u2f_method::{U2fMethod, U2F_METHOD_NAME};
