//! The U2F security-key method adapter.
//!
//! Bridges the [`TfaMethod`] interface to the protocol engine in
//! `stepguard-core`: challenges issued here are parked in the session
//! [`ChallengeStore`] and consumed exactly once when the response comes
//! back. The adapter owns no key material; registrations live in the
//! record catalog and counters are written back through it.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use stepguard_core::{
    AuthenticationChallenge, ProtocolError, RegisterResponse, RegistrationChallenge, SignResponse,
    U2fServer,
};

use crate::config::U2fConfig;
use crate::error::TfaError;
use crate::method::{CaptiveChallenge, MethodDescriptor, SetupChallenge, TfaMethod};
use crate::record::{MethodOptions, MethodRecord};
use crate::resolver;
use crate::session::{ChallengePurpose, ChallengeStore, SessionId};
use crate::storage::{RecordStore, RegistrationCatalog};

/// Method discriminator stored in U2F method records.
pub const U2F_METHOD_NAME: &str = "u2f";

const DISPLAY_NAME: &str = "Hardware security key (U2F)";

const SETUP_INSTRUCTIONS: &str =
    "Insert your security key and touch its button or gold disk when it flashes.";
const ALREADY_CONFIGURED_INSTRUCTIONS: &str =
    "A security key is already registered on this record. You can only change its title.";
const CAPTIVE_INSTRUCTIONS: &str =
    "Insert your security key and touch its button or gold disk when it flashes.";

/// U2F security-key second factor.
///
/// Constructed in a disabled state when its configuration is unusable;
/// a disabled method hides itself from menus and treats every operation
/// as not applicable.
pub struct U2fMethod {
    catalog: RegistrationCatalog,
    challenges: Arc<ChallengeStore>,
    inner: Option<Enabled>,
}

struct Enabled {
    config: U2fConfig,
    engine: U2fServer,
}

impl U2fMethod {
    pub fn new(
        config: U2fConfig,
        store: Arc<dyn RecordStore>,
        challenges: Arc<ChallengeStore>,
    ) -> Self {
        let engine = U2fServer::new(config.app_id());
        Self {
            catalog: RegistrationCatalog::new(store),
            challenges,
            inner: Some(Enabled { config, engine }),
        }
    }

    /// Build from [`U2fConfig::from_env`]. An unusable configuration logs a
    /// warning and yields a disabled method instead of failing the host.
    pub fn from_env(store: Arc<dyn RecordStore>, challenges: Arc<ChallengeStore>) -> Self {
        match U2fConfig::from_env() {
            Ok(config) => Self::new(config, store, challenges),
            Err(e) => {
                tracing::warn!(error = %e, "U2F method disabled: configuration unusable");
                Self::disabled(store, challenges)
            }
        }
    }

    /// A method that stays invisible and inert.
    pub fn disabled(store: Arc<dyn RecordStore>, challenges: Arc<ChallengeStore>) -> Self {
        Self {
            catalog: RegistrationCatalog::new(store),
            challenges,
            inner: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// The enabled state, but only when `record` is ours.
    fn applicable(&self, record: &MethodRecord) -> Option<&Enabled> {
        let inner = self.inner.as_ref()?;
        (record.method == U2F_METHOD_NAME).then_some(inner)
    }
}

#[async_trait]
impl TfaMethod for U2fMethod {
    fn method_name(&self) -> &str {
        U2F_METHOD_NAME
    }

    fn describe(&self) -> Option<MethodDescriptor> {
        let inner = self.inner.as_ref()?;
        Some(MethodDescriptor {
            name: U2F_METHOD_NAME.to_string(),
            display: DISPLAY_NAME.to_string(),
            allow_multiple: true,
            can_disable: true,
            allow_entry_batching: inner.config.allow_entry_batching,
            help_url: inner.config.help_url.clone(),
        })
    }

    async fn begin_setup(
        &self,
        session: &SessionId,
        record: &MethodRecord,
    ) -> Result<Option<SetupChallenge>, TfaError> {
        let Some(inner) = self.applicable(record) else {
            return Ok(None);
        };

        let already_configured = !record.decode_options().is_empty();
        if already_configured {
            // Only the title can change; no challenge is issued.
            return Ok(Some(SetupChallenge {
                instructions: ALREADY_CONFIGURED_INSTRUCTIONS.to_string(),
                already_configured: true,
                challenge: serde_json::Value::Null,
                help_url: inner.config.help_url.clone(),
            }));
        }

        // Exclude every key the user already bound, on any record, so the
        // same physical key cannot be enrolled twice.
        let existing: Vec<_> = self
            .catalog
            .registrations_for_user(record.user_id, U2F_METHOD_NAME)
            .await?
            .into_values()
            .collect();
        let challenge = inner.engine.begin_registration(&existing)?;

        self.challenges.put(
            session,
            ChallengePurpose::Registration,
            serde_json::to_string(&challenge)
                .map_err(|e| TfaError::Serialization(e.to_string()))?,
        );

        Ok(Some(SetupChallenge {
            instructions: SETUP_INSTRUCTIONS.to_string(),
            already_configured: false,
            challenge: serde_json::to_value(&challenge)
                .map_err(|e| TfaError::Serialization(e.to_string()))?,
            help_url: inner.config.help_url.clone(),
        }))
    }

    async fn save_setup(
        &self,
        session: &SessionId,
        record: &MethodRecord,
        user_id: Uuid,
        response: Option<&str>,
    ) -> Result<Option<MethodOptions>, TfaError> {
        let Some(inner) = self.applicable(record) else {
            return Ok(None);
        };
        if record.user_id != user_id {
            return Ok(None);
        }

        let mut options = record.decode_options();
        let pending = self.challenges.take(session, ChallengePurpose::Registration);
        let response = response.map(str::trim).filter(|s| !s.is_empty());

        let Some(pending) = pending else {
            return match response {
                // No challenge, no response: a title-only edit.
                None => Ok(Some(options)),
                Some(_) => {
                    tracing::warn!(
                        record_id = %record.id,
                        "setup response with no pending challenge; rejecting"
                    );
                    Err(TfaError::ResponseWithoutChallenge)
                }
            };
        };

        let challenge: RegistrationChallenge = serde_json::from_str(&pending)
            .map_err(|_| TfaError::Protocol(ProtocolError::MalformedChallenge))?;
        let Some(code) = response else {
            return Err(TfaError::Protocol(ProtocolError::MalformedResponse(
                "no registration response submitted".into(),
            )));
        };
        let register_response: RegisterResponse = serde_json::from_str(code).map_err(|e| {
            TfaError::Protocol(ProtocolError::MalformedResponse(format!(
                "registration response: {e}"
            )))
        })?;

        let registration = inner
            .engine
            .complete_registration(&challenge, &register_response)?;
        options.registrations.push(registration);
        Ok(Some(options))
    }

    async fn begin_captive(
        &self,
        session: &SessionId,
        record: &MethodRecord,
    ) -> Result<Option<CaptiveChallenge>, TfaError> {
        let Some(inner) = self.applicable(record) else {
            return Ok(None);
        };

        let candidates =
            resolver::resolve_candidates(&self.catalog, record, inner.config.allow_entry_batching)
                .await;
        let challenge = inner
            .engine
            .begin_authentication(&resolver::registrations(&candidates))?;

        self.challenges.put(
            session,
            ChallengePurpose::Authentication,
            serde_json::to_string(&challenge)
                .map_err(|e| TfaError::Serialization(e.to_string()))?,
        );

        Ok(Some(CaptiveChallenge {
            instructions: CAPTIVE_INSTRUCTIONS.to_string(),
            payload: serde_json::to_value(challenge.sign_requests())
                .map_err(|e| TfaError::Serialization(e.to_string()))?,
            allow_entry_batching: inner.config.allow_entry_batching,
            help_url: inner.config.help_url.clone(),
        }))
    }

    async fn validate(
        &self,
        session: &SessionId,
        record: &MethodRecord,
        user_id: Uuid,
        response: Option<&str>,
    ) -> bool {
        let Some(inner) = self.applicable(record) else {
            return false;
        };
        if record.user_id != user_id {
            tracing::debug!(record_id = %record.id, "record belongs to a different user");
            return false;
        }
        let Some(code) = response.map(str::trim).filter(|s| !s.is_empty()) else {
            return false;
        };
        let Ok(sign_response) = serde_json::from_str::<SignResponse>(code) else {
            tracing::debug!("undecodable authentication response");
            return false;
        };

        // The challenge is consumed before verification, so a failed
        // attempt cannot be retried against the same nonce.
        let Some(stored) = self.challenges.take(session, ChallengePurpose::Authentication) else {
            tracing::warn!(record_id = %record.id, "no pending authentication challenge");
            return false;
        };
        let Ok(challenge) = serde_json::from_str::<AuthenticationChallenge>(&stored) else {
            return false;
        };

        let candidates =
            resolver::resolve_candidates(&self.catalog, record, inner.config.allow_entry_batching)
                .await;
        let updated = match inner.engine.complete_authentication(
            &challenge,
            &resolver::registrations(&candidates),
            &sign_response,
        ) {
            Ok(updated) => updated,
            Err(e) => {
                tracing::debug!(record_id = %record.id, error = %e, "authentication rejected");
                return false;
            }
        };

        // Write the counter back to the record the signing key came from,
        // which under entry batching need not be the selected record.
        let Some(source) = candidates
            .iter()
            .find(|c| c.registration.key_handle == updated.key_handle)
        else {
            return false;
        };
        match self
            .catalog
            .persist_counter_update(source.record_id, &updated)
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::error!(record_id = %source.record_id, error = %e, "counter write-back failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for U2fMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("U2fMethod")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
