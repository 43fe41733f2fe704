//! The pluggable method interface and its registry.
//!
//! A [`TfaMethod`] is one way a user can prove a second factor. The
//! framework talks to methods exclusively through this trait: it asks for
//! setup material when the user enrolls, for a captive challenge when the
//! user logs in, and for a verdict on the submitted response. Methods are
//! keyed by name in a [`MethodRegistry`], which dispatches on each
//! record's `method` field and treats unknown names as inert.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::TfaError;
use crate::record::{MethodOptions, MethodRecord};
use crate::session::SessionId;

/// Static description of a method, used to build enrollment menus.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDescriptor {
    /// Stable name stored in method records.
    pub name: String,
    /// Human-readable display name.
    pub display: String,
    /// Whether a user may enroll more than one instance.
    pub allow_multiple: bool,
    /// Whether the user may remove an enrolled instance.
    pub can_disable: bool,
    /// Whether authentication considers the union of the user's
    /// same-method records rather than only the selected one.
    pub allow_entry_batching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
}

/// Material the host renders when a user enrolls a method instance.
///
/// `challenge` is an opaque payload for the client-side authenticator
/// script; the framework never interprets it.
#[derive(Debug, Clone, Serialize)]
pub struct SetupChallenge {
    pub instructions: String,
    /// Set when the record already holds an enrollment, in which case the
    /// challenge is absent and only the title can be edited.
    pub already_configured: bool,
    pub challenge: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
}

/// Material the host renders on the captive second-factor login page.
#[derive(Debug, Clone, Serialize)]
pub struct CaptiveChallenge {
    pub instructions: String,
    /// Opaque payload for the client-side authenticator script.
    pub payload: Value,
    pub allow_entry_batching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
}

/// One second-factor method.
///
/// Every operation receives the record it should act on and returns
/// `Ok(None)` (or `false` for [`validate`](Self::validate)) when the
/// record belongs to a different method, so implementations compose
/// safely in a registry.
#[async_trait]
pub trait TfaMethod: Send + Sync {
    /// Stable method name, matched against `MethodRecord::method`.
    fn method_name(&self) -> &str;

    /// Describe the method for enrollment menus. `None` hides the method,
    /// which is how an unconfigured or unusable method stays invisible.
    fn describe(&self) -> Option<MethodDescriptor>;

    /// Produce the enrollment challenge for `record`.
    async fn begin_setup(
        &self,
        session: &SessionId,
        record: &MethodRecord,
    ) -> Result<Option<SetupChallenge>, TfaError>;

    /// Consume the enrollment response and return the options to persist
    /// on the record. A missing response with no pending challenge is a
    /// title-only edit and returns the options unchanged.
    async fn save_setup(
        &self,
        session: &SessionId,
        record: &MethodRecord,
        user_id: Uuid,
        response: Option<&str>,
    ) -> Result<Option<MethodOptions>, TfaError>;

    /// Produce the login challenge for `record`.
    async fn begin_captive(
        &self,
        session: &SessionId,
        record: &MethodRecord,
    ) -> Result<Option<CaptiveChallenge>, TfaError>;

    /// Check a login response. Any failure, including internal errors,
    /// yields `false`; authentication never fails open.
    async fn validate(
        &self,
        session: &SessionId,
        record: &MethodRecord,
        user_id: Uuid,
        response: Option<&str>,
    ) -> bool;
}

/// Name-keyed collection of methods.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn TfaMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: Arc<dyn TfaMethod>) {
        self.methods.insert(method.method_name().to_string(), method);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TfaMethod>> {
        self.methods.get(name)
    }

    /// Descriptors of every visible method.
    pub fn descriptors(&self) -> Vec<MethodDescriptor> {
        let mut descriptors: Vec<MethodDescriptor> = self
            .methods
            .values()
            .filter_map(|method| method.describe())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Dispatch [`TfaMethod::begin_setup`] to the record's method.
    pub async fn begin_setup(
        &self,
        session: &SessionId,
        record: &MethodRecord,
    ) -> Result<Option<SetupChallenge>, TfaError> {
        match self.methods.get(&record.method) {
            Some(method) => method.begin_setup(session, record).await,
            None => Ok(None),
        }
    }

    /// Dispatch [`TfaMethod::save_setup`] to the record's method.
    pub async fn save_setup(
        &self,
        session: &SessionId,
        record: &MethodRecord,
        user_id: Uuid,
        response: Option<&str>,
    ) -> Result<Option<MethodOptions>, TfaError> {
        match self.methods.get(&record.method) {
            Some(method) => method.save_setup(session, record, user_id, response).await,
            None => Ok(None),
        }
    }

    /// Dispatch [`TfaMethod::begin_captive`] to the record's method.
    pub async fn begin_captive(
        &self,
        session: &SessionId,
        record: &MethodRecord,
    ) -> Result<Option<CaptiveChallenge>, TfaError> {
        match self.methods.get(&record.method) {
            Some(method) => method.begin_captive(session, record).await,
            None => Ok(None),
        }
    }

    /// Dispatch [`TfaMethod::validate`] to the record's method. A record
    /// naming an unregistered method never validates.
    pub async fn validate(
        &self,
        session: &SessionId,
        record: &MethodRecord,
        user_id: Uuid,
        response: Option<&str>,
    ) -> bool {
        match self.methods.get(&record.method) {
            Some(method) => method.validate(session, record, user_id, response).await,
            None => {
                tracing::debug!(method = %record.method, "no handler registered for method");
                false
            }
        }
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
