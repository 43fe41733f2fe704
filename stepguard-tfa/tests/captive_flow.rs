//! End-to-end enrollment and login flow through the method interface,
//! driven by an emulated security key against the in-memory store.

use std::sync::Arc;

use uuid::Uuid;

use stepguard_core::{AuthenticationChallenge, RegistrationChallenge, SoftKey};
use stepguard_tfa::{
    ChallengeStore, MemoryRecordStore, MethodRecord, MethodRegistry, RecordStore, SessionId,
    TfaError, TfaMethod, U2fConfig, U2fMethod, U2F_METHOD_NAME,
};

const APP_ID: &str = "https://example.com";

struct Harness {
    store: Arc<MemoryRecordStore>,
    method: U2fMethod,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = Arc::new(MemoryRecordStore::new());
    let challenges = Arc::new(ChallengeStore::new());
    let config = U2fConfig::new(APP_ID).unwrap();
    let method = U2fMethod::new(config, store.clone(), challenges);
    Harness { store, method }
}

fn batched(on: bool) -> Harness {
    let store = Arc::new(MemoryRecordStore::new());
    let challenges = Arc::new(ChallengeStore::new());
    let config = U2fConfig::new(APP_ID).unwrap().with_entry_batching(on);
    let method = U2fMethod::new(config, store.clone(), challenges);
    Harness { store, method }
}

/// Run the full setup ceremony for a fresh record, persisting the result.
async fn enroll(h: &Harness, session: &SessionId, user: Uuid, key: &SoftKey) -> MethodRecord {
    let mut record = MethodRecord::new(user, U2F_METHOD_NAME, "my key");
    h.store.insert(record.clone()).await.unwrap();

    let setup = h
        .method
        .begin_setup(session, &record)
        .await
        .unwrap()
        .expect("setup challenge for a u2f record");
    assert!(!setup.already_configured);

    let challenge: RegistrationChallenge = serde_json::from_value(setup.challenge).unwrap();
    let response = serde_json::to_string(&key.register(&challenge).unwrap()).unwrap();

    let options = h
        .method
        .save_setup(session, &record, user, Some(&response))
        .await
        .unwrap()
        .expect("options for a u2f record");
    assert_eq!(options.registrations.len(), 1);
    assert_eq!(options.registrations[0].key_handle, key.key_handle());
    assert_eq!(options.registrations[0].counter, 0);

    assert!(h.store.update_options(record.id, &options).await.unwrap());
    record.options = options.to_value();
    record
}

/// Obtain a captive challenge and answer it with the key.
async fn answer_captive(
    h: &Harness,
    session: &SessionId,
    record: &MethodRecord,
    key: &mut SoftKey,
) -> String {
    let captive = h
        .method
        .begin_captive(session, record)
        .await
        .unwrap()
        .expect("captive challenge for a u2f record");
    let requests = captive.payload.as_array().unwrap();
    assert!(!requests.is_empty());

    // Rebuild the challenge the way a client script would, from the first
    // sign request plus the full key-handle list.
    let challenge = AuthenticationChallenge {
        version: requests[0]["version"].as_str().unwrap().to_string(),
        app_id: requests[0]["appId"].as_str().unwrap().to_string(),
        challenge: requests[0]["challenge"].as_str().unwrap().to_string(),
        key_handles: requests
            .iter()
            .map(|r| r["keyHandle"].as_str().unwrap().to_string())
            .collect(),
    };
    serde_json::to_string(&key.sign(&challenge).unwrap()).unwrap()
}

#[tokio::test]
async fn enroll_then_authenticate() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let mut key = SoftKey::generate().unwrap();

    let record = enroll(&h, &session, user, &key).await;

    let response = answer_captive(&h, &session, &record, &mut key).await;
    assert!(h.method.validate(&session, &record, user, Some(&response)).await);

    // The counter advanced on the stored record.
    let stored = h.store.fetch(record.id).await.unwrap().unwrap();
    assert_eq!(stored.decode_options().registrations[0].counter, 1);
}

#[tokio::test]
async fn challenge_is_single_use() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let mut key = SoftKey::generate().unwrap();

    let record = enroll(&h, &session, user, &key).await;
    let response = answer_captive(&h, &session, &record, &mut key).await;
    assert!(h.method.validate(&session, &record, user, Some(&response)).await);

    // The same response again: the challenge was consumed.
    assert!(!h.method.validate(&session, &record, user, Some(&response)).await);

    // A fresh challenge does not resurrect the old response either.
    let _ = h.method.begin_captive(&session, &record).await.unwrap();
    assert!(!h.method.validate(&session, &record, user, Some(&response)).await);
}

#[tokio::test]
async fn replayed_counter_is_rejected() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let mut key = SoftKey::generate().unwrap();

    let record = enroll(&h, &session, user, &key).await;
    let response = answer_captive(&h, &session, &record, &mut key).await;
    assert!(h.method.validate(&session, &record, user, Some(&response)).await);

    // A cloned key stuck at the old counter signs a fresh challenge; the
    // signature is valid but the counter did not advance.
    let captive = h
        .method
        .begin_captive(&session, &record)
        .await
        .unwrap()
        .unwrap();
    let requests = captive.payload.as_array().unwrap().clone();
    let challenge = AuthenticationChallenge {
        version: requests[0]["version"].as_str().unwrap().to_string(),
        app_id: requests[0]["appId"].as_str().unwrap().to_string(),
        challenge: requests[0]["challenge"].as_str().unwrap().to_string(),
        key_handles: vec![key.key_handle()],
    };
    let stale = serde_json::to_string(&key.sign_with_counter(&challenge, 1).unwrap()).unwrap();
    assert!(!h.method.validate(&session, &record, user, Some(&stale)).await);

    let stored = h.store.fetch(record.id).await.unwrap().unwrap();
    assert_eq!(stored.decode_options().registrations[0].counter, 1);
}

#[tokio::test]
async fn validate_without_pending_challenge_fails() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let mut key = SoftKey::generate().unwrap();

    let record = enroll(&h, &session, user, &key).await;

    // Forge a response without ever asking for a captive challenge.
    let challenge = AuthenticationChallenge {
        version: "U2F_V2".into(),
        app_id: APP_ID.into(),
        challenge: "bm90LWEtcmVhbC1jaGFsbGVuZ2U".into(),
        key_handles: vec![key.key_handle()],
    };
    let response = serde_json::to_string(&key.sign(&challenge).unwrap()).unwrap();
    assert!(!h.method.validate(&session, &record, user, Some(&response)).await);
}

#[tokio::test]
async fn setup_response_without_challenge_is_rejected() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();

    let record = MethodRecord::new(user, U2F_METHOD_NAME, "my key");
    h.store.insert(record.clone()).await.unwrap();

    let result = h
        .method
        .save_setup(&session, &record, user, Some(r#"{"fake":"response"}"#))
        .await;
    assert!(matches!(result, Err(TfaError::ResponseWithoutChallenge)));
}

#[tokio::test]
async fn save_setup_with_nothing_pending_is_a_title_edit() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let key = SoftKey::generate().unwrap();

    let record = enroll(&h, &session, user, &key).await;

    // No pending challenge and no response: the existing options come back
    // untouched, so the host can save a renamed title.
    let options = h
        .method
        .save_setup(&session, &record, user, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(options.registrations.len(), 1);
    assert_eq!(options.registrations[0].key_handle, key.key_handle());
}

#[tokio::test]
async fn second_enrollment_excludes_the_first_key() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let key = SoftKey::generate().unwrap();

    enroll(&h, &session, user, &key).await;

    let second = MethodRecord::new(user, U2F_METHOD_NAME, "backup key");
    h.store.insert(second.clone()).await.unwrap();
    let setup = h
        .method
        .begin_setup(&session, &second)
        .await
        .unwrap()
        .unwrap();
    let challenge: RegistrationChallenge = serde_json::from_value(setup.challenge).unwrap();
    assert_eq!(challenge.excluded_key_handles, vec![key.key_handle()]);
}

#[tokio::test]
async fn already_configured_record_gets_no_new_challenge() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let key = SoftKey::generate().unwrap();

    let record = enroll(&h, &session, user, &key).await;
    let setup = h
        .method
        .begin_setup(&session, &record)
        .await
        .unwrap()
        .unwrap();
    assert!(setup.already_configured);
    assert!(setup.challenge.is_null());
}

#[tokio::test]
async fn batching_accepts_a_sibling_records_key() {
    let h = batched(true);
    let user = Uuid::new_v4();
    let key_a = SoftKey::generate().unwrap();
    let mut key_b = SoftKey::generate().unwrap();

    let record_a = enroll(&h, &SessionId::from("s-a"), user, &key_a).await;
    let record_b = enroll(&h, &SessionId::from("s-b"), user, &key_b).await;

    // Logging in against record A, but answering with key B.
    let session = SessionId::from("login");
    let captive = h
        .method
        .begin_captive(&session, &record_a)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(captive.payload.as_array().unwrap().len(), 2);

    let response = answer_captive(&h, &session, &record_a, &mut key_b).await;
    assert!(h.method.validate(&session, &record_a, user, Some(&response)).await);

    // The counter landed on key B's own record, not the selected one.
    let stored_b = h.store.fetch(record_b.id).await.unwrap().unwrap();
    assert_eq!(stored_b.decode_options().registrations[0].counter, 1);
    let stored_a = h.store.fetch(record_a.id).await.unwrap().unwrap();
    assert_eq!(stored_a.decode_options().registrations[0].counter, 0);
    assert_eq!(
        stored_a.decode_options().registrations[0].key_handle,
        key_a.key_handle()
    );
}

#[tokio::test]
async fn unbatched_login_rejects_a_sibling_records_key() {
    let h = batched(false);
    let user = Uuid::new_v4();
    let key_a = SoftKey::generate().unwrap();
    let mut key_b = SoftKey::generate().unwrap();

    let record_a = enroll(&h, &SessionId::from("s-a"), user, &key_a).await;
    enroll(&h, &SessionId::from("s-b"), user, &key_b).await;

    let session = SessionId::from("login");
    let captive = h
        .method
        .begin_captive(&session, &record_a)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(captive.payload.as_array().unwrap().len(), 1);

    // Key B is not in the candidate set, so its response cannot validate.
    let challenge = AuthenticationChallenge {
        version: "U2F_V2".into(),
        app_id: APP_ID.into(),
        challenge: captive.payload[0]["challenge"].as_str().unwrap().to_string(),
        key_handles: vec![key_b.key_handle()],
    };
    let response = serde_json::to_string(&key_b.sign(&challenge).unwrap()).unwrap();
    assert!(!h.method.validate(&session, &record_a, user, Some(&response)).await);
}

#[tokio::test]
async fn wrong_user_never_validates() {
    let h = harness();
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();
    let mut key = SoftKey::generate().unwrap();

    let record = enroll(&h, &session, user, &key).await;
    let response = answer_captive(&h, &session, &record, &mut key).await;
    assert!(!h
        .method
        .validate(&session, &record, Uuid::new_v4(), Some(&response))
        .await);
}

#[tokio::test]
async fn foreign_method_records_are_not_ours() {
    let h = harness();
    let session = SessionId::from("session-1");
    let record = MethodRecord::new(Uuid::new_v4(), "totp", "phone");

    assert!(h.method.begin_setup(&session, &record).await.unwrap().is_none());
    assert!(h.method.begin_captive(&session, &record).await.unwrap().is_none());
    assert!(!h.method.validate(&session, &record, record.user_id, Some("{}")).await);
}

#[tokio::test]
async fn disabled_method_is_invisible_and_inert() {
    let store = Arc::new(MemoryRecordStore::new());
    let challenges = Arc::new(ChallengeStore::new());
    let method = U2fMethod::disabled(store, challenges);
    assert!(!method.is_enabled());
    assert!(method.describe().is_none());

    let record = MethodRecord::new(Uuid::new_v4(), U2F_METHOD_NAME, "my key");
    let session = SessionId::from("session-1");
    assert!(method.begin_setup(&session, &record).await.unwrap().is_none());
    assert!(!method.validate(&session, &record, record.user_id, Some("{}")).await);
}

#[tokio::test]
async fn registry_dispatches_by_record_method() {
    let session = SessionId::from("session-1");
    let user = Uuid::new_v4();

    let store = Arc::new(MemoryRecordStore::new());
    let challenges = Arc::new(ChallengeStore::new());
    let mut registry = MethodRegistry::new();
    registry.register(Arc::new(U2fMethod::new(
        U2fConfig::new(APP_ID).unwrap(),
        store,
        challenges,
    )));

    let descriptors = registry.descriptors();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].name, U2F_METHOD_NAME);

    // A record naming an unregistered method is inert.
    let unknown = MethodRecord::new(user, "totp", "phone");
    assert!(registry.begin_setup(&session, &unknown).await.unwrap().is_none());
    assert!(!registry.validate(&session, &unknown, user, Some("{}")).await);
}
