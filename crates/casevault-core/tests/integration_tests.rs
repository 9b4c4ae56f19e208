//! Casevault Core Integration Tests

use casevault_core::audit::AuditTrail;
use casevault_core::auth::AuthenticationService;
use casevault_core::compliance::{ComplianceOrchestrator, ERASURE_CONFIRMATION};
use casevault_core::consent::{ConsentStore, ConsentType};
use casevault_core::crypto::{FieldCipher, KeyManager, MasterKey};
use casevault_core::records::{ChatRole, RecordStore};
use casevault_core::storage::Database;
use casevault_core::Error;

struct TestHarness {
    db: Database,
    trail: AuditTrail,
    auth: AuthenticationService,
    records: RecordStore,
    consents: ConsentStore,
    compliance: ComplianceOrchestrator,
}

async fn harness() -> TestHarness {
    let db = Database::in_memory().await.expect("test database");
    let trail = AuditTrail::new(db.pool().clone());
    let auth = AuthenticationService::new(db.pool().clone(), trail.clone());
    let cipher = FieldCipher::new(KeyManager::new(MasterKey::generate()));
    let records = RecordStore::new(db.pool().clone(), cipher, trail.clone());
    let consents = ConsentStore::new(db.pool().clone(), trail.clone());
    let compliance = ComplianceOrchestrator::new(
        db.pool().clone(),
        records.clone(),
        consents.clone(),
        trail.clone(),
    );
    TestHarness {
        db,
        trail,
        auth,
        records,
        consents,
        compliance,
    }
}

#[tokio::test]
async fn test_full_data_lifecycle() {
    let h = harness().await;

    // Register and log in.
    let user_id = h.auth.register("alice", "GoodPass123!$").await.unwrap();
    let session_id = h
        .auth
        .login("alice", "GoodPass123!$", Some("127.0.0.1".into()), None)
        .await
        .unwrap();
    let session = h.auth.validate_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.user_id, user_id);

    // Store encrypted client material.
    let case = h
        .records
        .create_case(user_id, "Estate of Doe", Some("contested inheritance"))
        .await
        .unwrap();
    h.records.add_note(case.id, user_id, "secret").await.unwrap();
    h.records
        .add_evidence(case.id, user_id, "exhibit-a", "handwritten codicil", Some("scan"))
        .await
        .unwrap();
    h.records
        .add_chat_message(user_id, ChatRole::User, "is the will valid?")
        .await
        .unwrap();

    // Raw storage never holds the plaintext.
    let (raw_note,): (String,) = sqlx::query_as("SELECT body FROM case_notes LIMIT 1")
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert!(!raw_note.contains("secret"));

    // Export returns it decrypted.
    h.consents
        .grant(user_id, ConsentType::DataProcessing)
        .await
        .unwrap();
    let export = h.compliance.export_user_data(user_id).await.unwrap();
    assert_eq!(export.cases[0].notes[0].body, "secret");
    assert_eq!(export.cases[0].evidence[0].description, "handwritten codicil");
    assert_eq!(export.account.as_ref().unwrap().username, "alice");

    // Erase with consent and confirmation.
    h.consents
        .grant(user_id, ConsentType::DataErasureRequest)
        .await
        .unwrap();
    let report = h
        .compliance
        .delete_user_data(user_id, ERASURE_CONFIRMATION, "account closure")
        .await
        .unwrap();
    assert!(report.total_deleted() >= 5);
    assert_eq!(report.preserved_consents, 2);

    // PII is gone, the record of the erasure is not.
    assert!(h.records.cases_for_user(user_id).await.unwrap().is_empty());
    assert!(h.records.evidence_for_user(user_id).await.unwrap().is_empty());
    assert!(h.records.chat_for_user(user_id).await.unwrap().is_empty());
    assert!(h.auth.find_by_user_id(user_id).await.unwrap().is_none());

    let erase_entries = h.trail.entries_by_event_type("user.erase").await.unwrap();
    assert_eq!(erase_entries.len(), 1);
    assert!(erase_entries[0].success);
    assert_eq!(h.consents.count_for_user(user_id).await.unwrap(), 2);

    // The whole trail still verifies end to end.
    let verification = h.trail.verify_chain(None).await.unwrap();
    assert!(verification.valid);
    assert!(verification.entries_checked >= 8);
}

#[tokio::test]
async fn test_erasure_without_consent_deletes_nothing() {
    let h = harness().await;

    let user_id = h.auth.register("bob", "GoodPass123!$").await.unwrap();
    let case = h.records.create_case(user_id, "Lease", None).await.unwrap();
    h.records.add_note(case.id, user_id, "landlord emails").await.unwrap();

    let err = h
        .compliance
        .delete_user_data(user_id, ERASURE_CONFIRMATION, "account closure")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConsentRequired(_)));

    assert_eq!(h.records.cases_for_user(user_id).await.unwrap().len(), 1);
    assert!(h.auth.find_by_user_id(user_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_audit_trail_spans_all_subsystems() {
    let h = harness().await;

    let user_id = h.auth.register("carol", "GoodPass123!$").await.unwrap();
    let _ = h.auth.login("carol", "WrongPass123!$", None, None).await;
    h.auth.login("carol", "GoodPass123!$", None, None).await.unwrap();
    let case = h.records.create_case(user_id, "Case", None).await.unwrap();
    h.records.add_note(case.id, user_id, "note").await.unwrap();
    h.records
        .add_evidence(case.id, user_id, "exhibit-a", "receipt", None)
        .await
        .unwrap();
    h.records.add_chat_message(user_id, ChatRole::User, "hello").await.unwrap();
    h.consents.grant(user_id, ConsentType::DataProcessing).await.unwrap();

    for event_type in [
        "auth.register",
        "auth.login",
        "case.create",
        "note.create",
        "evidence.create",
        "chat.create",
        "consent.grant",
    ] {
        let entries = h.trail.entries_by_event_type(event_type).await.unwrap();
        assert!(!entries.is_empty(), "missing audit entries for {}", event_type);
    }
    assert!(h.trail.verify_chain(None).await.unwrap().valid);
}

#[tokio::test]
async fn test_wrong_key_cannot_read_stored_fields() {
    let db = Database::in_memory().await.expect("test database");
    let trail = AuditTrail::new(db.pool().clone());
    let user_id = uuid::Uuid::new_v4();

    let writer = RecordStore::new(
        db.pool().clone(),
        FieldCipher::new(KeyManager::new(MasterKey::generate())),
        trail.clone(),
    );
    let case = writer.create_case(user_id, "Case", Some("privileged")).await.unwrap();

    let reader = RecordStore::new(
        db.pool().clone(),
        FieldCipher::new(KeyManager::new(MasterKey::generate())),
        trail,
    );
    let err = reader.get_case(case.id).await.unwrap_err();
    assert!(matches!(err, Error::Decryption));
}
