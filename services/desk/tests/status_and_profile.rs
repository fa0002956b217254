mod support;

use bytes::Bytes;
use desk_lib::adapters::FsObjectStore;
use desk_lib::app::{App, Reply};
use desk_lib::commands::{parse, Command};
use loan_desk_core::domain::{ChatId, ContactChannel, LoanStage, UserProfile, VaultSlot};
use loan_desk_core::ports::{DocumentPath, DocumentStore, IdentityProvider, PortError, WriteMode};
use loan_desk_core::{LoanStatusAggregator, ProfileVault};
use serde_json::json;
use std::sync::Arc;
use support::{Harness, ScriptedBackend};

async fn put(h: &Harness, path: DocumentPath, data: serde_json::Value) {
    h.store.set(&path, data, WriteMode::Replace).await.unwrap();
}

#[tokio::test]
async fn chat_without_loan_fields_reads_as_inquiry() {
    let h = Harness::new(ScriptedBackend::new("ok"), true).await;
    let chat = h.manager.ensure_session(None).await.unwrap();
    let status = LoanStatusAggregator::new(h.identity.clone(), h.store.clone());

    let snapshot = status.snapshot(&chat.id).await.unwrap();
    assert_eq!(snapshot.stage, LoanStage::Inquiry);
    assert_eq!(snapshot.stage_index, 0);
    assert_eq!((snapshot.amount, snapshot.emi, snapshot.tenure_months, snapshot.paid_emis), (0, 0, 0, 0));
    assert_eq!(snapshot.scheme, "N/A");
    assert_eq!(snapshot.next_emi_date, "TBD");
    assert_eq!(snapshot.credit_score, None);
    assert!(!snapshot.kyc_verified);
    assert!(snapshot.repayment.is_none());

    // A chat that does not exist at all reads the same way.
    let missing = status.snapshot(&ChatId::from("404")).await.unwrap();
    assert_eq!(missing, snapshot);
}

#[tokio::test]
async fn approved_loan_combines_chat_and_profile() {
    let h = Harness::new(ScriptedBackend::new("ok"), true).await;
    let id = ChatId::from("1700000000000");
    put(
        &h,
        DocumentPath::chat(h.user_id(), &id),
        json!({
            "loanStatus": "approved",
            "loanAmount": "5,00,000",
            "loanScheme": "Home Saver",
            "emiAmount": 12000,
            "tenureMonths": 48,
            "paidEmis": 60,
            "nextEmiDate": "2026-11-05"
        }),
    )
    .await;
    put(
        &h,
        DocumentPath::profile(h.user_id()),
        json!({"creditScore": "780", "documents": {"panCard": "https://files/pan"}}),
    )
    .await;

    let status = LoanStatusAggregator::new(h.identity.clone(), h.store.clone());
    let snapshot = status.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.stage, LoanStage::Approved);
    assert_eq!(snapshot.stage_index, 3);
    assert_eq!(snapshot.amount, 500000);
    assert_eq!(snapshot.credit_score, Some(780));
    assert!(snapshot.kyc_verified);
    let repayment = snapshot.repayment.unwrap();
    assert_eq!(repayment.next_emi_date, "2026-11-05");
    assert_eq!(repayment.progress, 1.0);
}

#[tokio::test]
async fn status_needs_a_signed_in_user() {
    let h = Harness::new(ScriptedBackend::new("ok"), false).await;
    let status = LoanStatusAggregator::new(h.identity.clone(), h.store.clone());
    assert!(matches!(
        status.snapshot(&ChatId::from("1")).await,
        Err(PortError::Unauthorized)
    ));
}

#[tokio::test]
async fn vault_uploads_land_in_the_profile() {
    let h = Harness::new(ScriptedBackend::new("ok"), true).await;
    let dir = tempfile::tempdir().unwrap();
    let objects = Arc::new(FsObjectStore::new(dir.path(), "https://files.example.com"));
    let vault = ProfileVault::new(h.identity.clone(), h.store.clone(), objects);

    let mut profile = vault.load().await.unwrap();
    assert_eq!(profile.email.as_deref(), Some("asha@example.com"));

    let url = vault
        .upload(&mut profile, VaultSlot::PanCard, Bytes::from_static(b"pan scan"))
        .await
        .unwrap();
    let prefix = format!("https://files.example.com/users/{}/panCard_", h.user_id());
    assert!(url.starts_with(&prefix), "{url}");
    assert_eq!(profile.documents["panCard"], url);

    let stored_path = url.trim_start_matches("https://files.example.com/");
    assert_eq!(std::fs::read(dir.path().join(stored_path)).unwrap(), b"pan scan");

    assert!(matches!(
        vault.upload(&mut profile, VaultSlot::Custom(0), Bytes::new()).await,
        Err(PortError::NotFound(_))
    ));
    let index = profile.add_extra_document();
    profile.rename_extra_document(index, "Form 16");
    vault.save(&profile).await.unwrap();
    vault
        .upload(&mut profile, VaultSlot::Custom(index), Bytes::from_static(b"form"))
        .await
        .unwrap();

    let reloaded = vault.load().await.unwrap();
    assert!(reloaded.kyc_verified());
    assert_eq!(reloaded.extra_docs.len(), 1);
    assert_eq!(reloaded.extra_docs[0].name, "Form 16");
    assert!(reloaded.extra_docs[0].url.contains("/extra_0_"));
}

#[tokio::test]
async fn profile_edits_merge_without_touching_other_fields() {
    let h = Harness::new(ScriptedBackend::new("ok"), true).await;
    put(
        &h,
        DocumentPath::profile(h.user_id()),
        json!({"creditScore": 750, "preApprovedLimit": 300000}),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let vault = ProfileVault::new(
        h.identity.clone(),
        h.store.clone(),
        Arc::new(FsObjectStore::new(dir.path(), "file:///vault")),
    );

    let mut profile = vault.load().await.unwrap();
    profile.name = Some("Asha Rao".to_string());
    profile.set_pan_number("abcde1234f");
    vault.save(&profile).await.unwrap();
    vault.verify(ContactChannel::Phone).await.unwrap();

    let stored = h.store.get(&DocumentPath::profile(h.user_id())).await.unwrap().unwrap();
    assert_eq!(stored["name"], "Asha Rao");
    assert_eq!(stored["panCard"], "ABCDE1234F");
    assert_eq!(stored["isPhoneVerified"], true);
    assert_eq!(stored["creditScore"], 750);

    let reloaded: UserProfile = vault.load().await.unwrap();
    assert_eq!(reloaded.pre_approved_limit, Some(300000));
    assert!(reloaded.is_phone_verified);
    assert!(!reloaded.is_email_verified);
}

#[tokio::test]
async fn uploads_and_saves_keep_unknown_document_entries() {
    let h = Harness::new(ScriptedBackend::new("ok"), true).await;
    put(
        &h,
        DocumentPath::profile(h.user_id()),
        json!({"documents": {"salarySlip": "", "aadhaar": {"front": "https://files/a"}, "form16": 7}}),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let vault = ProfileVault::new(
        h.identity.clone(),
        h.store.clone(),
        Arc::new(FsObjectStore::new(dir.path(), "file:///vault")),
    );

    let mut profile = vault.load().await.unwrap();
    assert!(profile.documents.is_empty());
    let url = vault
        .upload(&mut profile, VaultSlot::PanCard, Bytes::from_static(b"pan"))
        .await
        .unwrap();
    profile.city = Some("Pune".to_string());
    vault.save(&profile).await.unwrap();

    let stored = h.store.get(&DocumentPath::profile(h.user_id())).await.unwrap().unwrap();
    assert_eq!(stored["city"], "Pune");
    assert_eq!(
        stored["documents"],
        json!({
            "panCard": url,
            "salarySlip": "",
            "aadhaar": {"front": "https://files/a"},
            "form16": 7
        })
    );
}

#[tokio::test]
async fn app_saves_the_sanction_letter_from_the_transcript() {
    let reply = "Congratulations! Your sanction letter for Asha Rao for ₹7,50,000 has been generated.";
    let h = Harness::new(ScriptedBackend::new(reply), false).await;
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(
        h.identity.clone(),
        h.store.clone(),
        Arc::new(FsObjectStore::new(dir.path().join("uploads"), "file:///uploads")),
        ScriptedBackend::new(reply),
        dir.path().join("session"),
        dir.path().to_path_buf(),
    );

    assert!(app.handle(Command::Letter).await.is_err());
    app.chats().send("Please approve my loan").await;

    let Reply::Text(text) = app.handle(Command::Letter).await.unwrap() else {
        panic!("expected a reply");
    };
    let saved = dir.path().join("Sanction_Letter_Asha_Rao.txt");
    assert!(text.contains("Sanction_Letter_Asha_Rao.txt"), "{text}");
    let letter = std::fs::read_to_string(saved).unwrap();
    assert!(letter.contains("Asha Rao"));
    assert!(letter.contains("7,50,000"));
}

#[tokio::test]
async fn app_profile_commands_require_sign_in_and_persist_the_session() {
    let h = Harness::new(ScriptedBackend::new("ok"), false).await;
    let dir = tempfile::tempdir().unwrap();
    let session_file = dir.path().join("session");
    let app = App::new(
        h.identity.clone(),
        h.store.clone(),
        Arc::new(FsObjectStore::new(dir.path().join("uploads"), "file:///uploads")),
        ScriptedBackend::new("ok"),
        session_file.clone(),
        dir.path().to_path_buf(),
    );

    let denied = app.handle(parse("/profile").unwrap()).await;
    assert!(matches!(
        denied,
        Err(desk_lib::error::DeskError::Port(PortError::Unauthorized))
    ));

    app.handle(parse("/signup asha@example.com s3cret").unwrap()).await.unwrap();
    assert!(!std::fs::read_to_string(&session_file).unwrap().is_empty());

    app.handle(parse("/set city Pune").unwrap()).await.unwrap();
    app.handle(parse("/save").unwrap()).await.unwrap();
    let user = h.identity.current_user().unwrap().user_id;
    let stored = h.store.get(&DocumentPath::profile(user)).await.unwrap().unwrap();
    assert_eq!(stored["city"], "Pune");

    assert_eq!(app.handle(parse("/quit").unwrap()).await.unwrap(), Reply::Quit);
    app.handle(parse("/signout").unwrap()).await.unwrap();
    assert!(!session_file.exists());
}
