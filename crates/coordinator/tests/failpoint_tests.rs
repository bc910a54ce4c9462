#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p certledger-coordinator --features failpoints --test failpoint_tests
//! ```

use std::sync::Arc;

use certledger_coordinator::{
    IssuanceDriver, IssuanceStage, IssueCertificateRequest, LifecycleCoordinator, Reconciler,
};
use certledger_core::{
    CertificateRegistry, LedgerId, LifecycleState,
    testutil::{ISSUER_ID, STUDENT_ID, TYPE_ID, seeded_memory_registry},
};
use certledger_gateway::{InMemoryLedger, MemoryMetadataStore};
use chrono::Utc;

fn request() -> IssueCertificateRequest {
    IssueCertificateRequest::builder()
        .student_id(STUDENT_ID)
        .certificate_type_id(TYPE_ID)
        .issuer_id(ISSUER_ID)
        .course_name("Networks")
        .grade("A")
        .build()
}

#[tokio::test]
async fn crash_after_submission_is_recovered_by_reconciler() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("driver-after-submit", "return").expect("failed to configure fail point");

    let registry = Arc::new(seeded_memory_registry().await);
    let ledger = InMemoryLedger::default();
    let metadata = MemoryMetadataStore::default();
    let coordinator =
        Arc::new(LifecycleCoordinator::builder().registry(registry.clone()).build().unwrap());
    let driver = IssuanceDriver::builder()
        .coordinator(coordinator)
        .ledger(Arc::new(ledger.clone()))
        .metadata(Arc::new(metadata.clone()))
        .build();

    let err = driver.issue(&request()).await.unwrap_err();
    assert_eq!(err.stage, IssuanceStage::Receipt);
    assert!(err.tx_hash.is_some());
    assert!(err.ledger_write_may_exist(), "a crash after submission may leave a record");

    let id = err.certificate_id.expect("pending row was created");
    let pending = registry.find_by_id(id).await.unwrap().unwrap().certificate;
    assert_eq!(pending.state(), LifecycleState::Pending);
    assert_eq!(ledger.certificate_count(), 1);

    fail::remove("driver-after-submit");

    let reconciler = Reconciler::builder()
        .registry(registry.clone())
        .ledger(Arc::new(ledger.clone()))
        .metadata(Arc::new(metadata.clone()))
        .build();
    let report = reconciler.run_once(Utc::now() + chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(report.linked, vec![(id, LedgerId(1))]);

    let anchored = registry.find_by_id(id).await.unwrap().unwrap().certificate;
    assert_eq!(anchored.state(), LifecycleState::Anchored);
    assert_eq!(anchored.transaction_hash, err.tx_hash.map(|hash| hash.to_string()));

    scenario.teardown();
}

#[tokio::test]
async fn issuance_without_failpoint_completes() {
    let scenario = fail::FailScenario::setup();
    // No fail point configured, the driver anchors normally

    let registry = Arc::new(seeded_memory_registry().await);
    let coordinator =
        Arc::new(LifecycleCoordinator::builder().registry(registry.clone()).build().unwrap());
    let driver = IssuanceDriver::builder()
        .coordinator(coordinator)
        .ledger(Arc::new(InMemoryLedger::default()))
        .metadata(Arc::new(MemoryMetadataStore::default()))
        .build();

    let certificate = driver.issue(&request()).await.unwrap();
    assert_eq!(certificate.state(), LifecycleState::Anchored);

    scenario.teardown();
}
