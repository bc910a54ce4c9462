//! Revocation under both policies and verification cross-checks against
//! the ledger.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use certledger_coordinator::{
    AttachRequest, AuditAction, CoordinatorConfig, DriverConfig, IssuanceDriver,
    IssueCertificateRequest, LedgerCheck, LedgerWaitConfig, LifecycleCoordinator,
    MemoryAuditLogger, RevocationPolicy, RevokeRequest,
};
use certledger_core::{
    Certificate, CertificateRegistry, Dependency, ErrorKind, LedgerId, LifecycleState,
    MemoryRegistry, Verifier, assert_cert_kind,
    testutil::{ADMIN_ID, ISSUER_ID, STUDENT_ID, TYPE_ID, sample_anchor, seeded_memory_registry},
};
use certledger_gateway::{InMemoryLedger, LedgerGateway, MemoryMetadataStore, Role};

struct Harness {
    registry: Arc<MemoryRegistry>,
    ledger: InMemoryLedger,
    audit: MemoryAuditLogger,
    coordinator: Arc<LifecycleCoordinator>,
    driver: IssuanceDriver,
}

async fn harness(policy: RevocationPolicy, receipt_timeout: Duration) -> Harness {
    let registry = Arc::new(seeded_memory_registry().await);
    let ledger = InMemoryLedger::default();
    let audit = MemoryAuditLogger::new();
    let config = CoordinatorConfig::builder()
        .revocation_policy(policy)
        .ledger(LedgerWaitConfig::builder().receipt_timeout(receipt_timeout).build().unwrap())
        .build()
        .unwrap();
    let coordinator = Arc::new(
        LifecycleCoordinator::builder()
            .registry(registry.clone())
            .ledger(Arc::new(ledger.clone()))
            .audit(Arc::new(audit.clone()))
            .config(config)
            .build()
            .unwrap(),
    );
    let driver = IssuanceDriver::builder()
        .coordinator(Arc::clone(&coordinator))
        .ledger(Arc::new(ledger.clone()))
        .metadata(Arc::new(MemoryMetadataStore::default()))
        .config(DriverConfig::builder().receipt_timeout(Duration::from_secs(5)).build().unwrap())
        .build();
    Harness { registry, ledger, audit, coordinator, driver }
}

async fn ledger_first() -> Harness {
    harness(RevocationPolicy::LedgerFirst, Duration::from_secs(5)).await
}

async fn registry_authoritative() -> Harness {
    harness(RevocationPolicy::RegistryAuthoritative, Duration::from_secs(5)).await
}

fn request() -> IssueCertificateRequest {
    IssueCertificateRequest::builder()
        .student_id(STUDENT_ID)
        .certificate_type_id(TYPE_ID)
        .issuer_id(ISSUER_ID)
        .course_name("Cryptography")
        .grade("A")
        .build()
}

fn revoke(certificate: &Certificate, reason: &str) -> RevokeRequest {
    RevokeRequest { certificate_id: certificate.id, revoked_by: ADMIN_ID, reason: reason.into() }
}

async fn stored(h: &Harness, certificate: &Certificate) -> Certificate {
    h.registry.find_by_id(certificate.id).await.unwrap().unwrap().certificate
}

#[tokio::test]
async fn ledger_first_revokes_chain_before_registry() {
    let h = ledger_first().await;
    let certificate = h.driver.issue(&request()).await.unwrap();
    let ledger_id = certificate.ledger_id.unwrap();

    let revoked = h.coordinator.revoke_certificate(&revoke(&certificate, "  plagiarism ")).await.unwrap();
    assert_eq!(revoked.state(), LifecycleState::Revoked);
    assert_eq!(revoked.revoked_reason.as_deref(), Some("plagiarism"));

    let record = h.ledger.get_certificate(ledger_id).await.unwrap().unwrap();
    assert!(record.revoked);
    assert_eq!(record.revoked_reason, "plagiarism");

    assert_eq!(h.audit.with_action(AuditAction::LedgerRevoke).len(), 1);
    assert_eq!(h.audit.with_action(AuditAction::Revoke).len(), 1);
}

#[tokio::test]
async fn record_already_revoked_on_chain_converges() {
    let h = ledger_first().await;
    let certificate = h.driver.issue(&request()).await.unwrap();
    let ledger_id = certificate.ledger_id.unwrap();

    let tx = h.ledger.submit_revocation(ledger_id, "revoked elsewhere").await.unwrap();
    assert!(h.ledger.await_receipt(tx, 1).await.unwrap().success);
    let submissions = h.ledger.submission_count();

    let revoked = h.coordinator.revoke_certificate(&revoke(&certificate, "fraud")).await.unwrap();
    assert!(revoked.is_revoked);
    assert_eq!(h.ledger.submission_count(), submissions);
    assert!(h.audit.with_action(AuditAction::LedgerRevoke).is_empty());
}

#[tokio::test]
async fn ledger_rejection_leaves_registry_untouched() {
    let h = ledger_first().await;
    let certificate = h.driver.issue(&request()).await.unwrap();
    h.ledger.revoke_role(Role::Admin, h.ledger.signer());

    let err = h.coordinator.revoke_certificate(&revoke(&certificate, "fraud")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalDependencyFailure);
    assert_eq!(err.dependency(), Some(Dependency::Ledger));
    assert!(!err.is_transient());

    let current = stored(&h, &certificate).await;
    assert!(!current.is_revoked);
    assert_eq!(current.state(), LifecycleState::Anchored);
    assert!(h.audit.with_action(AuditAction::Revoke).is_empty());
}

#[tokio::test]
async fn ledger_revocation_receipt_wait_is_bounded() {
    let h = harness(RevocationPolicy::LedgerFirst, Duration::from_millis(50)).await;
    let certificate = h.driver.issue(&request()).await.unwrap();
    h.ledger.withhold_receipts(true);

    let result = h.coordinator.revoke_certificate(&revoke(&certificate, "fraud")).await;
    assert_cert_kind!(result, Timeout);
    assert!(!stored(&h, &certificate).await.is_revoked);
}

#[tokio::test]
async fn pending_certificate_is_revoked_in_registry_only() {
    let h = ledger_first().await;
    let ticket = h.coordinator.issue_certificate(&request()).await.unwrap();
    let pending = h.coordinator.get_certificate(ticket.certificate_id).await.unwrap().certificate;

    let revoked = h.coordinator.revoke_certificate(&revoke(&pending, "withdrawn")).await.unwrap();
    assert_eq!(revoked.state(), LifecycleState::Revoked);
    assert_eq!(h.ledger.submission_count(), 0);
}

#[tokio::test]
async fn unknown_ledger_record_blocks_ledger_first_revocation() {
    let h = ledger_first().await;
    let ticket = h.coordinator.issue_certificate(&request()).await.unwrap();
    let linked = h
        .coordinator
        .attach_anchor_data(&AttachRequest::from_anchor(ticket.certificate_id, sample_anchor(42)))
        .await
        .unwrap();

    let result = h.coordinator.revoke_certificate(&revoke(&linked, "fraud")).await;
    assert_cert_kind!(result, NotFound);
    assert!(!stored(&h, &linked).await.is_revoked);
}

#[tokio::test]
async fn registry_authoritative_revocation_diverges_from_ledger() {
    let h = registry_authoritative().await;
    let certificate = h.driver.issue(&request()).await.unwrap();
    let ledger_id = certificate.ledger_id.unwrap();
    let submissions = h.ledger.submission_count();

    h.coordinator.revoke_certificate(&revoke(&certificate, "fraud")).await.unwrap();
    assert_eq!(h.ledger.submission_count(), submissions);

    let verifier = Verifier::Actor(ADMIN_ID);
    let outcome =
        h.coordinator.verify_with_ledger(&certificate.certificate_number, &verifier).await.unwrap();
    assert!(!outcome.is_valid);
    assert_eq!(
        outcome.ledger,
        Some(LedgerCheck::Checked {
            ledger_id,
            content_id_matches: true,
            ledger_revoked: false,
            diverged: true,
        })
    );
}

#[tokio::test]
async fn cross_check_agrees_for_anchored_certificate() {
    let h = registry_authoritative().await;
    let certificate = h.driver.issue(&request()).await.unwrap();

    let verifier = Verifier::Network("192.0.2.10".into());
    let outcome =
        h.coordinator.verify_with_ledger(&certificate.certificate_number, &verifier).await.unwrap();
    assert!(outcome.is_valid);
    assert!(matches!(outcome.ledger, Some(LedgerCheck::Checked { diverged: false, .. })));
}

#[tokio::test]
async fn cross_check_reports_missing_and_pending_records() {
    let h = registry_authoritative().await;
    let verifier = Verifier::Network("192.0.2.11".into());

    let pending = h.coordinator.issue_certificate(&request()).await.unwrap();
    let outcome =
        h.coordinator.verify_with_ledger(&pending.certificate_number, &verifier).await.unwrap();
    assert_eq!(outcome.ledger, Some(LedgerCheck::NotAnchored));

    h.coordinator
        .attach_anchor_data(&AttachRequest::from_anchor(pending.certificate_id, sample_anchor(42)))
        .await
        .unwrap();
    let outcome =
        h.coordinator.verify_with_ledger(&pending.certificate_number, &verifier).await.unwrap();
    assert!(outcome.is_valid);
    assert_eq!(outcome.ledger, Some(LedgerCheck::Missing { ledger_id: LedgerId(42) }));
}
