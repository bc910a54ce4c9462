//! End-to-end lifecycle scenarios against both registries.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::sync::Arc;

use certledger_coordinator::{
    AttachRequest, CoordinatorConfig, IssueCertificateRequest, LifecycleCoordinator,
    NetworkSelection, RevokeRequest,
};
use certledger_core::{
    ActorId, CertError, CertificateFilter, CertificateId, CertificateRegistry, CertificateTypeId,
    Entity, LedgerId, LifecycleState, VerificationMethod, VerificationScope, Verifier,
    assert_cert_kind,
    testutil::{
        ADMIN_ID, INACTIVE_TYPE_ID, ISSUER_ID, STUDENT_ID, STUDENT_WALLET, TYPE_ID, local_network,
        seeded_memory_registry, seeded_sqlite_registry,
    },
};
use rstest::rstest;

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    Sqlite,
}

async fn registry(backend: Backend) -> Arc<dyn CertificateRegistry> {
    match backend {
        Backend::Memory => Arc::new(seeded_memory_registry().await),
        Backend::Sqlite => Arc::new(seeded_sqlite_registry().await),
    }
}

fn coordinator(registry: &Arc<dyn CertificateRegistry>) -> LifecycleCoordinator {
    LifecycleCoordinator::builder().registry(Arc::clone(registry)).build().expect("coordinator")
}

fn issue_request(student: ActorId) -> IssueCertificateRequest {
    IssueCertificateRequest::builder()
        .student_id(student)
        .certificate_type_id(TYPE_ID)
        .issuer_id(ISSUER_ID)
        .course_name("Distributed Systems")
        .grade("A")
        .description("Graduate seminar")
        .build()
}

fn revoke(certificate_id: CertificateId, reason: &str) -> RevokeRequest {
    RevokeRequest { certificate_id, revoked_by: ADMIN_ID, reason: reason.to_owned() }
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn scenario_a_issue_then_attach_links_all_fields(#[case] backend: Backend) {
    let registry = registry(backend).await;
    let coordinator = coordinator(&registry);

    let ticket = coordinator.issue_certificate(&issue_request(STUDENT_ID)).await.unwrap();
    let pending = coordinator.get_certificate(ticket.certificate_id).await.unwrap();
    assert_eq!(pending.certificate.state(), LifecycleState::Pending);
    assert!(pending.certificate.ledger_id.is_none());
    assert!(pending.certificate.transaction_hash.is_none());
    assert!(pending.certificate.content_id.is_none());
    assert!(pending.certificate.metadata_url.is_none());

    assert_eq!(ticket.metadata.student_name, "Ada Student");
    assert_eq!(ticket.metadata.issuer_name, "Grace Issuer");
    assert_eq!(ticket.metadata.certificate_type, "Completion");
    assert_eq!(ticket.network.network, "Localhost");
    assert_eq!(ticket.network.chain_id, 31337);
    assert_eq!(ticket.student_wallet.as_deref(), Some(STUDENT_WALLET));

    coordinator
        .attach_anchor_data(&AttachRequest {
            certificate_id: ticket.certificate_id,
            ledger_id: LedgerId(1),
            transaction_hash: "0xabc".into(),
            content_id: "Qm123".into(),
            metadata_url: "https://gw/ipfs/Qm123".into(),
        })
        .await
        .unwrap();

    let linked = coordinator.get_certificate(ticket.certificate_id).await.unwrap().certificate;
    assert_eq!(linked.ledger_id, Some(LedgerId(1)));
    assert_eq!(linked.transaction_hash.as_deref(), Some("0xabc"));
    assert_eq!(linked.content_id.as_deref(), Some("Qm123"));
    assert_eq!(linked.metadata_url.as_deref(), Some("https://gw/ipfs/Qm123"));
    assert_eq!(linked.state(), LifecycleState::Anchored);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn scenario_b_unknown_number_is_logged_miss(#[case] backend: Backend) {
    let registry = registry(backend).await;
    let coordinator = coordinator(&registry);

    let result = coordinator
        .verify_certificate("CERT-DOES-NOT-EXIST", &Verifier::Network("203.0.113.7".into()))
        .await;
    assert_cert_kind!(result, NotFound);

    let records = registry.verifications(VerificationScope::All).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].certificate_id, None);
    assert!(!records[0].result);
    assert_eq!(records[0].verified_by, "203.0.113.7");
    assert_eq!(records[0].method, VerificationMethod::CertificateNumber);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn scenario_c_second_revocation_is_rejected(#[case] backend: Backend) {
    let registry = registry(backend).await;
    let coordinator = coordinator(&registry);
    let ticket = coordinator.issue_certificate(&issue_request(STUDENT_ID)).await.unwrap();

    let first = coordinator.revoke_certificate(&revoke(ticket.certificate_id, "fraud")).await.unwrap();
    assert!(first.is_revoked);
    assert_eq!(first.revoked_by, Some(ADMIN_ID));

    let second = coordinator.revoke_certificate(&revoke(ticket.certificate_id, "dup")).await;
    assert_cert_kind!(second, InvalidState);

    let stored = coordinator.get_certificate(ticket.certificate_id).await.unwrap().certificate;
    assert_eq!(stored.revoked_reason.as_deref(), Some("fraud"));
    assert_eq!(stored.revoked_at, first.revoked_at);
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn scenario_d_unknown_student_writes_nothing(#[case] backend: Backend) {
    let registry = registry(backend).await;
    let coordinator = coordinator(&registry);

    let result = coordinator.issue_certificate(&issue_request(ActorId(999))).await;
    assert!(matches!(
        result,
        Err(CertError::NotFound { entity: Entity::Student, .. })
    ));
    assert!(coordinator.list_certificates(&CertificateFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_issuer_is_not_found() {
    let registry = registry(Backend::Memory).await;
    let coordinator = coordinator(&registry);
    let request = IssueCertificateRequest::builder()
        .student_id(STUDENT_ID)
        .certificate_type_id(TYPE_ID)
        .issuer_id(ActorId(404))
        .course_name("Rust")
        .grade("B")
        .build();
    let result = coordinator.issue_certificate(&request).await;
    assert!(matches!(
        result,
        Err(CertError::NotFound { entity: Entity::Issuer, .. })
    ));
}

#[rstest]
#[case::inactive(INACTIVE_TYPE_ID)]
#[case::unknown(CertificateTypeId(77))]
#[tokio::test]
async fn inactive_or_unknown_type_is_not_found(#[case] type_id: CertificateTypeId) {
    let registry = registry(Backend::Memory).await;
    let coordinator = coordinator(&registry);
    let request = IssueCertificateRequest::builder()
        .student_id(STUDENT_ID)
        .certificate_type_id(type_id)
        .issuer_id(ISSUER_ID)
        .course_name("Rust")
        .grade("B")
        .build();
    assert_cert_kind!(coordinator.issue_certificate(&request).await, NotFound);
    assert!(coordinator.list_certificates(&CertificateFilter::default()).await.unwrap().is_empty());
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn issuance_without_active_network_writes_nothing(#[case] backend: Backend) {
    let registry = registry(backend).await;
    let mut network = local_network();
    network.active = false;
    registry.register_network(&network).await.unwrap();

    for selection in [NetworkSelection::Active, NetworkSelection::default()] {
        let coordinator = LifecycleCoordinator::builder()
            .registry(Arc::clone(&registry))
            .config(CoordinatorConfig::builder().network(selection).build().unwrap())
            .build()
            .unwrap();
        let result = coordinator.issue_certificate(&issue_request(STUDENT_ID)).await;
        assert_cert_kind!(result, ConfigurationMissing);
    }
    assert!(registry.list(&CertificateFilter::default()).await.unwrap().is_empty());
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[tokio::test]
async fn issuance_on_unknown_named_network_writes_nothing(#[case] backend: Backend) {
    let registry = registry(backend).await;
    let coordinator = LifecycleCoordinator::builder()
        .registry(Arc::clone(&registry))
        .config(
            CoordinatorConfig::builder()
                .network(NetworkSelection::named("Nowhere"))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let result = coordinator.issue_certificate(&issue_request(STUDENT_ID)).await;
    assert_cert_kind!(result, ConfigurationMissing);
    assert!(registry.list(&CertificateFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn blank_grade_is_rejected_before_lookup() {
    let registry = registry(Backend::Memory).await;
    let coordinator = coordinator(&registry);
    let request = IssueCertificateRequest::builder()
        .student_id(ActorId(999))
        .certificate_type_id(TYPE_ID)
        .issuer_id(ISSUER_ID)
        .course_name("Rust")
        .grade(" ")
        .build();
    assert_cert_kind!(coordinator.issue_certificate(&request).await, InvalidInput);
}

#[tokio::test]
async fn verification_hit_returns_public_fields() {
    let registry = registry(Backend::Sqlite).await;
    let coordinator = coordinator(&registry);
    let ticket = coordinator.issue_certificate(&issue_request(STUDENT_ID)).await.unwrap();

    let outcome = coordinator
        .verify_certificate(&ticket.certificate_number, &Verifier::Actor(ADMIN_ID))
        .await
        .unwrap();
    assert!(outcome.is_valid);
    assert_eq!(outcome.certificate.certificate_number, ticket.certificate_number);
    assert_eq!(outcome.certificate.student_name.as_deref(), Some("Ada Student"));
    assert_eq!(outcome.certificate.issuer_name.as_deref(), Some("Grace Issuer"));
    assert_eq!(outcome.certificate.state, LifecycleState::Pending);
    assert!(outcome.ledger.is_none());

    let json = serde_json::to_value(&outcome).unwrap();
    assert!(json["certificate"].get("studentId").is_none());
    assert!(json["certificate"].get("issuerId").is_none());

    coordinator.revoke_certificate(&revoke(ticket.certificate_id, "fraud")).await.unwrap();
    let after = coordinator
        .verify_certificate(&ticket.certificate_number, &Verifier::Actor(ADMIN_ID))
        .await
        .unwrap();
    assert!(!after.is_valid);
    assert_eq!(after.certificate.revoked_reason.as_deref(), Some("fraud"));

    let records =
        registry.verifications(VerificationScope::Certificate(ticket.certificate_id)).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.result && r.verified_by == "actor:3"));
}

#[tokio::test]
async fn attach_to_revoked_certificate_keeps_it_revoked() {
    let registry = registry(Backend::Memory).await;
    let coordinator = coordinator(&registry);
    let ticket = coordinator.issue_certificate(&issue_request(STUDENT_ID)).await.unwrap();
    coordinator.revoke_certificate(&revoke(ticket.certificate_id, "withdrawn")).await.unwrap();

    let attached = coordinator
        .attach_anchor_data(&AttachRequest {
            certificate_id: ticket.certificate_id,
            ledger_id: LedgerId(8),
            transaction_hash: "0xdef".into(),
            content_id: "Qm8".into(),
            metadata_url: "https://gw/ipfs/Qm8".into(),
        })
        .await
        .unwrap();
    assert_eq!(attached.state(), LifecycleState::Revoked);
    assert_eq!(attached.ledger_id, Some(LedgerId(8)));
}

#[tokio::test]
async fn attach_to_unknown_certificate_is_not_found() {
    let registry = registry(Backend::Memory).await;
    let coordinator = coordinator(&registry);
    let result = coordinator
        .attach_anchor_data(&AttachRequest {
            certificate_id: CertificateId(42),
            ledger_id: LedgerId(1),
            transaction_hash: "0xabc".into(),
            content_id: "Qm123".into(),
            metadata_url: "https://gw/ipfs/Qm123".into(),
        })
        .await;
    assert_cert_kind!(result, NotFound);
}

#[tokio::test]
async fn revoke_unknown_certificate_is_not_found() {
    let registry = registry(Backend::Memory).await;
    let coordinator = coordinator(&registry);
    let result =
        coordinator.revoke_certificate(&revoke(CertificateId(42), "fraud")).await;
    assert_cert_kind!(result, NotFound);
}

#[tokio::test]
async fn listings_filter_and_types() {
    let registry = registry(Backend::Memory).await;
    let coordinator = coordinator(&registry);
    let first = coordinator.issue_certificate(&issue_request(STUDENT_ID)).await.unwrap();
    coordinator.issue_certificate(&issue_request(STUDENT_ID)).await.unwrap();
    coordinator.revoke_certificate(&revoke(first.certificate_id, "fraud")).await.unwrap();

    let all = coordinator.list_certificates(&CertificateFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    let revoked = coordinator
        .list_certificates(&CertificateFilter::builder().revoked(true).build())
        .await
        .unwrap();
    assert_eq!(revoked.len(), 1);
    assert_eq!(revoked[0].certificate.id, first.certificate_id);

    let types = coordinator.list_certificate_types().await.unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "Completion");
}
