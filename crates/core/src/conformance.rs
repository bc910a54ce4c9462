//! Conformance suite for [`CertificateRegistry`] implementations.
//!
//! Each function checks one clause of the registry contract against a
//! registry that has had [`testutil::seed`](crate::testutil::seed) applied.
//! Every implementation runs the same suite.
//!
//! ```no_run
//! use certledger_core::{conformance, testutil};
//!
//! #[tokio::test]
//! async fn create_then_find_by_number() {
//!     let registry = testutil::seeded_memory_registry().await;
//!     conformance::create_then_find_by_number(&registry).await;
//! }
//! ```
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | Create | number uniqueness, pending state, joined names |
//! | Attach | atomic linkage, idempotence, revoked rows stay revoked |
//! | Revoke | conditional update, monotonic flag, single winner |
//! | Listing | filters, ordering, pending watermark |
//! | Audit | append-only verification records |
//! | Reference data | active types, network resolution |

use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};

use crate::{
    error::{CertError, ErrorKind},
    model::{
        CertificateFilter, CertificateType, LifecycleState, NetworkConfig, NewVerification,
        Revocation, VerificationMethod, VerificationScope,
    },
    registry::CertificateRegistry,
    testutil::{
        ADMIN_ID, INACTIVE_TYPE_ID, ISSUER_ID, STUDENT_ID, TYPE_ID, WALLETLESS_STUDENT_ID,
        local_network, sample_anchor, sample_draft,
    },
    types::{CertificateId, CertificateTypeId, NetworkConfigId},
};

fn revocation(reason: &str) -> Revocation {
    Revocation { revoked_by: ADMIN_ID, reason: reason.to_owned(), revoked_at: Utc::now() }
}

// ============================================================================
// Create
// ============================================================================

/// `find_by_number` on an unknown number returns `Ok(None)`.
pub async fn find_by_number_missing_returns_none<R: CertificateRegistry>(registry: &R) {
    let found = registry.find_by_number("CERT-NOPE-000000").await.expect("lookup");
    assert!(found.is_none());
}

/// A created certificate is pending and carries the joined names.
pub async fn create_then_find_by_number<R: CertificateRegistry>(registry: &R) {
    let id = registry.create(&sample_draft("CERT-C1")).await.expect("create");
    let view = registry.find_by_number("CERT-C1").await.expect("lookup").expect("row exists");

    assert_eq!(view.certificate.id, id);
    assert_eq!(view.certificate.state(), LifecycleState::Pending);
    assert_eq!(view.certificate.network.as_deref(), Some("Localhost"));
    assert_eq!(view.student_name.as_deref(), Some("Ada Student"));
    assert_eq!(view.student_email.as_deref(), Some("ada@example.edu"));
    assert_eq!(view.issuer_name.as_deref(), Some("Grace Issuer"));
    assert_eq!(view.certificate_type.as_deref(), Some("Completion"));
    assert!(view.revoked_by_name.is_none());

    let by_id = registry.find_by_id(id).await.expect("lookup").expect("row exists");
    assert_eq!(by_id, view);
}

/// A duplicate number is rejected and writes nothing.
pub async fn create_duplicate_number_is_rejected<R: CertificateRegistry>(registry: &R) {
    registry.create(&sample_draft("CERT-DUP")).await.expect("first create");
    let err = registry.create(&sample_draft("CERT-DUP")).await.expect_err("duplicate");
    assert!(matches!(err, CertError::DuplicateCertificateNumber { .. }), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let all = registry.list(&CertificateFilter::default()).await.expect("list");
    assert_eq!(all.len(), 1, "rejected create must not write a row");
}

// ============================================================================
// Attach
// ============================================================================

/// Attaching all four linkage fields makes the certificate anchored.
pub async fn attach_anchor_data_anchors<R: CertificateRegistry>(registry: &R) {
    let id = registry.create(&sample_draft("CERT-A1")).await.expect("create");
    let updated = registry.attach_anchor_data(id, &sample_anchor(7)).await.expect("attach");

    assert_eq!(updated.state(), LifecycleState::Anchored);
    assert_eq!(updated.anchor(), Some(sample_anchor(7)));

    let view = registry.find_by_id(id).await.expect("lookup").expect("row exists");
    assert_eq!(view.certificate.anchor(), Some(sample_anchor(7)));
}

/// Attaching identical data twice leaves the same observable state.
pub async fn attach_anchor_data_is_idempotent<R: CertificateRegistry>(registry: &R) {
    let id = registry.create(&sample_draft("CERT-A2")).await.expect("create");
    let first = registry.attach_anchor_data(id, &sample_anchor(3)).await.expect("attach");
    let second = registry.attach_anchor_data(id, &sample_anchor(3)).await.expect("re-attach");

    assert_eq!(first.anchor(), second.anchor());
    assert_eq!(first.state(), second.state());
    assert_eq!(first.certificate_number, second.certificate_number);
}

/// Attaching to an unknown id fails with `NotFound`.
pub async fn attach_anchor_data_unknown_id<R: CertificateRegistry>(registry: &R) {
    let err = registry
        .attach_anchor_data(CertificateId(9_999), &sample_anchor(1))
        .await
        .expect_err("unknown id");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Linking a revoked certificate records the linkage and keeps it revoked.
pub async fn attach_to_revoked_stays_revoked<R: CertificateRegistry>(registry: &R) {
    let id = registry.create(&sample_draft("CERT-A3")).await.expect("create");
    registry.revoke(id, &revocation("issued in error")).await.expect("revoke");
    let updated = registry.attach_anchor_data(id, &sample_anchor(4)).await.expect("attach");

    assert!(updated.is_revoked);
    assert_eq!(updated.state(), LifecycleState::Revoked);
    assert_eq!(updated.ledger_id, Some(sample_anchor(4).ledger_id));
}

// ============================================================================
// Revoke
// ============================================================================

/// Revocation sets every revocation field.
pub async fn revoke_sets_fields<R: CertificateRegistry>(registry: &R) {
    let id = registry.create(&sample_draft("CERT-R1")).await.expect("create");
    let revoked = registry.revoke(id, &revocation("academic misconduct")).await.expect("revoke");

    assert!(revoked.is_revoked);
    assert_eq!(revoked.revoked_by, Some(ADMIN_ID));
    assert_eq!(revoked.revoked_reason.as_deref(), Some("academic misconduct"));
    assert!(revoked.revoked_at.is_some());

    let view = registry.find_by_id(id).await.expect("lookup").expect("row exists");
    assert_eq!(view.revoked_by_name.as_deref(), Some("Alan Admin"));
}

/// A second revocation is `InvalidState` and leaves the first one untouched.
pub async fn revoke_twice_is_invalid_state<R: CertificateRegistry>(registry: &R) {
    let id = registry.create(&sample_draft("CERT-R2")).await.expect("create");
    registry.revoke(id, &revocation("first")).await.expect("revoke");

    let err = registry.revoke(id, &revocation("second")).await.expect_err("second revoke");
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let view = registry.find_by_id(id).await.expect("lookup").expect("row exists");
    assert!(view.certificate.is_revoked);
    assert_eq!(view.certificate.revoked_reason.as_deref(), Some("first"));
}

/// Revoking an unknown id is `NotFound`.
pub async fn revoke_unknown_id<R: CertificateRegistry>(registry: &R) {
    let err = registry.revoke(CertificateId(4_242), &revocation("x")).await.expect_err("unknown");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Concurrent revocations of one certificate produce exactly one winner.
pub async fn concurrent_revoke_single_winner<R: CertificateRegistry + 'static>(registry: Arc<R>) {
    let id = registry.create(&sample_draft("CERT-RACE")).await.expect("create");

    let mut handles = Vec::new();
    for task in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.revoke(id, &revocation(&format!("reason {task}"))).await
        }));
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    for handle in handles {
        match handle.await.expect("task joined") {
            Ok(cert) => winners.push(cert),
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::InvalidState, "loser error: {err:?}");
                losers += 1;
            },
        }
    }

    assert_eq!(winners.len(), 1, "exactly one revocation must win");
    assert_eq!(losers, 7);

    let stored = registry.find_by_id(id).await.expect("lookup").expect("row exists");
    assert_eq!(stored.certificate.revoked_reason, winners[0].revoked_reason);
}

// ============================================================================
// Listing
// ============================================================================

/// Listing orders by issue date, newest first.
pub async fn list_orders_newest_first<R: CertificateRegistry>(registry: &R) {
    let base = Utc::now();
    for (number, offset) in [("CERT-L1", 2), ("CERT-L2", 0), ("CERT-L3", 1)] {
        let mut draft = sample_draft(number);
        draft.issue_date = base - ChronoDuration::days(offset);
        registry.create(&draft).await.expect("create");
    }

    let all = registry.list(&CertificateFilter::default()).await.expect("list");
    let numbers: Vec<&str> = all.iter().map(|v| v.certificate.certificate_number.as_str()).collect();
    assert_eq!(numbers, vec!["CERT-L2", "CERT-L3", "CERT-L1"]);
}

/// Filters restrict by student, type and revoked flag.
pub async fn list_applies_filters<R: CertificateRegistry>(registry: &R) {
    let a = registry.create(&sample_draft("CERT-F1")).await.expect("create");
    let mut other = sample_draft("CERT-F2");
    other.student_id = WALLETLESS_STUDENT_ID;
    registry.create(&other).await.expect("create");
    registry.revoke(a, &revocation("dup")).await.expect("revoke");

    let by_student = registry
        .list(&CertificateFilter::builder().student_id(STUDENT_ID).build())
        .await
        .expect("list");
    assert_eq!(by_student.len(), 1);
    assert_eq!(by_student[0].certificate.id, a);

    let revoked =
        registry.list(&CertificateFilter::builder().revoked(true).build()).await.expect("list");
    assert_eq!(revoked.len(), 1);

    let active =
        registry.list(&CertificateFilter::builder().revoked(false).build()).await.expect("list");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].certificate.certificate_number, "CERT-F2");

    let other_type = registry
        .list(&CertificateFilter::builder().certificate_type_id(INACTIVE_TYPE_ID).build())
        .await
        .expect("list");
    assert!(other_type.is_empty());
}

/// `list_pending` returns only pending rows created before the watermark.
pub async fn list_pending_respects_watermark<R: CertificateRegistry>(registry: &R) {
    let pending = registry.create(&sample_draft("CERT-P1")).await.expect("create");
    let anchored = registry.create(&sample_draft("CERT-P2")).await.expect("create");
    let revoked = registry.create(&sample_draft("CERT-P3")).await.expect("create");
    registry.attach_anchor_data(anchored, &sample_anchor(11)).await.expect("attach");
    registry.revoke(revoked, &revocation("void")).await.expect("revoke");

    let future = Utc::now() + ChronoDuration::minutes(1);
    let rows = registry.list_pending(future).await.expect("list pending");
    let ids: Vec<CertificateId> = rows.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![pending]);

    let past = Utc::now() - ChronoDuration::hours(1);
    assert!(registry.list_pending(past).await.expect("list pending").is_empty());
}

// ============================================================================
// Audit
// ============================================================================

/// Verification records are appended in order and scoped on read-back.
pub async fn verification_log_is_append_only<R: CertificateRegistry>(registry: &R) {
    let id = registry.create(&sample_draft("CERT-V1")).await.expect("create");

    let hit = NewVerification {
        certificate_id: Some(id),
        verified_by: "10.0.0.1".into(),
        method: VerificationMethod::CertificateNumber,
        result: true,
    };
    let miss = NewVerification {
        certificate_id: None,
        verified_by: "unknown".into(),
        method: VerificationMethod::CertificateNumber,
        result: false,
    };
    let cross = NewVerification { method: VerificationMethod::LedgerCrossCheck, ..hit.clone() };

    let first = registry.log_verification(&hit).await.expect("log");
    registry.log_verification(&miss).await.expect("log");
    let third = registry.log_verification(&cross).await.expect("log");
    assert!(third.id > first.id);

    let all = registry.verifications(VerificationScope::All).await.expect("read back");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].verified_by, "10.0.0.1");
    assert_eq!(all[2].method, VerificationMethod::LedgerCrossCheck);

    let for_cert = registry.verifications(VerificationScope::Certificate(id)).await.expect("read");
    assert_eq!(for_cert.len(), 2);
    assert!(for_cert.iter().all(|r| r.result));

    let misses = registry.verifications(VerificationScope::Misses).await.expect("read");
    assert_eq!(misses.len(), 1);
    assert!(!misses[0].result);
}

// ============================================================================
// Reference data
// ============================================================================

/// Only active types are listed, ordered by name.
pub async fn list_types_active_sorted<R: CertificateRegistry>(registry: &R) {
    registry
        .register_type(&CertificateType::builder().id(CertificateTypeId(3)).name("Achievement").build())
        .await
        .expect("register type");

    let types = registry.list_types().await.expect("list types");
    let names: Vec<&str> = types.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Achievement", "Completion"]);

    let inactive = registry.find_type(INACTIVE_TYPE_ID).await.expect("find").expect("exists");
    assert!(!inactive.active);
    assert!(registry.find_type(TYPE_ID).await.expect("find").is_some());
}

/// Active resolution prefers testnets, then the newest row.
pub async fn active_network_prefers_testnet<R: CertificateRegistry>(registry: &R) {
    let mumbai = NetworkConfig {
        id: NetworkConfigId(2),
        network_name: "Mumbai".into(),
        chain_id: 80_001,
        rpc_url: "https://rpc-mumbai.example".into(),
        testnet: true,
        ..local_network()
    };
    let stale = NetworkConfig {
        id: NetworkConfigId(3),
        network_name: "Sepolia".into(),
        active: false,
        testnet: true,
        ..local_network()
    };
    registry.register_network(&mumbai).await.expect("register");
    registry.register_network(&stale).await.expect("register");

    let active = registry.active_network_config().await.expect("resolve").expect("exists");
    assert_eq!(active.network_name, "Mumbai");

    assert!(registry.network_config("Sepolia").await.expect("resolve").is_none());
    let local = registry.network_config("Localhost").await.expect("resolve").expect("exists");
    assert_eq!(local.chain_id, 31_337);
}

/// Actors resolve by id; unknown ids return `None`.
pub async fn find_actor_resolves_seeded<R: CertificateRegistry>(registry: &R) {
    let issuer = registry.find_actor(ISSUER_ID).await.expect("find").expect("exists");
    assert_eq!(issuer.name, "Grace Issuer");
    assert!(issuer.wallet_address.is_none());
    assert!(registry.find_actor(crate::types::ActorId(77)).await.expect("find").is_none());
}

/// Runs every conformance check, each against a fresh registry.
pub async fn run_all<R, F, Fut>(make: F)
where
    R: CertificateRegistry + 'static,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    find_by_number_missing_returns_none(&make().await).await;
    create_then_find_by_number(&make().await).await;
    create_duplicate_number_is_rejected(&make().await).await;
    attach_anchor_data_anchors(&make().await).await;
    attach_anchor_data_is_idempotent(&make().await).await;
    attach_anchor_data_unknown_id(&make().await).await;
    attach_to_revoked_stays_revoked(&make().await).await;
    revoke_sets_fields(&make().await).await;
    revoke_twice_is_invalid_state(&make().await).await;
    revoke_unknown_id(&make().await).await;
    tokio::time::timeout(
        Duration::from_secs(10),
        concurrent_revoke_single_winner(Arc::new(make().await)),
    )
    .await
    .expect("concurrent revoke finished");
    list_orders_newest_first(&make().await).await;
    list_applies_filters(&make().await).await;
    list_pending_respects_watermark(&make().await).await;
    verification_log_is_append_only(&make().await).await;
    list_types_active_sorted(&make().await).await;
    active_network_prefers_testnet(&make().await).await;
    find_actor_resolves_seeded(&make().await).await;
}
