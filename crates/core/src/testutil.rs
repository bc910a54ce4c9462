//! Shared fixtures for registry, gateway and coordinator tests.
//!
//! Feature-gated behind `testutil` so fixtures never reach production builds.
//!
//! ```toml
//! [dev-dependencies]
//! certledger-core = { path = "../core", features = ["testutil"] }
//! ```

use chrono::Utc;

use crate::{
    MemoryRegistry, SqliteRegistry,
    model::{Actor, AnchorData, CertificateDraft, CertificateType, NetworkConfig},
    registry::CertificateRegistry,
    types::{ActorId, CertificateTypeId, LedgerId, NetworkConfigId},
};

/// Seeded student.
pub const STUDENT_ID: ActorId = ActorId(1);
/// Seeded issuer.
pub const ISSUER_ID: ActorId = ActorId(2);
/// Seeded administrator.
pub const ADMIN_ID: ActorId = ActorId(3);
/// Seeded student without a wallet address.
pub const WALLETLESS_STUDENT_ID: ActorId = ActorId(4);
/// Seeded active certificate type.
pub const TYPE_ID: CertificateTypeId = CertificateTypeId(1);
/// Seeded inactive certificate type.
pub const INACTIVE_TYPE_ID: CertificateTypeId = CertificateTypeId(2);
/// Name of the seeded network.
pub const NETWORK: &str = "Localhost";
/// Contract address of the seeded network.
pub const CONTRACT_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
/// Wallet address of the seeded student.
pub const STUDENT_WALLET: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

/// The seeded local development network.
#[must_use]
pub fn local_network() -> NetworkConfig {
    NetworkConfig::builder()
        .id(NetworkConfigId(1))
        .network_name(NETWORK)
        .contract_address(CONTRACT_ADDRESS)
        .chain_id(31337)
        .rpc_url("http://127.0.0.1:8545")
        .build()
}

/// Seeds actors, certificate types and the local network.
///
/// # Panics
///
/// Panics if the registry rejects a seed row.
pub async fn seed<R: CertificateRegistry + ?Sized>(registry: &R) {
    let actors = [
        Actor::builder()
            .id(STUDENT_ID)
            .name("Ada Student")
            .email("ada@example.edu")
            .wallet_address(STUDENT_WALLET)
            .build(),
        Actor::builder().id(ISSUER_ID).name("Grace Issuer").email("grace@example.edu").build(),
        Actor::builder().id(ADMIN_ID).name("Alan Admin").email("alan@example.edu").build(),
        Actor::builder()
            .id(WALLETLESS_STUDENT_ID)
            .name("Barbara Student")
            .email("barbara@example.edu")
            .build(),
    ];
    for actor in &actors {
        registry.register_actor(actor).await.expect("seed actor");
    }

    let types = [
        CertificateType::builder()
            .id(TYPE_ID)
            .name("Completion")
            .description("Course completion")
            .build(),
        CertificateType::builder().id(INACTIVE_TYPE_ID).name("Legacy").active(false).build(),
    ];
    for ty in &types {
        registry.register_type(ty).await.expect("seed type");
    }

    registry.register_network(&local_network()).await.expect("seed network");
}

/// A [`MemoryRegistry`] with the standard seed applied.
pub async fn seeded_memory_registry() -> MemoryRegistry {
    let registry = MemoryRegistry::new();
    seed(&registry).await;
    registry
}

/// An in-memory [`SqliteRegistry`] with the standard seed applied.
///
/// # Panics
///
/// Panics if the database cannot be created.
pub async fn seeded_sqlite_registry() -> SqliteRegistry {
    let registry = SqliteRegistry::open_in_memory().expect("open sqlite registry");
    seed(&registry).await;
    registry
}

/// A draft for the seeded student, issuer, type and network.
#[must_use]
pub fn sample_draft(number: &str) -> CertificateDraft {
    CertificateDraft::builder()
        .certificate_number(number)
        .student_id(STUDENT_ID)
        .certificate_type_id(TYPE_ID)
        .issuer_id(ISSUER_ID)
        .course_name("Distributed Systems")
        .grade("A")
        .description("Graduate seminar")
        .issue_date(Utc::now())
        .network(NETWORK)
        .contract_address(CONTRACT_ADDRESS)
        .build()
}

/// Anchor data whose fields are derived from `ledger_id`.
#[must_use]
pub fn sample_anchor(ledger_id: u64) -> AnchorData {
    AnchorData {
        ledger_id: LedgerId(ledger_id),
        transaction_hash: format!("0x{ledger_id:064x}"),
        content_id: format!("bafy{ledger_id:08}"),
        metadata_url: format!("https://gateway.example/ipfs/bafy{ledger_id:08}"),
    }
}

/// Assert that a [`CertResult`](crate::CertResult) failed with the given
/// [`ErrorKind`](crate::ErrorKind).
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use certledger_core::{CertError, CertResult, Entity, assert_cert_kind};
///
/// let result: CertResult<()> = Err(CertError::not_found(Entity::Certificate, 1));
/// assert_cert_kind!(result, NotFound);
/// ```
#[macro_export]
macro_rules! assert_cert_kind {
    ($result:expr, $kind:ident) => {
        match &$result {
            Err(err) => assert_eq!(
                err.kind(),
                $crate::ErrorKind::$kind,
                "expected {:?}, got: {err:?}",
                $crate::ErrorKind::$kind,
            ),
            Ok(value) => panic!("expected {:?}, got Ok({value:?})", $crate::ErrorKind::$kind),
        }
    };
    ($result:expr, $kind:ident, $msg:expr) => {
        match &$result {
            Err(err) => assert_eq!(
                err.kind(),
                $crate::ErrorKind::$kind,
                "{}: expected {:?}, got: {err:?}",
                $msg,
                $crate::ErrorKind::$kind,
            ),
            Ok(value) => {
                panic!("{}: expected {:?}, got Ok({value:?})", $msg, $crate::ErrorKind::$kind)
            },
        }
    };
}
