//! Certificate domain model and relational registry.
//!
//! This crate holds everything the certificate lifecycle agrees on before it
//! touches an external system: the certificate model and its derived
//! lifecycle, the shared error taxonomy, and the [`CertificateRegistry`]
//! trait that the coordinator treats as the source of truth for validity.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 certledger-coordinator                      │
//! │   (issuance sequencing, verification, revocation, saga)     │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │      certledger-core         │     certledger-gateway       │
//! │  CertificateRegistry trait   │  LedgerGateway, Metadata-    │
//! │  model, CertError            │  Store, retry, breaker       │
//! ├──────────────┬───────────────┼──────────────────────────────┤
//! │MemoryRegistry│ SqliteRegistry│   chain RPC    │   Pinata    │
//! └──────────────┴───────────────┴──────────────────────────────┘
//! ```
//!
//! # Available Registries
//!
//! | Registry | Use Case | Persistence |
//! |----------|----------|-------------|
//! | [`MemoryRegistry`] | Testing, development | No |
//! | [`SqliteRegistry`] | Single-node deployments | Yes |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (seed data, fixtures, the
//!   `assert_cert_kind!` macro) and the `conformance` suite.

#![deny(unsafe_code)]

#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
pub mod model;
pub mod registry;
pub mod sqlite;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;

pub use error::{BoxError, CertError, CertResult, ConfigError, Dependency, Entity, ErrorKind};
pub use memory::MemoryRegistry;
pub use model::{
    Actor, AnchorData, Certificate, CertificateDraft, CertificateFilter, CertificateType,
    CertificateView, LifecycleState, LinkageState, NetworkConfig, NewVerification, Revocation,
    VerificationMethod, VerificationRecord, VerificationScope, Verifier,
};
pub use registry::CertificateRegistry;
pub use sqlite::SqliteRegistry;
pub use types::{ActorId, CertificateId, CertificateTypeId, LedgerId, NetworkConfigId, VerificationId};
