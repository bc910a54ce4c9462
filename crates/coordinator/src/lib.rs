//! Certificate lifecycle coordination across the registry, the ledger and
//! the metadata store.
//!
//! Issuance is a three-step saga whose middle step runs on the issuer's
//! side:
//!
//! ```text
//!  issuer client                  LifecycleCoordinator           registry
//!  ─────────────                  ────────────────────           ────────
//!  issue_certificate ───────────► validate, resolve,  ─────────► PENDING row
//!                    ◄─────────── IssuanceTicket
//!  IssuanceDriver:
//!    publish metadata ──► metadata store
//!    submit issuance  ──► ledger
//!    await receipt, extract ledger id
//!  attach_anchor_data ──────────► validate, write     ─────────► ANCHORED
//! ```
//!
//! A client that stops between submission and attach leaves a pending row
//! next to an on-chain record. The [`Reconciler`] links those rows later.
//!
//! The registry decides validity. Verification reads only the registry
//! unless a ledger cross-check is requested, and revocation writes the
//! ledger only under [`RevocationPolicy::LedgerFirst`].
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Enables the `driver-after-submit` fail point, used to
//!   simulate a client crash between ledger submission and attach.

#![deny(unsafe_code)]

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod number;
pub mod reconcile;
pub mod requests;

pub use audit::{
    AuditAction, AuditActor, AuditEvent, AuditLogger, AuditResult, MemoryAuditLogger,
    NoopAuditLogger, TracingAuditLogger,
};
pub use config::{
    CoordinatorConfig, DriverConfig, LedgerWaitConfig, NetworkSelection, NumberRetryConfig,
    ReconcileConfig, RevocationPolicy, normalize_network_name,
};
pub use coordinator::LifecycleCoordinator;
pub use driver::{DriverError, IssuanceDriver, IssuanceStage};
pub use number::{NumberSource, RandomNumberSource, format_number};
pub use reconcile::{DuplicateMatch, ReconciliationReport, Reconciler};
pub use requests::{
    AttachRequest, IssuanceTicket, IssueCertificateRequest, LedgerCheck, MetadataPayload,
    NetworkBinding, PublicCertificate, RevokeRequest, VerificationOutcome,
};
