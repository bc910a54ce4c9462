//! Certificate registry trait definition.
//!
//! The registry is the relational source of truth for certificate validity
//! and the single serialization point of the system. Everything the
//! coordinator knows about a certificate's lifecycle comes from here.
//!
//! # Implementing a Registry
//!
//! 1. Implement [`CertificateRegistry`]
//! 2. Enforce certificate number uniqueness at write time and map the
//!    violation to [`CertError::DuplicateCertificateNumber`]
//! 3. Make [`revoke`](CertificateRegistry::revoke) a conditional update so
//!    concurrent revocations produce exactly one winner
//! 4. Run the [`conformance`](crate::conformance) suite against it
//!
//! See [`MemoryRegistry`](crate::MemoryRegistry) for a reference implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::CertResult,
    model::{
        Actor, AnchorData, Certificate, CertificateDraft, CertificateFilter, CertificateType,
        CertificateView, NetworkConfig, NewVerification, Revocation, VerificationRecord,
        VerificationScope,
    },
    types::{ActorId, CertificateId, CertificateTypeId},
};

/// Relational certificate registry.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`create`](CertificateRegistry::create) | Insert a pending certificate row |
/// | [`attach_anchor_data`](CertificateRegistry::attach_anchor_data) | Record ledger and metadata linkage |
/// | [`revoke`](CertificateRegistry::revoke) | Conditional revocation |
/// | [`find_by_number`](CertificateRegistry::find_by_number) | Verification lookup |
/// | [`log_verification`](CertificateRegistry::log_verification) | Append-only audit |
/// | [`list_pending`](CertificateRegistry::list_pending) | Reconciliation scan |
#[async_trait]
pub trait CertificateRegistry: Send + Sync {
    /// Resolves an actor by id.
    async fn find_actor(&self, id: ActorId) -> CertResult<Option<Actor>>;

    /// Resolves a certificate and the names of the rows it references.
    async fn find_by_id(&self, id: CertificateId) -> CertResult<Option<CertificateView>>;

    /// Resolves a certificate by its public number.
    async fn find_by_number(&self, number: &str) -> CertResult<Option<CertificateView>>;

    /// Lists certificates matching `filter`, newest issue date first.
    async fn list(&self, filter: &CertificateFilter) -> CertResult<Vec<CertificateView>>;

    /// Lists pending certificates created strictly before `created_before`,
    /// oldest first.
    async fn list_pending(&self, created_before: DateTime<Utc>) -> CertResult<Vec<Certificate>>;

    /// Inserts a pending certificate row and returns its id.
    ///
    /// # Errors
    ///
    /// [`CertError::DuplicateCertificateNumber`](crate::CertError::DuplicateCertificateNumber)
    /// if the number is already taken. No row is written in that case.
    async fn create(&self, draft: &CertificateDraft) -> CertResult<CertificateId>;

    /// Writes the four linkage fields in one atomic update and returns the
    /// updated row.
    ///
    /// Revoked rows are updated too; revocation is unaffected.
    ///
    /// # Errors
    ///
    /// [`CertError::NotFound`](crate::CertError::NotFound) if the id does not resolve.
    async fn attach_anchor_data(
        &self,
        id: CertificateId,
        anchor: &AnchorData,
    ) -> CertResult<Certificate>;

    /// Revokes a certificate if and only if it is not already revoked.
    ///
    /// # Errors
    ///
    /// - [`CertError::NotFound`](crate::CertError::NotFound) if the id does not resolve
    /// - [`CertError::InvalidState`](crate::CertError::InvalidState) if it is already
    ///   revoked; the stored revocation is left untouched
    async fn revoke(&self, id: CertificateId, revocation: &Revocation) -> CertResult<Certificate>;

    /// Appends a verification record.
    async fn log_verification(&self, entry: &NewVerification) -> CertResult<VerificationRecord>;

    /// Reads verification records back in append order.
    async fn verifications(&self, scope: VerificationScope) -> CertResult<Vec<VerificationRecord>>;

    /// Lists active certificate types ordered by name.
    async fn list_types(&self) -> CertResult<Vec<CertificateType>>;

    /// Resolves a certificate type, active or not.
    async fn find_type(&self, id: CertificateTypeId) -> CertResult<Option<CertificateType>>;

    /// Returns the newest active network configuration, testnets first.
    async fn active_network_config(&self) -> CertResult<Option<NetworkConfig>>;

    /// Returns the active network configuration with the given name.
    async fn network_config(&self, name: &str) -> CertResult<Option<NetworkConfig>>;

    /// Registers or replaces an actor.
    async fn register_actor(&self, actor: &Actor) -> CertResult<()>;

    /// Registers or replaces a certificate type.
    async fn register_type(&self, certificate_type: &CertificateType) -> CertResult<()>;

    /// Registers or replaces a network configuration.
    async fn register_network(&self, network: &NetworkConfig) -> CertResult<()>;
}
