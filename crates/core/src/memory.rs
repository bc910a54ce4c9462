//! In-memory certificate registry.
//!
//! All tables live behind a single [`parking_lot::RwLock`], so uniqueness
//! checks and the revocation compare-and-set happen under one write lock
//! and concurrent callers observe the same serialization the SQL registry
//! gets from its conditional updates.
//!
//! # Example
//!
//! ```
//! use certledger_core::{CertificateRegistry, MemoryRegistry};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let registry = MemoryRegistry::new();
//! assert!(registry.find_by_number("CERT-MISSING").await.unwrap().is_none());
//! # });
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    error::{CertError, CertResult, Entity},
    model::{
        Actor, AnchorData, Certificate, CertificateDraft, CertificateFilter, CertificateType,
        CertificateView, LifecycleState, NetworkConfig, NewVerification, Revocation,
        VerificationRecord, VerificationScope,
    },
    registry::CertificateRegistry,
    types::{ActorId, CertificateId, CertificateTypeId, NetworkConfigId, VerificationId},
};

#[derive(Debug, Default)]
struct Tables {
    actors: HashMap<ActorId, Actor>,
    types: HashMap<CertificateTypeId, CertificateType>,
    networks: BTreeMap<NetworkConfigId, NetworkConfig>,
    certificates: BTreeMap<CertificateId, Certificate>,
    numbers: HashMap<String, CertificateId>,
    verifications: Vec<VerificationRecord>,
    next_certificate_id: i64,
}

impl Tables {
    fn view(&self, certificate: &Certificate) -> CertificateView {
        let student = self.actors.get(&certificate.student_id);
        let name_of = |id: ActorId| self.actors.get(&id).map(|a| a.name.clone());
        CertificateView {
            student_name: student.map(|a| a.name.clone()),
            student_email: student.map(|a| a.email.clone()),
            certificate_type: self.types.get(&certificate.certificate_type_id).map(|t| t.name.clone()),
            issuer_name: name_of(certificate.issuer_id),
            revoked_by_name: certificate.revoked_by.and_then(name_of),
            certificate: certificate.clone(),
        }
    }
}

/// In-memory [`CertificateRegistry`] for tests and local development.
///
/// Cloning is cheap and clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of certificate rows.
    #[must_use]
    pub fn certificate_count(&self) -> usize {
        self.tables.read().certificates.len()
    }
}

#[async_trait]
impl CertificateRegistry for MemoryRegistry {
    #[tracing::instrument(skip(self))]
    async fn find_actor(&self, id: ActorId) -> CertResult<Option<Actor>> {
        Ok(self.tables.read().actors.get(&id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_id(&self, id: CertificateId) -> CertResult<Option<CertificateView>> {
        let tables = self.tables.read();
        Ok(tables.certificates.get(&id).map(|c| tables.view(c)))
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_number(&self, number: &str) -> CertResult<Option<CertificateView>> {
        let tables = self.tables.read();
        Ok(tables
            .numbers
            .get(number)
            .and_then(|id| tables.certificates.get(id))
            .map(|c| tables.view(c)))
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, filter: &CertificateFilter) -> CertResult<Vec<CertificateView>> {
        let tables = self.tables.read();
        let mut rows: Vec<&Certificate> =
            tables.certificates.values().filter(|c| filter.matches(c)).collect();
        rows.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then(b.id.cmp(&a.id)));
        Ok(rows.into_iter().map(|c| tables.view(c)).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn list_pending(&self, created_before: DateTime<Utc>) -> CertResult<Vec<Certificate>> {
        let tables = self.tables.read();
        let mut rows: Vec<Certificate> = tables
            .certificates
            .values()
            .filter(|c| c.state() == LifecycleState::Pending && c.created_at < created_before)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    #[tracing::instrument(skip(self, draft), fields(number = %draft.certificate_number))]
    async fn create(&self, draft: &CertificateDraft) -> CertResult<CertificateId> {
        let mut tables = self.tables.write();

        if tables.numbers.contains_key(&draft.certificate_number) {
            return Err(CertError::duplicate_number(&draft.certificate_number));
        }

        tables.next_certificate_id += 1;
        let id = CertificateId(tables.next_certificate_id);
        let certificate = Certificate::from_draft(id, draft, Utc::now());
        tables.numbers.insert(draft.certificate_number.clone(), id);
        tables.certificates.insert(id, certificate);
        Ok(id)
    }

    #[tracing::instrument(skip(self, anchor), fields(ledger_id = %anchor.ledger_id))]
    async fn attach_anchor_data(
        &self,
        id: CertificateId,
        anchor: &AnchorData,
    ) -> CertResult<Certificate> {
        let mut tables = self.tables.write();
        let certificate = tables
            .certificates
            .get_mut(&id)
            .ok_or_else(|| CertError::not_found(Entity::Certificate, id))?;
        certificate.apply_anchor(anchor, Utc::now());
        Ok(certificate.clone())
    }

    #[tracing::instrument(skip(self, revocation), fields(revoked_by = %revocation.revoked_by))]
    async fn revoke(&self, id: CertificateId, revocation: &Revocation) -> CertResult<Certificate> {
        let mut tables = self.tables.write();
        let certificate = tables
            .certificates
            .get_mut(&id)
            .ok_or_else(|| CertError::not_found(Entity::Certificate, id))?;

        if certificate.is_revoked {
            return Err(CertError::invalid_state(format!("certificate {id} is already revoked")));
        }

        certificate.apply_revocation(revocation);
        Ok(certificate.clone())
    }

    #[tracing::instrument(skip(self, entry), fields(method = entry.method.as_str(), result = entry.result))]
    async fn log_verification(&self, entry: &NewVerification) -> CertResult<VerificationRecord> {
        let mut tables = self.tables.write();
        let record = VerificationRecord {
            id: VerificationId(tables.verifications.len() as i64 + 1),
            certificate_id: entry.certificate_id,
            verified_by: entry.verified_by.clone(),
            method: entry.method,
            result: entry.result,
            verified_at: Utc::now(),
        };
        tables.verifications.push(record.clone());
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn verifications(&self, scope: VerificationScope) -> CertResult<Vec<VerificationRecord>> {
        let tables = self.tables.read();
        Ok(tables.verifications.iter().filter(|r| scope.includes(r)).cloned().collect())
    }

    #[tracing::instrument(skip(self))]
    async fn list_types(&self) -> CertResult<Vec<CertificateType>> {
        let tables = self.tables.read();
        let mut types: Vec<CertificateType> =
            tables.types.values().filter(|t| t.active).cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    #[tracing::instrument(skip(self))]
    async fn find_type(&self, id: CertificateTypeId) -> CertResult<Option<CertificateType>> {
        Ok(self.tables.read().types.get(&id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn active_network_config(&self) -> CertResult<Option<NetworkConfig>> {
        let tables = self.tables.read();
        Ok(tables
            .networks
            .values()
            .filter(|n| n.active)
            .max_by_key(|n| (n.testnet, n.id))
            .cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn network_config(&self, name: &str) -> CertResult<Option<NetworkConfig>> {
        let tables = self.tables.read();
        Ok(tables
            .networks
            .values()
            .filter(|n| n.active && n.network_name == name)
            .max_by_key(|n| n.id)
            .cloned())
    }

    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    async fn register_actor(&self, actor: &Actor) -> CertResult<()> {
        self.tables.write().actors.insert(actor.id, actor.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self, certificate_type), fields(type_id = %certificate_type.id))]
    async fn register_type(&self, certificate_type: &CertificateType) -> CertResult<()> {
        self.tables.write().types.insert(certificate_type.id, certificate_type.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self, network), fields(network = %network.network_name))]
    async fn register_network(&self, network: &NetworkConfig) -> CertResult<()> {
        self.tables.write().networks.insert(network.id, network.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::{sample_draft, seeded_memory_registry};

    #[tokio::test]
    async fn test_clones_share_tables() {
        let registry = MemoryRegistry::new();
        let clone = registry.clone();
        registry.create(&sample_draft("CERT-A")).await.unwrap();
        assert_eq!(clone.certificate_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_number_writes_nothing() {
        let registry = seeded_memory_registry().await;
        registry.create(&sample_draft("CERT-DUP")).await.unwrap();
        let err = registry.create(&sample_draft("CERT-DUP")).await.unwrap_err();
        assert!(matches!(err, CertError::DuplicateCertificateNumber { .. }));
        assert_eq!(registry.certificate_count(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let registry = MemoryRegistry::new();
        let a = registry.create(&sample_draft("CERT-1")).await.unwrap();
        let _ = registry.create(&sample_draft("CERT-1")).await;
        let b = registry.create(&sample_draft("CERT-2")).await.unwrap();
        assert!(b > a);
    }
}
