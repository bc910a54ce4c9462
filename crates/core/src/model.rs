//! Certificate domain model.
//!
//! # Lifecycle
//!
//! ```text
//! ┌─────────────┐   attach anchor data   ┌─────────────┐
//! │   Pending   │───────────────────────►│  Anchored   │
//! │ (row only)  │                        │ (ledger +   │
//! └──────┬──────┘                        │  metadata)  │
//!        │                               └──────┬──────┘
//!        │            revoke                    │ revoke
//!        └──────────────►┌─────────────┐◄───────┘
//!                        │   Revoked   │
//!                        │ (terminal)  │
//!                        └─────────────┘
//! ```
//!
//! Nothing is ever physically deleted. The lifecycle state is derived from
//! the row's linkage and revocation columns rather than stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{CertError, CertResult},
    types::{ActorId, CertificateId, CertificateTypeId, LedgerId, NetworkConfigId, VerificationId},
};

/// A student, issuer or administrator known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Actor identifier.
    pub id: ActorId,
    /// Display name.
    #[builder(into)]
    pub name: String,
    /// Contact email.
    #[builder(into)]
    pub email: String,
    /// Wallet address, when the actor has registered one.
    #[builder(into)]
    pub wallet_address: Option<String>,
}

/// A kind of certificate (completion, achievement, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct CertificateType {
    /// Type identifier.
    pub id: CertificateTypeId,
    /// Type name, also written to the ledger.
    #[builder(into)]
    pub name: String,
    /// Optional description.
    #[builder(into)]
    pub description: Option<String>,
    /// Inactive types are hidden from listings and rejected at issuance.
    #[builder(default = true)]
    pub active: bool,
}

/// Blockchain network configuration row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Row identifier.
    pub id: NetworkConfigId,
    /// Network name, e.g. `Localhost` or `Mumbai`.
    #[builder(into)]
    pub network_name: String,
    /// Address of the certificate contract on this network.
    #[builder(into)]
    pub contract_address: String,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// JSON-RPC endpoint.
    #[builder(into)]
    pub rpc_url: String,
    /// Block explorer base URL.
    #[builder(into)]
    pub block_explorer: Option<String>,
    /// Only active configurations are resolved.
    #[builder(default = true)]
    pub active: bool,
    /// Testnets win ties when resolving the active configuration.
    #[builder(default)]
    pub testnet: bool,
}

impl NetworkConfig {
    /// Returns the explorer URL for a transaction hash, if an explorer is configured.
    #[must_use]
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.block_explorer
            .as_deref()
            .filter(|base| !base.is_empty())
            .map(|base| format!("{}/tx/{tx_hash}", base.trim_end_matches('/')))
    }
}

/// Input for creating a pending certificate row.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct CertificateDraft {
    /// Pre-generated certificate number.
    #[builder(into)]
    pub certificate_number: String,
    /// Student the certificate is issued to.
    pub student_id: ActorId,
    /// Certificate type.
    pub certificate_type_id: CertificateTypeId,
    /// Issuing actor.
    pub issuer_id: ActorId,
    /// Course name.
    #[builder(into)]
    pub course_name: String,
    /// Grade.
    #[builder(into)]
    pub grade: String,
    /// Free-text description.
    #[builder(into)]
    pub description: Option<String>,
    /// Issue timestamp.
    #[builder(default = Utc::now())]
    pub issue_date: DateTime<Utc>,
    /// Network the certificate is bound to.
    #[builder(into)]
    pub network: String,
    /// Contract address on that network.
    #[builder(into)]
    pub contract_address: String,
}

/// Ledger and metadata linkage attached in issuance step 3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorData {
    /// Chain-assigned certificate id.
    pub ledger_id: LedgerId,
    /// Hash of the issuance transaction.
    pub transaction_hash: String,
    /// Content identifier of the published metadata.
    pub content_id: String,
    /// Retrieval URL of the published metadata.
    pub metadata_url: String,
}

impl AnchorData {
    /// Validates that every field is present.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::InvalidInput`] naming the first empty field.
    pub fn validate(&self) -> CertResult<()> {
        if self.ledger_id.0 == 0 {
            return Err(CertError::invalid_input("ledgerId", "must be a positive sequence number"));
        }
        for (field, value) in [
            ("transactionHash", &self.transaction_hash),
            ("contentId", &self.content_id),
            ("metadataUrl", &self.metadata_url),
        ] {
            if value.trim().is_empty() {
                return Err(CertError::invalid_input(field, "must not be empty"));
            }
        }
        Ok(())
    }
}

/// A revocation transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    /// Actor performing the revocation.
    pub revoked_by: ActorId,
    /// Non-empty reason.
    pub reason: String,
    /// When the revocation happened.
    pub revoked_at: DateTime<Utc>,
}

/// Lifecycle state derived from a certificate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Row exists; ledger or metadata linkage is incomplete.
    Pending,
    /// Ledger and metadata linkage recorded.
    Anchored,
    /// Revoked. Terminal.
    Revoked,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Anchored => write!(f, "anchored"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// Consistency of the ledger linkage columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkageState {
    /// No linkage recorded.
    Unlinked,
    /// All four linkage fields recorded.
    Linked,
    /// Some but not all linkage fields recorded. Never a valid terminal state.
    Inconsistent,
}

/// A certificate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Registry identifier.
    pub id: CertificateId,
    /// Human-readable, globally unique number.
    pub certificate_number: String,
    /// Student reference.
    pub student_id: ActorId,
    /// Type reference.
    pub certificate_type_id: CertificateTypeId,
    /// Issuer reference.
    pub issuer_id: ActorId,
    /// Course name.
    pub course_name: String,
    /// Grade.
    pub grade: String,
    /// Optional description.
    pub description: Option<String>,
    /// Issue timestamp.
    pub issue_date: DateTime<Utc>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Chain-assigned id.
    pub ledger_id: Option<LedgerId>,
    /// Issuance transaction hash.
    pub transaction_hash: Option<String>,
    /// Contract address the certificate is bound to.
    pub contract_address: Option<String>,
    /// Network the certificate is bound to.
    pub network: Option<String>,
    /// Metadata content identifier.
    pub content_id: Option<String>,
    /// Metadata retrieval URL.
    pub metadata_url: Option<String>,
    /// Monotonic revoked flag.
    pub is_revoked: bool,
    /// Revocation time.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Revoking actor.
    pub revoked_by: Option<ActorId>,
    /// Revocation reason.
    pub revoked_reason: Option<String>,
}

impl Certificate {
    /// Builds the pending row for a draft.
    #[must_use]
    pub fn from_draft(id: CertificateId, draft: &CertificateDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            certificate_number: draft.certificate_number.clone(),
            student_id: draft.student_id,
            certificate_type_id: draft.certificate_type_id,
            issuer_id: draft.issuer_id,
            course_name: draft.course_name.clone(),
            grade: draft.grade.clone(),
            description: draft.description.clone(),
            issue_date: draft.issue_date,
            created_at: now,
            updated_at: now,
            ledger_id: None,
            transaction_hash: None,
            contract_address: Some(draft.contract_address.clone()),
            network: Some(draft.network.clone()),
            content_id: None,
            metadata_url: None,
            is_revoked: false,
            revoked_at: None,
            revoked_by: None,
            revoked_reason: None,
        }
    }

    /// Consistency of the linkage columns.
    #[must_use]
    pub fn linkage(&self) -> LinkageState {
        let present = [
            self.ledger_id.is_some(),
            self.transaction_hash.is_some(),
            self.content_id.is_some(),
            self.metadata_url.is_some(),
        ];
        match present.iter().filter(|p| **p).count() {
            0 => LinkageState::Unlinked,
            4 => LinkageState::Linked,
            _ => LinkageState::Inconsistent,
        }
    }

    /// Derived lifecycle state. Revocation dominates linkage.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        if self.is_revoked {
            LifecycleState::Revoked
        } else if self.linkage() == LinkageState::Linked {
            LifecycleState::Anchored
        } else {
            LifecycleState::Pending
        }
    }

    /// Returns the recorded anchor data when linkage is complete.
    #[must_use]
    pub fn anchor(&self) -> Option<AnchorData> {
        Some(AnchorData {
            ledger_id: self.ledger_id?,
            transaction_hash: self.transaction_hash.clone()?,
            content_id: self.content_id.clone()?,
            metadata_url: self.metadata_url.clone()?,
        })
    }

    /// A pending certificate older than `threshold` may have been abandoned
    /// by the client driving issuance.
    #[must_use]
    pub fn is_possibly_abandoned(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.state() == LifecycleState::Pending && now - self.created_at >= threshold
    }

    /// Applies anchor data in place.
    pub fn apply_anchor(&mut self, anchor: &AnchorData, now: DateTime<Utc>) {
        self.ledger_id = Some(anchor.ledger_id);
        self.transaction_hash = Some(anchor.transaction_hash.clone());
        self.content_id = Some(anchor.content_id.clone());
        self.metadata_url = Some(anchor.metadata_url.clone());
        self.updated_at = now;
    }

    /// Applies a revocation in place. Callers must have checked the flag.
    pub fn apply_revocation(&mut self, revocation: &Revocation) {
        self.is_revoked = true;
        self.revoked_at = Some(revocation.revoked_at);
        self.revoked_by = Some(revocation.revoked_by);
        self.revoked_reason = Some(revocation.reason.clone());
        self.updated_at = revocation.revoked_at;
    }
}

/// A certificate joined with the names of the rows it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateView {
    /// The certificate row.
    #[serde(flatten)]
    pub certificate: Certificate,
    /// Student name.
    pub student_name: Option<String>,
    /// Student email.
    pub student_email: Option<String>,
    /// Certificate type name.
    pub certificate_type: Option<String>,
    /// Issuer name.
    pub issuer_name: Option<String>,
    /// Name of the revoking actor.
    pub revoked_by_name: Option<String>,
}

/// Listing filter. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct CertificateFilter {
    /// Only certificates of this student.
    pub student_id: Option<ActorId>,
    /// Only certificates of this type.
    pub certificate_type_id: Option<CertificateTypeId>,
    /// Only revoked (`true`) or unrevoked (`false`) certificates.
    pub revoked: Option<bool>,
}

impl CertificateFilter {
    /// Returns `true` if the certificate passes the filter.
    #[must_use]
    pub fn matches(&self, certificate: &Certificate) -> bool {
        self.student_id.is_none_or(|id| id == certificate.student_id)
            && self.certificate_type_id.is_none_or(|id| id == certificate.certificate_type_id)
            && self.revoked.is_none_or(|revoked| revoked == certificate.is_revoked)
    }
}

/// How a verification was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Registry lookup by certificate number.
    CertificateNumber,
    /// Registry lookup followed by a ledger read.
    LedgerCrossCheck,
}

impl VerificationMethod {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CertificateNumber => "certificate_number",
            Self::LedgerCrossCheck => "ledger_cross_check",
        }
    }

    /// Parses the storage name.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Internal`] for unknown names.
    pub fn parse(value: &str) -> CertResult<Self> {
        match value {
            "certificate_number" => Ok(Self::CertificateNumber),
            "ledger_cross_check" => Ok(Self::LedgerCrossCheck),
            other => Err(CertError::internal(format!("unknown verification method: {other}"))),
        }
    }
}

/// Who performed a verification.
///
/// Verification is public, so an anonymous caller is identified by a
/// network-level identifier such as its IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verifier {
    /// An authenticated actor.
    Actor(ActorId),
    /// A network-level identifier.
    Network(String),
}

impl std::fmt::Display for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Actor(id) => write!(f, "actor:{id}"),
            Self::Network(addr) if addr.trim().is_empty() => write!(f, "unknown"),
            Self::Network(addr) => write!(f, "{addr}"),
        }
    }
}

/// A verification attempt to append to the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVerification {
    /// Resolved certificate, `None` when the lookup missed.
    pub certificate_id: Option<CertificateId>,
    /// Verifier identity.
    pub verified_by: String,
    /// Verification method.
    pub method: VerificationMethod,
    /// Whether the lookup succeeded.
    pub result: bool,
}

/// An appended verification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    /// Record identifier.
    pub id: VerificationId,
    /// Resolved certificate.
    pub certificate_id: Option<CertificateId>,
    /// Verifier identity.
    pub verified_by: String,
    /// Verification method.
    pub method: VerificationMethod,
    /// Whether the lookup succeeded.
    pub result: bool,
    /// When the record was appended.
    pub verified_at: DateTime<Utc>,
}

/// Which verification records to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationScope {
    /// Every record.
    All,
    /// Records for one certificate.
    Certificate(CertificateId),
    /// Records of failed lookups.
    Misses,
}

impl VerificationScope {
    /// Returns `true` if the record is in scope.
    #[must_use]
    pub fn includes(&self, record: &VerificationRecord) -> bool {
        match self {
            Self::All => true,
            Self::Certificate(id) => record.certificate_id == Some(*id),
            Self::Misses => record.certificate_id.is_none(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn draft() -> CertificateDraft {
        CertificateDraft::builder()
            .certificate_number("CERT-1-ABCDEF")
            .student_id(ActorId(1))
            .certificate_type_id(CertificateTypeId(1))
            .issuer_id(ActorId(2))
            .course_name("Distributed Systems")
            .grade("A")
            .network("Localhost")
            .contract_address("0x5FbDB2315678afecb367f032d93F642f64180aa3")
            .build()
    }

    fn anchor() -> AnchorData {
        AnchorData {
            ledger_id: LedgerId(1),
            transaction_hash: "0xabc".into(),
            content_id: "Qm123".into(),
            metadata_url: "https://gw/ipfs/Qm123".into(),
        }
    }

    #[test]
    fn test_new_certificate_is_pending_and_unlinked() {
        let cert = Certificate::from_draft(CertificateId(1), &draft(), Utc::now());
        assert_eq!(cert.state(), LifecycleState::Pending);
        assert_eq!(cert.linkage(), LinkageState::Unlinked);
        assert!(cert.anchor().is_none());
        assert_eq!(cert.network.as_deref(), Some("Localhost"));
    }

    #[test]
    fn test_anchor_makes_certificate_anchored() {
        let mut cert = Certificate::from_draft(CertificateId(1), &draft(), Utc::now());
        cert.apply_anchor(&anchor(), Utc::now());
        assert_eq!(cert.state(), LifecycleState::Anchored);
        assert_eq!(cert.anchor(), Some(anchor()));
    }

    #[test]
    fn test_partial_linkage_is_inconsistent() {
        let mut cert = Certificate::from_draft(CertificateId(1), &draft(), Utc::now());
        cert.ledger_id = Some(LedgerId(4));
        assert_eq!(cert.linkage(), LinkageState::Inconsistent);
        assert_eq!(cert.state(), LifecycleState::Pending);
    }

    #[test]
    fn test_revocation_dominates() {
        let mut cert = Certificate::from_draft(CertificateId(1), &draft(), Utc::now());
        cert.apply_anchor(&anchor(), Utc::now());
        cert.apply_revocation(&Revocation {
            revoked_by: ActorId(3),
            reason: "fraud".into(),
            revoked_at: Utc::now(),
        });
        assert_eq!(cert.state(), LifecycleState::Revoked);
        assert_eq!(cert.linkage(), LinkageState::Linked);
    }

    #[test]
    fn test_possibly_abandoned_only_when_pending_and_old() {
        let created = Utc::now() - Duration::hours(30);
        let mut cert = Certificate::from_draft(CertificateId(1), &draft(), created);
        assert!(cert.is_possibly_abandoned(Utc::now(), Duration::hours(24)));
        assert!(!cert.is_possibly_abandoned(Utc::now(), Duration::hours(48)));
        cert.apply_anchor(&anchor(), Utc::now());
        assert!(!cert.is_possibly_abandoned(Utc::now(), Duration::hours(24)));
    }

    #[test]
    fn test_anchor_validation_rejects_empty_fields() {
        let mut data = anchor();
        data.content_id = "  ".into();
        let err = data.validate().unwrap_err();
        assert!(matches!(err, CertError::InvalidInput { field: "contentId", .. }));

        let mut data = anchor();
        data.ledger_id = LedgerId(0);
        assert!(data.validate().is_err());
        assert!(anchor().validate().is_ok());
    }

    #[test]
    fn test_filter_matches() {
        let cert = Certificate::from_draft(CertificateId(1), &draft(), Utc::now());
        assert!(CertificateFilter::default().matches(&cert));
        assert!(CertificateFilter::builder().student_id(ActorId(1)).build().matches(&cert));
        assert!(!CertificateFilter::builder().student_id(ActorId(9)).build().matches(&cert));
        assert!(!CertificateFilter::builder().revoked(true).build().matches(&cert));
    }

    #[test]
    fn test_verifier_display() {
        assert_eq!(Verifier::Actor(ActorId(5)).to_string(), "actor:5");
        assert_eq!(Verifier::Network("10.0.0.1".into()).to_string(), "10.0.0.1");
        assert_eq!(Verifier::Network(String::new()).to_string(), "unknown");
    }

    #[test]
    fn test_explorer_url() {
        let network = NetworkConfig::builder()
            .id(NetworkConfigId(1))
            .network_name("Mumbai")
            .contract_address("0x1")
            .chain_id(80001)
            .rpc_url("https://rpc")
            .block_explorer("https://mumbai.polygonscan.com/")
            .build();
        assert_eq!(
            network.explorer_tx_url("0xabc").as_deref(),
            Some("https://mumbai.polygonscan.com/tx/0xabc")
        );
    }
}
