//! Request and response types of the coordinator's operation surface.
//!
//! Wire names are `camelCase`. Requests are validated with `validate()`
//! before any lookup or write.

use certledger_core::{
    ActorId, AnchorData, CertError, CertResult, CertificateId, CertificateTypeId, CertificateView,
    LedgerId, LifecycleState, NetworkConfig,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn require(field: &'static str, value: &str) -> CertResult<()> {
    if value.trim().is_empty() {
        return Err(CertError::invalid_input(field, "must not be empty"));
    }
    Ok(())
}

/// Issuance step 1 input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct IssueCertificateRequest {
    /// Student receiving the certificate.
    pub student_id: ActorId,
    /// Certificate type.
    pub certificate_type_id: CertificateTypeId,
    /// Issuing actor, taken from the caller's session.
    pub issuer_id: ActorId,
    /// Course name.
    #[builder(into)]
    pub course_name: String,
    /// Grade.
    #[builder(into)]
    pub grade: String,
    /// Optional free-text description.
    #[serde(default)]
    #[builder(into)]
    pub description: Option<String>,
}

impl IssueCertificateRequest {
    /// Checks required text fields.
    ///
    /// # Errors
    ///
    /// [`CertError::InvalidInput`] for an empty course name or grade.
    pub fn validate(&self) -> CertResult<()> {
        require("courseName", &self.course_name)?;
        require("grade", &self.grade)
    }
}

/// Issuance step 3 input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    /// Certificate to link.
    pub certificate_id: CertificateId,
    /// Chain-assigned id.
    pub ledger_id: LedgerId,
    /// Issuance transaction hash.
    pub transaction_hash: String,
    /// Metadata content identifier.
    pub content_id: String,
    /// Metadata retrieval URL.
    pub metadata_url: String,
}

impl AttachRequest {
    /// Builds a request from anchor data.
    #[must_use]
    pub fn from_anchor(certificate_id: CertificateId, anchor: AnchorData) -> Self {
        Self {
            certificate_id,
            ledger_id: anchor.ledger_id,
            transaction_hash: anchor.transaction_hash,
            content_id: anchor.content_id,
            metadata_url: anchor.metadata_url,
        }
    }

    /// The anchor data to write.
    #[must_use]
    pub fn anchor(&self) -> AnchorData {
        AnchorData {
            ledger_id: self.ledger_id,
            transaction_hash: self.transaction_hash.trim().to_owned(),
            content_id: self.content_id.trim().to_owned(),
            metadata_url: self.metadata_url.trim().to_owned(),
        }
    }

    /// Checks that all four linkage fields are present.
    ///
    /// # Errors
    ///
    /// [`CertError::InvalidInput`] naming the first missing field.
    pub fn validate(&self) -> CertResult<()> {
        self.anchor().validate()
    }
}

/// Revocation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    /// Certificate to revoke.
    pub certificate_id: CertificateId,
    /// Revoking administrator.
    pub revoked_by: ActorId,
    /// Reason, trimmed before storage.
    pub reason: String,
}

impl RevokeRequest {
    /// Checks the reason.
    ///
    /// # Errors
    ///
    /// [`CertError::InvalidInput`] for a blank reason.
    pub fn validate(&self) -> CertResult<()> {
        require("reason", &self.reason)
    }
}

/// Denormalized snapshot the client publishes to the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPayload {
    /// Certificate number.
    pub certificate_number: String,
    /// Student reference.
    pub student_id: ActorId,
    /// Student name.
    pub student_name: String,
    /// Student email.
    pub student_email: String,
    /// Type reference.
    pub certificate_type_id: CertificateTypeId,
    /// Type name.
    pub certificate_type: String,
    /// Course name.
    pub course_name: String,
    /// Grade.
    pub grade: String,
    /// Issue timestamp.
    pub issue_date: DateTime<Utc>,
    /// Issuer reference.
    pub issuer_id: ActorId,
    /// Issuer name.
    pub issuer_name: String,
    /// Description, empty when none was given.
    pub description: String,
    /// Network the certificate is bound to.
    pub network: String,
    /// Contract address on that network.
    pub contract_address: String,
}

impl MetadataPayload {
    /// JSON form for publishing.
    ///
    /// # Errors
    ///
    /// [`CertError::Internal`] if serialization fails.
    pub fn to_json(&self) -> CertResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| CertError::internal_with_source("metadata payload serialization failed", e))
    }

    /// Reads the certificate number from a published document.
    #[must_use]
    pub fn certificate_number_of(document: &serde_json::Value) -> Option<&str> {
        document.get("certificateNumber").and_then(serde_json::Value::as_str)
    }
}

/// The network a certificate is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBinding {
    /// Contract address.
    pub contract_address: String,
    /// Network name.
    pub network: String,
    /// Chain id.
    pub chain_id: u64,
    /// JSON-RPC endpoint.
    pub rpc_url: String,
}

impl From<&NetworkConfig> for NetworkBinding {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            contract_address: config.contract_address.clone(),
            network: config.network_name.clone(),
            chain_id: config.chain_id,
            rpc_url: config.rpc_url.clone(),
        }
    }
}

/// Issuance step 1 output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceTicket {
    /// Registry id of the pending row.
    pub certificate_id: CertificateId,
    /// Assigned certificate number.
    pub certificate_number: String,
    /// Payload to publish.
    pub metadata: MetadataPayload,
    /// Network to submit the transaction to.
    pub network: NetworkBinding,
    /// Student wallet, when registered.
    pub student_wallet: Option<String>,
}

/// Public projection of a certificate. Carries names, never actor ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicCertificate {
    /// Certificate number.
    pub certificate_number: String,
    /// Student name.
    pub student_name: Option<String>,
    /// Course name.
    pub course_name: String,
    /// Grade.
    pub grade: String,
    /// Issue timestamp.
    pub issue_date: DateTime<Utc>,
    /// Type name.
    pub certificate_type: Option<String>,
    /// Issuer name.
    pub issuer_name: Option<String>,
    /// Revoked flag.
    pub is_revoked: bool,
    /// Revocation time.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Revocation reason.
    pub revoked_reason: Option<String>,
    /// Chain-assigned id.
    pub ledger_id: Option<LedgerId>,
    /// Issuance transaction hash.
    pub transaction_hash: Option<String>,
    /// Metadata content identifier.
    pub content_id: Option<String>,
    /// Network the certificate is bound to.
    pub network: Option<String>,
    /// Derived lifecycle state.
    pub state: LifecycleState,
}

impl From<&CertificateView> for PublicCertificate {
    fn from(view: &CertificateView) -> Self {
        let cert = &view.certificate;
        Self {
            certificate_number: cert.certificate_number.clone(),
            student_name: view.student_name.clone(),
            course_name: cert.course_name.clone(),
            grade: cert.grade.clone(),
            issue_date: cert.issue_date,
            certificate_type: view.certificate_type.clone(),
            issuer_name: view.issuer_name.clone(),
            is_revoked: cert.is_revoked,
            revoked_at: cert.revoked_at,
            revoked_reason: cert.revoked_reason.clone(),
            ledger_id: cert.ledger_id,
            transaction_hash: cert.transaction_hash.clone(),
            content_id: cert.content_id.clone(),
            network: cert.network.clone(),
            state: cert.state(),
        }
    }
}

/// Outcome of the optional ledger read during verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LedgerCheck {
    /// The certificate is still pending; there is nothing to compare.
    NotAnchored,
    /// The ledger has no record for the linked id.
    Missing {
        /// Linked id that did not resolve.
        ledger_id: LedgerId,
    },
    /// The ledger record was read.
    Checked {
        /// Linked id.
        ledger_id: LedgerId,
        /// Ledger content id equals the registry's.
        content_id_matches: bool,
        /// Ledger revoked flag.
        ledger_revoked: bool,
        /// Ledger and registry disagree on content id or revocation.
        diverged: bool,
    },
    /// The ledger could not be read. The registry result stands.
    Unavailable {
        /// Failure description.
        reason: String,
    },
}

/// Verification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    /// `true` unless the certificate is revoked.
    pub is_valid: bool,
    /// Public projection.
    pub certificate: PublicCertificate,
    /// Ledger comparison, present for cross-check verifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerCheck>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use certledger_core::{CertificateId, ErrorKind, LedgerId};

    use super::*;

    #[test]
    fn test_issue_request_requires_course_and_grade() {
        let request = IssueCertificateRequest::builder()
            .student_id(ActorId(1))
            .certificate_type_id(CertificateTypeId(1))
            .issuer_id(ActorId(2))
            .course_name("  ")
            .grade("A")
            .build();
        let err = request.validate().unwrap_err();
        assert!(matches!(err, CertError::InvalidInput { field: "courseName", .. }));
    }

    #[test]
    fn test_issue_request_wire_names() {
        let request: IssueCertificateRequest = serde_json::from_str(
            r#"{"studentId":1,"certificateTypeId":1,"issuerId":2,"courseName":"Rust","grade":"A"}"#,
        )
        .unwrap();
        assert!(request.description.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_attach_request_names_missing_field() {
        let request = AttachRequest {
            certificate_id: CertificateId(1),
            ledger_id: LedgerId(1),
            transaction_hash: "0xabc".into(),
            content_id: String::new(),
            metadata_url: "https://gw/ipfs/Qm123".into(),
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(matches!(err, CertError::InvalidInput { field: "contentId", .. }));
    }

    #[test]
    fn test_zero_ledger_id_rejected() {
        let request = AttachRequest {
            certificate_id: CertificateId(1),
            ledger_id: LedgerId(0),
            transaction_hash: "0xabc".into(),
            content_id: "Qm123".into(),
            metadata_url: "https://gw/ipfs/Qm123".into(),
        };
        assert!(matches!(request.validate(), Err(CertError::InvalidInput { field: "ledgerId", .. })));
    }

    #[test]
    fn test_revoke_reason_required() {
        let request =
            RevokeRequest { certificate_id: CertificateId(1), revoked_by: ActorId(3), reason: "\n".into() };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_ledger_check_tagging() {
        let json = serde_json::to_value(LedgerCheck::Missing { ledger_id: LedgerId(4) }).unwrap();
        assert_eq!(json["status"], "missing");
        assert_eq!(json["ledgerId"], 4);
    }
}
