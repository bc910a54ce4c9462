//! Ledger gateway trait and chain-level types.
//!
//! The ledger is authoritative for whether an on-chain certificate record
//! exists. Everything here mirrors what an Ethereum JSON-RPC node reports:
//! transactions are identified by hash, receipts carry logs, and events are
//! queried by block range.

use alloy_primitives::{Address, B256, keccak256};
use async_trait::async_trait;
use bytes::Bytes;
use certledger_core::{CertResult, LedgerId};
use serde::{Deserialize, Serialize};

/// Arguments of `issueCertificate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceCall {
    /// Wallet the certificate is issued to.
    pub recipient: Address,
    /// Student number as stored off-chain.
    #[builder(into)]
    pub student_id: String,
    /// Student display name.
    #[builder(into)]
    pub student_name: String,
    /// Certificate type name.
    #[builder(into)]
    pub certificate_type: String,
    /// Course name.
    #[builder(into)]
    pub course_name: String,
    /// Grade.
    #[builder(into)]
    pub grade: String,
    /// Content identifier of the published metadata.
    #[builder(into)]
    pub content_id: String,
}

/// A submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle {
    /// Transaction hash.
    pub hash: B256,
}

impl std::fmt::Display for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// A log emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed fields.
    pub data: Bytes,
    /// Block the log was included in.
    pub block_number: u64,
    /// Transaction that emitted the log.
    pub transaction_hash: B256,
    /// Position of the log within the block.
    pub log_index: u64,
}

/// A mined transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash.
    pub transaction_hash: B256,
    /// Inclusion block.
    pub block_number: u64,
    /// `true` if execution succeeded.
    pub success: bool,
    /// Logs emitted by the transaction.
    pub logs: Vec<LogEntry>,
}

/// Inclusive block range for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// First block.
    pub from: u64,
    /// Last block, inclusive.
    pub to: u64,
}

impl BlockRange {
    /// A range covering a single block.
    #[must_use]
    pub fn single(block: u64) -> Self {
        Self { from: block, to: block }
    }

    /// Returns `true` if `block` is inside the range.
    #[must_use]
    pub fn contains(&self, block: u64) -> bool {
        (self.from..=self.to).contains(&block)
    }
}

/// A decoded `CertificateIssued` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedEvent {
    /// Chain-assigned certificate id.
    pub ledger_id: LedgerId,
    /// Recipient wallet.
    pub student_address: Address,
    /// Student number.
    pub student_id: String,
    /// Certificate type name.
    pub certificate_type: String,
    /// Metadata content identifier.
    pub content_id: String,
    /// Issuing account.
    pub issuer: Address,
    /// Inclusion block.
    pub block_number: u64,
    /// Emitting transaction.
    pub transaction_hash: B256,
    /// Position within the block.
    pub log_index: u64,
}

/// A decoded `CertificateRevoked` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEvent {
    /// Chain-assigned certificate id.
    pub ledger_id: LedgerId,
    /// Revoking account.
    pub revoked_by: Address,
    /// Revocation reason.
    pub reason: String,
}

/// The contract's certificate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCertificate {
    /// Chain-assigned id.
    pub ledger_id: LedgerId,
    /// Recipient wallet.
    pub student_address: Address,
    /// Student number.
    pub student_id: String,
    /// Student name.
    pub student_name: String,
    /// Certificate type name.
    pub certificate_type: String,
    /// Course name.
    pub course_name: String,
    /// Grade.
    pub grade: String,
    /// Metadata content identifier.
    pub content_id: String,
    /// Block timestamp of issuance, seconds since the epoch.
    pub issue_date: u64,
    /// Issuing account.
    pub issuer: Address,
    /// On-chain revoked flag. Advisory unless the ledger-first policy is used.
    pub revoked: bool,
    /// On-chain revocation reason, empty if not revoked.
    pub revoked_reason: String,
}

/// Contract access-control roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// `DEFAULT_ADMIN_ROLE`, the zero hash.
    DefaultAdmin,
    /// `ADMIN_ROLE`.
    Admin,
    /// `ISSUER_ROLE`.
    Issuer,
}

impl Role {
    /// The role identifier as the contract stores it.
    #[must_use]
    pub fn id(&self) -> B256 {
        match self {
            Self::DefaultAdmin => B256::ZERO,
            Self::Admin => keccak256(b"ADMIN_ROLE"),
            Self::Issuer => keccak256(b"ISSUER_ROLE"),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DefaultAdmin => write!(f, "DEFAULT_ADMIN_ROLE"),
            Self::Admin => write!(f, "ADMIN_ROLE"),
            Self::Issuer => write!(f, "ISSUER_ROLE"),
        }
    }
}

/// Access to the certificate contract on one network.
///
/// Implementations map transport failures to transient
/// [`CertError::ExternalDependency`](certledger_core::CertError::ExternalDependency)
/// errors with [`Dependency::Ledger`](certledger_core::Dependency::Ledger).
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// The account transactions are sent from.
    fn signer(&self) -> Address;

    /// The certificate contract address.
    fn contract_address(&self) -> Address;

    /// Submits `issueCertificate`. Returns once the node accepted the
    /// transaction; inclusion is observed with [`await_receipt`](Self::await_receipt).
    async fn submit_issuance(&self, call: &IssuanceCall) -> CertResult<TxHandle>;

    /// Waits until the transaction is mined with at least `confirmations`
    /// blocks on top (the inclusion block counts as one).
    ///
    /// Waits indefinitely; callers bound it with a timeout.
    async fn await_receipt(&self, tx: TxHandle, confirmations: u64) -> CertResult<TxReceipt>;

    /// Queries `CertificateIssued` events emitted by the contract in `range`.
    async fn issued_events(&self, range: BlockRange) -> CertResult<Vec<IssuedEvent>>;

    /// Reads the contract's record for `ledger_id`, `None` if it does not exist.
    async fn get_certificate(&self, ledger_id: LedgerId) -> CertResult<Option<LedgerCertificate>>;

    /// Returns `true` if `account` holds `role`.
    async fn has_role(&self, account: Address, role: Role) -> CertResult<bool>;

    /// Submits `revokeCertificate`.
    async fn submit_revocation(&self, ledger_id: LedgerId, reason: &str) -> CertResult<TxHandle>;

    /// Current block height.
    async fn latest_block(&self) -> CertResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_admin_role_is_zero_hash() {
        assert_eq!(Role::DefaultAdmin.id(), B256::ZERO);
        assert_ne!(Role::Issuer.id(), Role::Admin.id());
        assert_eq!(Role::Issuer.to_string(), "ISSUER_ROLE");
    }

    #[test]
    fn test_block_range_is_inclusive() {
        let range = BlockRange { from: 3, to: 5 };
        assert!(range.contains(3) && range.contains(5));
        assert!(!range.contains(6));
        assert!(BlockRange::single(9).contains(9));
    }
}
