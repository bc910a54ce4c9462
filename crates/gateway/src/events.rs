//! Certificate contract events and issued-id extraction.
//!
//! The contract emits
//!
//! ```text
//! CertificateIssued(uint256 indexed certificateId, address indexed studentAddress,
//!                   string studentId, string certificateType, string ipfsHash,
//!                   address indexed issuer)
//! CertificateRevoked(uint256 indexed certificateId, address indexed revokedBy, string reason)
//! ```
//!
//! [`extract_issued_id`] recovers the chain-assigned id of a successful
//! issuance. Event-filter queries against some nodes return nothing for
//! fresh blocks, so the receipt's own logs are decoded as a fallback.

use alloy_primitives::{Address, B256};
use certledger_core::{CertError, CertResult, LedgerId};

use crate::{
    abi::{self, AbiError, ParamType, Token},
    ledger::{BlockRange, IssuedEvent, LedgerGateway, LogEntry, RevokedEvent, TxReceipt},
};

/// Canonical signature of `CertificateIssued`.
pub const CERTIFICATE_ISSUED: &str = "CertificateIssued(uint256,address,string,string,string,address)";

/// Canonical signature of `CertificateRevoked`.
pub const CERTIFICATE_REVOKED: &str = "CertificateRevoked(uint256,address,string)";

/// Topic hash of `CertificateIssued`.
#[must_use]
pub fn issued_topic() -> B256 {
    abi::event_topic(CERTIFICATE_ISSUED)
}

/// Topic hash of `CertificateRevoked`.
#[must_use]
pub fn revoked_topic() -> B256 {
    abi::event_topic(CERTIFICATE_REVOKED)
}

fn mismatch(event: &'static str, reason: impl Into<String>) -> AbiError {
    AbiError::EventMismatch { event, reason: reason.into() }
}

/// Decodes a `CertificateIssued` log.
///
/// # Errors
///
/// Returns [`AbiError`] if the log is another event or is malformed.
pub fn decode_issued(log: &LogEntry) -> Result<IssuedEvent, AbiError> {
    let [signature, id, student, issuer] = log.topics.as_slice() else {
        return Err(mismatch("CertificateIssued", format!("expected 4 topics, got {}", log.topics.len())));
    };
    if *signature != issued_topic() {
        return Err(mismatch("CertificateIssued", "signature topic differs"));
    }

    let mut fields = abi::decode(&[ParamType::String, ParamType::String, ParamType::String], &log.data)?
        .into_iter()
        .map(Token::into_string);
    let (Some(Some(student_id)), Some(Some(certificate_type)), Some(Some(content_id))) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(mismatch("CertificateIssued", "data is not three strings"));
    };

    Ok(IssuedEvent {
        ledger_id: LedgerId(abi::word_to_u64(id)?),
        student_address: abi::word_to_address(student)?,
        student_id,
        certificate_type,
        content_id,
        issuer: abi::word_to_address(issuer)?,
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    })
}

/// Decodes a `CertificateRevoked` log.
///
/// # Errors
///
/// Returns [`AbiError`] if the log is another event or is malformed.
pub fn decode_revoked(log: &LogEntry) -> Result<RevokedEvent, AbiError> {
    let [signature, id, by] = log.topics.as_slice() else {
        return Err(mismatch("CertificateRevoked", format!("expected 3 topics, got {}", log.topics.len())));
    };
    if *signature != revoked_topic() {
        return Err(mismatch("CertificateRevoked", "signature topic differs"));
    }
    let reason = abi::decode(&[ParamType::String], &log.data)?
        .pop()
        .and_then(Token::into_string)
        .ok_or_else(|| mismatch("CertificateRevoked", "data is not a string"))?;

    Ok(RevokedEvent {
        ledger_id: LedgerId(abi::word_to_u64(id)?),
        revoked_by: abi::word_to_address(by)?,
        reason,
    })
}

/// Encodes the topics and data of a `CertificateIssued` log.
#[must_use]
pub fn encode_issued(
    ledger_id: LedgerId,
    student_address: Address,
    student_id: &str,
    certificate_type: &str,
    content_id: &str,
    issuer: Address,
) -> (Vec<B256>, Vec<u8>) {
    let topics = vec![
        issued_topic(),
        abi::u64_word(ledger_id.0),
        abi::address_word(student_address),
        abi::address_word(issuer),
    ];
    let data = abi::encode(&[
        Token::String(student_id.to_owned()),
        Token::String(certificate_type.to_owned()),
        Token::String(content_id.to_owned()),
    ]);
    (topics, data)
}

/// Encodes the topics and data of a `CertificateRevoked` log.
#[must_use]
pub fn encode_revoked(ledger_id: LedgerId, revoked_by: Address, reason: &str) -> (Vec<B256>, Vec<u8>) {
    let topics = vec![revoked_topic(), abi::u64_word(ledger_id.0), abi::address_word(revoked_by)];
    (topics, abi::encode(&[Token::String(reason.to_owned())]))
}

/// Recovers the chain-assigned id issued by a successful transaction.
///
/// 1. Query `CertificateIssued` events for the receipt's block and keep
///    those emitted by the receipt's transaction.
/// 2. If that fails or finds nothing, decode every receipt log against the
///    event signature.
///
/// The last match wins in both strategies.
///
/// # Errors
///
/// [`CertError::LinkageExtraction`] if neither strategy yields an id. The
/// on-chain record exists at that point and must be linked by hand or by
/// the reconciler.
#[tracing::instrument(skip(ledger, receipt), fields(tx_hash = %receipt.transaction_hash, block = receipt.block_number))]
pub async fn extract_issued_id<L>(ledger: &L, receipt: &TxReceipt) -> CertResult<LedgerId>
where
    L: LedgerGateway + ?Sized,
{
    let query_outcome = match ledger.issued_events(BlockRange::single(receipt.block_number)).await {
        Ok(events) => events
            .into_iter()
            .filter(|e| e.transaction_hash == receipt.transaction_hash)
            .last()
            .map(|e| e.ledger_id)
            .ok_or_else(|| "event query returned no matching event".to_owned()),
        Err(err) => Err(format!("event query failed: {err}")),
    };

    let query_failure = match query_outcome {
        Ok(id) => {
            tracing::debug!(ledger_id = %id, "issued id extracted from event query");
            return Ok(id);
        },
        Err(reason) => reason,
    };

    tracing::warn!(reason = %query_failure, "falling back to receipt log decoding");

    let contract = ledger.contract_address();
    let decoded = receipt
        .logs
        .iter()
        .filter(|log| log.address == contract)
        .filter_map(|log| decode_issued(log).ok())
        .last();

    match decoded {
        Some(event) => {
            tracing::debug!(ledger_id = %event.ledger_id, "issued id extracted from receipt logs");
            Ok(event.ledger_id)
        },
        None => Err(CertError::linkage_extraction(
            receipt.transaction_hash,
            format!(
                "{query_failure}; none of {} receipt logs decoded as CertificateIssued",
                receipt.logs.len()
            ),
        )),
    }
}
