//! In-memory simulated chain.
//!
//! Every submitted transaction is mined into its own block immediately.
//! Receipts, logs and the event index behave like a JSON-RPC node so the
//! issuance driver and the reconciler can be exercised end to end. The fault
//! knobs reproduce the partial failures seen against real nodes.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use alloy_primitives::{Address, B256, keccak256};
use async_trait::async_trait;
use bytes::Bytes;
use certledger_core::{CertError, CertResult, Dependency, Entity, LedgerId};
use parking_lot::Mutex;

use crate::{
    events,
    ledger::{
        BlockRange, IssuanceCall, IssuedEvent, LedgerCertificate, LedgerGateway, LogEntry, Role,
        TxHandle, TxReceipt,
    },
};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Behaviour of the simulated `eth_getLogs` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventIndex {
    /// Queries return every matching event.
    #[default]
    Healthy,
    /// Queries succeed but return nothing, as lagging nodes do for fresh blocks.
    Empty,
    /// Queries fail with a transient error.
    Unavailable,
}

#[derive(Debug, Default)]
struct Faults {
    failing_submissions: u32,
    lost_responses: u32,
    revert_next: bool,
    garble_receipt_logs: bool,
    withhold_receipts: bool,
    event_index: EventIndex,
}

#[derive(Debug, Default)]
struct Chain {
    block: u64,
    block_timestamp: u64,
    tx_counter: u64,
    next_ledger_id: u64,
    certificates: BTreeMap<u64, LedgerCertificate>,
    roles: HashSet<(B256, Address)>,
    receipts: HashMap<B256, TxReceipt>,
    logs: Vec<LogEntry>,
    submissions: u64,
    faults: Faults,
}

impl Chain {
    fn next_tx_hash(&mut self) -> B256 {
        self.tx_counter += 1;
        keccak256(self.tx_counter.to_be_bytes())
    }

    fn mine(&mut self, tx_hash: B256, logs: Vec<(Address, Vec<B256>, Vec<u8>)>, success: bool) {
        self.block += 1;
        self.block_timestamp += 12;
        let block_number = self.block;
        let logs: Vec<LogEntry> = logs
            .into_iter()
            .enumerate()
            .map(|(index, (address, topics, data))| LogEntry {
                address,
                topics,
                data: Bytes::from(data),
                block_number,
                transaction_hash: tx_hash,
                log_index: index as u64,
            })
            .collect();
        self.logs.extend(logs.iter().cloned());
        self.receipts
            .insert(tx_hash, TxReceipt { transaction_hash: tx_hash, block_number, success, logs });
    }

    fn has_role(&self, account: Address, role: Role) -> bool {
        self.roles.contains(&(role.id(), account))
    }

    /// Applies the submission fault knobs. `Err` means the node never saw
    /// the transaction; `Ok(true)` means it was mined but the response is lost.
    fn admit_submission(&mut self) -> CertResult<bool> {
        if self.faults.failing_submissions > 0 {
            self.faults.failing_submissions -= 1;
            return Err(CertError::external_transient(
                Dependency::Ledger,
                "simulated transport failure before submission",
            ));
        }
        self.submissions += 1;
        if self.faults.lost_responses > 0 {
            self.faults.lost_responses -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn take_revert(&mut self) -> bool {
        std::mem::take(&mut self.faults.revert_next)
    }
}

/// Simulated certificate contract with roles, receipts and an event index.
///
/// Clones share the same chain. The signer holds every role at creation.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    contract: Address,
    signer: Address,
    chain: Arc<Mutex<Chain>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Address::repeat_byte(0xc0), Address::repeat_byte(0x51))
    }
}

impl InMemoryLedger {
    /// Creates a chain at block zero with `signer` holding every role.
    #[must_use]
    pub fn new(contract: Address, signer: Address) -> Self {
        let mut chain = Chain { next_ledger_id: 1, block_timestamp: 1_700_000_000, ..Chain::default() };
        for role in [Role::DefaultAdmin, Role::Admin, Role::Issuer] {
            chain.roles.insert((role.id(), signer));
        }
        Self { contract, signer, chain: Arc::new(Mutex::new(chain)) }
    }

    /// Grants `role` to `account`.
    pub fn grant_role(&self, role: Role, account: Address) {
        self.chain.lock().roles.insert((role.id(), account));
    }

    /// Revokes `role` from `account`.
    pub fn revoke_role(&self, role: Role, account: Address) {
        self.chain.lock().roles.remove(&(role.id(), account));
    }

    /// Fails the next `n` submissions before they reach the chain.
    pub fn fail_next_submissions(&self, n: u32) {
        self.chain.lock().faults.failing_submissions = n;
    }

    /// Mines the next `n` submissions but reports a transient error to the
    /// caller, leaving a record the caller does not know about.
    pub fn lose_next_responses(&self, n: u32) {
        self.chain.lock().faults.lost_responses = n;
    }

    /// Reverts the next submitted transaction.
    pub fn revert_next_submission(&self) {
        self.chain.lock().faults.revert_next = true;
    }

    /// Makes receipt logs undecodable.
    pub fn garble_receipt_logs(&self, garble: bool) {
        self.chain.lock().faults.garble_receipt_logs = garble;
    }

    /// Keeps receipts from being returned until released.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.chain.lock().faults.withhold_receipts = withhold;
    }

    /// Sets the behaviour of event queries.
    pub fn set_event_index(&self, mode: EventIndex) {
        self.chain.lock().faults.event_index = mode;
    }

    /// Transactions accepted so far, reverted ones included.
    #[must_use]
    pub fn submission_count(&self) -> u64 {
        self.chain.lock().submissions
    }

    /// Certificates recorded on chain.
    #[must_use]
    pub fn certificate_count(&self) -> usize {
        self.chain.lock().certificates.len()
    }

    /// Mines `n` empty blocks.
    pub fn advance_blocks(&self, n: u64) {
        let mut chain = self.chain.lock();
        chain.block += n;
        chain.block_timestamp += 12 * n;
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    fn signer(&self) -> Address {
        self.signer
    }

    fn contract_address(&self) -> Address {
        self.contract
    }

    #[tracing::instrument(skip(self, call), fields(student_id = %call.student_id))]
    async fn submit_issuance(&self, call: &IssuanceCall) -> CertResult<TxHandle> {
        let mut chain = self.chain.lock();
        let lose_response = chain.admit_submission()?;
        let tx_hash = chain.next_tx_hash();

        if chain.take_revert() || !chain.has_role(self.signer, Role::Issuer) {
            chain.mine(tx_hash, Vec::new(), false);
        } else {
            let ledger_id = LedgerId(chain.next_ledger_id);
            chain.next_ledger_id += 1;
            let issue_date = chain.block_timestamp + 12;
            chain.certificates.insert(ledger_id.0, LedgerCertificate {
                ledger_id,
                student_address: call.recipient,
                student_id: call.student_id.clone(),
                student_name: call.student_name.clone(),
                certificate_type: call.certificate_type.clone(),
                course_name: call.course_name.clone(),
                grade: call.grade.clone(),
                content_id: call.content_id.clone(),
                issue_date,
                issuer: self.signer,
                revoked: false,
                revoked_reason: String::new(),
            });
            let (topics, data) = events::encode_issued(
                ledger_id,
                call.recipient,
                &call.student_id,
                &call.certificate_type,
                &call.content_id,
                self.signer,
            );
            chain.mine(tx_hash, vec![(self.contract, topics, data)], true);
            tracing::debug!(ledger_id = %ledger_id, block = chain.block, "certificate mined");
        }

        if lose_response {
            return Err(CertError::external_transient(
                Dependency::Ledger,
                "simulated connection reset after submission",
            ));
        }
        Ok(TxHandle { hash: tx_hash })
    }

    async fn await_receipt(&self, tx: TxHandle, confirmations: u64) -> CertResult<TxReceipt> {
        loop {
            {
                let mut chain = self.chain.lock();
                if !chain.faults.withhold_receipts {
                    let Some(receipt) = chain.receipts.get(&tx.hash).cloned() else {
                        return Err(CertError::not_found(Entity::Transaction, tx.hash));
                    };
                    let required = receipt.block_number + confirmations.max(1) - 1;
                    if chain.block < required {
                        let missing = required - chain.block;
                        chain.block = required;
                        chain.block_timestamp += 12 * missing;
                    }
                    if chain.faults.garble_receipt_logs {
                        return Ok(TxReceipt {
                            logs: receipt
                                .logs
                                .into_iter()
                                .map(|log| LogEntry { data: Bytes::from_static(&[0xde, 0xad]), ..log })
                                .collect(),
                            ..receipt
                        });
                    }
                    return Ok(receipt);
                }
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn issued_events(&self, range: BlockRange) -> CertResult<Vec<IssuedEvent>> {
        let chain = self.chain.lock();
        match chain.faults.event_index {
            EventIndex::Healthy => {},
            EventIndex::Empty => return Ok(Vec::new()),
            EventIndex::Unavailable => {
                return Err(CertError::external_transient(Dependency::Ledger, "event index unavailable"));
            },
        }
        let topic = events::issued_topic();
        Ok(chain
            .logs
            .iter()
            .filter(|log| {
                log.address == self.contract
                    && range.contains(log.block_number)
                    && log.topics.first() == Some(&topic)
            })
            .filter_map(|log| events::decode_issued(log).ok())
            .collect())
    }

    async fn get_certificate(&self, ledger_id: LedgerId) -> CertResult<Option<LedgerCertificate>> {
        Ok(self.chain.lock().certificates.get(&ledger_id.0).cloned())
    }

    async fn has_role(&self, account: Address, role: Role) -> CertResult<bool> {
        Ok(self.chain.lock().has_role(account, role))
    }

    #[tracing::instrument(skip(self, reason))]
    async fn submit_revocation(&self, ledger_id: LedgerId, reason: &str) -> CertResult<TxHandle> {
        let mut chain = self.chain.lock();
        let lose_response = chain.admit_submission()?;
        let tx_hash = chain.next_tx_hash();

        let authorized = chain.has_role(self.signer, Role::Admin);
        let revertable = chain.take_revert();
        let revocable = chain.certificates.get(&ledger_id.0).is_some_and(|c| !c.revoked);

        if revertable || !authorized || !revocable {
            chain.mine(tx_hash, Vec::new(), false);
        } else {
            if let Some(cert) = chain.certificates.get_mut(&ledger_id.0) {
                cert.revoked = true;
                cert.revoked_reason = reason.to_owned();
            }
            let (topics, data) = events::encode_revoked(ledger_id, self.signer, reason);
            chain.mine(tx_hash, vec![(self.contract, topics, data)], true);
        }

        if lose_response {
            return Err(CertError::external_transient(
                Dependency::Ledger,
                "simulated connection reset after submission",
            ));
        }
        Ok(TxHandle { hash: tx_hash })
    }

    async fn latest_block(&self) -> CertResult<u64> {
        Ok(self.chain.lock().block)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn call(content_id: &str) -> IssuanceCall {
        IssuanceCall::builder()
            .recipient(Address::repeat_byte(7))
            .student_id("S-1")
            .student_name("Ada")
            .certificate_type("Completion")
            .course_name("Rust")
            .grade("A")
            .content_id(content_id)
            .build()
    }

    #[tokio::test]
    async fn test_issuance_mines_one_block_with_event() {
        let ledger = InMemoryLedger::default();
        let tx = ledger.submit_issuance(&call("bafy1")).await.unwrap();
        let receipt = ledger.await_receipt(tx, 1).await.unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.block_number, 1);
        assert_eq!(receipt.logs.len(), 1);

        let events = ledger.issued_events(BlockRange::single(1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ledger_id, LedgerId(1));
        assert_eq!(events[0].content_id, "bafy1");
    }

    #[tokio::test]
    async fn test_confirmations_advance_the_chain() {
        let ledger = InMemoryLedger::default();
        let tx = ledger.submit_issuance(&call("bafy1")).await.unwrap();
        ledger.await_receipt(tx, 3).await.unwrap();
        assert_eq!(ledger.latest_block().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_issuer_role_reverts() {
        let ledger = InMemoryLedger::default();
        ledger.revoke_role(Role::Issuer, ledger.signer());
        let tx = ledger.submit_issuance(&call("bafy1")).await.unwrap();
        let receipt = ledger.await_receipt(tx, 1).await.unwrap();
        assert!(!receipt.success);
        assert_eq!(ledger.certificate_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_submission_leaves_no_trace() {
        let ledger = InMemoryLedger::default();
        ledger.fail_next_submissions(1);
        let err = ledger.submit_issuance(&call("bafy1")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ledger.submission_count(), 0);
        assert!(ledger.submit_issuance(&call("bafy1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_lost_response_still_mines() {
        let ledger = InMemoryLedger::default();
        ledger.lose_next_responses(1);
        assert!(ledger.submit_issuance(&call("bafy1")).await.is_err());
        assert_eq!(ledger.certificate_count(), 1);
    }

    #[tokio::test]
    async fn test_revocation_twice_reverts_second() {
        let ledger = InMemoryLedger::default();
        let tx = ledger.submit_issuance(&call("bafy1")).await.unwrap();
        ledger.await_receipt(tx, 1).await.unwrap();

        let first = ledger.submit_revocation(LedgerId(1), "fraud").await.unwrap();
        assert!(ledger.await_receipt(first, 1).await.unwrap().success);
        let second = ledger.submit_revocation(LedgerId(1), "again").await.unwrap();
        assert!(!ledger.await_receipt(second, 1).await.unwrap().success);

        let record = ledger.get_certificate(LedgerId(1)).await.unwrap().unwrap();
        assert!(record.revoked);
        assert_eq!(record.revoked_reason, "fraud");
    }

    #[tokio::test]
    async fn test_withheld_receipt_released() {
        let ledger = InMemoryLedger::default();
        let tx = ledger.submit_issuance(&call("bafy1")).await.unwrap();
        ledger.withhold_receipts(true);

        let waiter = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.await_receipt(tx, 1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        ledger.withhold_receipts(false);
        assert!(waiter.await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn test_unknown_transaction_not_found() {
        let ledger = InMemoryLedger::default();
        let err = ledger.await_receipt(TxHandle { hash: B256::ZERO }, 1).await.unwrap_err();
        assert!(matches!(err, CertError::NotFound { entity: Entity::Transaction, .. }));
    }
}
