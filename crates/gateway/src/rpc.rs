//! Ethereum JSON-RPC ledger gateway.
//!
//! Transactions are sent with `eth_sendTransaction` from an account the node
//! manages, so no key material lives in this process. Reads go through
//! [`with_retry`]; sends are attempted once because a retried send can mint
//! a second certificate. Every call passes through the circuit breaker.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use bytes::Bytes;
use certledger_core::{CertError, CertResult, Dependency, LedgerId};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::{
    abi::{self, ParamType, Token},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    config::RpcLedgerConfig,
    events,
    ledger::{
        BlockRange, IssuanceCall, IssuedEvent, LedgerCertificate, LedgerGateway, LogEntry, Role,
        TxHandle, TxReceipt,
    },
    retry::{http_error, with_retry},
};

const ISSUE_CERTIFICATE: &str =
    "issueCertificate(address,string,string,string,string,string,string)";
const REVOKE_CERTIFICATE: &str = "revokeCertificate(uint256,string)";
const GET_CERTIFICATE: &str = "getCertificate(uint256)";
const HAS_ROLE: &str = "hasRole(bytes32,address)";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcErrorObject {
    fn is_revert(&self) -> bool {
        self.code == 3 || self.message.contains("revert")
    }

    fn into_error(self, method: &str) -> CertError {
        // -32005 is the conventional "limit exceeded" code.
        let transient = self.code == -32005 || self.message.contains("rate limit");
        let message = format!("{method} failed with code {}: {}", self.code, self.message);
        if transient {
            CertError::external_transient(Dependency::Ledger, message)
        } else {
            CertError::external(Dependency::Ledger, message)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: String,
    block_number: String,
    transaction_hash: B256,
    log_index: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: String,
    status: String,
    logs: Vec<RpcLog>,
}

fn parse_quantity(value: &str) -> CertResult<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| {
        CertError::external_with_source(
            Dependency::Ledger,
            format!("invalid quantity `{value}`"),
            false,
            e,
        )
    })
}

fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

fn parse_data(value: &str) -> CertResult<Vec<u8>> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value)).map_err(|e| {
        CertError::external_with_source(Dependency::Ledger, "invalid hex data", false, e)
    })
}

impl TryFrom<RpcLog> for LogEntry {
    type Error = CertError;

    fn try_from(log: RpcLog) -> CertResult<Self> {
        Ok(Self {
            address: log.address,
            topics: log.topics,
            data: Bytes::from(parse_data(&log.data)?),
            block_number: parse_quantity(&log.block_number)?,
            transaction_hash: log.transaction_hash,
            log_index: parse_quantity(&log.log_index)?,
        })
    }
}

impl TryFrom<RpcReceipt> for TxReceipt {
    type Error = CertError;

    fn try_from(receipt: RpcReceipt) -> CertResult<Self> {
        Ok(Self {
            transaction_hash: receipt.transaction_hash,
            block_number: parse_quantity(&receipt.block_number)?,
            success: parse_quantity(&receipt.status)? == 1,
            logs: receipt.logs.into_iter().map(LogEntry::try_from).collect::<CertResult<_>>()?,
        })
    }
}

/// ABI shape of the `getCertificate` return value.
pub(crate) fn certificate_tuple() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Uint,
        ParamType::Address,
        ParamType::String,
        ParamType::String,
        ParamType::String,
        ParamType::String,
        ParamType::String,
        ParamType::String,
        ParamType::Uint,
        ParamType::Address,
        ParamType::Bool,
        ParamType::String,
    ])
}

/// Decodes a `getCertificate` return value. A zero id means the contract
/// holds no such record.
pub(crate) fn decode_certificate(data: &[u8]) -> CertResult<Option<LedgerCertificate>> {
    let fields = abi::decode(&[certificate_tuple()], data)?
        .pop()
        .and_then(Token::into_tuple)
        .ok_or_else(|| CertError::internal("getCertificate returned no tuple"))?;
    let mut fields = fields.into_iter();
    let mut next = || fields.next().ok_or_else(|| CertError::internal("getCertificate tuple too short"));
    let string = |t: Token| t.into_string().ok_or_else(|| CertError::internal("expected string"));
    let uint = |t: Token| t.as_u64().ok_or_else(|| CertError::internal("expected uint"));
    let address = |t: Token| t.as_address().ok_or_else(|| CertError::internal("expected address"));

    let ledger_id = uint(next()?)?;
    if ledger_id == 0 {
        return Ok(None);
    }
    Ok(Some(LedgerCertificate {
        ledger_id: LedgerId(ledger_id),
        student_address: address(next()?)?,
        student_id: string(next()?)?,
        student_name: string(next()?)?,
        certificate_type: string(next()?)?,
        course_name: string(next()?)?,
        grade: string(next()?)?,
        content_id: string(next()?)?,
        issue_date: uint(next()?)?,
        issuer: address(next()?)?,
        revoked: next()?.as_bool().ok_or_else(|| CertError::internal("expected bool"))?,
        revoked_reason: string(next()?)?,
    }))
}

/// [`LedgerGateway`] over Ethereum JSON-RPC.
#[derive(Debug)]
pub struct RpcLedgerGateway {
    config: RpcLedgerConfig,
    client: reqwest::Client,
    breaker: CircuitBreaker,
    request_id: AtomicU64,
}

impl RpcLedgerGateway {
    /// Creates a gateway with a default circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Internal`] if the HTTP client cannot be built.
    pub fn new(config: RpcLedgerConfig) -> CertResult<Self> {
        Self::with_breaker(config, CircuitBreaker::new(CircuitBreakerConfig::default()))
    }

    /// Creates a gateway sharing `breaker`.
    ///
    /// # Errors
    ///
    /// Returns [`CertError::Internal`] if the HTTP client cannot be built.
    pub fn with_breaker(config: RpcLedgerConfig, breaker: CircuitBreaker) -> CertResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CertError::internal_with_source("failed to build http client", e))?;
        Ok(Self { config, client, breaker, request_id: AtomicU64::new(1) })
    }

    /// The breaker guarding this endpoint.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// One JSON-RPC round trip. `Ok(Err(_))` carries a node-level error
    /// object so callers can treat reverts specially.
    async fn raw_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
    ) -> CertResult<Result<Option<T>, RpcErrorObject>> {
        self.breaker.check()?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let outcome = async {
            let response = self
                .client
                .post(&self.config.rpc_url)
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| http_error(Dependency::Ledger, e))?;
            response
                .json::<RpcResponse<T>>()
                .await
                .map_err(|e| http_error(Dependency::Ledger, e))
        }
        .await;
        self.breaker.record(&outcome);

        let response = outcome?;
        Ok(match response.error {
            Some(error) => Err(error),
            None => Ok(response.result),
        })
    }

    async fn call_once<T: DeserializeOwned>(&self, method: &str, params: &Value) -> CertResult<Option<T>> {
        self.raw_call(method, params).await?.map_err(|e| e.into_error(method))
    }

    async fn read<T: DeserializeOwned>(&self, method: &str, params: Value) -> CertResult<Option<T>> {
        let params = &params;
        with_retry(&self.config.retry, method, move || self.call_once(method, params)).await
    }

    async fn read_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> CertResult<T> {
        self.read(method, params)
            .await?
            .ok_or_else(|| CertError::external(Dependency::Ledger, format!("{method} returned null")))
    }

    async fn eth_call(&self, data: Vec<u8>) -> CertResult<Result<Vec<u8>, RpcErrorObject>> {
        let params = json!([
            { "to": self.config.contract_address, "data": format!("0x{}", hex::encode(data)) },
            "latest",
        ]);
        let params = &params;
        let outcome = with_retry(&self.config.retry, "eth_call", move || async move {
            self.raw_call::<String>("eth_call", params).await
        })
        .await?;
        match outcome {
            Ok(Some(hex_data)) => Ok(Ok(parse_data(&hex_data)?)),
            Ok(None) => Ok(Ok(Vec::new())),
            Err(error) => Ok(Err(error)),
        }
    }

    async fn send_transaction(&self, data: Vec<u8>) -> CertResult<TxHandle> {
        let mut tx = json!({
            "from": self.config.signer,
            "to": self.config.contract_address,
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(gas) = self.config.gas_limit
            && let Some(obj) = tx.as_object_mut()
        {
            obj.insert("gas".into(), Value::String(quantity(gas)));
        }
        let hash: Option<B256> = self.call_once("eth_sendTransaction", &json!([tx])).await?;
        let hash = hash.ok_or_else(|| {
            CertError::external(Dependency::Ledger, "eth_sendTransaction returned no hash")
        })?;
        tracing::debug!(tx_hash = %hash, "transaction submitted");
        Ok(TxHandle { hash })
    }
}

#[async_trait]
impl LedgerGateway for RpcLedgerGateway {
    fn signer(&self) -> Address {
        self.config.signer
    }

    fn contract_address(&self) -> Address {
        self.config.contract_address
    }

    #[tracing::instrument(skip(self, call), fields(student_id = %call.student_id))]
    async fn submit_issuance(&self, call: &IssuanceCall) -> CertResult<TxHandle> {
        let data = abi::encode_call(ISSUE_CERTIFICATE, &[
            Token::Address(call.recipient),
            Token::String(call.student_id.clone()),
            Token::String(call.student_name.clone()),
            Token::String(call.certificate_type.clone()),
            Token::String(call.course_name.clone()),
            Token::String(call.grade.clone()),
            Token::String(call.content_id.clone()),
        ]);
        self.send_transaction(data).await
    }

    #[tracing::instrument(skip(self), fields(tx_hash = %tx.hash))]
    async fn await_receipt(&self, tx: TxHandle, confirmations: u64) -> CertResult<TxReceipt> {
        let receipt = loop {
            let receipt: Option<RpcReceipt> =
                self.read("eth_getTransactionReceipt", json!([tx.hash])).await?;
            match receipt {
                Some(receipt) => break TxReceipt::try_from(receipt)?,
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        };

        let required = receipt.block_number + confirmations.max(1) - 1;
        while self.latest_block().await? < required {
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(receipt)
    }

    #[tracing::instrument(skip(self))]
    async fn issued_events(&self, range: BlockRange) -> CertResult<Vec<IssuedEvent>> {
        let filter = json!([{
            "fromBlock": quantity(range.from),
            "toBlock": quantity(range.to),
            "address": self.config.contract_address,
            "topics": [events::issued_topic()],
        }]);
        let logs: Vec<RpcLog> = self.read("eth_getLogs", filter).await?.unwrap_or_default();

        let mut issued = Vec::with_capacity(logs.len());
        for log in logs {
            let entry = LogEntry::try_from(log)?;
            match events::decode_issued(&entry) {
                Ok(event) => issued.push(event),
                Err(err) => tracing::warn!(
                    tx_hash = %entry.transaction_hash,
                    error = %err,
                    "skipping undecodable CertificateIssued log",
                ),
            }
        }
        Ok(issued)
    }

    #[tracing::instrument(skip(self))]
    async fn get_certificate(&self, ledger_id: LedgerId) -> CertResult<Option<LedgerCertificate>> {
        let data = abi::encode_call(GET_CERTIFICATE, &[Token::Uint(ledger_id.0)]);
        match self.eth_call(data).await? {
            Ok(output) if output.is_empty() => Ok(None),
            Ok(output) => decode_certificate(&output),
            Err(error) if error.is_revert() => Ok(None),
            Err(error) => Err(error.into_error("eth_call")),
        }
    }

    async fn has_role(&self, account: Address, role: Role) -> CertResult<bool> {
        let data = abi::encode_call(HAS_ROLE, &[Token::FixedBytes(role.id()), Token::Address(account)]);
        let output = self.eth_call(data).await?.map_err(|e| e.into_error("eth_call"))?;
        abi::decode(&[ParamType::Bool], &output)?
            .pop()
            .and_then(|t| t.as_bool())
            .ok_or_else(|| CertError::internal("hasRole returned no bool"))
    }

    #[tracing::instrument(skip(self, reason))]
    async fn submit_revocation(&self, ledger_id: LedgerId, reason: &str) -> CertResult<TxHandle> {
        let data = abi::encode_call(REVOKE_CERTIFICATE, &[
            Token::Uint(ledger_id.0),
            Token::String(reason.to_owned()),
        ]);
        self.send_transaction(data).await
    }

    async fn latest_block(&self) -> CertResult<u64> {
        let block: String = self.read_required("eth_blockNumber", json!([])).await?;
        parse_quantity(&block)
    }
}
