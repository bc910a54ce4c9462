//! Ledger and metadata-store gateways for certledger.
//!
//! A certificate is anchored in two external systems besides the registry:
//! a certificate contract on an EVM chain and a content-addressed metadata
//! store. This crate provides the traits the coordinator talks to, the
//! production clients, and in-memory doubles with fault injection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 certledger-coordinator                      │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │     LedgerGateway trait      │     MetadataStore trait      │
//! │  extract_issued_id, events   │                              │
//! ├──────────────┬───────────────┼──────────────┬───────────────┤
//! │InMemoryLedger│RpcLedgerGate- │MemoryMetadata│ PinataMetadata│
//! │              │way (+ retry,  │Store         │ Store         │
//! │              │ breaker, abi) │              │               │
//! └──────────────┴───────────────┴──────────────┴───────────────┘
//! ```
//!
//! # Retries
//!
//! Read calls (receipts, logs, `eth_call`, metadata fetches) retry transient
//! failures with exponential backoff. Transaction sends and metadata
//! publishes are attempted once at this layer; the issuance driver decides
//! what is safe to repeat.
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Enables `fail` crate fail points such as
//!   `retry-before-sleep`.

#![deny(unsafe_code)]

pub mod abi;
pub mod circuit_breaker;
pub mod config;
pub mod events;
pub mod ledger;
pub mod memory_ledger;
pub mod metadata;
pub mod pinata;
pub mod retry;
pub mod rpc;

pub use abi::AbiError;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{PinataConfig, RetryConfig, RpcLedgerConfig};
pub use events::{decode_issued, decode_revoked, extract_issued_id};
pub use ledger::{
    BlockRange, IssuanceCall, IssuedEvent, LedgerCertificate, LedgerGateway, LogEntry, RevokedEvent,
    Role, TxHandle, TxReceipt,
};
pub use memory_ledger::{EventIndex, InMemoryLedger};
pub use metadata::{MemoryMetadataStore, MetadataStore, PublishedMetadata, content_id_for};
pub use pinata::PinataMetadataStore;
pub use retry::with_retry;
pub use rpc::RpcLedgerGateway;

/// Re-exported chain primitives used in the public API.
pub use alloy_primitives::{Address, B256};
