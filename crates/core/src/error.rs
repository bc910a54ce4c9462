//! Error taxonomy shared by every certledger crate.
//!
//! Registry implementations, ledger gateways and metadata stores all map
//! their internal failures onto [`CertError`], so the coordinator can
//! propagate them unchanged and callers can branch on [`ErrorKind`].
//!
//! # Error Kinds
//!
//! - [`ErrorKind::NotFound`] - an entity lookup missed
//! - [`ErrorKind::InvalidState`] - an illegal lifecycle transition
//! - [`ErrorKind::ConfigurationMissing`] - no active network configuration
//! - [`ErrorKind::ExternalDependencyFailure`] - metadata store or ledger call failed
//! - [`ErrorKind::LinkageExtractionFailure`] - the ledger write succeeded but its id
//!   could not be decoded
//! - [`ErrorKind::Conflict`] - a uniqueness constraint rejected a write
//! - [`ErrorKind::InvalidInput`] - request validation failed at the boundary
//! - [`ErrorKind::Timeout`] - a caller-supplied deadline elapsed
//! - [`ErrorKind::Internal`] - registry or codec internals
//!
//! # Example
//!
//! ```
//! use certledger_core::{CertError, CertResult, Entity, ErrorKind};
//!
//! fn lookup(number: &str) -> CertResult<()> {
//!     Err(CertError::not_found(Entity::Certificate, number))
//! }
//!
//! assert_eq!(lookup("CERT-X").unwrap_err().kind(), ErrorKind::NotFound);
//! ```

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the workspace.
pub type CertResult<T> = Result<T, CertError>;

/// The kind of entity a lookup was performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A student actor.
    Student,
    /// An issuing actor.
    Issuer,
    /// Any other actor.
    Actor,
    /// A certificate row.
    Certificate,
    /// A certificate type.
    CertificateType,
    /// A blockchain network configuration.
    NetworkConfig,
    /// A published metadata object.
    MetadataObject,
    /// A certificate record on the ledger.
    LedgerCertificate,
    /// A ledger transaction.
    Transaction,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student => write!(f, "student"),
            Self::Issuer => write!(f, "issuer"),
            Self::Actor => write!(f, "actor"),
            Self::Certificate => write!(f, "certificate"),
            Self::CertificateType => write!(f, "certificate type"),
            Self::NetworkConfig => write!(f, "network configuration"),
            Self::MetadataObject => write!(f, "metadata object"),
            Self::LedgerCertificate => write!(f, "ledger certificate"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// The external system a call failed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// The relational certificate registry.
    Registry,
    /// The blockchain ledger.
    Ledger,
    /// The content-addressed metadata store.
    MetadataStore,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry => write!(f, "registry"),
            Self::Ledger => write!(f, "ledger"),
            Self::MetadataStore => write!(f, "metadata store"),
        }
    }
}

/// Coarse classification of a [`CertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Entity lookup miss.
    NotFound,
    /// Illegal state transition.
    InvalidState,
    /// No usable network configuration.
    ConfigurationMissing,
    /// An external call failed; the entity itself exists.
    ExternalDependencyFailure,
    /// The on-chain write succeeded but its identifier could not be decoded.
    LinkageExtractionFailure,
    /// Uniqueness constraint violation.
    Conflict,
    /// Boundary validation failure.
    InvalidInput,
    /// Deadline elapsed.
    Timeout,
    /// Internal failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::ConfigurationMissing => "configuration_missing",
            Self::ExternalDependencyFailure => "external_dependency_failure",
            Self::LinkageExtractionFailure => "linkage_extraction_failure",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid_input",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors produced by registries, gateways and the coordinator.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm, or match on
/// [`kind`](Self::kind) instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CertError {
    /// An entity lookup missed.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// What was looked up.
        entity: Entity,
        /// The key that missed.
        key: String,
    },

    /// The requested transition is not legal from the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the rejected transition.
        message: String,
    },

    /// No active network configuration exists for the selected network.
    #[error("no active blockchain configuration for network `{network}`")]
    ConfigurationMissing {
        /// The network that was selected.
        network: String,
    },

    /// A call into the ledger, the metadata store or the registry failed.
    #[error("{dependency} failure: {message}")]
    ExternalDependency {
        /// Which system failed.
        dependency: Dependency,
        /// Description of the failure.
        message: String,
        /// Whether retrying the same call may succeed.
        transient: bool,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The ledger transaction succeeded but the issued identifier could not
    /// be extracted, leaving an orphaned on-chain record.
    #[error("transaction {tx_hash} succeeded but no issued certificate id could be extracted: {message}")]
    LinkageExtraction {
        /// Hash of the successful transaction.
        tx_hash: String,
        /// What both extraction strategies reported.
        message: String,
    },

    /// A certificate number collided with an existing row.
    #[error("certificate number already exists: {number}")]
    DuplicateCertificateNumber {
        /// The colliding number.
        number: String,
    },

    /// A request field failed validation.
    #[error("invalid {field}: {message}")]
    InvalidInput {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// A caller-supplied deadline elapsed.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// The operation that was bounded.
        operation: String,
        /// The configured deadline.
        elapsed: Duration,
    },

    /// Internal registry or codec failure.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl CertError {
    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(entity: Entity, key: impl fmt::Display) -> Self {
        Self::NotFound { entity, key: key.to_string() }
    }

    /// Creates an `InvalidState` error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Creates a `ConfigurationMissing` error.
    #[must_use]
    pub fn configuration_missing(network: impl Into<String>) -> Self {
        Self::ConfigurationMissing { network: network.into() }
    }

    /// Creates a non-transient external dependency failure.
    #[must_use]
    pub fn external(dependency: Dependency, message: impl Into<String>) -> Self {
        Self::ExternalDependency { dependency, message: message.into(), transient: false, source: None }
    }

    /// Creates a transient external dependency failure.
    #[must_use]
    pub fn external_transient(dependency: Dependency, message: impl Into<String>) -> Self {
        Self::ExternalDependency { dependency, message: message.into(), transient: true, source: None }
    }

    /// Creates an external dependency failure carrying its source error.
    #[must_use]
    pub fn external_with_source(
        dependency: Dependency,
        message: impl Into<String>,
        transient: bool,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ExternalDependency {
            dependency,
            message: message.into(),
            transient,
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a `LinkageExtraction` error.
    #[must_use]
    pub fn linkage_extraction(tx_hash: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::LinkageExtraction { tx_hash: tx_hash.to_string(), message: message.into() }
    }

    /// Creates a `DuplicateCertificateNumber` error.
    #[must_use]
    pub fn duplicate_number(number: impl Into<String>) -> Self {
        Self::DuplicateCertificateNumber { number: number.into() }
    }

    /// Creates an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput { field, message: message.into() }
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout { operation: operation.into(), elapsed }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates an `Internal` error with a source.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::ConfigurationMissing { .. } => ErrorKind::ConfigurationMissing,
            Self::ExternalDependency { .. } => ErrorKind::ExternalDependencyFailure,
            Self::LinkageExtraction { .. } => ErrorKind::LinkageExtractionFailure,
            Self::DuplicateCertificateNumber { .. } => ErrorKind::Conflict,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    ///
    /// Only transient external failures and timeouts qualify. Lookup misses,
    /// state violations and validation errors are deterministic.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ExternalDependency { transient, .. } => *transient,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns the failing dependency for `ExternalDependency` errors.
    #[must_use]
    pub fn dependency(&self) -> Option<Dependency> {
        match self {
            Self::ExternalDependency { dependency, .. } => Some(*dependency),
            _ => None,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Field name.
        field: &'static str,
        /// Minimum allowed value.
        min: String,
        /// Provided value.
        value: String,
    },

    /// A duration or count must be strictly positive.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// Field name.
        field: &'static str,
        /// Provided value.
        value: String,
    },

    /// A related pair of fields is inconsistent.
    #[error("{message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },

    /// A required field is empty or missing.
    #[error("{field} is required")]
    Missing {
        /// Field name.
        field: &'static str,
    },

    /// A field could not be parsed.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Parse failure.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(CertError::not_found(Entity::Student, 7).kind(), ErrorKind::NotFound);
        assert_eq!(CertError::invalid_state("already revoked").kind(), ErrorKind::InvalidState);
        assert_eq!(
            CertError::configuration_missing("Localhost").kind(),
            ErrorKind::ConfigurationMissing
        );
        assert_eq!(
            CertError::external(Dependency::Ledger, "reverted").kind(),
            ErrorKind::ExternalDependencyFailure
        );
        assert_eq!(
            CertError::linkage_extraction("0xabc", "no event").kind(),
            ErrorKind::LinkageExtractionFailure
        );
        assert_eq!(CertError::duplicate_number("CERT-1").kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_transient_classification() {
        assert!(CertError::external_transient(Dependency::MetadataStore, "503").is_transient());
        assert!(!CertError::external(Dependency::Ledger, "reverted").is_transient());
        assert!(CertError::timeout("await_receipt", Duration::from_secs(1)).is_transient());
        assert!(!CertError::not_found(Entity::Certificate, 1).is_transient());
        assert!(!CertError::duplicate_number("CERT-1").is_transient());
    }

    #[test]
    fn test_display_includes_entity_and_key() {
        let err = CertError::not_found(Entity::CertificateType, 3);
        assert_eq!(err.to_string(), "certificate type not found: 3");
    }

    #[test]
    fn test_source_chain_preserved() {
        let io = std::io::Error::other("connection reset");
        let err = CertError::external_with_source(Dependency::Ledger, "rpc", true, io);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("connection reset"));
        assert_eq!(err.dependency(), Some(Dependency::Ledger));
    }
}
