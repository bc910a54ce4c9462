//! Coordinator, driver and reconciler configuration.
//!
//! Configuration is resolved once at startup and passed by reference. Every
//! type deserializes with defaults for omitted fields and rejects unknown
//! fields, and every builder validates its inputs.
//!
//! ```json
//! {
//!   "network": { "mode": "named", "name": "Localhost" },
//!   "numberRetry": { "maxAttempts": 5, "initialBackoff": "10ms", "maxBackoff": "320ms" },
//!   "revocationPolicy": "registry_authoritative"
//! }
//! ```

use std::time::Duration;

use certledger_core::ConfigError;
use certledger_gateway::RetryConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the blockchain network.
pub const NETWORK_ENV: &str = "BLOCKCHAIN_NETWORK";

/// Network used when [`NETWORK_ENV`] is unset.
pub const DEFAULT_NETWORK: &str = "localhost";

/// Default certificate-number attempts.
pub const DEFAULT_NUMBER_ATTEMPTS: u32 = 5;

/// Default first backoff after a number collision.
pub const DEFAULT_NUMBER_INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Default backoff cap after number collisions.
pub const DEFAULT_NUMBER_MAX_BACKOFF: Duration = Duration::from_millis(320);

/// Default confirmations awaited for ledger transactions.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default bound on a receipt wait.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default age after which a pending row is considered for reconciliation.
pub const DEFAULT_PENDING_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// Default age after which an unmatched pending row is flagged.
pub const DEFAULT_ABANDON_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default number of blocks read per event query.
pub const DEFAULT_SCAN_CHUNK: u64 = 2_000;

/// Uppercases the first character of a network name, the form the registry
/// stores (`localhost` becomes `Localhost`).
#[must_use]
pub fn normalize_network_name(name: &str) -> String {
    let name = name.trim();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// How the network for new certificates is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case", deny_unknown_fields)]
pub enum NetworkSelection {
    /// The active configuration with this name.
    Named {
        /// Stored network name.
        name: String,
    },
    /// The newest active configuration, testnets first.
    Active,
}

impl NetworkSelection {
    /// Selects a network by name, normalizing it to the stored form.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::Named { name: normalize_network_name(name) }
    }

    /// Label used in errors and logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Named { name } => name,
            Self::Active => "<active>",
        }
    }
}

impl Default for NetworkSelection {
    fn default() -> Self {
        Self::named(DEFAULT_NETWORK)
    }
}

/// Who decides validity when a certificate is revoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationPolicy {
    /// The registry alone is the system of record. The ledger's revoked
    /// flag is advisory and never written by the coordinator.
    #[default]
    RegistryAuthoritative,
    /// Anchored certificates are revoked on the ledger first; the registry
    /// is updated only after the ledger transaction is mined.
    LedgerFirst,
}

/// Bounded regeneration of certificate numbers after a collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NumberRetryConfig {
    /// Total attempts, the first included.
    #[serde(default = "default_number_attempts")]
    pub max_attempts: u32,
    /// Delay after the first collision.
    #[serde(with = "humantime_serde", default = "default_number_initial_backoff")]
    pub initial_backoff: Duration,
    /// Delay cap.
    #[serde(with = "humantime_serde", default = "default_number_max_backoff")]
    pub max_backoff: Duration,
}

fn default_number_attempts() -> u32 {
    DEFAULT_NUMBER_ATTEMPTS
}

fn default_number_initial_backoff() -> Duration {
    DEFAULT_NUMBER_INITIAL_BACKOFF
}

fn default_number_max_backoff() -> Duration {
    DEFAULT_NUMBER_MAX_BACKOFF
}

impl Default for NumberRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_NUMBER_ATTEMPTS,
            initial_backoff: DEFAULT_NUMBER_INITIAL_BACKOFF,
            max_backoff: DEFAULT_NUMBER_MAX_BACKOFF,
        }
    }
}

#[bon::bon]
impl NumberRetryConfig {
    /// Creates a number retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_attempts` is zero or the backoff
    /// bounds are inverted.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_NUMBER_ATTEMPTS)] max_attempts: u32,
        #[builder(default = DEFAULT_NUMBER_INITIAL_BACKOFF)] initial_backoff: Duration,
        #[builder(default = DEFAULT_NUMBER_MAX_BACKOFF)] max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_attempts",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if initial_backoff > max_backoff {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "initial_backoff ({initial_backoff:?}) exceeds max_backoff ({max_backoff:?})"
                ),
            });
        }
        Ok(Self { max_attempts, initial_backoff, max_backoff })
    }

    /// Delay after the `attempt`-th collision (zero-based), doubling up to the cap.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.max_backoff)
    }
}

/// Configuration of the [`LifecycleCoordinator`](crate::LifecycleCoordinator).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Network selection for new certificates.
    #[serde(default)]
    pub network: NetworkSelection,
    /// Collision handling for certificate numbers.
    #[serde(default)]
    pub number_retry: NumberRetryConfig,
    /// Revocation policy.
    #[serde(default)]
    pub revocation_policy: RevocationPolicy,
    /// Ledger settings used by the ledger-first revocation path.
    #[serde(default)]
    pub ledger: LedgerWaitConfig,
}

#[bon::bon]
impl CoordinatorConfig {
    /// Creates a coordinator configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an empty network name.
    #[builder]
    pub fn new(
        #[builder(default)] network: NetworkSelection,
        #[builder(default)] number_retry: NumberRetryConfig,
        #[builder(default)] revocation_policy: RevocationPolicy,
        #[builder(default)] ledger: LedgerWaitConfig,
    ) -> Result<Self, ConfigError> {
        if let NetworkSelection::Named { name } = &network
            && name.trim().is_empty()
        {
            return Err(ConfigError::Missing { field: "network.name" });
        }
        Ok(Self { network, number_retry, revocation_policy, ledger })
    }

    /// Reads the network from `BLOCKCHAIN_NETWORK`, defaulting to `localhost`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the variable is set but blank.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the variable is set but blank.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let network = lookup(NETWORK_ENV).unwrap_or_else(|| DEFAULT_NETWORK.to_owned());
        Self::builder().network(NetworkSelection::named(&network)).build()
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let parsed: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::Invalid { field: "coordinator", message: e.to_string() })?;
        Self::builder()
            .network(parsed.network)
            .number_retry(parsed.number_retry)
            .revocation_policy(parsed.revocation_policy)
            .ledger(parsed.ledger)
            .build()
    }
}

/// How long ledger transactions are awaited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LedgerWaitConfig {
    /// Confirmations awaited after inclusion.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Bound on a single receipt wait.
    #[serde(with = "humantime_serde", default = "default_receipt_timeout")]
    pub receipt_timeout: Duration,
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_receipt_timeout() -> Duration {
    DEFAULT_RECEIPT_TIMEOUT
}

impl Default for LedgerWaitConfig {
    fn default() -> Self {
        Self { confirmations: DEFAULT_CONFIRMATIONS, receipt_timeout: DEFAULT_RECEIPT_TIMEOUT }
    }
}

#[bon::bon]
impl LedgerWaitConfig {
    /// Creates a ledger wait configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for zero confirmations or a zero timeout.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_CONFIRMATIONS)] confirmations: u64,
        #[builder(default = DEFAULT_RECEIPT_TIMEOUT)] receipt_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if confirmations == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "confirmations",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if receipt_timeout.is_zero() {
            return Err(ConfigError::MustBePositive { field: "receipt_timeout", value: "0s".into() });
        }
        Ok(Self { confirmations, receipt_timeout })
    }
}

/// Configuration of the [`IssuanceDriver`](crate::IssuanceDriver).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DriverConfig {
    /// Receipt wait settings.
    #[serde(default)]
    pub ledger: LedgerWaitConfig,
    /// Retries of the metadata publish.
    #[serde(default)]
    pub publish_retry: RetryConfig,
    /// Retries of the attach callback.
    #[serde(default)]
    pub attach_retry: RetryConfig,
}

#[bon::bon]
impl DriverConfig {
    /// Creates a driver configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for zero confirmations or a zero timeout.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_CONFIRMATIONS)] confirmations: u64,
        #[builder(default = DEFAULT_RECEIPT_TIMEOUT)] receipt_timeout: Duration,
        #[builder(default)] publish_retry: RetryConfig,
        #[builder(default)] attach_retry: RetryConfig,
    ) -> Result<Self, ConfigError> {
        let ledger =
            LedgerWaitConfig::builder().confirmations(confirmations).receipt_timeout(receipt_timeout).build()?;
        Ok(Self { ledger, publish_retry, attach_retry })
    }
}

/// Configuration of the [`Reconciler`](crate::Reconciler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Pending rows younger than this are left to their driver.
    #[serde(with = "humantime_serde", default = "default_pending_threshold")]
    pub pending_threshold: Duration,
    /// Unmatched pending rows older than this are flagged for review.
    #[serde(with = "humantime_serde", default = "default_abandon_after")]
    pub abandon_after: Duration,
    /// First block scanned for issued events.
    #[serde(default)]
    pub from_block: u64,
    /// Interval between passes of the background task.
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    pub interval: Duration,
    /// Blocks read per event query.
    #[serde(default = "default_scan_chunk")]
    pub scan_chunk: u64,
}

fn default_pending_threshold() -> Duration {
    DEFAULT_PENDING_THRESHOLD
}

fn default_abandon_after() -> Duration {
    DEFAULT_ABANDON_AFTER
}

fn default_reconcile_interval() -> Duration {
    DEFAULT_RECONCILE_INTERVAL
}

fn default_scan_chunk() -> u64 {
    DEFAULT_SCAN_CHUNK
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pending_threshold: DEFAULT_PENDING_THRESHOLD,
            abandon_after: DEFAULT_ABANDON_AFTER,
            from_block: 0,
            interval: DEFAULT_RECONCILE_INTERVAL,
            scan_chunk: DEFAULT_SCAN_CHUNK,
        }
    }
}

#[bon::bon]
impl ReconcileConfig {
    /// Creates a reconciler configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the interval or the scan chunk is zero, or
    /// `abandon_after` is shorter than `pending_threshold`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_PENDING_THRESHOLD)] pending_threshold: Duration,
        #[builder(default = DEFAULT_ABANDON_AFTER)] abandon_after: Duration,
        #[builder(default)] from_block: u64,
        #[builder(default = DEFAULT_RECONCILE_INTERVAL)] interval: Duration,
        #[builder(default = DEFAULT_SCAN_CHUNK)] scan_chunk: u64,
    ) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::MustBePositive { field: "interval", value: "0s".into() });
        }
        if scan_chunk == 0 {
            return Err(ConfigError::MustBePositive { field: "scan_chunk", value: "0".into() });
        }
        if abandon_after < pending_threshold {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "abandon_after ({abandon_after:?}) is shorter than pending_threshold ({pending_threshold:?})"
                ),
            });
        }
        Ok(Self { pending_threshold, abandon_after, from_block, interval, scan_chunk })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_network_name_normalized() {
        assert_eq!(normalize_network_name("localhost"), "Localhost");
        assert_eq!(normalize_network_name("mumbai"), "Mumbai");
        assert_eq!(normalize_network_name("Sepolia"), "Sepolia");
        assert_eq!(normalize_network_name(""), "");
    }

    #[test]
    fn test_from_lookup_defaults_to_localhost() {
        let config = CoordinatorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.network, NetworkSelection::Named { name: "Localhost".into() });
        assert_eq!(config.revocation_policy, RevocationPolicy::RegistryAuthoritative);
        assert_eq!(config.number_retry.max_attempts, 5);
    }

    #[test]
    fn test_from_lookup_reads_network() {
        let config =
            CoordinatorConfig::from_lookup(|key| (key == NETWORK_ENV).then(|| "mumbai".to_owned()))
                .unwrap();
        assert_eq!(config.network.label(), "Mumbai");
    }

    #[test]
    fn test_blank_network_rejected() {
        let result = CoordinatorConfig::from_lookup(|_| Some("   ".to_owned()));
        assert_eq!(result.unwrap_err(), ConfigError::Missing { field: "network.name" });
    }

    #[test]
    fn test_from_json_with_defaults() {
        let config = CoordinatorConfig::from_json(
            r#"{"network":{"mode":"active"},"revocationPolicy":"ledger_first","numberRetry":{"maxAttempts":3}}"#,
        )
        .unwrap();
        assert_eq!(config.network, NetworkSelection::Active);
        assert_eq!(config.revocation_policy, RevocationPolicy::LedgerFirst);
        assert_eq!(config.number_retry.max_attempts, 3);
        assert_eq!(config.number_retry.initial_backoff, Duration::from_millis(10));
        assert_eq!(config.ledger.receipt_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        assert!(matches!(
            CoordinatorConfig::from_json(r#"{"networks":"x"}"#),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_number_backoff_doubles_to_cap() {
        let retry = NumberRetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_millis(10));
        assert_eq!(retry.backoff(3), Duration::from_millis(80));
        assert_eq!(retry.backoff(5), Duration::from_millis(320));
        assert_eq!(retry.backoff(40), Duration::from_millis(320));
    }

    #[test]
    fn test_number_retry_validation() {
        assert!(NumberRetryConfig::builder().max_attempts(0).build().is_err());
        assert!(
            NumberRetryConfig::builder()
                .initial_backoff(Duration::from_secs(1))
                .max_backoff(Duration::from_millis(1))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_reconcile_validation() {
        assert!(ReconcileConfig::builder().interval(Duration::ZERO).build().is_err());
        assert!(ReconcileConfig::builder().scan_chunk(0).build().is_err());
        assert!(
            ReconcileConfig::builder()
                .pending_threshold(Duration::from_secs(60))
                .abandon_after(Duration::from_secs(30))
                .build()
                .is_err()
        );
        let config: ReconcileConfig = serde_json::from_str(r#"{"pendingThreshold":"1m"}"#).unwrap();
        assert_eq!(config.pending_threshold, Duration::from_secs(60));
        assert_eq!(config.abandon_after, DEFAULT_ABANDON_AFTER);
        assert_eq!(config.scan_chunk, DEFAULT_SCAN_CHUNK);
    }

    #[test]
    fn test_driver_config_validation() {
        assert!(DriverConfig::builder().confirmations(0).build().is_err());
        let config = DriverConfig::default();
        assert_eq!(config.ledger.confirmations, 1);
    }
}
