//! Gateway configuration.
//!
//! Every config type validates in its `bon` builder and deserializes with
//! `humantime` durations so the same structures load from JSON files and
//! build programmatically in tests.

use std::time::Duration;

use alloy_primitives::Address;
use certledger_core::ConfigError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Default retry count for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default first backoff delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Default backoff cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default Pinata API base URL.
pub const DEFAULT_PINATA_API_URL: &str = "https://api.pinata.cloud";

/// Retry policy for transient failures.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use certledger_gateway::RetryConfig;
///
/// let config = RetryConfig::builder()
///     .max_retries(5)
///     .initial_backoff(Duration::from_millis(50))
///     .build()?;
/// assert_eq!(config.max_retries, 5);
/// # Ok::<(), certledger_core::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry. Doubles on every further retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    /// Backoff cap before jitter.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[bon::bon]
impl RetryConfig {
    /// Creates a retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `initial_backoff` is zero or exceeds
    /// `max_backoff`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_RETRIES)] max_retries: u32,
        #[builder(default = DEFAULT_INITIAL_BACKOFF)] initial_backoff: Duration,
        #[builder(default = DEFAULT_MAX_BACKOFF)] max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        if initial_backoff.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "initial_backoff",
                value: "0s".into(),
            });
        }
        if initial_backoff > max_backoff {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "initial_backoff ({initial_backoff:?}) exceeds max_backoff ({max_backoff:?})"
                ),
            });
        }
        Ok(Self { max_retries, initial_backoff, max_backoff })
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }
}

/// Configuration for [`RpcLedgerGateway`](crate::RpcLedgerGateway).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcLedgerConfig {
    /// JSON-RPC endpoint.
    pub(crate) rpc_url: String,

    /// Certificate contract address.
    pub(crate) contract_address: Address,

    /// Node-managed account used as `from` for transactions.
    pub(crate) signer: Address,

    /// Optional explicit gas limit for transactions.
    #[serde(default)]
    pub(crate) gas_limit: Option<u64>,

    /// Per-request timeout.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,

    /// Interval between receipt polls.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub(crate) poll_interval: Duration,

    /// Retry policy for read calls. Transactions are never retried.
    #[serde(default)]
    pub(crate) retry: RetryConfig,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

#[bon::bon]
impl RpcLedgerConfig {
    /// Creates an RPC gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty, the contract address is
    /// zero, or a duration is zero.
    #[builder]
    pub fn new(
        #[builder(into)] rpc_url: String,
        contract_address: Address,
        signer: Address,
        gas_limit: Option<u64>,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
        #[builder(default = DEFAULT_POLL_INTERVAL)] poll_interval: Duration,
        #[builder(default)] retry: RetryConfig,
    ) -> Result<Self, ConfigError> {
        if rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing { field: "rpc_url" });
        }
        if contract_address == Address::ZERO {
            return Err(ConfigError::Invalid {
                field: "contract_address",
                message: "must not be the zero address".into(),
            });
        }
        if request_timeout.is_zero() {
            return Err(ConfigError::MustBePositive { field: "request_timeout", value: "0s".into() });
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::MustBePositive { field: "poll_interval", value: "0s".into() });
        }
        Ok(Self { rpc_url, contract_address, signer, gas_limit, request_timeout, poll_interval, retry })
    }

    /// Returns the RPC endpoint.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Returns the contract address.
    #[must_use]
    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    /// Returns the signer address.
    #[must_use]
    pub fn signer(&self) -> Address {
        self.signer
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// Configuration for [`PinataMetadataStore`](crate::PinataMetadataStore).
///
/// The JWT is zeroized on drop and redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinataConfig {
    /// API base URL.
    #[serde(default = "default_pinata_api_url")]
    pub(crate) api_url: String,

    /// Gateway base URL used to build retrieval URLs.
    pub(crate) gateway_url: String,

    /// Bearer token for the pinning API.
    #[serde(skip_serializing)]
    pub(crate) jwt: Zeroizing<String>,

    /// Per-request timeout.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,
}

fn default_pinata_api_url() -> String {
    DEFAULT_PINATA_API_URL.to_owned()
}

impl std::fmt::Debug for PinataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinataConfig")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .field("jwt", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[bon::bon]
impl PinataConfig {
    /// Creates a Pinata configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an empty gateway URL or JWT.
    #[builder]
    pub fn new(
        #[builder(into, default = DEFAULT_PINATA_API_URL.to_owned())] api_url: String,
        #[builder(into)] gateway_url: String,
        #[builder(into)] jwt: String,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let jwt = Zeroizing::new(jwt);
        if gateway_url.trim().is_empty() {
            return Err(ConfigError::Missing { field: "gateway_url" });
        }
        if jwt.trim().is_empty() {
            return Err(ConfigError::Missing { field: "jwt" });
        }
        if request_timeout.is_zero() {
            return Err(ConfigError::MustBePositive { field: "request_timeout", value: "0s".into() });
        }
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_owned(),
            gateway_url: gateway_url.trim_end_matches('/').to_owned(),
            jwt,
            request_timeout,
        })
    }

    /// Returns the gateway base URL.
    #[must_use]
    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }
}
