use std::{path::PathBuf, time::Duration};

use alloy::primitives::{Address, address};
use attest_id_primitives::{AuthorizedSignerSet, PrimitiveError};
use serde::{Deserialize, Serialize};
use url::Url;

/// Deployment environments with built-in defaults.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Base mainnet.
    Mainnet,
    /// A local node forked from Base mainnet.
    Local,
}

/// The attestation issuer contract on Base.
pub const COINBASE_ISSUER_CONTRACT: Address =
    address!("0x357458739f90461b99789350868cd7cf330dd7ee");

/// Addresses authorized to sign attestation transactions, in Merkle leaf order.
pub const COINBASE_ATTESTATION_SIGNERS: [Address; 4] = [
    address!("0x952f32128af084422539c4ff96df5c525322e564"),
    address!("0x8844591d47f17bca6f5df8f6b64f4a739f1c0080"),
    address!("0x88fe64ea2e121f49bb77abea6c0a45e93638c3c5"),
    address!("0x44ace9abb148e8412ac4492e9a1ae6bd88226803"),
];

fn default_url_scheme() -> String {
    "zkproofport".to_string()
}

const fn default_attestation_query_limit() -> usize {
    5
}

const fn default_rpc_timeout_ms() -> u64 {
    5_000
}

const fn default_callback_timeout_ms() -> u64 {
    10_000
}

const fn default_attestation_cache_ttl_secs() -> u64 {
    600
}

const fn default_min_free_storage_bytes() -> u64 {
    200 * 1024 * 1024
}

const fn default_active_request_timeout_secs() -> u64 {
    600
}

fn default_circuit_dir() -> PathBuf {
    PathBuf::from("circuits")
}

/// Errors raised while loading or checking a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration is not valid JSON for [`Config`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is present but unusable.
    #[error("Invalid configuration for {attribute}: {reason}")]
    Invalid {
        /// The config attribute that is invalid.
        attribute: &'static str,
        /// Description of why it is invalid.
        reason: String,
    },
}

/// Configuration of a proof request handler.
///
/// Endpoints, contracts and signers must be given explicitly. Tuning values fall back to defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    environment: Environment,
    /// Chain hosting the issuer and verifier contracts.
    chain_id: u64,
    /// RPC mirrors queried concurrently for attestation transactions.
    rpc_urls: Vec<String>,
    /// EAS GraphQL endpoint.
    attestation_index_url: String,
    issuer_contract: Address,
    /// Leaf order matters: it determines the signer set root.
    authorized_signers: Vec<Address>,
    #[serde(default)]
    verifier_address: Option<Address>,
    #[serde(default = "default_url_scheme")]
    url_scheme: String,
    #[serde(default = "default_attestation_query_limit")]
    attestation_query_limit: usize,
    #[serde(default = "default_rpc_timeout_ms")]
    rpc_timeout_ms: u64,
    #[serde(default = "default_callback_timeout_ms")]
    callback_timeout_ms: u64,
    #[serde(default = "default_attestation_cache_ttl_secs")]
    attestation_cache_ttl_secs: u64,
    #[serde(default = "default_min_free_storage_bytes")]
    min_free_storage_bytes: u64,
    #[serde(default = "default_active_request_timeout_secs")]
    active_request_timeout_secs: u64,
    #[serde(default = "default_circuit_dir")]
    circuit_dir: PathBuf,
    #[serde(default)]
    low_memory_mode: bool,
}

impl Config {
    /// Built-in configuration for an environment.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        let (chain_id, rpc_urls, index_url) = match environment {
            Environment::Mainnet => (
                8453,
                vec![
                    "https://mainnet.base.org",
                    "https://base-rpc.publicnode.com",
                    "https://base.llamarpc.com",
                ],
                "https://base.easscan.org/graphql",
            ),
            Environment::Local => (
                8453,
                vec!["http://127.0.0.1:8545"],
                "http://127.0.0.1:4000/graphql",
            ),
        };

        Self {
            environment,
            chain_id,
            rpc_urls: rpc_urls.into_iter().map(String::from).collect(),
            attestation_index_url: index_url.to_string(),
            issuer_contract: COINBASE_ISSUER_CONTRACT,
            authorized_signers: COINBASE_ATTESTATION_SIGNERS.to_vec(),
            verifier_address: None,
            url_scheme: default_url_scheme(),
            attestation_query_limit: default_attestation_query_limit(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            callback_timeout_ms: default_callback_timeout_ms(),
            attestation_cache_ttl_secs: default_attestation_cache_ttl_secs(),
            min_free_storage_bytes: default_min_free_storage_bytes(),
            active_request_timeout_secs: default_active_request_timeout_secs(),
            circuit_dir: default_circuit_dir(),
            low_memory_mode: false,
        }
    }

    /// Loads a configuration from JSON.
    ///
    /// # Errors
    /// Will error if the JSON is not valid or fails [`Config::validate`].
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    /// Will error if the file cannot be read or [`Config::from_json`] fails.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Checks the values that have no meaningful fallback.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending attribute.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_urls.is_empty() {
            return Err(ConfigError::Invalid {
                attribute: "rpc_urls",
                reason: "at least one RPC mirror is required".to_string(),
            });
        }
        let endpoints = self
            .rpc_urls
            .iter()
            .map(|url| ("rpc_urls", url))
            .chain(std::iter::once(("attestation_index_url", &self.attestation_index_url)));
        for (attribute, url) in endpoints {
            Url::parse(url).map_err(|e| ConfigError::Invalid {
                attribute,
                reason: format!("`{url}`: {e}"),
            })?;
        }
        if self.attestation_query_limit == 0 {
            return Err(ConfigError::Invalid {
                attribute: "attestation_query_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.url_scheme.is_empty() {
            return Err(ConfigError::Invalid {
                attribute: "url_scheme",
                reason: "must not be empty".to_string(),
            });
        }
        self.signer_set().map(|_| ())
    }

    /// Builds the authorized signer tree.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if the signer list is empty or too large.
    pub fn signer_set(&self) -> Result<AuthorizedSignerSet, ConfigError> {
        AuthorizedSignerSet::new(self.authorized_signers.clone()).map_err(|e: PrimitiveError| {
            ConfigError::Invalid {
                attribute: "authorized_signers",
                reason: e.to_string(),
            }
        })
    }

    /// Replaces the RPC mirrors.
    #[must_use]
    pub fn with_rpc_urls(mut self, rpc_urls: Vec<String>) -> Self {
        self.rpc_urls = rpc_urls;
        self
    }

    /// Replaces the attestation index endpoint.
    #[must_use]
    pub fn with_attestation_index_url(mut self, url: String) -> Self {
        self.attestation_index_url = url;
        self
    }

    /// Replaces the authorized signer set, in leaf order.
    #[must_use]
    pub fn with_authorized_signers(mut self, signers: Vec<Address>) -> Self {
        self.authorized_signers = signers;
        self
    }

    /// Sets the minimum free storage required before proving.
    #[must_use]
    pub const fn with_min_free_storage_bytes(mut self, bytes: u64) -> Self {
        self.min_free_storage_bytes = bytes;
        self
    }

    /// Sets the verifier contract used for on-chain verification.
    #[must_use]
    pub const fn with_verifier_address(mut self, verifier: Address) -> Self {
        self.verifier_address = Some(verifier);
        self
    }

    /// The environment the defaults were taken from.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.environment
    }

    /// The chain id of the issuer and verifier contracts.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// RPC mirrors used to fetch attestation transactions.
    #[must_use]
    pub const fn rpc_urls(&self) -> &Vec<String> {
        &self.rpc_urls
    }

    /// The EAS GraphQL endpoint.
    #[must_use]
    pub const fn attestation_index_url(&self) -> &String {
        &self.attestation_index_url
    }

    /// The contract attestation transactions must call.
    #[must_use]
    pub const fn issuer_contract(&self) -> &Address {
        &self.issuer_contract
    }

    /// Signers authorized to send attestation transactions.
    #[must_use]
    pub const fn authorized_signers(&self) -> &Vec<Address> {
        &self.authorized_signers
    }

    /// The verifier contract, if on-chain verification is available.
    #[must_use]
    pub const fn verifier_address(&self) -> Option<Address> {
        self.verifier_address
    }

    /// Scheme of inbound request URLs.
    #[must_use]
    pub const fn url_scheme(&self) -> &String {
        &self.url_scheme
    }

    /// Maximum number of attestations requested from the index.
    #[must_use]
    pub const fn attestation_query_limit(&self) -> usize {
        self.attestation_query_limit
    }

    /// Timeout of a single transaction fetch from one mirror.
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Timeout of a single callback delivery.
    #[must_use]
    pub const fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    /// How long a resolved attestation is cached.
    #[must_use]
    pub const fn attestation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.attestation_cache_ttl_secs)
    }

    /// Free storage required before proof generation starts.
    #[must_use]
    pub const fn min_free_storage_bytes(&self) -> u64 {
        self.min_free_storage_bytes
    }

    /// How long an unanswered request stays active.
    #[must_use]
    pub const fn active_request_timeout(&self) -> Duration {
        Duration::from_secs(self.active_request_timeout_secs)
    }

    /// Directory holding compiled circuits and proving parameters.
    #[must_use]
    pub const fn circuit_dir(&self) -> &PathBuf {
        &self.circuit_dir
    }

    /// Whether the proving engine should trade speed for memory.
    #[must_use]
    pub const fn low_memory_mode(&self) -> bool {
        self.low_memory_mode
    }
}
