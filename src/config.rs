use alloy::primitives::{Address, B256};
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::ChainSpec;
use crate::writers::InclusionPolicy;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub beacon: BeaconConfig,
    pub parachain: ParachainConfig,
    pub relaychain: RelayChainConfig,
    pub ethereum: EthereumConfig,
    pub retry: RetryConfig,
    pub api_port: u16,
    pub directions: RelayDirections,
}

/// Beacon node configuration
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    pub endpoint: String,
    /// Endpoint serving the latest finalized light-client update
    pub finalized_update_endpoint: String,
    pub trusted_block_root: B256,
    pub slots_per_epoch: u64,
    pub epochs_per_sync_committee_period: u64,
    pub electra_fork_epoch: Option<u64>,
    pub poll_interval_ms: u64,
}

/// Parachain configuration
#[derive(Debug, Clone)]
pub struct ParachainConfig {
    pub endpoint: String,
    pub para_id: u32,
    /// Public key of the signing account
    pub account: [u8; 32],
    pub signer_url: String,
    pub beacon_pallet_index: u8,
    /// Storage prefix of the beacon client pallet
    pub beacon_pallet_name: String,
    pub inclusion_poll_ms: u64,
    pub max_inclusion_checks: u32,
    /// Off-chain indexing key prefix for outbound bundles
    pub indexing_prefix: String,
}

/// Relay chain configuration
#[derive(Debug, Clone)]
pub struct RelayChainConfig {
    pub endpoint: String,
    pub beefy_poll_interval_ms: u64,
}

/// Ethereum configuration
#[derive(Clone)]
pub struct EthereumConfig {
    pub endpoint: String,
    pub chain_id: u64,
    pub private_key: String,
    pub inbound_channel_address: Address,
    pub confirmation_timeout_secs: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for EthereumConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthereumConfig")
            .field("endpoint", &self.endpoint)
            .field("chain_id", &self.chain_id)
            .field("private_key", &"<redacted>")
            .field("inbound_channel_address", &self.inbound_channel_address)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .finish()
    }
}

/// Retry configuration shared by every stage
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Which relay directions to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirections {
    Both,
    Beacon,
    Parachain,
}

impl RelayDirections {
    pub fn beacon(&self) -> bool {
        matches!(self, Self::Both | Self::Beacon)
    }

    pub fn parachain(&self) -> bool {
        matches!(self, Self::Both | Self::Parachain)
    }

    /// Names reported by the health endpoint
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.beacon() {
            names.push("beacon");
        }
        if self.parachain() {
            names.push("parachain");
        }
        names
    }
}

impl FromStr for RelayDirections {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "beacon" => Ok(Self::Beacon),
            "parachain" => Ok(Self::Parachain),
            other => Err(eyre!(
                "RELAY_DIRECTIONS must be one of both, beacon, parachain (got {})",
                other
            )),
        }
    }
}

/// Default functions
fn default_trusted_block_root() -> B256 {
    B256::from_str("0xed94aec726c5158606f33b5c599f8bf14c9a88d1722fe1f3c327ddb882c219fc")
        .unwrap_or_default()
}

fn default_slots_per_epoch() -> u64 {
    32
}

fn default_epochs_per_sync_committee_period() -> u64 {
    256
}

fn default_beacon_poll_interval() -> u64 {
    12_000
}

fn default_inclusion_poll() -> u64 {
    6_000
}

fn default_max_inclusion_checks() -> u32 {
    20
}

fn default_beacon_pallet_name() -> String {
    "EthereumBeaconClient".to_string()
}

fn default_indexing_prefix() -> String {
    "commitment".to_string()
}

fn default_beefy_poll_interval() -> u64 {
    6_000
}

fn default_confirmation_timeout() -> u64 {
    300
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_initial_backoff() -> u64 {
    2_000
}

fn default_retry_max_backoff() -> u64 {
    60_000
}

fn default_api_port() -> u16 {
    9090
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn required_parse<T>(name: &str, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    required(name)?
        .trim()
        .parse()
        .wrap_err_with(|| format!("{} must be a valid {}", name, what))
}

/// Unset means default; set but malformed is an error
fn optional_parse<T>(name: &str, what: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .wrap_err_with(|| format!("{} must be a valid {}", name, what)),
        Err(_) => Ok(default),
    }
}

fn parse_account(value: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(value.trim().trim_start_matches("0x"))
        .wrap_err("PARACHAIN_ACCOUNT must be hex encoded")?;
    raw.try_into()
        .map_err(|_| eyre!("PARACHAIN_ACCOUNT must be a 32-byte public key"))
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let directions: RelayDirections = match env::var("RELAY_DIRECTIONS") {
            Ok(value) => value.parse()?,
            Err(_) => RelayDirections::Both,
        };

        let beacon = BeaconConfig {
            endpoint: required("BEACON_ENDPOINT")?,
            finalized_update_endpoint: required("BEACON_FINALIZED_UPDATE_ENDPOINT")?,
            trusted_block_root: optional_parse(
                "BEACON_TRUSTED_BLOCK_ROOT",
                "32-byte hex root",
                default_trusted_block_root(),
            )?,
            slots_per_epoch: optional_parse(
                "BEACON_SLOTS_PER_EPOCH",
                "u64",
                default_slots_per_epoch(),
            )?,
            epochs_per_sync_committee_period: optional_parse(
                "BEACON_EPOCHS_PER_SYNC_COMMITTEE_PERIOD",
                "u64",
                default_epochs_per_sync_committee_period(),
            )?,
            electra_fork_epoch: match env::var("BEACON_ELECTRA_FORK_EPOCH") {
                Ok(value) => Some(
                    value
                        .trim()
                        .parse()
                        .wrap_err("BEACON_ELECTRA_FORK_EPOCH must be a valid u64")?,
                ),
                Err(_) => None,
            },
            poll_interval_ms: optional_parse(
                "BEACON_POLL_INTERVAL_MS",
                "u64",
                default_beacon_poll_interval(),
            )?,
        };

        let parachain = ParachainConfig {
            endpoint: required("PARACHAIN_ENDPOINT")?,
            para_id: required_parse("PARACHAIN_ID", "u32")?,
            account: parse_account(&required("PARACHAIN_ACCOUNT")?)?,
            signer_url: required("PARACHAIN_SIGNER_URL")?,
            beacon_pallet_index: required_parse("PARACHAIN_BEACON_PALLET_INDEX", "u8")?,
            beacon_pallet_name: env::var("PARACHAIN_BEACON_PALLET_NAME")
                .unwrap_or_else(|_| default_beacon_pallet_name()),
            inclusion_poll_ms: optional_parse(
                "PARACHAIN_INCLUSION_POLL_MS",
                "u64",
                default_inclusion_poll(),
            )?,
            max_inclusion_checks: optional_parse(
                "PARACHAIN_MAX_INCLUSION_CHECKS",
                "u32",
                default_max_inclusion_checks(),
            )?,
            indexing_prefix: env::var("BASIC_CHANNEL_INDEXING_PREFIX")
                .unwrap_or_else(|_| default_indexing_prefix()),
        };

        let relaychain = RelayChainConfig {
            endpoint: required("RELAYCHAIN_ENDPOINT")?,
            beefy_poll_interval_ms: optional_parse(
                "BEEFY_POLL_INTERVAL_MS",
                "u64",
                default_beefy_poll_interval(),
            )?,
        };

        let ethereum = EthereumConfig {
            endpoint: required("ETHEREUM_ENDPOINT")?,
            chain_id: required_parse("ETHEREUM_CHAIN_ID", "u64")?,
            private_key: required("ETHEREUM_PRIVATE_KEY")?,
            inbound_channel_address: required_parse("INBOUND_CHANNEL_ADDRESS", "hex address")?,
            confirmation_timeout_secs: optional_parse(
                "ETHEREUM_CONFIRMATION_TIMEOUT_SECS",
                "u64",
                default_confirmation_timeout(),
            )?,
        };

        let retry = RetryConfig {
            max_attempts: optional_parse(
                "RETRY_MAX_ATTEMPTS",
                "u32",
                default_retry_max_attempts(),
            )?,
            initial_backoff_ms: optional_parse(
                "RETRY_INITIAL_BACKOFF_MS",
                "u64",
                default_retry_initial_backoff(),
            )?,
            max_backoff_ms: optional_parse(
                "RETRY_MAX_BACKOFF_MS",
                "u64",
                default_retry_max_backoff(),
            )?,
        };

        let config = Config {
            beacon,
            parachain,
            relaychain,
            ethereum,
            retry,
            api_port: optional_parse("API_PORT", "port", default_api_port())?,
            directions,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.beacon.endpoint.is_empty() {
            return Err(eyre!("beacon.endpoint cannot be empty"));
        }

        if self.beacon.finalized_update_endpoint.is_empty() {
            return Err(eyre!("beacon.finalized_update_endpoint cannot be empty"));
        }

        if self.beacon.slots_per_epoch == 0 || self.beacon.epochs_per_sync_committee_period == 0 {
            return Err(eyre!(
                "beacon slots_per_epoch and epochs_per_sync_committee_period must be positive"
            ));
        }

        if self.beacon.trusted_block_root == B256::ZERO {
            return Err(eyre!("beacon.trusted_block_root cannot be zero"));
        }

        if self.parachain.endpoint.is_empty() {
            return Err(eyre!("parachain.endpoint cannot be empty"));
        }

        if self.parachain.signer_url.is_empty() {
            return Err(eyre!("parachain.signer_url cannot be empty"));
        }

        if self.parachain.max_inclusion_checks == 0 {
            return Err(eyre!("parachain.max_inclusion_checks must be at least 1"));
        }

        if self.parachain.beacon_pallet_name.is_empty() {
            return Err(eyre!("parachain.beacon_pallet_name cannot be empty"));
        }
        if self.parachain.indexing_prefix.is_empty() {
            return Err(eyre!("parachain.indexing_prefix cannot be empty"));
        }

        if self.relaychain.endpoint.is_empty() {
            return Err(eyre!("relaychain.endpoint cannot be empty"));
        }

        if self.ethereum.endpoint.is_empty() {
            return Err(eyre!("ethereum.endpoint cannot be empty"));
        }

        let key = &self.ethereum.private_key;
        if key.len() != 66 || !key.starts_with("0x") {
            return Err(eyre!("ethereum.private_key must be 66 chars (0x + 64 hex chars)"));
        }

        if self.ethereum.inbound_channel_address == Address::ZERO {
            return Err(eyre!("ethereum.inbound_channel_address cannot be zero"));
        }

        if self.retry.max_attempts == 0 {
            return Err(eyre!("retry.max_attempts must be at least 1"));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(eyre!(
                "retry.initial_backoff_ms cannot exceed retry.max_backoff_ms"
            ));
        }

        Ok(())
    }

    pub fn chain_spec(&self) -> ChainSpec {
        ChainSpec {
            slots_per_epoch: self.beacon.slots_per_epoch,
            epochs_per_sync_committee_period: self.beacon.epochs_per_sync_committee_period,
            electra_fork_epoch: self.beacon.electra_fork_epoch,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn inclusion_policy(&self) -> InclusionPolicy {
        InclusionPolicy {
            poll_interval: Duration::from_millis(self.parachain.inclusion_poll_ms),
            max_checks: self.parachain.max_inclusion_checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: &[&str] = &[
        "BEACON_ENDPOINT",
        "BEACON_FINALIZED_UPDATE_ENDPOINT",
        "BEACON_TRUSTED_BLOCK_ROOT",
        "BEACON_SLOTS_PER_EPOCH",
        "BEACON_EPOCHS_PER_SYNC_COMMITTEE_PERIOD",
        "BEACON_ELECTRA_FORK_EPOCH",
        "BEACON_POLL_INTERVAL_MS",
        "PARACHAIN_ENDPOINT",
        "PARACHAIN_ID",
        "PARACHAIN_ACCOUNT",
        "PARACHAIN_SIGNER_URL",
        "PARACHAIN_BEACON_PALLET_INDEX",
        "PARACHAIN_BEACON_PALLET_NAME",
        "PARACHAIN_INCLUSION_POLL_MS",
        "PARACHAIN_MAX_INCLUSION_CHECKS",
        "BASIC_CHANNEL_INDEXING_PREFIX",
        "RELAYCHAIN_ENDPOINT",
        "BEEFY_POLL_INTERVAL_MS",
        "ETHEREUM_ENDPOINT",
        "ETHEREUM_CHAIN_ID",
        "ETHEREUM_PRIVATE_KEY",
        "INBOUND_CHANNEL_ADDRESS",
        "ETHEREUM_CONFIRMATION_TIMEOUT_SECS",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_INITIAL_BACKOFF_MS",
        "RETRY_MAX_BACKOFF_MS",
        "API_PORT",
        "RELAY_DIRECTIONS",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    fn set_required_env() {
        clear_env();
        env::set_var("BEACON_ENDPOINT", "http://localhost:5052");
        env::set_var(
            "BEACON_FINALIZED_UPDATE_ENDPOINT",
            "http://localhost:5052/eth/v1/beacon/light_client/finality_update",
        );
        env::set_var("PARACHAIN_ENDPOINT", "http://localhost:9944");
        env::set_var("PARACHAIN_ID", "1000");
        env::set_var("PARACHAIN_ACCOUNT", format!("0x{}", "11".repeat(32)));
        env::set_var("PARACHAIN_SIGNER_URL", "http://localhost:8000/sign");
        env::set_var("PARACHAIN_BEACON_PALLET_INDEX", "50");
        env::set_var("RELAYCHAIN_ENDPOINT", "http://localhost:9933");
        env::set_var("ETHEREUM_ENDPOINT", "http://localhost:8545");
        env::set_var("ETHEREUM_CHAIN_ID", "31337");
        env::set_var(
            "ETHEREUM_PRIVATE_KEY",
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        );
        env::set_var(
            "INBOUND_CHANNEL_ADDRESS",
            "0x0000000000000000000000000000000000000001",
        );
    }

    #[test]
    #[serial]
    fn test_load_applies_defaults() {
        set_required_env();
        let config = Config::load_from_env().unwrap();
        clear_env();

        assert_eq!(config.beacon.trusted_block_root, default_trusted_block_root());
        assert_eq!(config.beacon.poll_interval_ms, 12_000);
        assert_eq!(config.beacon.electra_fork_epoch, None);
        assert_eq!(config.parachain.para_id, 1000);
        assert_eq!(config.parachain.account, [0x11; 32]);
        assert_eq!(config.parachain.beacon_pallet_index, 50);
        assert_eq!(config.parachain.beacon_pallet_name, "EthereumBeaconClient");
        assert_eq!(config.parachain.indexing_prefix, "commitment");
        assert_eq!(config.parachain.max_inclusion_checks, 20);
        assert_eq!(config.relaychain.beefy_poll_interval_ms, 6_000);
        assert_eq!(config.ethereum.confirmation_timeout_secs, 300);
        assert_eq!(config.api_port, 9090);
        assert_eq!(config.directions, RelayDirections::Both);

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_backoff, Duration::from_secs(2));
        assert_eq!(retry.max_backoff, Duration::from_secs(60));

        assert_eq!(config.chain_spec(), ChainSpec::default());
    }

    #[test]
    #[serial]
    fn test_missing_required_var_is_named() {
        set_required_env();
        env::remove_var("RELAYCHAIN_ENDPOINT");
        let err = Config::load_from_env().unwrap_err();
        clear_env();

        assert_eq!(
            err.to_string(),
            "RELAYCHAIN_ENDPOINT environment variable is required"
        );
    }

    #[test]
    #[serial]
    fn test_malformed_optional_var_is_rejected() {
        set_required_env();
        env::set_var("BEACON_ELECTRA_FORK_EPOCH", "soon");
        let err = Config::load_from_env().unwrap_err();
        clear_env();

        assert!(err.to_string().contains("BEACON_ELECTRA_FORK_EPOCH"));
    }

    #[test]
    #[serial]
    fn test_overrides_and_directions() {
        set_required_env();
        env::set_var("BEACON_ELECTRA_FORK_EPOCH", "364032");
        env::set_var("RELAY_DIRECTIONS", "parachain");
        env::set_var("RETRY_MAX_ATTEMPTS", "3");
        let config = Config::load_from_env().unwrap();
        clear_env();

        assert_eq!(config.chain_spec().electra_fork_epoch, Some(364032));
        assert_eq!(config.directions, RelayDirections::Parachain);
        assert!(!config.directions.beacon());
        assert_eq!(config.directions.names(), vec!["parachain"]);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_short_account_rejected() {
        set_required_env();
        env::set_var("PARACHAIN_ACCOUNT", "0x1234");
        let err = Config::load_from_env().unwrap_err();
        clear_env();

        assert!(err.to_string().contains("32-byte"));
    }

    #[test]
    #[serial]
    fn test_validation_rejects_bad_key_and_backoff() {
        set_required_env();
        let mut config = Config::load_from_env().unwrap();
        clear_env();

        config.ethereum.private_key = "0x123".to_string();
        assert!(config.validate().is_err());

        config.ethereum.private_key =
            "0x0000000000000000000000000000000000000000000000000000000000000001".to_string();
        assert!(config.validate().is_ok());

        config.retry.initial_backoff_ms = config.retry.max_backoff_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let ethereum = EthereumConfig {
            endpoint: "http://localhost:8545".to_string(),
            chain_id: 1,
            private_key: "0xdeadbeef".to_string(),
            inbound_channel_address: Address::ZERO,
            confirmation_timeout_secs: 300,
        };
        let debug = format!("{:?}", ethereum);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("deadbeef"));
    }

    #[test]
    fn test_unknown_direction() {
        assert!("sideways".parse::<RelayDirections>().is_err());
        assert_eq!("Beacon".parse::<RelayDirections>().unwrap(), RelayDirections::Beacon);
    }
}
