//! Faucet configuration
//!
//! [`FileConfig`] mirrors the on-disk configuration. [`FleetConfig`] is the
//! validated form: one [`ChainPool`] per configured network plus the
//! process-wide settings. It is built once at startup and then handed to the
//! dispatcher, which never mutates it.

use crate::catalog::{NetworkCatalog, NetworkDescriptor, NATIVE_DECIMALS};
use multifaucet_common::utils::logging::LoggingConfig;
use multifaucet_common::{format_units, parse_units};
use multifaucet_crypto::{load_key_file, EcdsaError, KeyFileError, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_PAYOUT: f64 = 1.0;
pub const DEFAULT_INTERVAL_MINUTES: u64 = 1440;
/// One year.
pub const MAX_INTERVAL_MINUTES: u64 = 525_600;
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_KEY_PASS_FILE: &str = "password.txt";

/// Startup errors. Any of these stops the process before it serves.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported network: {0}")]
    UnknownNetwork(String),

    #[error("no provider specified and no default RPC for network {0}")]
    NoEndpoint(String),

    #[error("network {0} requires either private_key or keystore")]
    MissingSigningMaterial(String),

    #[error("invalid private key for {network}: {source}")]
    InvalidKey {
        network: String,
        #[source]
        source: EcdsaError,
    },

    #[error("failed to load keystore for {network}: {source}")]
    Keystore {
        network: String,
        #[source]
        source: KeyFileError,
    },

    #[error("invalid payout {payout} for {network}")]
    InvalidPayout { network: String, payout: f64 },

    #[error("invalid interval {minutes} minutes for {network}, at most {max} allowed", max = MAX_INTERVAL_MINUTES)]
    InvalidInterval { network: String, minutes: u64 },

    #[error("default network {0} is not configured")]
    InvalidDefault(String),

    #[error("no networks configured")]
    NoPools,
}

/// Human-verification credentials shared by every pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationCredentials {
    pub site_key: Option<String>,
    pub secret: Option<String>,
}

impl VerificationCredentials {
    /// Verification is enforced only when a secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Requested pool settings. Zero payout or interval selects the default.
#[derive(Debug, Clone, Default)]
pub struct PoolInput {
    pub network: String,
    pub endpoint: Option<String>,
    pub payout: f64,
    pub interval_minutes: u64,
}

/// One funded identity bound to one network.
#[derive(Debug)]
pub struct ChainPool {
    pub network: NetworkDescriptor,
    pub identity: KeyPair,
    pub endpoint: String,
    /// Payout in base units.
    pub payout: u128,
    pub interval: Duration,
}

impl ChainPool {
    pub fn name(&self) -> &str {
        &self.network.name
    }

    /// Payout in asset units, e.g. `"0.1"`.
    pub fn payout_units(&self) -> String {
        format_units(self.payout, NATIVE_DECIMALS)
    }
}

#[derive(Debug)]
pub struct FleetConfig {
    catalog: Arc<NetworkCatalog>,
    pools: BTreeMap<String, ChainPool>,
    default_network: Option<String>,
    pub listen_port: u16,
    pub trusted_proxy_hops: usize,
    pub verification: VerificationCredentials,
}

impl FleetConfig {
    pub fn new(catalog: Arc<NetworkCatalog>) -> Self {
        Self {
            catalog,
            pools: BTreeMap::new(),
            default_network: None,
            listen_port: DEFAULT_HTTP_PORT,
            trusted_proxy_hops: 0,
            verification: VerificationCredentials::default(),
        }
    }

    pub fn catalog(&self) -> &Arc<NetworkCatalog> {
        &self.catalog
    }

    /// Registers a pool, replacing any pool already configured for the network.
    pub fn add_pool(&mut self, input: PoolInput, identity: KeyPair) -> Result<&ChainPool, ConfigError> {
        let network = self
            .catalog
            .lookup(&input.network)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownNetwork(input.network.clone()))?;

        let endpoint = input
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .or_else(|| network.default_endpoint.clone())
            .ok_or_else(|| ConfigError::NoEndpoint(network.name.clone()))?;

        let invalid_payout = || ConfigError::InvalidPayout {
            network: network.name.clone(),
            payout: input.payout,
        };
        if !input.payout.is_finite() || input.payout < 0.0 {
            return Err(invalid_payout());
        }
        let payout_units = if input.payout == 0.0 { DEFAULT_PAYOUT } else { input.payout };
        let payout = parse_units(&payout_units.to_string(), NATIVE_DECIMALS).map_err(|_| invalid_payout())?;
        if payout == 0 {
            return Err(invalid_payout());
        }

        let interval_minutes = if input.interval_minutes == 0 {
            DEFAULT_INTERVAL_MINUTES
        } else {
            input.interval_minutes
        };
        if interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ConfigError::InvalidInterval {
                network: network.name.clone(),
                minutes: interval_minutes,
            });
        }

        let name = network.name.clone();
        let pool = ChainPool {
            network,
            identity,
            endpoint,
            payout,
            interval: Duration::from_secs(interval_minutes * 60),
        };

        info!(
            network = %name,
            chain_id = pool.network.chain_id,
            account = %pool.identity.address(),
            payout = %pool.payout_units(),
            interval_minutes,
            "Configured pool"
        );
        if self.pools.insert(name.clone(), pool).is_some() {
            warn!(network = %name, "Pool configured twice, keeping the latest");
        }
        if self.default_network.is_none() {
            self.default_network = Some(name.clone());
        }

        self.pools
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.clone()))
    }

    pub fn get_pool(&self, name: &str) -> Option<&ChainPool> {
        self.pools.get(&name.to_lowercase())
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), ConfigError> {
        let key = name.to_lowercase();
        if !self.pools.contains_key(&key) {
            return Err(ConfigError::InvalidDefault(name.to_string()));
        }
        self.default_network = Some(key);
        Ok(())
    }

    pub fn default_network(&self) -> Option<&str> {
        self.default_network.as_deref()
    }

    /// Configured network names in name order.
    pub fn list_networks(&self) -> Vec<&str> {
        self.pools.keys().map(String::as_str).collect()
    }

    pub fn pools(&self) -> impl Iterator<Item = &ChainPool> {
        self.pools.values()
    }

    pub(crate) fn into_parts(self) -> FleetParts {
        FleetParts {
            catalog: self.catalog,
            pools: self.pools.into_values().collect(),
            default_network: self.default_network,
            trusted_proxy_hops: self.trusted_proxy_hops,
            verification: self.verification,
        }
    }

    /// Builds a fleet from file configuration, resolving every signing key.
    pub fn from_file_config(file: &FileConfig, catalog: Arc<NetworkCatalog>) -> Result<Self, ConfigError> {
        let mut fleet = FleetConfig::new(catalog);
        fleet.listen_port = file.http_port;
        fleet.trusted_proxy_hops = file.proxy_count;
        fleet.verification = VerificationCredentials {
            site_key: file.hcaptcha_sitekey.clone().filter(|s| !s.is_empty()),
            secret: file.hcaptcha_secret.clone().filter(|s| !s.is_empty()),
        };

        if file.networks.is_empty() {
            return Err(ConfigError::NoPools);
        }

        for network in &file.networks {
            if fleet.catalog.lookup(&network.name).is_none() {
                return Err(ConfigError::UnknownNetwork(network.name.clone()));
            }
            let identity = network.resolve_identity()?;
            fleet.add_pool(network.pool_input(), identity)?;
        }

        if let Some(default) = file.default_network.as_deref().filter(|d| !d.is_empty()) {
            fleet.set_default(default)?;
        }

        Ok(fleet)
    }
}

pub(crate) struct FleetParts {
    pub catalog: Arc<NetworkCatalog>,
    pub pools: Vec<ChainPool>,
    pub default_network: Option<String>,
    pub trusted_proxy_hops: usize,
    pub verification: VerificationCredentials,
}

// --- File configuration ---

fn default_http_port() -> u16 { DEFAULT_HTTP_PORT }
fn default_send_timeout_secs() -> u64 { DEFAULT_SEND_TIMEOUT_SECS }
fn default_sweep_interval_secs() -> u64 { 300 }
fn default_ledger_retention_days() -> i64 { 30 }
fn default_true() -> bool { true }

/// On-disk configuration (JSON, TOML or YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Reverse proxies in front of the server.
    #[serde(default)]
    pub proxy_count: usize,

    #[serde(default)]
    pub hcaptcha_sitekey: Option<String>,

    #[serde(default)]
    pub hcaptcha_secret: Option<String>,

    #[serde(default)]
    pub default_network: Option<String>,

    #[serde(default)]
    pub networks: Vec<NetworkFileConfig>,

    /// Upper bound on one outbound transfer.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Process-wide claim quota; unset means unlimited.
    #[serde(default)]
    pub global_claims_per_minute: Option<u32>,

    /// Distribution ledger location; unset disables the ledger.
    #[serde(default)]
    pub ledger_path: Option<String>,

    #[serde(default = "default_ledger_retention_days")]
    pub ledger_retention_days: i64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            proxy_count: 0,
            hcaptcha_sitekey: None,
            hcaptcha_secret: None,
            default_network: None,
            networks: Vec::new(),
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
            global_claims_per_minute: None,
            ledger_path: None,
            ledger_retention_days: default_ledger_retention_days(),
            cors_enabled: true,
            sweep_interval_secs: default_sweep_interval_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FileConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Starting point written by `generate-config`.
    pub fn sample() -> Self {
        let network = |name: &str, payout: f64| NetworkFileConfig {
            name: name.to_string(),
            provider: None,
            private_key: Some("0x<private key hex>".to_string()),
            keystore: None,
            key_pass: None,
            payout,
            interval: DEFAULT_INTERVAL_MINUTES,
        };
        Self {
            default_network: Some("sepolia".to_string()),
            networks: vec![
                network("sepolia", 1.0),
                network("polygon-amoy", 1.0),
                network("bsc-testnet", 0.1),
            ],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkFileConfig {
    pub name: String,

    /// JSON-RPC endpoint; the catalog default is used when absent.
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub private_key: Option<String>,

    /// Encrypted key file path.
    #[serde(default)]
    pub keystore: Option<String>,

    /// File holding the key file password.
    #[serde(default)]
    pub key_pass: Option<String>,

    /// Asset units per claim.
    #[serde(default)]
    pub payout: f64,

    /// Cooldown in minutes.
    #[serde(default)]
    pub interval: u64,
}

impl NetworkFileConfig {
    fn pool_input(&self) -> PoolInput {
        PoolInput {
            network: self.name.clone(),
            endpoint: self.provider.clone(),
            payout: self.payout,
            interval_minutes: self.interval,
        }
    }

    /// Inline key wins over a keystore when both are present.
    pub fn resolve_identity(&self) -> Result<KeyPair, ConfigError> {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_string);

        if let Some(key) = non_empty(&self.private_key) {
            return KeyPair::from_private_key_hex(&key).map_err(|source| ConfigError::InvalidKey {
                network: self.name.clone(),
                source,
            });
        }
        if let Some(keystore) = non_empty(&self.keystore) {
            let password_file = non_empty(&self.key_pass).unwrap_or_else(|| DEFAULT_KEY_PASS_FILE.to_string());
            return load_key_file(&keystore, &password_file).map_err(|source| ConfigError::Keystore {
                network: self.name.clone(),
                source,
            });
        }
        Err(ConfigError::MissingSigningMaterial(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multifaucet_crypto::encrypt_key;
    use tempfile::TempDir;

    const WEI: u128 = 1_000_000_000_000_000_000;

    fn fleet() -> FleetConfig {
        FleetConfig::new(Arc::new(NetworkCatalog::builtin()))
    }

    fn input(network: &str) -> PoolInput {
        PoolInput {
            network: network.to_string(),
            ..PoolInput::default()
        }
    }

    fn network_entry(name: &str) -> NetworkFileConfig {
        NetworkFileConfig {
            name: name.to_string(),
            private_key: Some(hex::encode(KeyPair::random().private_key_bytes())),
            ..NetworkFileConfig::default()
        }
    }

    #[test]
    fn test_add_pool_applies_defaults() {
        let mut fleet = fleet();
        let pool = fleet.add_pool(input("Sepolia"), KeyPair::random()).unwrap();
        assert_eq!(pool.name(), "sepolia");
        assert_eq!(pool.payout, WEI);
        assert_eq!(pool.interval, Duration::from_secs(24 * 3600));
        assert_eq!(pool.endpoint, "https://sepolia.infura.io/v3/");
        assert_eq!(fleet.default_network(), Some("sepolia"));
    }

    #[test]
    fn test_add_pool_explicit_values() {
        let mut fleet = fleet();
        let pool = fleet
            .add_pool(
                PoolInput {
                    network: "bsc-testnet".to_string(),
                    endpoint: Some("http://localhost:8545".to_string()),
                    payout: 0.1,
                    interval_minutes: 60,
                },
                KeyPair::random(),
            )
            .unwrap();
        assert_eq!(pool.payout, WEI / 10);
        assert_eq!(pool.payout_units(), "0.1");
        assert_eq!(pool.interval, Duration::from_secs(3600));
        assert_eq!(pool.endpoint, "http://localhost:8545");
    }

    #[test]
    fn test_add_pool_errors() {
        let mut fleet = fleet();
        assert!(matches!(
            fleet.add_pool(input("unknown-net"), KeyPair::random()),
            Err(ConfigError::UnknownNetwork(_))
        ));
        assert!(matches!(
            fleet.add_pool(PoolInput { payout: -1.0, ..input("sepolia") }, KeyPair::random()),
            Err(ConfigError::InvalidPayout { .. })
        ));
        assert!(matches!(
            fleet.add_pool(PoolInput { payout: f64::NAN, ..input("sepolia") }, KeyPair::random()),
            Err(ConfigError::InvalidPayout { .. })
        ));
        assert!(matches!(
            fleet.add_pool(PoolInput { interval_minutes: u64::MAX, ..input("sepolia") }, KeyPair::random()),
            Err(ConfigError::InvalidInterval { .. })
        ));
        assert!(fleet.list_networks().is_empty());
        assert!(fleet.default_network().is_none());

        let pool = fleet
            .add_pool(PoolInput { interval_minutes: MAX_INTERVAL_MINUTES, ..input("sepolia") }, KeyPair::random())
            .unwrap();
        assert_eq!(pool.interval, Duration::from_secs(MAX_INTERVAL_MINUTES * 60));
    }

    #[test]
    fn test_no_endpoint() {
        let catalog = NetworkCatalog::from_descriptors(vec![NetworkDescriptor::new(
            "devnet", 1337, "DEV", "Devnet", true, None,
        )]);
        let mut fleet = FleetConfig::new(Arc::new(catalog));
        assert!(matches!(
            fleet.add_pool(input("devnet"), KeyPair::random()),
            Err(ConfigError::NoEndpoint(_))
        ));

        let pool = fleet
            .add_pool(
                PoolInput { endpoint: Some("http://127.0.0.1:8545".to_string()), ..input("devnet") },
                KeyPair::random(),
            )
            .unwrap();
        assert_eq!(pool.endpoint, "http://127.0.0.1:8545");
    }

    #[test]
    fn test_re_adding_overwrites() {
        let mut fleet = fleet();
        fleet.add_pool(input("sepolia"), KeyPair::random()).unwrap();
        fleet.add_pool(input("holesky"), KeyPair::random()).unwrap();
        let replacement = KeyPair::random();
        let address = replacement.address();
        fleet
            .add_pool(PoolInput { payout: 2.5, ..input("sepolia") }, replacement)
            .unwrap();

        let pool = fleet.get_pool("SEPOLIA").unwrap();
        assert_eq!(pool.identity.address(), address);
        assert_eq!(pool.payout_units(), "2.5");
        assert_eq!(fleet.list_networks(), vec!["holesky", "sepolia"]);
        assert_eq!(fleet.default_network(), Some("sepolia"));
    }

    #[test]
    fn test_set_default() {
        let mut fleet = fleet();
        fleet.add_pool(input("sepolia"), KeyPair::random()).unwrap();
        fleet.add_pool(input("holesky"), KeyPair::random()).unwrap();

        fleet.set_default("Holesky").unwrap();
        assert_eq!(fleet.default_network(), Some("holesky"));
        assert!(matches!(fleet.set_default("base"), Err(ConfigError::InvalidDefault(_))));
        assert_eq!(fleet.default_network(), Some("holesky"));
    }

    #[test]
    fn test_from_file_config() {
        let file = FileConfig {
            http_port: 9000,
            proxy_count: 1,
            hcaptcha_secret: Some(String::new()),
            default_network: Some("holesky".to_string()),
            networks: vec![network_entry("sepolia"), network_entry("holesky")],
            ..FileConfig::default()
        };
        let fleet = FleetConfig::from_file_config(&file, Arc::new(NetworkCatalog::builtin())).unwrap();
        assert_eq!(fleet.listen_port, 9000);
        assert_eq!(fleet.trusted_proxy_hops, 1);
        assert!(!fleet.verification.is_enabled());
        assert_eq!(fleet.default_network(), Some("holesky"));
        assert_eq!(fleet.list_networks().len(), 2);
    }

    #[test]
    fn test_from_file_config_fails_fast() {
        let catalog = Arc::new(NetworkCatalog::builtin());
        let load = |networks: Vec<NetworkFileConfig>, default: Option<&str>| {
            let file = FileConfig {
                networks,
                default_network: default.map(str::to_string),
                ..FileConfig::default()
            };
            FleetConfig::from_file_config(&file, catalog.clone())
        };

        assert!(matches!(load(vec![], None), Err(ConfigError::NoPools)));
        assert!(matches!(
            load(vec![network_entry("unknown-net")], None),
            Err(ConfigError::UnknownNetwork(_))
        ));
        assert!(matches!(
            load(vec![NetworkFileConfig { name: "sepolia".into(), ..Default::default() }], None),
            Err(ConfigError::MissingSigningMaterial(_))
        ));
        assert!(matches!(
            load(
                vec![NetworkFileConfig {
                    name: "sepolia".into(),
                    private_key: Some("0x1234".into()),
                    ..Default::default()
                }],
                None
            ),
            Err(ConfigError::InvalidKey { .. })
        ));
        assert!(matches!(
            load(vec![network_entry("sepolia")], Some("base")),
            Err(ConfigError::InvalidDefault(_))
        ));
    }

    #[test]
    fn test_keystore_identity() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("sepolia.key.json");
        let pass_path = dir.path().join("pass.txt");
        let pair = KeyPair::random();
        encrypt_key(&pair, "hunter2").unwrap().write(&key_path).unwrap();
        std::fs::write(&pass_path, "hunter2\n").unwrap();

        let entry = NetworkFileConfig {
            name: "sepolia".to_string(),
            keystore: Some(key_path.display().to_string()),
            key_pass: Some(pass_path.display().to_string()),
            ..Default::default()
        };
        assert_eq!(entry.resolve_identity().unwrap().address(), pair.address());

        std::fs::write(&pass_path, "wrong\n").unwrap();
        assert!(matches!(entry.resolve_identity(), Err(ConfigError::Keystore { .. })));
    }

    #[test]
    fn test_file_config_json_shape() {
        let json = r#"{
            "http_port": 8081,
            "proxy_count": 2,
            "hcaptcha_sitekey": "site",
            "hcaptcha_secret": "secret",
            "default_network": "sepolia",
            "networks": [
                {"name": "sepolia", "private_key": "0x01", "payout": 0.5, "interval": 60}
            ]
        }"#;
        let file: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(file.http_port, 8081);
        assert_eq!(file.networks[0].payout, 0.5);
        assert_eq!(file.networks[0].interval, 60);
        assert_eq!(file.send_timeout(), Duration::from_secs(30));
        assert!(file.cors_enabled);
        assert!(file.ledger_path.is_none());
    }

    #[test]
    fn test_sample_round_trips_through_json() {
        let sample = FileConfig::sample();
        let json = serde_json::to_string_pretty(&sample).unwrap();
        let parsed: FileConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.networks.len(), 3);
        assert_eq!(parsed.default_network.as_deref(), Some("sepolia"));
    }
}
