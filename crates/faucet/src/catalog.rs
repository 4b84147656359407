//! Directory of the EVM networks the faucet knows how to pay out on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Native asset decimals shared by every catalogued network.
pub const NATIVE_DECIMALS: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub name: String,
    pub chain_id: u64,
    pub symbol: String,
    pub display_name: String,
    pub is_testnet: bool,
    pub default_endpoint: Option<String>,
}

impl NetworkDescriptor {
    pub fn new(
        name: &str,
        chain_id: u64,
        symbol: &str,
        display_name: &str,
        is_testnet: bool,
        default_endpoint: Option<&str>,
    ) -> Self {
        Self {
            name: name.to_lowercase(),
            chain_id,
            symbol: symbol.to_string(),
            display_name: display_name.to_string(),
            is_testnet,
            default_endpoint: default_endpoint.map(str::to_string),
        }
    }
}

// (name, chain id, symbol, display name, testnet, default RPC)
const BUILTIN_NETWORKS: &[(&str, u64, &str, &str, bool, &str)] = &[
    // Ethereum
    ("mainnet", 1, "ETH", "Ethereum Mainnet", false, "https://eth.public-rpc.com"),
    ("sepolia", 11155111, "ETH", "Ethereum Sepolia", true, "https://sepolia.infura.io/v3/"),
    ("holesky", 17000, "ETH", "Ethereum Holesky", true, "https://ethereum-holesky.publicnode.com"),
    ("goerli", 5, "ETH", "Ethereum Goerli", true, "https://goerli.infura.io/v3/"),
    // Polygon
    ("polygon", 137, "POL", "Polygon Mainnet", false, "https://polygon-rpc.com"),
    ("polygon-amoy", 80002, "POL", "Polygon Amoy", true, "https://rpc-amoy.polygon.technology"),
    // BSC
    ("bsc", 56, "BNB", "BNB Smart Chain", false, "https://bsc-dataseed.binance.org"),
    ("bsc-testnet", 97, "BNB", "BNB Smart Chain Testnet", true, "https://data-seed-prebsc-1-s1.binance.org:8545"),
    // Arbitrum
    ("arbitrum", 42161, "ETH", "Arbitrum One", false, "https://arb1.arbitrum.io/rpc"),
    ("arbitrum-sepolia", 421614, "ETH", "Arbitrum Sepolia", true, "https://sepolia-rollup.arbitrum.io/rpc"),
    // Optimism
    ("optimism", 10, "ETH", "Optimism Mainnet", false, "https://mainnet.optimism.io"),
    ("optimism-sepolia", 11155420, "ETH", "Optimism Sepolia", true, "https://sepolia.optimism.io"),
    // Avalanche
    ("avalanche", 43114, "AVAX", "Avalanche C-Chain", false, "https://api.avax.network/ext/bc/C/rpc"),
    ("avalanche-fuji", 43113, "AVAX", "Avalanche Fuji", true, "https://api.avax-test.network/ext/bc/C/rpc"),
    // Base
    ("base", 8453, "ETH", "Base Mainnet", false, "https://mainnet.base.org"),
    ("base-sepolia", 84532, "ETH", "Base Sepolia", true, "https://sepolia.base.org"),
    // Fantom
    ("fantom", 250, "FTM", "Fantom Opera", false, "https://rpc.ftm.tools"),
    ("fantom-testnet", 4002, "FTM", "Fantom Testnet", true, "https://rpc.testnet.fantom.network"),
    // Linea
    ("linea", 59144, "ETH", "Linea Mainnet", false, "https://rpc.linea.build"),
    ("linea-sepolia", 59141, "ETH", "Linea Sepolia", true, "https://rpc.sepolia.linea.build"),
    // zkSync
    ("zksync", 324, "ETH", "zkSync Era", false, "https://mainnet.era.zksync.io"),
    ("zksync-sepolia", 300, "ETH", "zkSync Sepolia", true, "https://sepolia.era.zksync.dev"),
];

/// Read-only network directory, keyed by lowercase name.
#[derive(Debug, Clone)]
pub struct NetworkCatalog {
    networks: BTreeMap<String, NetworkDescriptor>,
}

impl NetworkCatalog {
    pub fn builtin() -> Self {
        Self::from_descriptors(BUILTIN_NETWORKS.iter().map(
            |(name, chain_id, symbol, display_name, is_testnet, rpc)| {
                NetworkDescriptor::new(name, *chain_id, symbol, display_name, *is_testnet, Some(rpc))
            },
        ))
    }

    /// Later descriptors replace earlier ones with the same name.
    pub fn from_descriptors<I: IntoIterator<Item = NetworkDescriptor>>(descriptors: I) -> Self {
        let networks = descriptors
            .into_iter()
            .map(|d| (d.name.to_lowercase(), d))
            .collect();
        Self { networks }
    }

    pub fn lookup(&self, name: &str) -> Option<&NetworkDescriptor> {
        self.networks.get(&name.to_lowercase())
    }

    /// All descriptors in name order.
    pub fn all(&self) -> impl Iterator<Item = &NetworkDescriptor> {
        self.networks.values()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl Default for NetworkCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
