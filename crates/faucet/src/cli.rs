use clap::{Args, Parser, Subcommand};
use multifaucet::config::{FileConfig, NetworkFileConfig, DEFAULT_INTERVAL_MINUTES, DEFAULT_KEY_PASS_FILE};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "multifaucet")]
#[command(author, version, about = "Multi-network EVM faucet", long_about = None)]
pub struct Cli {
    /// Configuration file (JSON, TOML or YAML). Without it a single pool is
    /// configured from the flags below.
    #[arg(short, long, value_name = "FILE", env = "MULTIFAUCET_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    #[command(flatten)]
    pub pool: SinglePoolArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug)]
pub struct SinglePoolArgs {
    /// Network name from the catalog
    #[arg(long, default_value = "sepolia")]
    pub network: String,

    /// JSON-RPC endpoint; the catalog default is used when absent
    #[arg(long, env = "WEB3_PROVIDER")]
    pub provider: Option<String>,

    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Encrypted key file
    #[arg(long, env = "KEYSTORE")]
    pub keystore: Option<String>,

    /// File holding the key file password
    #[arg(long, default_value = DEFAULT_KEY_PASS_FILE)]
    pub key_pass: String,

    /// Asset units per claim
    #[arg(long, default_value_t = 1.0)]
    pub payout: f64,

    /// Cooldown in minutes
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MINUTES)]
    pub interval: u64,

    /// Reverse proxies in front of the server
    #[arg(long, default_value_t = 0)]
    pub proxy_count: usize,

    #[arg(long, env = "HCAPTCHA_SITEKEY")]
    pub hcaptcha_sitekey: Option<String>,

    #[arg(long, env = "HCAPTCHA_SECRET", hide_env_values = true)]
    pub hcaptcha_secret: Option<String>,
}

impl SinglePoolArgs {
    pub fn into_file_config(self) -> FileConfig {
        FileConfig {
            proxy_count: self.proxy_count,
            hcaptcha_sitekey: self.hcaptcha_sitekey,
            hcaptcha_secret: self.hcaptcha_secret,
            default_network: Some(self.network.clone()),
            networks: vec![NetworkFileConfig {
                name: self.network,
                provider: self.provider,
                private_key: self.private_key,
                keystore: self.keystore,
                key_pass: Some(self.key_pass),
                payout: self.payout,
                interval: self.interval,
            }],
            ..FileConfig::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the built-in network catalog
    ListNetworks,

    /// Write a sample configuration file
    GenerateConfig {
        /// Output path; stdout when absent
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Encrypt a private key into a key file
    EncryptKey {
        #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        /// File holding the password
        #[arg(long)]
        password_file: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },
}
