//! Multi-network EVM faucet
//!
//! Each configured network is an independent pool with its own funded
//! identity, payout and cooldown. Claims are routed to their pool, checked
//! against per-address and per-client cooldowns, and handed to a
//! transaction sender.

pub mod admission;
pub mod api;
pub mod catalog;
pub mod client_ip;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod sender;
pub mod verify;

pub use admission::{AdmissionController, Clock, Denial, DeniedKey, ManualClock, SystemClock};
pub use catalog::{NetworkCatalog, NetworkDescriptor};
pub use config::{ChainPool, ConfigError, FileConfig, FleetConfig, PoolInput, VerificationCredentials};
pub use database::{DistributionLedger, DistributionRecord, NetworkStatistics};
pub use dispatcher::{ClaimContext, ClaimReceipt, ClaimRequest, ClaimResult, ClaimStatus, Dispatcher};
pub use error::{FaucetError, FaucetResult};
pub use metrics::FaucetMetrics;
pub use sender::{BlockchainRpcClient, RpcTransactionSender, TransactionSender};
pub use verify::{AllowAll, HCaptchaVerifier, VerificationEvidence, Verifier};
