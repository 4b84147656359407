//! Claim pipeline
//!
//! A claim moves through validate, verify, throttle, admit and execute.
//! Every stage before admit leaves the cooldown tables untouched. Once
//! admitted, the cooldown stands whether or not the transfer succeeds.

use crate::admission::{AdmissionController, Clock, Denial, SystemClock};
use crate::catalog::{NetworkCatalog, NetworkDescriptor, NATIVE_DECIMALS};
use crate::config::{ChainPool, FleetConfig, VerificationCredentials, DEFAULT_SEND_TIMEOUT_SECS};
use crate::database::{DistributionLedger, DistributionRecord, NetworkStatistics};
use crate::error::{FaucetError, FaucetResult};
use crate::metrics::FaucetMetrics;
use crate::sender::TransactionSender;
use crate::verify::{HCaptchaVerifier, VerificationEvidence, Verifier};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use futures::future::join_all;
use multifaucet_common::{format_units, Address};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

type GlobalThrottle = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const BALANCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Trimmed, lowercase network name, or `None` when nothing was asked for.
fn requested_network(network: Option<&str>) -> Option<String> {
    network.map(str::trim).filter(|n| !n.is_empty()).map(str::to_lowercase)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Falls back to the default network when absent or empty.
    #[serde(default)]
    pub network: Option<String>,
    pub address: String,
}

/// Evidence resolved from the transport.
#[derive(Debug, Clone, Default)]
pub struct ClaimContext {
    pub client_identity: String,
    pub captcha_response: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Granted,
    Denied,
    Failed,
    Rejected,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Granted => "granted",
            ClaimStatus::Denied => "denied",
            ClaimStatus::Failed => "failed",
            ClaimStatus::Rejected => "rejected",
        }
    }
}

/// A granted and executed claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub network: String,
    pub address: String,
    /// Payout in asset units
    pub amount: String,
    pub symbol: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResult {
    pub status: ClaimStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl From<ClaimReceipt> for ClaimResult {
    fn from(receipt: ClaimReceipt) -> Self {
        Self {
            status: ClaimStatus::Granted,
            message: format!(
                "Sent {} {} to {} on {}",
                receipt.amount, receipt.symbol, receipt.address, receipt.network
            ),
            transaction_id: Some(receipt.transaction_id),
            network: Some(receipt.network),
        }
    }
}

impl From<&FaucetError> for ClaimResult {
    fn from(error: &FaucetError) -> Self {
        Self {
            status: error.claim_status(),
            message: error.to_string(),
            transaction_id: None,
            network: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    pub name: String,
    pub display_name: String,
    pub symbol: String,
    pub chain_id: u64,
    pub is_testnet: bool,
    pub account: String,
    pub payout: String,
    pub interval_minutes: u64,
    /// Payout account balance in asset units, when the endpoint reports it.
    pub balance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetInfo {
    pub default_network: Option<String>,
    pub active_pools: Vec<PoolInfo>,
    pub catalog: Vec<NetworkDescriptor>,
    pub hcaptcha_sitekey: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkList {
    pub networks: Vec<String>,
    pub default: Option<String>,
}

struct PoolRuntime {
    pool: ChainPool,
    admission: AdmissionController,
    sender: Arc<dyn TransactionSender>,
}

pub struct DispatcherBuilder {
    fleet: FleetConfig,
    verifier: Arc<dyn Verifier>,
    clock: Arc<dyn Clock>,
    ledger: Option<Arc<DistributionLedger>>,
    metrics: Option<Arc<FaucetMetrics>>,
    send_timeout: Duration,
    claims_per_minute: Option<NonZeroU32>,
}

impl DispatcherBuilder {
    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(mut self, ledger: Arc<DistributionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn metrics(mut self, metrics: Arc<FaucetMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Process-wide claim quota. Zero leaves claims unthrottled.
    pub fn claims_per_minute(mut self, claims: u32) -> Self {
        self.claims_per_minute = NonZeroU32::new(claims);
        self
    }

    /// Freezes the fleet, binding one sender per pool through `connector`.
    pub fn build<F>(self, mut connector: F) -> Dispatcher
    where
        F: FnMut(&ChainPool) -> Arc<dyn TransactionSender>,
    {
        let parts = self.fleet.into_parts();
        let pools = parts
            .pools
            .into_iter()
            .map(|pool| {
                let sender = connector(&pool);
                let admission = AdmissionController::with_clock(pool.interval, self.clock.clone());
                (pool.name().to_string(), Arc::new(PoolRuntime { pool, admission, sender }))
            })
            .collect();

        Dispatcher {
            catalog: parts.catalog,
            pools,
            default_network: parts.default_network,
            trusted_proxy_hops: parts.trusted_proxy_hops,
            verification: parts.verification,
            verifier: self.verifier,
            throttle: self
                .claims_per_minute
                .map(|n| RateLimiter::direct(Quota::per_minute(n))),
            ledger: self.ledger,
            metrics: self.metrics,
            send_timeout: self.send_timeout,
        }
    }
}

pub struct Dispatcher {
    catalog: Arc<NetworkCatalog>,
    pools: BTreeMap<String, Arc<PoolRuntime>>,
    default_network: Option<String>,
    trusted_proxy_hops: usize,
    verification: VerificationCredentials,
    verifier: Arc<dyn Verifier>,
    throttle: Option<GlobalThrottle>,
    ledger: Option<Arc<DistributionLedger>>,
    metrics: Option<Arc<FaucetMetrics>>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn builder(fleet: FleetConfig) -> DispatcherBuilder {
        DispatcherBuilder {
            fleet,
            verifier: Arc::new(HCaptchaVerifier::new()),
            clock: Arc::new(SystemClock),
            ledger: None,
            metrics: None,
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            claims_per_minute: None,
        }
    }

    pub fn trusted_proxy_hops(&self) -> usize {
        self.trusted_proxy_hops
    }

    pub fn metrics(&self) -> Option<&Arc<FaucetMetrics>> {
        self.metrics.as_ref()
    }

    pub fn admission(&self, network: &str) -> Option<&AdmissionController> {
        self.pools.get(&network.to_lowercase()).map(|runtime| &runtime.admission)
    }

    fn resolve(&self, network: Option<&str>) -> FaucetResult<&Arc<PoolRuntime>> {
        let name = match requested_network(network) {
            Some(name) => name,
            None => self
                .default_network
                .clone()
                .ok_or_else(|| FaucetError::UnsupportedNetwork("no default network".to_string()))?,
        };
        self.pools
            .get(&name)
            .ok_or(FaucetError::UnsupportedNetwork(name))
    }

    fn record_outcome(&self, network: &str, outcome: &FaucetResult<ClaimReceipt>) {
        if let Some(metrics) = &self.metrics {
            let status = match outcome {
                Ok(_) => ClaimStatus::Granted,
                Err(e) => e.claim_status(),
            };
            metrics.record_claim(network, status.as_str());
        }
    }

    pub async fn claim(&self, request: ClaimRequest, context: ClaimContext) -> FaucetResult<ClaimReceipt> {
        let network = requested_network(request.network.as_deref())
            .or_else(|| self.default_network.clone())
            .unwrap_or_default();
        let label = if self.pools.contains_key(&network) { network.as_str() } else { "unknown" };

        let outcome = self.process(request, context).await;
        self.record_outcome(label, &outcome);
        outcome
    }

    async fn process(&self, request: ClaimRequest, context: ClaimContext) -> FaucetResult<ClaimReceipt> {
        // Validate
        let address: Address = request
            .address
            .trim()
            .parse()
            .map_err(|e| FaucetError::InvalidAddress(format!("{}: {}", request.address, e)))?;
        let runtime = self.resolve(request.network.as_deref())?.clone();
        let network = runtime.pool.name().to_string();
        let address_key = address.to_string();
        let client = context.client_identity.as_str();

        // Verify
        let evidence = VerificationEvidence {
            response: context.captcha_response.clone(),
            remote_ip: context.client_identity.clone(),
        };
        if let Err(reason) = self.verifier.verify(&self.verification, &evidence).await {
            warn!(network = %network, address = %address_key, client, reason = %reason, "Verification failed");
            return Err(FaucetError::VerificationFailed(reason));
        }

        let denied = |denial: Denial| {
            info!(network = %network, address = %address_key, client, retry_after = denial.retry_after.as_secs(), "Claim denied");
            FaucetError::AdmissionDenied(denial)
        };

        // Throttle, only for claims the cooldowns would let through
        if let Some(throttle) = &self.throttle {
            runtime.admission.check(&address_key, client).map_err(denied)?;
            if throttle.check().is_err() {
                warn!(network = %network, address = %address_key, client, "Global claim quota exhausted");
                return Err(FaucetError::Throttled);
            }
        }

        // Admit
        runtime.admission.try_admit(&address_key, client).map_err(denied)?;

        // Execute
        let tx_hash = self.execute(runtime.clone(), address, client.to_string()).await?;

        Ok(ClaimReceipt {
            network,
            address: address_key,
            amount: runtime.pool.payout_units(),
            symbol: runtime.pool.network.symbol.clone(),
            transaction_id: tx_hash,
        })
    }

    /// Runs the transfer on its own task so dropping the caller does not
    /// abandon it. The timeout bounds the outbound call only.
    async fn execute(&self, runtime: Arc<PoolRuntime>, to: Address, client: String) -> FaucetResult<String> {
        let send_timeout = self.send_timeout;
        let ledger = self.ledger.clone();
        let metrics = self.metrics.clone();

        let task = tokio::spawn(async move {
            let pool = &runtime.pool;
            let started = Instant::now();
            let sent = tokio::time::timeout(send_timeout, runtime.sender.send(&pool.identity, &to, pool.payout)).await;
            if let Some(metrics) = &metrics {
                metrics.record_send(pool.name(), started.elapsed());
            }

            let tx_hash = match sent {
                Ok(Ok(tx_hash)) => tx_hash,
                Ok(Err(e)) => {
                    error!(network = %pool.name(), address = %to, client = %client, error = %e, "Payout failed");
                    // The cooldown is spent, so every sender error is a failed grant.
                    return Err(FaucetError::ExecutionFailed(match e {
                        FaucetError::Rpc(message) | FaucetError::ExecutionFailed(message) => message,
                        other => other.to_string(),
                    }));
                }
                Err(_) => {
                    error!(network = %pool.name(), address = %to, client = %client, timeout_secs = send_timeout.as_secs(), "Payout timed out");
                    return Err(FaucetError::ExecutionTimeout(send_timeout));
                }
            };

            info!(network = %pool.name(), address = %to, client = %client, tx_hash = %tx_hash, amount = %pool.payout_units(), "Payout sent");

            if let Some(ledger) = &ledger {
                let record = DistributionRecord::new(pool.name(), &to.to_string(), pool.payout, &tx_hash, &client);
                if let Err(e) = ledger.record(&record) {
                    warn!(network = %pool.name(), tx_hash = %tx_hash, error = %e, "Failed to record distribution");
                }
            }
            Ok(tx_hash)
        });

        task.await
            .map_err(|e| FaucetError::Internal(format!("payout task aborted: {}", e)))?
    }

    /// Pool summaries with each payout account's balance, queried in parallel.
    /// A balance that cannot be read within the timeout is reported as absent.
    pub async fn info(&self) -> FaucetInfo {
        let active_pools = join_all(self.pools.values().map(|runtime| async move {
            let pool = &runtime.pool;
            let balance = match tokio::time::timeout(BALANCE_TIMEOUT, runtime.sender.balance(&pool.identity)).await {
                Ok(Ok(balance)) => balance.map(|wei| format_units(wei, NATIVE_DECIMALS)),
                Ok(Err(e)) => {
                    warn!(network = %pool.name(), error = %e, "Failed to read payout balance");
                    None
                }
                Err(_) => {
                    warn!(network = %pool.name(), "Balance query timed out");
                    None
                }
            };
            PoolInfo {
                name: pool.name().to_string(),
                display_name: pool.network.display_name.clone(),
                symbol: pool.network.symbol.clone(),
                chain_id: pool.network.chain_id,
                is_testnet: pool.network.is_testnet,
                account: runtime.sender.sender_address(&pool.identity).to_string(),
                payout: pool.payout_units(),
                interval_minutes: pool.interval.as_secs() / 60,
                balance,
            }
        }))
        .await;

        FaucetInfo {
            default_network: self.default_network.clone(),
            active_pools,
            catalog: self.catalog.all().cloned().collect(),
            hcaptcha_sitekey: self.verification.site_key.clone(),
        }
    }

    pub fn networks(&self) -> NetworkList {
        NetworkList {
            networks: self.pools.keys().cloned().collect(),
            default: self.default_network.clone(),
        }
    }

    /// Pools whose endpoint reports a chain id other than the catalog's.
    /// Endpoints that cannot be reached are logged and skipped.
    pub async fn mismatched_chains(&self) -> Vec<String> {
        let reports = join_all(self.pools.values().map(|runtime| async move {
            let pool = &runtime.pool;
            match runtime.sender.chain_id().await {
                Ok(Some(reported)) if reported != pool.network.chain_id => {
                    error!(
                        network = %pool.name(),
                        endpoint = %pool.endpoint,
                        expected = pool.network.chain_id,
                        reported,
                        "Endpoint serves a different chain"
                    );
                    Some(pool.name().to_string())
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(network = %pool.name(), endpoint = %pool.endpoint, error = %e, "Could not read chain id");
                    None
                }
            }
        }))
        .await;
        reports.into_iter().flatten().collect()
    }

    fn ledger(&self) -> FaucetResult<&DistributionLedger> {
        self.ledger
            .as_deref()
            .ok_or_else(|| FaucetError::InvalidRequest("distribution ledger is disabled".to_string()))
    }

    /// Distributions to one address on one network, newest first.
    pub fn history(&self, network: &str, address: &str) -> FaucetResult<Vec<DistributionRecord>> {
        let runtime = self.resolve(Some(network))?;
        let address: Address = address
            .trim()
            .parse()
            .map_err(|e| FaucetError::InvalidAddress(format!("{}: {}", address, e)))?;
        self.ledger()?.history(runtime.pool.name(), &address.to_string())
    }

    pub fn statistics(&self, network: &str) -> FaucetResult<NetworkStatistics> {
        let runtime = self.resolve(Some(network))?;
        self.ledger()?.statistics(runtime.pool.name())
    }

    pub fn cleanup_ledger(&self, days: i64) -> FaucetResult<usize> {
        match &self.ledger {
            Some(ledger) => ledger.cleanup_old_records(days),
            None => Ok(0),
        }
    }

    /// Drops expired cooldowns in every pool.
    pub fn sweep_expired(&self) -> usize {
        self.pools
            .iter()
            .map(|(name, runtime)| {
                let removed = runtime.admission.sweep();
                if let Some(metrics) = &self.metrics {
                    metrics.set_admission_entries(name, runtime.admission.len());
                }
                removed
            })
            .sum()
    }
}
