//! Distribution ledger backed by sled
//!
//! Records are keyed `network:address:timestamp_nanos`, so per-network and
//! per-address scans are prefix scans. Each network's records stay under its
//! own prefix; nothing aggregates across networks.

use crate::error::{FaucetError, FaucetResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub network: String,
    /// Canonical lowercase recipient address
    pub address: String,
    /// Amount in base units, decimal
    pub amount: String,
    pub tx_hash: String,
    pub client_identity: String,
    /// Unix timestamp in nanoseconds
    pub timestamp: i64,
}

impl DistributionRecord {
    pub fn new(network: &str, address: &str, amount: u128, tx_hash: &str, client_identity: &str) -> Self {
        Self {
            network: network.to_string(),
            address: address.to_string(),
            amount: amount.to_string(),
            tx_hash: tx_hash.to_string(),
            client_identity: client_identity.to_string(),
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        }
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp)
    }

    fn key(&self) -> String {
        format!("{}:{}:{:020}", self.network, self.address, self.timestamp)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatistics {
    pub network: String,
    pub total_distributions: usize,
    pub total_amount: String,
    pub unique_addresses: u64,
}

pub struct DistributionLedger {
    db: Db,
    distributions: Tree,
}

fn decode(value: &[u8]) -> FaucetResult<DistributionRecord> {
    bincode::deserialize(value).map_err(|e| FaucetError::Internal(format!("corrupt ledger record: {}", e)))
}

impl DistributionLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        info!(path = %path.as_ref().display(), "Opening distribution ledger");

        let db = sled::Config::default()
            .path(path.as_ref())
            .cache_capacity(64 * 1024 * 1024)
            .open()?;
        let distributions = db.open_tree("distributions")?;

        Ok(Self { db, distributions })
    }

    pub fn record(&self, record: &DistributionRecord) -> FaucetResult<()> {
        let value = bincode::serialize(record).map_err(|e| FaucetError::Internal(e.to_string()))?;
        self.distributions.insert(record.key(), value)?;
        debug!(network = %record.network, address = %record.address, tx_hash = %record.tx_hash, "Recorded distribution");
        Ok(())
    }

    fn scan(&self, prefix: String) -> FaucetResult<Vec<DistributionRecord>> {
        self.distributions
            .scan_prefix(prefix)
            .map(|item| {
                let (_, value) = item?;
                decode(&value)
            })
            .collect()
    }

    /// Distributions to one address on one network, newest first.
    pub fn history(&self, network: &str, address: &str) -> FaucetResult<Vec<DistributionRecord>> {
        let mut records = self.scan(format!("{}:{}:", network, address))?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    pub fn statistics(&self, network: &str) -> FaucetResult<NetworkStatistics> {
        let records = self.scan(format!("{}:", network))?;

        let mut total_amount = 0u128;
        let mut unique_addresses = HashSet::new();
        for record in &records {
            total_amount = total_amount.saturating_add(record.amount.parse::<u128>().unwrap_or(0));
            unique_addresses.insert(record.address.as_str());
        }

        Ok(NetworkStatistics {
            network: network.to_string(),
            total_distributions: records.len(),
            total_amount: total_amount.to_string(),
            unique_addresses: unique_addresses.len() as u64,
        })
    }

    /// Removes records older than `days`, returning how many were dropped.
    pub fn cleanup_old_records(&self, days: i64) -> FaucetResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let cutoff = cutoff.timestamp_nanos_opt().unwrap_or_default();

        let mut stale = Vec::new();
        for item in self.distributions.iter() {
            let (key, value) = item?;
            if decode(&value)?.timestamp < cutoff {
                stale.push(key);
            }
        }

        for key in &stale {
            self.distributions.remove(key)?;
        }

        info!(removed = stale.len(), days, "Cleaned up old distribution records");
        Ok(stale.len())
    }

    pub fn flush(&self) -> FaucetResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
