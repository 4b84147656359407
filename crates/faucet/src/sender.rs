//! Transaction submission

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use multifaucet_common::Address;
use multifaucet_crypto::{KeyPair, LegacyTransaction};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Moves `amount` from `identity` to `to`, returning the transaction hash.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    async fn send(&self, identity: &KeyPair, to: &Address, amount: u128) -> FaucetResult<String>;

    /// Account the payouts are drawn from.
    fn sender_address(&self, identity: &KeyPair) -> Address {
        identity.address()
    }

    /// Spendable balance of the payout account, when the sender can tell.
    async fn balance(&self, _identity: &KeyPair) -> FaucetResult<Option<u128>> {
        Ok(None)
    }

    /// Chain id reported by the endpoint, when the sender can tell.
    async fn chain_id(&self) -> FaucetResult<Option<u64>> {
        Ok(None)
    }
}

fn parse_quantity(value: &Value) -> FaucetResult<u128> {
    let text = value
        .as_str()
        .ok_or_else(|| FaucetError::Rpc(format!("expected hex quantity, got {}", value)))?;
    let digits = text.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| FaucetError::Rpc(format!("invalid quantity {}: {}", text, e)))
}

/// Minimal JSON-RPC client for EVM nodes
pub struct BlockchainRpcClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl BlockchainRpcClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            rpc_url: rpc_url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: Value) -> FaucetResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FaucetError::Rpc(format!("{} request failed: {}", method, e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| FaucetError::Rpc(format!("{} returned invalid response: {}", method, e)))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(FaucetError::Rpc(message));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn get_balance(&self, address: &Address) -> FaucetResult<u128> {
        let result = self.call("eth_getBalance", json!([address.to_string(), "latest"])).await?;
        parse_quantity(&result)
    }

    pub async fn get_transaction_count(&self, address: &Address) -> FaucetResult<u64> {
        let result = self
            .call("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        let count = parse_quantity(&result)?;
        u64::try_from(count).map_err(|_| FaucetError::Rpc(format!("nonce out of range: {}", count)))
    }

    pub async fn gas_price(&self) -> FaucetResult<u128> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_quantity(&result)
    }

    pub async fn send_raw_transaction(&self, raw: &str) -> FaucetResult<String> {
        let result = self.call("eth_sendRawTransaction", json!([raw])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FaucetError::Rpc(format!("unexpected transaction hash: {}", result)))
    }

    pub async fn get_chain_id(&self) -> FaucetResult<u64> {
        let result = self.call("eth_chainId", json!([])).await?;
        let chain_id = parse_quantity(&result)?;
        u64::try_from(chain_id).map_err(|_| FaucetError::Rpc(format!("chain id out of range: {}", chain_id)))
    }
}

/// Sends EIP-155 legacy transfers for one pool.
///
/// The nonce is fetched once and then tracked locally. Every send holds the
/// nonce lock for its whole duration, so transfers from one identity never
/// race for the same nonce.
pub struct RpcTransactionSender {
    rpc: BlockchainRpcClient,
    chain_id: u64,
    next_nonce: Mutex<Option<u64>>,
}

impl RpcTransactionSender {
    pub fn new(endpoint: &str, chain_id: u64) -> Self {
        Self {
            rpc: BlockchainRpcClient::new(endpoint),
            chain_id,
            next_nonce: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TransactionSender for RpcTransactionSender {
    async fn send(&self, identity: &KeyPair, to: &Address, amount: u128) -> FaucetResult<String> {
        let mut next_nonce = self.next_nonce.lock().await;

        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => self.rpc.get_transaction_count(&identity.address()).await?,
        };
        let gas_price = self.rpc.gas_price().await?;

        let tx = LegacyTransaction::transfer(nonce, gas_price, *to, amount, self.chain_id);
        let signed = tx
            .sign(identity)
            .map_err(|e| FaucetError::ExecutionFailed(e.to_string()))?;
        debug!(nonce, gas_price, chain_id = self.chain_id, to = %to, "Submitting transfer");

        match self.rpc.send_raw_transaction(&signed.raw_hex()).await {
            Ok(tx_hash) => {
                *next_nonce = Some(nonce + 1);
                if !tx_hash.eq_ignore_ascii_case(&signed.hash_hex()) {
                    warn!(tx_hash = %tx_hash, expected = %signed.hash_hex(), "Node reported an unexpected transaction hash");
                }
                info!(tx_hash = %tx_hash, nonce, to = %to, "Transaction sent");
                Ok(tx_hash)
            }
            Err(e) => {
                // The node may or may not have taken the nonce; ask again next time.
                *next_nonce = None;
                warn!(error = %e, endpoint = %self.rpc.url(), nonce, to = %to, "Transaction submission failed");
                Err(e)
            }
        }
    }

    async fn balance(&self, identity: &KeyPair) -> FaucetResult<Option<u128>> {
        self.rpc.get_balance(&identity.address()).await.map(Some)
    }

    async fn chain_id(&self) -> FaucetResult<Option<u64>> {
        self.rpc.get_chain_id().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), 0);
        assert_eq!(parse_quantity(&json!("0x4a817c800")).unwrap(), 20_000_000_000);
        assert_eq!(
            parse_quantity(&json!("0xde0b6b3a7640000")).unwrap(),
            1_000_000_000_000_000_000
        );
        assert!(parse_quantity(&json!("0xzz")).is_err());
        assert!(parse_quantity(&json!(12)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_rpc_error() {
        let sender = RpcTransactionSender::new("http://127.0.0.1:1", 11155111);
        let identity = KeyPair::random();
        let err = sender
            .send(&identity, &Address([0x11; 20]), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, FaucetError::Rpc(_)));
        assert_eq!(sender.sender_address(&identity), identity.address());
        assert!(sender.next_nonce.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_no_balance_or_chain() {
        let sender = RpcTransactionSender::new("http://127.0.0.1:1", 97);
        let identity = KeyPair::random();
        assert!(matches!(sender.balance(&identity).await, Err(FaucetError::Rpc(_))));
        assert!(matches!(sender.chain_id().await, Err(FaucetError::Rpc(_))));
        assert_eq!(sender.rpc.url(), "http://127.0.0.1:1");
    }
}
