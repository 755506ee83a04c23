use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use url::Url;

use crate::chain::rpc::ChainRpc;
use crate::chain::types::{
    BuiltTransaction, ChainError, Commitment, SignatureStatus, SimulationResult,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// JSON-RPC 2.0 client for one chain endpoint.
///
/// Transient transport failures are retried with exponential backoff by the
/// middleware stack; endpoint-level failover lives in
/// [`EndpointPool`](crate::chain::failover::EndpointPool), not here.
pub struct HttpChainClient {
    base_url: Url,
    client: reqwest_middleware::ClientWithMiddleware,
    last_latency: RwLock<Option<(Duration, Instant)>>,
}

impl HttpChainClient {
    pub fn new(base_url: Url) -> Result<Self, anyhow::Error> {
        Self::with_config(base_url, DEFAULT_MAX_RETRIES, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_config(base_url: Url, max_retries: u32, timeout: Duration) -> Result<Self, anyhow::Error> {
        let retry_policy = reqwest_retry::policies::ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let inner_client = reqwest::Client::builder().timeout(timeout).build()?;

        let client = reqwest_middleware::ClientBuilder::new(inner_client)
            .with(reqwest_retry::RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            base_url,
            client,
            last_latency: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get_latency(&self) -> Option<Duration> {
        self.last_latency.read().await.map(|(d, _)| d)
    }

    async fn update_latency(&self, duration: Duration) {
        *self.last_latency.write().await = Some((duration, Instant::now()));
    }

    async fn rpc_call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let start = Instant::now();
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(self.base_url.clone())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Timeout(DEFAULT_TIMEOUT_SECS * 1_000)
                } else {
                    ChainError::Transport(e.to_string())
                }
            })?;

        self.update_latency(start.elapsed()).await;

        if !resp.status().is_success() {
            return Err(ChainError::Transport(format!("HTTP {}", resp.status())));
        }

        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| ChainError::BadResponse(e.to_string()))?;

        if let Some(err) = envelope.get("error") {
            return Err(ChainError::Rejected(err.to_string()));
        }

        let result = envelope
            .get("result")
            .ok_or_else(|| ChainError::BadResponse("missing result field".to_string()))?;

        serde_json::from_value(result.clone()).map_err(|e| ChainError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl ChainRpc for HttpChainClient {
    async fn get_latest_blockhash(&self) -> Result<String, ChainError> {
        let result: Value = self.rpc_call("getLatestBlockhash", json!([])).await?;
        result
            .pointer("/value/blockhash")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ChainError::BadResponse("missing blockhash".to_string()))
    }

    async fn get_slot(&self) -> Result<u64, ChainError> {
        self.rpc_call("getSlot", json!([])).await
    }

    async fn simulate_transaction(&self, tx: &BuiltTransaction) -> Result<SimulationResult, ChainError> {
        let result: Value = self
            .rpc_call("simulateTransaction", json!([tx, {"sigVerify": false}]))
            .await?;

        Ok(SimulationResult {
            units_consumed: result.pointer("/value/unitsConsumed").and_then(|v| v.as_u64()),
            err: result
                .pointer("/value/err")
                .filter(|v| !v.is_null())
                .map(|v| v.to_string()),
        })
    }

    async fn get_recent_prioritization_fees(&self) -> Result<Vec<u64>, ChainError> {
        let result: Vec<Value> = self.rpc_call("getRecentPrioritizationFees", json!([])).await?;
        Ok(result
            .iter()
            .filter_map(|entry| entry.get("prioritizationFee").and_then(|v| v.as_u64()))
            .collect())
    }

    async fn send_transaction(&self, tx: &BuiltTransaction, signature: &str) -> Result<String, ChainError> {
        let _ = signature;
        self.rpc_call("sendTransaction", json!([tx, {"encoding": "base64"}])).await
    }

    async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, ChainError> {
        let result: Value = self
            .rpc_call("getSignatureStatuses", json!([[signature]]))
            .await?;

        let Some(entry) = result.pointer("/value/0").filter(|v| !v.is_null()) else {
            return Ok(None);
        };

        let commitment = entry
            .get("confirmationStatus")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Commitment>().ok());

        Ok(Some(SignatureStatus {
            slot: entry.get("slot").and_then(|v| v.as_u64()).unwrap_or(0),
            commitment,
            err: entry
                .get("err")
                .filter(|v| !v.is_null())
                .map(|v| v.to_string()),
        }))
    }

    async fn get_balance(&self, address: &str) -> Result<u64, ChainError> {
        let result: Value = self.rpc_call("getBalance", json!([address])).await?;
        result
            .get("value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ChainError::BadResponse("missing balance value".to_string()))
    }
}
