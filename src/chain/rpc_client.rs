use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::chain::ChainClient;
use crate::error::ChainError;
use crate::logging::{LogContext, MetricsLogger, PerformanceMonitor};
use crate::models::{parse_display_hash, BlockEntry, ChainTip, OutPoint, Tx, TxOutput};
use crate::retry::{RetryConfig, RetryManager};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub height: u32,
    pub time: u32,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    hash: String,
    height: u32,
    time: u32,
    #[serde(default)]
    tx: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    txid: String,
    #[serde(default)]
    vin: Vec<RpcInput>,
    #[serde(default)]
    vout: Vec<RpcOutput>,
}

#[derive(Debug, Deserialize)]
struct RpcInput {
    txid: Option<String>,
    vout: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RpcOutput {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: RpcScript,
}

#[derive(Debug, Deserialize)]
struct RpcScript {
    address: Option<String>,
    #[serde(default)]
    addresses: Vec<String>,
}

impl RpcTransaction {
    fn into_tx(self) -> Tx {
        let inputs = self
            .vin
            .into_iter()
            .filter_map(|input| match (input.txid, input.vout) {
                (Some(txid), Some(vout)) => Some(OutPoint { txid, vout }),
                _ => None,
            })
            .collect();

        let outputs = self
            .vout
            .into_iter()
            .map(|output| TxOutput {
                address: output
                    .script_pub_key
                    .address
                    .or_else(|| output.script_pub_key.addresses.into_iter().next()),
                value: coins_to_satoshis(output.value),
            })
            .collect();

        Tx { txid: self.txid, inputs, outputs }
    }
}

fn coins_to_satoshis(value: f64) -> u64 {
    (value * 1e8).round().max(0.0) as u64
}

/// JSON-RPC client for a bitcoind/bcoin-compatible node
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    credentials: Option<(String, String)>,
    timeout_seconds: u64,
    retry: RetryConfig,
}

impl RpcClient {
    pub fn new(endpoint: String) -> Result<Self, ChainError> {
        Self::new_with_config(endpoint, 30, RetryConfig::no_retry())
    }

    pub fn new_with_config(endpoint: String, timeout_seconds: u64, retry: RetryConfig) -> Result<Self, ChainError> {
        let context = LogContext::new("rpc_client", "initialization")
            .with_metadata("endpoint", json!(endpoint))
            .with_metadata("timeout_seconds", json!(timeout_seconds));
        context.info("Initializing node RPC client");

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            credentials: None,
            timeout_seconds,
            retry,
        })
    }

    pub fn with_credentials(mut self, user: String, password: String) -> Self {
        self.credentials = Some((user, password));
        self
    }

    async fn make_request(&self, method: &str, params: Vec<Value>) -> Result<Value, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            method,
            params,
            id: 1,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ChainError::Timeout { seconds: self.timeout_seconds }
            } else if e.is_connect() {
                ChainError::Connection(e.to_string())
            } else {
                ChainError::Http(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ChainError::InvalidResponse("RPC credentials rejected".to_string()));
        }

        let body = response.text().await?;
        let rpc_response: JsonRpcResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            // bitcoind reports RPC errors with a 500 and a JSON body, so only
            // treat the status as fatal when the body is not a JSON-RPC reply.
            Err(_) if !status.is_success() => {
                return Err(ChainError::Connection(format!(
                    "HTTP error: {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )));
            }
            Err(e) => return Err(ChainError::Json(e)),
        };

        if let Some(error) = rpc_response.error {
            return Err(ChainError::Method { code: error.code, message: error.message });
        }

        rpc_response
            .result
            .ok_or_else(|| ChainError::InvalidResponse("No result in response".to_string()))
    }

    /// Issue a call with the configured retry policy and metrics
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ChainError> {
        let retry_manager = RetryManager::new(method, self.retry.clone());
        retry_manager.execute(|| {
            let params = params.clone();
            async move {
                let monitor = PerformanceMonitor::new(&format!("rpc_{}", method));
                let result = self.make_request(method, params).await;
                let duration = monitor.finish_with_result(&result);
                MetricsLogger::log_rpc_call(method, duration, result.is_ok());
                result
            }
        }).await
    }

    pub async fn get_block_count(&self) -> Result<u32, ChainError> {
        let result = self.call("getblockcount", vec![]).await?;
        result
            .as_u64()
            .and_then(|count| u32::try_from(count).ok())
            .ok_or_else(|| ChainError::InvalidResponse(format!("Block count is not a height: {}", result)))
    }

    pub async fn get_block_hash(&self, height: u32) -> Result<String, ChainError> {
        let result = self.call("getblockhash", vec![json!(height)]).await.map_err(|e| match e {
            // -8: height out of range
            ChainError::Method { code: -8, .. } => ChainError::BlockNotFound { height },
            other => other,
        })?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse("Block hash is not a string".to_string()))
    }

    pub async fn get_block_header(&self, hash: &str) -> Result<BlockHeader, ChainError> {
        let result = self.call("getblockheader", vec![json!(hash), json!(true)]).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Fetch a block with decoded transactions
    pub async fn get_block(&self, hash: &str) -> Result<(BlockEntry, Vec<Tx>), ChainError> {
        let result = self.call("getblock", vec![json!(hash), json!(2)]).await?;
        let block: RpcBlock = serde_json::from_value(result)?;

        let entry = BlockEntry::new(block.height, block.time, parse_display_hash(&block.hash).map_err(ChainError::InvalidResponse)?);
        let txs: Vec<Tx> = block.tx.into_iter().map(RpcTransaction::into_tx).collect();

        let context = LogContext::new("rpc_client", "get_block")
            .with_height(entry.height)
            .with_metadata("transaction_count", json!(txs.len()));
        context.debug(&format!("Retrieved block {} with {} transactions", entry.height, txs.len()));

        Ok((entry, txs))
    }

    pub async fn get_block_at(&self, height: u32) -> Result<(BlockEntry, Vec<Tx>), ChainError> {
        let hash = self.get_block_hash(height).await?;
        self.get_block(&hash).await
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn get_tip(&self) -> Result<ChainTip, ChainError> {
        let height = self.get_block_count().await?;
        let hash = self.get_block_hash(height).await?;
        Ok(ChainTip {
            height,
            hash: parse_display_hash(&hash).map_err(ChainError::InvalidResponse)?,
        })
    }

    async fn get_entry(&self, height: u32) -> Result<BlockEntry, ChainError> {
        let hash = self.get_block_hash(height).await?;
        let header = self.get_block_header(&hash).await?;
        Ok(BlockEntry::new(
            header.height,
            header.time,
            parse_display_hash(&header.hash).map_err(ChainError::InvalidResponse)?,
        ))
    }

    /// A bare RPC connection has no replay channel; use `NodeChainClient`.
    async fn rescan(&self, _start_hash: &str) -> Result<(), ChainError> {
        Err(ChainError::SourceClosed)
    }
}
