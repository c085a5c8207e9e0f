use std::{sync::Arc, time::Duration};

use alloy::primitives::B256;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinSet;

use super::transaction::{ReconstructedTransaction, RpcTransaction, TransactionError};

/// Errors returned by a [`TransactionSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network/HTTP request error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The node answered with a non-success status.
    #[error("RPC error (status {status}): {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// The node returned a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
}

/// A source of raw transaction data, usually one RPC mirror.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fetches a transaction by hash. `Ok(None)` means the source does not know the transaction.
    async fn transaction(&self, hash: B256) -> Result<Option<RpcTransaction>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<RpcTransaction>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// [`TransactionSource`] querying `eth_getTransactionByHash` on a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcSource {
    url: String,
    http_client: reqwest::Client,
}

impl JsonRpcSource {
    /// Creates a source for the RPC endpoint at `url`.
    #[must_use]
    pub const fn new(url: String, http_client: reqwest::Client) -> Self {
        Self { url, http_client }
    }
}

#[async_trait]
impl TransactionSource for JsonRpcSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn transaction(&self, hash: B256) -> Result<Option<RpcTransaction>, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getTransactionByHash",
            "params": [hash],
        });

        let resp = self.http_client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let response: JsonRpcResponse = resp.json().await?;
        if let Some(error) = response.error {
            return Err(SourceError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }
}

/// Rebuilds a mirror's answer, which must be the transaction that was asked for.
fn rebuild_requested(
    tx: &RpcTransaction,
    hash: B256,
) -> Result<ReconstructedTransaction, TransactionError> {
    if tx.hash != hash {
        return Err(TransactionError::HashMismatch {
            expected: hash,
            computed: tx.hash,
        });
    }
    tx.reconstruct()
}

/// Fetches `hash` from every source concurrently and returns the first transaction that rebuilds
/// to `hash`.
///
/// Each fetch is bounded by `timeout`. A mirror answering with another or a tampered transaction
/// counts as failed. Remaining fetches are aborted once one succeeds.
pub async fn fetch_from_mirrors(
    sources: &[Arc<dyn TransactionSource>],
    hash: B256,
    timeout: Duration,
) -> Option<ReconstructedTransaction> {
    let mut fetches = JoinSet::new();
    for source in sources {
        let source = Arc::clone(source);
        fetches.spawn(async move {
            let result = tokio::time::timeout(timeout, source.transaction(hash)).await;
            (source, result)
        });
    }

    while let Some(joined) = fetches.join_next().await {
        let Ok((source, result)) = joined else {
            continue;
        };
        match result {
            Ok(Ok(Some(tx))) => match rebuild_requested(&tx, hash) {
                Ok(rebuilt) => return Some(rebuilt),
                Err(e) => {
                    tracing::warn!(
                        source = source.name(),
                        tx_hash = %hash,
                        error = %e,
                        "mirror returned an unusable transaction"
                    );
                }
            },
            Ok(Ok(None)) => {
                tracing::debug!(source = source.name(), tx_hash = %hash, "transaction not found");
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    source = source.name(),
                    tx_hash = %hash,
                    error = %e,
                    "transaction fetch failed"
                );
            }
            Err(_) => {
                tracing::warn!(
                    source = source.name(),
                    tx_hash = %hash,
                    ?timeout,
                    "transaction fetch timed out"
                );
            }
        }
    }
    None
}
