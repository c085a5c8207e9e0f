//! Lookup of attestations by recipient and schema.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

const ATTESTATIONS_QUERY: &str = r"
query Attestations($recipient: String!, $schemaId: String!, $take: Int!) {
  attestations(
    where: { recipient: { equals: $recipient }, schemaId: { equals: $schemaId } }
    orderBy: [{ time: desc }]
    take: $take
  ) {
    id
    txid
    attester
    recipient
    time
  }
}";

/// An attestation as listed by the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    /// Attestation UID.
    pub id: String,
    /// Hash of the transaction that created the attestation.
    #[serde(rename = "txid")]
    pub tx_hash: B256,
    /// Attester recorded by the index.
    pub attester: Address,
    /// The attested wallet.
    pub recipient: Address,
    /// Attestation time in epoch seconds.
    pub time: u64,
}

/// Errors returned by an [`AttestationIndex`].
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Network/HTTP request error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The index answered with a non-success status.
    #[error("Index error (status {status}): {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// The query was rejected.
    #[error("Index query failed: {0}")]
    Query(String),
}

/// A searchable index of on-chain attestations.
#[async_trait]
pub trait AttestationIndex: Send + Sync {
    /// Returns up to `limit` attestations for `recipient` under `schema_id`, newest first.
    async fn attestations(
        &self,
        recipient: Address,
        schema_id: B256,
        limit: usize,
    ) -> Result<Vec<AttestationRecord>, IndexError>;
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<AttestationsData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct AttestationsData {
    attestations: Vec<AttestationRecord>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// [`AttestationIndex`] backed by an EAS GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct EasGraphqlIndex {
    url: String,
    http_client: reqwest::Client,
}

impl EasGraphqlIndex {
    /// Creates a client for the GraphQL endpoint at `url`.
    #[must_use]
    pub const fn new(url: String, http_client: reqwest::Client) -> Self {
        Self { url, http_client }
    }
}

#[async_trait]
impl AttestationIndex for EasGraphqlIndex {
    async fn attestations(
        &self,
        recipient: Address,
        schema_id: B256,
        limit: usize,
    ) -> Result<Vec<AttestationRecord>, IndexError> {
        let body = json!({
            "query": ATTESTATIONS_QUERY,
            "variables": {
                "recipient": recipient.to_checksum(None),
                "schemaId": schema_id.to_string(),
                "take": limit,
            },
        });

        let resp = self.http_client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(IndexError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let response: GraphqlResponse = resp.json().await?;
        if let Some(error) = response.errors.first() {
            return Err(IndexError::Query(error.message.clone()));
        }
        let mut attestations = response
            .data
            .map(|data| data.attestations)
            .unwrap_or_default();
        attestations.truncate(limit);
        Ok(attestations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use mockito::Matcher;

    const SCHEMA: B256 = B256::repeat_byte(0x11);

    #[tokio::test]
    async fn queries_by_recipient_and_schema() {
        let mut server = mockito::Server::new_async().await;
        let wallet = address!("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0");

        let mock = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({
                "variables": {
                    "recipient": "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0",
                    "schemaId": SCHEMA.to_string(),
                    "take": 5,
                }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": {
                        "attestations": [{
                            "id": "0xabc",
                            "txid": B256::repeat_byte(0x22).to_string(),
                            "attester": "0x357458739F90461b99789350868CD7CF330Dd7EE",
                            "recipient": "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0",
                            "time": 1_700_000_000u64,
                        }]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let index =
            EasGraphqlIndex::new(format!("{}/graphql", server.url()), reqwest::Client::new());
        let records = index.attestations(wallet, SCHEMA, 5).await.unwrap();

        mock.assert_async().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tx_hash, B256::repeat_byte(0x22));
        assert_eq!(records[0].recipient, wallet);
    }

    #[tokio::test]
    async fn surfaces_transport_and_query_failures() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("POST", "/down")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;
        let _errors = server
            .mock("POST", "/bad")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": null, "errors": [{ "message": "bad schema" }] }).to_string())
            .create_async()
            .await;

        let down = EasGraphqlIndex::new(format!("{}/down", server.url()), reqwest::Client::new());
        assert!(matches!(
            down.attestations(Address::ZERO, SCHEMA, 5).await,
            Err(IndexError::Status { status: 503, .. })
        ));

        let bad = EasGraphqlIndex::new(format!("{}/bad", server.url()), reqwest::Client::new());
        assert!(matches!(
            bad.attestations(Address::ZERO, SCHEMA, 5).await,
            Err(IndexError::Query(message)) if message == "bad schema"
        ));
    }
}
