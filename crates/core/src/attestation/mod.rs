//! Discovery and verification of a wallet's on-chain attestation.
//!
//! An attestation is accepted only after its creating transaction has been fetched, rebuilt into its signed
//! encoding and checked against the issuer contract and the authorized signer set. The rebuilt transaction
//! and the recovered issuer key are what the circuits later consume.

use std::{collections::HashSet, sync::Arc, time::Duration};

use alloy::primitives::{Address, B256};
use attest_id_primitives::{AuthorizedSignerSet, CircuitKind};
use tokio::task::JoinSet;
use tracing::instrument;

use crate::config::{Config, ConfigError};

mod cache;
mod index;
mod source;
mod transaction;
mod validation;

pub use cache::{MokaTtlCache, TtlCache};
pub use index::{AttestationIndex, AttestationRecord, EasGraphqlIndex, IndexError};
pub use source::{JsonRpcSource, SourceError, TransactionSource, fetch_from_mirrors};
pub use transaction::{ReconstructedTransaction, RpcTransaction, TransactionError};
pub use validation::{AttestationInvalid, TransactionValidation, validate_transaction};

/// Upper bound on cached (wallet, schema) lookups.
const CACHE_CAPACITY: u64 = 1_024;

/// Cache key of a resolved attestation.
pub type AttestationKey = (Address, B256);

/// An attestation whose transaction passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttestation {
    /// The index entry.
    pub record: AttestationRecord,
    /// The rebuilt, signed attestation transaction.
    pub transaction: ReconstructedTransaction,
    /// The authorized signer that sent the transaction.
    pub signer: Address,
    /// Leaf index of `signer` in the authorized signer set.
    pub signer_index: usize,
    /// Uncompressed public key of `signer`.
    pub issuer_public_key: [u8; 65],
}

/// Errors that prevent a lookup from completing.
///
/// A lookup that completes without a valid attestation is not an error; see [`AttestationResolver::find`].
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The attestation index could not be queried.
    #[error(transparent)]
    Index(#[from] IndexError),
}

struct ResolverInner {
    index: Arc<dyn AttestationIndex>,
    sources: Vec<Arc<dyn TransactionSource>>,
    cache: Arc<dyn TtlCache<AttestationKey, ResolvedAttestation>>,
    signer_set: AuthorizedSignerSet,
    issuer_contract: Address,
    query_limit: usize,
    fetch_timeout: Duration,
}

impl ResolverInner {
    async fn check_candidate(
        &self,
        record: AttestationRecord,
        wallet: Address,
        circuit: CircuitKind,
    ) -> Option<ResolvedAttestation> {
        let tx_hash = record.tx_hash;
        let Some(transaction) =
            fetch_from_mirrors(&self.sources, tx_hash, self.fetch_timeout).await
        else {
            tracing::warn!(%tx_hash, "attestation transaction not available from any mirror");
            return None;
        };

        let validation = validate_transaction(
            &transaction,
            wallet,
            circuit,
            self.issuer_contract,
            &self.signer_set,
        );
        match validation {
            TransactionValidation {
                valid: true,
                signer: Some(signer),
                signer_index: Some(signer_index),
                issuer_public_key: Some(issuer_public_key),
                ..
            } => Some(ResolvedAttestation {
                record,
                transaction,
                signer,
                signer_index,
                issuer_public_key,
            }),
            TransactionValidation { error, .. } => {
                tracing::info!(
                    %tx_hash,
                    reason = %error.map(|e| e.to_string()).unwrap_or_default(),
                    "attestation candidate rejected"
                );
                None
            }
        }
    }
}

/// Finds the attestation transaction that qualifies a wallet for a circuit.
#[derive(Clone)]
pub struct AttestationResolver {
    inner: Arc<ResolverInner>,
}

impl std::fmt::Debug for AttestationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationResolver")
            .field("issuer_contract", &self.inner.issuer_contract)
            .field("sources", &self.inner.sources.len())
            .field("query_limit", &self.inner.query_limit)
            .finish_non_exhaustive()
    }
}

impl AttestationResolver {
    /// Creates a resolver from explicit collaborators.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the configured signer set is unusable.
    pub fn new(
        config: &Config,
        index: Arc<dyn AttestationIndex>,
        sources: Vec<Arc<dyn TransactionSource>>,
        cache: Arc<dyn TtlCache<AttestationKey, ResolvedAttestation>>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(ResolverInner {
                index,
                sources,
                cache,
                signer_set: config.signer_set()?,
                issuer_contract: *config.issuer_contract(),
                query_limit: config.attestation_query_limit(),
                fetch_timeout: config.rpc_timeout(),
            }),
        })
    }

    /// Creates a resolver that queries the configured EAS index and RPC mirrors over HTTP.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the configured signer set is unusable.
    pub fn from_config(
        config: &Config,
        http_client: &reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let index = Arc::new(EasGraphqlIndex::new(
            config.attestation_index_url().clone(),
            http_client.clone(),
        ));
        let sources = config
            .rpc_urls()
            .iter()
            .map(|url| {
                Arc::new(JsonRpcSource::new(url.clone(), http_client.clone()))
                    as Arc<dyn TransactionSource>
            })
            .collect();
        let cache = Arc::new(MokaTtlCache::new(
            config.attestation_cache_ttl(),
            CACHE_CAPACITY,
        ));
        Self::new(config, index, sources, cache)
    }

    /// The authorized signer set attestations are checked against.
    #[must_use]
    pub fn signer_set(&self) -> &AuthorizedSignerSet {
        &self.inner.signer_set
    }

    /// Looks up the newest attestations of `wallet` for `circuit` and returns the first that validates.
    ///
    /// Candidates are checked concurrently; the remaining checks are aborted once one passes.
    ///
    /// # Errors
    /// Returns [`ResolverError::Index`] if the index cannot be queried. `Ok(None)` means no candidate passed.
    #[instrument(level = "info", skip_all, fields(%wallet, %circuit))]
    pub async fn find(
        &self,
        wallet: Address,
        circuit: CircuitKind,
    ) -> Result<Option<ResolvedAttestation>, ResolverError> {
        let key = (wallet, circuit.schema_id());
        if let Some(cached) = self.inner.cache.get(&key).await {
            tracing::debug!("attestation served from cache");
            return Ok(Some(cached));
        }

        let records = self
            .inner
            .index
            .attestations(wallet, circuit.schema_id(), self.inner.query_limit)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "attestation index query failed"))?;

        let mut seen = HashSet::new();
        let candidates: Vec<_> = records
            .into_iter()
            .filter(|record| seen.insert(record.tx_hash))
            .collect();
        tracing::info!(candidates = candidates.len(), "checking attestation candidates");

        let mut checks = JoinSet::new();
        for record in candidates {
            let inner = Arc::clone(&self.inner);
            checks.spawn(async move { inner.check_candidate(record, wallet, circuit).await });
        }

        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(Some(resolved)) => {
                    checks.abort_all();
                    tracing::info!(
                        tx_hash = %resolved.record.tx_hash,
                        signer = %resolved.signer,
                        "attestation resolved"
                    );
                    self.inner.cache.put(key, resolved.clone()).await;
                    return Ok(Some(resolved));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "attestation check task failed"),
            }
        }

        tracing::info!("no valid attestation found");
        Ok(None)
    }

    /// Drops the cached lookup for `wallet` and `circuit`.
    pub async fn invalidate(&self, wallet: Address, circuit: CircuitKind) {
        self.inner
            .cache
            .invalidate(&(wallet, circuit.schema_id()))
            .await;
    }
}
