use std::{
    collections::HashMap,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use alloy::{
    primitives::{Address, B256, Bytes, Signature, U256},
    signers::{Signer, local::PrivateKeySigner},
};
use async_trait::async_trait;
use attest_id_core::{
    attestation::{
        AttestationIndex, AttestationRecord, IndexError, RpcTransaction, SourceError,
        TransactionSource,
    },
    orchestrator::{
        EngineError, OnchainError, OnchainVerifier, ProofEngine, ProveJob, SignerError,
        StorageMonitor, WalletSigner,
    },
};
use parking_lot::Mutex;

/// Bytes appended after the public input prefix of every mock proof.
pub const MOCK_PROOF_TAIL: [u8; 64] = [0xab; 64];

/// A proving engine that "proves" by echoing its inputs.
///
/// The proof is every input as a 32-byte word followed by [`MOCK_PROOF_TAIL`], so the default parser
/// recovers the public inputs as the leading words.
#[derive(Debug)]
pub struct MockEngine {
    pub generated: AtomicUsize,
    pub verified: AtomicUsize,
    pub cleaned: AtomicUsize,
    pub verify_result: bool,
    pub fail_cleanup: bool,
    /// How long each proof takes.
    pub delay: Option<Duration>,
    pub last_inputs: Mutex<Vec<String>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            generated: AtomicUsize::new(0),
            verified: AtomicUsize::new(0),
            cleaned: AtomicUsize::new(0),
            verify_result: true,
            fail_cleanup: false,
            delay: None,
            last_inputs: Mutex::new(Vec::new()),
        }
    }
}

impl MockEngine {
    #[must_use]
    pub fn with_failing_cleanup() -> Self {
        Self {
            fail_cleanup: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn generate_calls(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofEngine for MockEngine {
    async fn load_verification_key(
        &self,
        _circuit_path: &Path,
        on_chain_mode: bool,
    ) -> Result<Bytes, EngineError> {
        Ok(Bytes::from(vec![u8::from(on_chain_mode); 32]))
    }

    async fn generate(&self, job: ProveJob<'_>) -> Result<Bytes, EngineError> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        *self.last_inputs.lock() = job.inputs.to_vec();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut proof = Vec::with_capacity(job.inputs.len() * 32 + MOCK_PROOF_TAIL.len());
        for input in job.inputs {
            let value = U256::from_str_radix(input.trim_start_matches("0x"), 16)
                .map_err(|e| EngineError(e.to_string()))?;
            proof.extend(value.to_be_bytes::<32>());
        }
        proof.extend(MOCK_PROOF_TAIL);
        Ok(proof.into())
    }

    async fn verify(
        &self,
        _circuit_path: &Path,
        proof: &[u8],
        _on_chain_mode: bool,
        _verification_key: &[u8],
        _low_memory_mode: bool,
    ) -> Result<bool, EngineError> {
        self.verified.fetch_add(1, Ordering::SeqCst);
        Ok(self.verify_result && proof.ends_with(&MOCK_PROOF_TAIL))
    }

    async fn cleanup(&self) -> Result<(), EngineError> {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(EngineError("cache directory is locked".to_string()));
        }
        Ok(())
    }
}

/// Storage that reports fixed free space before and after a purge.
#[derive(Debug)]
pub struct MockStorage {
    before_purge: u64,
    after_purge: u64,
    purged: AtomicUsize,
}

impl MockStorage {
    #[must_use]
    pub const fn new(before_purge: u64, after_purge: u64) -> Self {
        Self {
            before_purge,
            after_purge,
            purged: AtomicUsize::new(0),
        }
    }

    /// Plenty of room.
    #[must_use]
    pub const fn roomy() -> Self {
        Self::new(u64::MAX, u64::MAX)
    }

    #[must_use]
    pub fn purges(&self) -> usize {
        self.purged.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageMonitor for MockStorage {
    async fn available_bytes(&self) -> std::io::Result<u64> {
        if self.purges() == 0 {
            Ok(self.before_purge)
        } else {
            Ok(self.after_purge)
        }
    }

    async fn purge_cache(&self) -> std::io::Result<()> {
        self.purged.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An index returning fixed records.
#[derive(Debug, Default)]
pub struct StaticIndex {
    pub records: Vec<AttestationRecord>,
    pub calls: AtomicUsize,
}

impl StaticIndex {
    #[must_use]
    pub const fn new(records: Vec<AttestationRecord>) -> Self {
        Self {
            records,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttestationIndex for StaticIndex {
    async fn attestations(
        &self,
        recipient: Address,
        _schema_id: B256,
        limit: usize,
    ) -> Result<Vec<AttestationRecord>, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .iter()
            .filter(|r| r.recipient == recipient)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// An index that is always unreachable.
#[derive(Debug, Default)]
pub struct FailingIndex;

#[async_trait]
impl AttestationIndex for FailingIndex {
    async fn attestations(
        &self,
        _recipient: Address,
        _schema_id: B256,
        _limit: usize,
    ) -> Result<Vec<AttestationRecord>, IndexError> {
        Err(IndexError::Status {
            status: 503,
            body: "service unavailable".to_string(),
        })
    }
}

/// A transaction source serving fixed transactions, or failing every lookup.
#[derive(Debug, Default)]
pub struct StaticSource {
    pub txs: HashMap<B256, RpcTransaction>,
    pub failing: bool,
}

impl StaticSource {
    #[must_use]
    pub fn new(txs: impl IntoIterator<Item = RpcTransaction>) -> Self {
        Self {
            txs: txs.into_iter().map(|tx| (tx.hash, tx)).collect(),
            failing: false,
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TransactionSource for StaticSource {
    fn name(&self) -> &str {
        if self.failing {
            "failing"
        } else {
            "static"
        }
    }

    async fn transaction(&self, hash: B256) -> Result<Option<RpcTransaction>, SourceError> {
        if self.failing {
            return Err(SourceError::Rpc {
                code: -32_000,
                message: "mirror down".to_string(),
            });
        }
        Ok(self.txs.get(&hash).cloned())
    }
}

/// A wallet that signs with a local key, or fails with a fixed error.
#[derive(Debug)]
pub struct ScriptedSigner {
    pub key: PrivateKeySigner,
    pub error: Option<SignerError>,
    /// Signs with this key instead, while still reporting `key`'s address.
    pub impostor: Option<PrivateKeySigner>,
    /// How long the prompt stays open.
    pub delay: Option<Duration>,
    pub prompts: AtomicUsize,
}

impl ScriptedSigner {
    #[must_use]
    pub const fn new(key: PrivateKeySigner) -> Self {
        Self {
            key,
            error: None,
            impostor: None,
            delay: None,
            prompts: AtomicUsize::new(0),
        }
    }

    /// A holder who takes `delay` to answer the prompt.
    #[must_use]
    pub const fn hesitant(key: PrivateKeySigner, delay: Duration) -> Self {
        Self {
            key,
            error: None,
            impostor: None,
            delay: Some(delay),
            prompts: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn failing(key: PrivateKeySigner, error: SignerError) -> Self {
        Self {
            key,
            error: Some(error),
            impostor: None,
            delay: None,
            prompts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WalletSigner for ScriptedSigner {
    fn address(&self) -> Address {
        self.key.address()
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        self.impostor
            .as_ref()
            .unwrap_or(&self.key)
            .sign_message(message)
            .await
            .map_err(|e| SignerError::Other(e.to_string()))
    }
}

/// An on-chain verifier with a fixed answer.
#[derive(Debug)]
pub struct MockOnchainVerifier {
    pub address: Address,
    pub result: bool,
    pub calls: AtomicUsize,
}

impl MockOnchainVerifier {
    #[must_use]
    pub const fn new(address: Address, result: bool) -> Self {
        Self {
            address,
            result,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OnchainVerifier for MockOnchainVerifier {
    fn address(&self) -> Address {
        self.address
    }

    async fn verify(&self, _proof: &Bytes, public_inputs: &[B256]) -> Result<bool, OnchainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result && !public_inputs.is_empty())
    }
}
