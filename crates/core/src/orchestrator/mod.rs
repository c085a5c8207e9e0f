//! Step-tracked proof generation.
//!
//! [`ProofOrchestrator::generate`] drives one proof through every [`Step`]: it loads the verification key,
//! resolves the holder's attestation, derives the identity binding, has the holder sign the signal hash,
//! assembles the circuit inputs, checks free storage and finally runs and parses the proof. Progress is
//! published through [`StepTracker`]. One attempt runs at a time per orchestrator; a concurrent call is
//! refused with [`OrchestratorError::GenerationInProgress`] before it touches the tracker.

use std::{future::Future, path::PathBuf, sync::Arc};

use alloy::primitives::{Address, B256, Bytes, eip191_hash_message};
use attest_id_primitives::{
    AssemblyError,
    AssemblyInputs,
    AttestationWitness,
    CircuitExtras,
    CircuitInputSet,
    CircuitKind,
    IdentityBinding,
    ParsedProof,
    PrimitiveError,
    ProofArtifact,
    VerificationType,
    ecdsa::{compact_signature, recover_from_prehash},
    now_millis,
};
use tokio::sync::watch;
use tracing::instrument;

use crate::{
    attestation::{AttestationResolver, ResolverError},
    config::Config,
};

mod engine;
mod guard;
mod onchain;
mod signer;
mod steps;
mod storage;

pub use engine::{CircuitAssets, EngineError, ProofEngine, ProveJob};
pub use guard::{ExclusiveGuard, ExclusivePermit};
pub use onchain::{IProofVerifier, OnchainError, OnchainVerifier, RpcOnchainVerifier};
pub use signer::{LocalWalletSigner, SignerError, WalletSigner};
pub use steps::{Step, StepError, StepSnapshot, StepState, StepTracker};
pub use storage::StorageMonitor;

/// Errors that abort proof generation.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A step was started out of order.
    #[error(transparent)]
    Step(#[from] StepError),
    /// The attestation lookup could not complete.
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    /// No valid attestation exists for the wallet.
    #[error("no valid {circuit} attestation found for {wallet}")]
    NoAttestation {
        /// The holder's wallet.
        wallet: Address,
        /// The requested circuit.
        circuit: CircuitKind,
    },
    /// Another generation attempt is running on this orchestrator.
    #[error("a proof generation is already in progress")]
    GenerationInProgress,
    /// A signature prompt is already open in this process.
    #[error("a signature request is already in progress")]
    SignatureInProgress,
    /// The wallet reports a pending signature request.
    #[error("a signature request is pending in the wallet; retry once it is resolved")]
    SignaturePending,
    /// The holder declined to sign.
    #[error("signature request rejected")]
    SignatureRejected,
    /// Any other wallet failure.
    #[error("wallet error: {0}")]
    Signer(String),
    /// The signature was not produced by the holder's wallet.
    #[error("signature recovers to {actual}, expected {expected}")]
    SignerMismatch {
        /// The holder's wallet.
        expected: Address,
        /// The recovered signer.
        actual: Address,
    },
    /// The holder's public key could not be recovered.
    #[error("public key recovery failed: {0}")]
    KeyRecovery(#[from] PrimitiveError),
    /// The circuit inputs could not be assembled.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    /// Free storage is below the configured minimum even after purging caches.
    #[error("insufficient storage: {available} bytes free, {required} required")]
    InsufficientStorage {
        /// Free bytes after purging.
        available: u64,
        /// Configured minimum.
        required: u64,
    },
    /// Free storage could not be determined.
    #[error("storage check failed: {0}")]
    StorageMonitor(#[from] std::io::Error),
    /// The proving engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl OrchestratorError {
    /// Whether repeating the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationInProgress
                | Self::SignatureInProgress
                | Self::SignaturePending
                | Self::Resolver(_)
        )
    }
}

impl From<SignerError> for OrchestratorError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::AlreadyPending => Self::SignaturePending,
            SignerError::Rejected => Self::SignatureRejected,
            SignerError::Other(message) => Self::Signer(message),
        }
    }
}

/// What to prove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Target circuit.
    pub circuit: CircuitKind,
    /// Application scope string.
    pub scope: String,
    /// Signal hash supplied by the requester, if any.
    pub signal_hash: Option<B256>,
    /// Circuit-specific public data.
    pub extras: CircuitExtras,
    /// How the proof will be verified.
    pub verification_type: VerificationType,
}

/// A generated proof together with the values it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProof {
    /// The proof.
    pub artifact: ProofArtifact,
    /// The proof split into proof body and public inputs.
    pub parsed: ParsedProof,
    /// Signal, scope and nullifier the proof commits to.
    pub binding: IdentityBinding,
    /// Hash of the attestation transaction the proof is bound to.
    pub attestation_tx: B256,
    /// Epoch milliseconds when generation started.
    pub started_at: u64,
    /// Epoch milliseconds when generation finished.
    pub completed_at: u64,
}

/// Drives the proving engine through the generation steps.
pub struct ProofOrchestrator {
    resolver: AttestationResolver,
    engine: Arc<dyn ProofEngine>,
    signer: Arc<dyn WalletSigner>,
    storage: Arc<dyn StorageMonitor>,
    onchain: Option<Arc<dyn OnchainVerifier>>,
    tracker: StepTracker,
    generating: ExclusiveGuard,
    signing: Arc<ExclusiveGuard>,
    circuit_dir: PathBuf,
    min_free_storage_bytes: u64,
    low_memory_mode: bool,
}

impl std::fmt::Debug for ProofOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofOrchestrator")
            .field("resolver", &self.resolver)
            .field("circuit_dir", &self.circuit_dir)
            .field("min_free_storage_bytes", &self.min_free_storage_bytes)
            .field("low_memory_mode", &self.low_memory_mode)
            .finish_non_exhaustive()
    }
}

impl ProofOrchestrator {
    /// Creates an orchestrator without an on-chain verifier.
    #[must_use]
    pub fn new(
        config: &Config,
        resolver: AttestationResolver,
        engine: Arc<dyn ProofEngine>,
        signer: Arc<dyn WalletSigner>,
        storage: Arc<dyn StorageMonitor>,
    ) -> Self {
        Self {
            resolver,
            engine,
            signer,
            storage,
            onchain: None,
            tracker: StepTracker::new(),
            generating: ExclusiveGuard::default(),
            signing: Arc::default(),
            circuit_dir: config.circuit_dir().clone(),
            min_free_storage_bytes: config.min_free_storage_bytes(),
            low_memory_mode: config.low_memory_mode(),
        }
    }

    /// Sets the verifier used by [`Self::verify_onchain`].
    #[must_use]
    pub fn with_onchain_verifier(mut self, verifier: Arc<dyn OnchainVerifier>) -> Self {
        self.onchain = Some(verifier);
        self
    }

    /// Shares the signature prompt flag with other orchestrators using the same wallet.
    #[must_use]
    pub fn with_signing_guard(mut self, guard: Arc<ExclusiveGuard>) -> Self {
        self.signing = guard;
        self
    }

    /// Whether a generation attempt is running.
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating.is_busy()
    }

    /// The holder's wallet.
    #[must_use]
    pub fn wallet(&self) -> Address {
        self.signer.address()
    }

    /// The on-chain verifier contract, if one is configured.
    #[must_use]
    pub fn verifier_address(&self) -> Option<Address> {
        self.onchain.as_ref().map(|v| v.address())
    }

    /// The attestation resolver.
    #[must_use]
    pub const fn resolver(&self) -> &AttestationResolver {
        &self.resolver
    }

    /// Observes step progress.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StepSnapshot> {
        self.tracker.subscribe()
    }

    /// The current step progress.
    #[must_use]
    pub fn steps(&self) -> StepSnapshot {
        self.tracker.snapshot()
    }

    /// Generates a proof for the holder's wallet.
    ///
    /// # Errors
    /// Returns the error of the first failing step, or [`OrchestratorError::GenerationInProgress`]
    /// while another attempt is running. See [`OrchestratorError`].
    #[instrument(
        level = "info",
        skip_all,
        fields(circuit = %request.circuit, verification = %request.verification_type)
    )]
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedProof, OrchestratorError> {
        let Some(_attempt) = self.generating.try_acquire() else {
            tracing::warn!("generation already in progress");
            return Err(OrchestratorError::GenerationInProgress);
        };
        self.tracker.reset();
        let started_at = now_millis();
        let wallet = self.signer.address();
        let circuit = request.circuit;
        let on_chain_mode = request.verification_type.on_chain_mode();
        let assets = CircuitAssets::in_dir(&self.circuit_dir, circuit);

        let verification_key = self
            .run(
                Step::LoadVerificationKey,
                self.engine
                    .load_verification_key(&assets.circuit_path, on_chain_mode),
            )
            .await?;

        let attestation = self
            .run(Step::ValidateAttestation, async {
                self.resolver
                    .find(wallet, circuit)
                    .await?
                    .ok_or(OrchestratorError::NoAttestation { wallet, circuit })
            })
            .await?;

        let binding = self
            .run(Step::DeriveSignal, async {
                Ok::<_, OrchestratorError>(IdentityBinding::derive(
                    wallet,
                    &request.scope,
                    circuit,
                    request.signal_hash,
                ))
            })
            .await?;

        let signature = self
            .run(Step::RequestSignature, async {
                let _prompt = self
                    .signing
                    .try_acquire()
                    .ok_or(OrchestratorError::SignatureInProgress)?;
                Ok::<_, OrchestratorError>(
                    self.signer
                        .sign_personal_message(binding.signal_hash.as_slice())
                        .await?,
                )
            })
            .await?;

        let user_key = self
            .run(Step::RecoverPublicKey, async {
                let key =
                    recover_from_prehash(&signature, &eip191_hash_message(binding.signal_hash))?;
                if key.address != wallet {
                    return Err(OrchestratorError::SignerMismatch {
                        expected: wallet,
                        actual: key.address,
                    });
                }
                Ok::<_, OrchestratorError>(key)
            })
            .await?;

        let inputs = self
            .run(Step::AssembleInputs, async {
                let witness = AttestationWitness {
                    user_address: wallet,
                    user_signature: compact_signature(&signature),
                    user_public_key: Bytes::copy_from_slice(&user_key.public_key),
                    raw_transaction: attestation.transaction.raw.clone(),
                    issuer_public_key: Bytes::copy_from_slice(&attestation.issuer_public_key),
                };
                CircuitInputSet::assemble(&AssemblyInputs {
                    circuit,
                    binding: &binding,
                    witness: &witness,
                    signer_set: self.resolver.signer_set(),
                    signer_index: attestation.signer_index,
                    extras: &request.extras,
                })
            })
            .await?;

        self.run(Step::CheckStorage, self.ensure_storage()).await?;

        let flat_inputs = inputs.to_hex_strings();
        let proof = self
            .run(
                Step::GenerateProof,
                self.engine.generate(ProveJob {
                    assets: &assets,
                    inputs: &flat_inputs,
                    on_chain_mode,
                    verification_key: &verification_key,
                    low_memory_mode: self.low_memory_mode,
                }),
            )
            .await?;

        let parsed = self
            .run(Step::ParseProof, async {
                self.engine
                    .parse_proof_with_public_inputs(&proof, circuit.num_public_inputs())
            })
            .await?;

        self.cleanup().await;

        let completed_at = now_millis();
        tracing::info!(
            nullifier = %binding.nullifier,
            attestation_tx = %attestation.record.tx_hash,
            elapsed_ms = completed_at.saturating_sub(started_at),
            "proof generated"
        );

        Ok(GeneratedProof {
            artifact: ProofArtifact {
                circuit,
                proof,
                verification_key,
                on_chain_mode,
                parsed: Some(parsed.clone()),
            },
            parsed,
            binding,
            attestation_tx: attestation.record.tx_hash,
            started_at,
            completed_at,
        })
    }

    /// Verifies `artifact` with the proving engine, in the mode it was generated in.
    #[instrument(level = "info", skip_all, fields(circuit = %artifact.circuit))]
    pub async fn verify_offchain(&self, artifact: &ProofArtifact) -> bool {
        let assets = CircuitAssets::in_dir(&self.circuit_dir, artifact.circuit);
        match self
            .engine
            .verify(
                &assets.circuit_path,
                &artifact.proof,
                artifact.on_chain_mode,
                &artifact.verification_key,
                self.low_memory_mode,
            )
            .await
        {
            Ok(verified) => verified,
            Err(e) => {
                tracing::error!(error = %e, "offchain verification failed");
                false
            }
        }
    }

    /// Verifies `artifact` with the verifier contract.
    ///
    /// Returns `false` if the proof was not generated in on-chain mode or no verifier is configured.
    #[instrument(level = "info", skip_all, fields(circuit = %artifact.circuit))]
    pub async fn verify_onchain(&self, artifact: &ProofArtifact) -> bool {
        if !artifact.on_chain_mode {
            tracing::warn!("proof was not generated for on-chain verification");
            return false;
        }
        let Some(verifier) = &self.onchain else {
            tracing::warn!("{}", OnchainError::NotConfigured);
            return false;
        };

        let parsed = match &artifact.parsed {
            Some(parsed) => parsed.clone(),
            None => match self.engine.parse_proof_with_public_inputs(
                &artifact.proof,
                artifact.circuit.num_public_inputs(),
            ) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::error!(error = %e, "failed to parse proof");
                    return false;
                }
            },
        };

        match verifier.verify(&parsed.proof, &parsed.public_inputs).await {
            Ok(verified) => verified,
            Err(e) => {
                tracing::error!(
                    verifier = %verifier.address(),
                    error = %e,
                    "onchain verification failed"
                );
                false
            }
        }
    }

    async fn run<T, E>(
        &self,
        step: Step,
        work: impl Future<Output = Result<T, E>>,
    ) -> Result<T, OrchestratorError>
    where
        E: Into<OrchestratorError>,
    {
        self.tracker.start(step)?;
        tracing::debug!(%step, "step started");
        match work.await.map_err(Into::into) {
            Ok(value) => {
                self.tracker.complete(step)?;
                Ok(value)
            }
            Err(e) => {
                tracing::error!(%step, error = %e, "step failed");
                self.tracker.fail(step, e.to_string());
                Err(e)
            }
        }
    }

    async fn ensure_storage(&self) -> Result<u64, OrchestratorError> {
        let required = self.min_free_storage_bytes;
        let available = self.storage.available_bytes().await?;
        if available >= required {
            return Ok(available);
        }

        tracing::warn!(available, required, "low storage, purging cache");
        if let Err(e) = self.storage.purge_cache().await {
            tracing::warn!(error = %e, "cache purge failed");
        }

        let available = self.storage.available_bytes().await?;
        if available < required {
            return Err(OrchestratorError::InsufficientStorage {
                available,
                required,
            });
        }
        Ok(available)
    }

    /// Cleanup failures are recorded on the step but do not discard the proof.
    async fn cleanup(&self) {
        if let Err(e) = self.tracker.start(Step::CleanupCache) {
            tracing::warn!(error = %e, "cleanup not started");
            return;
        }
        match self.engine.cleanup().await {
            Ok(()) => {
                let _ = self.tracker.complete(Step::CleanupCache);
            }
            Err(e) => {
                tracing::warn!(error = %e, "engine cleanup failed");
                self.tracker.fail(Step::CleanupCache, e.to_string());
            }
        }
    }
}
