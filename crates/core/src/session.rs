//! The top-level controller for proof requests.
//!
//! A [`Session`] owns the active request slot. It turns raw inbound URLs into an active request, and on
//! acceptance runs the proof pipeline and posts the outcome to the requester's callback.

use std::sync::Arc;

use alloy::primitives::Address;
use attest_id_primitives::{
    ProofArtifact, ProofRequest, ProofResponse, ProofResult, RequestValidationError,
    VerificationType, now_millis,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::instrument;

use crate::{
    attestation::AttestationResolver,
    config::{Config, ConfigError},
    dispatcher::ResponseDispatcher,
    gateway::{ActiveRequestSlot, Arbitration, RequestGateway},
    orchestrator::{
        GenerationRequest, OnchainError, OrchestratorError, ProofEngine, ProofOrchestrator,
        RpcOnchainVerifier, StepSnapshot, StorageMonitor, WalletSigner,
    },
};

/// Reason sent to a requester whose request was replaced by a newer one.
pub const SUPERSEDED_REASON: &str = "superseded by a newer request";
/// Reason sent to a requester whose request timed out before it was handled.
pub const EXPIRED_REASON: &str = "request expired";

/// Errors returned by [`Session`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No request is active.
    #[error("no active proof request")]
    NoActiveRequest,
    /// The active request is no longer valid.
    #[error(transparent)]
    Validation(#[from] RequestValidationError),
    /// The request is addressed to another wallet.
    #[error("request is for {requested}, but the connected wallet is {connected}")]
    WalletMismatch {
        /// `userAddress` of the request.
        requested: Address,
        /// The wallet that would sign.
        connected: Address,
    },
    /// Proof generation failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The on-chain verifier could not be set up.
    #[error(transparent)]
    Onchain(#[from] OnchainError),
}

impl SessionError {
    /// Whether the request stays active so the user can try again.
    #[must_use]
    pub const fn keeps_request(&self) -> bool {
        match self {
            Self::Orchestrator(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// What happened to an inbound request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The URL could not be parsed. Nothing was activated or sent.
    Malformed,
    /// The request is invalid; an error response was sent if a callback was available.
    Rejected {
        /// The parsed request.
        request: Box<ProofRequest>,
        /// Why it was rejected.
        error: RequestValidationError,
        /// Whether the error response was delivered.
        notified: bool,
    },
    /// The request is now active.
    Activated(Box<ProofRequest>),
    /// The request replaced another, whose requester was sent a cancellation.
    Preempted {
        /// The now active request.
        request: Box<ProofRequest>,
        /// The replaced request.
        previous: Box<ProofRequest>,
    },
    /// The same request is already active.
    Ignored,
}

/// A response produced for the active request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The response.
    pub response: ProofResponse,
    /// Whether the callback accepted it.
    pub delivered: bool,
}

/// Handles proof requests for one wallet.
#[derive(Debug)]
pub struct Session {
    gateway: RequestGateway,
    slot: ActiveRequestSlot,
    orchestrator: ProofOrchestrator,
    dispatcher: ResponseDispatcher,
    chain_id: u64,
    last_proof: Mutex<Option<ProofArtifact>>,
}

impl Session {
    /// Creates a session from its parts.
    #[must_use]
    pub fn new(
        config: &Config,
        orchestrator: ProofOrchestrator,
        dispatcher: ResponseDispatcher,
    ) -> Self {
        Self {
            gateway: RequestGateway::from_config(config),
            slot: ActiveRequestSlot::new(config.active_request_timeout()),
            orchestrator,
            dispatcher,
            chain_id: config.chain_id(),
            last_proof: Mutex::new(None),
        }
    }

    /// Creates a session talking to the configured endpoints over HTTP.
    ///
    /// An on-chain verifier is attached when the configuration names a verifier contract.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn from_config(
        config: &Config,
        engine: Arc<dyn ProofEngine>,
        signer: Arc<dyn WalletSigner>,
        storage: Arc<dyn StorageMonitor>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let http_client = reqwest::Client::new();
        let resolver = AttestationResolver::from_config(config, &http_client)?;
        let mut orchestrator = ProofOrchestrator::new(config, resolver, engine, signer, storage);
        let verifier_rpc = config.rpc_urls().first();
        if let (Some(address), Some(rpc_url)) = (config.verifier_address(), verifier_rpc) {
            let verifier = RpcOnchainVerifier::connect(rpc_url, address)?;
            orchestrator = orchestrator.with_onchain_verifier(Arc::new(verifier));
        }
        let dispatcher =
            ResponseDispatcher::new(http_client).with_timeout(config.callback_timeout());
        Ok(Self::new(config, orchestrator, dispatcher))
    }

    /// The request gateway.
    #[must_use]
    pub const fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    /// The proof orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &ProofOrchestrator {
        &self.orchestrator
    }

    /// The active request.
    #[must_use]
    pub fn current(&self) -> Option<ProofRequest> {
        self.slot.current()
    }

    /// Observes step progress of the running generation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StepSnapshot> {
        self.orchestrator.subscribe()
    }

    /// The last generated proof.
    #[must_use]
    pub fn last_proof(&self) -> Option<ProofArtifact> {
        self.last_proof.lock().clone()
    }

    /// Handles an inbound request URL.
    #[instrument(level = "info", skip_all)]
    pub async fn receive(&self, raw_url: &str) -> Inbound {
        let now = now_millis();
        self.expire_stale(now).await;

        let Some(request) = self.gateway.parse(raw_url) else {
            return Inbound::Malformed;
        };

        if let Err(error) = self.gateway.validate(&request, now) {
            tracing::warn!(
                request_id = %request.request_id,
                error = %error,
                "rejecting invalid proof request"
            );
            let notified = self.dispatcher.send_error(&request, error.to_string()).await;
            return Inbound::Rejected {
                request: Box::new(request),
                error,
                notified,
            };
        }

        match self.slot.offer(request.clone(), now) {
            Arbitration::Activated => {
                tracing::info!(
                    request_id = %request.request_id,
                    circuit = %request.circuit,
                    "proof request activated"
                );
                Inbound::Activated(Box::new(request))
            }
            Arbitration::Ignored => {
                tracing::debug!(request_id = %request.request_id, "proof request already active");
                Inbound::Ignored
            }
            Arbitration::Preempted { previous } => {
                tracing::info!(
                    request_id = %request.request_id,
                    previous = %previous.request_id,
                    "proof request preempted the active request"
                );
                self.dispatcher
                    .send_cancelled(&previous, SUPERSEDED_REASON)
                    .await;
                Inbound::Preempted {
                    request: Box::new(request),
                    previous,
                }
            }
        }
    }

    /// Clears the active request if it went stale at `now`, notifying its requester.
    pub async fn expire_stale(&self, now: u64) -> Option<ProofRequest> {
        let stale = self.slot.clear_if_stale(now)?;
        tracing::info!(request_id = %stale.request_id, "active proof request expired");
        self.dispatcher.send_error(&stale, EXPIRED_REASON).await;
        Some(stale)
    }

    /// Generates a proof for the active request and sends it to the requester.
    ///
    /// Failures are reported to the requester and clear the request, unless the error is retryable.
    ///
    /// # Errors
    /// Returns [`SessionError::NoActiveRequest`] if nothing is active, or the error that stopped
    /// generation.
    #[instrument(level = "info", skip_all, fields(%verification_type))]
    pub async fn accept(
        &self,
        verification_type: VerificationType,
    ) -> Result<Delivery, SessionError> {
        let request = self.slot.current().ok_or(SessionError::NoActiveRequest)?;

        match self.prove(&request, verification_type).await {
            Ok(result) => {
                let response = ProofResponse::completed(&request, result.clone());
                if self.slot.clear(&request.request_id).is_none() {
                    tracing::warn!(
                        request_id = %request.request_id,
                        "request was replaced during generation; response not sent"
                    );
                    return Ok(Delivery {
                        response,
                        delivered: false,
                    });
                }
                let delivered = self.dispatcher.send_completed(&request, result).await;
                Ok(Delivery {
                    response,
                    delivered,
                })
            }
            Err(e) if e.keeps_request() => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "proof request kept for retry"
                );
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request.request_id,
                    error = %e,
                    "proof request failed"
                );
                if self.slot.clear(&request.request_id).is_some() {
                    self.dispatcher.send_error(&request, e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    /// Declines the active request and notifies its requester.
    ///
    /// # Errors
    /// Returns [`SessionError::NoActiveRequest`] if nothing is active.
    pub async fn reject(&self, reason: &str) -> Result<Delivery, SessionError> {
        let request = self.slot.current().ok_or(SessionError::NoActiveRequest)?;
        self.slot.clear(&request.request_id);
        tracing::info!(request_id = %request.request_id, reason, "proof request rejected by user");
        let delivered = self.dispatcher.send_cancelled(&request, reason).await;
        Ok(Delivery {
            response: ProofResponse::cancelled(&request, reason),
            delivered,
        })
    }

    /// Verifies the last generated proof again.
    ///
    /// Returns `None` if no proof was generated in this session.
    pub async fn verify_last(&self, verification_type: VerificationType) -> Option<bool> {
        let artifact = self.last_proof()?;
        Some(self.verify(&artifact, verification_type).await)
    }

    async fn verify(&self, artifact: &ProofArtifact, verification_type: VerificationType) -> bool {
        match verification_type {
            VerificationType::Offchain => self.orchestrator.verify_offchain(artifact).await,
            VerificationType::Onchain => self.orchestrator.verify_onchain(artifact).await,
        }
    }

    async fn prove(
        &self,
        request: &ProofRequest,
        verification_type: VerificationType,
    ) -> Result<ProofResult, SessionError> {
        request.validate(now_millis())?;
        let circuit = request.circuit_kind()?;

        let connected = self.orchestrator.wallet();
        if let Some(requested) = request.inputs.user_address()? {
            if requested != connected {
                return Err(SessionError::WalletMismatch {
                    requested,
                    connected,
                });
            }
        }

        let generation = GenerationRequest {
            circuit,
            scope: request.inputs.scope.clone(),
            signal_hash: request.inputs.signal_hash()?,
            extras: request.inputs.extras(circuit)?,
            verification_type,
        };
        let generated = self.orchestrator.generate(&generation).await?;

        let verification_result = self.verify(&generated.artifact, verification_type).await;
        if !verification_result {
            tracing::warn!(request_id = %request.request_id, "generated proof did not verify");
        }
        *self.last_proof.lock() = Some(generated.artifact.clone());

        let parsed = generated.parsed;

        Ok(ProofResult {
            verification_type,
            verification_result,
            started_at: generated.started_at,
            completed_at: generated.completed_at,
            expires_at: request.expires_at,
            proof: parsed.proof,
            public_inputs: parsed.public_inputs,
            num_public_inputs: parsed.num_public_inputs,
            nullifier: generated.binding.nullifier,
            verifier_address: self.orchestrator.verifier_address(),
            chain_id: self.chain_id,
            inputs: request.inputs.clone(),
        })
    }
}
