//! The core library of the attestation-bound proof request protocol.
//!
//! It receives proof requests from third-party applications, finds and verifies the holder's on-chain
//! attestation, drives the proving engine and posts the result back to the requester. The pure parts of the
//! protocol live in [`attest_id_primitives`], re-exported as [`primitives`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(clippy::all, clippy::nursery, missing_docs, dead_code)]
#![allow(clippy::option_if_let_else)]

// Used by the `attest-id` binary.
use clap as _;
use dotenvy as _;
use eyre as _;
use tracing_subscriber as _;
use uuid as _;

/// Configuration and deployment environments.
pub mod config;
pub use config::{Config, ConfigError, Environment};

/// Attestation discovery and validation.
pub mod attestation;
pub use attestation::{AttestationResolver, ResolvedAttestation, ResolverError};

/// Step-tracked proof generation.
pub mod orchestrator;
pub use orchestrator::{
    GeneratedProof, GenerationRequest, OrchestratorError, ProofEngine, ProofOrchestrator,
    StorageMonitor, WalletSigner,
};

/// Inbound request parsing and the active request slot.
pub mod gateway;
pub use gateway::{ActiveRequestSlot, Arbitration, RequestEncoding, RequestGateway};

/// Response delivery to request callbacks.
pub mod dispatcher;
pub use dispatcher::ResponseDispatcher;

/// The top-level request controller.
pub mod session;
pub use session::{Delivery, Inbound, Session, SessionError};

/// Re-export of the protocol primitives.
pub mod primitives {
    pub use attest_id_primitives::*;
}
