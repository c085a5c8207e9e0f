//! This crate contains the base types for attestation-bound proof requests.
//!
//! It implements the pure parts of the protocol: the supported circuits and their input layouts, scope and
//! nullifier derivation, the authorized signer Merkle tree, the assembly of circuit inputs and the format of
//! requests and responses exchanged with third-party applications.
//!
//! Importantly, this crate performs no I/O.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(clippy::all, clippy::nursery, missing_docs, dead_code)]
#![allow(clippy::option_if_let_else)]

/// Contains the supported circuits and their fixed input layouts.
pub mod circuit;
pub use circuit::{
    COUNTRY_CODE_LEN, CircuitKind, InputField, MAX_COUNTRIES, MAX_RAW_TX_LEN,
    MAX_SIGNER_PROOF_DEPTH, MIN_AGE_RANGE, REFERENCE_YEAR_RANGE,
};

/// Scope, signal and nullifier derivation.
pub mod binding;
pub use binding::IdentityBinding;

/// Contains the authorized signer set and its inclusion proofs.
pub mod merkle;
pub use merkle::{AuthorizedSignerSet, SignerInclusionProof};

/// secp256k1 key recovery helpers.
pub mod ecdsa;

/// Contains the assembly of the flat circuit input vector.
pub mod circuit_inputs;
pub use circuit_inputs::{
    AssemblyError, AssemblyInputs, AttestationWitness, CircuitExtras, CircuitInputSet,
    check_age_bounds, check_country_list,
};

/// Contains the proof artifact types.
pub mod proof;
pub use proof::{ParsedProof, ProofArtifact, VerificationType};

/// Contains request/response types and request validation.
pub mod request;
pub use request::{
    CircuitInputs, ProofRequest, ProofResponse, ProofResult, RequestValidationError,
    ResponseStatus, ValidationOutcome,
};

/// Generic errors that may occur with basic functions in this crate.
#[derive(Debug, thiserror::Error)]
pub enum PrimitiveError {
    /// Index is out of bounds.
    #[error("Provided index is out of bounds")]
    OutOfBounds,
    /// Invalid input provided (e.g., incorrect length, format, etc.)
    #[error("Invalid input at {attribute}: {reason}")]
    InvalidInput {
        /// The attribute that is invalid
        attribute: String,
        /// The reason the input is invalid
        reason: String,
    },
}

/// Returns the current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
