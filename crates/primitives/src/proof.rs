use alloy_primitives::{B256, Bytes};
use serde::{Deserialize, Serialize};

use crate::{CircuitKind, PrimitiveError};

/// Where a proof is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VerificationType {
    /// Verified locally by the proving engine.
    Offchain,
    /// Verified by the verifier contract.
    Onchain,
}

impl VerificationType {
    /// Whether proofs must be generated in the engine's on-chain compatible mode.
    #[must_use]
    pub const fn on_chain_mode(self) -> bool {
        matches!(self, Self::Onchain)
    }
}

/// A proof split into its proof body and public inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedProof {
    /// Proof bytes after the public input prefix.
    pub proof: Bytes,
    /// Public inputs as 32-byte words.
    pub public_inputs: Vec<B256>,
    /// Number of public inputs.
    pub num_public_inputs: usize,
}

impl ParsedProof {
    /// Splits an engine proof whose first `num_public_inputs` 32-byte words are the public inputs.
    ///
    /// # Errors
    /// Returns [`PrimitiveError::InvalidInput`] if the proof is shorter than its public input prefix.
    pub fn split(raw: &[u8], num_public_inputs: usize) -> Result<Self, PrimitiveError> {
        let prefix = num_public_inputs * 32;
        if raw.len() < prefix {
            return Err(PrimitiveError::InvalidInput {
                attribute: "proof".to_string(),
                reason: format!(
                    "{} bytes cannot hold {num_public_inputs} public inputs",
                    raw.len()
                ),
            });
        }
        let (inputs, proof) = raw.split_at(prefix);
        Ok(Self {
            proof: Bytes::copy_from_slice(proof),
            public_inputs: inputs.chunks_exact(32).map(B256::from_slice).collect(),
            num_public_inputs,
        })
    }
}

/// A generated proof, kept for the session so it can be verified and delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofArtifact {
    /// Circuit the proof belongs to.
    pub circuit: CircuitKind,
    /// Raw proof as returned by the engine.
    pub proof: Bytes,
    /// Verification key the proof was generated against.
    pub verification_key: Bytes,
    /// Mode the proof was generated in. Verification must use the same mode.
    pub on_chain_mode: bool,
    /// Proof and public inputs, once parsed.
    pub parsed: Option<ParsedProof>,
}
