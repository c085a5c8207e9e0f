use std::path::{Path, PathBuf};

use alloy::primitives::Bytes;
use async_trait::async_trait;
use attest_id_primitives::{CircuitKind, ParsedProof};

/// Error reported by the proving engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("proving engine error: {0}")]
pub struct EngineError(pub String);

/// Paths of the files the engine needs for one circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitAssets {
    /// Compiled circuit.
    pub circuit_path: PathBuf,
    /// Proving parameters (structured reference string).
    pub proving_params_path: PathBuf,
}

impl CircuitAssets {
    /// The assets of `circuit` inside `dir`, named after the circuit id.
    #[must_use]
    pub fn in_dir(dir: &Path, circuit: CircuitKind) -> Self {
        Self {
            circuit_path: dir.join(format!("{}.json", circuit.id())),
            proving_params_path: dir.join(format!("{}.srs", circuit.id())),
        }
    }
}

/// One proving job.
#[derive(Debug, Clone, Copy)]
pub struct ProveJob<'a> {
    /// Circuit files.
    pub assets: &'a CircuitAssets,
    /// Flat circuit inputs as `0x` hex strings.
    pub inputs: &'a [String],
    /// Whether to produce a proof the verifier contract accepts.
    pub on_chain_mode: bool,
    /// Verification key loaded for the same mode.
    pub verification_key: &'a [u8],
    /// Trade proving speed for memory.
    pub low_memory_mode: bool,
}

/// The native proving engine. Its proof system is opaque; only this input/output contract is relied on.
#[async_trait]
pub trait ProofEngine: Send + Sync {
    /// Loads the verification key of the circuit at `circuit_path` for the given mode.
    async fn load_verification_key(
        &self,
        circuit_path: &Path,
        on_chain_mode: bool,
    ) -> Result<Bytes, EngineError>;

    /// Generates a proof.
    async fn generate(&self, job: ProveJob<'_>) -> Result<Bytes, EngineError>;

    /// Verifies a proof locally.
    async fn verify(
        &self,
        circuit_path: &Path,
        proof: &[u8],
        on_chain_mode: bool,
        verification_key: &[u8],
        low_memory_mode: bool,
    ) -> Result<bool, EngineError>;

    /// Splits a proof into its public inputs and proof body.
    ///
    /// The default expects the public inputs as a prefix of 32-byte words.
    fn parse_proof_with_public_inputs(
        &self,
        proof: &[u8],
        num_public_inputs: usize,
    ) -> Result<ParsedProof, EngineError> {
        ParsedProof::split(proof, num_public_inputs).map_err(|e| EngineError(e.to_string()))
    }

    /// Releases cached proving resources.
    async fn cleanup(&self) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assets_are_named_after_the_circuit() {
        let assets =
            CircuitAssets::in_dir(Path::new("/data/circuits"), CircuitKind::CoinbaseCountry);
        assert_eq!(
            assets.circuit_path,
            PathBuf::from("/data/circuits/coinbase_country_attestation.json")
        );
        assert_eq!(
            assets.proving_params_path,
            PathBuf::from("/data/circuits/coinbase_country_attestation.srs")
        );
    }
}
