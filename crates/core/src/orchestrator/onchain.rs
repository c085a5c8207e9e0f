use alloy::{
    primitives::{Address, B256, Bytes},
    providers::{DynProvider, Provider, ProviderBuilder},
};
use async_trait::async_trait;

alloy::sol! {
    /// Bindings for the proof verifier contract deployed per circuit.
    #[sol(rpc)]
    #[derive(Debug)]
    interface IProofVerifier {
        function verify(bytes calldata proof, bytes32[] calldata publicInputs)
            external
            view
            returns (bool);
    }
}

/// Errors returned by an [`OnchainVerifier`].
#[derive(Debug, thiserror::Error)]
pub enum OnchainError {
    /// No verifier contract is configured.
    #[error("no verifier contract configured")]
    NotConfigured,
    /// The contract call failed.
    #[error("verifier call failed: {0}")]
    Call(#[from] alloy::contract::Error),
    /// The RPC URL is invalid.
    #[error("invalid RPC URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Verifies proofs against the verifier contract.
#[async_trait]
pub trait OnchainVerifier: Send + Sync {
    /// The verifier contract.
    fn address(&self) -> Address;

    /// Calls `verify(proof, publicInputs)` on the contract.
    async fn verify(&self, proof: &Bytes, public_inputs: &[B256]) -> Result<bool, OnchainError>;
}

/// [`OnchainVerifier`] calling the contract through a JSON-RPC provider.
#[derive(Clone)]
pub struct RpcOnchainVerifier {
    contract: IProofVerifier::IProofVerifierInstance<DynProvider>,
}

impl std::fmt::Debug for RpcOnchainVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcOnchainVerifier")
            .field("address", self.contract.address())
            .finish_non_exhaustive()
    }
}

impl RpcOnchainVerifier {
    /// Connects to the verifier at `address` through `rpc_url`.
    ///
    /// # Errors
    /// Returns [`OnchainError::InvalidUrl`] if `rpc_url` does not parse.
    pub fn connect(rpc_url: &str, address: Address) -> Result<Self, OnchainError> {
        let provider = ProviderBuilder::new()
            .connect_http(rpc_url.parse()?)
            .erased();
        Ok(Self::new(provider, address))
    }

    /// Uses an existing provider.
    #[must_use]
    pub fn new(provider: DynProvider, address: Address) -> Self {
        Self {
            contract: IProofVerifier::new(address, provider),
        }
    }
}

#[async_trait]
impl OnchainVerifier for RpcOnchainVerifier {
    fn address(&self) -> Address {
        *self.contract.address()
    }

    async fn verify(&self, proof: &Bytes, public_inputs: &[B256]) -> Result<bool, OnchainError> {
        let verified = self
            .contract
            .verify(proof.clone(), public_inputs.to_vec())
            .call()
            .await?;
        Ok(verified)
    }
}
