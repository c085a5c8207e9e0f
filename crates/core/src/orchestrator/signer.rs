use alloy::{
    primitives::{Address, Signature},
    signers::{Signer, local::PrivateKeySigner},
};
use async_trait::async_trait;

/// Errors returned by a [`WalletSigner`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The wallet already shows a signature prompt.
    #[error("a signature request is already pending in the wallet")]
    AlreadyPending,
    /// The holder declined to sign.
    #[error("signature request rejected")]
    Rejected,
    /// Any other wallet failure.
    #[error("wallet error: {0}")]
    Other(String),
}

/// The holder's wallet, asked to sign the signal hash with a personal-message signature.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The wallet address.
    fn address(&self) -> Address;

    /// Signs `message` as an EIP-191 personal message.
    async fn sign_personal_message(&self, message: &[u8]) -> Result<Signature, SignerError>;
}

/// [`WalletSigner`] holding a local private key.
#[derive(Debug, Clone)]
pub struct LocalWalletSigner {
    inner: PrivateKeySigner,
}

impl LocalWalletSigner {
    /// Wraps a local key.
    #[must_use]
    pub const fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl WalletSigner for LocalWalletSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        self.inner
            .sign_message(message)
            .await
            .map_err(|e| SignerError::Other(e.to_string()))
    }
}
