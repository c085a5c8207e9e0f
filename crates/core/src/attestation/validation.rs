use alloy::primitives::{Address, FixedBytes};
use attest_id_primitives::{AuthorizedSignerSet, CircuitKind, ecdsa::recover_from_prehash};

use super::transaction::ReconstructedTransaction;

/// Byte range of the recipient address inside the attestation calldata: the 4-byte selector is followed by
/// the first ABI word, whose last 20 bytes hold the address.
const RECIPIENT_RANGE: std::ops::Range<usize> = 16..36;

/// Why an attestation transaction was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestationInvalid {
    /// The transaction does not call the issuer contract.
    #[error("transaction targets {actual:?}, expected issuer contract {expected}")]
    WrongRecipient {
        /// The configured issuer contract.
        expected: Address,
        /// The transaction's call target.
        actual: Option<Address>,
    },
    /// The transaction calls a different issuer function.
    #[error("selector {actual} does not match {expected}")]
    WrongSelector {
        /// Selector of the circuit's attestation function.
        expected: FixedBytes<4>,
        /// Selector found in the calldata.
        actual: FixedBytes<4>,
    },
    /// The calldata is too short to carry a recipient.
    #[error("calldata is {0} bytes, too short for an attestation call")]
    CalldataTooShort(usize),
    /// The attestation is for a different wallet.
    #[error("attestation recipient {actual} is not {expected}")]
    WalletMismatch {
        /// The wallet being proven.
        expected: Address,
        /// The wallet named in the calldata.
        actual: Address,
    },
    /// The signature does not recover to a public key.
    #[error("signature recovery failed: {0}")]
    SignatureRecovery(String),
    /// The transaction was signed by an address outside the authorized signer set.
    #[error("signer {0} is not authorized")]
    UnauthorizedSigner(Address),
}

/// Outcome of validating one attestation transaction. Failures are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionValidation {
    /// Whether every check passed.
    pub valid: bool,
    /// The recovered transaction signer, when recovery succeeded.
    pub signer: Option<Address>,
    /// Leaf index of the signer in the authorized signer set.
    pub signer_index: Option<usize>,
    /// Uncompressed public key of the signer.
    pub issuer_public_key: Option<[u8; 65]>,
    /// The first failed check.
    pub error: Option<AttestationInvalid>,
}

impl TransactionValidation {
    const fn rejected(error: AttestationInvalid) -> Self {
        Self {
            valid: false,
            signer: None,
            signer_index: None,
            issuer_public_key: None,
            error: Some(error),
        }
    }
}

/// Checks that `tx` is an attestation of `wallet` for `circuit`, sent to `issuer_contract` by an authorized
/// signer.
#[must_use]
pub fn validate_transaction(
    tx: &ReconstructedTransaction,
    wallet: Address,
    circuit: CircuitKind,
    issuer_contract: Address,
    signers: &AuthorizedSignerSet,
) -> TransactionValidation {
    if tx.to != Some(issuer_contract) {
        return TransactionValidation::rejected(AttestationInvalid::WrongRecipient {
            expected: issuer_contract,
            actual: tx.to,
        });
    }

    let Some(calldata) = tx.input.get(..RECIPIENT_RANGE.end) else {
        return TransactionValidation::rejected(AttestationInvalid::CalldataTooShort(
            tx.input.len(),
        ));
    };

    let expected = FixedBytes::from(circuit.selector());
    let actual = FixedBytes::<4>::from_slice(&calldata[..4]);
    if actual != expected {
        return TransactionValidation::rejected(AttestationInvalid::WrongSelector {
            expected,
            actual,
        });
    }

    let recipient = Address::from_slice(&calldata[RECIPIENT_RANGE]);
    if recipient != wallet {
        return TransactionValidation::rejected(AttestationInvalid::WalletMismatch {
            expected: wallet,
            actual: recipient,
        });
    }

    let recovered = match recover_from_prehash(&tx.signature, &tx.signing_digest) {
        Ok(recovered) => recovered,
        Err(e) => {
            return TransactionValidation::rejected(AttestationInvalid::SignatureRecovery(
                e.to_string(),
            ))
        }
    };

    let Some(signer_index) = signers.index_of(recovered.address) else {
        return TransactionValidation {
            signer: Some(recovered.address),
            ..TransactionValidation::rejected(AttestationInvalid::UnauthorizedSigner(
                recovered.address,
            ))
        };
    };

    TransactionValidation {
        valid: true,
        signer: Some(recovered.address),
        signer_index: Some(signer_index),
        issuer_public_key: Some(recovered.public_key),
        error: None,
    }
}
