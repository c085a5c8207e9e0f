//! Reconstruction of signed attestation transactions from their JSON-RPC representation.
//!
//! The circuits consume the exact signed serialization of the transaction, so it is rebuilt from the
//! individual fields and checked against the transaction hash reported by the node.

use alloy::{
    consensus::{SignableTransaction, Signed, TxEip1559, TxEip2930, TxEnvelope, TxLegacy},
    eips::{eip2718::Encodable2718, eip2930::AccessList},
    primitives::{Address, B256, Bytes, Signature, TxKind, U64, U128, U256},
};
use serde::{Deserialize, Serialize};

/// Errors raised while rebuilding a transaction.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// A field required by the transaction type is absent.
    #[error("transaction is missing `{0}`")]
    MissingField(&'static str),
    /// The transaction type is not supported.
    #[error("unsupported transaction type {0}")]
    UnsupportedType(u64),
    /// The legacy `v` value does not encode a recovery id.
    #[error("invalid signature v value {0}")]
    InvalidV(u64),
    /// The rebuilt transaction does not hash to the reported hash.
    #[error("reconstructed hash {computed} does not match {expected}")]
    HashMismatch {
        /// Hash reported by the node.
        expected: B256,
        /// Hash of the rebuilt transaction.
        computed: B256,
    },
}

/// A transaction as returned by `eth_getTransactionByHash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    /// Transaction hash reported by the node.
    pub hash: B256,
    /// EIP-2718 type. Absent on some nodes for legacy transactions.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<U64>,
    /// Chain id, required for typed transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<U64>,
    /// Sender nonce.
    pub nonce: U64,
    /// Gas limit.
    pub gas: U64,
    /// Gas price of legacy and EIP-2930 transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U128>,
    /// EIP-1559 fee cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U128>,
    /// EIP-1559 priority fee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U128>,
    /// Call target, `None` for contract creations.
    #[serde(default)]
    pub to: Option<Address>,
    /// Transferred value.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
    /// Access list of typed transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<AccessList>,
    /// Legacy `v`, or the y parity on typed transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<U64>,
    /// Signature `r`.
    pub r: U256,
    /// Signature `s`.
    pub s: U256,
    /// Signature y parity of typed transactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_parity: Option<U64>,
}

/// A transaction rebuilt into its signed consensus encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// EIP-2718 encoding of the signed transaction.
    pub raw: Bytes,
    /// Call target, `None` for contract creations.
    pub to: Option<Address>,
    /// Calldata.
    pub input: Bytes,
    /// Digest the sender signed.
    pub signing_digest: B256,
    /// The sender's signature.
    pub signature: Signature,
}

/// Splits a legacy `v` into the EIP-155 chain id and the y parity.
fn legacy_parity(v: u64) -> Result<(Option<u64>, bool), TransactionError> {
    match v {
        27 | 28 => Ok((None, v == 28)),
        v if v >= 35 => Ok((Some((v - 35) / 2), (v - 35) % 2 == 1)),
        v => Err(TransactionError::InvalidV(v)),
    }
}

fn typed_parity(tx: &RpcTransaction) -> Result<bool, TransactionError> {
    let parity = tx
        .y_parity
        .or(tx.v)
        .ok_or(TransactionError::MissingField("yParity"))?
        .to::<u64>();
    match parity {
        0 | 1 => Ok(parity == 1),
        other => Err(TransactionError::InvalidV(other)),
    }
}

fn seal<T>(signed: Signed<T>) -> (TxEnvelope, B256, Signature)
where
    T: SignableTransaction<Signature>,
    TxEnvelope: From<Signed<T>>,
{
    let digest = signed.signature_hash();
    let signature = *signed.signature();
    (signed.into(), digest, signature)
}

impl RpcTransaction {
    /// Rebuilds the signed transaction and checks it against [`RpcTransaction::hash`].
    ///
    /// Supports legacy (with and without EIP-155 replay protection), EIP-2930 and EIP-1559 transactions.
    ///
    /// # Errors
    /// See [`TransactionError`].
    pub fn reconstruct(&self) -> Result<ReconstructedTransaction, TransactionError> {
        let to = self.to.map_or(TxKind::Create, TxKind::Call);
        let nonce = self.nonce.to::<u64>();
        let gas_limit = self.gas.to::<u64>();
        let chain_id = || {
            self.chain_id
                .map(|id| id.to::<u64>())
                .ok_or(TransactionError::MissingField("chainId"))
        };
        let gas_price = || {
            self.gas_price
                .map(|p| p.to::<u128>())
                .ok_or(TransactionError::MissingField("gasPrice"))
        };

        let tx_type = self.tx_type.map_or(0, |t| t.to::<u64>());
        let (envelope, signing_digest, signature) = match tx_type {
            0 => {
                let v = self.v.ok_or(TransactionError::MissingField("v"))?;
                let (chain_id, parity) = legacy_parity(v.to::<u64>())?;
                let tx = TxLegacy {
                    chain_id,
                    nonce,
                    gas_price: gas_price()?,
                    gas_limit,
                    to,
                    value: self.value,
                    input: self.input.clone(),
                };
                seal(tx.into_signed(Signature::new(self.r, self.s, parity)))
            }
            1 => {
                let tx = TxEip2930 {
                    chain_id: chain_id()?,
                    nonce,
                    gas_price: gas_price()?,
                    gas_limit,
                    to,
                    value: self.value,
                    access_list: self.access_list.clone().unwrap_or_default(),
                    input: self.input.clone(),
                };
                seal(tx.into_signed(Signature::new(self.r, self.s, typed_parity(self)?)))
            }
            2 => {
                let tx = TxEip1559 {
                    chain_id: chain_id()?,
                    nonce,
                    gas_limit,
                    max_fee_per_gas: self
                        .max_fee_per_gas
                        .ok_or(TransactionError::MissingField("maxFeePerGas"))?
                        .to::<u128>(),
                    max_priority_fee_per_gas: self
                        .max_priority_fee_per_gas
                        .ok_or(TransactionError::MissingField("maxPriorityFeePerGas"))?
                        .to::<u128>(),
                    to,
                    value: self.value,
                    access_list: self.access_list.clone().unwrap_or_default(),
                    input: self.input.clone(),
                };
                seal(tx.into_signed(Signature::new(self.r, self.s, typed_parity(self)?)))
            }
            other => return Err(TransactionError::UnsupportedType(other)),
        };

        let computed = *envelope.tx_hash();
        if computed != self.hash {
            return Err(TransactionError::HashMismatch {
                expected: self.hash,
                computed,
            });
        }

        Ok(ReconstructedTransaction {
            hash: computed,
            raw: envelope.encoded_2718().into(),
            to: self.to,
            input: self.input.clone(),
            signing_digest,
            signature,
        })
    }
}
