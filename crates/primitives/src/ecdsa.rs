use alloy_primitives::{Address, B256, Signature};

use crate::PrimitiveError;

/// An uncompressed secp256k1 public key recovered from a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredKey {
    /// The address derived from the public key.
    pub address: Address,
    /// SEC1 uncompressed encoding (`0x04 || x || y`).
    pub public_key: [u8; 65],
}

impl RecoveredKey {
    /// The x coordinate of the public key.
    #[must_use]
    pub fn x(&self) -> B256 {
        B256::from_slice(&self.public_key[1..33])
    }

    /// The y coordinate of the public key.
    #[must_use]
    pub fn y(&self) -> B256 {
        B256::from_slice(&self.public_key[33..65])
    }
}

/// Recovers the signer of a 32-byte digest.
///
/// # Errors
/// Returns [`PrimitiveError::InvalidInput`] if the signature does not recover to a valid point.
pub fn recover_from_prehash(
    signature: &Signature,
    prehash: &B256,
) -> Result<RecoveredKey, PrimitiveError> {
    let key = signature
        .recover_from_prehash(prehash)
        .map_err(|e| PrimitiveError::InvalidInput {
            attribute: "signature".to_string(),
            reason: e.to_string(),
        })?;

    let encoded = key.to_encoded_point(false);
    let public_key: [u8; 65] =
        encoded
            .as_bytes()
            .try_into()
            .map_err(|_| PrimitiveError::InvalidInput {
                attribute: "public_key".to_string(),
                reason: "unexpected encoded point length".to_string(),
            })?;

    Ok(RecoveredKey {
        address: Address::from_public_key(&key),
        public_key,
    })
}

/// Splits a public key into its x and y coordinates.
///
/// Accepts either 65 bytes with a leading `0x04` or 64 raw coordinate bytes.
///
/// # Errors
/// Returns [`PrimitiveError::InvalidInput`] for any other length or prefix.
pub fn split_public_key(public_key: &[u8]) -> Result<(B256, B256), PrimitiveError> {
    let coordinates = match public_key {
        [0x04, rest @ ..] if rest.len() == 64 => rest,
        raw if raw.len() == 64 => raw,
        _ => {
            return Err(PrimitiveError::InvalidInput {
                attribute: "public_key".to_string(),
                reason: format!(
                    "expected 64 bytes or 65 bytes with 0x04 prefix, got {}",
                    public_key.len()
                ),
            })
        }
    };
    Ok((
        B256::from_slice(&coordinates[..32]),
        B256::from_slice(&coordinates[32..]),
    ))
}

/// The `r || s` encoding of a signature, without the recovery id.
#[must_use]
pub fn compact_signature(signature: &Signature) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&signature.r().to_be_bytes::<32>());
    out[32..].copy_from_slice(&signature.s().to_be_bytes::<32>());
    out
}
