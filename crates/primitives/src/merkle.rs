use alloy_primitives::{Address, B256, Keccak256, keccak256};
use serde::{Deserialize, Serialize};

use crate::{MAX_SIGNER_PROOF_DEPTH, PrimitiveError};

fn hash_pair(left: B256, right: B256) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    hasher.finalize()
}

/// Computes the leaf hash of a signer address.
#[must_use]
pub fn signer_leaf(address: Address) -> B256 {
    keccak256(address.as_slice())
}

/// The ordered set of addresses authorized to sign attestation transactions.
///
/// The set forms a binary Merkle tree whose root is a public input of every circuit. A level with an odd
/// number of nodes pairs its last node with itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedSignerSet {
    signers: Vec<Address>,
    levels: Vec<Vec<B256>>,
}

impl AuthorizedSignerSet {
    /// Builds the tree for an ordered list of signers.
    ///
    /// # Errors
    /// Returns [`PrimitiveError::InvalidInput`] when the list is empty or would need a proof deeper than
    /// [`MAX_SIGNER_PROOF_DEPTH`].
    pub fn new(signers: Vec<Address>) -> Result<Self, PrimitiveError> {
        if signers.is_empty() {
            return Err(PrimitiveError::InvalidInput {
                attribute: "authorized_signers".to_string(),
                reason: "at least one signer is required".to_string(),
            });
        }
        if signers.len() > 1 << MAX_SIGNER_PROOF_DEPTH {
            return Err(PrimitiveError::InvalidInput {
                attribute: "authorized_signers".to_string(),
                reason: format!(
                    "{} signers exceed a tree of depth {MAX_SIGNER_PROOF_DEPTH}",
                    signers.len()
                ),
            });
        }

        let mut levels = vec![signers.iter().copied().map(signer_leaf).collect::<Vec<_>>()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| hash_pair(pair[0], *pair.get(1).unwrap_or(&pair[0])))
                .collect();
            levels.push(next);
        }

        Ok(Self { signers, levels })
    }

    /// The signers in leaf order.
    #[must_use]
    pub fn signers(&self) -> &[Address] {
        &self.signers
    }

    /// The Merkle root of the set.
    #[must_use]
    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    /// Number of sibling hashes in every inclusion proof of this tree.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Returns the leaf index of `signer`, if it is authorized.
    #[must_use]
    pub fn index_of(&self, signer: Address) -> Option<usize> {
        self.signers.iter().position(|s| *s == signer)
    }

    /// Whether `signer` is authorized.
    #[must_use]
    pub fn contains(&self, signer: Address) -> bool {
        self.index_of(signer).is_some()
    }

    /// Builds the inclusion proof for the signer at `index`.
    ///
    /// # Errors
    /// Returns [`PrimitiveError::OutOfBounds`] if `index` does not address a leaf.
    pub fn proof(&self, index: usize) -> Result<SignerInclusionProof, PrimitiveError> {
        let leaf = *self.levels[0].get(index).ok_or(PrimitiveError::OutOfBounds)?;

        let mut siblings = Vec::with_capacity(self.depth());
        let mut position = index;
        for level in &self.levels[..self.depth()] {
            let sibling = position ^ 1;
            siblings.push(*level.get(sibling).unwrap_or(&level[position]));
            position >>= 1;
        }

        Ok(SignerInclusionProof {
            leaf,
            leaf_index: index as u64,
            siblings,
            root: self.root(),
        })
    }
}

/// A sibling path from a signer leaf to the root of an [`AuthorizedSignerSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerInclusionProof {
    /// Hash of the signer address.
    pub leaf: B256,
    /// Position of the leaf. Bit `i` selects the side of the node at level `i`.
    pub leaf_index: u64,
    /// Sibling hashes from the leaf level upwards.
    pub siblings: Vec<B256>,
    /// The root the proof resolves to.
    pub root: B256,
}

impl SignerInclusionProof {
    /// Recomputes the root from the leaf and siblings and compares it with [`Self::root`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let computed = self
            .siblings
            .iter()
            .enumerate()
            .fold(self.leaf, |node, (level, sibling)| {
                if (self.leaf_index >> level) & 1 == 0 {
                    hash_pair(node, *sibling)
                } else {
                    hash_pair(*sibling, node)
                }
            });
        computed == self.root
    }

    /// Returns the siblings padded with the zero hash to [`MAX_SIGNER_PROOF_DEPTH`].
    ///
    /// # Errors
    /// Returns [`PrimitiveError::InvalidInput`] if the proof is already deeper than the maximum.
    pub fn padded_siblings(&self) -> Result<[B256; MAX_SIGNER_PROOF_DEPTH], PrimitiveError> {
        if self.siblings.len() > MAX_SIGNER_PROOF_DEPTH {
            return Err(PrimitiveError::InvalidInput {
                attribute: "siblings".to_string(),
                reason: format!(
                    "depth {} exceeds {MAX_SIGNER_PROOF_DEPTH}",
                    self.siblings.len()
                ),
            });
        }
        let mut padded = [B256::ZERO; MAX_SIGNER_PROOF_DEPTH];
        padded[..self.siblings.len()].copy_from_slice(&self.siblings);
        Ok(padded)
    }
}
