//! Scope, signal and nullifier derivation.
//!
//! A nullifier lets a relying party detect repeated proofs for the same (wallet, scope) pair without
//! learning the wallet. All functions here are pure: the same inputs always produce the same outputs.

use alloy_primitives::{Address, B256, Keccak256};
use serde::{Deserialize, Serialize};

use crate::CircuitKind;

/// Hashes an application-chosen scope string into the 32-byte scope used by the circuits.
#[must_use]
pub fn scope(scope: &str) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(scope.as_bytes());
    hasher.finalize()
}

/// Derives the signal hash for a wallet, scope string and circuit.
///
/// Repeated requests for the same scope reproduce the same signal, and therefore the same nullifier.
#[must_use]
pub fn signal(wallet: Address, scope: &str, circuit: CircuitKind) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(wallet.as_slice());
    hasher.update(scope.as_bytes());
    hasher.update(circuit.binding_tag().as_bytes());
    hasher.finalize()
}

/// Computes `keccak256(keccak256(wallet || signal) || scope)`.
#[must_use]
pub fn nullifier(wallet: Address, signal: B256, scope: B256) -> B256 {
    let mut inner = Keccak256::new();
    inner.update(wallet.as_slice());
    inner.update(signal.as_slice());
    let secret = inner.finalize();

    let mut outer = Keccak256::new();
    outer.update(secret.as_slice());
    outer.update(scope.as_slice());
    outer.finalize()
}

/// The binding values committed into a single proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBinding {
    /// The hash the holder signs and the proof commits to.
    pub signal_hash: B256,
    /// Hash of the application scope string.
    pub scope: B256,
    /// Scope-specific nullifier for the wallet.
    pub nullifier: B256,
}

impl IdentityBinding {
    /// Derives the binding for a wallet and scope.
    ///
    /// When `supplied_signal` is `None`, the signal hash is derived deterministically from the wallet, scope
    /// and circuit.
    #[must_use]
    pub fn derive(
        wallet: Address,
        scope_str: &str,
        circuit: CircuitKind,
        supplied_signal: Option<B256>,
    ) -> Self {
        let signal_hash = supplied_signal.unwrap_or_else(|| signal(wallet, scope_str, circuit));
        let scope = scope(scope_str);
        Self {
            signal_hash,
            scope,
            nullifier: nullifier(wallet, signal_hash, scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use rand::{Rng, distributions::Alphanumeric};

    fn random_scope<R: Rng>(rng: &mut R) -> String {
        let len = rng.gen_range(1..48);
        rng.sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    #[test]
    fn nullifier_is_deterministic() {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let wallet = Address::from(rng.gen::<[u8; 20]>());
            let scope_str = random_scope(&mut rng);
            for circuit in [CircuitKind::CoinbaseKyc, CircuitKind::CoinbaseCountry] {
                let a = IdentityBinding::derive(wallet, &scope_str, circuit, None);
                let b = IdentityBinding::derive(wallet, &scope_str, circuit, None);
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn nullifier_changes_with_every_input() {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let wallet = Address::from(rng.gen::<[u8; 20]>());
            let other_wallet = Address::from(rng.gen::<[u8; 20]>());
            let scope_str = random_scope(&mut rng);
            let other_scope = format!("{scope_str}:other");

            let base = IdentityBinding::derive(wallet, &scope_str, CircuitKind::CoinbaseKyc, None);
            let by_wallet =
                IdentityBinding::derive(other_wallet, &scope_str, CircuitKind::CoinbaseKyc, None);
            let by_scope =
                IdentityBinding::derive(wallet, &other_scope, CircuitKind::CoinbaseKyc, None);
            let by_circuit =
                IdentityBinding::derive(wallet, &scope_str, CircuitKind::CoinbaseCountry, None);

            assert_ne!(base.nullifier, by_wallet.nullifier);
            assert_ne!(base.nullifier, by_scope.nullifier);
            assert_ne!(base.nullifier, by_circuit.nullifier);
        }
    }

    #[test]
    fn supplied_signal_is_used_verbatim() {
        let wallet = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let supplied = B256::repeat_byte(0x42);
        let binding = IdentityBinding::derive(
            wallet,
            "app:default",
            CircuitKind::CoinbaseKyc,
            Some(supplied),
        );
        assert_eq!(binding.signal_hash, supplied);
        assert_eq!(binding.scope, scope("app:default"));
        assert_eq!(
            binding.nullifier,
            nullifier(wallet, supplied, scope("app:default"))
        );
    }

    #[test]
    fn nullifier_matches_manual_composition() {
        let wallet = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let signal_hash = signal(wallet, "app:default", CircuitKind::CoinbaseKyc);
        let scope_hash = scope("app:default");

        let secret =
            alloy_primitives::keccak256([wallet.as_slice(), signal_hash.as_slice()].concat());
        let expected =
            alloy_primitives::keccak256([secret.as_slice(), scope_hash.as_slice()].concat());

        assert_eq!(nullifier(wallet, signal_hash, scope_hash), expected);
    }
}
