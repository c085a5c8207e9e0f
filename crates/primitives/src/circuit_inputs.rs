//! Assembly of the flat input vector consumed by the proving engine.
//!
//! Byte arrays occupy one element per byte. Scalars (lengths, indices, flags) occupy one element each.

use std::ops::RangeInclusive;

use alloy_primitives::{Address, B256, Bytes, U256};

use crate::{
    AuthorizedSignerSet,
    COUNTRY_CODE_LEN,
    CircuitKind,
    IdentityBinding,
    InputField,
    MAX_COUNTRIES,
    MAX_RAW_TX_LEN,
    MAX_SIGNER_PROOF_DEPTH,
    PrimitiveError,
    circuit::{MIN_AGE_RANGE, REFERENCE_YEAR_RANGE},
    ecdsa::split_public_key,
};

#[inline]
fn bytes_to_u256_vec(bytes: &[u8]) -> impl Iterator<Item = U256> + '_ {
    bytes.iter().map(|b| U256::from(*b))
}

#[inline]
fn words(word: &B256) -> [U256; 32] {
    word.0.map(U256::from)
}

#[inline]
fn padded_bytes_to_u256_vec(bytes: &[u8], width: usize) -> impl Iterator<Item = U256> + '_ {
    bytes_to_u256_vec(bytes).chain(std::iter::repeat(U256::ZERO).take(width - bytes.len()))
}

/// Errors raised while assembling circuit inputs.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// The attestation transaction is empty.
    #[error("raw transaction is empty")]
    EmptyTransaction,
    /// The attestation transaction does not fit the circuit.
    #[error("raw transaction is {len} bytes, the circuit accepts at most {MAX_RAW_TX_LEN}")]
    TransactionTooLong {
        /// Length of the serialized transaction.
        len: usize,
    },
    /// The signer index does not address a leaf of the signer set.
    #[error("signer index {index} is out of range for {len} authorized signers")]
    SignerIndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of authorized signers.
        len: usize,
    },
    /// The signer inclusion proof does not fit the circuit.
    #[error("signer proof depth {depth} exceeds {MAX_SIGNER_PROOF_DEPTH}")]
    ProofTooDeep {
        /// Depth of the inclusion proof.
        depth: usize,
    },
    /// The country circuit was assembled without country data.
    #[error("circuit {0} requires a country list")]
    MissingCountryList(CircuitKind),
    /// The country list is empty, too long or contains a malformed code.
    #[error("invalid country list: {0}")]
    InvalidCountryList(String),
    /// The age circuit was assembled without its bounds.
    #[error("circuit {0} requires a minimum age and reference year")]
    MissingAgeBounds(CircuitKind),
    /// A numeric input lies outside the range the circuit accepts.
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        /// Wire name of the input.
        field: &'static str,
        /// The supplied value.
        value: u64,
        /// Smallest accepted value.
        min: u64,
        /// Largest accepted value.
        max: u64,
    },
    /// A public key could not be split into coordinates.
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),
}

/// Circuit-specific public data beyond the common bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CircuitExtras {
    /// The circuit has no additional public data.
    #[default]
    None,
    /// Country membership data.
    Country {
        /// ISO 3166-1 alpha-2 codes.
        countries: Vec<String>,
        /// Whether the attested country must be in (`true`) or outside (`false`) the list.
        is_included: bool,
    },
    /// Age threshold data.
    Age {
        /// Age the holder must have reached.
        min_age: u64,
        /// Year the age is evaluated in.
        reference_year: u64,
    },
}

fn check_range(
    field: &'static str,
    value: u64,
    range: &RangeInclusive<u64>,
) -> Result<(), AssemblyError> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(AssemblyError::OutOfRange {
        field,
        value,
        min: *range.start(),
        max: *range.end(),
    })
}

/// Checks the bounds of the age threshold circuit.
///
/// # Errors
/// Returns [`AssemblyError::OutOfRange`] for the first value outside its accepted range.
pub fn check_age_bounds(min_age: u64, reference_year: u64) -> Result<(), AssemblyError> {
    check_range("minAge", min_age, &MIN_AGE_RANGE)?;
    check_range("referenceYear", reference_year, &REFERENCE_YEAR_RANGE)
}

/// Checks a country list for the country circuit.
///
/// # Errors
/// Returns [`AssemblyError::InvalidCountryList`] unless the list holds between one and [`MAX_COUNTRIES`]
/// two-letter uppercase codes.
pub fn check_country_list(countries: &[String]) -> Result<(), AssemblyError> {
    if countries.is_empty() || countries.len() > MAX_COUNTRIES {
        return Err(AssemblyError::InvalidCountryList(format!(
            "expected 1 to {MAX_COUNTRIES} countries, got {}",
            countries.len()
        )));
    }
    if let Some(bad) = countries
        .iter()
        .find(|c| c.len() != COUNTRY_CODE_LEN || !c.bytes().all(|b| b.is_ascii_uppercase()))
    {
        return Err(AssemblyError::InvalidCountryList(format!(
            "`{bad}` is not a two-letter uppercase country code"
        )));
    }
    Ok(())
}

/// Private data taken from the attestation and the holder's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationWitness {
    /// The holder's wallet.
    pub user_address: Address,
    /// The holder's signature over the signal hash as `r || s`.
    pub user_signature: [u8; 64],
    /// The holder's public key, 65 bytes with `0x04` prefix or 64 raw bytes.
    pub user_public_key: Bytes,
    /// The signed, serialized attestation transaction.
    pub raw_transaction: Bytes,
    /// The attestation signer's public key, 65 bytes with `0x04` prefix or 64 raw bytes.
    pub issuer_public_key: Bytes,
}

/// Everything required to assemble the inputs of one proof.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInputs<'a> {
    /// Target circuit.
    pub circuit: CircuitKind,
    /// Signal, scope and nullifier.
    pub binding: &'a IdentityBinding,
    /// Attestation and holder data.
    pub witness: &'a AttestationWitness,
    /// The authorized signer set.
    pub signer_set: &'a AuthorizedSignerSet,
    /// Leaf index of the attestation signer in `signer_set`.
    pub signer_index: usize,
    /// Circuit-specific public data.
    pub extras: &'a CircuitExtras,
}

/// The fixed-layout input vector of a single proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitInputSet {
    circuit: CircuitKind,
    values: Vec<U256>,
}

impl CircuitInputSet {
    /// Flattens the inputs in the order declared by [`CircuitKind::layout`].
    ///
    /// # Errors
    /// See [`AssemblyError`].
    pub fn assemble(inputs: &AssemblyInputs<'_>) -> Result<Self, AssemblyError> {
        let circuit = inputs.circuit;
        let witness = inputs.witness;

        let tx = witness.raw_transaction.as_ref();
        if tx.is_empty() {
            return Err(AssemblyError::EmptyTransaction);
        }
        if tx.len() > MAX_RAW_TX_LEN {
            return Err(AssemblyError::TransactionTooLong { len: tx.len() });
        }

        let signer_count = inputs.signer_set.signers().len();
        let proof = inputs
            .signer_set
            .proof(inputs.signer_index)
            .map_err(|_| AssemblyError::SignerIndexOutOfRange {
                index: inputs.signer_index,
                len: signer_count,
            })?;
        let depth = proof.siblings.len();
        if depth > MAX_SIGNER_PROOF_DEPTH {
            return Err(AssemblyError::ProofTooDeep { depth });
        }
        let siblings = proof.padded_siblings()?;

        let (user_x, user_y) = split_public_key(&witness.user_public_key)?;
        let (issuer_x, issuer_y) = split_public_key(&witness.issuer_public_key)?;

        let mut country = None;
        let mut age = None;
        match (circuit, inputs.extras) {
            (
                CircuitKind::CoinbaseCountry,
                CircuitExtras::Country {
                    countries,
                    is_included,
                },
            ) => {
                check_country_list(countries)?;
                country = Some((countries.as_slice(), *is_included));
            }
            (CircuitKind::CoinbaseCountry, _) => {
                return Err(AssemblyError::MissingCountryList(circuit))
            }
            (
                CircuitKind::AgeThreshold,
                CircuitExtras::Age {
                    min_age,
                    reference_year,
                },
            ) => {
                check_age_bounds(*min_age, *reference_year)?;
                age = Some((*min_age, *reference_year));
            }
            (CircuitKind::AgeThreshold, _) => return Err(AssemblyError::MissingAgeBounds(circuit)),
            (CircuitKind::CoinbaseKyc, _) => {}
        }

        let mut values = Vec::with_capacity(circuit.input_len());
        for field in circuit.layout() {
            let start = values.len();
            match field {
                InputField::SignalHash => values.extend(words(&inputs.binding.signal_hash)),
                InputField::SignerListMerkleRoot => values.extend(words(&proof.root)),
                InputField::Scope => values.extend(words(&inputs.binding.scope)),
                InputField::Nullifier => values.extend(words(&inputs.binding.nullifier)),
                InputField::CountryList => {
                    let codes: Vec<u8> = country
                        .map(|(countries, _)| countries.iter().flat_map(|c| c.bytes()).collect())
                        .unwrap_or_default();
                    values.extend(padded_bytes_to_u256_vec(&codes, field.width()));
                }
                InputField::CountryListLength => {
                    values.push(U256::from(country.map_or(0, |(countries, _)| countries.len())));
                }
                InputField::IsIncluded => {
                    let included = country.is_some_and(|(_, included)| included);
                    values.push(U256::from(u8::from(included)));
                }
                InputField::MinAge => values.push(U256::from(age.map_or(0, |(min, _)| min))),
                InputField::ReferenceYear => {
                    values.push(U256::from(age.map_or(0, |(_, year)| year)));
                }
                InputField::UserAddress => {
                    values.extend(bytes_to_u256_vec(witness.user_address.as_slice()));
                }
                InputField::UserSignature => {
                    values.extend(bytes_to_u256_vec(&witness.user_signature));
                }
                InputField::UserPubkeyX => values.extend(words(&user_x)),
                InputField::UserPubkeyY => values.extend(words(&user_y)),
                InputField::RawTransaction => {
                    values.extend(padded_bytes_to_u256_vec(tx, field.width()));
                }
                InputField::TxLength => values.push(U256::from(tx.len())),
                InputField::IssuerPubkeyX => values.extend(words(&issuer_x)),
                InputField::IssuerPubkeyY => values.extend(words(&issuer_y)),
                InputField::SignerMerkleProof => values.extend(siblings.iter().flat_map(words)),
                InputField::SignerLeafIndex => values.push(U256::from(proof.leaf_index)),
                InputField::SignerProofDepth => values.push(U256::from(depth)),
            }
            debug_assert_eq!(values.len() - start, field.width(), "{field:?}");
        }

        Ok(Self { circuit, values })
    }

    /// The circuit the inputs were assembled for.
    #[must_use]
    pub const fn circuit(&self) -> CircuitKind {
        self.circuit
    }

    /// The full flat vector.
    #[must_use]
    pub fn values(&self) -> &[U256] {
        &self.values
    }

    /// The leading public inputs of the vector.
    #[must_use]
    pub fn public_inputs(&self) -> &[U256] {
        &self.values[..self.circuit.num_public_inputs()]
    }

    /// Returns the values of a single field.
    #[must_use]
    pub fn field(&self, field: InputField) -> Option<&[U256]> {
        let mut offset = 0;
        for f in self.circuit.layout() {
            if *f == field {
                return self.values.get(offset..offset + f.width());
            }
            offset += f.width();
        }
        None
    }

    /// Renders every element as a `0x`-prefixed hex string, the format accepted by the proving engine.
    #[must_use]
    pub fn to_hex_strings(&self) -> Vec<String> {
        self.values.iter().map(|v| format!("{v:#x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn signer_set() -> AuthorizedSignerSet {
        AuthorizedSignerSet::new(vec![
            address!("0x952f32128af084422539c4ff96df5c525322e564"),
            address!("0x8844591d47f17bca6f5df8f6b64f4a739f1c0080"),
            address!("0x88fe64ea2e121f49bb77abea6c0a45e93638c3c5"),
        ])
        .unwrap()
    }

    fn witness(tx_len: usize) -> AttestationWitness {
        let mut key = vec![0x04];
        key.extend([0x11; 64]);
        AttestationWitness {
            user_address: address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            user_signature: [0x22; 64],
            user_public_key: key.clone().into(),
            raw_transaction: vec![0xff; tx_len].into(),
            issuer_public_key: key[1..].to_vec().into(),
        }
    }

    fn binding() -> IdentityBinding {
        IdentityBinding::derive(
            address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            "app:default",
            CircuitKind::CoinbaseKyc,
            None,
        )
    }

    fn assemble(
        circuit: CircuitKind,
        witness: &AttestationWitness,
        signer_index: usize,
        extras: &CircuitExtras,
    ) -> Result<CircuitInputSet, AssemblyError> {
        CircuitInputSet::assemble(&AssemblyInputs {
            circuit,
            binding: &binding(),
            witness,
            signer_set: &signer_set(),
            signer_index,
            extras,
        })
    }

    #[test]
    fn vector_length_is_independent_of_transaction_length() {
        for len in [1, 120, MAX_RAW_TX_LEN] {
            let set =
                assemble(CircuitKind::CoinbaseKyc, &witness(len), 0, &CircuitExtras::None).unwrap();
            assert_eq!(set.values().len(), CircuitKind::CoinbaseKyc.input_len());
            assert_eq!(set.field(InputField::TxLength).unwrap(), &[U256::from(len)]);

            let tx = set.field(InputField::RawTransaction).unwrap();
            assert!(tx[..len].iter().all(|v| *v == U256::from(0xff)));
            assert!(tx[len..].iter().all(|v| v.is_zero()));
        }
    }

    #[test]
    fn oversize_and_empty_transactions_are_rejected() {
        let oversize = witness(MAX_RAW_TX_LEN + 1);
        let err =
            assemble(CircuitKind::CoinbaseKyc, &oversize, 0, &CircuitExtras::None).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::TransactionTooLong { len } if len == MAX_RAW_TX_LEN + 1
        ));

        let err =
            assemble(CircuitKind::CoinbaseKyc, &witness(0), 0, &CircuitExtras::None).unwrap_err();
        assert!(matches!(err, AssemblyError::EmptyTransaction));
    }

    #[test]
    fn signer_index_out_of_range() {
        let err =
            assemble(CircuitKind::CoinbaseKyc, &witness(100), 3, &CircuitExtras::None).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::SignerIndexOutOfRange { index: 3, len: 3 }
        ));
    }

    #[test]
    fn public_bindings_lead_the_vector() {
        let set =
            assemble(CircuitKind::CoinbaseKyc, &witness(100), 2, &CircuitExtras::None).unwrap();
        let b = binding();
        let expected: Vec<U256> = b.signal_hash.iter().map(|x| U256::from(*x)).collect();
        assert_eq!(&set.values()[..32], expected.as_slice());
        assert_eq!(set.public_inputs().len(), 128);

        let root: Vec<U256> = signer_set().root().iter().map(|x| U256::from(*x)).collect();
        assert_eq!(set.field(InputField::SignerListMerkleRoot).unwrap(), root.as_slice());
        assert_eq!(set.field(InputField::SignerLeafIndex).unwrap(), &[U256::from(2)]);
        assert_eq!(set.field(InputField::SignerProofDepth).unwrap(), &[U256::from(2)]);

        let proof = set.field(InputField::SignerMerkleProof).unwrap();
        assert!(proof[64..].iter().all(|v| v.is_zero()));
    }

    #[test]
    fn country_inputs() {
        let extras = CircuitExtras::Country {
            countries: vec!["US".into(), "KR".into()],
            is_included: true,
        };
        let set = assemble(CircuitKind::CoinbaseCountry, &witness(200), 1, &extras).unwrap();
        assert_eq!(set.values().len(), CircuitKind::CoinbaseCountry.input_len());
        assert_eq!(set.public_inputs().len(), 150);

        let list = set.field(InputField::CountryList).unwrap();
        let expected: Vec<U256> = b"USKR".iter().map(|x| U256::from(*x)).collect();
        assert_eq!(&list[..4], expected.as_slice());
        assert!(list[4..].iter().all(|v| v.is_zero()));
        assert_eq!(set.field(InputField::CountryListLength).unwrap(), &[U256::from(2)]);
        assert_eq!(set.field(InputField::IsIncluded).unwrap(), &[U256::from(1)]);
    }

    #[test]
    fn country_circuit_requires_valid_list() {
        let err = assemble(CircuitKind::CoinbaseCountry, &witness(200), 0, &CircuitExtras::None)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::MissingCountryList(_)));

        let too_many = CircuitExtras::Country {
            countries: vec!["US".to_string(); MAX_COUNTRIES + 1],
            is_included: false,
        };
        assert!(matches!(
            assemble(CircuitKind::CoinbaseCountry, &witness(200), 0, &too_many),
            Err(AssemblyError::InvalidCountryList(_))
        ));

        assert!(check_country_list(&["us".to_string()]).is_err());
        assert!(check_country_list(&["USA".to_string()]).is_err());
        assert!(check_country_list(&[]).is_err());
    }

    #[test]
    fn age_inputs() {
        let extras = CircuitExtras::Age {
            min_age: 18,
            reference_year: 2026,
        };
        let set = assemble(CircuitKind::AgeThreshold, &witness(150), 0, &extras).unwrap();
        assert_eq!(set.values().len(), CircuitKind::AgeThreshold.input_len());
        assert_eq!(set.public_inputs().len(), 130);
        assert_eq!(set.field(InputField::MinAge).unwrap(), &[U256::from(18)]);
        assert_eq!(set.field(InputField::ReferenceYear).unwrap(), &[U256::from(2026)]);
        assert!(set.field(InputField::CountryList).is_none());
    }

    #[test]
    fn age_bounds_are_range_checked() {
        let err = assemble(CircuitKind::AgeThreshold, &witness(150), 0, &CircuitExtras::None)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::MissingAgeBounds(_)));

        let too_old = CircuitExtras::Age {
            min_age: 121,
            reference_year: 2026,
        };
        assert!(matches!(
            assemble(CircuitKind::AgeThreshold, &witness(150), 0, &too_old),
            Err(AssemblyError::OutOfRange {
                field: "minAge",
                value: 121,
                min: 1,
                max: 120
            })
        ));

        assert!(check_age_bounds(1, 1900).is_ok());
        assert!(check_age_bounds(120, 2200).is_ok());
        assert!(check_age_bounds(0, 2026).is_err());
        assert!(matches!(
            check_age_bounds(18, 1899),
            Err(AssemblyError::OutOfRange {
                field: "referenceYear",
                ..
            })
        ));
        assert!(check_age_bounds(18, 2201).is_err());
    }

    #[test]
    fn hex_rendering() {
        let set = assemble(CircuitKind::CoinbaseKyc, &witness(1), 0, &CircuitExtras::None).unwrap();
        let hex = set.to_hex_strings();
        assert_eq!(hex.len(), set.values().len());
        assert!(hex.iter().all(|h| h.starts_with("0x")));
    }
}
