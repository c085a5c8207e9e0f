//! Supported circuits and their fixed input layouts.
//!
//! The input layout of a circuit is a versioned contract with the circuit definition itself. A single
//! re-ordered or mis-sized field is only detected at proving time, so any change here must ship together
//! with a new circuit identifier.

use std::ops::RangeInclusive;

use alloy_primitives::{Address, B256, b256, keccak256};
use serde::{Deserialize, Serialize};

/// Maximum length of the raw signed attestation transaction accepted by the circuits.
pub const MAX_RAW_TX_LEN: usize = 300;

/// Maximum depth of the authorized signer Merkle tree. Shorter proofs are padded with the zero hash.
pub const MAX_SIGNER_PROOF_DEPTH: usize = 8;

/// Maximum number of country codes carried by the country circuit.
pub const MAX_COUNTRIES: usize = 10;

/// Width in bytes of a single country code slot (ISO 3166-1 alpha-2).
pub const COUNTRY_CODE_LEN: usize = 2;

/// Accepted minimum ages of the age threshold circuit.
pub const MIN_AGE_RANGE: RangeInclusive<u64> = 1..=120;

/// Accepted reference years of the age threshold circuit.
pub const REFERENCE_YEAR_RANGE: RangeInclusive<u64> = 1900..=2200;

/// Schema definition of the birth-year attestation.
pub const BIRTH_YEAR_SCHEMA: &str = "uint16 birthYear";

/// EAS schema UID: `keccak256(schema || resolver || revocable)`.
#[must_use]
pub fn eas_schema_uid(schema: &str, resolver: Address, revocable: bool) -> B256 {
    let mut packed = Vec::with_capacity(schema.len() + 21);
    packed.extend_from_slice(schema.as_bytes());
    packed.extend_from_slice(resolver.as_slice());
    packed.push(u8::from(revocable));
    keccak256(packed)
}

/// The set of circuits a proof request may name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum CircuitKind {
    /// Proves the holder owns a wallet with a verified-account (KYC) attestation.
    #[serde(rename = "coinbase_attestation")]
    #[strum(serialize = "coinbase_attestation")]
    CoinbaseKyc,
    /// Proves the holder's attested country is (or is not) in a list of countries.
    #[serde(rename = "coinbase_country_attestation")]
    #[strum(serialize = "coinbase_country_attestation")]
    CoinbaseCountry,
    /// Proves the holder reached a minimum age in a reference year, from an attested birth year.
    #[serde(rename = "age_threshold_attestation")]
    #[strum(serialize = "age_threshold_attestation")]
    AgeThreshold,
}

/// A single named field of a circuit's flat input vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    /// Hash the user signs and the proof commits to.
    SignalHash,
    /// Merkle root of the authorized signer set.
    SignerListMerkleRoot,
    /// Hash of the application scope string.
    Scope,
    /// Nullifier binding the wallet to the scope.
    Nullifier,
    /// Fixed number of country code slots.
    CountryList,
    /// Number of meaningful country code slots.
    CountryListLength,
    /// Inclusion (`1`) or exclusion (`0`) semantics of the country list.
    IsIncluded,
    /// Minimum age the holder must have reached.
    MinAge,
    /// Year the age is evaluated in.
    ReferenceYear,
    /// The holder's wallet address.
    UserAddress,
    /// The holder's signature over the signal hash (`r || s`).
    UserSignature,
    /// X coordinate of the holder's public key.
    UserPubkeyX,
    /// Y coordinate of the holder's public key.
    UserPubkeyY,
    /// Signed attestation transaction, zero padded to [`MAX_RAW_TX_LEN`].
    RawTransaction,
    /// Unpadded length of the attestation transaction.
    TxLength,
    /// X coordinate of the attestation signer's public key.
    IssuerPubkeyX,
    /// Y coordinate of the attestation signer's public key.
    IssuerPubkeyY,
    /// Signer inclusion proof, zero padded to [`MAX_SIGNER_PROOF_DEPTH`] siblings.
    SignerMerkleProof,
    /// Index of the signer leaf in the authorized signer set.
    SignerLeafIndex,
    /// Number of meaningful siblings in the signer inclusion proof.
    SignerProofDepth,
}

impl InputField {
    /// Number of field elements this input occupies in the flat vector.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::SignalHash
            | Self::SignerListMerkleRoot
            | Self::Scope
            | Self::Nullifier
            | Self::UserPubkeyX
            | Self::UserPubkeyY
            | Self::IssuerPubkeyX
            | Self::IssuerPubkeyY => 32,
            Self::CountryList => MAX_COUNTRIES * COUNTRY_CODE_LEN,
            Self::UserAddress => 20,
            Self::UserSignature => 64,
            Self::RawTransaction => MAX_RAW_TX_LEN,
            Self::SignerMerkleProof => MAX_SIGNER_PROOF_DEPTH * 32,
            Self::CountryListLength
            | Self::IsIncluded
            | Self::MinAge
            | Self::ReferenceYear
            | Self::TxLength
            | Self::SignerLeafIndex
            | Self::SignerProofDepth => 1,
        }
    }

    /// Whether the field is a public input of the circuit.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(
            self,
            Self::SignalHash
                | Self::SignerListMerkleRoot
                | Self::Scope
                | Self::Nullifier
                | Self::CountryList
                | Self::CountryListLength
                | Self::IsIncluded
                | Self::MinAge
                | Self::ReferenceYear
        )
    }
}

const PRIVATE_WITNESSES: [InputField; 11] = [
    InputField::UserAddress,
    InputField::UserSignature,
    InputField::UserPubkeyX,
    InputField::UserPubkeyY,
    InputField::RawTransaction,
    InputField::TxLength,
    InputField::IssuerPubkeyX,
    InputField::IssuerPubkeyY,
    InputField::SignerMerkleProof,
    InputField::SignerLeafIndex,
    InputField::SignerProofDepth,
];

const KYC_LAYOUT: [InputField; 15] = [
    InputField::SignalHash,
    InputField::SignerListMerkleRoot,
    InputField::Scope,
    InputField::Nullifier,
    PRIVATE_WITNESSES[0],
    PRIVATE_WITNESSES[1],
    PRIVATE_WITNESSES[2],
    PRIVATE_WITNESSES[3],
    PRIVATE_WITNESSES[4],
    PRIVATE_WITNESSES[5],
    PRIVATE_WITNESSES[6],
    PRIVATE_WITNESSES[7],
    PRIVATE_WITNESSES[8],
    PRIVATE_WITNESSES[9],
    PRIVATE_WITNESSES[10],
];

const COUNTRY_LAYOUT: [InputField; 18] = [
    InputField::SignalHash,
    InputField::SignerListMerkleRoot,
    InputField::Scope,
    InputField::Nullifier,
    InputField::CountryList,
    InputField::CountryListLength,
    InputField::IsIncluded,
    PRIVATE_WITNESSES[0],
    PRIVATE_WITNESSES[1],
    PRIVATE_WITNESSES[2],
    PRIVATE_WITNESSES[3],
    PRIVATE_WITNESSES[4],
    PRIVATE_WITNESSES[5],
    PRIVATE_WITNESSES[6],
    PRIVATE_WITNESSES[7],
    PRIVATE_WITNESSES[8],
    PRIVATE_WITNESSES[9],
    PRIVATE_WITNESSES[10],
];

const AGE_LAYOUT: [InputField; 17] = [
    InputField::SignalHash,
    InputField::SignerListMerkleRoot,
    InputField::Scope,
    InputField::Nullifier,
    InputField::MinAge,
    InputField::ReferenceYear,
    PRIVATE_WITNESSES[0],
    PRIVATE_WITNESSES[1],
    PRIVATE_WITNESSES[2],
    PRIVATE_WITNESSES[3],
    PRIVATE_WITNESSES[4],
    PRIVATE_WITNESSES[5],
    PRIVATE_WITNESSES[6],
    PRIVATE_WITNESSES[7],
    PRIVATE_WITNESSES[8],
    PRIVATE_WITNESSES[9],
    PRIVATE_WITNESSES[10],
];

impl CircuitKind {
    /// The wire identifier of the circuit.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::CoinbaseKyc => "coinbase_attestation",
            Self::CoinbaseCountry => "coinbase_country_attestation",
            Self::AgeThreshold => "age_threshold_attestation",
        }
    }

    /// Domain tag mixed into the signal hash.
    ///
    /// Changing this value changes every nullifier derived for the circuit.
    #[must_use]
    pub const fn binding_tag(self) -> &'static str {
        match self {
            Self::CoinbaseKyc => "coinbase_attestation:v1",
            Self::CoinbaseCountry => "coinbase_country_attestation:v1",
            Self::AgeThreshold => "age_threshold_attestation:v1",
        }
    }

    /// The EAS schema identifier of the attestation the circuit is bound to.
    #[must_use]
    pub fn schema_id(self) -> B256 {
        match self {
            Self::CoinbaseKyc => {
                b256!("f8b05c79f090979bf4a80270aba232dff11a10d9ca55c4f88de95317970f0de9")
            }
            Self::CoinbaseCountry => {
                b256!("1801901fabd0e6189356b4fb52bb0ab855276d84f7ec140839fbd1f6801ca065")
            }
            Self::AgeThreshold => eas_schema_uid(BIRTH_YEAR_SCHEMA, Address::ZERO, true),
        }
    }

    /// Solidity signature of the issuer contract function that emits the attestation.
    #[must_use]
    pub const fn attestation_function(self) -> &'static str {
        match self {
            Self::CoinbaseKyc => "attestAccount(address)",
            Self::CoinbaseCountry => "attestCountry(address,string)",
            Self::AgeThreshold => "attestBirthYear(address,uint16)",
        }
    }

    /// The 4-byte selector the attestation transaction must call.
    #[must_use]
    pub fn selector(self) -> [u8; 4] {
        let hash = keccak256(self.attestation_function().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Ordered layout of the circuit's flat input vector.
    #[must_use]
    pub const fn layout(self) -> &'static [InputField] {
        match self {
            Self::CoinbaseKyc => &KYC_LAYOUT,
            Self::CoinbaseCountry => &COUNTRY_LAYOUT,
            Self::AgeThreshold => &AGE_LAYOUT,
        }
    }

    /// Total number of field elements in the flat input vector.
    #[must_use]
    pub fn input_len(self) -> usize {
        self.layout().iter().map(|f| f.width()).sum()
    }

    /// Number of field elements exposed as public inputs of the proof.
    #[must_use]
    pub fn num_public_inputs(self) -> usize {
        self.layout()
            .iter()
            .filter(|f| f.is_public())
            .map(|f| f.width())
            .sum()
    }
}
