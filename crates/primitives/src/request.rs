//! Proof requests received from third-party applications and the responses sent back to them.
//!
//! Requests arrive from untrusted sources. Every field is deserialized leniently so that a request with a
//! recoverable `requestId` and `callbackUrl` can still be answered with an error. Semantic checks happen in
//! [`ProofRequest::validate`].

use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    AssemblyError, CircuitExtras, CircuitKind, VerificationType, check_age_bounds,
    check_country_list,
};

/// Reasons a proof request is rejected before any work is done for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestValidationError {
    /// A required field is absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// The request names a circuit that is not supported.
    #[error("unknown circuit: {0}")]
    UnknownCircuit(String),
    /// The scope string is empty.
    #[error("scope must not be empty")]
    EmptyScope,
    /// `userAddress` is not a 20-byte hex address.
    #[error("invalid user address: {0}")]
    InvalidUserAddress(String),
    /// `signalHash` is not a 32-byte hex value.
    #[error("invalid signal hash: {0}")]
    InvalidSignalHash(String),
    /// The country list does not satisfy the country circuit.
    #[error("invalid country list: {0}")]
    InvalidCountryList(String),
    /// A numeric input is outside the range its circuit accepts.
    #[error("{field} = {value} is out of range, expected {min}..={max}")]
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
    /// The callback is not an absolute http(s) URL.
    #[error("invalid callback url: {0}")]
    InvalidCallbackUrl(String),
    /// The request expired before it was handled.
    #[error("request expired at {expires_at} (now {now})")]
    Expired {
        /// Expiry in epoch milliseconds.
        expires_at: u64,
        /// Evaluation time in epoch milliseconds.
        now: u64,
    },
}

impl From<AssemblyError> for RequestValidationError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::OutOfRange {
                field,
                value,
                min,
                max,
            } => Self::OutOfRange {
                field,
                value,
                min,
                max,
            },
            AssemblyError::InvalidCountryList(reason) => Self::InvalidCountryList(reason),
            other => Self::InvalidCountryList(other.to_string()),
        }
    }
}

/// Result of validating a request, in the shape shown to callers that do not work with `Result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether the request may be presented to the user.
    pub valid: bool,
    /// Human readable rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), RequestValidationError>> for ValidationOutcome {
    fn from(result: Result<(), RequestValidationError>) -> Self {
        match result {
            Ok(()) => Self {
                valid: true,
                error: None,
            },
            Err(err) => Self {
                valid: false,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Circuit-specific inputs supplied by the requester.
///
/// Only `scope` is required by every circuit. Values the proof commits to are re-derived locally where
/// possible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitInputs {
    /// Application-chosen scope string.
    #[serde(default)]
    pub scope: String,
    /// Wallet the requester expects the proof for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    /// Explicit signal hash. Derived from wallet and scope when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_hash: Option<String>,
    /// ISO 3166-1 alpha-2 codes for the country circuit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_list: Option<Vec<String>>,
    /// Inclusion or exclusion semantics for the country circuit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_included: Option<bool>,
    /// Age the holder must have reached, for the age threshold circuit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u64>,
    /// Year the age is evaluated in, for the age threshold circuit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_year: Option<u64>,
}

impl CircuitInputs {
    /// Parses the optional `userAddress`.
    ///
    /// # Errors
    /// Returns [`RequestValidationError::InvalidUserAddress`] unless the value is `0x` followed by 40 hex
    /// characters.
    pub fn user_address(&self) -> Result<Option<Address>, RequestValidationError> {
        let Some(raw) = self.user_address.as_deref() else {
            return Ok(None);
        };
        if raw.len() != 42 || !raw.starts_with("0x") {
            return Err(RequestValidationError::InvalidUserAddress(raw.to_string()));
        }
        Address::from_str(raw)
            .map(Some)
            .map_err(|_| RequestValidationError::InvalidUserAddress(raw.to_string()))
    }

    /// Parses the optional `signalHash`.
    ///
    /// # Errors
    /// Returns [`RequestValidationError::InvalidSignalHash`] if the value is not 32 bytes of hex.
    pub fn signal_hash(&self) -> Result<Option<B256>, RequestValidationError> {
        self.signal_hash
            .as_deref()
            .map(|raw| {
                B256::from_str(raw)
                    .map_err(|_| RequestValidationError::InvalidSignalHash(raw.to_string()))
            })
            .transpose()
    }

    /// Extracts the circuit-specific public data.
    ///
    /// # Errors
    /// Returns an error if a circuit is missing its data, the country list is malformed or an age bound
    /// is out of range.
    pub fn extras(&self, circuit: CircuitKind) -> Result<CircuitExtras, RequestValidationError> {
        match circuit {
            CircuitKind::CoinbaseKyc => Ok(CircuitExtras::None),
            CircuitKind::CoinbaseCountry => {
                let countries = self
                    .country_list
                    .clone()
                    .ok_or(RequestValidationError::MissingField("countryList"))?;
                let is_included = self
                    .is_included
                    .ok_or(RequestValidationError::MissingField("isIncluded"))?;
                check_country_list(&countries)?;
                Ok(CircuitExtras::Country {
                    countries,
                    is_included,
                })
            }
            CircuitKind::AgeThreshold => {
                let min_age = self
                    .min_age
                    .ok_or(RequestValidationError::MissingField("minAge"))?;
                let reference_year = self
                    .reference_year
                    .ok_or(RequestValidationError::MissingField("referenceYear"))?;
                check_age_bounds(min_age, reference_year)?;
                Ok(CircuitExtras::Age {
                    min_age,
                    reference_year,
                })
            }
        }
    }
}

/// A request to generate a proof on behalf of a third-party application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    /// Opaque identifier chosen by the requester.
    #[serde(default)]
    pub request_id: String,
    /// Wire identifier of the requested circuit.
    #[serde(default)]
    pub circuit: String,
    /// Circuit-specific inputs.
    #[serde(default)]
    pub inputs: CircuitInputs,
    /// Where the response is posted.
    #[serde(default)]
    pub callback_url: String,
    /// Message shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Display name of the requesting application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dapp_name: Option<String>,
    /// Icon URL of the requesting application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dapp_icon: Option<String>,
    /// Creation time in epoch milliseconds.
    #[serde(default)]
    pub created_at: u64,
    /// Expiry in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl ProofRequest {
    /// Resolves the requested circuit.
    ///
    /// # Errors
    /// Returns [`RequestValidationError::UnknownCircuit`] for unsupported identifiers.
    pub fn circuit_kind(&self) -> Result<CircuitKind, RequestValidationError> {
        if self.circuit.is_empty() {
            return Err(RequestValidationError::MissingField("circuit"));
        }
        CircuitKind::from_str(&self.circuit)
            .map_err(|_| RequestValidationError::UnknownCircuit(self.circuit.clone()))
    }

    /// Whether the request expired at `now` (epoch milliseconds).
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Checks that the request is complete and may be presented to the user.
    ///
    /// # Errors
    /// Returns the first [`RequestValidationError`] encountered.
    pub fn validate(&self, now: u64) -> Result<(), RequestValidationError> {
        if self.request_id.trim().is_empty() {
            return Err(RequestValidationError::MissingField("requestId"));
        }
        if self.callback_url.is_empty() {
            return Err(RequestValidationError::MissingField("callbackUrl"));
        }
        let callback = Url::parse(&self.callback_url)
            .map_err(|e| RequestValidationError::InvalidCallbackUrl(e.to_string()))?;
        if !matches!(callback.scheme(), "http" | "https") {
            return Err(RequestValidationError::InvalidCallbackUrl(format!(
                "unsupported scheme `{}`",
                callback.scheme()
            )));
        }

        let circuit = self.circuit_kind()?;
        if self.inputs.scope.is_empty() {
            return Err(RequestValidationError::EmptyScope);
        }
        self.inputs.user_address()?;
        self.inputs.signal_hash()?;
        self.inputs.extras(circuit)?;

        if let Some(expires_at) = self.expires_at.filter(|_| self.is_expired(now)) {
            return Err(RequestValidationError::Expired { expires_at, now });
        }
        Ok(())
    }
}

/// Final status reported to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResponseStatus {
    /// A proof was generated.
    Completed,
    /// Processing failed.
    Error,
    /// The user declined the request.
    Cancelled,
}

/// Proof data carried by a completed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResult {
    /// How the proof was verified before sending.
    pub verification_type: VerificationType,
    /// Outcome of that verification.
    pub verification_result: bool,
    /// Generation start in epoch milliseconds.
    pub started_at: u64,
    /// Generation end in epoch milliseconds.
    pub completed_at: u64,
    /// Request expiry echoed back, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Proof bytes without the public input prefix.
    pub proof: Bytes,
    /// Public inputs as 32-byte words.
    pub public_inputs: Vec<B256>,
    /// Number of public inputs.
    pub num_public_inputs: usize,
    /// Scope-specific nullifier of the holder.
    pub nullifier: B256,
    /// Verifier contract for on-chain checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_address: Option<Address>,
    /// Chain the verifier lives on.
    pub chain_id: u64,
    /// The request inputs, echoed back.
    pub inputs: CircuitInputs,
}

/// The message posted to a request's callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    /// Identifier of the answered request.
    pub request_id: String,
    /// Circuit identifier of the answered request.
    pub circuit: String,
    /// Outcome.
    pub status: ResponseStatus,
    /// Error or cancellation reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Proof data for completed responses.
    #[serde(flatten)]
    pub result: Option<ProofResult>,
}

impl ProofResponse {
    /// A response carrying a generated proof.
    #[must_use]
    pub fn completed(request: &ProofRequest, result: ProofResult) -> Self {
        Self {
            request_id: request.request_id.clone(),
            circuit: request.circuit.clone(),
            status: ResponseStatus::Completed,
            error: None,
            result: Some(result),
        }
    }

    /// A response reporting a failure.
    #[must_use]
    pub fn error(request: &ProofRequest, message: impl Into<String>) -> Self {
        Self {
            request_id: request.request_id.clone(),
            circuit: request.circuit.clone(),
            status: ResponseStatus::Error,
            error: Some(message.into()),
            result: None,
        }
    }

    /// A response reporting that the user declined.
    #[must_use]
    pub fn cancelled(request: &ProofRequest, reason: impl Into<String>) -> Self {
        Self {
            request_id: request.request_id.clone(),
            circuit: request.circuit.clone(),
            status: ResponseStatus::Cancelled,
            error: Some(reason.into()),
            result: None,
        }
    }
}
