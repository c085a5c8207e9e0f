//! Inbound proof requests.
//!
//! Requests arrive as `<scheme>://proof-request` URLs from deep links or QR codes, either as one base64url
//! JSON blob (`?data=`) or as individual query parameters with base64url JSON `inputs`. Parsing never fails
//! loudly: anything malformed yields `None`.

use std::time::Duration;

use attest_id_primitives::{
    CircuitInputs, ProofRequest, RequestValidationError, ValidationOutcome, now_millis,
};
use base64::{Engine as _, prelude::BASE64_URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use url::Url;

use crate::config::Config;

/// Host (or path) of proof request URLs.
pub const PROOF_REQUEST_HOST: &str = "proof-request";

/// How a request is packed into a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEncoding {
    /// The whole request as base64url JSON in `data`.
    Data,
    /// One query parameter per field, `inputs` as base64url JSON.
    Params,
}

#[derive(Debug, thiserror::Error)]
enum DecodeError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected scheme `{0}`")]
    Scheme(String),
    #[error("not a proof request URL")]
    Target,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid `{0}` parameter")]
    Param(&'static str),
}

/// Decodes base64 that may be URL-safe or standard, padded or not.
///
/// Query decoding turns a literal `+` into a space, so spaces are read as `+` as well.
fn decode_base64(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = raw
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' | ' ' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    BASE64_URL_SAFE_NO_PAD.decode(normalized)
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let text = String::from_utf8(decode_base64(raw)?)?;
    Ok(serde_json::from_str(&text)?)
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(value)?))
}

fn parse_millis(raw: &str, name: &'static str) -> Result<u64, DecodeError> {
    raw.trim().parse().map_err(|_| DecodeError::Param(name))
}

/// Errors building a request URL.
#[derive(Debug, thiserror::Error)]
pub enum BuildUrlError {
    /// The configured scheme does not form a valid URL.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// The request could not be serialized.
    #[error("failed to serialize request: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses, validates and builds proof request URLs for one URL scheme.
#[derive(Debug, Clone)]
pub struct RequestGateway {
    scheme: String,
}

impl RequestGateway {
    /// Creates a gateway for `scheme`.
    #[must_use]
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }

    /// Creates a gateway for the configured scheme.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.url_scheme().clone())
    }

    /// The accepted URL scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Parses a proof request URL. Returns `None` for anything malformed.
    #[must_use]
    pub fn parse(&self, raw_url: &str) -> Option<ProofRequest> {
        match self.decode(raw_url) {
            Ok(request) => {
                tracing::debug!(
                    request_id = %request.request_id,
                    circuit = %request.circuit,
                    "parsed proof request"
                );
                Some(request)
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed proof request");
                None
            }
        }
    }

    /// Checks that `request` may be shown to the user at `now` (epoch milliseconds).
    ///
    /// # Errors
    /// Returns the first [`RequestValidationError`] found.
    pub fn validate(
        &self,
        request: &ProofRequest,
        now: u64,
    ) -> Result<(), RequestValidationError> {
        request.validate(now)
    }

    /// [`Self::validate`] in its `{ valid, error }` form.
    #[must_use]
    pub fn validation_outcome(&self, request: &ProofRequest, now: u64) -> ValidationOutcome {
        self.validate(request, now).into()
    }

    /// Encodes `request` as a proof request URL that [`Self::parse`] reads back unchanged.
    ///
    /// # Errors
    /// See [`BuildUrlError`].
    pub fn build_url(
        &self,
        request: &ProofRequest,
        encoding: RequestEncoding,
    ) -> Result<String, BuildUrlError> {
        let mut url = Url::parse(&format!("{}://{PROOF_REQUEST_HOST}", self.scheme))?;
        {
            let mut query = url.query_pairs_mut();
            match encoding {
                RequestEncoding::Data => {
                    query.append_pair("data", &encode_json(request)?);
                }
                RequestEncoding::Params => {
                    query
                        .append_pair("requestId", &request.request_id)
                        .append_pair("circuit", &request.circuit)
                        .append_pair("callbackUrl", &request.callback_url)
                        .append_pair("inputs", &encode_json(&request.inputs)?)
                        .append_pair("createdAt", &request.created_at.to_string());
                    if let Some(message) = &request.message {
                        query.append_pair("message", message);
                    }
                    if let Some(dapp_name) = &request.dapp_name {
                        query.append_pair("dappName", dapp_name);
                    }
                    if let Some(dapp_icon) = &request.dapp_icon {
                        query.append_pair("dappIcon", dapp_icon);
                    }
                    if let Some(expires_at) = request.expires_at {
                        query.append_pair("expiresAt", &expires_at.to_string());
                    }
                }
            }
        }
        Ok(url.into())
    }

    fn decode(&self, raw_url: &str) -> Result<ProofRequest, DecodeError> {
        let url = Url::parse(raw_url.trim())?;
        if !url.scheme().eq_ignore_ascii_case(&self.scheme) {
            return Err(DecodeError::Scheme(url.scheme().to_string()));
        }
        let targets_request = url.host_str() == Some(PROOF_REQUEST_HOST)
            || url.path().trim_matches('/') == PROOF_REQUEST_HOST;
        if !targets_request {
            return Err(DecodeError::Target);
        }

        let mut request = if let Some((_, data)) = url.query_pairs().find(|(k, _)| k == "data") {
            decode_json::<ProofRequest>(&data)?
        } else {
            let mut request = ProofRequest::default();
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    "requestId" => request.request_id = value.into_owned(),
                    "circuit" => request.circuit = value.into_owned(),
                    "callbackUrl" => request.callback_url = value.into_owned(),
                    "inputs" => request.inputs = decode_json::<CircuitInputs>(&value)?,
                    "message" => request.message = Some(value.into_owned()),
                    "dappName" => request.dapp_name = Some(value.into_owned()),
                    "dappIcon" => request.dapp_icon = Some(value.into_owned()),
                    "createdAt" => request.created_at = parse_millis(&value, "createdAt")?,
                    "expiresAt" => request.expires_at = Some(parse_millis(&value, "expiresAt")?),
                    _ => {}
                }
            }
            request
        };

        if request.created_at == 0 {
            request.created_at = now_millis();
        }
        Ok(request)
    }
}

/// Outcome of offering a request to the [`ActiveRequestSlot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arbitration {
    /// The slot was empty; the request is now active.
    Activated,
    /// The request replaced a different active request.
    Preempted {
        /// The request that was active before.
        previous: Box<ProofRequest>,
    },
    /// A request with the same id is already active; nothing changed.
    Ignored,
}

#[derive(Debug)]
struct ActiveEntry {
    request: ProofRequest,
    activated_at: u64,
}

/// Holds the single request currently presented to the user.
#[derive(Debug)]
pub struct ActiveRequestSlot {
    active: Mutex<Option<ActiveEntry>>,
    timeout: Duration,
}

impl ActiveRequestSlot {
    /// Creates an empty slot whose requests go stale after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            active: Mutex::new(None),
            timeout,
        }
    }

    /// Makes `request` the active request at `now` (epoch milliseconds).
    pub fn offer(&self, request: ProofRequest, now: u64) -> Arbitration {
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|entry| entry.request.request_id == request.request_id)
        {
            return Arbitration::Ignored;
        }

        let previous = active.replace(ActiveEntry {
            request,
            activated_at: now,
        });
        match previous {
            Some(entry) => Arbitration::Preempted {
                previous: Box::new(entry.request),
            },
            None => Arbitration::Activated,
        }
    }

    /// The active request.
    #[must_use]
    pub fn current(&self) -> Option<ProofRequest> {
        self.active.lock().as_ref().map(|entry| entry.request.clone())
    }

    /// Clears the slot if `request_id` is the active request, returning it.
    pub fn clear(&self, request_id: &str) -> Option<ProofRequest> {
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|entry| entry.request.request_id == request_id)
        {
            return active.take().map(|entry| entry.request);
        }
        None
    }

    /// Clears the slot if the active request timed out or expired at `now`, returning it.
    pub fn clear_if_stale(&self, now: u64) -> Option<ProofRequest> {
        let timeout = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut active = self.active.lock();
        let stale = active.as_ref().is_some_and(|entry| {
            now.saturating_sub(entry.activated_at) >= timeout || entry.request.is_expired(now)
        });
        if stale {
            active.take().map(|entry| entry.request)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_760_000_000_000;

    fn gateway() -> RequestGateway {
        RequestGateway::new("zkproofport")
    }

    fn country_request() -> ProofRequest {
        ProofRequest {
            request_id: "req-42".to_string(),
            circuit: "coinbase_country_attestation".to_string(),
            inputs: CircuitInputs {
                scope: "app:default".to_string(),
                country_list: Some(vec!["US".to_string(), "KR".to_string()]),
                is_included: Some(false),
                ..Default::default()
            },
            callback_url: "https://dapp.example/callback?session=9".to_string(),
            message: Some("Prove you are not in a listed country ✓".to_string()),
            dapp_name: Some("Démo dApp".to_string()),
            dapp_icon: None,
            created_at: NOW,
            expires_at: Some(NOW + 300_000),
        }
    }

    #[test]
    fn build_url_round_trips() {
        let request = country_request();
        for encoding in [RequestEncoding::Data, RequestEncoding::Params] {
            let url = gateway().build_url(&request, encoding).unwrap();
            assert!(url.starts_with("zkproofport://proof-request?"));
            assert_eq!(gateway().parse(&url), Some(request.clone()), "{encoding:?}");
        }
    }

    #[test]
    fn accepts_standard_and_padded_base64() {
        let json = serde_json::to_vec(&country_request()).unwrap();
        let standard = base64::prelude::BASE64_STANDARD.encode(&json);
        let url = format!("zkproofport://proof-request?data={}", urlencode(&standard));
        assert_eq!(gateway().parse(&url), Some(country_request()));

        let padded = base64::prelude::BASE64_URL_SAFE.encode(&json);
        let url = format!("zkproofport://proof-request?data={padded}");
        assert_eq!(gateway().parse(&url), Some(country_request()));
    }

    fn urlencode(value: &str) -> String {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }

    #[test]
    fn malformed_urls_yield_none() {
        let gateway = gateway();
        assert_eq!(gateway.parse("zkproofport://proof-request?data=%%%"), None);
        assert_eq!(gateway.parse("zkproofport://proof-request?data=bm90IGpzb24"), None);
        assert_eq!(
            gateway.parse("zkproofport://proof-request?requestId=a&inputs=***"),
            None
        );
        assert_eq!(
            gateway.parse("zkproofport://proof-request?requestId=a&createdAt=yesterday"),
            None
        );
        // 0xff 0xfe is not UTF-8
        assert_eq!(gateway.parse("zkproofport://proof-request?data=__4"), None);
        assert_eq!(gateway.parse("otherapp://proof-request?data=e30"), None);
        assert_eq!(gateway.parse("zkproofport://settings?data=e30"), None);
        assert_eq!(gateway.parse("not a url"), None);
    }

    #[test]
    fn missing_fields_fail_validation_not_parsing() {
        let request = gateway()
            .parse("zkproofport://proof-request?data=e30")
            .unwrap();
        assert!(request.created_at > 0);
        assert_eq!(
            gateway().validate(&request, NOW),
            Err(RequestValidationError::MissingField("requestId"))
        );
        assert!(!gateway().validation_outcome(&request, NOW).valid);
    }

    #[test]
    fn slot_arbitrates_between_requests() {
        let slot = ActiveRequestSlot::new(Duration::from_secs(600));
        let first = country_request();
        let second = ProofRequest {
            request_id: "req-43".to_string(),
            ..country_request()
        };

        assert_eq!(slot.offer(first.clone(), NOW), Arbitration::Activated);
        assert_eq!(slot.offer(first.clone(), NOW + 1), Arbitration::Ignored);
        assert_eq!(
            slot.offer(second.clone(), NOW + 2),
            Arbitration::Preempted {
                previous: Box::new(first.clone())
            }
        );
        assert_eq!(slot.current(), Some(second.clone()));

        assert_eq!(slot.clear(&first.request_id), None);
        assert_eq!(slot.clear(&second.request_id), Some(second));
        assert_eq!(slot.current(), None);
    }

    #[test]
    fn slot_expires_stale_requests() {
        let slot = ActiveRequestSlot::new(Duration::from_secs(600));
        slot.offer(
            ProofRequest {
                expires_at: None,
                ..country_request()
            },
            NOW,
        );
        assert_eq!(slot.clear_if_stale(NOW + 599_999), None);
        assert!(slot.clear_if_stale(NOW + 600_000).is_some());

        slot.offer(country_request(), NOW);
        assert!(slot.clear_if_stale(NOW + 300_000).is_some());
        assert_eq!(slot.current(), None);
    }
}
