use std::time::Duration;

use attest_id_primitives::{ProofRequest, ProofResponse, ProofResult};
use tracing::instrument;

/// Upper bound on a single callback delivery unless configured otherwise.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts proof responses to request callbacks.
///
/// Each response is sent once and bounded by a timeout. Failures are logged and reported as
/// `false`; nothing is retried.
#[derive(Debug, Clone)]
pub struct ResponseDispatcher {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl Default for ResponseDispatcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl ResponseDispatcher {
    /// Creates a dispatcher using `http_client`.
    #[must_use]
    pub const fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Bounds every delivery by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends a completed response carrying `result`.
    pub async fn send_completed(&self, request: &ProofRequest, result: ProofResult) -> bool {
        self.send(request, &ProofResponse::completed(request, result))
            .await
    }

    /// Sends an error response.
    pub async fn send_error(&self, request: &ProofRequest, message: impl Into<String>) -> bool {
        self.send(request, &ProofResponse::error(request, message))
            .await
    }

    /// Sends a cancellation.
    pub async fn send_cancelled(&self, request: &ProofRequest, reason: impl Into<String>) -> bool {
        self.send(request, &ProofResponse::cancelled(request, reason))
            .await
    }

    #[instrument(
        level = "info",
        skip_all,
        fields(request_id = %request.request_id, status = %response.status)
    )]
    async fn send(&self, request: &ProofRequest, response: &ProofResponse) -> bool {
        if request.callback_url.is_empty() {
            tracing::warn!("request has no callback url");
            return false;
        }

        let resp = match self
            .http_client
            .post(&request.callback_url)
            .timeout(self.timeout)
            .json(response)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(
                    callback = %request.callback_url,
                    timed_out = e.is_timeout(),
                    error = %e,
                    "failed to deliver response"
                );
                return false;
            }
        };

        let status = resp.status();
        if status.is_success() {
            tracing::info!("response delivered");
            true
        } else {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                callback = %request.callback_url,
                status = status.as_u16(),
                body = %body,
                "callback rejected response"
            );
            false
        }
    }
}
