//! HTTP client for the off-chain order-book submission endpoint.
//!
//! Network and timeout failures are retried with exponential back-off up to
//! a fixed attempt count; anything else (including the order-book's own
//! rejection responses) is surfaced to the caller directly.

use {
    backoff::{backoff::Backoff, ExponentialBackoff},
    crate::domain::poll_result::SignedOrder,
    reqwest::{Client, StatusCode},
    serde::Serialize,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("order-book request failed after retries: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("order-book request failed after retries: {0}")]
    ServerError(StatusCode),
    #[error("order-book rejected the order ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
}

/// What happened when a discrete order was handed to the order-book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The order-book accepted the order.
    Submitted,
    /// The order-book reports this order already exists; an idempotent
    /// re-submission, treated identically to [`SubmissionOutcome::Submitted`]
    /// by callers.
    Duplicate,
}

#[derive(Debug, Serialize)]
struct SubmitOrderRequest<'a> {
    order: &'a str,
    signature: &'a str,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait OrderBookApi: Send + Sync {
    async fn submit_order(&self, order: &SignedOrder) -> Result<SubmissionOutcome, Error>;
}

/// Real implementation. One instance is shared across every conditional
/// order poll for a chain; `reqwest::Client` is internally pooled and cheap
/// to clone.
pub struct HttpOrderBookApi {
    base: url::Url,
    client: Client,
    max_attempts: u32,
    dry_run: bool,
}

impl HttpOrderBookApi {
    pub fn new(base: url::Url, client: Client, max_attempts: u32, dry_run: bool) -> Self {
        Self {
            base,
            client,
            max_attempts,
            dry_run,
        }
    }

    fn is_duplicate_order(status: StatusCode, body: &str) -> bool {
        status == StatusCode::BAD_REQUEST && body.to_lowercase().contains("duplicate")
    }

    /// A transient result (timeout, connect failure, 5xx) is retried by the
    /// caller up to its attempt budget; anything else is terminal.
    async fn try_post_order(&self, order: &SignedOrder) -> Result<SubmissionOutcome, Transient> {
        let url = shared_url::join(&self.base, "api/v1/orders");
        let body = SubmitOrderRequest {
            order: &const_hex::encode_prefixed(order.order.as_ref()),
            signature: &const_hex::encode_prefixed(order.signature.as_ref()),
        };

        let response = match self.client.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() => {
                return Err(Transient::Retry(Error::Transport(err)))
            }
            Err(err) => return Err(Transient::Terminal(Error::Transport(err))),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(SubmissionOutcome::Submitted);
        }

        let response_body = response.text().await.unwrap_or_default();
        if Self::is_duplicate_order(status, &response_body) {
            return Ok(SubmissionOutcome::Duplicate);
        }
        if status.is_server_error() {
            return Err(Transient::Retry(Error::ServerError(status)));
        }
        Err(Transient::Terminal(Error::Rejected {
            status,
            body: response_body,
        }))
    }
}

/// Distinguishes a retry-worthy failure from the final error to surface.
enum Transient {
    Retry(Error),
    Terminal(Error),
}

#[async_trait::async_trait]
impl OrderBookApi for HttpOrderBookApi {
    async fn submit_order(&self, order: &SignedOrder) -> Result<SubmissionOutcome, Error> {
        if self.dry_run {
            tracing::info!(uid = %order.uid(), "dry run: suppressing order-book submission");
            return Ok(SubmissionOutcome::Submitted);
        }

        let mut backoff = ExponentialBackoff::default();
        for attempt in 1..=self.max_attempts {
            match self.try_post_order(order).await {
                Ok(outcome) => return Ok(outcome),
                Err(Transient::Terminal(err)) => return Err(err),
                Err(Transient::Retry(err)) if attempt == self.max_attempts => return Err(err),
                Err(Transient::Retry(_)) => {
                    let delay = backoff.next_backoff().unwrap_or_default();
                    tracing::warn!(attempt, ?delay, "retrying order-book submission");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        unreachable!("loop always returns or errors on its last attempt")
    }
}

/// Minimal URL-joining helper, standing in for an internal `shared`-crate
/// equivalent this workspace does not carry.
mod shared_url {
    pub fn join(base: &url::Url, segment: &str) -> url::Url {
        let mut url = base.clone();
        {
            let mut segments = url.path_segments_mut().expect("base url cannot be a base");
            segments.pop_if_empty();
            for part in segment.split('/') {
                segments.push(part);
            }
        }
        url
    }
}
