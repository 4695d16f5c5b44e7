//! Payment gateway status client.
//!
//! Fetches the live transaction status for an order from the Midtrans
//! status API. The read path never depends on it: `fetch_with_fallback`
//! bounds the call with a timeout and returns `None` on any failure so the
//! caller keeps using the stored status.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{OrderError, OrderResult};
use crate::status::PaymentSnapshot;

/// Default bound on a single status fetch.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

pub const SANDBOX_BASE_URL: &str = "https://api.sandbox.midtrans.com";

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_status(&self, order_id: &str) -> OrderResult<PaymentSnapshot>;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the gateway base URL: ensure a scheme, strip trailing slashes
/// and a trailing `/v2` segment.
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/v2") {
        url.truncate(url.len() - 3);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Midtrans client
// ---------------------------------------------------------------------------

pub struct MidtransGateway {
    client: Client,
    base_url: String,
    auth_header: String,
}

impl MidtransGateway {
    pub fn new(base_url: &str, server_key: &str, timeout: Duration) -> OrderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrderError::Gateway(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            auth_header: format!("Basic {}", BASE64_STANDARD.encode(format!("{server_key}:"))),
        })
    }

    fn status_url(&self, order_id: &str) -> String {
        format!("{}/v2/{}/status", self.base_url, order_id.trim())
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    async fn fetch_status(&self, order_id: &str) -> OrderResult<PaymentSnapshot> {
        let url = self.status_url(order_id);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OrderError::Gateway(status_error(status)));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| OrderError::Gateway(format!("Invalid JSON from gateway: {e}")))?;
        parse_status_body(&body)
    }
}

fn friendly_error(url: &str, err: &reqwest::Error) -> OrderError {
    if err.is_timeout() {
        return OrderError::GatewayTimeout;
    }
    if err.is_connect() {
        return OrderError::Gateway(format!("Cannot reach payment gateway at {url}"));
    }
    OrderError::Gateway(format!("Network error communicating with {url}: {err}"))
}

fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Gateway server key is invalid".to_string(),
        404 => "Transaction not found at gateway".to_string(),
        s if s >= 500 => format!("Gateway server error (HTTP {s})"),
        s => format!("Unexpected response from gateway (HTTP {s})"),
    }
}

/// Extract the transaction status from a status API body. Midtrans reports
/// lookup errors with an error `status_code` in the body and no
/// `transaction_status`; terminal states such as `expire` arrive with a
/// 4xx body code but still carry a status.
pub fn parse_status_body(body: &Value) -> OrderResult<PaymentSnapshot> {
    let Some(transaction_status) = body.get("transaction_status").and_then(Value::as_str) else {
        let code = body
            .get("status_code")
            .and_then(Value::as_str)
            .unwrap_or("?");
        let message = body
            .get("status_message")
            .and_then(Value::as_str)
            .unwrap_or("Gateway response missing transaction_status");
        return Err(OrderError::Gateway(format!("{message} (status {code})")));
    };
    let fraud_status = body.get("fraud_status").and_then(Value::as_str);

    Ok(PaymentSnapshot::new(transaction_status, fraud_status))
}

/// Fetch the live status, bounded by `timeout`. Any failure is logged and
/// reported as `None`.
pub async fn fetch_with_fallback(
    gateway: &dyn PaymentGateway,
    order_id: &str,
    timeout: Duration,
) -> Option<PaymentSnapshot> {
    match tokio::time::timeout(timeout, gateway.fetch_status(order_id)).await {
        Ok(Ok(snapshot)) => {
            debug!(
                order_id,
                transaction_status = %snapshot.transaction_status,
                "Fetched gateway status"
            );
            Some(snapshot)
        }
        Ok(Err(e)) => {
            warn!(order_id, error = %e, "Gateway unavailable, using stored payment status");
            None
        }
        Err(_) => {
            warn!(order_id, "Gateway status fetch timed out, using stored payment status");
            None
        }
    }
}
