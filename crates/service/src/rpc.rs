use std::error::Error as _;
use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::Value;

/// Delay before the single retry on a connection-reset class failure.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Stateless-per-call client for the engine's JSON-over-HTTP RPC surface.
///
/// Every endpoint is a POST of a JSON object to `<base>/<endpoint>` with
/// basic auth. Transport-level connection resets are retried exactly once;
/// every other failure propagates to the caller untouched.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    base_url: Url,
    user: String,
    pass: String,
    timeout: Duration,
    long_timeout: Duration,
}

impl RpcClient {
    pub fn new(
        base_url: &str,
        user: &str,
        pass: &str,
        timeout: Duration,
        long_timeout: Duration,
    ) -> Result<Self, RpcError> {
        let base_url =
            Url::parse(base_url).map_err(|e| RpcError::InvalidEndpoint(e.to_string()))?;
        let client = Client::builder()
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            user: user.to_string(),
            pass: pass.to_string(),
            timeout,
            long_timeout,
        })
    }

    /// Call an endpoint with the standard request timeout.
    pub async fn call(&self, endpoint: &str, params: &Value) -> Result<Value, RpcError> {
        self.call_with_timeout(endpoint, params, self.timeout).await
    }

    /// Call an endpoint with the long-poll timeout.
    pub async fn call_long(&self, endpoint: &str, params: &Value) -> Result<Value, RpcError> {
        self.call_with_timeout(endpoint, params, self.long_timeout)
            .await
    }

    async fn call_with_timeout(
        &self,
        endpoint: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| RpcError::InvalidEndpoint(e.to_string()))?;

        match self.execute(&url, params, timeout).await {
            Err(RpcError::ConnectionReset) => {
                tracing::warn!("Connection reset calling {}, retrying once", endpoint);
                tokio::time::sleep(RETRY_DELAY).await;
                self.execute(&url, params, timeout).await
            }
            other => other,
        }
    }

    async fn execute(
        &self,
        url: &Url,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(url.clone())
            .basic_auth(&self.user, Some(&self.pass))
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_send_error)?;

        if !status.is_success() {
            // The engine reports call failures as an HTTP error status with
            // an `error` field in the body; surface that message rather
            // than the bare status.
            if let Some(message) = error_field(&body) {
                return Err(RpcError::Daemon(message));
            }
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RpcError::Protocol(e.to_string()))
    }
}

/// Extract the `error` field of a JSON body, if any.
fn error_field(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn classify_send_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        return RpcError::Timeout;
    }
    if is_connection_reset(&err) {
        return RpcError::ConnectionReset;
    }
    RpcError::Transport(err.to_string())
}

/// Whether an error chain bottoms out in a reset/hang-up class IO error.
/// Connection *refused* is not in this class: a daemon that is not
/// listening yet gets no retry, only one that hung up mid-call does.
fn is_connection_reset(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("request timed out")]
    Timeout,

    #[error("connection reset by the engine")]
    ConnectionReset,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("engine error: {0}")]
    Daemon(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("RPC channel is not available")]
    Unavailable,
}
