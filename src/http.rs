//! HTTP client abstraction for the remote generator and mailer.
//!
//! This module defines the `HttpClient` trait to abstract HTTP request
//! execution, enabling testability with mock implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// One remote API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// HTTP method (e.g. "POST")
    pub method: String,
    /// Base URL of the target service (e.g. <https://generator.example.com>)
    pub endpoint: String,
    /// Path portion of the URL (e.g. "/generate-email")
    pub path: String,
    /// Request body as a JSON string
    pub body: String,
    /// API key for authentication; empty disables the Authorization header
    pub api_key: String,
}

impl ApiRequest {
    pub fn post(
        endpoint: impl Into<String>,
        path: impl Into<String>,
        body: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            method: "POST".to_string(),
            endpoint: endpoint.into(),
            path: path.into(),
            body: body.into(),
            api_key: api_key.into(),
        }
    }
}

/// Response from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
}

impl HttpResponse {
    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for executing HTTP requests.
///
/// This abstraction allows for different implementations (production vs.
/// testing) and makes the pipeline logic testable without real HTTP calls.
#[async_trait]
pub trait HttpClient: Send + Sync + Clone {
    /// Execute an HTTP request with a per-call timeout.
    ///
    /// # Errors
    /// Returns an error if the request fails due to network issues, times
    /// out, or cannot be built.
    async fn execute(&self, request: &ApiRequest, timeout: Duration) -> Result<HttpResponse>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Production HTTP client using reqwest.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn execute(&self, request: &ApiRequest, timeout: Duration) -> Result<HttpResponse> {
        let url = format!("{}{}", request.endpoint, request.path);

        tracing::debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "Executing HTTP request");

        let mut req = self
            .client
            .request(
                request.method.parse().map_err(|e| {
                    tracing::error!(method = %request.method, error = %e, "Invalid HTTP method");
                    anyhow::anyhow!("Invalid HTTP method '{}': {}", request.method, e)
                })?,
                &url,
            )
            .timeout(timeout);

        if !request.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", request.api_key));
        }

        let method_upper = request.method.to_uppercase();
        if method_upper != "GET" && method_upper != "HEAD" && !request.body.is_empty() {
            req = req
                .header("Content-Type", "application/json")
                .body(request.body.clone());
        }

        let response = req.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "HTTP request failed");
            e
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(status = status, response_len = body.len(), "HTTP request completed");

        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Mock HTTP client for testing.
///
/// Allows configuring predetermined responses for specific requests without
/// making actual HTTP calls. Responses are keyed by `"{method} {path}"` and
/// returned in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
}

/// A mock response that can optionally wait for a trigger before completing.
#[derive(Debug)]
enum MockResponse {
    /// Immediate response
    Immediate(Result<HttpResponse>),
    /// Response that waits for a trigger signal before completing
    Triggered {
        response: Result<HttpResponse>,
        trigger: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
    },
}

/// Record of a call made to the mock HTTP client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: String,
    pub endpoint: String,
    pub path: String,
    pub body: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predetermined response for a `"{method} {path}"` key. Multiple
    /// responses for the same key are returned in FIFO order.
    pub fn add_response(&self, key: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(MockResponse::Immediate(response));
    }

    /// Add a response that waits for a manual trigger before completing.
    ///
    /// Returns a sender that, when triggered (by sending `()` or dropping),
    /// causes the blocked request to complete with the given response.
    pub fn add_response_with_trigger(
        &self,
        key: &str,
        response: Result<HttpResponse>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(MockResponse::Triggered {
                response,
                trigger: Arc::new(Mutex::new(Some(rx))),
            });
        tx
    }

    /// Get all calls that have been made to this mock client.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of requests currently executing. Useful for asserting the
    /// concurrency cap and for cancellation tests.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: &ApiRequest, timeout: Duration) -> Result<HttpResponse> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        // Decrement even if the awaiting task is cancelled
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(MockCall {
            method: request.method.clone(),
            endpoint: request.endpoint.clone(),
            path: request.path.clone(),
            body: request.body.clone(),
            api_key: request.api_key.clone(),
            timeout,
        });

        let key = format!("{} {}", request.method, request.path);
        let mock_response = {
            let mut responses = self.responses.lock();
            match responses.get_mut(&key) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        match mock_response {
            Some(MockResponse::Immediate(response)) => response,
            Some(MockResponse::Triggered { response, trigger }) => {
                let rx = trigger.lock().take();
                if let Some(rx) = rx {
                    // Proceed whether the trigger fires or is dropped
                    let _ = rx.await;
                }
                response
            }
            None => Err(crate::error::MailrunError::Other(anyhow::anyhow!(
                "No mock response configured for {} {}",
                request.method,
                request.path
            ))),
        }
    }
}

/// Guard that decrements the in-flight counter when dropped, even if the
/// task is cancelled or panics.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str) -> ApiRequest {
        ApiRequest {
            method: method.to_string(),
            endpoint: "https://api.example.com".to_string(),
            path: path.to_string(),
            body: "{}".to_string(),
            api_key: "test-key".to_string(),
        }
    }

    #[tokio::test]
    async fn mock_client_returns_configured_response() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "POST /test",
            Ok(HttpResponse {
                status: 200,
                body: "success".to_string(),
            }),
        );

        let response = mock
            .execute(&request("POST", "/test"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "success");

        let calls = mock.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].path, "/test");
        assert_eq!(calls[0].api_key, "test-key");
    }

    #[tokio::test]
    async fn mock_client_returns_responses_in_fifo_order() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "POST /status",
            Ok(HttpResponse {
                status: 500,
                body: "first".to_string(),
            }),
        );
        mock.add_response(
            "POST /status",
            Ok(HttpResponse {
                status: 200,
                body: "second".to_string(),
            }),
        );

        let req = request("POST", "/status");
        let first = mock.execute(&req, Duration::from_secs(5)).await.unwrap();
        assert_eq!(first.body, "first");
        let second = mock.execute(&req, Duration::from_secs(5)).await.unwrap();
        assert_eq!(second.body, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_client_errors_without_configured_response() {
        let mock = MockHttpClient::new();
        let result = mock
            .execute(&request("POST", "/unknown"), Duration::from_secs(5))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn triggered_response_blocks_until_released() {
        let mock = MockHttpClient::new();
        let trigger = mock.add_response_with_trigger(
            "POST /test",
            Ok(HttpResponse {
                status: 200,
                body: "triggered".to_string(),
            }),
        );

        let mock_clone = mock.clone();
        let handle = tokio::spawn(async move {
            mock_clone
                .execute(&request("POST", "/test"), Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        assert_eq!(mock.in_flight_count(), 1);

        trigger.send(()).unwrap();

        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.body, "triggered");
        assert_eq!(mock.in_flight_count(), 0);
    }
}
