//! Transport layer abstraction for remote table requests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// HTTP method of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Query.
    Get,
    /// Insert.
    Post,
    /// Update.
    Patch,
    /// Delete.
    Delete,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<String>,
}

impl RemoteRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns the first header with the given name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response from the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Option<String>,
}

impl RemoteResponse {
    /// Creates a response with a status and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a response carrying a JSON body.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(body.to_string()),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the first header with the given name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// The request never produced a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established or was lost.
    #[error("connection failed: {0}")]
    Connection(String),

    /// No response within the transport's deadline.
    #[error("request timed out")]
    Timeout,
}

/// Sends requests to the remote table service.
///
/// This trait abstracts the network layer so the engine can run against
/// an HTTP client, an in-process fake or a scripted mock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and waits for its response.
    ///
    /// Any response, including 4xx and 5xx, is `Ok`. `Err` means no
    /// response was received.
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError>;
}

/// A scripted transport for testing.
///
/// Responses are returned in the order they were queued. Every request is
/// recorded. When the script runs out the transport reports a connection
/// failure.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<RemoteResponse, TransportError>>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl MockTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: RemoteResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push_response(RemoteResponse::json(status, &body));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Returns every request sent so far.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests sent so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the number of scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("no scripted response".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_transport_replays_script_in_order() {
        let transport = MockTransport::new();
        transport.push_json(201, json!({"id": "a"}));
        transport.push_error(TransportError::Timeout);

        let first = transport
            .send(RemoteRequest::new(Method::Post, "http://x/tables/t"))
            .await
            .unwrap();
        assert_eq!(first.status, 201);
        assert!(first.is_success());

        let second = transport
            .send(RemoteRequest::new(Method::Get, "http://x/tables/t"))
            .await;
        assert_eq!(second, Err(TransportError::Timeout));
        assert_eq!(transport.request_count(), 2);
        assert_eq!(transport.requests()[1].method, Method::Get);
    }

    #[tokio::test]
    async fn mock_transport_without_script_fails_to_connect() {
        let transport = MockTransport::new();
        let result = transport
            .send(RemoteRequest::new(Method::Get, "http://x/tables/t"))
            .await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let request = RemoteRequest::new(Method::Get, "u").with_header("X-ZUMO-FEATURES", "OL");
        assert_eq!(request.header("x-zumo-features"), Some("OL"));
        assert_eq!(request.header("If-Match"), None);
    }
}
