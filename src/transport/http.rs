//! HTTP/JSON client for one downstream dependency.
//!
//! # Responsibilities
//! - Resolve request paths against the dependency's base URL
//! - Propagate caller headers (authorization, correlation id)
//! - Turn non-success responses and transport errors into `CallError`
//!
//! # Design Decisions
//! - No retries or timeouts beyond the client's own; the invoker owns resilience
//! - Dependencies are addressed directly; system proxy settings are ignored
//! - Error messages prefer the body's `message` field, then the raw body,
//!   then the status reason phrase

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::TransportConfig;
use crate::resilience::classify::{ErrorKind, TransportFailure};
use crate::resilience::errors::CallError;

pub const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

#[derive(Debug, Error)]
pub enum TransportBuildError {
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported url scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// JSON-over-HTTP client bound to one dependency's base URL.
#[derive(Debug, Clone)]
pub struct HttpDependency {
    client: Client,
    base_url: Url,
    headers: HeaderMap,
}

impl HttpDependency {
    pub fn new(base_url: &str, config: &TransportConfig) -> Result<Self, TransportBuildError> {
        let mut base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(TransportBuildError::UnsupportedScheme(base_url.scheme().to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            base_url,
            headers: HeaderMap::new(),
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self, TransportBuildError> {
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    /// Propagate the caller's `Authorization` header value.
    pub fn with_authorization(self, value: &str) -> Result<Self, TransportBuildError> {
        self.with_header(AUTHORIZATION, value)
    }

    pub fn with_correlation_id(self, id: &str) -> Result<Self, TransportBuildError> {
        self.with_header(CORRELATION_ID, id)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, CallError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| CallError::classified(ErrorKind::Validation, format!("invalid path '{path}': {e}")))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CallError> {
        let url = self.endpoint(path)?;
        tracing::debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        read_json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, CallError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        tracing::debug!(url = %url, "POST");
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, CallError> {
    let status = response.status();
    let body = response.text().await;

    if !status.is_success() {
        // The status alone classifies the failure; a lost body only costs the message.
        let message = match &body {
            Ok(body) => extract_error_message(body, status.canonical_reason()),
            Err(e) => {
                tracing::debug!(status = status.as_u16(), error = %e, "Failed to read error body");
                extract_error_message("", status.canonical_reason())
            }
        };
        return Err(CallError::status(status.as_u16(), message));
    }

    let body = body.map_err(|e| map_transport_error(&e))?;

    serde_json::from_str(&body).map_err(|e| {
        CallError::classified(ErrorKind::Unknown, format!("invalid response body: {e}"))
    })
}

/// Map a client error to the transport failure it represents.
pub fn map_transport_error(err: &reqwest::Error) -> CallError {
    let failure = if err.is_timeout() {
        TransportFailure::Timeout
    } else if err.is_connect() {
        TransportFailure::ConnectionRefused
    } else if err.is_request() || err.is_body() {
        TransportFailure::ConnectionReset
    } else {
        TransportFailure::Other
    };
    CallError::transport(failure, err.to_string())
}

/// Human-readable message for an error response.
pub fn extract_error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(serde_json::Value::String(message)) = fields.get("message") {
            if !message.is_empty() {
                return message.clone();
            }
        }
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    reason.unwrap_or("unknown error").to_string()
}
