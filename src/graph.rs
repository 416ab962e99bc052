//! Authenticated Graph API calls with error classification and retries.

use crate::constants::{EXPIRED_TOKEN_CODE, OAUTH_EXCEPTION_TYPE, REQUEST_TIMEOUT_SECS};
use crate::models::Credential;
use crate::retry::{retry, RetryPolicy, Retryable};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("EXPIRED_TOKEN")]
    ExpiredCredential,
    #[error("Facebook API Error: {message} (code: {code})")]
    RemoteApi { code: i64, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
}

impl GraphError {
    fn transport(err: reqwest::Error) -> Self {
        // Request URLs can carry app secrets and tokens in the query string.
        GraphError::Transport(err.without_url().to_string())
    }

    pub fn is_expired_credential(&self) -> bool {
        matches!(self, GraphError::ExpiredCredential)
    }
}

impl Retryable for GraphError {
    fn is_retryable(&self) -> bool {
        !self.is_expired_credential()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<i64>,
}

/// Maps a non-success response to the error taxonomy.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> GraphError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => {
            if error.code == Some(EXPIRED_TOKEN_CODE)
                || error.kind.as_deref() == Some(OAUTH_EXCEPTION_TYPE)
            {
                return GraphError::ExpiredCredential;
            }
            GraphError::RemoteApi {
                code: error.code.unwrap_or(i64::from(status.as_u16())),
                message: error
                    .message
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string()),
            }
        }
        Err(_) => GraphError::RemoteApi {
            code: i64::from(status.as_u16()),
            message: format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown status")
            ),
        },
    }
}

/// Decodes a JSON payload into a typed response.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, GraphError> {
    serde_json::from_value(value).map_err(|e| GraphError::Transport(format!("Invalid response: {}", e)))
}

#[derive(Debug, Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GraphClient {
    /// `base_url` includes the API version, e.g. `https://graph.facebook.com/v23.0`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_retry(base_url, RetryPolicy::default())
    }

    pub fn with_retry(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self::with_options(base_url, retry, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// `timeout` bounds each attempt; a timed-out attempt is a transport error
    /// and is retried like any other.
    pub fn with_options(base_url: impl Into<String>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn call(
        &self,
        method: Method,
        endpoint: &str,
        credential: Option<&Credential>,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, GraphError> {
        retry(self.retry, move |attempt| {
            if attempt > 0 {
                tracing::debug!(endpoint, attempt, "retrying Graph API call");
            }
            self.send_once(method.clone(), endpoint, credential, query, body)
        })
        .await
    }

    pub async fn get(
        &self,
        endpoint: &str,
        credential: Option<&Credential>,
        query: &[(&str, String)],
    ) -> Result<Value, GraphError> {
        self.call(Method::GET, endpoint, credential, query, None).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        credential: &Credential,
        body: &Value,
    ) -> Result<Value, GraphError> {
        self.call(Method::POST, endpoint, Some(credential), &[], Some(body))
            .await
    }

    pub async fn delete(&self, endpoint: &str, credential: &Credential) -> Result<Value, GraphError> {
        self.call(Method::DELETE, endpoint, Some(credential), &[], None)
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        endpoint: &str,
        credential: Option<&Credential>,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, GraphError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.request(method.clone(), &url);

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.expose());
        }
        if let Some(body) = body {
            if method != Method::GET {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(GraphError::transport)?;
        let status = response.status();
        let text = response.text().await.map_err(GraphError::transport)?;

        if !status.is_success() {
            let err = classify_failure(status, &text);
            tracing::warn!(endpoint, status = status.as_u16(), error = %err, "Graph API call failed");
            return Err(err);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| GraphError::Transport(format!("Invalid response: {}", e)))
    }
}
