//! Authenticated HTTP against the delivery platform API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::credentials::CredentialStore;
use crate::auth::SESSION_TOKEN_KEY;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Form(Vec<(String, String)>),
}

/// Path-relative request; the transport owns the base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    /// Session credential, sent as `Authorization: Bearer`.
    pub bearer_token: Option<String>,
    pub data: Option<RequestBody>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            bearer_token: None,
            data: None,
        }
    }

    pub fn post_form<K, V>(url: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();

        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: Vec::new(),
            bearer_token: None,
            data: Some(RequestBody::Form(fields)),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Returns the parsed JSON body, `Value::Null` for an empty one.
    async fn execute(&self, request: HttpRequest) -> Result<Value, HttpError>;
}

pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HttpError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HttpError::Transport {
                url: base_url.clone(),
                reason: err.to_string(),
            })?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<Value, HttpError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), request.url);
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        if request.method == HttpMethod::Post {
            if let Some(RequestBody::Form(fields)) = &request.data {
                builder = builder.form(fields);
            }
        }

        let response = builder.send().await.map_err(|err| HttpError::Transport {
            url: url.clone(),
            reason: err.to_string(),
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| HttpError::Transport {
            url: url.clone(),
            reason: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                message: error_message(&body)
                    .or_else(|| status.canonical_reason().map(str::to_string))
                    .unwrap_or_default(),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|err| HttpError::Decode(err.to_string()))
    }
}

fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("message")?.as_str().map(str::to_string)
}

/// Adds the stored session token as a bearer credential to every request.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    pub async fn request(&self, mut request: HttpRequest) -> Result<Value, HttpError> {
        match self.credentials.get(SESSION_TOKEN_KEY).await {
            Ok(Some(token)) if request.bearer_token.is_none() => {
                request.bearer_token = Some(token);
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "could not read session token; sending unauthenticated"),
        }

        debug!(url = %request.url, method = ?request.method, "api request");
        self.transport.execute(request).await
    }
}
