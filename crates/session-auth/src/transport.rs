//! Request/response types and the transport seam to the backend API.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use leadgen_config::Config;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Single-file multipart upload.
    Multipart {
        field: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

/// A request against the backend, relative to the API base URL.
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn multipart(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.body = RequestBody::Multipart {
            field: field.into(),
            file_name: file_name.into(),
            bytes,
        };
        self
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            RequestBody::Empty => "empty",
            RequestBody::Json(_) => "json",
            RequestBody::Multipart { .. } => "multipart",
        };
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("body", &body)
            .field("bearer", &self.bearer.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// A response that reached us, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Deserialize the body. An empty body reads as JSON `null`.
    pub fn parse<T: DeserializeOwned>(&self) -> AuthResult<T> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }

    /// Human-readable error message from the body, or `fallback`.
    pub fn error_message(&self, fallback: &str) -> String {
        extract_error_message(&self.body).unwrap_or_else(|| fallback.to_string())
    }

    /// Body as JSON for a 2xx response, otherwise the matching error.
    pub fn into_json(self) -> AuthResult<Value> {
        if self.is_success() {
            return self.parse();
        }

        let fallback = format!("Request failed with status {}", self.status);
        let message = self.error_message(&fallback);
        Err(match self.status {
            401 => AuthError::Unauthorized(message),
            500..=599 => AuthError::ServerError {
                status: self.status,
                message,
            },
            status => AuthError::Rejected { status, message },
        })
    }
}

/// Pull a human-readable message out of an error payload.
///
/// Recognizes `detail`, `error` and `message` (string or list),
/// `non_field_errors`, and per-field error lists rendered as `field: message`.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let object = match value {
        Value::String(message) => return non_empty(message),
        value @ Value::Array(_) => return join_messages(&value),
        Value::Object(object) => object,
        _ => return None,
    };

    for key in ["detail", "error", "message", "non_field_errors"] {
        if let Some(message) = object.get(key).and_then(join_messages) {
            return Some(message);
        }
    }

    let mut fields: Vec<String> = object
        .iter()
        .filter_map(|(field, value)| {
            join_messages(value).map(|message| format!("{}: {}", field, message))
        })
        .collect();
    fields.sort();
    non_empty(fields.join("; "))
}

fn join_messages(value: &Value) -> Option<String> {
    match value {
        Value::String(message) => non_empty(message.clone()),
        Value::Array(items) => {
            let messages: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            non_empty(messages.join(" "))
        }
        _ => None,
    }
}

fn non_empty(message: String) -> Option<String> {
    let trimmed = message.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Transport seam between the session core and the network.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Execute a request. Any status code is a successful execution; only a
    /// missing response is an error ([`AuthError::NetworkFailure`]).
    async fn execute(&self, request: ApiRequest) -> AuthResult<ApiResponse>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: Url, timeout: Option<Duration>) -> AuthResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &Config) -> AuthResult<Self> {
        Self::new(config.api_base_url()?, config.request_timeout())
    }

    /// Join a request path onto the base URL, keeping the base path prefix.
    fn url_for(&self, path: &str) -> AuthResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|e| AuthError::Config(format!("Invalid request path {}: {}", path, e)))
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let url = self.url_for(&request.path)?;
        debug!(method = ?request.method, url = %url, "Sending request");

        let mut builder = self.client.request(request.method.as_reqwest(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart {
                field,
                file_name,
                bytes,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::NetworkFailure(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::NetworkFailure(e.to_string()))?;

        debug!(status, "Received response");
        Ok(ApiResponse { status, body })
    }
}
