//! Authorized request pipeline.
//!
//! Every call goes out with the current access token. A 401 triggers one
//! shared refresh and exactly one retry; if the session cannot be recovered
//! the manager ends it and the caller sees [`AuthError::Unauthorized`].

use crate::session::SessionManager;
use crate::transport::{ApiRequest, ApiResponse, ApiTransport};
use crate::{AuthError, AuthResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const UNAUTHORIZED_FALLBACK: &str = "Authentication credentials were not provided or are invalid";

/// Transport wrapper that manages bearer tokens for protected endpoints.
#[derive(Clone)]
pub struct AuthorizedClient {
    session: SessionManager,
    transport: Arc<dyn ApiTransport>,
}

impl AuthorizedClient {
    pub fn new(session: SessionManager, transport: Arc<dyn ApiTransport>) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send a request, refreshing the access token once on a 401.
    ///
    /// Non-401 responses are returned as they are, whatever their status.
    /// A 401 on the retry is returned without another refresh.
    pub async fn send(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let request_id = Uuid::new_v4();
        let path = request.path.clone();
        let token = self.session.request_token();
        let bearer = token.as_ref().map(|(access, _)| access.clone());

        let response = self
            .transport
            .execute(request.clone().with_bearer(bearer))
            .await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        let Some((rejected, epoch)) = token else {
            debug!(%request_id, %path, "Unauthorized without a session");
            return Ok(response);
        };
        let message = response.error_message(UNAUTHORIZED_FALLBACK);

        let fresh = match self.session.refresh_access_token(&rejected, epoch).await {
            Ok(fresh) => fresh,
            Err(e) if matches!(*e, AuthError::SessionClosed) => return Err(AuthError::SessionClosed),
            Err(e) => {
                debug!(%request_id, error = %e, "Session could not be recovered");
                return Err(AuthError::Unauthorized(message));
            }
        };

        debug!(%request_id, %path, "Retrying with refreshed token");
        let retried = self.transport.execute(request.with_bearer(Some(fresh))).await?;
        if retried.is_unauthorized() {
            warn!(%request_id, %path, "Request rejected again after refresh");
        }
        Ok(retried)
    }

    pub async fn get_json(&self, path: &str) -> AuthResult<Value> {
        self.send(ApiRequest::get(path)).await?.into_json()
    }

    pub async fn post_json(&self, path: &str, body: Value) -> AuthResult<Value> {
        self.send(ApiRequest::post(path).json(body)).await?.into_json()
    }

    /// POST without a body, with optional query parameters.
    pub async fn post_empty(&self, path: &str, query: &[(&str, &str)]) -> AuthResult<Value> {
        let request = query
            .iter()
            .fold(ApiRequest::post(path), |request, (key, value)| {
                request.query(*key, *value)
            });
        self.send(request).await?.into_json()
    }

    /// Upload a single file as multipart form data.
    pub async fn post_file(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AuthResult<Value> {
        self.send(ApiRequest::post(path).multipart(field, file_name, bytes))
            .await?
            .into_json()
    }
}
