//! AuthenticatedTransport: every outbound API call goes through here.
//!
//! Injects the bearer token, refreshes up front when the credential is
//! about to expire, and on a 401 refreshes exactly once and replays the
//! request. A second 401 is terminal: a permanently revoked credential must
//! not turn into an endless refresh loop.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    errors::{ApiError, ApiResult},
    services::auth::Authenticator,
};

#[derive(Debug, Clone)]
pub struct AuthenticatedTransport {
    http: Client,
    auth: Arc<Authenticator>,
}

impl AuthenticatedTransport {
    pub fn new(http: Client, auth: Arc<Authenticator>) -> Self {
        Self { http, auth }
    }

    /// Send a request built by `build`, authenticated.
    ///
    /// `build` is called once per dispatch so bodies that cannot be cloned
    /// (multipart forms) can still be replayed after a refresh. The response
    /// is returned as-is unless it is a 401 that survived the refresh; use
    /// [`check`] or [`read_json`] to turn error statuses into [`ApiError`].
    pub async fn send<F>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        build: F,
    ) -> ApiResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        if !self.auth.is_valid().await {
            debug!(operation, "credential expired or missing; refreshing");
            let stale = self.auth.access_token().await;
            self.refresh(operation, &stale).await?;
        }

        let token = self.auth.access_token().await;
        let response = dispatch(operation, cancel, build(&self.http).bearer_auth(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(operation, "unauthorized; refreshing credential once");
        self.refresh(operation, &token).await?;

        let token = self.auth.access_token().await;
        let response = dispatch(operation, cancel, build(&self.http).bearer_auth(&token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(operation, "still unauthorized after refresh");
            return Err(ApiError::Unauthorized(operation.to_string()));
        }
        Ok(response)
    }

    /// Refresh unless a concurrent caller already replaced `stale`.
    async fn refresh(&self, operation: &str, stale: &str) -> ApiResult<()> {
        self.auth
            .refresh_if_current(stale)
            .await
            .map_err(|source| ApiError::Auth {
                operation: operation.to_string(),
                source,
            })
    }
}

async fn dispatch(
    operation: &str,
    cancel: &CancellationToken,
    request: RequestBuilder,
) -> ApiResult<Response> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled(operation.to_string())),
        result = request.send() => result.map_err(|source| ApiError::Transport {
            operation: operation.to_string(),
            source,
        }),
    }
}

/// Pass through success responses; decode anything else into an error.
pub async fn check(operation: &str, response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(operation, status, &body))
}

/// Check the status and decode the JSON body.
pub async fn read_json<T: DeserializeOwned>(operation: &str, response: Response) -> ApiResult<T> {
    let response = check(operation, response).await?;
    response
        .json()
        .await
        .map_err(|e| ApiError::invalid_response(operation, e.to_string()))
}
