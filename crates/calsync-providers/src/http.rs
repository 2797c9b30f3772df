//! HTTP plumbing shared by both adapters and the token endpoints.

use std::time::Duration;

use calsync_core::ProviderKind;
use serde::de::DeserializeOwned;

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};

/// Longest slice of an error body kept in error messages.
const BODY_EXCERPT_LEN: usize = 200;

pub(crate) fn build_client(
    provider: ProviderKind,
    timeout: Duration,
) -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| {
            ProviderError::configuration("failed to create HTTP client")
                .with_provider(provider)
                .with_source(e)
        })
}

/// Maps a transport-level failure to a network error.
pub(crate) fn send_error(provider: ProviderKind, err: reqwest::Error) -> ProviderError {
    let message = if err.is_timeout() {
        "request timeout".to_string()
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    };
    ProviderError::network(message)
        .with_provider(provider)
        .with_source(err)
}

/// Builds the error for a non-success status, quoting the start of the body.
pub fn classify_status(status: u16, body: &str) -> ProviderError {
    let what = match ProviderErrorCode::for_status(status) {
        ProviderErrorCode::Unauthenticated => "access token rejected",
        ProviderErrorCode::Forbidden => "access denied",
        ProviderErrorCode::NotFound => "resource not found",
        ProviderErrorCode::RateLimited => "rate limit exceeded",
        ProviderErrorCode::Rejected => "request rejected",
        _ => "server error",
    };
    ProviderError::from_status(status, format!("{what}: {}", excerpt(body)))
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    if body.len() <= BODY_EXCERPT_LEN {
        return body;
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Passes a successful response through, or turns it into a classified error.
pub(crate) async fn check_status(
    provider: ProviderKind,
    response: reqwest::Response,
) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.text().await.unwrap_or_default();
    let mut err = classify_status(status.as_u16(), &body).with_provider(provider);
    if let Some(secs) = retry_after {
        err = err.with_detail(format!("retry after {secs} seconds"));
    }
    Err(err)
}

/// Reads a successful response body as JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: ProviderKind,
    response: reqwest::Response,
) -> ProviderResult<T> {
    let response = check_status(provider, response).await?;
    let body = response
        .text()
        .await
        .map_err(|e| send_error(provider, e))?;
    serde_json::from_str(&body).map_err(|e| {
        ProviderError::invalid_response(format!("failed to parse response: {e}"))
            .with_provider(provider)
            .with_source(e)
    })
}
