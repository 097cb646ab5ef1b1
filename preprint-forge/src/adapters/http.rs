//! Shared reqwest plumbing for the HTTP-backed adapters.

use crate::errors::AdapterError;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("preprint-forge/", env!("CARGO_PKG_VERSION"));

/// Maps a transport-level failure onto a category.
pub fn transport_error(err: &reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        AdapterError::network(err.to_string())
    } else if err.is_decode() {
        AdapterError::invalid_input(format!("unexpected response body: {err}"))
    } else if let Some(status) = err.status() {
        AdapterError::from_http_status(status.as_u16(), err.to_string())
    } else {
        AdapterError::other(err.to_string())
    }
}

/// Passes successful responses through and turns the rest into categorised errors.
pub async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(AdapterError::from_http_status(
        status.as_u16(),
        format!("{what} returned {status}: {excerpt}"),
    ))
}
