//! HTTP plumbing shared by the REST backends (Google Drive, OneDrive).

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::error::{Error, SyncError};
use crate::models::BackendId;
use crate::util::compact_text;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| Error::Storage(format!("failed to build HTTP client: {error}")))
}

/// Map a request failure that never produced a response.
pub(crate) fn request_error(backend: BackendId, operation: &str, error: &reqwest::Error) -> SyncError {
    let message = format!("{backend} {operation} failed: {error}");
    if error.is_timeout() {
        SyncError::Transport {
            message,
            timed_out: true,
        }
    } else {
        SyncError::transport(message)
    }
}

/// Pass successful responses through; classify everything else.
pub(crate) async fn ensure_success(
    backend: BackendId,
    target: &str,
    response: Response,
) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(backend, target, status, &body))
}

pub(crate) fn status_error(
    backend: BackendId,
    target: &str,
    status: StatusCode,
    body: &str,
) -> SyncError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED => SyncError::Auth { backend, message },
        StatusCode::FORBIDDEN => SyncError::AccessDenied {
            location: target.to_string(),
            message,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SyncError::Transport {
            message: format!("{backend} {target}: {message}"),
            timed_out: true,
        },
        _ => SyncError::transport(format!("{backend} {target}: {message}")),
    }
}

/// Read a response body, mapping body-stream failures to transport errors.
pub(crate) async fn read_bytes(
    backend: BackendId,
    operation: &str,
    response: Response,
) -> Result<Vec<u8>, SyncError> {
    response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|error| request_error(backend, operation, &error))
}

/// Parse a JSON response body, mapping failures to format errors.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    backend: BackendId,
    operation: &str,
    response: Response,
) -> Result<T, SyncError> {
    let bytes = read_bytes(backend, operation, response).await?;
    serde_json::from_slice(&bytes).map_err(|error| {
        SyncError::transport(format!("{backend} {operation} returned unexpected JSON: {error}"))
    })
}

/// Extract a readable message from the provider's error envelope.
///
/// Handles `{"error": {"message": ...}}` (Google, Graph), flat
/// `{"message": ...}`/`{"error": "..."}` bodies, and plain text.
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        let message = payload
            .pointer("/error/message")
            .or_else(|| payload.get("message"))
            .or_else(|| payload.get("error").filter(|value| value.is_string()))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}
