//! Response handling shared by the backend, relay and WHEP calls

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Build the shared HTTP client
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(timeout_secs));
    }
    Ok(builder.build()?)
}

/// Join a base URL and an absolute path without doubling slashes
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Fail with [`AppError::Http`] unless the status is 2xx
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(AppError::Http {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        body,
    })
}

/// Check the status and decode a JSON body
pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = ensure_success(response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        AppError::MalformedResponse(format!("unexpected response body ({}): {}", e, text))
    })
}

/// Check the status and return the body as JSON, raw text, or `null` if empty
pub async fn read_json_or_text(response: reqwest::Response) -> Result<Value> {
    let response = ensure_success(response).await?;
    let text = response.text().await?;
    Ok(parse_json_or_text(&text))
}

pub(crate) fn parse_json_or_text(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://host:8000/", "/api/v1/pipeline/status"),
            "http://host:8000/api/v1/pipeline/status"
        );
        assert_eq!(join_url("http://host", "ai/stream/start"), "http://host/ai/stream/start");
    }

    #[test]
    fn test_parse_json_or_text() {
        assert_eq!(parse_json_or_text(""), Value::Null);
        assert_eq!(parse_json_or_text("  \n"), Value::Null);
        assert_eq!(parse_json_or_text(r#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(parse_json_or_text("accepted"), json!("accepted"));
    }
}
