//! WHEP offer/answer exchange against a relay-provided endpoint

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::http::ensure_success;
use crate::error::{AppError, Result};

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// JSON fields that may carry the answer, in lookup order
const ANSWER_FIELDS: [&str; 3] = ["sdp", "answer", "data"];

/// Result of a WHEP POST
#[derive(Debug, Clone, PartialEq)]
pub struct WhepAnswer {
    pub sdp: String,
    /// Session resource from the `Location` header, resolved against the endpoint
    pub resource_url: Option<String>,
}

/// POST the offer SDP and read the answer
pub async fn negotiate(
    http: &reqwest::Client,
    whep_url: &str,
    offer_sdp: &str,
) -> Result<WhepAnswer> {
    debug!("WHEP offer to {} ({} bytes)", whep_url, offer_sdp.len());

    let response = http
        .post(whep_url)
        .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
        .body(offer_sdp.to_owned())
        .send()
        .await?;
    let response = ensure_success(response).await?;

    let resource_url = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(|location| resolve_location(whep_url, location));
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.text().await?;

    let sdp = extract_answer(content_type.as_deref(), &body)?;
    info!("WHEP answer received ({} bytes)", sdp.len());
    Ok(WhepAnswer { sdp, resource_url })
}

/// Pull the answer SDP out of a WHEP response body
///
/// JSON bodies carry it in `sdp`, `answer` or `data` (first non-empty string
/// wins); anything else is taken as SDP text.
pub fn extract_answer(content_type: Option<&str>, body: &str) -> Result<String> {
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);

    let sdp = if is_json {
        let value: Value = serde_json::from_str(body).map_err(|e| {
            AppError::MalformedResponse(format!("WHEP response is not valid JSON: {}", e))
        })?;
        ANSWER_FIELDS
            .iter()
            .filter_map(|field| value.get(*field).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .map(str::to_owned)
            .unwrap_or_default()
    } else {
        body.to_owned()
    };

    if sdp.trim().is_empty() {
        return Err(AppError::MalformedResponse(
            "WHEP response carried no SDP answer".to_string(),
        ));
    }
    Ok(sdp)
}

/// Best-effort DELETE of the WHEP session resource
pub async fn delete_resource(http: &reqwest::Client, resource_url: &str) {
    match http.delete(resource_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!("WHEP resource {} deleted", resource_url)
        }
        Ok(resp) => warn!(
            "WHEP DELETE {} returned {}",
            resource_url,
            resp.status()
        ),
        Err(e) => warn!("WHEP DELETE {} failed: {}", resource_url, e),
    }
}

fn resolve_location(whep_url: &str, location: &str) -> String {
    Url::parse(whep_url)
        .and_then(|base| base.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_owned())
}
