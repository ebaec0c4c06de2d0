//! Shared signed-request transport (`spec.md` §4.C).
//!
//! Factors the signed-GET/POST pattern that used to be duplicated between
//! `delivery::deliver_to_inbox` and `signature::fetch_public_key` into one
//! place, so the Resolver and WebFinger client go through the same
//! content-negotiation and signing path as outbound delivery.

use crate::error::AppError;

pub const ACTIVITY_JSON: &str = "application/activity+json";
pub const LD_JSON_AS: &str =
    r#"application/ld+json; profile="https://www.w3.org/ns/activitystreams""#;

/// A signed GET for dereferencing remote actors/objects/collections.
///
/// Signs `(request-target) host date` (no body, so no digest) and sends
/// `Accept: application/activity+json`.
pub async fn signed_get(
    http_client: &reqwest::Client,
    url: &str,
    key_id: &str,
    private_key_pem: &str,
) -> Result<serde_json::Value, AppError> {
    let sig_headers =
        crate::federation::sign_request("GET", url, None, private_key_pem, key_id)?;

    let response = http_client
        .get(url)
        .header("Accept", ACTIVITY_JSON)
        .header("Date", sig_headers.date)
        .header("Signature", sig_headers.signature)
        .send()
        .await
        .map_err(|e| AppError::Federation(format!("GET {url} failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Federation(format!(
            "GET {url} rejected: HTTP {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Federation(format!("Failed to parse response from {url}: {e}")))
}

/// An unsigned GET, used for WebFinger (`.well-known` endpoints are not
/// signature-protected per the spec).
pub async fn unsigned_get_json(
    http_client: &reqwest::Client,
    url: &str,
) -> Result<serde_json::Value, AppError> {
    let response = http_client
        .get(url)
        .header("Accept", "application/jrd+json, application/json")
        .send()
        .await
        .map_err(|e| AppError::Federation(format!("GET {url} failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Federation(format!(
            "GET {url} rejected: HTTP {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Federation(format!("Failed to parse response from {url}: {e}")))
}

/// A signed POST delivering an activity body, identical to
/// `delivery::deliver_to_inbox`'s wire format. Exposed here so new callers
/// (outbox dispatch, inbox forwarding) don't reimplement signing.
pub async fn signed_post(
    http_client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    key_id: &str,
    private_key_pem: &str,
) -> Result<(), AppError> {
    let bytes = serde_json::to_vec(body)
        .map_err(|e| AppError::Validation(format!("Failed to serialize body: {e}")))?;

    let sig_headers =
        crate::federation::sign_request("POST", url, Some(&bytes), private_key_pem, key_id)?;

    let mut request = http_client
        .post(url)
        .header("Content-Type", ACTIVITY_JSON)
        .header("Date", sig_headers.date)
        .header("Signature", sig_headers.signature);

    if let Some(digest) = sig_headers.digest {
        request = request.header("Digest", digest);
    }

    let response = request
        .body(bytes)
        .send()
        .await
        .map_err(|e| AppError::Federation(format!("POST {url} failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Federation(format!(
            "POST {url} rejected: HTTP {}",
            response.status()
        )));
    }

    Ok(())
}
