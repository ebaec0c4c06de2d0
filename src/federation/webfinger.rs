//! WebFinger protocol implementation
//!
//! Used to discover ActivityPub actor URIs from addresses.

use serde::Deserialize;

use crate::error::AppError;

/// WebFinger result
#[derive(Debug, Clone)]
pub struct WebFingerResult {
    /// Subject (acct:user@domain)
    pub subject: String,
    /// ActivityPub actor URI
    pub actor_uri: String,
    /// Profile page URL (optional)
    pub profile_url: Option<String>,
}

/// Resolve an address to ActivityPub actor
///
/// # Arguments
/// * `address` - Account address (user@domain)
/// * `http_client` - HTTP client
///
/// # Returns
/// WebFinger result with actor URI
///
/// # Example
/// ```ignore
/// let result = resolve_webfinger("user@mastodon.social", &client).await?;
/// println!("Actor: {}", result.actor_uri);
/// ```
pub async fn resolve_webfinger(
    address: &str,
    http_client: &reqwest::Client,
) -> Result<WebFingerResult, AppError> {
    let (user, domain) = address
        .split_once('@')
        .ok_or_else(|| AppError::Validation(format!("Invalid address: {address}")))?;

    let resource = format!("acct:{user}@{domain}");
    let url = format!(
        "https://{domain}/.well-known/webfinger?resource={}",
        urlencoding::encode(&resource)
    );

    let body = crate::federation::transport::unsigned_get_json(http_client, &url).await?;
    let parsed: WebFingerResponse = serde_json::from_value(body)
        .map_err(|e| AppError::Federation(format!("Invalid WebFinger response: {e}")))?;

    let actor_link = parsed
        .links
        .iter()
        .find(|link| {
            link.rel == "self"
                && link
                    .link_type
                    .as_deref()
                    .is_some_and(|t| t.contains("activity+json") || t.contains("ld+json"))
        })
        .and_then(|link| link.href.clone())
        .ok_or_else(|| {
            AppError::Federation(format!("No ActivityPub self link for {address}"))
        })?;

    let profile_url = parsed
        .links
        .iter()
        .find(|link| link.rel == "http://webfinger.net/rel/profile-page")
        .and_then(|link| link.href.clone());

    Ok(WebFingerResult {
        subject: parsed.subject,
        actor_uri: actor_link,
        profile_url,
    })
}

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize)]
pub struct WebFingerResponse {
    pub subject: String,
    pub aliases: Option<Vec<String>>,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    pub link_type: Option<String>,
    pub href: Option<String>,
    pub template: Option<String>,
}

/// Generate WebFinger response for local account
///
/// Used by /.well-known/webfinger endpoint.
///
/// # Arguments
/// * `username` - Local username
/// * `domain` - Instance domain
///
/// # Returns
/// JRD response for the account
pub fn generate_webfinger_response(username: &str, domain: &str) -> WebFingerResponse {
    let actor_url = format!("https://{domain}/users/{username}");
    WebFingerResponse {
        subject: format!("acct:{username}@{domain}"),
        aliases: Some(vec![actor_url.clone()]),
        links: vec![
            WebFingerLink {
                rel: "self".to_string(),
                link_type: Some("application/activity+json".to_string()),
                href: Some(actor_url.clone()),
                template: None,
            },
            WebFingerLink {
                rel: "http://webfinger.net/rel/profile-page".to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(actor_url),
                template: None,
            },
        ],
    }
}

/// Fetch actor document
///
/// # Arguments
/// * `actor_uri` - ActivityPub actor URI
/// * `http_client` - HTTP client
///
/// # Returns
/// Actor JSON document
pub async fn fetch_actor(
    actor_uri: &str,
    http_client: &reqwest::Client,
) -> Result<serde_json::Value, AppError> {
    let response = http_client
        .get(actor_uri)
        .header("Accept", crate::federation::transport::ACTIVITY_JSON)
        .send()
        .await
        .map_err(|e| AppError::Federation(format!("Failed to fetch actor: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Federation(format!(
            "Failed to fetch actor: HTTP {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Federation(format!("Failed to parse actor: {e}")))
}

/// Extract relevant data from actor document
///
/// # Arguments
/// * `actor` - Actor JSON
///
/// # Returns
/// Parsed actor data
pub fn parse_actor(actor: &serde_json::Value) -> Result<ParsedActor, AppError> {
    let id = actor
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Federation("Actor missing id".to_string()))?
        .to_string();

    let username = actor
        .get("preferredUsername")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let display_name = actor
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let summary = actor
        .get("summary")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let avatar_url = actor
        .get("icon")
        .and_then(|icon| icon.get("url").or(Some(icon)))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let header_url = actor
        .get("image")
        .and_then(|image| image.get("url").or(Some(image)))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let inbox = actor
        .get("inbox")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Federation("Actor missing inbox".to_string()))?
        .to_string();
    let outbox = actor
        .get("outbox")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let followers = actor
        .get("followers")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let following = actor
        .get("following")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let public_key = actor
        .get("publicKey")
        .ok_or_else(|| AppError::Federation("Actor missing publicKey".to_string()))?;
    let public_key_id = public_key
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Federation("publicKey missing id".to_string()))?
        .to_string();
    let public_key_pem = public_key
        .get("publicKeyPem")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Federation("publicKey missing publicKeyPem".to_string()))?
        .to_string();

    Ok(ParsedActor {
        id,
        username,
        display_name,
        summary,
        avatar_url,
        header_url,
        inbox,
        outbox,
        followers,
        following,
        public_key_id,
        public_key_pem,
    })
}

/// Parsed actor data
#[derive(Debug, Clone)]
pub struct ParsedActor {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub summary: Option<String>,
    pub avatar_url: Option<String>,
    pub header_url: Option<String>,
    pub inbox: String,
    pub outbox: Option<String>,
    pub followers: Option<String>,
    pub following: Option<String>,
    pub public_key_id: String,
    pub public_key_pem: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_webfinger_response_has_self_and_profile_links() {
        let response = generate_webfinger_response("alice", "example.com");
        assert_eq!(response.subject, "acct:alice@example.com");
        assert!(
            response
                .links
                .iter()
                .any(|l| l.rel == "self" && l.href.as_deref() == Some("https://example.com/users/alice"))
        );
    }

    #[test]
    fn parse_actor_extracts_core_fields() {
        let actor = serde_json::json!({
            "id": "https://remote.example/users/bob",
            "preferredUsername": "bob",
            "inbox": "https://remote.example/users/bob/inbox",
            "publicKey": {
                "id": "https://remote.example/users/bob#main-key",
                "publicKeyPem": "-----BEGIN PUBLIC KEY-----\n...\n-----END PUBLIC KEY-----\n"
            }
        });

        let parsed = parse_actor(&actor).expect("actor parses");
        assert_eq!(parsed.id, "https://remote.example/users/bob");
        assert_eq!(parsed.username, "bob");
        assert_eq!(parsed.public_key_id, "https://remote.example/users/bob#main-key");
    }

    #[test]
    fn parse_actor_requires_public_key() {
        let actor = serde_json::json!({
            "id": "https://remote.example/users/bob",
            "inbox": "https://remote.example/users/bob/inbox",
        });
        assert!(parse_actor(&actor).is_err());
    }
}
