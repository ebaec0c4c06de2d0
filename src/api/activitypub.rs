//! ActivityPub endpoints (`spec.md` §6.1)
//!
//! - Actor profile
//! - Inbox (S2S activity receiving, paginated GET)
//! - Outbox (C2S activity submission, paginated GET)
//! - Followers/Following/Liked collections
//! - Activity/Object documents (with Tombstone/410 support)

use std::sync::Arc;

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use http::HeaderMap;
use serde::Deserialize;

use crate::AppState;
use crate::api::metrics::{
    ACTIVITYPUB_ACTIVITIES_RECEIVED, FEDERATION_REQUEST_DURATION_SECONDS,
    FEDERATION_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL,
};
use crate::collections::{self, CollectionEngine, PageCursor};
use crate::error::AppError;
use crate::federation::callbacks::DefaultCallbacks;

const ACTIVITY_JSON: &str = "application/activity+json";

pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:username", get(actor))
        .route("/users/:username/inbox", get(inbox_collection).post(inbox))
        .route("/inbox", post(shared_inbox))
        .route(
            "/users/:username/outbox",
            get(outbox_collection).post(outbox_post),
        )
        .route("/users/:username/followers", get(followers))
        .route("/users/:username/following", get(following))
        .route("/users/:username/liked", get(liked))
        .route("/users/:username/activities/:ulid", get(activity_document))
        .route("/users/:username/objects/:ulid", get(object_document))
}

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    page: Option<bool>,
    max_id: Option<String>,
    min_id: Option<String>,
}

fn actor_url(state: &AppState, username: &str) -> String {
    format!("{}/users/{}", state.config.server.base_url(), username)
}

fn key_id_for(actor_url: &str) -> String {
    format!("{}#main-key", actor_url)
}

async fn verified_account(
    state: &AppState,
    username: &str,
) -> Result<crate::data::Account, AppError> {
    match state.db.get_account().await? {
        Some(account) if account.username == username => Ok(account),
        _ => Err(AppError::NotFound),
    }
}

/// GET /users/:username
async fn actor(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/users/:username"])
        .start_timer();

    let account = state.db.get_account().await?;

    match account {
        Some(acc) if acc.username == username => {
            let actor_url = actor_url(&state, &username);

            let response = Json(serde_json::json!({
                "@context": crate::activitypub::default_context(),
                "type": "Person",
                "id": actor_url.clone(),
                "preferredUsername": acc.username,
                "name": acc.display_name.unwrap_or_else(|| acc.username.clone()),
                "summary": acc.note.unwrap_or_default(),
                "inbox": format!("{}/inbox", actor_url),
                "outbox": format!("{}/outbox", actor_url),
                "followers": format!("{}/followers", actor_url),
                "following": format!("{}/following", actor_url),
                "liked": format!("{}/liked", actor_url),
                "url": actor_url.clone(),
                "publicKey": {
                    "id": key_id_for(&actor_url),
                    "owner": actor_url,
                    "publicKeyPem": acc.public_key_pem
                },
                "icon": acc.avatar_s3_key.map(|key| serde_json::json!({
                    "type": "Image",
                    "mediaType": "image/webp",
                    "url": key
                })),
                "image": acc.header_s3_key.map(|key| serde_json::json!({
                    "type": "Image",
                    "mediaType": "image/webp",
                    "url": key
                }))
            }));

            HTTP_REQUESTS_TOTAL
                .with_label_values(&["GET", "/users/:username", "200"])
                .inc();

            Ok(response)
        }
        _ => Err(AppError::NotFound),
    }
}

/// Shared paging responder for a named collection owned by the local actor.
async fn collection_response(
    state: &AppState,
    owner_iri: &str,
    kind: &str,
    query: PageQuery,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = CollectionEngine::new(&state.db, state.config.federation.collection_page_size);

    if query.page.unwrap_or(false) || query.max_id.is_some() || query.min_id.is_some() {
        let cursor = PageCursor {
            max_id: query.max_id,
            min_id: query.min_id,
        };
        let page = engine.page(owner_iri, kind, cursor, Some(owner_iri)).await?;
        return Ok(Json(page));
    }

    let summary = engine.summary(owner_iri, kind).await?;
    Ok(Json(summary))
}

/// GET /users/:username/inbox
async fn inbox_collection(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    collection_response(&state, &owner_iri, collections::INBOX, query).await
}

/// POST /users/:username/inbox
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(), AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/users/:username/inbox"])
        .start_timer();
    let _fed_timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    let account = verified_account(&state, &username).await?;

    if headers.get("signature").is_none() {
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["inbound", "unauthorized"])
            .inc();
        return Err(AppError::Unauthorized);
    }

    let activity: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;

    let actor_id = activity
        .get("actor")
        .and_then(|a: &serde_json::Value| a.as_str())
        .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?
        .to_string();

    let signature_key_id = crate::federation::extract_signature_key_id(&headers)?;
    if !crate::federation::key_id_matches_actor(&signature_key_id, &actor_id) {
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["inbound", "unauthorized"])
            .inc();
        return Err(AppError::Validation(
            "Signature keyId actor mismatch".to_string(),
        ));
    }

    let actor_domain = crate::federation::extract_actor_domain(&signature_key_id)?;
    if state.db.is_domain_blocked(&actor_domain).await? {
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["inbound", "forbidden"])
            .inc();
        return Err(AppError::Forbidden);
    }

    let public_key_pem =
        crate::federation::fetch_public_key(&signature_key_id, state.http_client.as_ref()).await?;

    let path = format!("/users/{}/inbox", username);
    crate::federation::verify_signature("POST", &path, &headers, Some(&body), &public_key_pem)?;

    if let Some(activity_type) = activity.get("type").and_then(|t| t.as_str()) {
        ACTIVITYPUB_ACTIVITIES_RECEIVED
            .with_label_values(&[activity_type])
            .inc();
    }

    let local_address = format!("{}@{}", account.username, state.config.server.domain);
    let owner_iri = actor_url(&state, &username);
    let key_id = key_id_for(&owner_iri);
    let delivery = Arc::new(
        crate::federation::ActivityDelivery::new(
            state.http_client.clone(),
            owner_iri,
            key_id.clone(),
            account.private_key_pem.clone(),
        )
        .with_retry_config(
            state.config.federation.delivery_retry_base_seconds,
            state.config.federation.delivery_retry_cap_seconds,
            state.config.federation.delivery_max_attempts,
        ),
    );
    let callbacks = Arc::new(DefaultCallbacks::new(
        state.db.clone(),
        local_address.clone(),
        state.config.federation.max_inbox_forwarding_recursion_depth,
    ));

    let processor = crate::federation::ActivityProcessor::new(
        state.db.clone(),
        state.timeline_cache.clone(),
        state.profile_cache.clone(),
        state.http_client.clone(),
        local_address,
        state.config.server.protocol.clone(),
    )
    .with_delivery(delivery)
    .with_callbacks(callbacks)
    .with_signing_key(key_id, account.private_key_pem.clone());

    processor.process(activity, &actor_id).await?;

    FEDERATION_REQUESTS_TOTAL
        .with_label_values(&["inbound", "success"])
        .inc();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/users/:username/inbox", "200"])
        .inc();

    Ok(())
}

/// POST /inbox — shared inbox for all users on this instance.
async fn shared_inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(), AppError> {
    if headers.get("signature").is_none() {
        return Err(AppError::Unauthorized);
    }

    let activity: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;

    let actor_id = activity
        .get("actor")
        .and_then(|a: &serde_json::Value| a.as_str())
        .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?
        .to_string();

    let signature_key_id = crate::federation::extract_signature_key_id(&headers)?;
    if !crate::federation::key_id_matches_actor(&signature_key_id, &actor_id) {
        return Err(AppError::Validation(
            "Signature keyId actor mismatch".to_string(),
        ));
    }

    let actor_domain = crate::federation::extract_actor_domain(&signature_key_id)?;
    if state.db.is_domain_blocked(&actor_domain).await? {
        return Err(AppError::Forbidden);
    }

    let public_key_pem =
        crate::federation::fetch_public_key(&signature_key_id, state.http_client.as_ref()).await?;

    crate::federation::verify_signature("POST", "/inbox", &headers, Some(&body), &public_key_pem)?;

    let account = state.db.get_account().await?.ok_or(AppError::NotFound)?;
    let local_address = format!("{}@{}", account.username, state.config.server.domain);
    let owner_iri = actor_url(&state, &account.username);
    let key_id = key_id_for(&owner_iri);
    let delivery = Arc::new(
        crate::federation::ActivityDelivery::new(
            state.http_client.clone(),
            owner_iri,
            key_id.clone(),
            account.private_key_pem.clone(),
        )
        .with_retry_config(
            state.config.federation.delivery_retry_base_seconds,
            state.config.federation.delivery_retry_cap_seconds,
            state.config.federation.delivery_max_attempts,
        ),
    );
    let callbacks = Arc::new(DefaultCallbacks::new(
        state.db.clone(),
        local_address.clone(),
        state.config.federation.max_inbox_forwarding_recursion_depth,
    ));

    let processor = crate::federation::ActivityProcessor::new(
        state.db.clone(),
        state.timeline_cache.clone(),
        state.profile_cache.clone(),
        state.http_client.clone(),
        local_address,
        state.config.server.protocol.clone(),
    )
    .with_delivery(delivery)
    .with_callbacks(callbacks)
    .with_signing_key(key_id, account.private_key_pem.clone());

    processor.process(activity, &actor_id).await?;

    Ok(())
}

/// GET /users/:username/outbox
async fn outbox_collection(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    collection_response(&state, &owner_iri, collections::OUTBOX, query).await
}

/// POST /users/:username/outbox — C2S submission (single local actor is
/// always `current_user`).
async fn outbox_post(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, AppError> {
    let account = verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    let key_id = key_id_for(&owner_iri);
    let local_address = format!("{}@{}", account.username, state.config.server.domain);

    let callbacks: Arc<dyn crate::federation::callbacks::OutboxCallbacks> = Arc::new(
        DefaultCallbacks::new(
            state.db.clone(),
            local_address,
            state.config.federation.max_delivery_recursion_depth,
        ),
    );
    let delivery = Arc::new(
        crate::federation::ActivityDelivery::new(
            state.http_client.clone(),
            owner_iri.clone(),
            key_id.clone(),
            account.private_key_pem.clone(),
        )
        .with_retry_config(
            state.config.federation.delivery_retry_base_seconds,
            state.config.federation.delivery_retry_cap_seconds,
            state.config.federation.delivery_max_attempts,
        ),
    );

    let processor = crate::federation::OutboxProcessor::new(
        state.db.clone(),
        delivery,
        callbacks,
        owner_iri.clone(),
        state.config.server.domain.clone(),
        key_id,
        account.private_key_pem,
        state.config.federation.collection_page_size,
        state.config.federation.max_delivery_recursion_depth,
    );

    let activity_id = processor
        .post(state.http_client.as_ref(), &owner_iri, &owner_iri, body)
        .await?;

    let body = Json(serde_json::json!({ "id": activity_id.clone() }));
    Ok((StatusCode::CREATED, [("Location", activity_id)], body).into_response())
}

/// GET /users/:username/followers
async fn followers(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    collection_response(&state, &owner_iri, collections::FOLLOWERS, query).await
}

/// GET /users/:username/following
async fn following(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    collection_response(&state, &owner_iri, collections::FOLLOWING, query).await
}

/// GET /users/:username/liked
async fn liked(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    collection_response(&state, &owner_iri, collections::LIKED, query).await
}

/// GET /users/:username/activities/:ulid
async fn activity_document(
    State(state): State<AppState>,
    Path((username, ulid)): Path<(String, String)>,
) -> Result<Response, AppError> {
    verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    let iri = format!("{owner_iri}/activities/{ulid}");
    record_document_response(&state, &iri).await
}

/// GET /users/:username/objects/:ulid
async fn object_document(
    State(state): State<AppState>,
    Path((username, ulid)): Path<(String, String)>,
) -> Result<Response, AppError> {
    verified_account(&state, &username).await?;
    let owner_iri = actor_url(&state, &username);
    let iri = format!("{owner_iri}/objects/{ulid}");
    record_document_response(&state, &iri).await
}

async fn record_document_response(state: &AppState, iri: &str) -> Result<Response, AppError> {
    let record = state.db.get_record(iri).await?.ok_or(AppError::NotFound)?;
    if record.kind == "tombstone" {
        return Ok((
            StatusCode::GONE,
            [("Content-Type", ACTIVITY_JSON)],
            Json(record.body_value()),
        )
            .into_response());
    }
    Ok((
        [("Content-Type", ACTIVITY_JSON)],
        Json(record.body_value()),
    )
        .into_response())
}
