//! Outbox (C2S) pipeline (`spec.md` §4.F.2)
//!
//! The mirror image of `federation::activity`'s inbox pipeline, run when the
//! single local actor posts to their own outbox: authenticate the caller,
//! verify the activity isn't spoofing someone else's identity, wrap bare
//! objects in a `Create`, mint fresh ids, strip `bto`/`bcc` for the stored
//! copy, dispatch side effects, append to the outbox collection, and hand
//! off delivery to the background task pool.

use std::sync::Arc;

use chrono::Utc;

use crate::activitypub::Vocabulary;
use crate::collections::{self, CollectionEngine};
use crate::data::{Database, StoredRecord};
use crate::error::AppError;
use crate::federation::callbacks::OutboxCallbacks;
use crate::federation::resolver::Resolver;

/// Runs the C2S outbox pipeline for the single local actor.
pub struct OutboxProcessor {
    db: Arc<Database>,
    delivery: Arc<super::ActivityDelivery>,
    callbacks: Arc<dyn OutboxCallbacks>,
    local_actor_iri: String,
    local_domain: String,
    key_id: String,
    private_key_pem: String,
    collection_page_size: i64,
    max_delivery_recursion_depth: u32,
}

impl OutboxProcessor {
    pub fn new(
        db: Arc<Database>,
        delivery: Arc<super::ActivityDelivery>,
        callbacks: Arc<dyn OutboxCallbacks>,
        local_actor_iri: String,
        local_domain: String,
        key_id: String,
        private_key_pem: String,
        collection_page_size: i64,
        max_delivery_recursion_depth: u32,
    ) -> Self {
        Self {
            db,
            delivery,
            callbacks,
            local_actor_iri,
            local_domain,
            key_id,
            private_key_pem,
            collection_page_size,
            max_delivery_recursion_depth,
        }
    }

    fn resolver(&self, http_client: &reqwest::Client) -> Resolver<'_> {
        Resolver::new(
            &self.db,
            http_client,
            self.local_domain.clone(),
            self.key_id.clone(),
            self.private_key_pem.clone(),
        )
    }

    /// Post `body` to `outbox_owner_iri`'s outbox on behalf of
    /// `current_user_iri`. Returns the minted activity id on success.
    pub async fn post(
        &self,
        http_client: &reqwest::Client,
        outbox_owner_iri: &str,
        current_user_iri: &str,
        body: serde_json::Value,
    ) -> Result<String, AppError> {
        // 2. Authenticate: caller must own the outbox.
        if !self
            .callbacks
            .authenticate_post_outbox(current_user_iri, outbox_owner_iri)
        {
            return Err(AppError::Unauthorized);
        }

        // 1/4. Wrap a bare object into a Create if the body isn't itself an
        // activity.
        let mut activity = self.wrap_if_bare_object(body, current_user_iri)?;

        // 3. Body hook: actor/attributedTo must be the current user, and any
        // embedded object referenced by id must be owned by them too.
        self.verify_actor_and_attributed_to(&activity, current_user_iri)?;
        if let Some(object_iri) = activity
            .get("object")
            .and_then(|o| o.as_str())
            .map(str::to_string)
        {
            self.resolver(http_client)
                .dereference_and_verify_owner(&object_iri, current_user_iri)
                .await?;
        }

        // 6. Mint fresh ids, ignoring any client-supplied id.
        let activity_id = Database::new_id(current_user_iri, "activities");
        activity["id"] = serde_json::json!(activity_id);
        self.mint_embedded_object_id(&mut activity, current_user_iri);

        // 5. Keep a full in-memory copy (with bto/bcc) for delivery
        // expansion, and a stripped copy for storage/forwarding.
        let mut stored = Vocabulary::new(activity.clone());
        stored.strip_bcc();

        self.persist(stored.value().clone(), &activity_id, current_user_iri)
            .await?;

        // 7. Side-effect dispatch, mirroring the inbox direction.
        self.dispatch(&activity, current_user_iri).await?;

        // 8. Append to the outbox collection.
        let engine = CollectionEngine::new(&self.db, self.collection_page_size);
        engine
            .add(outbox_owner_iri, collections::OUTBOX, &activity_id)
            .await?;

        // 10. Hand off delivery asynchronously; failures there never
        // surface to the HTTP caller (spec.md §4.G).
        self.deliver_async(Clone::clone(http_client), activity, current_user_iri.to_string());

        Ok(activity_id)
    }

    fn wrap_if_bare_object(
        &self,
        body: serde_json::Value,
        current_user_iri: &str,
    ) -> Result<serde_json::Value, AppError> {
        let activity_kind = body
            .get("type")
            .and_then(|t| t.as_str())
            .and_then(crate::activitypub::ActivityKind::from_str);

        if activity_kind.is_some() {
            return Ok(body);
        }

        let mut create = serde_json::Map::new();
        create.insert("type".to_string(), serde_json::json!("Create"));
        create.insert("actor".to_string(), serde_json::json!(current_user_iri));
        for field in ["to", "bto", "cc", "bcc", "audience"] {
            if let Some(value) = body.get(field) {
                create.insert(field.to_string(), value.clone());
            }
        }
        create.insert("object".to_string(), body);
        Ok(serde_json::Value::Object(create))
    }

    fn verify_actor_and_attributed_to(
        &self,
        activity: &serde_json::Value,
        current_user_iri: &str,
    ) -> Result<(), AppError> {
        if let Some(actor) = activity.get("actor").and_then(|a| a.as_str()) {
            if actor != current_user_iri {
                return Err(AppError::ActorSpoofed);
            }
            return Ok(());
        }

        let is_create = activity
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t == "Create");
        if is_create {
            let attributed_to = activity
                .get("object")
                .and_then(|o| o.get("attributedTo"))
                .and_then(|a| a.as_str());
            if attributed_to.is_some_and(|a| a != current_user_iri) {
                return Err(AppError::ActorSpoofed);
            }
        }
        Ok(())
    }

    fn mint_embedded_object_id(&self, activity: &mut serde_json::Value, current_user_iri: &str) {
        let is_create = activity
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t == "Create");
        if !is_create {
            return;
        }
        if let Some(object) = activity.get_mut("object").and_then(|o| o.as_object_mut()) {
            if !object.contains_key("id") || object.get("id").and_then(|i| i.as_str()).is_none() {
                object.insert(
                    "id".to_string(),
                    serde_json::json!(Database::new_id(current_user_iri, "objects")),
                );
            }
            object
                .entry("attributedTo")
                .or_insert_with(|| serde_json::json!(current_user_iri));
        }
    }

    async fn persist(
        &self,
        activity: serde_json::Value,
        activity_id: &str,
        current_user_iri: &str,
    ) -> Result<(), AppError> {
        let record = StoredRecord {
            iri: activity_id.to_string(),
            kind: "activity".to_string(),
            type_: activity
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("Activity")
                .to_string(),
            actor_iri: Some(current_user_iri.to_string()),
            attributed_to: None,
            in_reply_to: None,
            published: Some(Utc::now().to_rfc3339()),
            body: activity.to_string(),
            former_type: None,
            created_at: Utc::now(),
        };
        self.db.put_record(&record).await?;

        if let Some(object) = activity
            .get("object")
            .filter(|o| o.is_object())
            .and_then(|o| o.get("id").and_then(|i| i.as_str()).map(|_| o.clone()))
        {
            let object_id = object.get("id").and_then(|i| i.as_str()).unwrap();
            let object_record = StoredRecord {
                iri: object_id.to_string(),
                kind: "object".to_string(),
                type_: object
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("Object")
                    .to_string(),
                actor_iri: None,
                attributed_to: object
                    .get("attributedTo")
                    .and_then(|a| a.as_str())
                    .map(str::to_string),
                in_reply_to: object
                    .get("inReplyTo")
                    .and_then(|r| r.as_str())
                    .map(str::to_string),
                published: Some(Utc::now().to_rfc3339()),
                body: object.to_string(),
                former_type: None,
                created_at: Utc::now(),
            };
            self.db.put_record(&object_record).await?;
        }

        Ok(())
    }

    /// Side effects mirroring the inbox dispatch, applied in the outgoing
    /// direction: Follow records a pending relationship, Block records it
    /// without delivering to the target, Add/Remove mutate local
    /// collections immediately.
    async fn dispatch(
        &self,
        activity: &serde_json::Value,
        current_user_iri: &str,
    ) -> Result<(), AppError> {
        let Some(activity_type) = activity.get("type").and_then(|t| t.as_str()) else {
            return Ok(());
        };

        match activity_type {
            "Follow" => {
                let target = activity
                    .get("object")
                    .and_then(|o| o.as_str().map(str::to_string))
                    .ok_or(AppError::ObjectRequired)?;
                self.db
                    .upsert_relationship(current_user_iri, &target, "follow", "pending", None)
                    .await?;
                self.callbacks.on_follow(current_user_iri, &target).await?;
            }
            "Block" => {
                let target = activity
                    .get("object")
                    .and_then(|o| o.as_str())
                    .ok_or(AppError::ObjectRequired)?;
                self.db
                    .upsert_relationship(current_user_iri, target, "block", "accepted", None)
                    .await?;
            }
            "Undo" => {
                if let Some(undone_type) = activity
                    .get("object")
                    .and_then(|o| o.get("type"))
                    .and_then(|t| t.as_str())
                {
                    if undone_type == "Follow" {
                        if let Some(target) = activity
                            .get("object")
                            .and_then(|o| o.get("object"))
                            .and_then(|t| t.as_str())
                        {
                            self.db
                                .remove_relationship(current_user_iri, target, "follow")
                                .await?;
                        }
                    }
                }
            }
            "Add" | "Remove" => {
                let object_iri = activity
                    .get("object")
                    .and_then(|o| o.as_str().map(str::to_string))
                    .ok_or(AppError::ObjectRequired)?;
                let target = activity
                    .get("target")
                    .and_then(|t| t.as_str())
                    .ok_or(AppError::TargetRequired)?;
                if activity_type == "Add" {
                    self.db.collection_add(target, "featured", &object_iri).await?;
                } else {
                    self.db
                        .collection_remove(target, "featured", &object_iri)
                        .await?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Resolve recipients and fan out delivery on a background task, so the
    /// HTTP response never blocks on outbound federation (`spec.md` §4.G).
    fn deliver_async(&self, http_client: reqwest::Client, activity: serde_json::Value, actor_iri: String) {
        let delivery = self.delivery.clone();
        let db = self.db.clone();
        let local_domain = self.local_domain.clone();
        let key_id = self.key_id.clone();
        let private_key_pem = self.private_key_pem.clone();
        let max_depth = self.max_delivery_recursion_depth;

        tokio::spawn(async move {
            let vocab = Vocabulary::new(activity);
            let resolver = Resolver::new(&db, &http_client, local_domain, key_id, private_key_pem);
            let inbox_uris =
                super::delivery::resolve_recipients(&db, &resolver, &vocab, &actor_iri, max_depth)
                    .await;
            if inbox_uris.is_empty() {
                return;
            }

            let mut stripped = vocab;
            stripped.strip_bcc();
            let results = delivery
                .deliver_to_followers(stripped.into_value(), inbox_uris)
                .await;
            let failures = results.iter().filter(|r| !r.success).count();
            if failures > 0 {
                tracing::warn!(failures, "Some outbox deliveries failed");
            }
        });
    }
}
