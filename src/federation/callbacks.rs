//! Callback surface (`spec.md` §6.3, §4.F)
//!
//! The Side-Effect Actor dispatches through these traits rather than
//! hardcoding policy inline, so a deployment can override authentication,
//! authorization, or forwarding policy without touching the pipeline
//! itself. [`DefaultCallbacks`] reproduces the policy `federation::activity`
//! already enforces inline (domain blocks, local-actor-only follow
//! targets, recursion bounds) as the out-of-the-box behavior.

use crate::error::AppError;

/// The three outcomes `spec.md`'s inbound Follow handling can reach:
/// accept, reject, or leave pending for manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDecision {
    AutomaticallyAccept,
    AutomaticallyReject,
    DoNothing,
}

/// Hooks the inbox pipeline consults at each numbered step of
/// `spec.md` §4.F.1.
#[async_trait::async_trait]
pub trait InboxCallbacks: Send + Sync {
    /// Step 4: does the verified signer match the activity's actor (or, for
    /// forwarded activities, is it otherwise acceptable)?
    async fn authenticate_post_inbox(&self, signer_iri: &str, actor_iri: &str) -> bool {
        signer_iri == actor_iri
    }

    /// Step 6: is this activity's actor authorized to act on `object_iri`?
    /// Default: always true; type-specific ownership checks happen in the
    /// dispatch handlers themselves.
    async fn authorize_post_inbox(&self, _actor_iri: &str, _object_iri: &str) -> bool {
        true
    }

    /// Should this activity be dropped before any side effects run?
    async fn blocked(&self, actor_iri: &str) -> Result<bool, AppError>;

    /// Called when a Follow activity targets a local actor: should it be
    /// accepted automatically, rejected automatically, or left for the
    /// embedding application to resolve later? Default: always accept.
    async fn on_follow(&self, _actor_iri: &str, _target_iri: &str) -> FollowDecision {
        FollowDecision::AutomaticallyAccept
    }

    /// Step 10: should this activity be forwarded to our followers'
    /// inboxes (inbox forwarding)? Default: only `Announce`/`Create` with a
    /// public audience.
    fn filter_forwarding(&self, activity_type: &str, is_public: bool) -> bool {
        is_public && matches!(activity_type, "Announce" | "Create")
    }

    fn max_inbox_forwarding_recursion_depth(&self) -> u32 {
        4
    }
}

/// Hooks the outbox (C2S) pipeline consults at each numbered step of
/// `spec.md` §4.F.2.
#[async_trait::async_trait]
pub trait OutboxCallbacks: Send + Sync {
    /// Step 2: does `current_user_iri` own this outbox?
    fn authenticate_post_outbox(&self, current_user_iri: &str, outbox_owner_iri: &str) -> bool {
        current_user_iri == outbox_owner_iri
    }

    /// Called on every successful Follow activity delivered through the
    /// outbox, mirroring the inbox side of the same hook name.
    async fn on_follow(&self, _actor_iri: &str, _target_iri: &str) -> Result<(), AppError> {
        Ok(())
    }

    fn max_delivery_recursion_depth(&self) -> u32 {
        4
    }
}

/// The engine's built-in policy, grounded in the checks `ActivityProcessor`
/// already performs inline (domain blocklist, local-follow-target scoping).
pub struct DefaultCallbacks {
    db: std::sync::Arc<crate::data::Database>,
    local_address: String,
    recursion_depth: u32,
}

impl DefaultCallbacks {
    pub fn new(
        db: std::sync::Arc<crate::data::Database>,
        local_address: String,
        recursion_depth: u32,
    ) -> Self {
        Self {
            db,
            local_address,
            recursion_depth,
        }
    }
}

#[async_trait::async_trait]
impl InboxCallbacks for DefaultCallbacks {
    async fn blocked(&self, actor_iri: &str) -> Result<bool, AppError> {
        self.db
            .any_blocked(&self.local_address, &[actor_iri.to_string()])
            .await
    }

    fn max_inbox_forwarding_recursion_depth(&self) -> u32 {
        self.recursion_depth
    }
}

#[async_trait::async_trait]
impl OutboxCallbacks for DefaultCallbacks {
    fn max_delivery_recursion_depth(&self) -> u32 {
        self.recursion_depth
    }
}
