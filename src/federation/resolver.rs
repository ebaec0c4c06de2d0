//! Resolver (`spec.md` §4.D)
//!
//! Dereferences an IRI to its AS2 document, branching on whether the IRI is
//! local (read straight from the `records`/account tables, no network) or
//! remote (signed GET through [`crate::federation::transport`], bounded
//! redirect-following, parsed into a [`Vocabulary`]).

use crate::activitypub::Vocabulary;
use crate::data::Database;
use crate::error::AppError;

const MAX_REDIRECTS: usize = 5;

/// If `iri` is `{owner}/{collection-kind}`, split it into the owner IRI and
/// the static `kind` string `collections.rs` keys `collection_items` by.
fn split_collection_iri(iri: &str) -> Option<(String, &'static str)> {
    let trimmed = iri.trim_end_matches('/');
    for kind in [
        crate::collections::INBOX,
        crate::collections::OUTBOX,
        crate::collections::FOLLOWERS,
        crate::collections::FOLLOWING,
        crate::collections::LIKED,
    ] {
        if let Some(owner) = trimmed.strip_suffix(&format!("/{kind}")) {
            if !owner.is_empty() {
                return Some((owner.to_string(), kind));
            }
        }
    }
    None
}

/// Resolves IRIs to AS2 documents for the inbox/outbox/collection engine.
pub struct Resolver<'a> {
    db: &'a Database,
    http_client: &'a reqwest::Client,
    local_domain: String,
    key_id: String,
    private_key_pem: String,
}

impl<'a> Resolver<'a> {
    pub fn new(
        db: &'a Database,
        http_client: &'a reqwest::Client,
        local_domain: String,
        key_id: String,
        private_key_pem: String,
    ) -> Self {
        Self {
            db,
            http_client,
            local_domain,
            key_id,
            private_key_pem,
        }
    }

    /// Dereference `iri`, returning its AS2 document as a [`Vocabulary`].
    ///
    /// Local IRIs resolve against the `records` table, no network involved.
    /// Remote IRIs are fetched over a signed GET; the underlying
    /// `reqwest::Client` is configured (see [`crate::AppState::new`]) to cap
    /// redirects at [`MAX_REDIRECTS`], consistent with `spec.md` §4.D.
    pub async fn dereference(&self, iri: &str) -> Result<Vocabulary, AppError> {
        if Database::is_local_iri(iri, &self.local_domain) {
            return self.dereference_local(iri).await;
        }
        self.dereference_remote(iri).await
    }

    async fn dereference_local(&self, iri: &str) -> Result<Vocabulary, AppError> {
        if let Some((owner_iri, kind)) = split_collection_iri(iri) {
            let items = self.db.collection_all_items(&owner_iri, kind).await?;
            return Ok(Vocabulary::new(serde_json::json!({
                "id": iri,
                "type": "OrderedCollection",
                "totalItems": items.len(),
                "orderedItems": items,
            })));
        }

        match self.db.get_record(iri).await? {
            Some(record) if record.kind == "tombstone" => Err(AppError::Gone(iri.to_string())),
            Some(record) => Ok(Vocabulary::new(record.body_value())),
            None => Err(AppError::NotFound),
        }
    }

    async fn dereference_remote(&self, iri: &str) -> Result<Vocabulary, AppError> {
        let value = crate::federation::transport::signed_get(
            self.http_client,
            iri,
            &self.key_id,
            &self.private_key_pem,
        )
        .await?;
        Ok(Vocabulary::new(value))
    }

    /// Dereference and confirm the document's actor/attributedTo matches
    /// `expected_actor` — the anti-spoof check used for Update/Like/Announce
    /// targets (`spec.md` §4.F.1 step 7).
    pub async fn dereference_and_verify_owner(
        &self,
        iri: &str,
        expected_actor: &str,
    ) -> Result<Vocabulary, AppError> {
        let vocab = self.dereference(iri).await?;
        let owner = vocab
            .attributed_to()
            .or_else(|| vocab.actor_iri())
            .ok_or_else(|| AppError::ObjectSpoofed(format!("{iri} has no owner")))?;
        if owner != expected_actor {
            return Err(AppError::ObjectSpoofed(format!(
                "{iri} is owned by {owner}, not {expected_actor}"
            )));
        }
        Ok(vocab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_local_iri_matches_configured_domain_case_insensitively() {
        assert!(Database::is_local_iri(
            "https://Example.COM/users/alice",
            "example.com"
        ));
        assert!(!Database::is_local_iri(
            "https://remote.example/users/bob",
            "example.com"
        ));
    }

    #[test]
    fn split_collection_iri_recognizes_known_collection_kinds() {
        assert_eq!(
            split_collection_iri("https://example.com/users/alice/followers"),
            Some(("https://example.com/users/alice".to_string(), "followers"))
        );
        assert_eq!(
            split_collection_iri("https://example.com/users/alice/outbox/"),
            Some(("https://example.com/users/alice".to_string(), "outbox"))
        );
        assert_eq!(
            split_collection_iri("https://example.com/users/alice"),
            None
        );
        assert_eq!(
            split_collection_iri("https://example.com/followers"),
            Some(("https://example.com".to_string(), "followers"))
        );
    }
}
