//! Collection Engine (`spec.md` §4.E)
//!
//! Builds paged `OrderedCollection`/`OrderedCollectionPage` documents over
//! the `collection_items` table, and mutates them on behalf of the
//! Side-Effect Actor. Visibility filtering is delegated to
//! [`crate::activitypub::Vocabulary::visible_to`] applied per item, so a
//! page never over-fetches past what the viewer is allowed to see.

use serde_json::{Value, json};

use crate::activitypub::Vocabulary;
use crate::data::Database;
use crate::error::AppError;

/// The collections a local actor owns, keyed by the `kind` column in
/// `collection_items`.
pub const INBOX: &str = "inbox";
pub const OUTBOX: &str = "outbox";
pub const FOLLOWERS: &str = "followers";
pub const FOLLOWING: &str = "following";
pub const LIKED: &str = "liked";

/// Cursor requested by a page fetch.
#[derive(Debug, Clone, Default)]
pub struct PageCursor {
    pub max_id: Option<String>,
    pub min_id: Option<String>,
}

/// The collection engine itself. Stateless; holds only a page-size default
/// pulled from configuration.
pub struct CollectionEngine<'a> {
    db: &'a Database,
    page_size: i64,
}

impl<'a> CollectionEngine<'a> {
    pub fn new(db: &'a Database, page_size: i64) -> Self {
        Self { db, page_size }
    }

    /// The root `OrderedCollection` summary document: id, totalItems, and
    /// `first`/`last` page links. No items are embedded here.
    pub async fn summary(&self, owner_iri: &str, kind: &str) -> Result<Value, AppError> {
        let total = self.db.collection_total(owner_iri, kind).await?;
        let collection_iri = format!("{}/{}", owner_iri.trim_end_matches('/'), kind);
        Ok(json!({
            "@context": crate::activitypub::default_context(),
            "id": collection_iri,
            "type": "OrderedCollection",
            "totalItems": total,
            "first": format!("{collection_iri}?page=true"),
        }))
    }

    /// A single `OrderedCollectionPage`, with items filtered by
    /// `visible_to(viewer_iri)` and cursor semantics per DESIGN.md Open
    /// Question 1 (exclusive bounds, strict descending default order).
    pub async fn page(
        &self,
        owner_iri: &str,
        kind: &str,
        cursor: PageCursor,
        viewer_iri: Option<&str>,
    ) -> Result<Value, AppError> {
        let rows = self
            .db
            .collection_page(
                owner_iri,
                kind,
                cursor.max_id.as_deref(),
                cursor.min_id.as_deref(),
                self.page_size,
            )
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut last_position: Option<String> = None;
        let mut first_position: Option<String> = None;

        for (position_id, item_iri) in &rows {
            if first_position.is_none() {
                first_position = Some(position_id.clone());
            }
            last_position = Some(position_id.clone());

            if let Some(record) = self.db.get_record(item_iri).await? {
                let value = record.body_value();
                let visible = viewer_iri
                    .map(|viewer| Vocabulary::new(value.clone()).visible_to(viewer))
                    .unwrap_or_else(|| {
                        crate::activitypub::is_public_iri(
                            Vocabulary::new(value.clone())
                                .public_recipients()
                                .first()
                                .map(String::as_str)
                                .unwrap_or_default(),
                        )
                    });
                if visible {
                    items.push(value);
                }
            } else {
                items.push(json!(item_iri));
            }
        }

        let collection_iri = format!("{}/{}", owner_iri.trim_end_matches('/'), kind);
        let mut page = json!({
            "@context": crate::activitypub::default_context(),
            "id": format!("{collection_iri}?page=true"),
            "type": "OrderedCollectionPage",
            "partOf": collection_iri,
            "orderedItems": items,
        });

        if let Some(first) = first_position {
            page["prev"] = json!(format!("{collection_iri}?page=true&min_id={first}"));
        }
        if let Some(last) = last_position {
            if rows.len() as i64 == self.page_size {
                page["next"] = json!(format!("{collection_iri}?page=true&max_id={last}"));
            }
        }

        Ok(page)
    }

    /// `update_collection(iri, {add})` — append an item, idempotent.
    pub async fn add(&self, owner_iri: &str, kind: &str, item_iri: &str) -> Result<(), AppError> {
        self.db.collection_add(owner_iri, kind, item_iri).await
    }

    /// `update_collection(iri, {remove})` — drop an item if present.
    pub async fn remove(&self, owner_iri: &str, kind: &str, item_iri: &str) -> Result<(), AppError> {
        self.db.collection_remove(owner_iri, kind, item_iri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_cursor_default_is_unbounded() {
        let cursor = PageCursor::default();
        assert!(cursor.max_id.is_none());
        assert!(cursor.min_id.is_none());
    }
}
