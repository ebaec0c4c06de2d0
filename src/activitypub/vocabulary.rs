//! Typed AS2 objects/activities, discriminated by the JSON `type` field.
//!
//! Properties stay as a `serde_json::Value` property bag (matching the
//! federation module's existing style) rather than a fully generic typed
//! tree; `ActivityKind`/`ObjectKind` give the dispatch code in
//! `federation::activity` and `federation::outbox` an exhaustive match
//! instead of string comparisons scattered through the codebase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The special audience IRI meaning "unrestricted, world-readable".
pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Known aliases for the Public collection some implementations still use.
const PUBLIC_ALIASES: &[&str] = &[
    PUBLIC,
    "as:Public",
    "Public",
];

pub fn is_public_iri(iri: &str) -> bool {
    PUBLIC_ALIASES.iter().any(|alias| *alias == iri)
}

/// Activity types dispatched by the Side-Effect Actor (`spec.md` §4.F.1/.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Undo,
    Like,
    Announce,
    Add,
    Remove,
    Block,
}

impl ActivityKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            "Follow" => Self::Follow,
            "Accept" => Self::Accept,
            "Reject" => Self::Reject,
            "Undo" => Self::Undo,
            "Like" => Self::Like,
            "Announce" => Self::Announce,
            "Add" => Self::Add,
            "Remove" => Self::Remove,
            "Block" => Self::Block,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Undo => "Undo",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Block => "Block",
        }
    }

    /// Types whose Undo can revert a recorded side effect (`spec.md` §4.F.1
    /// step 9 Undo clause).
    pub fn undoable(s: &str) -> bool {
        matches!(s, "Accept" | "Follow" | "Block" | "Like" | "Announce")
    }
}

/// Non-activity object types the engine persists or reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Note,
    Article,
    Image,
    Person,
    Group,
    Organization,
    Service,
    Application,
    Tombstone,
    Collection,
    OrderedCollection,
    CollectionPage,
    OrderedCollectionPage,
}

impl ObjectKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Note" => Self::Note,
            "Article" => Self::Article,
            "Image" => Self::Image,
            "Person" => Self::Person,
            "Group" => Self::Group,
            "Organization" => Self::Organization,
            "Service" => Self::Service,
            "Application" => Self::Application,
            "Tombstone" => Self::Tombstone,
            "Collection" => Self::Collection,
            "OrderedCollection" => Self::OrderedCollection,
            "CollectionPage" => Self::CollectionPage,
            "OrderedCollectionPage" => Self::OrderedCollectionPage,
            _ => return None,
        })
    }

    pub fn is_actor(&self) -> bool {
        matches!(
            self,
            Self::Person | Self::Group | Self::Organization | Self::Service | Self::Application
        )
    }
}

/// An enumerated `@context` IRI the engine recognizes, per `spec.md` §4.A —
/// aliasing only, not general JSON-LD expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Context {
    Known(KnownContext),
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnownContext {
    #[serde(rename = "https://www.w3.org/ns/activitystreams")]
    ActivityStreams,
    #[serde(rename = "https://w3id.org/security/v1")]
    SecurityV1,
}

impl KnownContext {
    pub fn as_iri(&self) -> &'static str {
        match self {
            Self::ActivityStreams => "https://www.w3.org/ns/activitystreams",
            Self::SecurityV1 => "https://w3id.org/security/v1",
        }
    }
}

/// The default `@context` the engine emits on every outgoing document:
/// activitystreams plus the security vocabulary (for `publicKey`).
pub fn default_context() -> Value {
    serde_json::json!([
        KnownContext::ActivityStreams.as_iri(),
        KnownContext::SecurityV1.as_iri(),
    ])
}

/// A thin typed view over an AS2 JSON value. Construction never fails (an
/// AS2 document without a recognized `type` is still a `Vocabulary` with
/// `kind = None`); callers that require a known type check `kind`/`activity`.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    value: Value,
}

impl Vocabulary {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn id(&self) -> Option<&str> {
        self.value.get("id").and_then(Value::as_str)
    }

    /// `type` may be a scalar or an array (`spec.md` §4.A); this returns the
    /// first string type tag, which is what dispatch keys on throughout.
    pub fn primary_type(&self) -> Option<&str> {
        match self.value.get("type")? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.iter().find_map(Value::as_str),
            _ => None,
        }
    }

    pub fn activity_kind(&self) -> Option<ActivityKind> {
        self.primary_type().and_then(ActivityKind::from_str)
    }

    pub fn object_kind(&self) -> Option<ObjectKind> {
        self.primary_type().and_then(ObjectKind::from_str)
    }

    /// `actor` may be an IRI string or an embedded object with an `id`.
    pub fn actor_iri(&self) -> Option<&str> {
        let actor = self.value.get("actor")?;
        actor.as_str().or_else(|| actor.get("id")?.as_str())
    }

    pub fn object_iri(&self) -> Option<&str> {
        let object = self.value.get("object")?;
        object.as_str().or_else(|| object.get("id")?.as_str())
    }

    pub fn attributed_to(&self) -> Option<&str> {
        let attributed_to = self.value.get("attributedTo")?;
        attributed_to
            .as_str()
            .or_else(|| attributed_to.get("id")?.as_str())
    }

    /// Union of `to`/`bto`/`cc`/`bcc`/`audience`, per `spec.md` §4.G step 1.
    pub fn recipients(&self) -> Vec<String> {
        let mut out = Vec::new();
        for field in ["to", "bto", "cc", "bcc", "audience"] {
            collect_iris(self.value.get(field), &mut out);
        }
        out
    }

    /// `to`/`cc`/`audience` only — the fields retained after `bto`/`bcc`
    /// stripping (`spec.md` §4.F.2 step 5, §4.G step 6).
    pub fn public_recipients(&self) -> Vec<String> {
        let mut out = Vec::new();
        for field in ["to", "cc", "audience"] {
            collect_iris(self.value.get(field), &mut out);
        }
        out
    }

    pub fn strip_bcc(&mut self) {
        if let Some(obj) = self.value.as_object_mut() {
            obj.remove("bto");
            obj.remove("bcc");
        }
    }

    /// Visibility predicate from `spec.md` §4.E `get_page_for_viewer`: viewer
    /// is in `to`/`cc`/`audience`, or (for `bcc`) is the viewer it was
    /// addressed to directly, or is the activity's own actor.
    pub fn visible_to(&self, viewer_iri: &str) -> bool {
        if is_public_iri(viewer_iri) {
            return self.public_recipients().iter().any(|r| is_public_iri(r));
        }
        if self.actor_iri() == Some(viewer_iri) {
            return true;
        }
        let mut addressed = Vec::new();
        for field in ["to", "cc", "bcc", "audience"] {
            collect_iris(self.value.get(field), &mut addressed);
        }
        addressed.iter().any(|r| r == viewer_iri || is_public_iri(r))
    }

    pub fn published(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.value
            .get("published")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }
}

fn collect_iris(value: Option<&Value>, out: &mut Vec<String>) {
    let Some(value) = value else { return };
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    Value::Object(_) => {
                        if let Some(id) = item.get("id").and_then(Value::as_str) {
                            out.push(id.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Object(_) => {
            if let Some(id) = value.get("id").and_then(Value::as_str) {
                out.push(id.to_string());
            }
        }
        _ => {}
    }
}

/// Normalize a parsed-then-reserialized AS2 value for the round-trip
/// property described in `spec.md` §4.A: sort object keys and rewrite
/// `@context` to its canonical array form, so `normalize(parse(x)) ==
/// normalize(x)` regardless of property order or context representation.
pub fn normalize(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        if let Some(ctx) = obj.remove("@context") {
            obj.insert("@context".to_string(), normalize_context(ctx));
        }
    }
    sort_object_keys(&mut value);
    value
}

fn normalize_context(ctx: Value) -> Value {
    match ctx {
        Value::String(s) => Value::Array(vec![Value::String(s)]),
        Value::Array(items) => Value::Array(items),
        other => other,
    }
}

fn sort_object_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.clone().into_iter().collect();
            for (_, v) in entries.iter_mut() {
                sort_object_keys(v);
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            *map = entries.into_iter().collect();
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sort_object_keys(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primary_type_handles_scalar_and_array() {
        let scalar = Vocabulary::new(json!({"type": "Note"}));
        assert_eq!(scalar.primary_type(), Some("Note"));

        let array = Vocabulary::new(json!({"type": ["Note", "Object"]}));
        assert_eq!(array.primary_type(), Some("Note"));
    }

    #[test]
    fn recipients_collects_all_addressing_fields() {
        let v = Vocabulary::new(json!({
            "to": "https://a.example/users/a",
            "cc": ["https://b.example/users/b"],
            "audience": {"id": "https://c.example/users/c"}
        }));
        let mut r = v.recipients();
        r.sort();
        assert_eq!(
            r,
            vec![
                "https://a.example/users/a",
                "https://b.example/users/b",
                "https://c.example/users/c",
            ]
        );
    }

    #[test]
    fn visible_to_respects_public_and_direct_addressing() {
        let public = Vocabulary::new(json!({"actor": "https://a.example/users/a", "to": [PUBLIC]}));
        assert!(public.visible_to(PUBLIC));
        assert!(public.visible_to("https://anyone.example/users/x"));

        let direct = Vocabulary::new(json!({
            "actor": "https://a.example/users/a",
            "to": ["https://b.example/users/b"]
        }));
        assert!(direct.visible_to("https://b.example/users/b"));
        assert!(!direct.visible_to("https://c.example/users/c"));
        assert!(direct.visible_to("https://a.example/users/a"));
    }

    #[test]
    fn normalize_is_order_independent() {
        let a = normalize(json!({"b": 1, "a": 2, "@context": "https://www.w3.org/ns/activitystreams"}));
        let b = normalize(json!({"@context": ["https://www.w3.org/ns/activitystreams"], "a": 2, "b": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn undoable_matches_spec_set() {
        assert!(ActivityKind::undoable("Follow"));
        assert!(ActivityKind::undoable("Like"));
        assert!(!ActivityKind::undoable("Create"));
    }
}
