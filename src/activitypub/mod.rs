//! Activity Streams 2.0 vocabulary
//!
//! Typed AS2 objects/activities on top of a `serde_json::Value` property bag,
//! plus the restricted `@context` aliasing described for the Actor Engine.
//! This module does not do general JSON-LD expansion.

mod vocabulary;

pub use vocabulary::{
    ActivityKind, Context, ObjectKind, PUBLIC, Vocabulary, default_context, is_public_iri,
    normalize,
};
