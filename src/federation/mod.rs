//! ActivityPub federation module
//!
//! Handles:
//! - Activity processing (inbox)
//! - Activity delivery (outbox)
//! - HTTP Signatures
//! - WebFinger
//! - Actor fetching
//! - Public key caching
//! - Rate limiting

mod activity;
pub mod callbacks;
mod delivery;
mod key_cache;
mod outbox;
mod rate_limit;
mod resolver;
mod signature;
pub mod transport;
mod webfinger;

pub use activity::{ActivityProcessor, ActivityType};
pub use callbacks::{DefaultCallbacks, InboxCallbacks, OutboxCallbacks};
pub use delivery::ActivityDelivery;
pub use key_cache::{CacheStats, PublicKeyCache};
pub use outbox::OutboxProcessor;
pub use rate_limit::{RateLimitStats, RateLimiter, extract_domain};
pub use resolver::Resolver;
pub use signature::{
    extract_actor_domain, extract_signature_key_id, fetch_public_key, key_id_matches_actor,
    sign_request, verify_signature,
};
pub use webfinger::{WebFingerResult, resolve_webfinger};
