//! Durable, collision-free project naming.
//!
//! This module provides:
//! - Slug derivation from a topic and a date
//! - Name ledgers (in-memory and one-file-per-slug)
//! - The serialized [`IdentityRegistry`]

mod ledger;
mod registry;
mod slug;

pub use ledger::{FileNameLedger, InMemoryNameLedger, NameLedger, NameRecord};
pub use registry::{IdentityRegistry, DEFAULT_MAX_CANDIDATES};
pub use slug::{
    base_slug, candidate, normalize_topic, topic_key, validate_slug, FALLBACK_BASE, MAX_BASE_LEN,
    MAX_SLUG_LEN,
};
