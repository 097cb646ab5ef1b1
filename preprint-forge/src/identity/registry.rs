//! The identity registry: topic -> unique, never-recycled slug.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use super::ledger::{InMemoryNameLedger, NameLedger, NameRecord};
use super::slug::{base_slug, candidate, topic_key, validate_slug};
use crate::errors::{ForgeError, ForgeResult};

/// Default bound on disambiguator attempts.
pub const DEFAULT_MAX_CANDIDATES: usize = 100;

/// Hands out unique slugs and remembers them forever.
///
/// `reserve` runs inside a single critical section so two concurrent callers
/// in this process never race on the same candidate; the ledger's atomic
/// insert covers other processes sharing the same directory.
pub struct IdentityRegistry {
    ledger: Arc<dyn NameLedger>,
    reserve_lock: Mutex<()>,
    max_candidates: usize,
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("max_candidates", &self.max_candidates)
            .finish_non_exhaustive()
    }
}

impl IdentityRegistry {
    /// Creates a registry over a ledger.
    #[must_use]
    pub fn new(ledger: Arc<dyn NameLedger>) -> Self {
        Self {
            ledger,
            reserve_lock: Mutex::new(()),
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    /// Creates a registry backed by memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryNameLedger::new()))
    }

    /// Overrides the disambiguator bound.
    #[must_use]
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max.max(1);
        self
    }

    /// Reserves a slug for `topic`, dated today (UTC).
    pub fn reserve(&self, topic: &str, explicit_slug: Option<&str>) -> ForgeResult<String> {
        self.reserve_on(topic, explicit_slug, Utc::now().date_naive())
    }

    /// Reserves a slug for `topic` as of `date`.
    ///
    /// An explicit slug must be valid and unused. Otherwise the derived base
    /// is tried first, then `base-2`, `base-3`, ... up to the configured bound.
    pub fn reserve_on(
        &self,
        topic: &str,
        explicit_slug: Option<&str>,
        date: NaiveDate,
    ) -> ForgeResult<String> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ForgeError::InvalidRequest("topic must not be empty".to_string()));
        }
        if let Some(slug) = explicit_slug {
            validate_slug(slug)?;
        }

        let key = topic_key(topic);
        let _guard = self.reserve_lock.lock();

        if let Some(slug) = explicit_slug {
            if !self.ledger.insert_new(&self.record(slug, topic, &key))? {
                return Err(ForgeError::NameConflict {
                    slug: slug.to_string(),
                });
            }
            info!(slug, "Reserved explicit slug");
            return Ok(slug.to_string());
        }

        let base = base_slug(topic, date);
        for n in 1..=self.max_candidates {
            let slug = candidate(&base, n);
            if self.ledger.insert_new(&self.record(&slug, topic, &key))? {
                info!(slug = %slug, attempt = n, "Reserved slug");
                return Ok(slug);
            }
            debug!(slug = %slug, "Slug taken, trying next candidate");
        }

        Err(ForgeError::NameSpaceExhausted {
            base,
            attempts: self.max_candidates,
        })
    }

    fn record(&self, slug: &str, topic: &str, key: &str) -> NameRecord {
        NameRecord {
            slug: slug.to_string(),
            topic: topic.to_string(),
            topic_key: key.to_string(),
            created_at: Utc::now(),
            released_at: None,
        }
    }

    /// Marks a name as released. The slug is never handed out again.
    pub fn release(&self, slug: &str) -> ForgeResult<NameRecord> {
        let _guard = self.reserve_lock.lock();
        let mut record = self
            .ledger
            .get(slug)?
            .ok_or_else(|| ForgeError::ProjectNotFound {
                slug: slug.to_string(),
            })?;
        if record.released_at.is_none() {
            record.released_at = Some(Utc::now());
            self.ledger.update(&record)?;
            info!(slug, "Released name");
        }
        Ok(record)
    }

    /// Returns the newest live slug reserved for the same topic.
    pub fn lookup(&self, topic: &str) -> ForgeResult<Option<NameRecord>> {
        let key = topic_key(topic);
        Ok(self
            .ledger
            .records()?
            .into_iter()
            .filter(|r| r.topic_key == key && !r.is_released())
            .max_by(|a, b| a.created_at.cmp(&b.created_at)))
    }

    /// Looks up one record.
    pub fn get(&self, slug: &str) -> ForgeResult<Option<NameRecord>> {
        self.ledger.get(slug)
    }

    /// Returns true if the slug was ever reserved.
    pub fn contains(&self, slug: &str) -> ForgeResult<bool> {
        Ok(self.ledger.get(slug)?.is_some())
    }

    /// Every record, including released ones.
    pub fn records(&self) -> ForgeResult<Vec<NameRecord>> {
        self.ledger.records()
    }
}
