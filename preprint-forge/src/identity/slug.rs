//! Slug derivation and validation.

use chrono::NaiveDate;
use md5::{Digest, Md5};
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::{ForgeError, ForgeResult};

/// Maximum length of the topic part of a derived slug.
pub const MAX_BASE_LEN: usize = 30;

/// Maximum length of any slug, explicit or derived.
pub const MAX_SLUG_LEN: usize = 100;

/// Fallback base when a topic normalizes to nothing.
pub const FALLBACK_BASE: &str = "project";

const SLUG_PATTERN: &str = r"^[a-z0-9]+(?:-[a-z0-9]+)*$";

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| Regex::new(SLUG_PATTERN).expect("slug pattern compiles"))
}

/// Normalizes a topic into the hyphenated, length-capped slug base.
///
/// Punctuation is dropped, whitespace/underscores/hyphens become single
/// hyphens, and the result is cut back to the last word boundary that fits
/// in [`MAX_BASE_LEN`].
///
/// ```
/// use preprint_forge::identity::normalize_topic;
///
/// assert_eq!(normalize_topic("Quantum  Noise!"), "quantum-noise");
/// ```
#[must_use]
pub fn normalize_topic(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    let mut pending_sep = false;

    for ch in topic.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_sep = true;
        }
    }

    if out.len() > MAX_BASE_LEN {
        out = match out[..MAX_BASE_LEN].rfind('-') {
            Some(cut) if cut > 0 => out[..cut].to_string(),
            _ => out[..MAX_BASE_LEN].to_string(),
        };
    }
    let trimmed = out.trim_end_matches('-');

    if trimmed.is_empty() {
        FALLBACK_BASE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derives the first-choice slug for a topic on a date (`<base>-YYMMDD`).
#[must_use]
pub fn base_slug(topic: &str, date: NaiveDate) -> String {
    format!("{}-{}", normalize_topic(topic), date.format("%y%m%d"))
}

/// The `n`-th candidate for a base: the base itself, then `base-2`, `base-3`, ...
#[must_use]
pub fn candidate(base: &str, n: usize) -> String {
    if n <= 1 {
        base.to_string()
    } else {
        format!("{base}-{n}")
    }
}

/// Stable key for a topic: MD5 of its whitespace-collapsed lower-case form.
#[must_use]
pub fn topic_key(topic: &str) -> String {
    let cleaned = topic
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    hex::encode(Md5::digest(cleaned.as_bytes()))
}

/// Validates a caller supplied slug.
pub fn validate_slug(slug: &str) -> ForgeResult<()> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(ForgeError::InvalidRequest(format!(
            "slug must be 1..={MAX_SLUG_LEN} characters, got {}",
            slug.len()
        )));
    }
    if !slug_pattern().is_match(slug) {
        return Err(ForgeError::InvalidRequest(format!(
            "slug '{slug}' must be lower-case alphanumeric words joined by single hyphens"
        )));
    }
    Ok(())
}
