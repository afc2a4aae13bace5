//! Healing pattern store
//!
//! Remembers successful locator repairs keyed by
//! `(test_kind, original_locator, page_context)`. Read-modify-write on a
//! key runs under that key's lock, so different keys never contend and
//! `success_count` increments are never lost.

use dashmap::DashMap;
use locheal_common::store::{get_as, list_as, put_as};
use locheal_common::{now, Error, HealingPattern, PatternKey, RecordStore, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

/// Record-store namespace of healing patterns
pub const PATTERN_NAMESPACE: &str = "healing_patterns";

const SUCCESS_NUDGE: f64 = 0.2;
const FAILURE_PENALTY: f64 = 0.15;

/// Aggregate view over stored patterns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub patterns: usize,
    pub mean_confidence: Option<f64>,
    pub total_successes: i64,
}

pub struct PatternStore {
    store: Arc<dyn RecordStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PatternStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Storage key of a pattern
    pub fn storage_key(key: &PatternKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.test_kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.original_locator.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.page_context.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn lock_for(&self, storage_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(storage_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn find(
        &self,
        test_kind: &str,
        original_locator: &str,
        page_context: &str,
    ) -> Result<Option<HealingPattern>> {
        let key = PatternKey::new(test_kind, original_locator, page_context);
        get_as(self.store.as_ref(), PATTERN_NAMESPACE, &Self::storage_key(&key))
    }

    /// Insert or overwrite the pattern for a key. Usage history survives
    /// only when the healed locator is unchanged.
    pub fn store(
        &self,
        test_kind: &str,
        original_locator: &str,
        healed_locator: &str,
        confidence: f64,
        page_context: &str,
    ) -> Result<HealingPattern> {
        let key = PatternKey::new(test_kind, original_locator, page_context);
        let storage_key = Self::storage_key(&key);
        let lock = self.lock_for(&storage_key);
        let _guard = lock.lock();

        let existing: Option<HealingPattern> =
            get_as(self.store.as_ref(), PATTERN_NAMESPACE, &storage_key)?;
        let now = now();

        let (success_count, created_at) = match existing {
            Some(p) if p.healed_locator == healed_locator => (p.success_count, p.created_at),
            Some(p) => {
                info!(
                    "Pattern for {} replaced: {} -> {}",
                    original_locator, p.healed_locator, healed_locator
                );
                (0, now)
            }
            None => (0, now),
        };

        let pattern = HealingPattern {
            test_kind: key.test_kind,
            original_locator: key.original_locator,
            page_context: key.page_context,
            healed_locator: healed_locator.to_string(),
            confidence: sanitize(confidence),
            success_count,
            last_used: now,
            created_at,
        };
        put_as(self.store.as_ref(), PATTERN_NAMESPACE, &storage_key, &pattern, now)?;

        debug!(
            "Stored pattern {} -> {} ({:.2})",
            pattern.original_locator, pattern.healed_locator, pattern.confidence
        );
        Ok(pattern)
    }

    /// Fold a confirmed reuse outcome into the pattern
    pub fn record_outcome(&self, pattern: &HealingPattern, succeeded: bool) -> Result<HealingPattern> {
        let storage_key = Self::storage_key(&pattern.key());
        let lock = self.lock_for(&storage_key);
        let _guard = lock.lock();

        let mut current: HealingPattern =
            get_as(self.store.as_ref(), PATTERN_NAMESPACE, &storage_key)?
                .ok_or_else(|| Error::not_found("pattern", &pattern.original_locator))?;

        current.confidence = if succeeded {
            current.confidence + (1.0 - current.confidence) * SUCCESS_NUDGE
        } else {
            (current.confidence - FAILURE_PENALTY).max(0.0)
        };
        current.confidence = sanitize(current.confidence);
        current.last_used = now();

        // Write the estimate first so the atomic increment lands on top of it.
        put_as(
            self.store.as_ref(),
            PATTERN_NAMESPACE,
            &storage_key,
            &current,
            current.last_used,
        )?;
        if succeeded {
            current.success_count =
                self.store
                    .increment(PATTERN_NAMESPACE, &storage_key, "success_count")?;
        }

        debug!(
            "Pattern {} outcome {}: confidence {:.2}, successes {}",
            current.original_locator,
            if succeeded { "success" } else { "failure" },
            current.confidence,
            current.success_count
        );
        Ok(current)
    }

    /// Purge patterns unused for more than `older_than_days`
    pub fn cleanup(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = now() - i64::from(older_than_days) * 86_400;
        let removed = self.store.delete_older_than(PATTERN_NAMESPACE, cutoff)?;
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        if removed > 0 {
            info!("Removed {} pattern(s) unused for {} day(s)", removed, older_than_days);
        }
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<HealingPattern>> {
        list_as(self.store.as_ref(), PATTERN_NAMESPACE)
    }

    pub fn stats(&self) -> Result<PatternStats> {
        let patterns = self.list()?;
        let mean_confidence = if patterns.is_empty() {
            None
        } else {
            Some(patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64)
        };

        Ok(PatternStats {
            patterns: patterns.len(),
            mean_confidence,
            total_successes: patterns.iter().map(|p| p.success_count).sum(),
        })
    }
}

fn sanitize(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid regex")
});

static HEX_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[0-9a-f]{8,}$").expect("valid regex"));

/// Normalize a page URL into a pattern context: scheme, query and fragment
/// dropped, host lowercased, id-like path segments replaced by `:id`
pub fn page_context(url: &str) -> String {
    let url = url.trim();
    let without_scheme = match url.find("://") {
        Some(i) if url[..i].chars().all(|c| c.is_ascii_alphanumeric() || "+.-".contains(c)) => {
            &url[i + 3..]
        }
        _ => url,
    };
    let end = without_scheme.find(['?', '#']).unwrap_or(without_scheme.len());
    let rest = &without_scheme[..end];

    let mut segments = rest.split('/');
    let host = segments.next().unwrap_or_default().to_lowercase();

    let mut parts = vec![host];
    for segment in segments.filter(|s| !s.is_empty()) {
        parts.push(if is_id_segment(segment) {
            ":id".to_string()
        } else {
            segment.to_string()
        });
    }
    parts.join("/")
}

fn is_id_segment(segment: &str) -> bool {
    segment.chars().all(|c| c.is_ascii_digit())
        || UUID_SEGMENT.is_match(segment)
        || (HEX_SEGMENT.is_match(segment) && segment.chars().any(|c| c.is_ascii_digit()))
}
