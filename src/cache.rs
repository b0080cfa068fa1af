//! Result Cache
//!
//! Content-addressed map from a request fingerprint to the locator of a
//! previously produced asset. In-memory only; a process restart starts empty.

use crate::job::{AssetLocator, GenerationJob};
use crate::types::Category;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use unicode_normalization::UnicodeNormalization;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in seconds. `None` or `0` keeps entries until `clear()`.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: Option<u64>,
}

fn default_ttl_secs() -> Option<u64> {
    Some(6 * 60 * 60)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// Deterministic request fingerprint (hex-encoded BLAKE3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprint `(subject, category, normalized prompt, source asset)`.
    pub fn fingerprint(
        subject_id: &str,
        category: Category,
        prompt: &str,
        source_asset: Option<&str>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(subject_id.trim().as_bytes());
        hasher.update(&[0]);
        hasher.update(category.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(normalize_prompt(prompt).as_bytes());
        hasher.update(&[0]);
        if let Some(source) = source_asset {
            hasher.update(source.trim().as_bytes());
        }
        CacheKey(hex::encode(hasher.finalize().as_bytes()))
    }

    pub fn for_job(job: &GenerationJob) -> Self {
        Self::fingerprint(
            &job.subject_id,
            job.category,
            &job.payload.prompt,
            job.payload.source_asset.as_deref(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// NFC, lowercase, single-spaced.
pub fn normalize_prompt(prompt: &str) -> String {
    let composed: String = prompt.nfc().collect::<String>().to_lowercase();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cached result for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub locator: AssetLocator,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// In-memory result cache. Last writer wins.
pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Option<ChronoDuration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: config
                .ttl_secs
                .filter(|secs| *secs > 0)
                .and_then(|secs| ChronoDuration::try_seconds(secs as i64)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<AssetLocator> {
        self.get_at(key, Utc::now())
    }

    /// Lookup against an explicit clock. Expired entries count as misses and
    /// are dropped.
    pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<AssetLocator> {
        let found = {
            let entries = self.entries.read();
            entries.get(key).map(|e| (e.is_expired(now), e.locator.clone()))
        };
        match found {
            Some((false, locator)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(locator)
            }
            Some((true, _)) => {
                self.entries
                    .write()
                    .retain(|k, e| k != key || !e.is_expired(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, locator: AssetLocator) {
        self.put_at(key, locator, Utc::now());
    }

    pub fn put_at(&self, key: CacheKey, locator: AssetLocator, now: DateTime<Utc>) {
        let entry = CacheEntry {
            key: key.clone(),
            locator,
            created_at: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
        };
        self.entries.write().insert(key, entry);
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every entry unconditionally.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
