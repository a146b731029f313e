//! Content-addressed output cache
//!
//! One JSON file per SHA256 hash of the trimmed source. Every read and write
//! is best-effort: IO and decoding problems surface as warnings, never as
//! errors, because a cache miss is always a safe answer.

use crate::config::{Config, ConfigManager};
use crate::error::{BestEffort, KilnError, KilnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const ENTRY_EXTENSION: &str = "json";

/// Hash a source text the way the cache keys it
pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// A cached output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub source_text: String,
    pub output_text: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
}

impl CacheEntry {
    /// Create an entry stamped now
    pub fn new(source: &str, output: &str) -> Self {
        let source = source.trim();
        Self {
            source_text: source.to_string(),
            output_text: output.to_string(),
            created_at: Utc::now(),
            content_hash: content_hash(source),
        }
    }

    /// Whether the entry is older than `max_age`
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        Utc::now() - self.created_at > max_age
    }

    /// Whether the entry really belongs to `source`
    fn matches(&self, source: &str, hash: &str) -> bool {
        self.content_hash == hash && self.source_text == source
    }
}

/// Size summary of the cache directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

/// Output cache rooted at a directory
#[derive(Debug, Clone)]
pub struct OutputCache {
    dir: PathBuf,
    max_entries: usize,
    max_age: chrono::Duration,
}

impl OutputCache {
    /// Create a cache in `dir`
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_entries,
            max_age: chrono::Duration::from_std(max_age)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    /// Create the cache described by a config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ConfigManager::output_cache_dir(config),
            config.cache.max_entries,
            Duration::from_secs(config.cache.max_age_secs),
        )
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", hash, ENTRY_EXTENSION))
    }

    /// Look up the output for a source text
    pub async fn get(&self, source: &str) -> BestEffort<Option<String>> {
        let source = source.trim();
        let hash = content_hash(source);
        let path = self.entry_path(&hash);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BestEffort::ok(None),
            Err(e) => {
                return BestEffort::degraded(
                    None,
                    format!("reading cache entry {}: {}", path.display(), e),
                )
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                let removed = remove_entry(&path).await;
                return BestEffort::degraded(
                    None,
                    join_warnings(
                        Some(format!("discarding unreadable cache entry {}: {}", hash, e)),
                        removed.warning,
                    )
                    .unwrap_or_default(),
                );
            }
        };

        if !entry.matches(source, &hash) {
            let removed = remove_entry(&path).await;
            return BestEffort::degraded(
                None,
                join_warnings(
                    Some(format!("discarding cache entry {} with mismatched source", hash)),
                    removed.warning,
                )
                .unwrap_or_default(),
            );
        }

        if entry.is_stale(self.max_age) {
            debug!(hash = %hash, created_at = %entry.created_at, "Cache entry expired");
            let removed = remove_entry(&path).await;
            return BestEffort {
                value: None,
                warning: removed.warning,
            };
        }

        debug!(hash = %hash, "Cache hit");
        BestEffort::ok(Some(entry.output_text))
    }

    /// Store the output for a source text, then enforce the size budget
    pub async fn put(&self, source: &str, output: &str) -> BestEffort {
        let entry = CacheEntry::new(source, output);

        if let Err(e) = self.write_entry(&entry).await {
            return BestEffort::degraded((), format!("writing cache entry: {}", e));
        }
        debug!(hash = %entry.content_hash, "Cached output");

        let evicted = self.evict().await;
        BestEffort {
            value: (),
            warning: evicted.warning,
        }
    }

    /// Write via a temporary file so concurrent writers never expose a torn entry
    async fn write_entry(&self, entry: &CacheEntry) -> KilnResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", self.dir.display()), e))?;

        let content = serde_json::to_string_pretty(entry)?;
        let path = self.entry_path(&entry.content_hash);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", entry.content_hash, Uuid::new_v4().simple()));

        fs::write(&tmp, content)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", tmp.display()), e))?;

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(KilnError::io(format!("renaming into {}", path.display()), e));
        }
        Ok(())
    }

    /// Delete the oldest entries until at most `max_entries` remain
    pub async fn evict(&self) -> BestEffort<usize> {
        let mut entries = match self.list_entries().await {
            Ok(entries) => entries,
            Err(e) => return BestEffort::degraded(0, format!("listing cache entries: {}", e)),
        };

        if entries.len() <= self.max_entries {
            return BestEffort::ok(0);
        }

        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let excess = entries.len() - self.max_entries;

        let mut removed = 0;
        let mut warning = None;
        for (path, _) in entries.into_iter().take(excess) {
            let outcome = remove_entry(&path).await;
            match outcome.warning {
                Some(w) => warning = join_warnings(warning, Some(w)),
                None => removed += 1,
            }
        }

        debug!(removed, "Evicted old cache entries");
        BestEffort {
            value: removed,
            warning,
        }
    }

    /// Entry files with their creation time; unreadable ones sort first
    async fn list_entries(&self) -> std::io::Result<Vec<(PathBuf, DateTime<Utc>)>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_none_or(|ext| ext != ENTRY_EXTENSION) {
                continue;
            }

            let created_at = fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|content| serde_json::from_str::<CacheEntry>(&content).ok())
                .map(|entry| entry.created_at)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            entries.push((path, created_at));
        }

        Ok(entries)
    }

    /// Remove every entry and recreate an empty directory
    pub async fn clear(&self) -> KilnResult<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(KilnError::io(
                    format!("removing cache directory {}", self.dir.display()),
                    e,
                ))
            }
        }

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            KilnError::io(format!("creating cache directory {}", self.dir.display()), e)
        })?;
        debug!(dir = %self.dir.display(), "Cleared output cache");
        Ok(())
    }

    /// Count entries and their on-disk size
    pub async fn stats(&self) -> KilnResult<CacheStats> {
        let entries = self
            .list_entries()
            .await
            .map_err(|e| KilnError::io(format!("listing {}", self.dir.display()), e))?;

        let mut stats = CacheStats {
            entries: entries.len(),
            bytes: 0,
        };
        for (path, _) in entries {
            if let Ok(meta) = fs::metadata(&path).await {
                stats.bytes += meta.len();
            }
        }
        Ok(stats)
    }
}

async fn remove_entry(path: &Path) -> BestEffort {
    match fs::remove_file(path).await {
        Ok(()) => BestEffort::ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BestEffort::ok(()),
        Err(e) => BestEffort::degraded((), format!("removing {}: {}", path.display(), e)),
    }
}

fn join_warnings(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
        (a, b) => a.or(b),
    }
}
