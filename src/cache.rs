use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult, FetchError, LibXml2Result};
use crate::libxml2::XmlSchemaPtr;
use crate::locator::{CachedResource, SchemaReference};

/// In-memory cache for compiled libxml2 schemas
///
/// Compiling a schema is expensive, so each reference is compiled once per
/// process. `moka` makes concurrent requests for the same key wait for the
/// single caller doing the work.
pub struct ParsedSchemaCache {
    cache: Cache<SchemaReference, Arc<XmlSchemaPtr>>,
}

impl Default for ParsedSchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ParsedSchemaCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    /// Get a compiled schema, running `compile` only if the key is missing
    pub fn get_or_compile<F>(
        &self,
        key: SchemaReference,
        compile: F,
    ) -> Result<Arc<XmlSchemaPtr>, Arc<crate::error::LibXml2Error>>
    where
        F: FnOnce() -> LibXml2Result<XmlSchemaPtr>,
    {
        self.cache.try_get_with(key, || compile().map(Arc::new))
    }

    pub fn contains(&self, key: &SchemaReference) -> bool {
        self.cache.contains_key(key)
    }
}

/// Process-lifetime store of fetched schema resources
///
/// Unbounded and without expiry: an entry, once committed, is returned for
/// every later lookup of an equal reference. Concurrent initializations of
/// the same key are coalesced.
pub struct MemoryCache {
    cache: Cache<SchemaReference, Arc<CachedResource>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    pub fn get(&self, key: &SchemaReference) -> Option<Arc<CachedResource>> {
        self.cache.get(key)
    }

    /// Return the cached entry or run `load` to create it
    pub fn get_or_try_insert_with<F>(
        &self,
        key: SchemaReference,
        load: F,
    ) -> Result<Arc<CachedResource>, Arc<FetchError>>
    where
        F: FnOnce() -> Result<Arc<CachedResource>, FetchError>,
    {
        self.cache.try_get_with(key, load)
    }

    pub fn contains(&self, key: &SchemaReference) -> bool {
        self.cache.contains_key(key)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

/// Metadata for cached schema entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub key: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl CacheMetadata {
    pub fn new(key: String, location: String, ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at =
            now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24));

        Self {
            key,
            location,
            created_at: now,
            expires_at,
            size_bytes: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size_bytes = size;
        self
    }
}

/// Persistent schema cache shared between runs, stored with cacache
pub struct DiskCache {
    cache_dir: PathBuf,
    ttl: Duration,
}

impl DiskCache {
    pub fn new(cache_dir: PathBuf, ttl: Duration) -> Self {
        Self { cache_dir, ttl }
    }

    pub fn directory(&self) -> &Path {
        &self.cache_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stable disk key for a schema reference
    pub fn generate_key(reference: &SchemaReference) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        reference.hash(&mut hasher);
        format!("schema_{:x}", hasher.finish())
    }

    /// Read an entry. Expired entries are removed and reported as missing.
    pub fn get(&self, key: &str) -> CacheResult<Option<(Vec<u8>, CacheMetadata)>> {
        let metadata = match self.get_metadata(key)? {
            Some(metadata) if !metadata.is_expired() => metadata,
            Some(_) => {
                self.remove(key)?;
                return Ok(None);
            }
            None => return Ok(None),
        };

        match cacache::read_sync(&self.cache_dir, key) {
            Ok(data) => Ok(Some((data, metadata))),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(e) => Err(CacheError::Read {
                key: key.to_string(),
                details: e.to_string(),
            }),
        }
    }

    pub fn set(&self, key: &str, data: &[u8], metadata: CacheMetadata) -> CacheResult<()> {
        cacache::write_sync(&self.cache_dir, key, data).map_err(|e| CacheError::Write {
            key: key.to_string(),
            details: e.to_string(),
        })?;

        self.set_metadata(key, &metadata.with_size(data.len() as u64))
    }

    pub fn remove(&self, key: &str) -> CacheResult<()> {
        let _ = cacache::remove_sync(&self.cache_dir, key);
        match std::fs::remove_file(self.metadata_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Write {
                key: key.to_string(),
                details: e.to_string(),
            }),
        }
    }

    /// Check if entry exists and is not expired
    pub fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self
            .get_metadata(key)?
            .is_some_and(|metadata| !metadata.is_expired()))
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        // a missing directory simply means an empty cache
        if let Ok(entries) = cacache::index::ls(&self.cache_dir).collect::<Result<Vec<_>, _>>() {
            for entry in entries {
                stats.entry_count += 1;
                stats.total_size += entry.size as u64;
            }
        }
        stats
    }

    /// Remove every expired entry
    pub fn cleanup_expired(&self) -> CleanupStats {
        let mut cleanup_stats = CleanupStats::default();

        match cacache::index::ls(&self.cache_dir).collect::<Result<Vec<_>, _>>() {
            Ok(entries) => {
                for entry in entries {
                    if let Ok(Some(metadata)) = self.get_metadata(&entry.key)
                        && metadata.is_expired()
                    {
                        cleanup_stats.expired_entries += 1;
                        cleanup_stats.freed_bytes += entry.size as u64;

                        if let Err(e) = self.remove(&entry.key) {
                            cleanup_stats
                                .errors
                                .push(format!("Failed to remove {}: {}", entry.key, e));
                        } else {
                            cleanup_stats.removed_entries += 1;
                        }
                    }
                }
            }
            Err(e) => {
                cleanup_stats
                    .errors
                    .push(format!("Failed to read cache index: {}", e));
            }
        }

        cleanup_stats
    }

    /// Remove every entry and its metadata
    pub fn clear(&self) -> CacheResult<()> {
        if !self.cache_dir.exists() {
            return Ok(());
        }
        cacache::clear_sync(&self.cache_dir).map_err(|e| CacheError::Cleanup {
            details: e.to_string(),
        })?;
        match std::fs::remove_dir_all(self.cache_dir.join("metadata")) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Cleanup {
                details: e.to_string(),
            }),
        }
    }

    fn get_metadata(&self, key: &str) -> CacheResult<Option<CacheMetadata>> {
        match std::fs::read_to_string(self.metadata_path(key)) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| CacheError::Corruption {
                    key: key.to_string(),
                    details: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Read {
                key: key.to_string(),
                details: e.to_string(),
            }),
        }
    }

    fn set_metadata(&self, key: &str, metadata: &CacheMetadata) -> CacheResult<()> {
        let write_error = |details: String| CacheError::Write {
            key: key.to_string(),
            details,
        };
        let metadata_path = self.metadata_path(key);

        if let Some(parent) = metadata_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(metadata).map_err(|e| write_error(e.to_string()))?;
        std::fs::write(&metadata_path, content).map_err(|e| write_error(e.to_string()))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join("metadata")
            .join(format!("{}.json", key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupStats {
    pub expired_entries: u64,
    pub removed_entries: u64,
    pub freed_bytes: u64,
    pub errors: Vec<String>,
}
