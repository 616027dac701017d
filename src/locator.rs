//! Schema resolution
//!
//! Maps a [`SchemaReference`] to the bytes of the schema it names. Results
//! live in a process-wide memory tier that is never evicted, optionally backed
//! by a persistent disk tier shared between runs.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheMetadata, DiskCache, MemoryCache};
use crate::config::Config;
use crate::error::{DocumentError, FetchError, Result};
use crate::fetch::{DefaultFetcher, HttpClientConfig, SchemaFetcher};

/// Resource type of W3C XML Schema documents
pub const XSD_RESOURCE_TYPE: &str = "http://www.w3.org/2001/XMLSchema";

static GLOBAL: OnceCell<Arc<SchemaLocator>> = OnceCell::new();

static URL_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("Failed to compile URL scheme regex")
});

static SCHEMA_ROOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:[A-Za-z_][\w.\-]*:)?schema[\s/>]").expect("Failed to compile schema root regex")
});

/// Identity of one external schema resource. All five fields take part in
/// equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaReference {
    pub resource_type: String,
    pub namespace: Option<String>,
    pub public_id: Option<String>,
    pub system_id: String,
    pub base_uri: Option<String>,
}

impl SchemaReference {
    /// Reference to an XSD with no target namespace
    pub fn xsd(system_id: impl Into<String>) -> Self {
        Self {
            resource_type: XSD_RESOURCE_TYPE.to_string(),
            namespace: None,
            public_id: None,
            system_id: system_id.into(),
            base_uri: None,
        }
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_public_id(mut self, public_id: Option<String>) -> Self {
        self.public_id = public_id;
        self
    }

    pub fn with_base_uri(mut self, base_uri: Option<String>) -> Self {
        self.base_uri = base_uri;
        self
    }

    /// Location to fetch: the system id resolved against the base URI
    pub fn location(&self) -> String {
        resolve_location(&self.system_id, self.base_uri.as_deref())
    }

    pub fn is_relative(&self) -> bool {
        !has_scheme(&self.system_id) && !Path::new(&self.system_id).is_absolute()
    }
}

impl fmt::Display for SchemaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.resource_type,
            self.namespace.as_deref().unwrap_or("-"),
            self.public_id.as_deref().unwrap_or("-"),
            self.system_id,
            self.base_uri.as_deref().unwrap_or("-"),
        )
    }
}

fn has_scheme(location: &str) -> bool {
    URL_SCHEME.is_match(location)
}

/// Resolve `system_id` against `base`. URL bases are joined like a browser
/// would (replacing the last path segment); anything else is a directory path.
pub fn resolve_location(system_id: &str, base: Option<&str>) -> String {
    let Some(base) = base else {
        return system_id.to_string();
    };
    if has_scheme(system_id) || Path::new(system_id).is_absolute() {
        return system_id.to_string();
    }

    if has_scheme(base) {
        let scheme_end = base.find("://").map(|i| i + 3).unwrap_or(0);
        match base[scheme_end..].rfind('/') {
            Some(i) => format!("{}{}", &base[..scheme_end + i + 1], system_id),
            None => format!("{}/{}", base, system_id),
        }
    } else {
        Path::new(base).join(system_id).to_string_lossy().into_owned()
    }
}

/// Fetched bytes of one schema
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub reference: SchemaReference,
    /// Location the bytes were fetched from
    pub location: String,
    pub data: Arc<Vec<u8>>,
}

impl CachedResource {
    pub fn new(reference: SchemaReference, location: String, data: Vec<u8>) -> Self {
        Self {
            reference,
            location,
            data: Arc::new(data),
        }
    }
}

/// Resolves schema references through the memory tier, the optional disk
/// tier and finally the fetcher.
pub struct SchemaLocator {
    fetcher: Arc<dyn SchemaFetcher>,
    memory: MemoryCache,
    disk: Option<DiskCache>,
}

impl SchemaLocator {
    pub fn new(fetcher: Arc<dyn SchemaFetcher>) -> Self {
        Self {
            fetcher,
            memory: MemoryCache::new(),
            disk: None,
        }
    }

    pub fn with_disk_cache(mut self, disk: DiskCache) -> Self {
        self.disk = Some(disk);
        self
    }

    /// Locator with the default fetcher, configured from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = HttpClientConfig {
            timeout_seconds: config.network.timeout_seconds,
            ..HttpClientConfig::default()
        };
        let locator = Self::new(Arc::new(DefaultFetcher::new(http)?));

        Ok(if config.cache.enabled {
            locator.with_disk_cache(DiskCache::new(
                config.cache.directory.clone(),
                Duration::from_secs(config.cache.ttl_hours * 3600),
            ))
        } else {
            locator
        })
    }

    /// The process-wide locator, built from the default configuration on first use
    pub fn global() -> Result<Arc<SchemaLocator>> {
        GLOBAL
            .get_or_try_init(|| Self::from_config(&Config::default()).map(Arc::new))
            .cloned()
    }

    /// Install the process-wide locator. Returns false if one already exists.
    pub fn install_global(locator: Arc<SchemaLocator>) -> bool {
        GLOBAL.set(locator).is_ok()
    }

    /// Resolve a reference, fetching it only if no equal reference has been
    /// resolved before in this process.
    pub fn resolve(&self, reference: &SchemaReference) -> Result<Arc<CachedResource>> {
        if let Some(resource) = self.memory.get(reference) {
            debug!(reference = %reference, "schema cache hit");
            return Ok(resource);
        }

        self.memory
            .get_or_try_insert_with(reference.clone(), || self.load(reference))
            .map_err(|e| DocumentError::Fetch((*e).clone()))
    }

    pub fn is_cached(&self, reference: &SchemaReference) -> bool {
        self.memory.contains(reference)
    }

    /// Number of resources held in memory
    pub fn cached_count(&self) -> u64 {
        self.memory.entry_count()
    }

    fn load(&self, reference: &SchemaReference) -> std::result::Result<Arc<CachedResource>, FetchError> {
        let location = reference.location();
        let key = DiskCache::generate_key(reference);

        if let Some(disk) = &self.disk {
            match disk.get(&key) {
                Ok(Some((data, _))) => {
                    debug!(location = %location, "schema loaded from disk cache");
                    return Ok(Arc::new(CachedResource::new(reference.clone(), location, data)));
                }
                Ok(None) => {}
                Err(e) => warn!(location = %location, error = %e, "disk cache read failed"),
            }
        }

        info!(location = %location, "fetching schema");
        let data = self.fetcher.fetch(&location)?;
        check_schema_content(&data, &location)?;

        if let Some(disk) = &self.disk {
            let metadata = CacheMetadata::new(key.clone(), location.clone(), disk.ttl());
            if let Err(e) = disk.set(&key, &data, metadata) {
                warn!(location = %location, error = %e, "disk cache write failed");
            }
        }

        Ok(Arc::new(CachedResource::new(reference.clone(), location, data)))
    }
}

/// Reject content that is obviously not an XML Schema before it is cached
fn check_schema_content(data: &[u8], location: &str) -> std::result::Result<(), FetchError> {
    let not_a_schema = |details: &str| FetchError::NotASchema {
        location: location.to_string(),
        details: details.to_string(),
    };

    let content = std::str::from_utf8(data).map_err(|_| not_a_schema("content is not valid UTF-8"))?;
    if !content.trim_start().starts_with('<') {
        return Err(not_a_schema("content does not appear to be XML"));
    }
    if !SCHEMA_ROOT.is_match(content) {
        return Err(not_a_schema("no schema element found"));
    }
    Ok(())
}
