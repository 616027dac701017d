use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use schemadoc::access::write_atomic;
use schemadoc::{FetchError, FileAccess, FileGuard, SchemaFetcher};

/// Serves in-memory schemas and records every fetch
#[derive(Default)]
pub struct CountingFetcher {
    schemas: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn serve(self, location: &str, schema: &str) -> Self {
        self.schemas
            .lock()
            .unwrap()
            .insert(location.to_string(), schema.as_bytes().to_vec());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests_for(&self, location: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == location)
            .count()
    }
}

impl SchemaFetcher for CountingFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(location.to_string());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.schemas
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::HttpStatus {
                url: location.to_string(),
                status: 404,
            })
    }
}

/// File access that counts the writes reaching disk
#[derive(Default, Clone)]
pub struct CountingAccess {
    writes: Arc<AtomicUsize>,
}

impl CountingAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

struct CountingGuard {
    path: PathBuf,
    writes: Arc<AtomicUsize>,
}

impl FileGuard for CountingGuard {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        write_atomic(&self.path, bytes)
    }
}

impl FileAccess for CountingAccess {
    fn acquire<'a>(&'a self, path: &Path) -> io::Result<Box<dyn FileGuard + 'a>> {
        Ok(Box::new(CountingGuard {
            path: path.to_path_buf(),
            writes: self.writes.clone(),
        }))
    }
}
