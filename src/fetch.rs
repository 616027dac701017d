use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::error::{DocumentError, FetchError};

/// Source of raw schema bytes
///
/// The locator calls this once per uncached reference. Implementations must
/// be shareable across threads.
#[cfg_attr(test, mockall::automock)]
pub trait SchemaFetcher: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Request timeout in seconds; `None` blocks until the server answers
    pub timeout_seconds: Option<u64>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: None,
            user_agent: format!("schemadoc/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Blocking HTTP(S) fetcher. Non-2xx responses are errors; nothing is retried.
pub struct HttpFetcher {
    client: Client,
    config: HttpClientConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, DocumentError> {
        let client = Client::builder()
            .timeout(config.timeout_seconds.map(Duration::from_secs))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DocumentError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

impl SchemaFetcher for HttpFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: location.to_string(),
            details: e.to_string(),
        };

        let response = self.client.get(location).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: location.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().map_err(transport)?;
        Ok(bytes.to_vec())
    }
}

/// Reads schemas from `file://` URLs and plain paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl SchemaFetcher for FileFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let path = location.strip_prefix("file://").unwrap_or(location);
        std::fs::read(Path::new(path)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound {
                location: location.to_string(),
            },
            _ => FetchError::Read {
                location: location.to_string(),
                details: e.to_string(),
            },
        })
    }
}

/// Dispatches on the location scheme: `http(s)://` goes to the network,
/// `file://` and scheme-less locations to the file system.
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, DocumentError> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            file: FileFetcher,
        })
    }
}

impl SchemaFetcher for DefaultFetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            self.http.fetch(location)
        } else if location.starts_with("file://") || !location.contains("://") {
            self.file.fetch(location)
        } else {
            Err(FetchError::UnsupportedLocation {
                location: location.to_string(),
            })
        }
    }
}
