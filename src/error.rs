use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Main library error type covering every way a document operation can fail
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Malformed document: {details}")]
    Parse { details: String },

    #[error("Document violates schema {schema}: {}", summarize(.violations))]
    Validation {
        schema: String,
        violations: Vec<Violation>,
    },

    #[error("Schema parsing error: {url} - {details}")]
    SchemaParsing { url: String, details: String },

    #[error("Invalid path expression '{expression}': {reason}")]
    Query { expression: String, reason: String },

    #[error("Directive #{index} failed: {reason}")]
    Directive { index: usize, reason: String },

    #[error("Invalid schema name: '{name}'")]
    InvalidSchemaName { name: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("XML tree error: {0}")]
    Tree(String),
}

/// Coarse failure categories callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Validation,
    Query,
    Directive,
    Internal,
}

impl DocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::Io(_) | DocumentError::Fetch(_) | DocumentError::Cache(_) => {
                ErrorKind::Io
            }
            DocumentError::Parse { .. } => ErrorKind::Parse,
            DocumentError::Validation { .. } | DocumentError::SchemaParsing { .. } => {
                ErrorKind::Validation
            }
            DocumentError::Query { .. } => ErrorKind::Query,
            DocumentError::Directive { .. } => ErrorKind::Directive,
            DocumentError::InvalidSchemaName { .. }
            | DocumentError::Config(_)
            | DocumentError::LibXml2Internal { .. }
            | DocumentError::Tree(_) => ErrorKind::Internal,
        }
    }

    /// Schema violations carried by a validation failure, empty otherwise
    pub fn violations(&self) -> &[Violation] {
        match self {
            DocumentError::Validation { violations, .. } => violations,
            _ => &[],
        }
    }

    pub(crate) fn query(expression: &str, reason: impl Into<String>) -> Self {
        DocumentError::Query {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn directive(index: usize, reason: impl Into<String>) -> Self {
        DocumentError::Directive {
            index,
            reason: reason.into(),
        }
    }
}

/// One schema violation reported by the validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub line: Option<u32>,
    pub message: String,
}

impl Violation {
    pub fn new(line: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Schema retrieval failures
///
/// Kept `Clone` so the resource cache can hand the same failure to every
/// caller waiting on a coalesced fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP status error: {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request failed: {url} - {details}")]
    Transport { url: String, details: String },

    #[error("Schema not found: {location}")]
    NotFound { location: String },

    #[error("Failed to read {location}: {details}")]
    Read { location: String, details: String },

    #[error("Unsupported schema location: {location}")]
    UnsupportedLocation { location: String },

    #[error("Content of {location} is not an XML Schema: {details}")]
    NotASchema { location: String, details: String },
}

/// Disk cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache read error for key {key}: {details}")]
    Read { key: String, details: String },

    #[error("Cache write error for key {key}: {details}")]
    Write { key: String, details: String },

    #[error("Cache corruption for key {key}: {details}")]
    Corruption { key: String, details: String },

    #[error("Cache cleanup failed: {details}")]
    Cleanup { details: String },
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {}", .details.join("; "))]
    SchemaParseFailed { details: Vec<String> },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Document could not be loaded for validation: {name}")]
    DocumentLoadFailed { name: PathBuf },

    #[error("Validation failed with internal code {code}: {name}")]
    ValidationFailed { code: i32, name: PathBuf },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Input too large for libxml2: {size} bytes")]
    InputTooLarge { size: usize },

    #[error("XPath evaluation failed for '{expression}': {}", .details.join("; "))]
    XPathFailed {
        expression: String,
        details: Vec<String>,
    },
}

impl From<ConfigError> for DocumentError {
    fn from(err: ConfigError) -> Self {
        DocumentError::Config(err.to_string())
    }
}

impl From<CacheError> for DocumentError {
    fn from(err: CacheError) -> Self {
        DocumentError::Cache(err.to_string())
    }
}

impl From<LibXml2Error> for DocumentError {
    fn from(err: LibXml2Error) -> Self {
        DocumentError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

impl From<xot::ParseError> for DocumentError {
    fn from(err: xot::ParseError) -> Self {
        DocumentError::Parse {
            details: err.to_string(),
        }
    }
}

impl From<xot::Error> for DocumentError {
    fn from(err: xot::Error) -> Self {
        DocumentError::Tree(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DocumentError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Disk cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
