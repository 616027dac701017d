//! # schemadoc
//!
//! Strict, schema-bound XML documents. Each document lives in one file, is
//! bound to a versioned XSD through `xsi:noNamespaceSchemaLocation`, and can
//! only be changed through ordered structural [`Directive`]s. Every write is
//! canonical and has passed validation.
//!
//! ```no_run
//! use schemadoc::{Directives, DocumentStore};
//!
//! # fn main() -> schemadoc::Result<()> {
//! let store = DocumentStore::new("person.xml");
//! store.bootstrap("person")?;
//! store.modify(Directives::new().add_text("/person", "name", "Bob"))?;
//! assert_eq!(store.query("/person/name/text()")?, vec!["Bob"]);
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod cache;
pub mod canonical;
pub mod cli;
pub mod config;
pub mod directive;
pub mod error;
pub mod fetch;
pub mod fragment;
pub mod libxml2;
pub mod locator;
pub mod mutation;
pub mod output;
pub mod store;
pub mod tree;
pub mod validator;
pub mod xpath;

pub use access::{DirectAccess, FileAccess, FileGuard, SerializedAccess};
pub use cache::{CacheMetadata, CacheStats, CleanupStats, DiskCache, MemoryCache, ParsedSchemaCache};
pub use canonical::{Canonicalizer, Ruleset};
pub use config::{Config, ConfigManager, SchemaConfig};
pub use directive::{Directive, Directives};
pub use error::{DocumentError, ErrorKind, FetchError, Result, Violation};
pub use fetch::{DefaultFetcher, FileFetcher, HttpClientConfig, HttpFetcher, SchemaFetcher};
pub use fragment::XmlFragment;
pub use libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use locator::{CachedResource, SchemaLocator, SchemaReference};
pub use mutation::{MutationEngine, MutationReport};
pub use output::Output;
pub use store::{DocumentStore, ModifyOutcome};
pub use tree::{Tree, WriteOptions};
pub use validator::Validator;
pub use xpath::{NamespaceContext, PathExpr, Selection};
