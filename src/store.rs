//! Document store
//!
//! A [`DocumentStore`] is a handle on one XML file. It keeps no copy of the
//! document: every call reads the file, and the file stays the only source of
//! truth. Whatever a call writes is canonical and has passed strict
//! validation; a failing call leaves the file exactly as it found it.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::access::{DirectAccess, FileAccess, FileGuard};
use crate::canonical::Canonicalizer;
use crate::config::SchemaConfig;
use crate::directive::Directive;
use crate::error::{DocumentError, Result};
use crate::fragment::XmlFragment;
use crate::mutation::MutationEngine;
use crate::tree::{Tree, XSI_NAMESPACE, split_qname};
use crate::validator::Validator;
use crate::xpath::{NamespaceContext, PathExpr, Selection};

/// Result of a successful [`DocumentStore::modify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyOutcome {
    /// The canonical result differed and replaced the file
    Written,
    /// The canonical result equals the current contents; nothing was written
    Unchanged,
}

pub struct DocumentStore {
    path: PathBuf,
    schema: SchemaConfig,
    validator: OnceCell<Arc<Validator>>,
    access: Arc<dyn FileAccess>,
    canonicalizer: &'static Canonicalizer,
    engine: MutationEngine,
}

impl DocumentStore {
    /// Store over `path` using the process-wide validator and the default schema catalog
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema: SchemaConfig::default(),
            validator: OnceCell::new(),
            access: Arc::new(DirectAccess),
            canonicalizer: Canonicalizer::shared(),
            engine: MutationEngine::new(),
        }
    }

    pub fn with_validator(self, validator: Arc<Validator>) -> Self {
        Self {
            validator: OnceCell::with_value(validator),
            ..self
        }
    }

    pub fn with_schema_config(self, schema: SchemaConfig) -> Self {
        Self { schema, ..self }
    }

    pub fn with_file_access(self, access: Arc<dyn FileAccess>) -> Self {
        Self { access, ..self }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the document for `schema_name`, or repair the schema location of
    /// an existing one.
    ///
    /// The root element is named after the last `/` segment of `schema_name`.
    /// A missing or empty file gets a bare root bound to the configured schema
    /// version; that first write is not validated. An existing file whose
    /// binding differs gets one `set-attribute` edit through [`modify`](Self::modify).
    pub fn bootstrap(&self, schema_name: &str) -> Result<&Self> {
        let root_name = root_name(schema_name)?;
        let uri = self.schema.uri_for(schema_name);

        let guard = self.access.acquire(&self.path)?;
        let existing = guard.read()?.filter(|bytes| !bytes.is_empty());

        let Some(bytes) = existing else {
            let mut tree = Tree::with_root(root_name)?;
            let root = tree.root_element().ok_or_else(no_root)?;
            tree.declare_namespace(root, Some("xsi"), XSI_NAMESPACE)?;
            tree.set_attribute(root, Some(XSI_NAMESPACE), "noNamespaceSchemaLocation", &uri)?;

            let text = self.canonicalizer.render(&tree)?;
            guard.write(text.as_bytes())?;
            info!(path = %self.path.display(), schema = %uri, "bootstrapped document");
            return Ok(self);
        };

        let tree = Validator::parse(&decode(bytes)?)?;
        let root = tree.root_element().ok_or_else(no_root)?;

        if tree.local_name(root) != Some(root_name) || tree.namespace_uri(root).is_some() {
            return Err(DocumentError::directive(
                0,
                format!(
                    "root element '{}' does not match schema '{}'",
                    tree.display_name(root),
                    schema_name
                ),
            ));
        }

        let current = tree.attribute(root, Some(XSI_NAMESPACE), "noNamespaceSchemaLocation");
        if current == Some(uri.as_str()) {
            debug!(path = %self.path.display(), "schema binding is current");
            return Ok(self);
        }

        warn!(
            path = %self.path.display(),
            found = current.unwrap_or("<none>"),
            expected = %uri,
            "repairing schema binding"
        );
        drop(guard);
        self.modify([Directive::set_attribute(
            format!("/{}", root_name),
            "xsi:noNamespaceSchemaLocation",
            uri,
        )])?;
        Ok(self)
    }

    /// Raw file contents, neither parsed nor validated
    pub fn as_text(&self) -> Result<String> {
        let guard = self.access.acquire(&self.path)?;
        self.read_text(guard.as_ref())
    }

    /// String values of everything `expression` selects, in document order
    pub fn query(&self, expression: &str) -> Result<Vec<String>> {
        let (tree, selection) = self.select(expression)?;
        Ok(selection.strings(&tree))
    }

    /// Element subtrees selected by `expression`
    pub fn query_nodes(&self, expression: &str) -> Result<Vec<XmlFragment>> {
        let expr = PathExpr::parse(expression)?;
        let tree = self.load_valid()?;
        let namespaces = NamespaceContext::for_tree(&tree);
        let selection = expr.evaluate(&tree, &namespaces)?;
        XmlFragment::collect(&tree, &selection, &namespaces, expression)
    }

    /// Apply `directives` in order, then canonicalize, validate and write.
    ///
    /// Nothing is written when any directive fails, when the result violates
    /// the schema, or when the result is byte-identical to the file.
    pub fn modify(&self, directives: impl AsRef<[Directive]>) -> Result<ModifyOutcome> {
        let directives = directives.as_ref();
        let validator = self.validator()?;

        let guard = self.access.acquire(&self.path)?;
        let before = self.read_text(guard.as_ref())?;
        let mut tree = Validator::parse(&before)?;

        let report = self.engine.apply(&mut tree, directives)?;
        let canonical = self.canonicalizer.canonicalize(&tree)?;
        let after = self.canonicalizer.serialize(&canonical)?;

        validator.validate(&canonical, &after, Some(&document_dir(&self.path)))?;

        if after == before {
            debug!(
                path = %self.path.display(),
                applied = report.applied,
                "canonical result unchanged, skipping write"
            );
            return Ok(ModifyOutcome::Unchanged);
        }

        guard.write(after.as_bytes())?;
        info!(
            path = %self.path.display(),
            applied = report.applied,
            skipped = report.skipped,
            bytes = after.len(),
            "document written"
        );
        Ok(ModifyOutcome::Written)
    }

    /// Parse and strictly validate the current file
    pub fn verify(&self) -> Result<()> {
        self.load_valid().map(|_| ())
    }

    fn select(&self, expression: &str) -> Result<(Tree, Selection)> {
        let expr = PathExpr::parse(expression)?;
        let tree = self.load_valid()?;
        let selection = expr.evaluate(&tree, &NamespaceContext::for_tree(&tree))?;
        Ok((tree, selection))
    }

    fn load_valid(&self) -> Result<Tree> {
        let validator = self.validator()?;
        let text = {
            let guard = self.access.acquire(&self.path)?;
            self.read_text(guard.as_ref())?
        };
        validator.parse_strict(&text, Some(&document_dir(&self.path)))
    }

    fn read_text(&self, guard: &dyn FileGuard) -> Result<String> {
        match guard.read()? {
            Some(bytes) => decode(bytes),
            None => Err(DocumentError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("document not found: {}", self.path.display()),
            ))),
        }
    }

    fn validator(&self) -> Result<&Arc<Validator>> {
        self.validator.get_or_try_init(Validator::global)
    }
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Directory relative schema locations of the document at `path` resolve against
pub(crate) fn document_dir(path: &Path) -> PathBuf {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// Last `/` segment of a schema name, which must be a plain XML name
fn root_name(schema_name: &str) -> Result<&str> {
    let invalid = || DocumentError::InvalidSchemaName {
        name: schema_name.to_string(),
    };

    if schema_name.is_empty()
        || schema_name.chars().any(char::is_whitespace)
        || schema_name.split('/').any(|segment| segment.is_empty() || segment == "..")
    {
        return Err(invalid());
    }

    let last = schema_name.rsplit('/').next().ok_or_else(invalid)?;
    match split_qname(last) {
        Some((None, local)) => Ok(local),
        _ => Err(invalid()),
    }
}

fn no_root() -> DocumentError {
    DocumentError::Parse {
        details: "document has no root element".to_string(),
    }
}

fn decode(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| DocumentError::Parse {
        details: format!("document is not valid UTF-8: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::Directives;
    use crate::error::{ErrorKind, FetchError};
    use crate::fetch::SchemaFetcher;
    use crate::locator::SchemaLocator;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const PERSON_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="person">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="name" minOccurs="0" maxOccurs="unbounded">
          <xs:complexType>
            <xs:simpleContent>
              <xs:extension base="xs:string">
                <xs:attribute name="id" type="xs:string"/>
              </xs:extension>
            </xs:simpleContent>
          </xs:complexType>
        </xs:element>
        <xs:element name="age" type="xs:nonNegativeInteger" minOccurs="0"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

    const PERSON_URI: &str = "https://raw.githubusercontent.com/zerocracy/datum/0.23/xsd/person.xsd";

    struct StaticFetcher;

    impl SchemaFetcher for StaticFetcher {
        fn fetch(&self, location: &str) -> std::result::Result<Vec<u8>, FetchError> {
            if location.ends_with("/person.xsd") {
                Ok(PERSON_XSD.as_bytes().to_vec())
            } else {
                Err(FetchError::NotFound {
                    location: location.to_string(),
                })
            }
        }
    }

    /// Counts writes that reach the file
    #[derive(Default)]
    struct CountingAccess {
        writes: Arc<AtomicUsize>,
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
            crate::access::write_atomic(&self.path, bytes)
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

    fn store(dir: &TempDir) -> (DocumentStore, Arc<AtomicUsize>) {
        let access = CountingAccess::default();
        let writes = access.writes.clone();
        let locator = Arc::new(SchemaLocator::new(Arc::new(StaticFetcher)));
        let store = DocumentStore::new(dir.path().join("person.xml"))
            .with_validator(Arc::new(Validator::new(locator)))
            .with_file_access(Arc::new(access));
        (store, writes)
    }

    #[test]
    fn test_bootstrap_creates_bound_root() {
        let dir = TempDir::new().unwrap();
        let (store, writes) = store(&dir);

        store.bootstrap("person").unwrap();

        assert_eq!(
            store.as_text().unwrap(),
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<person xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:noNamespaceSchemaLocation=\"{}\"/>\n",
                PERSON_URI
            )
        );
        assert_eq!(
            store.query("/person/@xsi:noNamespaceSchemaLocation").unwrap(),
            vec![PERSON_URI]
        );
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bootstrap_is_noop_when_bound() {
        let dir = TempDir::new().unwrap();
        let (store, writes) = store(&dir);

        store.bootstrap("person").unwrap().bootstrap("person").unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bootstrap_treats_empty_file_as_missing() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        fs::write(store.path(), "").unwrap();

        store.bootstrap("person").unwrap();
        assert!(store.as_text().unwrap().contains(PERSON_URI));
    }

    #[test]
    fn test_bootstrap_repairs_stale_binding_only() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let stale = PERSON_URI.replace("0.23", "0.21");
        fs::write(
            store.path(),
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<person xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:noNamespaceSchemaLocation=\"{}\">\n  <name>Bob</name>\n</person>\n",
                stale
            ),
        )
        .unwrap();
        let before = store.as_text().unwrap();

        store.bootstrap("person").unwrap();

        assert_eq!(store.as_text().unwrap(), before.replace(&stale, PERSON_URI));
    }

    #[test]
    fn test_bootstrap_rejects_other_root() {
        let dir = TempDir::new().unwrap();
        let (store, writes) = store(&dir);
        fs::write(store.path(), "<robot/>").unwrap();

        let err = store.bootstrap("person").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Directive);
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bootstrap_malformed_file_is_parse_failure() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        fs::write(store.path(), "<person>").unwrap();

        assert_eq!(store.bootstrap("person").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_root_name_is_last_segment() {
        assert_eq!(root_name("person").unwrap(), "person");
        assert_eq!(root_name("pm/staff/roles").unwrap(), "roles");
        for bad in ["", "a//b", "/person", "person/", "two words", "1st", "p:x", "../x"] {
            assert!(
                matches!(root_name(bad), Err(DocumentError::InvalidSchemaName { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_modify_then_query() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        store.bootstrap("person").unwrap();

        let outcome = store
            .modify(Directives::new().add_text("/person", "name", "Bob"))
            .unwrap();

        assert_eq!(outcome, ModifyOutcome::Written);
        assert_eq!(store.query("/person/name/text()").unwrap(), vec!["Bob"]);
    }

    #[test]
    fn test_modify_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (store, writes) = store(&dir);
        store.bootstrap("person").unwrap();
        let directives = Directives::new()
            .remove("/person/age")
            .add_text("/person", "age", "30");

        assert_eq!(store.modify(&directives).unwrap(), ModifyOutcome::Written);
        let first = store.as_text().unwrap();
        let writes_after_first = writes.load(Ordering::SeqCst);

        assert_eq!(store.modify(&directives).unwrap(), ModifyOutcome::Unchanged);
        assert_eq!(store.as_text().unwrap(), first);
        assert_eq!(writes.load(Ordering::SeqCst), writes_after_first);
    }

    #[test]
    fn test_validation_gate_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let (store, writes) = store(&dir);
        store.bootstrap("person").unwrap();
        let before = store.as_text().unwrap();

        let err = store
            .modify(Directives::new().add_text("/person", "age", "ancient"))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.violations().is_empty());
        assert_eq!(store.as_text().unwrap(), before);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_directive_order_matters() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        store.bootstrap("person").unwrap();
        let before = store.as_text().unwrap();

        let err = store
            .modify(
                Directives::new()
                    .attr("/person/name", "id", "1")
                    .add("/person", "name"),
            )
            .unwrap_err();
        assert!(matches!(err, DocumentError::Directive { index: 0, .. }));
        assert_eq!(store.as_text().unwrap(), before);

        store
            .modify(
                Directives::new()
                    .add("/person", "name")
                    .attr("/person/name", "id", "1"),
            )
            .unwrap();
        assert!(store.as_text().unwrap().contains("<name id=\"1\"/>"));
    }

    #[test]
    fn test_ambiguous_target_aborts_whole_call() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        store.bootstrap("person").unwrap();
        store
            .modify(Directives::new().add("/person", "name").add("/person", "name"))
            .unwrap();
        let before = store.as_text().unwrap();

        let err = store
            .modify(
                Directives::new()
                    .add_text("/person", "age", "3")
                    .set("/person/name", "Bob"),
            )
            .unwrap_err();

        assert!(matches!(err, DocumentError::Directive { index: 1, .. }));
        assert_eq!(store.as_text().unwrap(), before);
    }

    #[test]
    fn test_query_nodes_returns_fragments() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        store.bootstrap("person").unwrap();
        store
            .modify(
                Directives::new()
                    .add_text("/person", "name", "Ann")
                    .add_text("/person", "name", "Bea")
                    .attr("/person/name[2]", "id", "b"),
            )
            .unwrap();

        let names = store.query_nodes("/person/name").unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[1].query("@id").unwrap(), vec!["b"]);
        assert_eq!(names[0].to_string(), "<name>Ann</name>");

        let err = store.query_nodes("/person/name/text()").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn test_query_rejects_invalid_document() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        fs::write(
            store.path(),
            format!(
                "<person xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:noNamespaceSchemaLocation=\"{}\"><pet/></person>",
                PERSON_URI
            ),
        )
        .unwrap();

        assert_eq!(store.query("/person").unwrap_err().kind(), ErrorKind::Validation);
        assert!(store.as_text().unwrap().contains("<pet/>"));
    }

    #[test]
    fn test_missing_document_is_io_failure() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);

        assert_eq!(store.as_text().unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(store.query("/person").unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(
            store.modify(Directives::new().remove("/person/name")).unwrap_err().kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_bad_expression_is_query_failure() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        store.bootstrap("person").unwrap();

        assert_eq!(store.query("/person[").unwrap_err().kind(), ErrorKind::Query);
        assert_eq!(store.query("/q:person").unwrap_err().kind(), ErrorKind::Query);
    }

    #[test]
    fn test_custom_schema_version() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        let store = store.with_schema_config(SchemaConfig {
            version: "0.99".to_string(),
            ..SchemaConfig::default()
        });

        store.bootstrap("person").unwrap();
        assert_eq!(
            store.query("/person/@xsi:noNamespaceSchemaLocation").unwrap(),
            vec![PERSON_URI.replace("0.23", "0.99")]
        );
    }

    #[test]
    fn test_debug_shows_path() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);

        let shown = format!("{:?}", store);
        assert!(shown.starts_with("DocumentStore"), "{}", shown);
        assert!(shown.contains("person.xml"), "{}", shown);

        // failures from the chaining API can be unwrapped in tests
        fs::write(store.path(), "<robot/>").unwrap();
        let err = store.bootstrap("person").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Directive);
    }

    #[test]
    fn test_query_scalar_expression() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        store.bootstrap("person").unwrap();
        store
            .modify(Directives::new().add("/person", "name").add("/person", "name"))
            .unwrap();

        assert_eq!(store.query("count(/person/name)").unwrap(), vec!["2"]);
        assert_eq!(store.query("boolean(/person/age)").unwrap(), vec!["false"]);
    }
}
