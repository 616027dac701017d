//! Strict validation
//!
//! A document is accepted only if it is well-formed, its root element names a
//! schema, and libxml2 reports no violation against that schema. Every
//! violation is collected so callers can report a complete diagnostic.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::cache::ParsedSchemaCache;
use crate::error::{DocumentError, Result, Violation};
use crate::libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
use crate::locator::{CachedResource, SchemaLocator, SchemaReference};
use crate::tree::{Tree, XSI_NAMESPACE};

static GLOBAL: OnceCell<Arc<Validator>> = OnceCell::new();

pub struct Validator {
    locator: Arc<SchemaLocator>,
    compiled: ParsedSchemaCache,
    libxml: LibXml2Wrapper,
}

impl Validator {
    pub fn new(locator: Arc<SchemaLocator>) -> Self {
        Self {
            locator,
            compiled: ParsedSchemaCache::new(),
            libxml: LibXml2Wrapper::new(),
        }
    }

    /// The process-wide validator, sharing [`SchemaLocator::global`]
    pub fn global() -> Result<Arc<Validator>> {
        GLOBAL
            .get_or_try_init(|| SchemaLocator::global().map(|locator| Arc::new(Self::new(locator))))
            .cloned()
    }

    pub fn locator(&self) -> &Arc<SchemaLocator> {
        &self.locator
    }

    /// Well-formedness check only
    pub fn parse(text: &str) -> Result<Tree> {
        Tree::parse(text)
    }

    /// Parse and strictly validate. `base_dir` resolves relative schema locations.
    pub fn parse_strict(&self, text: &str, base_dir: Option<&Path>) -> Result<Tree> {
        let tree = Self::parse(text)?;
        self.validate(&tree, text, base_dir)?;
        Ok(tree)
    }

    /// The schema bound by the root element: `xsi:noNamespaceSchemaLocation`,
    /// else the `xsi:schemaLocation` pair for the root's namespace. A root
    /// without a binding is a violation.
    pub fn schema_reference(tree: &Tree, base_dir: Option<&Path>) -> Result<SchemaReference> {
        let root = tree.root_element().ok_or_else(|| DocumentError::Parse {
            details: "document has no root element".to_string(),
        })?;

        let reference = if let Some(location) =
            tree.attribute(root, Some(XSI_NAMESPACE), "noNamespaceSchemaLocation")
        {
            Some(SchemaReference::xsd(location.trim()))
        } else if let Some(pairs) = tree.attribute(root, Some(XSI_NAMESPACE), "schemaLocation") {
            let tokens: Vec<&str> = pairs.split_whitespace().collect();
            let namespace = tree.namespace_uri(root);
            tokens
                .chunks_exact(2)
                .find(|pair| Some(pair[0]) == namespace)
                .or_else(|| tokens.chunks_exact(2).next())
                .map(|pair| {
                    SchemaReference::xsd(pair[1]).with_namespace(Some(pair[0].to_string()))
                })
        } else {
            None
        };

        let reference = reference.filter(|r| !r.system_id.is_empty()).ok_or_else(|| {
            DocumentError::Validation {
                schema: "<none>".to_string(),
                violations: vec![Violation::new(
                    None,
                    format!(
                        "root element '{}' declares no schema location",
                        tree.display_name(root)
                    ),
                )],
            }
        })?;

        Ok(match base_dir {
            Some(dir) if reference.is_relative() => {
                reference.with_base_uri(Some(dir.to_string_lossy().into_owned()))
            }
            _ => reference,
        })
    }

    /// Check `text` (the serialization of `tree`) against the schema its root binds.
    pub fn validate(&self, tree: &Tree, text: &str, base_dir: Option<&Path>) -> Result<()> {
        let reference = Self::schema_reference(tree, base_dir)?;
        let resource = self.locator.resolve(&reference)?;
        let schema = self.compile(&resource)?;

        match self
            .libxml
            .validate_memory(&schema, text.as_bytes(), &resource.location)
        {
            Ok(ValidationResult::Valid) => {
                debug!(schema = %resource.location, "document is valid");
                Ok(())
            }
            Ok(ValidationResult::Invalid {
                error_count,
                mut violations,
            }) => {
                if violations.is_empty() {
                    violations.push(Violation::new(
                        None,
                        format!("{} schema violation(s) reported", error_count),
                    ));
                }
                Err(DocumentError::Validation {
                    schema: resource.location.clone(),
                    violations,
                })
            }
            Ok(ValidationResult::InternalError { code }) => Err(DocumentError::LibXml2Internal {
                details: format!("validation returned internal code {}", code),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a compiled schema for `reference` is cached
    pub fn is_compiled(&self, reference: &SchemaReference) -> bool {
        self.compiled.contains(reference)
    }

    /// Compile `resource`, fetching the schemas it includes or imports
    /// through the locator. A nested schema that cannot be resolved fails
    /// the compilation with the locator's error.
    fn compile(&self, resource: &CachedResource) -> Result<Arc<XmlSchemaPtr>> {
        let mut unresolved: Option<DocumentError> = None;
        let compiled = self.compiled.get_or_compile(resource.reference.clone(), || {
            debug!(schema = %resource.location, "compiling schema");
            self.libxml
                .parse_schema(&resource.data, &resource.location, |location| {
                    debug!(schema = %resource.location, nested = location, "loading nested schema");
                    match self.locator.resolve(&SchemaReference::xsd(location)) {
                        Ok(nested) => Some(nested.data.to_vec()),
                        Err(e) => {
                            unresolved.get_or_insert(e);
                            None
                        }
                    }
                })
        });

        compiled.map_err(|e| {
            unresolved.take().unwrap_or_else(|| DocumentError::SchemaParsing {
                url: resource.location.clone(),
                details: e.to_string(),
            })
        })
    }
}
