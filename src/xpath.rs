//! Path expressions over a [`Tree`]
//!
//! Expressions are XPath 1.0, compiled and evaluated by libxml2. The tree is
//! serialized for each evaluation and every selected node is mapped back onto
//! it by position, so callers always get [`xot`] nodes they can edit.

use std::collections::HashMap;

use xot::Node;

use crate::error::{DocumentError, LibXml2Error, Result};
use crate::libxml2::{LibXml2Wrapper, XPathNode, XPathValue};
use crate::tree::{Tree, XML_NAMESPACE, XSI_NAMESPACE};

/// What an expression evaluated to
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Nodes in document order, attributes included
    Nodes(Vec<Node>),
    /// A string, number or boolean result in its XPath string form
    Value(String),
}

impl Selection {
    /// XPath string-value of every item
    pub fn strings(&self, tree: &Tree) -> Vec<String> {
        match self {
            Selection::Nodes(nodes) => nodes.iter().map(|&node| tree.string_value(node)).collect(),
            Selection::Value(value) => vec![value.clone()],
        }
    }
}

/// Prefix bindings visible to expressions
#[derive(Debug, Clone)]
pub struct NamespaceContext {
    bindings: HashMap<String, String>,
}

impl Default for NamespaceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceContext {
    /// Context knowing only the `xml` and `xsi` prefixes
    pub fn new() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("xml".to_string(), XML_NAMESPACE.to_string());
        bindings.insert("xsi".to_string(), XSI_NAMESPACE.to_string());
        Self { bindings }
    }

    /// Well-known prefixes plus every prefixed declaration on the root element
    pub fn for_tree(tree: &Tree) -> Self {
        let mut context = Self::new();
        for (prefix, uri) in tree.root_namespaces() {
            context.bind(prefix, uri);
        }
        context
    }

    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.bindings.insert(prefix.into(), uri.into());
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    fn pairs(&self) -> Vec<(String, String)> {
        self.bindings
            .iter()
            .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
            .collect()
    }
}

/// A syntactically valid path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
}

impl PathExpr {
    /// Parse an expression. Syntax errors are `DocumentError::Query`.
    pub fn parse(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(DocumentError::query(source, "empty expression"));
        }
        LibXml2Wrapper::new()
            .compile_xpath(source)
            .map_err(|e| query_failure(source, e))?;
        Ok(Self {
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with the document node as context
    pub fn evaluate(&self, tree: &Tree, namespaces: &NamespaceContext) -> Result<Selection> {
        self.select(tree, tree.document(), namespaces)
    }

    /// Evaluate with `context` as the context node for relative paths
    pub fn select(
        &self,
        tree: &Tree,
        context: Node,
        namespaces: &NamespaceContext,
    ) -> Result<Selection> {
        let context = tree.child_path(context).ok_or_else(|| {
            DocumentError::query(&self.source, "context node is not part of the document")
        })?;
        let text = tree.xot().to_string(tree.document())?;

        let value = LibXml2Wrapper::new()
            .evaluate_xpath(text.as_bytes(), &context, &self.source, &namespaces.pairs())
            .map_err(|e| query_failure(&self.source, e))?;

        Ok(match value {
            XPathValue::Nodes(found) => Selection::Nodes(
                found
                    .iter()
                    .map(|node| locate(tree, node))
                    .collect::<Result<Vec<_>>>()?,
            ),
            XPathValue::Boolean(value) => Selection::Value(value.to_string()),
            XPathValue::Number(value) => Selection::Value(format_number(value)),
            XPathValue::String(value) => Selection::Value(value),
        })
    }
}

fn query_failure(expression: &str, err: LibXml2Error) -> DocumentError {
    match err {
        LibXml2Error::XPathFailed { details, .. } => {
            DocumentError::query(expression, details.join("; "))
        }
        other => other.into(),
    }
}

fn locate(tree: &Tree, node: &XPathNode) -> Result<Node> {
    let found = match node {
        XPathNode::Content(path) => tree.node_at(path),
        XPathNode::Attribute {
            owner,
            local,
            namespace,
        } => tree
            .node_at(owner)
            .and_then(|owner| tree.attribute_node(owner, namespace.as_deref(), local)),
    };
    found.ok_or_else(|| DocumentError::Tree(format!("selected node {:?} is not in the tree", node)))
}

/// XPath 1.0 number-to-string conversion
fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
