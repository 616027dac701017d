use std::fmt;

use xot::Node;

use crate::canonical::Canonicalizer;
use crate::error::{DocumentError, Result};
use crate::tree::{Tree, WriteOptions};
use crate::xpath::{NamespaceContext, PathExpr, Selection};

/// Standalone copy of one element subtree selected from a document.
///
/// Relative expressions are evaluated with the element as context node and
/// absolute ones against the fragment's own document, so `/*` is the element
/// itself. Prefixes bound in the source document stay usable.
#[derive(Debug, Clone)]
pub struct XmlFragment {
    tree: Tree,
    xml: String,
    namespaces: NamespaceContext,
}

impl XmlFragment {
    /// Copy every element in `selection`. Anything else selected is a type mismatch.
    pub(crate) fn collect(
        tree: &Tree,
        selection: &Selection,
        namespaces: &NamespaceContext,
        expression: &str,
    ) -> Result<Vec<XmlFragment>> {
        let Selection::Nodes(nodes) = selection else {
            return Err(non_element(expression));
        };
        nodes
            .iter()
            .map(|&node| {
                if !tree.is_element(node) {
                    return Err(non_element(expression));
                }
                let copy = Canonicalizer::shared().canonicalize(&tree.subtree(node)?)?;
                let xml = render(&copy)?;
                Ok(XmlFragment {
                    tree: copy,
                    xml,
                    namespaces: namespaces.clone(),
                })
            })
            .collect()
    }

    /// Local name of the fragment's element
    pub fn local_name(&self) -> &str {
        self.tree.local_name(self.root()).unwrap_or_default()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// String values of the selected items in document order
    pub fn query(&self, expression: &str) -> Result<Vec<String>> {
        Ok(self.select(expression)?.strings(&self.tree))
    }

    /// Nested element fragments
    pub fn nodes(&self, expression: &str) -> Result<Vec<XmlFragment>> {
        let selection = self.select(expression)?;
        Self::collect(&self.tree, &selection, &self.namespaces, expression)
    }

    /// Serialized subtree without an XML declaration
    pub fn to_xml(&self) -> String {
        self.xml.clone()
    }

    fn root(&self) -> Node {
        self.tree.root_element().unwrap_or_else(|| self.tree.document())
    }

    fn select(&self, expression: &str) -> Result<Selection> {
        PathExpr::parse(expression)?.select(&self.tree, self.root(), &self.namespaces)
    }
}

fn non_element(expression: &str) -> DocumentError {
    DocumentError::query(expression, "expression selects a non-element item")
}

fn render(tree: &Tree) -> Result<String> {
    let options = WriteOptions {
        declaration: false,
        ..Canonicalizer::shared().write_options()
    };
    let root = tree.root_element().unwrap_or_else(|| tree.document());
    let text = tree.serialize_node(root, options)?;
    Ok(text.trim_end_matches('\n').to_string())
}

impl fmt::Display for XmlFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.xml)
    }
}
