//! Mutable XML document tree
//!
//! A thin layer over [`xot`]. Besides naming and namespace helpers it keeps
//! one invariant the path engine depends on: a tree handed out after
//! [`Tree::normalize_text`] has neither empty nor adjacent text nodes, so the
//! position of a node among its siblings survives a serialize and reparse.
//! Documents with a DTD are rejected by the parser.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use xot::output::Indentation;
use xot::output::xml::{Declaration, Parameters};
use xot::{NameId, Node, Value, Xot};

use crate::error::{DocumentError, Result};

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

static QNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([\p{L}_][\p{L}\p{N}._-]*):)?([\p{L}_][\p{L}\p{N}._-]*)$")
        .expect("Failed to compile QName regex")
});

/// Split a qualified name into prefix and local part, rejecting anything that
/// is not a well-formed `prefix:local` or `local` name.
pub fn split_qname(name: &str) -> Option<(Option<&str>, &str)> {
    let caps = QNAME.captures(name)?;
    let prefix = caps.get(1).map(|m| m.as_str());
    let local = caps.get(2)?.as_str();
    Some((prefix, local))
}

/// Serializer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Pretty-print with two spaces per level. Mixed content and
    /// `xml:space="preserve"` elements are written as they are.
    pub indent: bool,
    /// Emit `<?xml version="1.0" encoding="UTF-8"?>`
    pub declaration: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            indent: true,
            declaration: false,
        }
    }
}

#[derive(Clone)]
pub struct Tree {
    xot: Xot,
    document: Node,
}

impl Tree {
    pub fn parse(text: &str) -> Result<Self> {
        let mut xot = Xot::new();
        let document = xot.parse(text)?;
        let mut tree = Self { xot, document };
        tree.normalize_text()?;
        Ok(tree)
    }

    /// Document holding one empty root element in no namespace
    pub fn with_root(local: &str) -> Result<Self> {
        let mut xot = Xot::new();
        let name = xot.add_name(local);
        let root = xot.new_element(name);
        let document = xot.new_document_with_element(root)?;
        Ok(Self { xot, document })
    }

    pub fn xot(&self) -> &Xot {
        &self.xot
    }

    pub fn xot_mut(&mut self) -> &mut Xot {
        &mut self.xot
    }

    pub fn document(&self) -> Node {
        self.document
    }

    pub fn root_element(&self) -> Option<Node> {
        self.xot.document_element(self.document).ok()
    }

    pub fn is_element(&self, node: Node) -> bool {
        self.xot.is_element(node)
    }

    fn name_of(&self, node: Node) -> Option<NameId> {
        match self.xot.value(node) {
            Value::Element(element) => Some(element.name()),
            Value::Attribute(attribute) => Some(attribute.name()),
            _ => None,
        }
    }

    /// Local name of an element or attribute
    pub fn local_name(&self, node: Node) -> Option<&str> {
        self.name_of(node).map(|name| self.xot.local_name_str(name))
    }

    /// Namespace URI of an element or attribute, `None` when it has none
    pub fn namespace_uri(&self, node: Node) -> Option<&str> {
        self.name_of(node)
            .map(|name| self.xot.uri_str(name))
            .filter(|uri| !uri.is_empty())
    }

    /// `prefix:local` as the name would be written at `node`
    pub fn display_name(&self, node: Node) -> String {
        let Some(name) = self.name_of(node) else {
            return String::new();
        };
        let local = self.xot.local_name_str(name);
        let namespace = self.xot.namespace_for_name(name);
        if namespace == self.xot.no_namespace() {
            return local.to_string();
        }
        match self.xot.prefix_for_namespace(node, namespace) {
            Some(prefix) if prefix != self.xot.empty_prefix() => {
                format!("{}:{}", self.xot.prefix_str(prefix), local)
            }
            _ => local.to_string(),
        }
    }

    fn existing_name(&self, namespace: Option<&str>, local: &str) -> Option<NameId> {
        let namespace = match namespace {
            Some(uri) => self.xot.namespace(uri)?,
            None => self.xot.no_namespace(),
        };
        self.xot.name_ns(local, namespace)
    }

    pub fn attribute(&self, node: Node, namespace: Option<&str>, local: &str) -> Option<&str> {
        let name = self.existing_name(namespace, local)?;
        self.xot.get_attribute(node, name)
    }

    /// The attribute node itself, for callers that need to edit or remove it
    pub fn attribute_node(&self, owner: Node, namespace: Option<&str>, local: &str) -> Option<Node> {
        let name = self.existing_name(namespace, local)?;
        self.xot.attributes(owner).get_node(name)
    }

    /// Replace the value in place, or append the attribute last
    pub fn set_attribute(
        &mut self,
        node: Node,
        namespace: Option<&str>,
        local: &str,
        value: &str,
    ) -> Result<()> {
        self.require_element(node)?;
        let namespace = match namespace {
            Some(uri) => self.xot.add_namespace(uri),
            None => self.xot.no_namespace(),
        };
        let name = self.xot.add_name_ns(local, namespace);
        self.xot.set_attribute(node, name, value);
        Ok(())
    }

    /// Namespace bound to `prefix` (the default namespace for `None`) in
    /// scope at `node`
    pub fn lookup_namespace(&self, node: Node, prefix: Option<&str>) -> Option<&str> {
        let prefix = match prefix {
            Some(p) => self.xot.prefix(p)?,
            None => self.xot.empty_prefix(),
        };
        self.xot
            .namespace_for_prefix(node, prefix)
            .map(|namespace| self.xot.namespace_str(namespace))
    }

    pub fn declare_namespace(&mut self, node: Node, prefix: Option<&str>, uri: &str) -> Result<()> {
        self.require_element(node)?;
        let prefix = match prefix {
            Some(p) => self.xot.add_prefix(p),
            None => self.xot.empty_prefix(),
        };
        let namespace = self.xot.add_namespace(uri);
        self.xot.namespaces_mut(node).insert(prefix, namespace);
        Ok(())
    }

    /// Prefixed namespace declarations on the root element
    pub fn root_namespaces(&self) -> Vec<(String, String)> {
        let Some(root) = self.root_element() else {
            return Vec::new();
        };
        let empty = self.xot.empty_prefix();
        self.xot
            .namespaces(root)
            .iter()
            .filter(|(prefix, _)| *prefix != empty)
            .map(|(prefix, namespace)| {
                (
                    self.xot.prefix_str(prefix).to_string(),
                    self.xot.namespace_str(*namespace).to_string(),
                )
            })
            .collect()
    }

    /// XPath string-value
    pub fn string_value(&self, node: Node) -> String {
        self.xot.string_value(node)
    }

    /// Whether `xml:space="preserve"` is in effect at `node`
    pub fn space_preserved(&self, node: Node) -> bool {
        let space = self.xot.xml_space_name();
        self.xot
            .ancestors(node)
            .find_map(|ancestor| match self.xot.value(ancestor) {
                Value::Element(_) => self.xot.get_attribute(ancestor, space),
                _ => None,
            })
            .is_some_and(|value| value == "preserve")
    }

    /// Position of `node` and of each ancestor among its parent's children,
    /// from the document down. `None` for attributes and detached nodes.
    pub fn child_path(&self, node: Node) -> Option<Vec<usize>> {
        if self.xot.is_attribute_node(node) || self.xot.is_namespace_node(node) {
            return None;
        }
        let mut path = Vec::new();
        let mut current = node;
        while let Some(parent) = self.xot.parent(current) {
            path.push(self.xot.child_index(parent, current)?);
            current = parent;
        }
        if current != self.document {
            return None;
        }
        path.reverse();
        Some(path)
    }

    /// Inverse of [`child_path`](Self::child_path)
    pub fn node_at(&self, path: &[usize]) -> Option<Node> {
        path.iter()
            .try_fold(self.document, |node, &index| self.xot.children(node).nth(index))
    }

    /// Merge adjacent text nodes and drop empty ones
    pub fn normalize_text(&mut self) -> Result<()> {
        self.xot.set_text_consolidation(false);
        let result = self.merge_text_runs();
        self.xot.set_text_consolidation(true);
        result
    }

    fn merge_text_runs(&mut self) -> Result<()> {
        let texts: Vec<Node> = self
            .xot
            .descendants(self.document)
            .filter(|&node| self.xot.is_text(node))
            .collect();

        for node in texts {
            if self.xot.is_removed(node) {
                continue;
            }
            let mut merged = self.xot.text_str(node).unwrap_or_default().to_string();
            let mut absorbed = Vec::new();
            let mut next = self.xot.next_sibling(node);
            while let Some(sibling) = next.filter(|&n| self.xot.is_text(n)) {
                merged.push_str(self.xot.text_str(sibling).unwrap_or_default());
                absorbed.push(sibling);
                next = self.xot.next_sibling(sibling);
            }
            for sibling in absorbed.iter().copied() {
                self.xot.remove(sibling)?;
            }

            if merged.is_empty() {
                self.xot.remove(node)?;
            } else if !absorbed.is_empty() {
                if let Some(text) = self.xot.text_mut(node) {
                    text.set(merged);
                }
            }
        }
        Ok(())
    }

    /// Standalone copy of the element `node`, carrying the inherited
    /// namespace declarations its names need
    pub fn subtree(&self, node: Node) -> Result<Tree> {
        self.require_element(node)?;
        let mut xot = self.xot.clone();
        let copy = xot.clone_with_prefixes(node);
        let document = xot.new_document_with_element(copy)?;
        Tree::parse(&xot.to_string(document)?)
    }

    pub fn serialize(&self, options: WriteOptions) -> Result<String> {
        self.serialize_node(self.document, options)
    }

    /// Serialize `node` and its descendants. The text always ends in a newline.
    pub fn serialize_node(&self, node: Node, options: WriteOptions) -> Result<String> {
        let parameters = Parameters {
            indentation: options.indent.then(Indentation::default),
            declaration: options.declaration.then(|| Declaration {
                encoding: Some("UTF-8".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut text = self.xot.serialize_xml_string(parameters, node)?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }

    fn require_element(&self, node: Node) -> Result<()> {
        if self.xot.is_element(node) {
            Ok(())
        } else {
            Err(DocumentError::Tree("node is not an element".to_string()))
        }
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let xml = self.xot.to_string(self.document).unwrap_or_default();
        f.debug_struct("Tree").field("xml", &xml).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const PERSON: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<person xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="person.xsd">
  <!-- contact -->
  <name id="1">Bob &amp; Alice</name>
  <?render inline?>
</person>"#;

    #[test]
    fn test_parse_reads_names_and_bindings() {
        let tree = Tree::parse(PERSON).unwrap();
        let root = tree.root_element().unwrap();

        assert_eq!(tree.local_name(root), Some("person"));
        assert_eq!(tree.namespace_uri(root), None);
        assert_eq!(
            tree.attribute(root, Some(XSI_NAMESPACE), "noNamespaceSchemaLocation"),
            Some("person.xsd")
        );
        assert_eq!(
            tree.root_namespaces(),
            vec![("xsi".to_string(), XSI_NAMESPACE.to_string())]
        );

        let kinds: Vec<_> = tree
            .xot()
            .children(root)
            .filter(|&c| !tree.xot().is_text(c))
            .map(|c| match tree.xot().value(c) {
                Value::Element(_) => "element",
                Value::Comment(_) => "comment",
                Value::ProcessingInstruction(_) => "pi",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["comment", "element", "pi"]);
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        let err = Tree::parse("<person><name></person>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_parse_rejects_doctype() {
        let err = Tree::parse("<!DOCTYPE person [<!ENTITY x \"y\">]><person>&x;</person>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(Tree::parse("<!DOCTYPE a><a/>").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_string_value_concatenates_descendant_text() {
        let tree = Tree::parse("<a>x<b>y</b><c><d>z</d></c></a>").unwrap();
        let root = tree.root_element().unwrap();
        assert_eq!(tree.string_value(root), "xyz");
    }

    #[test]
    fn test_serialize_escapes_and_indents() {
        let tree = Tree::parse(r#"<a k="1 &quot;2&quot;"><b>x &lt; y</b><c/></a>"#).unwrap();
        let text = tree.serialize(WriteOptions::default()).unwrap();
        assert_eq!(
            text,
            "<a k=\"1 &quot;2&quot;\">\n  <b>x &lt; y</b>\n  <c/>\n</a>\n"
        );
    }

    #[test]
    fn test_serialize_mixed_content_inline() {
        let tree = Tree::parse("<p>Hello <b>world</b>!</p>").unwrap();
        assert_eq!(
            tree.serialize(WriteOptions::default()).unwrap(),
            "<p>Hello <b>world</b>!</p>\n"
        );
    }

    #[test]
    fn test_declaration_written_on_request() {
        let tree = Tree::with_root("person").unwrap();
        let options = WriteOptions {
            declaration: true,
            ..WriteOptions::default()
        };
        assert_eq!(
            tree.serialize(options).unwrap(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<person/>\n"
        );
    }

    #[test]
    fn test_prefixed_namespaces_round_trip() {
        let source = r#"<r:root xmlns:r="urn:r" xmlns="urn:d"><child r:flag="yes"/></r:root>"#;
        let tree = Tree::parse(source).unwrap();
        let root = tree.root_element().unwrap();
        let child = tree.xot().first_child(root).unwrap();

        assert_eq!(tree.namespace_uri(child), Some("urn:d"));
        assert_eq!(tree.display_name(child), "child");
        assert_eq!(tree.display_name(root), "r:root");
        assert_eq!(tree.attribute(child, Some("urn:r"), "flag"), Some("yes"));
        assert_eq!(tree.lookup_namespace(child, Some("r")), Some("urn:r"));
        assert_eq!(tree.lookup_namespace(child, None), Some("urn:d"));

        let written = tree.serialize(WriteOptions::default()).unwrap();
        let reparsed = Tree::parse(&written).unwrap();
        assert_eq!(reparsed.serialize(WriteOptions::default()).unwrap(), written);
    }

    #[test]
    fn test_child_path_round_trip() {
        let tree = Tree::parse("<a><!-- c --><b/>text<c><d/></c></a>").unwrap();
        let root = tree.root_element().unwrap();
        let c = tree.xot().last_child(root).unwrap();
        let d = tree.xot().first_child(c).unwrap();

        assert_eq!(tree.child_path(tree.document()), Some(vec![]));
        assert_eq!(tree.child_path(d), Some(vec![0, 3, 0]));
        assert_eq!(tree.node_at(&[0, 3, 0]), Some(d));
        assert_eq!(tree.node_at(&[0, 9]), None);
    }

    #[test]
    fn test_normalize_text_merges_and_drops() {
        let mut tree = Tree::parse("<a>x<b/>y</a>").unwrap();
        let root = tree.root_element().unwrap();
        let b = tree.xot().children(root).nth(1).unwrap();

        let xot = tree.xot_mut();
        xot.set_text_consolidation(false);
        xot.remove(b).unwrap();
        let empty = xot.new_text("");
        xot.append(root, empty).unwrap();
        xot.set_text_consolidation(true);
        assert_eq!(tree.xot().children(root).count(), 3);

        tree.normalize_text().unwrap();
        let children: Vec<_> = tree.xot().children(root).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(tree.string_value(children[0]), "xy");
    }

    #[test]
    fn test_subtree_carries_inherited_namespaces() {
        let tree =
            Tree::parse(r#"<a xmlns:x="urn:x" xmlns:y="urn:y"><x:b><c>1</c></x:b></a>"#).unwrap();
        let root = tree.root_element().unwrap();
        let b = tree.xot().first_child(root).unwrap();

        let copy = tree.subtree(b).unwrap();
        assert_eq!(
            copy.serialize(WriteOptions::default()).unwrap(),
            "<x:b xmlns:x=\"urn:x\">\n  <c>1</c>\n</x:b>\n"
        );
    }

    #[test]
    fn test_set_attribute_and_declare_namespace() {
        let mut tree = Tree::with_root("person").unwrap();
        let root = tree.root_element().unwrap();
        tree.declare_namespace(root, Some("xsi"), XSI_NAMESPACE).unwrap();
        tree.set_attribute(root, Some(XSI_NAMESPACE), "noNamespaceSchemaLocation", "p.xsd")
            .unwrap();
        tree.set_attribute(root, None, "id", "1").unwrap();
        tree.set_attribute(root, None, "id", "2").unwrap();

        assert_eq!(
            tree.serialize(WriteOptions::default()).unwrap(),
            "<person xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" xsi:noNamespaceSchemaLocation=\"p.xsd\" id=\"2\"/>\n"
        );
        assert!(tree.set_attribute(tree.document(), None, "id", "3").is_err());
    }

    #[test]
    fn test_space_preserved_is_inherited() {
        let tree = Tree::parse(r#"<a><p xml:space="preserve"><q/></p><r/></a>"#).unwrap();
        let root = tree.root_element().unwrap();
        let p = tree.xot().first_child(root).unwrap();
        let q = tree.xot().first_child(p).unwrap();
        let r = tree.xot().last_child(root).unwrap();

        assert!(tree.space_preserved(q));
        assert!(!tree.space_preserved(r));
    }

    #[test]
    fn test_split_qname() {
        assert_eq!(split_qname("name"), Some((None, "name")));
        assert_eq!(
            split_qname("xsi:noNamespaceSchemaLocation"),
            Some((Some("xsi"), "noNamespaceSchemaLocation"))
        );
        assert_eq!(split_qname("1bad"), None);
        assert_eq!(split_qname("a:b:c"), None);
        assert_eq!(split_qname(""), None);
    }
}
