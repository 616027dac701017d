//! Directive interpreter
//!
//! Applies an ordered directive list to a [`Tree`] in place. Each directive
//! sees the tree left by the ones before it. Only removals tolerate a selector
//! that matches nothing; every other kind needs exactly one target.

use tracing::debug;
use xot::{Node, ValueType};

use crate::directive::Directive;
use crate::error::{DocumentError, Result};
use crate::tree::{Tree, XML_NAMESPACE, XSI_NAMESPACE, split_qname};
use crate::xpath::{NamespaceContext, PathExpr, Selection};

/// Counts from one `apply` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationReport {
    pub applied: usize,
    /// Removals whose selector matched nothing
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MutationEngine;

impl MutationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `directives` in order. The first failing directive aborts the call;
    /// callers discard the partially edited tree.
    pub fn apply(&self, tree: &mut Tree, directives: &[Directive]) -> Result<MutationReport> {
        let mut report = MutationReport::default();

        for (index, directive) in directives.iter().enumerate() {
            let expr = PathExpr::parse(directive.selector())?;
            let namespaces = NamespaceContext::for_tree(tree);
            let targets = match expr.evaluate(tree, &namespaces)? {
                Selection::Nodes(nodes) => nodes,
                Selection::Value(_) => {
                    return Err(DocumentError::directive(
                        index,
                        format!("selector '{}' does not select nodes", directive.selector()),
                    ));
                }
            };

            debug!(
                index,
                kind = directive.kind_name(),
                selector = directive.selector(),
                matches = targets.len(),
                "applying directive"
            );

            match directive {
                Directive::RemoveNode { .. } => {
                    if targets.is_empty() {
                        debug!(index, "remove target not found, skipping");
                        report.skipped += 1;
                        continue;
                    }
                    remove(tree, index, &targets)?;
                }
                Directive::AddNode { name, text, .. } => {
                    let parent = single_element(tree, index, directive, &targets)?;
                    add_node(tree, index, parent, name, text.as_deref())?;
                }
                Directive::SetAttribute { name, value, .. } => {
                    let owner = single_element(tree, index, directive, &targets)?;
                    set_attribute(tree, index, owner, name, value)?;
                }
                Directive::SetText { text, .. } => {
                    let target = single_target(index, directive, &targets)?;
                    set_text(tree, index, target, text)?;
                }
            }
            report.applied += 1;
        }

        Ok(report)
    }
}

fn single_target(index: usize, directive: &Directive, targets: &[Node]) -> Result<Node> {
    match targets {
        [target] => Ok(*target),
        [] => Err(DocumentError::directive(
            index,
            format!(
                "{} target '{}' matched nothing",
                directive.kind_name(),
                directive.selector()
            ),
        )),
        _ => Err(DocumentError::directive(
            index,
            format!(
                "{} target '{}' is ambiguous ({} matches)",
                directive.kind_name(),
                directive.selector(),
                targets.len()
            ),
        )),
    }
}

fn single_element(
    tree: &Tree,
    index: usize,
    directive: &Directive,
    targets: &[Node],
) -> Result<Node> {
    let target = single_target(index, directive, targets)?;
    if tree.is_element(target) {
        Ok(target)
    } else {
        Err(DocumentError::directive(
            index,
            format!(
                "{} target '{}' is not an element",
                directive.kind_name(),
                directive.selector()
            ),
        ))
    }
}

/// Reject text that cannot be written back as well-formed XML
fn check_payload(index: usize, text: &str, comment: bool) -> Result<()> {
    if let Some(c) = text.chars().find(|&c| !is_xml_char(c)) {
        return Err(DocumentError::directive(
            index,
            format!("character U+{:04X} is not allowed in XML", c as u32),
        ));
    }
    if comment && (text.contains("--") || text.ends_with('-')) {
        return Err(DocumentError::directive(
            index,
            "comment text may not contain '--' or end with '-'",
        ));
    }
    Ok(())
}

fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

fn remove(tree: &mut Tree, index: usize, targets: &[Node]) -> Result<()> {
    let root = tree.root_element();
    for &target in targets {
        if target == tree.document() {
            return Err(DocumentError::directive(index, "cannot remove the document"));
        }
        if Some(target) == root {
            return Err(DocumentError::directive(index, "cannot remove the root element"));
        }
    }

    let xot = tree.xot_mut();
    let attributes: Vec<Node> = targets
        .iter()
        .copied()
        .filter(|&target| xot.is_attribute_node(target))
        .collect();
    for attribute in attributes {
        let owner = xot.parent(attribute);
        let name = xot.attribute_node(attribute).map(|value| value.name());
        if let (Some(owner), Some(name)) = (owner, name) {
            xot.remove_attribute(owner, name);
        }
    }

    // a removed ancestor takes its selected descendants with it
    xot.set_text_consolidation(false);
    for &target in targets {
        if !xot.is_removed(target) && !xot.is_attribute_node(target) {
            xot.remove(target)?;
        }
    }
    tree.normalize_text()
}

fn parse_name<'a>(index: usize, name: &'a str) -> Result<(Option<&'a str>, &'a str)> {
    split_qname(name)
        .ok_or_else(|| DocumentError::directive(index, format!("'{}' is not a valid XML name", name)))
}

/// Resolve `prefix` in scope at `at`; the `xsi` prefix is declared there when
/// nothing binds it yet.
fn resolve_prefix(tree: &mut Tree, index: usize, at: Node, prefix: &str) -> Result<String> {
    if let Some(uri) = tree.lookup_namespace(at, Some(prefix)) {
        return Ok(uri.to_string());
    }
    if prefix == "xsi" {
        tree.declare_namespace(at, Some("xsi"), XSI_NAMESPACE)?;
        return Ok(XSI_NAMESPACE.to_string());
    }
    Err(DocumentError::directive(
        index,
        format!("namespace prefix '{}' is not declared", prefix),
    ))
}

fn add_node(
    tree: &mut Tree,
    index: usize,
    parent: Node,
    name: &str,
    text: Option<&str>,
) -> Result<()> {
    let (prefix, local) = parse_name(index, name)?;
    if prefix == Some("xmlns") {
        return Err(DocumentError::directive(index, "'xmlns' is not an element prefix"));
    }
    if let Some(text) = text {
        check_payload(index, text, false)?;
    }
    let namespace = match prefix {
        Some(p) => Some(resolve_prefix(tree, index, parent, p)?),
        None => tree.lookup_namespace(parent, None).map(str::to_string),
    };

    let xot = tree.xot_mut();
    let namespace = match namespace {
        Some(uri) => xot.add_namespace(&uri),
        None => xot.no_namespace(),
    };
    let name = xot.add_name_ns(local, namespace);
    let element = xot.new_element(name);
    xot.append(parent, element)?;
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        xot.append_text(element, text)?;
    }
    Ok(())
}

fn set_attribute(tree: &mut Tree, index: usize, owner: Node, name: &str, value: &str) -> Result<()> {
    let (prefix, local) = parse_name(index, name)?;
    if prefix == Some("xmlns") || (prefix.is_none() && local == "xmlns") {
        return Err(DocumentError::directive(
            index,
            "namespace declarations cannot be set as attributes",
        ));
    }
    check_payload(index, value, false)?;
    let namespace = match prefix {
        Some("xml") => Some(XML_NAMESPACE.to_string()),
        Some(p) => Some(resolve_prefix(tree, index, owner, p)?),
        None => None,
    };

    tree.set_attribute(owner, namespace.as_deref(), local, value)
}

fn set_text(tree: &mut Tree, index: usize, target: Node, text: &str) -> Result<()> {
    let kind = tree.xot().value_type(target);
    check_payload(index, text, kind == ValueType::Comment)?;

    let xot = tree.xot_mut();
    match kind {
        ValueType::Attribute => {
            if let Some(attribute) = xot.attribute_node_mut(target) {
                attribute.set_value(text);
            }
        }
        ValueType::Comment => {
            if let Some(comment) = xot.comment_mut(target) {
                comment.set(text)?;
            }
        }
        ValueType::Text if text.is_empty() => {
            xot.remove(target)?;
            tree.normalize_text()?;
        }
        ValueType::Text => {
            if let Some(content) = xot.text_mut(target) {
                content.set(text);
            }
        }
        ValueType::Element => {
            let children: Vec<Node> = xot.children(target).collect();
            for child in children {
                xot.remove(child)?;
            }
            if !text.is_empty() {
                xot.append_text(target, text)?;
            }
        }
        _ => return Err(DocumentError::directive(index, "set-text target holds no text")),
    }
    Ok(())
}
