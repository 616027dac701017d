//! Structural edit directives
//!
//! A directive is one atomic edit addressed by a path expression. Lists of
//! directives are applied in order by the [`MutationEngine`](crate::mutation::MutationEngine).
//!
//! On the wire a directive is a JSON object tagged by `kind`:
//!
//! ```json
//! [
//!   {"kind": "add-node", "selector": "/person", "name": "name", "text": "Bob"},
//!   {"kind": "set-attribute", "selector": "/person/name", "name": "id", "value": "1"},
//!   {"kind": "set-text", "selector": "/person/name", "text": "Alice"},
//!   {"kind": "remove-node", "selector": "/person/name[@id='2']"}
//! ]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{DocumentError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Directive {
    /// Append a child element to the single element matched by `selector`
    AddNode {
        selector: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Set or replace an attribute on the single element matched by `selector`
    SetAttribute {
        selector: String,
        name: String,
        value: String,
    },
    /// Remove every matched node or attribute; matching nothing is not an error
    RemoveNode { selector: String },
    /// Replace the text of the single node or attribute matched by `selector`
    SetText { selector: String, text: String },
}

impl Directive {
    pub fn add(selector: impl Into<String>, name: impl Into<String>) -> Self {
        Directive::AddNode {
            selector: selector.into(),
            name: name.into(),
            text: None,
        }
    }

    pub fn add_with_text(
        selector: impl Into<String>,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Directive::AddNode {
            selector: selector.into(),
            name: name.into(),
            text: Some(text.into()),
        }
    }

    pub fn set_attribute(
        selector: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Directive::SetAttribute {
            selector: selector.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn remove(selector: impl Into<String>) -> Self {
        Directive::RemoveNode {
            selector: selector.into(),
        }
    }

    pub fn set_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Directive::SetText {
            selector: selector.into(),
            text: text.into(),
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            Directive::AddNode { selector, .. }
            | Directive::SetAttribute { selector, .. }
            | Directive::RemoveNode { selector }
            | Directive::SetText { selector, .. } => selector,
        }
    }

    /// Wire name of the directive kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            Directive::AddNode { .. } => "add-node",
            Directive::SetAttribute { .. } => "set-attribute",
            Directive::RemoveNode { .. } => "remove-node",
            Directive::SetText { .. } => "set-text",
        }
    }
}

/// Ordered directive list with a fluent builder
///
/// ```
/// use schemadoc::Directives;
///
/// let directives = Directives::new()
///     .add("/person", "name")
///     .attr("/person/name", "id", "1");
/// assert_eq!(directives.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directives(Vec<Directive>);

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of directive records
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DocumentError::Parse {
            details: format!("invalid directive list: {}", e),
        })
    }

    pub fn push(&mut self, directive: Directive) {
        self.0.push(directive);
    }

    pub fn add(mut self, selector: &str, name: &str) -> Self {
        self.0.push(Directive::add(selector, name));
        self
    }

    pub fn add_text(mut self, selector: &str, name: &str, text: &str) -> Self {
        self.0.push(Directive::add_with_text(selector, name, text));
        self
    }

    pub fn attr(mut self, selector: &str, name: &str, value: &str) -> Self {
        self.0.push(Directive::set_attribute(selector, name, value));
        self
    }

    pub fn remove(mut self, selector: &str) -> Self {
        self.0.push(Directive::remove(selector));
        self
    }

    pub fn set(mut self, selector: &str, text: &str) -> Self {
        self.0.push(Directive::set_text(selector, text));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Directive> {
        self.0.iter()
    }
}

impl AsRef<[Directive]> for Directives {
    fn as_ref(&self) -> &[Directive] {
        &self.0
    }
}

impl From<Vec<Directive>> for Directives {
    fn from(directives: Vec<Directive>) -> Self {
        Self(directives)
    }
}

impl FromIterator<Directive> for Directives {
    fn from_iter<I: IntoIterator<Item = Directive>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Directives {
    type Item = Directive;
    type IntoIter = std::vec::IntoIter<Directive>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Directives {
    type Item = &'a Directive;
    type IntoIter = std::slice::Iter<'a, Directive>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
