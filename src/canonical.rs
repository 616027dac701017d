//! Canonical form
//!
//! Every document is normalized the same way before it is compared with the
//! file on disk or written back. The rules live in an embedded TOML ruleset
//! parsed once per process.

use once_cell::sync::Lazy;
use serde::Deserialize;

use xot::{Node, Value};

use crate::error::{ConfigResult, Result};
use crate::tree::{Tree, WriteOptions};

const DEFAULT_RULESET: &str = include_str!("canonical.toml");

static SHARED: Lazy<Canonicalizer> = Lazy::new(|| {
    Canonicalizer::from_toml(DEFAULT_RULESET).expect("Embedded canonical ruleset must parse")
});

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ruleset {
    pub strip_whitespace_text: bool,
    pub drop_comments: bool,
    pub drop_processing_instructions: bool,
    pub indent: bool,
    pub xml_declaration: bool,
}

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    rules: Ruleset,
}

impl Canonicalizer {
    /// The process-wide canonicalizer built from the embedded ruleset
    pub fn shared() -> &'static Canonicalizer {
        &SHARED
    }

    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        Ok(Self::with_rules(toml::from_str(text)?))
    }

    pub fn with_rules(rules: Ruleset) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    /// Build the canonical copy of `tree`. The input is left untouched.
    pub fn canonicalize(&self, tree: &Tree) -> Result<Tree> {
        let mut out = tree.clone();
        let doomed: Vec<Node> = out
            .xot()
            .descendants(out.document())
            .filter(|&node| self.drops(&out, node))
            .collect();

        out.xot_mut().set_text_consolidation(false);
        for node in doomed {
            out.xot_mut().remove(node)?;
        }
        out.normalize_text()?;
        Ok(out)
    }

    /// Canonicalize and serialize
    pub fn render(&self, tree: &Tree) -> Result<String> {
        self.serialize(&self.canonicalize(tree)?)
    }

    /// Serialize a tree with the ruleset's output settings, without normalizing it
    pub fn serialize(&self, tree: &Tree) -> Result<String> {
        tree.serialize(self.write_options())
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            indent: self.rules.indent,
            declaration: self.rules.xml_declaration,
        }
    }

    fn drops(&self, tree: &Tree, node: Node) -> bool {
        match tree.xot().value(node) {
            Value::Comment(_) => self.rules.drop_comments,
            Value::ProcessingInstruction(_) => self.rules.drop_processing_instructions,
            Value::Text(text) => {
                self.rules.strip_whitespace_text
                    && is_xml_whitespace(text.get())
                    && !tree.space_preserved(node)
            }
            _ => false,
        }
    }
}

fn is_xml_whitespace(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
}
