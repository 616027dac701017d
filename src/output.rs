//! Output formatting for the command line
//!
//! Everything the binary prints to stdout goes through [`Output`], in either a
//! human-readable or a JSON rendering.

use std::io::IsTerminal;
use std::path::Path;

use serde_json::json;

use crate::cache::{CacheStats, CleanupStats};
use crate::cli::{OutputFormat, VerbosityLevel};
use crate::error::{DocumentError, ErrorKind};
use crate::fragment::XmlFragment;
use crate::store::ModifyOutcome;

pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: format == OutputFormat::Human && std::io::stdout().is_terminal(),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    /// One line per value
    pub fn format_values(&self, values: &[String]) -> String {
        match self.format {
            OutputFormat::Json => json!(values).to_string(),
            OutputFormat::Human => values.iter().map(|v| format!("{}\n", v)).collect(),
        }
    }

    pub fn format_fragments(&self, fragments: &[XmlFragment]) -> String {
        match self.format {
            OutputFormat::Json => {
                json!(fragments.iter().map(XmlFragment::to_xml).collect::<Vec<_>>()).to_string()
            }
            OutputFormat::Human => fragments.iter().map(|f| format!("{}\n", f)).collect(),
        }
    }

    pub fn format_modify(&self, outcome: ModifyOutcome) -> String {
        match self.format {
            OutputFormat::Json => json!({ "outcome": outcome }).to_string(),
            OutputFormat::Human if self.verbosity == VerbosityLevel::Quiet => String::new(),
            OutputFormat::Human => match outcome {
                ModifyOutcome::Written => "document updated\n".to_string(),
                ModifyOutcome::Unchanged => "document unchanged\n".to_string(),
            },
        }
    }

    pub fn format_error(&self, error: &DocumentError) -> String {
        match self.format {
            OutputFormat::Json => json!({
                "error": kind_name(error.kind()),
                "message": error.to_string(),
                "violations": error.violations(),
            })
            .to_string(),
            OutputFormat::Human => {
                let mut output = format!("{} {}\n", self.colorize("error:", "31"), error);
                for violation in error.violations() {
                    output.push_str(&format!("    {}\n", violation));
                }
                output
            }
        }
    }

    pub fn format_cache_cleared(&self, directory: &Path, stats: &CacheStats) -> String {
        match self.format {
            OutputFormat::Json => json!({
                "directory": directory.display().to_string(),
                "removed_entries": stats.entry_count,
                "freed_bytes": stats.total_size,
            })
            .to_string(),
            OutputFormat::Human if self.verbosity == VerbosityLevel::Quiet => String::new(),
            OutputFormat::Human => format!(
                "cleared {} ({} entries, {} bytes)\n",
                directory.display(),
                stats.entry_count,
                stats.total_size
            ),
        }
    }

    pub fn format_cleanup(&self, cleanup: &CleanupStats) -> String {
        match self.format {
            OutputFormat::Json => json!({
                "expired_entries": cleanup.expired_entries,
                "removed_entries": cleanup.removed_entries,
                "freed_bytes": cleanup.freed_bytes,
                "errors": cleanup.errors,
            })
            .to_string(),
            OutputFormat::Human if self.verbosity == VerbosityLevel::Quiet => String::new(),
            OutputFormat::Human => format!(
                "removed {} of {} expired entries ({} bytes)\n",
                cleanup.removed_entries, cleanup.expired_entries, cleanup.freed_bytes
            ),
        }
    }
}

fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Io => "io",
        ErrorKind::Parse => "parse",
        ErrorKind::Validation => "validation",
        ErrorKind::Query => "query",
        ErrorKind::Directive => "directive",
        ErrorKind::Internal => "internal",
    }
}
