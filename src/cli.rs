use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only errors
    Quiet,
    #[default]
    Normal,
    /// Debug logging
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Default `tracing` filter directive when `RUST_LOG` is unset
    pub fn log_filter(self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "schemadoc=debug,info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Schema-bound XML document store
#[derive(Parser, Debug, Clone)]
#[command(name = "schemadoc")]
#[command(about = "Read, query and modify schema-validated XML documents")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Schema catalog version documents are bound to
    #[arg(long = "schema-version", global = true)]
    pub schema_version: Option<String>,

    /// Catalog URL prefix
    #[arg(long = "catalog-url", global = true)]
    pub catalog_url: Option<String>,

    /// Persistent schema cache directory
    #[arg(long = "cache-dir", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the persistent schema cache
    #[arg(long = "no-cache", global = true)]
    pub no_cache: bool,

    /// Schema fetch timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[arg(long, value_enum, global = true)]
    pub format: Option<OutputFormat>,

    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the document or repair its schema binding
    Bootstrap {
        file: PathBuf,
        /// Schema name, e.g. `person` or `pm/claims`
        schema: String,
    },
    /// Print the raw document
    Cat { file: PathBuf },
    /// Evaluate a path expression against the validated document
    Query {
        file: PathBuf,
        expr: String,
        /// Print matched element subtrees instead of string values
        #[arg(long)]
        nodes: bool,
    },
    /// Apply a JSON list of directives (`-` reads standard input)
    Modify { file: PathBuf, directives: String },
    /// Empty the persistent schema cache
    CacheClear {
        /// Only remove entries whose TTL has passed
        #[arg(long)]
        expired: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
