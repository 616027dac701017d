use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use schemadoc::cache::DiskCache;
use schemadoc::cli::{Cli, Command, VerbosityLevel};
use schemadoc::config::{Config, ConfigManager};
use schemadoc::{Directives, DocumentError, DocumentStore, ErrorKind, Output, SchemaLocator, Validator};

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = match ConfigManager::load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(3);
        }
    };

    let verbosity = VerbosityLevel::from_flags(config.output.verbose, config.output.quiet);
    init_tracing(verbosity);

    let output = Output::new(config.output.format.into(), verbosity);
    match run(&cli, &config, &output) {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<DocumentError>() {
            Some(error) => {
                print!("{}", output.format_error(error));
                ExitCode::from(exit_code(error.kind()))
            }
            None => {
                eprintln!("error: {:#}", e);
                ExitCode::from(3)
            }
        },
    }
}

fn init_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// 1 for document problems, 2 for I/O, 3 for everything else
fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Parse | ErrorKind::Validation | ErrorKind::Query | ErrorKind::Directive => 1,
        ErrorKind::Io => 2,
        ErrorKind::Internal => 3,
    }
}

fn run(cli: &Cli, config: &Config, output: &Output) -> Result<ExitCode> {
    debug!(version = %config.schema.version, catalog = %config.schema.catalog_url, "configuration loaded");

    if let Command::CacheClear { expired } = cli.command {
        return clear_cache(config, expired, output);
    }

    let locator = Arc::new(SchemaLocator::from_config(config)?);
    SchemaLocator::install_global(locator.clone());
    let validator = Arc::new(Validator::new(locator));

    let store = |file: &std::path::Path| {
        DocumentStore::new(file)
            .with_validator(validator.clone())
            .with_schema_config(config.schema.clone())
    };

    match &cli.command {
        Command::Bootstrap { file, schema } => {
            store(file).bootstrap(schema)?;
        }
        Command::Cat { file } => {
            print!("{}", store(file).as_text()?);
        }
        Command::Query { file, expr, nodes } => {
            let store = store(file);
            if *nodes {
                print!("{}", output.format_fragments(&store.query_nodes(expr)?));
            } else {
                print!("{}", output.format_values(&store.query(expr)?));
            }
        }
        Command::Modify { file, directives } => {
            let directives = Directives::from_json(&read_directives(directives)?)?;
            let outcome = store(file).modify(&directives)?;
            print!("{}", output.format_modify(outcome));
        }
        Command::CacheClear { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn clear_cache(config: &Config, expired_only: bool, output: &Output) -> Result<ExitCode> {
    let cache = DiskCache::new(
        config.cache.directory.clone(),
        ConfigManager::get_cache_ttl_duration(config),
    );

    if expired_only {
        let cleanup = cache.cleanup_expired();
        for error in &cleanup.errors {
            warn!("{}", error);
        }
        print!("{}", output.format_cleanup(&cleanup));
        return Ok(if cleanup.errors.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        });
    }

    let stats = cache.stats();
    cache
        .clear()
        .with_context(|| format!("clearing {}", cache.directory().display()))?;
    print!("{}", output.format_cache_cleared(cache.directory(), &stats));
    Ok(ExitCode::SUCCESS)
}

fn read_directives(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading directives from standard input")?;
        Ok(text)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading {}", source))
    }
}
