use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{Cli, OutputFormat};
use crate::error::{ConfigError, ConfigResult as Result};

/// Schema version selected when nothing else is configured
pub const DEFAULT_SCHEMA_VERSION: &str = "0.23";

/// Catalog prefix under which versioned schemas are published
pub const DEFAULT_CATALOG_URL: &str = "https://raw.githubusercontent.com/zerocracy/datum";

const CONFIG_NAMES: [&str; 4] = [
    "schemadoc.toml",
    "schemadoc.json",
    ".schemadoc.toml",
    ".schemadoc.json",
];

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub schema: SchemaConfig,
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub output: OutputConfig,
}

/// Which schema catalog version documents are bound to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    pub version: String,
    pub catalog_url: String,
}

impl SchemaConfig {
    /// `<catalog>/<version>/xsd/<schema_name>.xsd`
    pub fn uri_for(&self, schema_name: &str) -> String {
        format!(
            "{}/{}/xsd/{}.xsd",
            self.catalog_url.trim_end_matches('/'),
            self.version,
            schema_name
        )
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_SCHEMA_VERSION.to_string(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
        }
    }
}

/// Persistent schema cache. The in-memory tier is always on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Time-to-live for cached schemas in hours
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("schemadoc"),
            ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NetworkConfig {
    /// Fetch timeout in seconds; unset blocks until the server answers
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormatConfig,
    pub verbose: bool,
    pub quiet: bool,
}

/// Serializable counterpart of the CLI [`OutputFormat`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
        }
    }
}

/// Loads and merges configuration layers
pub struct ConfigManager;

impl ConfigManager {
    /// defaults -> file -> environment -> CLI
    pub fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli)
    }

    pub fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let config = match &cli.config {
            Some(path) => Self::load_from_file(path)?,
            None => Self::find_config_file()?.unwrap_or_default(),
        };

        let config = Self::apply_environment_overrides_with(env, config)?;
        let config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// TOML or JSON, chosen by extension. Missing sections keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Looks in the working directory, then the user config directory
    pub fn find_config_file() -> Result<Option<Config>> {
        let user_dir = dirs::config_dir().map(|dir| dir.join("schemadoc"));
        Self::find_config_in(std::iter::once(PathBuf::from(".")).chain(user_dir))
    }

    fn find_config_in(dirs: impl IntoIterator<Item = PathBuf>) -> Result<Option<Config>> {
        for dir in dirs {
            for name in CONFIG_NAMES {
                let path = dir.join(name);
                if path.is_file() {
                    return Self::load_from_file(&path).map(Some);
                }
            }
        }
        Ok(None)
    }

    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(version) = env.get("SCHEMADOC_VERSION") {
            config.schema.version = version;
        }
        if let Some(catalog) = env.get("SCHEMADOC_CATALOG_URL") {
            config.schema.catalog_url = catalog;
        }

        if let Some(cache_dir) = env.get("SCHEMADOC_CACHE_DIR") {
            config.cache.directory = PathBuf::from(cache_dir);
        }
        if let Some(ttl) = env.get("SCHEMADOC_CACHE_TTL") {
            config.cache.ttl_hours = parse_env("SCHEMADOC_CACHE_TTL", &ttl)?;
        }

        if let Some(timeout) = env.get("SCHEMADOC_TIMEOUT") {
            config.network.timeout_seconds = Some(parse_env("SCHEMADOC_TIMEOUT", &timeout)?);
        }

        if let Some(verbose) = env.get("SCHEMADOC_VERBOSE") {
            config.output.verbose = parse_env("SCHEMADOC_VERBOSE", &verbose)?;
        }
        if let Some(quiet) = env.get("SCHEMADOC_QUIET") {
            config.output.quiet = parse_env("SCHEMADOC_QUIET", &quiet)?;
        }
        if let Some(format) = env.get("SCHEMADOC_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid SCHEMADOC_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// CLI flags win over everything else
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(version) = &cli.schema_version {
            config.schema.version = version.clone();
        }
        if let Some(catalog) = &cli.catalog_url {
            config.schema.catalog_url = catalog.clone();
        }

        if let Some(cache_dir) = &cli.cache_dir {
            config.cache.directory = cache_dir.clone();
        }
        if cli.no_cache {
            config.cache.enabled = false;
        }

        if cli.timeout.is_some() {
            config.network.timeout_seconds = cli.timeout;
        }

        if let Some(format) = cli.format {
            config.output.format = format.into();
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        config
    }

    pub fn validate_config(config: &Config) -> Result<()> {
        let version = config.schema.version.trim();
        if version.is_empty() {
            return Err(ConfigError::Validation(
                "Schema version must not be empty".to_string(),
            ));
        }
        if version.contains('/') || version.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid schema version: {}",
                config.schema.version
            )));
        }

        let catalog = &config.schema.catalog_url;
        if !(catalog.starts_with("http://")
            || catalog.starts_with("https://")
            || catalog.starts_with("file://"))
        {
            return Err(ConfigError::Validation(format!(
                "Catalog URL must be an http(s) or file URL: {}",
                catalog
            )));
        }

        if config.cache.ttl_hours == 0 {
            return Err(ConfigError::Validation(
                "Cache TTL must be greater than 0".to_string(),
            ));
        }

        if config.network.timeout_seconds == Some(0) {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        Ok(())
    }

    pub fn get_cache_ttl_duration(config: &Config) -> Duration {
        Duration::from_secs(config.cache.ttl_hours * 3600)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}
