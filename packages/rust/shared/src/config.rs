//! Application configuration for newscrawl.
//!
//! User config lives at `~/.newscrawl/newscrawl.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{NewsCrawlError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "newscrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".newscrawl";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "articles.db";

/// Default log directory name inside the config directory.
const LOG_DIR_NAME: &str = "logs";

/// Environment variable consulted when `[storage] database_path` is unset.
pub const DATABASE_ENV: &str = "NEWSCRAWL_DATABASE";

// ---------------------------------------------------------------------------
// Config structs (matching newscrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Document store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Part-of-speech tagging.
    #[serde(default)]
    pub tagging: TaggingConfig,

    /// Configured news sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Size of the fetch worker pool.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// Per-URL fetch timeout.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Per-upsert store timeout.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,

    /// How long in-flight fetches may drain after cancellation.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Delay before each fetch.
    #[serde(default)]
    pub rate_limit_ms: u64,

    /// User-Agent header for all requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Cancel a source run after this many seconds (0 = no deadline).
    #[serde(default)]
    pub run_deadline_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            fetch_timeout_secs: default_fetch_timeout(),
            store_timeout_secs: default_store_timeout(),
            grace_period_secs: default_grace_period(),
            rate_limit_ms: 0,
            user_agent: default_user_agent(),
            run_deadline_secs: 0,
        }
    }
}

fn default_max_workers() -> u32 {
    8
}
fn default_fetch_timeout() -> u64 {
    15
}
fn default_store_timeout() -> u64 {
    10
}
fn default_grace_period() -> u64 {
    5
}
fn default_user_agent() -> String {
    concat!("newscrawl/", env!("CARGO_PKG_VERSION")).into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Console level when `RUST_LOG` and `-v` are absent. `silent` disables
    /// console output; the log file is still written.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Level for the rolling log file. `off` disables the file.
    #[serde(default = "default_file_level")]
    pub file_level: String,

    /// Directory for log files. Defaults to `~/.newscrawl/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logdir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_level: default_file_level(),
            logdir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_file_level() -> String {
    "debug".into()
}

impl LoggingConfig {
    pub fn console_enabled(&self) -> bool {
        !self.level.eq_ignore_ascii_case("silent")
    }

    pub fn file_enabled(&self) -> bool {
        !self.file_level.eq_ignore_ascii_case("off")
    }

    /// Resolve the log directory (`~` expands to the home directory).
    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.logdir {
            Some(dir) => expand_home(dir),
            None => Ok(config_dir()?.join(LOG_DIR_NAME)),
        }
    }
}

/// `[tagging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Skip tagging when the estimated token count exceeds this.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Maximum number of tags stored per article.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tokens: default_max_tokens(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_tokens() -> usize {
    200_000
}
fn default_max_entries() -> usize {
    50_000
}

/// `[[sources]]` entry: one configured news origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Logical source name.
    pub name: String,
    /// Parser plugin identifier (resolved through the parser registry).
    pub parser: String,
    /// Listing page the parser discovers articles from.
    pub base_url: String,
    /// Target collection; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// URL path include globs (if non-empty, a URL must match one).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_patterns: Vec<String>,
    /// URL path exclude globs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
}

impl SourceConfig {
    /// The collection this source writes to.
    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }

    /// Parse and check `base_url`.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            NewsCrawlError::config(format!(
                "source '{}': invalid base_url '{}': {e}",
                self.name, self.base_url
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(NewsCrawlError::config(format!(
                "source '{}': base_url must be http(s), got '{}'",
                self.name,
                url.scheme()
            )));
        }
        Ok(url)
    }
}

impl AppConfig {
    /// Check the settings a run cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(NewsCrawlError::config(
                "no sources configured; add a [[sources]] entry",
            ));
        }
        if self.defaults.max_workers == 0 {
            return Err(NewsCrawlError::config("defaults.max_workers must be at least 1"));
        }
        if self.defaults.fetch_timeout_secs == 0 {
            return Err(NewsCrawlError::config(
                "defaults.fetch_timeout_secs must be at least 1",
            ));
        }
        if self.defaults.store_timeout_secs == 0 {
            return Err(NewsCrawlError::config(
                "defaults.store_timeout_secs must be at least 1",
            ));
        }

        let mut collections = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(NewsCrawlError::config("source with empty name"));
            }
            if source.parser.trim().is_empty() {
                return Err(NewsCrawlError::config(format!(
                    "source '{}': parser is required",
                    source.name
                )));
            }
            source.base_url()?;
            if !collections.insert(source.collection_name()) {
                return Err(NewsCrawlError::config(format!(
                    "collection '{}' is used by more than one source",
                    source.collection_name()
                )));
            }
        }
        Ok(())
    }

    /// Look up a source by name.
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Resolve the database path: config value, then `NEWSCRAWL_DATABASE`,
    /// then `~/.newscrawl/articles.db`.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.database_path {
            return expand_home(path);
        }
        if let Ok(path) = std::env::var(DATABASE_ENV) {
            if !path.is_empty() {
                return expand_home(&path);
            }
        }
        Ok(config_dir()?.join(DATABASE_FILE_NAME))
    }
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration: merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fetch worker pool size.
    pub max_workers: usize,
    /// Per-URL fetch timeout.
    pub fetch_timeout: Duration,
    /// Per-upsert timeout.
    pub store_timeout: Duration,
    /// Drain window after cancellation.
    pub grace_period: Duration,
    /// Delay before each fetch.
    pub rate_limit: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Optional run deadline.
    pub deadline: Option<Duration>,
    /// Tagging settings.
    pub tagging: TaggingConfig,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let d = &config.defaults;
        Self {
            max_workers: d.max_workers.max(1) as usize,
            fetch_timeout: Duration::from_secs(d.fetch_timeout_secs),
            store_timeout: Duration::from_secs(d.store_timeout_secs),
            grace_period: Duration::from_secs(d.grace_period_secs),
            rate_limit: Duration::from_millis(d.rate_limit_ms),
            user_agent: d.user_agent.clone(),
            deadline: (d.run_deadline_secs > 0).then(|| Duration::from_secs(d.run_deadline_secs)),
            tagging: config.tagging.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.newscrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NewsCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.newscrawl/newscrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NewsCrawlError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        NewsCrawlError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file with one
/// example source. Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NewsCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig {
        sources: vec![SourceConfig {
            name: "taz".into(),
            parser: "taz".into(),
            base_url: "https://taz.de/".into(),
            collection: None,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }],
        ..AppConfig::default()
    };
    let content =
        toml::to_string_pretty(&config).map_err(|e| NewsCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NewsCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| NewsCrawlError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, base_url: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            parser: "generic".into(),
            base_url: base_url.into(),
            collection: None,
            include_patterns: vec![],
            exclude_patterns: vec![],
        }
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_workers"));
        assert!(toml_str.contains("fetch_timeout_secs"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.max_workers, 8);
        assert_eq!(parsed.tagging.max_entries, 50_000);
    }

    #[test]
    fn config_with_sources() {
        let toml_str = r#"
[defaults]
max_workers = 4

[[sources]]
name = "taz"
parser = "taz"
base_url = "https://taz.de/"

[[sources]]
name = "blog"
parser = "generic"
base_url = "https://blog.example.com/news/"
collection = "blog_articles"
exclude_patterns = ["/tag/**"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].collection_name(), "taz");
        assert_eq!(config.sources[1].collection_name(), "blog_articles");
        assert_eq!(config.sources[1].exclude_patterns, vec!["/tag/**"]);
        config.validate().expect("valid config");
    }

    #[test]
    fn validate_rejects_missing_sources() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("no sources configured"));
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let config = AppConfig {
            sources: vec![source("broken", "not a url")],
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(NewsCrawlError::Config { .. })));

        let config = AppConfig {
            sources: vec![source("ftp", "ftp://example.com/")],
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn validate_rejects_duplicate_collections() {
        let config = AppConfig {
            sources: vec![
                source("a", "https://a.example.com/"),
                SourceConfig {
                    collection: Some("a".into()),
                    ..source("b", "https://b.example.com/")
                },
            ],
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than one source"));
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let mut app = AppConfig::default();
        app.defaults.run_deadline_secs = 60;
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.max_workers, 8);
        assert_eq!(pipeline.fetch_timeout, Duration::from_secs(15));
        assert_eq!(pipeline.deadline, Some(Duration::from_secs(60)));
        assert_eq!(PipelineConfig::default().deadline, None);
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = AppConfig {
            sources: vec![source("taz", "https://taz.de/")],
            ..AppConfig::default()
        };
        config.defaults.store_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store_timeout_secs"));

        config.defaults.store_timeout_secs = 10;
        config.defaults.fetch_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, NewsCrawlError::Config { .. }));
        assert!(err.to_string().contains("fetch_timeout_secs"));
    }

    #[test]
    fn logging_section_defaults_and_overrides() {
        let config: AppConfig = toml::from_str("").expect("parse");
        assert_eq!(config.logging.file_level, "debug");
        assert!(config.logging.console_enabled());
        assert!(config.logging.file_enabled());

        let config: AppConfig = toml::from_str(
            r#"
[logging]
level = "SILENT"
file_level = "off"
logdir = "/var/log/newscrawl"
"#,
        )
        .expect("parse");
        assert!(!config.logging.console_enabled());
        assert!(!config.logging.file_enabled());
        assert_eq!(
            config.logging.log_dir().unwrap(),
            PathBuf::from("/var/log/newscrawl")
        );
    }

    #[test]
    fn explicit_database_path_wins() {
        let mut config = AppConfig::default();
        config.storage.database_path = Some("/tmp/news/articles.db".into());
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/news/articles.db")
        );
    }
}
