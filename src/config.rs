//! TOML configuration parsing.
//!
//! Settings live in a TOML file (default `./config/research.toml`). Secrets
//! never go in the file: the Gemini API key, the session-signing secret and an
//! optional database URL override are read from the environment.
//!
//! ```toml
//! [db]
//! path = "./data/research.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:5000"
//!
//! [llm]
//! provider = "gemini"
//! model = "gemini-2.5-flash"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the Gemini API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Environment variable holding the cookie-signing secret.
pub const SESSION_SECRET_ENV: &str = "SESSION_SECRET";
/// Environment variable overriding `[db].path` (`sqlite:<path>` or a bare path).
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    /// Populated from the environment by [`load_config`], never from TOML.
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// How many recent summaries the landing page lists.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: i64,
}

fn default_recent_limit() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Lets the fetcher reach loopback/private addresses. Local development only.
    #[serde(default)]
    pub allow_private_networks: bool,
    /// Hosts (names or IP literals) exempt from the public-address check.
    /// Redirect targets are still checked on their own host.
    #[serde(default)]
    pub trusted_hosts: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            max_body_bytes: default_max_body_bytes(),
            allow_private_networks: false,
            trusted_hosts: Vec::new(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    10
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}
fn default_max_redirects() -> usize {
    5
}
fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}

/// Character caps and thresholds applied by the extraction and
/// aggregation pipeline. All lengths count Unicode scalar values.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
    #[serde(default = "default_per_source_chars")]
    pub per_source_chars: usize,
    #[serde(default = "default_aggregate_chars")]
    pub aggregate_chars: usize,
    #[serde(default = "default_feed_entries_per_refresh")]
    pub feed_entries_per_refresh: usize,
    #[serde(default = "default_digest_entries")]
    pub digest_entries: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_content_chars: default_min_content_chars(),
            per_source_chars: default_per_source_chars(),
            aggregate_chars: default_aggregate_chars(),
            feed_entries_per_refresh: default_feed_entries_per_refresh(),
            digest_entries: default_digest_entries(),
        }
    }
}

fn default_min_content_chars() -> usize {
    100
}
fn default_per_source_chars() -> usize {
    5000
}
fn default_aggregate_chars() -> usize {
    15000
}
fn default_feed_entries_per_refresh() -> usize {
    10
}
fn default_digest_entries() -> i64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

/// Values read from the environment at load time.
#[derive(Clone, Default)]
pub struct Secrets {
    pub api_key: Option<String>,
    pub session_secret: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("session_secret", &self.session_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Returns the session secret or fails; the server must not start without one.
    pub fn require_session_secret(&self) -> Result<&str> {
        self.secrets
            .session_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "{} environment variable not set; refusing to start",
                    SESSION_SECRET_ENV
                )
            })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
        if !url.trim().is_empty() {
            config.db.path = database_path_from_url(&url)?;
        }
    }

    config.secrets = Secrets {
        api_key: std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
        session_secret: std::env::var(SESSION_SECRET_ENV).ok(),
    };

    Ok(config)
}

/// Parses and validates TOML without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.server.recent_limit < 1 {
        anyhow::bail!("server.recent_limit must be >= 1");
    }

    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("fetch.timeout_secs must be > 0");
    }

    let limits = &config.limits;
    if limits.per_source_chars == 0 || limits.aggregate_chars == 0 {
        anyhow::bail!("limits.per_source_chars and limits.aggregate_chars must be > 0");
    }
    if limits.min_content_chars > limits.per_source_chars {
        anyhow::bail!("limits.min_content_chars must not exceed limits.per_source_chars");
    }
    if limits.feed_entries_per_refresh == 0 {
        anyhow::bail!("limits.feed_entries_per_refresh must be > 0");
    }
    if limits.digest_entries < 1 {
        anyhow::bail!("limits.digest_entries must be >= 1");
    }

    match config.llm.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    Ok(config)
}

/// Accepts `sqlite:path`, `sqlite://path` or a bare filesystem path.
fn database_path_from_url(url: &str) -> Result<PathBuf> {
    let trimmed = url.trim();
    if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        if rest.is_empty() {
            anyhow::bail!("{} has an empty sqlite path", DATABASE_URL_ENV);
        }
        return Ok(PathBuf::from(rest));
    }
    if trimmed.contains("://") {
        anyhow::bail!("{} must be a sqlite: URL, got '{}'", DATABASE_URL_ENV, trimmed);
    }
    Ok(PathBuf::from(trimmed))
}
