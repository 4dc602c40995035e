use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub opensearch: OpenSearchConfig,
    pub engine: EngineConfig,
    pub smtp: SmtpConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LOOKOUT_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LOOKOUT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            opensearch: OpenSearchConfig::from_env_profiled(p),
            engine: EngineConfig::from_env_profiled(p),
            smtp: SmtpConfig::from_env_profiled(p),
        }
    }

    /// Load the YAML config file format (`es_host`, `es_port`, `run_every`, ...).
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: FileConfig = serde_yaml::from_str(yaml)?;
        Ok(file.into())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Resolve duration strings once. Any unparsable duration is an error.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let run_every = duration_setting("run_every", &self.engine.run_every)?;
        if run_every.is_zero() {
            return Err(ConfigError::Invalid("run_every must be greater than zero".to_string()));
        }
        Ok(EngineSettings {
            run_every,
            buffer_time: duration_setting("buffer_time", &self.engine.buffer_time)?,
            query_timeout: duration_setting("query_timeout", &self.engine.query_timeout)?,
            max_hits: self.engine.max_hits,
        })
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  opensearch:  url={}, user={}, verify_certs={}",
            self.opensearch.base_url(),
            self.opensearch.username.as_deref().unwrap_or("(none)"),
            self.opensearch.verify_certs
        );
        tracing::info!(
            "  engine:      run_every={}, buffer_time={}, query_timeout={}, max_hits={}, rules_dir={}",
            self.engine.run_every,
            self.engine.buffer_time,
            self.engine.query_timeout,
            self.engine.max_hits,
            self.engine.rules_dir.display()
        );
        tracing::info!(
            "  smtp:        host={}",
            self.smtp.host.as_deref().unwrap_or("(none)")
        );
    }
}

fn duration_setting(key: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Durations resolved from [`EngineConfig`] at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub run_every: Duration,
    pub buffer_time: Duration,
    pub query_timeout: Duration,
    pub max_hits: usize,
}

// ── OpenSearch / Elasticsearch ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSearchConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_ssl: bool,
    /// When false, invalid or self-signed certificates are accepted.
    pub verify_certs: bool,
}

impl OpenSearchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "OPENSEARCH_HOST", "localhost"),
            port: profiled_env_u16(p, "OPENSEARCH_PORT", 9200),
            username: profiled_env_opt(p, "OPENSEARCH_USERNAME"),
            password: profiled_env_opt(p, "OPENSEARCH_PASSWORD"),
            use_ssl: profiled_env_bool(p, "OPENSEARCH_USE_SSL", true),
            verify_certs: profiled_env_bool(p, "OPENSEARCH_VERIFY_CERTS", true),
        }
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Polling interval between cycles.
    pub run_every: String,
    /// Indexing lag allowance for metric aggregation windows.
    pub buffer_time: String,
    /// Deadline for a single backend query.
    pub query_timeout: String,
    /// Maximum hits requested per query.
    pub max_hits: usize,
    pub rules_dir: PathBuf,
    /// Accepted for compatibility with existing config files; unused.
    pub writeback_index: Option<String>,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            run_every: profiled_env_or(p, "RUN_EVERY", DEFAULT_RUN_EVERY),
            buffer_time: profiled_env_or(p, "BUFFER_TIME", DEFAULT_BUFFER_TIME),
            query_timeout: profiled_env_or(p, "QUERY_TIMEOUT", DEFAULT_QUERY_TIMEOUT),
            max_hits: profiled_env_usize(p, "MAX_HITS", DEFAULT_MAX_HITS),
            rules_dir: PathBuf::from(profiled_env_or(p, "RULES_DIR", DEFAULT_RULES_DIR)),
            writeback_index: profiled_env_opt(p, "WRITEBACK_INDEX"),
        }
    }
}

const DEFAULT_RUN_EVERY: &str = "1m";
const DEFAULT_BUFFER_TIME: &str = "15m";
const DEFAULT_QUERY_TIMEOUT: &str = "30s";
const DEFAULT_MAX_HITS: usize = 1000;
const DEFAULT_RULES_DIR: &str = "rules";

// ── SMTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub from: Option<String>,
    pub tls: Option<bool>,
}

impl SmtpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_opt(p, "SMTP_HOST"),
            port: profiled_env_opt(p, "SMTP_PORT").and_then(|v| v.parse().ok()),
            from: profiled_env_opt(p, "SMTP_FROM"),
            tls: profiled_env_opt(p, "SMTP_TLS").map(|v| v == "true"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.host.is_some() && self.from.is_some()
    }
}

// ── YAML file format ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default = "default_es_host")]
    es_host: String,
    #[serde(default = "default_es_port")]
    es_port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_true")]
    use_ssl: bool,
    #[serde(default = "default_true")]
    verify_certs: bool,
    #[serde(default = "default_run_every")]
    run_every: String,
    #[serde(default = "default_buffer_time")]
    buffer_time: String,
    #[serde(default = "default_query_timeout")]
    query_timeout: String,
    #[serde(default = "default_max_hits")]
    max_hits: usize,
    #[serde(default = "default_rules_dir")]
    rules_dir: PathBuf,
    #[serde(default)]
    writeback_index: Option<String>,
    #[serde(default)]
    smtp_host: Option<String>,
    #[serde(default)]
    smtp_port: Option<u16>,
    #[serde(default)]
    smtp_from: Option<String>,
    #[serde(default)]
    smtp_tls: Option<bool>,
}

fn default_es_host() -> String {
    "localhost".to_string()
}
fn default_es_port() -> u16 {
    9200
}
fn default_true() -> bool {
    true
}
fn default_run_every() -> String {
    DEFAULT_RUN_EVERY.to_string()
}
fn default_buffer_time() -> String {
    DEFAULT_BUFFER_TIME.to_string()
}
fn default_query_timeout() -> String {
    DEFAULT_QUERY_TIMEOUT.to_string()
}
fn default_max_hits() -> usize {
    DEFAULT_MAX_HITS
}
fn default_rules_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RULES_DIR)
}

impl From<FileConfig> for Config {
    fn from(f: FileConfig) -> Self {
        Self {
            profile: String::new(),
            opensearch: OpenSearchConfig {
                host: f.es_host,
                port: f.es_port,
                username: f.username,
                password: f.password,
                use_ssl: f.use_ssl,
                verify_certs: f.verify_certs,
            },
            engine: EngineConfig {
                run_every: f.run_every,
                buffer_time: f.buffer_time,
                query_timeout: f.query_timeout,
                max_hits: f.max_hits,
                rules_dir: f.rules_dir,
                writeback_index: f.writeback_index,
            },
            smtp: SmtpConfig {
                host: f.smtp_host,
                port: f.smtp_port,
                from: f.smtp_from,
                tls: f.smtp_tls,
            },
        }
    }
}
