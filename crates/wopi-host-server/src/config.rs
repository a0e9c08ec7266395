//! Configuration management for the WOPI host server

use anyhow::{Context, Result};
use serde::Deserialize;
use std::str::FromStr;

/// Longest lock lifetime accepted from configuration (one day)
const MAX_LOCK_TTL_SECS: u64 = 24 * 60 * 60;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 5001)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the documents (default: ./documents)
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,

    /// Extension of stored documents (default: docx)
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Lock lifetime in seconds (default: 1800)
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Interval for dropping idle lock slots; 0 disables the task
    #[serde(default)]
    pub lock_prune_interval_secs: u64,

    /// Access tokens as `token:user_id[:ro]`
    #[serde(default)]
    pub access_tokens: Vec<String>,

    /// Accept requests without a known token as the demo user.
    /// Defaults to true only when no tokens are configured.
    pub allow_anonymous: Option<bool>,

    /// `OwnerId` reported in CheckFileInfo (default: wopi-server)
    #[serde(default = "default_owner_id")]
    pub owner_id: String,

    /// `PostMessageOrigin` reported in CheckFileInfo (default: *)
    #[serde(default = "default_post_message_origin")]
    pub post_message_origin: String,

    /// CORS allowed origins (comma-separated). If empty, any origin is allowed.
    pub cors_allowed_origins: Option<String>,

    /// Retry a storage call once on a transient I/O error (default: false)
    #[serde(default)]
    pub retry_transient_io: bool,

    /// Maximum PutFile body size in bytes (default: 100 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Log output format (default: text)
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_documents_dir() -> String {
    "./documents".to_string()
}

fn default_file_extension() -> String {
    "docx".to_string()
}

fn default_lock_ttl_secs() -> u64 {
    wopi_host::lock::DEFAULT_LOCK_TTL_SECS.unsigned_abs()
}

fn default_owner_id() -> String {
    "wopi-server".to_string()
}

fn default_post_message_origin() -> String {
    "*".to_string()
}

fn default_max_upload_bytes() -> usize {
    wopi_host::routes::DEFAULT_MAX_UPLOAD_BYTES
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", key, raw, e)),
        Err(_) => Ok(None),
    }
}

fn parse_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|s| {
        let s = s.trim();
        s.eq_ignore_ascii_case("true") || s == "1"
    })
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("WOPI_HOST").unwrap_or_else(|_| default_host());
        let port = parse_env("WOPI_PORT")?.unwrap_or_else(default_port);
        let documents_dir =
            std::env::var("WOPI_DOCUMENTS_DIR").unwrap_or_else(|_| default_documents_dir());
        let file_extension =
            std::env::var("WOPI_FILE_EXTENSION").unwrap_or_else(|_| default_file_extension());
        let lock_ttl_secs = parse_env("WOPI_LOCK_TTL_SECS")?.unwrap_or_else(default_lock_ttl_secs);
        let lock_prune_interval_secs =
            parse_env("WOPI_LOCK_PRUNE_INTERVAL_SECS")?.unwrap_or_default();
        let access_tokens: Vec<String> = std::env::var("WOPI_ACCESS_TOKENS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let allow_anonymous = parse_bool("WOPI_ALLOW_ANONYMOUS");
        let owner_id = std::env::var("WOPI_OWNER_ID").unwrap_or_else(|_| default_owner_id());
        let post_message_origin = std::env::var("WOPI_POST_MESSAGE_ORIGIN")
            .unwrap_or_else(|_| default_post_message_origin());
        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();
        let retry_transient_io = parse_bool("WOPI_RETRY_TRANSIENT_IO").unwrap_or(false);
        let max_upload_bytes =
            parse_env("WOPI_MAX_UPLOAD_BYTES")?.unwrap_or_else(default_max_upload_bytes);
        let log_format = parse_env("LOG_FORMAT")?.unwrap_or_default();

        let config = Self {
            host,
            port,
            documents_dir,
            file_extension,
            lock_ttl_secs,
            lock_prune_interval_secs,
            access_tokens,
            allow_anonymous,
            owner_id,
            post_message_origin,
            cors_allowed_origins,
            retry_transient_io,
            max_upload_bytes,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the host misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_secs == 0 || self.lock_ttl_secs > MAX_LOCK_TTL_SECS {
            anyhow::bail!(
                "lock_ttl_secs must be between 1 and {}, got {}",
                MAX_LOCK_TTL_SECS,
                self.lock_ttl_secs
            );
        }
        if self.file_extension.is_empty() || self.file_extension.contains(['/', '\\', '.']) {
            anyhow::bail!("Invalid file_extension '{}'", self.file_extension);
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be greater than zero");
        }
        wopi_host::StaticTokenValidator::from_entries(&self.access_tokens)
            .context("Invalid access_tokens")?;
        Ok(())
    }

    /// Whether unknown or missing tokens map to the demo user
    pub fn anonymous_enabled(&self) -> bool {
        self.allow_anonymous
            .unwrap_or(self.access_tokens.is_empty())
    }

    /// Parsed CORS allow-list, empty when any origin is allowed
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            documents_dir: default_documents_dir(),
            file_extension: default_file_extension(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_prune_interval_secs: 0,
            access_tokens: Vec::new(),
            allow_anonymous: None,
            owner_id: default_owner_id(),
            post_message_origin: default_post_message_origin(),
            cors_allowed_origins: None,
            retry_transient_io: false,
            max_upload_bytes: default_max_upload_bytes(),
            log_format: LogFormat::default(),
        }
    }
}
