use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::http_client::ClientSettings;
use crate::interceptor::InterceptorSettings;

/// Authenticated API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// HTTP method (get, post, put, patch, delete, jsonp)
    pub method: String,

    /// Request path, relative to the base URL
    pub path: String,

    /// JSON payload (query params for get, body otherwise)
    #[arg(long)]
    pub data: Option<String>,

    /// Global callback name for jsonp requests
    #[arg(long, default_value = "jsonp")]
    pub callback: String,

    /// Answer "yes" to re-login prompts instead of asking
    #[arg(short, long)]
    pub yes: bool,

    /// API base URL
    #[arg(short, long, env = "API_BASE_URL")]
    pub base_url: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "10")]
    pub timeout: u64,

    /// Allow cached GET responses (disables the cache-busting parameter)
    #[arg(long, env = "REQUEST_CACHE", default_value = "false")]
    pub request_cache: bool,

    /// Default language tag when the session has none
    #[arg(long, env = "APP_LANG", default_value = "zh-cn")]
    pub lang: String,

    /// Path to the SQLite session store (in-memory when unset)
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl CliArgs {
    /// Parsed `--data`; an empty object when absent
    pub fn payload(&self) -> Result<Value> {
        match self.data {
            Some(ref raw) => serde_json::from_str(raw).context("--data is not valid JSON"),
            None => Ok(json!({})),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    // Transport
    pub base_url: String,
    pub request_timeout: u64,
    pub connect_timeout: u64,

    // Request decoration
    pub request_cache: bool,
    pub default_lang: String,
    pub token_header: String,
    pub static_headers: BTreeMap<String, String>,

    // Session
    pub refresh_path: String,
    pub session_namespace: String,
    pub session_db_file: Option<PathBuf>,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load(args: &CliArgs) -> Result<Self> {
        let config = Config {
            base_url: args
                .base_url
                .clone()
                .or_else(|| std::env::var("API_BASE_URL").ok())
                .context("API_BASE_URL is required (use -b or set API_BASE_URL env var)")?,

            request_timeout: args.timeout,

            connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            request_cache: args.request_cache,

            default_lang: args.lang.clone(),

            token_header: std::env::var("TOKEN_HEADER_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Authorization".to_string()),

            static_headers: parse_static_headers(
                &std::env::var("STATIC_HEADERS").unwrap_or_default(),
            )?,

            refresh_path: std::env::var("REFRESH_TOKEN_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "auth/refresh".to_string()),

            session_namespace: std::env::var("SESSION_NAMESPACE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "app".to_string()),

            session_db_file: args
                .db_file
                .as_deref()
                .map(expand_tilde),

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.base_url))?;

        if self.request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    /// GET requests get a cache-busting parameter unless caching is allowed
    pub fn cache_bypass(&self) -> bool {
        !self.request_cache
    }

    /// Settings for the API client
    pub fn client_settings(&self) -> Result<ClientSettings> {
        Ok(ClientSettings {
            base_url: Url::parse(&self.base_url)
                .with_context(|| format!("Invalid base URL: {}", self.base_url))?,
            request_timeout: Duration::from_secs(self.request_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            refresh_path: self.refresh_path.clone(),
            interceptor: InterceptorSettings {
                token_header: self.token_header.clone(),
                cache_bypass: self.cache_bypass(),
                static_headers: self.static_headers.clone(),
            },
        })
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse static header overrides from a JSON object.
/// Non-string values are sent as their JSON text.
fn parse_static_headers(s: &str) -> Result<BTreeMap<String, String>> {
    if s.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: serde_json::Value =
        serde_json::from_str(s).context("STATIC_HEADERS is not valid JSON")?;
    let object = value
        .as_object()
        .context("STATIC_HEADERS must be a JSON object")?;

    Ok(object
        .iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect())
}
