use crate::constants::{
    DEFAULT_APP_BASE_URL, DEFAULT_LISTEN_ADDR, FACEBOOK_API_VERSION, FACEBOOK_BASE_URL,
    FACEBOOK_DIALOG_URL, OAUTH_CALLBACK_PATH, REQUEST_TIMEOUT_SECS,
};
use crate::crypto::{CipherError, TokenCipher};
use dotenv::dotenv;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug)]
pub struct Config {
    pub facebook: FacebookConfig,
    pub app_base_url: String,
    pub listen_addr: SocketAddr,
    /// `None` runs on the in-memory store.
    pub database: Option<DatabaseConfig>,
}

pub struct FacebookConfig {
    pub app_id: String,
    pub app_secret: String,
    pub api_version: String,
    pub graph_url: String,
    pub redirect_uri: String,
    /// Upper bound on a single Graph API request, retries not included.
    pub request_timeout: Duration,
}

impl FacebookConfig {
    /// Graph API root including the version segment.
    pub fn graph_base_url(&self) -> String {
        format!("{}/{}", self.graph_url.trim_end_matches('/'), self.api_version)
    }

    pub fn dialog_base_url(&self) -> String {
        format!("{}/{}", FACEBOOK_DIALOG_URL, self.api_version)
    }
}

impl fmt::Debug for FacebookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacebookConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &"***")
            .field("api_version", &self.api_version)
            .field("graph_url", &self.graph_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub accept_invalid_certs: bool,
    pub cipher: TokenCipher,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    MissingEnv(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("Invalid FB_TOKEN_ENCRYPTION_KEY: {0}")]
    InvalidEncryptionKey(#[from] CipherError),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &str| get(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()));

        let app_base_url = get("APP_BASE_URL").unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string());
        let app_base_url = app_base_url.trim_end_matches('/').to_string();
        parse_url("APP_BASE_URL", &app_base_url)?;

        let redirect_uri = get("FACEBOOK_OAUTH_REDIRECT_URI")
            .unwrap_or_else(|| format!("{}{}", app_base_url, OAUTH_CALLBACK_PATH));
        parse_url("FACEBOOK_OAUTH_REDIRECT_URI", &redirect_uri)?;

        let graph_url = get("FACEBOOK_GRAPH_URL").unwrap_or_else(|| FACEBOOK_BASE_URL.to_string());
        parse_url("FACEBOOK_GRAPH_URL", &graph_url)?;

        let facebook = FacebookConfig {
            app_id: require("FACEBOOK_APP_ID")?,
            app_secret: require("FACEBOOK_APP_SECRET")?,
            api_version: get("FACEBOOK_API_VERSION")
                .unwrap_or_else(|| FACEBOOK_API_VERSION.to_string()),
            graph_url,
            redirect_uri,
            request_timeout: Duration::from_secs(parse_secs(
                "FACEBOOK_REQUEST_TIMEOUT_SECS",
                get("FACEBOOK_REQUEST_TIMEOUT_SECS"),
                REQUEST_TIMEOUT_SECS,
            )?),
        };

        let listen_addr = get("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                name: "LISTEN_ADDR".to_string(),
                message: e.to_string(),
            })?;

        let database = match get("DATABASE_URL") {
            Some(url) => {
                // Validate the URL format
                Url::parse(&url).map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;
                let key = require("FB_TOKEN_ENCRYPTION_KEY")?;
                Some(DatabaseConfig {
                    url,
                    accept_invalid_certs: parse_bool(
                        "DATABASE_ACCEPT_INVALID_CERTS",
                        get("DATABASE_ACCEPT_INVALID_CERTS"),
                    )?,
                    cipher: TokenCipher::from_base64(&key)?,
                })
            }
            None => None,
        };

        Ok(Self {
            facebook,
            app_base_url,
            listen_addr,
            database,
        })
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn parse_secs(name: &str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("expected a positive number of seconds, got {}", raw),
            }),
        },
    }
}

fn parse_bool(name: &str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some("0" | "false" | "no") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("expected a boolean, got {}", other),
        }),
    }
}
