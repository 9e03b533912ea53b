//! Client configuration.
//!
//! [`ChatConfig`] tunes the chat session; [`RestStoreConfig`] points the REST
//! backend at a database and is usually loaded from the environment.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default timeout for a single store call (10 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default TCP connect timeout for the REST backend (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default capacity of the session event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default capacity of the session command queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default maximum image attachment size (10 MiB).
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Environment variable holding the database base URL.
pub const DATABASE_URL_ENV: &str = "CLOUDCHAT_DATABASE_URL";

/// Environment variable holding the database auth token.
pub const AUTH_TOKEN_ENV: &str = "CLOUDCHAT_AUTH_TOKEN";

/// Chat session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Upper bound on every remote call made by the session.
    pub request_timeout: Duration,
    /// Buffered events per subscriber before the slowest one lags.
    pub event_capacity: usize,
    /// Pending commands accepted by a spawned session.
    pub command_capacity: usize,
    /// Largest image the composer accepts, in bytes.
    pub max_image_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

impl ChatConfig {
    /// Override the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Where the REST backend connects, and how it authenticates.
#[derive(Clone)]
pub struct RestStoreConfig {
    /// Base URL, e.g. `https://example-default-rtdb.firebaseio.com`.
    pub database_url: String,
    /// Token sent as the `auth` query parameter.
    pub auth_token: Option<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl RestStoreConfig {
    /// Config for `database_url` without authentication.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth_token: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Attach an auth token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup(DATABASE_URL_ENV)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig(format!("{} is not set", DATABASE_URL_ENV)))?;

        let mut config = Self::new(database_url.trim());
        config.auth_token = lookup(AUTH_TOKEN_ENV).filter(|token| !token.is_empty());
        config.validate()?;
        Ok(config)
    }

    /// Check the URL scheme.
    pub fn validate(&self) -> Result<()> {
        if !(self.database_url.starts_with("https://") || self.database_url.starts_with("http://"))
        {
            return Err(Error::InvalidConfig(format!(
                "database URL must be http(s): {}",
                self.database_url
            )));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.database_url.trim_end_matches('/')
    }
}

impl fmt::Debug for RestStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestStoreConfig")
            .field("database_url", &self.database_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
