use std::env;
use std::fmt;
use std::time::Duration;

use tracing::info;
use url::Url;

use crate::error::{FalkorError, Result};

pub const DEFAULT_URL: &str = "falkor://127.0.0.1:6379";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Everything needed to open a [`crate::Session`].
#[derive(Clone, PartialEq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            tls: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Parse `falkor://[user[:password]@]host[:port]`.
    ///
    /// `redis://` is accepted as an alias; `falkors://` and `rediss://` turn on TLS.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| FalkorError::Config(format!("invalid URL {raw:?}: {e}")))?;

        let tls = match url.scheme() {
            "falkor" | "redis" => false,
            "falkors" | "rediss" => true,
            other => {
                return Err(FalkorError::Config(format!(
                    "unsupported scheme {other:?} (expected falkor, falkors, redis or rediss)"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FalkorError::Config(format!("URL {raw:?} has no host")))?;
        // IPv6 hosts come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        let username = match url.username() {
            "" => None,
            user => Some(percent_decode(user)?),
        };
        let password = url.password().map(percent_decode).transpose()?;

        Ok(Self {
            port: url.port().unwrap_or(DEFAULT_PORT),
            username,
            password,
            tls,
            ..Self::new(host, DEFAULT_PORT)
        })
    }

    /// Load from `FALKORDB_URL` (default [`DEFAULT_URL`]) and
    /// `FALKORDB_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let url = env::var("FALKORDB_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let mut config = Self::from_url(&url)?;

        if let Ok(secs) = env::var("FALKORDB_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                FalkorError::Config(format!(
                    "FALKORDB_CONNECT_TIMEOUT_SECS must be a number, got {secs:?}"
                ))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_credentials(mut self, username: Option<&str>, password: &str) -> Self {
        self.username = username.map(String::from);
        self.password = Some(password.to_string());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log the effective settings with the password masked.
    pub fn log_redacted(&self) {
        info!(
            host = %self.host,
            port = self.port,
            username = self.username.as_deref().unwrap_or("-"),
            password = if self.password.is_some() { "****" } else { "-" },
            tls = self.tls,
            connect_timeout_secs = self.connect_timeout.as_secs(),
            "FalkorDB connection config"
        );
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("tls", &self.tls)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

fn percent_decode(raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| FalkorError::Config(format!("credentials are not valid UTF-8: {e}")))
}
