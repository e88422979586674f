//! # Client Configuration
//!
//! Purpose: Describe where the store lives, which credential to present, and
//! how strict the transport should be.
//!
//! ## Notes
//! - The credential is presented once, as the `apiKey` query parameter of the
//!   WebSocket URL. It never appears in `Debug` output or logs.
//! - `TlsVerification::Disabled` must be chosen explicitly; nothing turns it on
//!   implicitly.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::client::{ClientError, ClientResult};

/// Environment variable holding the endpoint, e.g. `https://api.example.com`.
pub const ENV_BASE_URL: &str = "HPKV_BASE_URL";
/// Environment variable holding the credential.
pub const ENV_API_KEY: &str = "HPKV_API_KEY";
/// `1`/`true`/`yes` disables TLS peer verification.
pub const ENV_INSECURE_TLS: &str = "HPKV_INSECURE_TLS";
/// Per-request timeout in milliseconds.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "HPKV_REQUEST_TIMEOUT_MS";
/// Connect timeout in milliseconds.
pub const ENV_CONNECT_TIMEOUT_MS: &str = "HPKV_CONNECT_TIMEOUT_MS";

/// Whether the secure transport verifies the server's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVerification {
    /// Verify the certificate chain against the bundled webpki roots.
    #[default]
    Verify,
    /// Accept any certificate. Development only.
    Disabled,
}

/// Configuration for the persistent-connection client.
#[derive(Clone)]
pub struct ClientConfig {
    /// HTTP(S) or WS(S) endpoint of the store.
    pub base_url: String,
    /// Credential presented at connect time.
    pub api_key: String,
    /// TLS peer verification policy for `wss://` endpoints.
    pub tls: TlsVerification,
    /// Optional upper bound on how long a verb waits for its response.
    /// `None` waits until the response arrives or the connection closes.
    pub request_timeout: Option<Duration>,
    /// Optional upper bound on the transport handshake.
    pub connect_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Creates a configuration with verification on and no timeouts.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            tls: TlsVerification::Verify,
            request_timeout: None,
            connect_timeout: None,
        }
    }

    /// Loads configuration from the process environment.
    ///
    /// A `.env` file in the working directory (or a parent) is read first when
    /// present; variables already set in the environment win.
    ///
    /// # Errors
    /// Returns `ClientError::Config` when the endpoint or credential is missing
    /// or an optional variable cannot be parsed.
    pub fn from_env() -> ClientResult<Self> {
        // A missing .env file is the normal case outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ClientError::Config(format!("{name} is not set")))
        };

        let mut config = ClientConfig::new(required(ENV_BASE_URL)?, required(ENV_API_KEY)?);
        if let Some(raw) = lookup(ENV_INSECURE_TLS) {
            config.tls = parse_insecure_flag(&raw)?;
        }
        config.request_timeout = parse_millis(ENV_REQUEST_TIMEOUT_MS, lookup(ENV_REQUEST_TIMEOUT_MS))?;
        config.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, lookup(ENV_CONNECT_TIMEOUT_MS))?;
        Ok(config)
    }

    /// Builds the WebSocket URL, credential included.
    ///
    /// `http` becomes `ws`, `https` becomes `wss`, a bare host defaults to
    /// `wss`, and `/ws` is appended to the path.
    pub fn websocket_url(&self) -> ClientResult<Url> {
        if self.api_key.is_empty() {
            return Err(ClientError::Config("api key is empty".to_string()));
        }

        let base = self.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ClientError::Config("base url is empty".to_string()));
        }

        let rewritten = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("wss://") || base.starts_with("ws://") {
            base.to_string()
        } else if base.contains("://") {
            return Err(ClientError::Config(format!("unsupported scheme in {base}")));
        } else {
            format!("wss://{base}")
        };

        let mut url = Url::parse(&rewritten)
            .map_err(|err| ClientError::Config(format!("invalid base url {base}: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("base url {base} cannot carry a path")))?
            .pop_if_empty()
            .push("ws");
        url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        Ok(url)
    }

    /// WebSocket URL with the query string removed, safe to log.
    pub fn redacted_url(&self) -> String {
        match self.websocket_url() {
            Ok(mut url) => {
                url.set_query(None);
                url.to_string()
            }
            Err(_) => self.base_url.clone(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("tls", &self.tls)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn parse_insecure_flag(raw: &str) -> ClientResult<TlsVerification> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(TlsVerification::Disabled),
        "" | "0" | "false" | "no" => Ok(TlsVerification::Verify),
        other => Err(ClientError::Config(format!(
            "{ENV_INSECURE_TLS} must be a boolean, got {other:?}"
        ))),
    }
}

fn parse_millis(name: &str, raw: Option<String>) -> ClientResult<Option<Duration>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<u64>()
            .map(|millis| Some(Duration::from_millis(millis)))
            .map_err(|_| ClientError::Config(format!("{name} must be milliseconds, got {value:?}"))),
    }
}
