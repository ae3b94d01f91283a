//! Provider configuration.

use std::fmt;
use std::time::Duration;

use url::Url;

pub const ENV_CLIENT_ID: &str = "IPAC_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "IPAC_CLIENT_SECRET";
pub const ENV_TOKEN_ENDPOINT: &str = "IPAC_TOKEN_ENDPOINT";
pub const ENV_INSECURE_SKIP_VERIFY: &str = "IPAC_INSECURE_SKIP_VERIFY";
pub const ENV_TOKEN_TIMEOUT_SECS: &str = "IPAC_TOKEN_TIMEOUT_SECS";
pub const ENV_ALLOWED_HOSTS: &str = "IPAC_ALLOWED_HOSTS";

pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile"];
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Everything needed to talk to the authorization server.
///
/// Immutable once a provider has been built from it.
#[derive(Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: Url,
    pub scopes: Vec<String>,
    /// Accept any TLS certificate from the token endpoint.
    pub insecure_skip_verify: bool,
    pub timeout: Duration,
    /// Subtracted from `expires_in` so a token is dropped before the server
    /// stops honouring it.
    pub expiry_margin: Duration,
    /// Lifetime assumed when the server omits `expires_in`.
    pub default_expires_in: Duration,
    /// Hosts that may receive the bearer token. Empty means any host.
    pub allowed_hosts: Vec<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("scopes", &self.scopes)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("timeout", &self.timeout)
            .field("expiry_margin", &self.expiry_margin)
            .field("default_expires_in", &self.default_expires_in)
            .field("allowed_hosts", &self.allowed_hosts)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_endpoint: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint,
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect(),
            insecure_skip_verify: false,
            timeout: DEFAULT_TIMEOUT,
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
            default_expires_in: DEFAULT_EXPIRES_IN,
            allowed_hosts: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    pub fn with_default_expires_in(mut self, expires_in: Duration) -> Self {
        self.default_expires_in = expires_in;
        self
    }

    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Load from the `IPAC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source using the `IPAC_*` names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let client_id = required(ENV_CLIENT_ID)?;
        let client_secret = required(ENV_CLIENT_SECRET)?;
        let token_endpoint =
            Url::parse(required(ENV_TOKEN_ENDPOINT)?.trim()).map_err(|err| ConfigError::Invalid {
                key: ENV_TOKEN_ENDPOINT,
                reason: err.to_string(),
            })?;

        let mut config = Self::new(client_id, client_secret, token_endpoint);

        if let Some(value) = lookup(ENV_INSECURE_SKIP_VERIFY) {
            config.insecure_skip_verify = parse_bool(&value).ok_or(ConfigError::Invalid {
                key: ENV_INSECURE_SKIP_VERIFY,
                reason: format!("expected a boolean, got {value:?}"),
            })?;
        }

        if let Some(value) = lookup(ENV_TOKEN_TIMEOUT_SECS) {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|err| ConfigError::Invalid {
                    key: ENV_TOKEN_TIMEOUT_SECS,
                    reason: err.to_string(),
                })?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup(ENV_ALLOWED_HOSTS) {
            config.allowed_hosts = value
                .split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_owned)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing(ENV_CLIENT_ID));
        }
        if self.client_secret.is_empty() {
            return Err(ConfigError::Missing(ENV_CLIENT_SECRET));
        }
        if !matches!(self.token_endpoint.scheme(), "https" | "http") {
            return Err(ConfigError::Invalid {
                key: ENV_TOKEN_ENDPOINT,
                reason: format!("unsupported scheme {:?}", self.token_endpoint.scheme()),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: ENV_TOKEN_TIMEOUT_SECS,
                reason: "timeout must be positive".into(),
            });
        }
        Ok(())
    }

    /// Build the HTTP client used for the token endpoint.
    pub fn build_http_client(&self) -> Result<reqwest::Client, ConfigError> {
        if self.insecure_skip_verify {
            tracing::warn!(
                token_endpoint = %self.token_endpoint,
                "TLS certificate verification is disabled for the token endpoint"
            );
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.insecure_skip_verify)
            .timeout(self.timeout)
            .build()?;
        Ok(client)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
