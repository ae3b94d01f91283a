//! Authorize using the client credentials flow.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::clock::{Clock, SystemClock};
use super::utils::check_status;
use super::{Error, TransportError};
use crate::config::{ConfigError, ProviderConfig};

/// Longest lifetime taken from a server answer; anything above is clamped.
pub const MAX_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub struct ClientCredentials {
    pub client: reqwest::Client,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub token_endpoint: Url,
    /// Upper bound on the whole exchange, body included.
    pub timeout: Duration,
    pub expiry_margin: Duration,
    pub default_expires_in: Duration,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = config.build_http_client()?;
        Ok(Self::with_client(config, client))
    }

    /// Use a caller-supplied HTTP client. TLS and timeout settings of the
    /// config only apply through the client, except the exchange deadline.
    pub fn with_client(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: config.scopes.clone(),
            token_endpoint: config.token_endpoint.clone(),
            timeout: config.timeout,
            expiry_margin: config.expiry_margin,
            default_expires_in: config.default_expires_in,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Perform the client credentials flow.
    pub async fn perform(&self) -> Result<AuthResponse, Error> {
        let scope = self.scopes.join(" ");
        let params = &[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];
        let params = serde_urlencoded::to_string(params).map_err(TransportError::from)?;

        let req = self
            .client
            .post(self.token_endpoint.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(params)
            .build()?;

        let body = tokio::time::timeout(self.timeout, self.exchange(req))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        serde_json::from_slice(&body).map_err(|err| {
            warn!(message = "Token endpoint answered with a body that is not a token response", error = %err);
            Error::TokenMissing
        })
    }

    async fn exchange(&self, req: reqwest::Request) -> Result<bytes::Bytes, Error> {
        let res = self.client.execute(req).await?;
        let res = check_status(res).await?;
        let body = res.bytes().await?;
        Ok(body)
    }

    fn issue(&self, auth: AuthResponse) -> Result<Token, Error> {
        let issued_at = self.clock.now();
        auth.into_token(issued_at, self.default_expires_in, self.expiry_margin)
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    /// The requested access token.
    /// The app can use this token to authenticate to the secured resource, such as to a web API.
    access_token: Option<String>,
    /// The amount of time that an access token is valid (in seconds).
    /// Some servers send it as a string.
    expires_in: Option<serde_json::Value>,
    token_type: Option<String>,
}

impl AuthResponse {
    fn lifetime(&self) -> Option<Duration> {
        let value = self.expires_in.as_ref()?;
        let secs = match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))?,
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok()?,
            _ => return None,
        };
        Some(Duration::from_secs(secs).min(MAX_LIFETIME))
    }

    /// Turn the response into a token expiring `margin` before the server
    /// says it does.
    ///
    /// Lifetimes not longer than the margin keep half of what the server
    /// granted, so the token still expires strictly after `issued_at`. A zero
    /// lifetime is not a usable token.
    pub fn into_token(
        self,
        issued_at: Instant,
        default_lifetime: Duration,
        margin: Duration,
    ) -> Result<Token, Error> {
        let lifetime = self.lifetime().unwrap_or(default_lifetime);

        if let Some(token_type) = &self.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                warn!(message = "Token endpoint returned an unexpected token type", token_type = %token_type);
            }
        }

        let access_token = self
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(Error::TokenMissing)?;
        if HeaderValue::from_str(&access_token).is_err() {
            warn!(message = "Access token contains characters not allowed in a header");
            return Err(Error::TokenMissing);
        }

        let usable_for = if lifetime > margin {
            lifetime - margin
        } else {
            lifetime / 2
        };
        if usable_for.is_zero() {
            warn!(message = "Token endpoint granted a token that is already expired");
            return Err(Error::TokenMissing);
        }
        let expires_at = issued_at
            .checked_add(usable_for)
            .ok_or(Error::TokenMissing)?;

        Ok(Token {
            access_token,
            expires_at,
        })
    }
}

#[derive(Clone)]
pub struct Token {
    pub access_token: String,
    pub expires_at: Instant,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait::async_trait]
impl super::TokenProvider for ClientCredentials {
    type Token = Token;

    async fn get_auth_token(&self) -> Result<Self::Token, Error> {
        debug!(message = "Requesting a token", token_endpoint = %self.token_endpoint);
        let auth_response = self.perform().await?;
        self.issue(auth_response)
    }
}

impl super::Token for Token {
    fn access_token(&self) -> &str {
        self.access_token.as_str()
    }
}

impl super::ExpiringToken for Token {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}
