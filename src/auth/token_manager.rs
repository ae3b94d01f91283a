use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client_credentials::ClientCredentials;
use super::clock::{Clock, SystemClock};
use super::{Error, TokenProvider};
use crate::config::{ConfigError, ProviderConfig};

/// Caches the token of an inner provider until it expires.
///
/// At most one refresh runs at a time. Callers that queue up behind a refresh
/// get its outcome: the new token through the cache, or a clone of the error.
pub struct TokenManager<Provider>
where
    Provider: TokenProvider,
{
    provider: Provider,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    /// Number of refreshes that ran to completion, successful or not.
    refreshes: AtomicU64,
}

#[derive(Default)]
struct State {
    cached_token: Option<Record>,
    /// Outcome of the most recent completed refresh.
    last_outcome: Option<Result<Record, Error>>,
}

#[derive(Clone)]
pub struct Record {
    pub access_token: String,
    pub expires_at: Instant,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Record {
    pub fn from_expiring_token<T: super::ExpiringToken>(token: T) -> Self {
        Self {
            access_token: token.access_token().to_owned(),
            expires_at: token.expires_at(),
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl super::Token for Record {
    fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl super::ExpiringToken for Record {
    fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

impl TokenManager<ClientCredentials> {
    /// Build the client-credentials provider described by `config`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(ClientCredentials::from_config(config)?))
    }
}

impl<Provider> TokenManager<Provider>
where
    Provider: TokenProvider,
{
    pub fn new(provider: Provider) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock))
    }

    pub fn with_clock(provider: Provider, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            state: Mutex::new(State::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn fetch_new_token(&self) -> Result<Record, Error> {
        let token = self.provider.get_auth_token().await?;
        let record = Record::from_expiring_token(token);
        Ok(record)
    }

    pub async fn get_token(&self) -> Result<Record, Error> {
        let observed_refreshes = self.refreshes.load(Ordering::Acquire);
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        if let Some(cached_token) = &state.cached_token {
            if !cached_token.is_expired_at(now) {
                debug!(message = "Using preexisting token", token_expires_at = ?cached_token.expires_at);
                return Ok(cached_token.clone());
            }
            debug!(message = "Existing token expired, refreshing", token_expires_at = ?cached_token.expires_at);
        }

        // A refresh finished while we were queued on the lock: its outcome is ours.
        if self.refreshes.load(Ordering::Acquire) != observed_refreshes {
            match &state.last_outcome {
                Some(Err(err)) => {
                    debug!(message = "Sharing the outcome of the refresh that just failed", error = %err);
                    return Err(err.clone());
                }
                Some(Ok(record)) if !record.is_expired_at(now) => {
                    debug!(message = "Sharing the token of the refresh that just completed");
                    return Ok(record.clone());
                }
                _ => {}
            }
        }

        info!(
            message = "No active token found, about to get a new one",
            token_is_stale = state.cached_token.is_some(),
        );

        let outcome = self.fetch_new_token().await;
        self.refreshes.fetch_add(1, Ordering::AcqRel);

        match &outcome {
            Ok(new_record) => {
                debug!(message = "Got new token", token_expires_at = ?new_record.expires_at);
                state.cached_token = Some(new_record.clone());
            }
            Err(err) => {
                warn!(message = "Token refresh failed", error = %err);
            }
        }
        state.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Like [`TokenManager::acquire_token`], giving up with
    /// [`Error::Cancelled`] once `cancel` fires.
    ///
    /// Abandoning an in-flight refresh releases it; the next caller in line
    /// starts its own.
    pub async fn acquire_token_with_cancel(
        &self,
        resource_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(message = "Token acquisition cancelled", resource_hint = ?resource_hint);
                Err(Error::Cancelled)
            }
            token = self.acquire_token(resource_hint) => token,
        }
    }

    pub async fn acquire_token(&self, resource_hint: Option<&str>) -> Result<String, Error> {
        debug!(message = "Token requested", resource_hint = ?resource_hint);
        let record = self.get_token().await?;
        Ok(record.access_token)
    }

    /// Drop the cached token so the next call goes to the server, e.g. after
    /// a downstream service answered 401.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if state.cached_token.take().is_some() {
            info!(message = "Cached token invalidated");
        }
        state.last_outcome = None;
    }

    /// When the cached token stops being served, if there is one.
    pub async fn cached_expiry(&self) -> Option<Instant> {
        let state = self.state.lock().await;
        state.cached_token.as_ref().map(|record| record.expires_at)
    }
}

#[async_trait::async_trait]
impl<Provider> super::TokenProvider for TokenManager<Provider>
where
    Provider: TokenProvider,
{
    type Token = Record;

    async fn get_auth_token(&self) -> Result<Self::Token, Error> {
        let token = self.get_token().await?;
        Ok(token)
    }
}

#[async_trait::async_trait]
impl<Provider> super::AccessTokenProvider for TokenManager<Provider>
where
    Provider: TokenProvider,
{
    async fn acquire_token(&self, resource_hint: Option<&str>) -> Result<String, Error> {
        TokenManager::acquire_token(self, resource_hint).await
    }
}
