//! Bearer token acquisition for outbound API calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod bearer;
pub mod client_credentials;
pub mod clock;
pub mod token_manager;
pub mod utils;

pub use self::utils::ServerError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The endpoint answered 2xx but the body carried no usable token.
    #[error("token endpoint answered without an access token")]
    TokenMissing,
    #[error("token endpoint unreachable: {0}")]
    AuthServerUnreachable(#[source] Arc<TransportError>),
    #[error("token endpoint rejected the request: {0}")]
    AuthServerRejected(#[from] ServerError),
    #[error("token acquisition cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("form encoding: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::AuthServerUnreachable(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        TransportError::from(err).into()
    }
}

impl Error {
    /// Whether retrying later, with backoff, can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::AuthServerUnreachable(_) | Error::Cancelled)
            || matches!(self, Error::AuthServerRejected(server) if !server.is_client_error())
    }
}

/// A source of tokens, such as a single grant exchange.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    type Token: ExpiringToken;

    async fn get_auth_token(&self) -> Result<Self::Token, Error>;
}

pub trait Token: Send {
    fn access_token(&self) -> &str;
}

pub trait ExpiringToken: Token {
    fn expires_at(&self) -> Instant;
}

/// What an HTTP request pipeline calls to get the value of its
/// `Authorization: Bearer` header.
///
/// `resource_hint` names the URL the token is for; providers that hand out a
/// single token for every resource may ignore it.
#[async_trait::async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn acquire_token(&self, resource_hint: Option<&str>) -> Result<String, Error>;
}

#[async_trait::async_trait]
impl<T> AccessTokenProvider for Arc<T>
where
    T: AccessTokenProvider + ?Sized,
{
    async fn acquire_token(&self, resource_hint: Option<&str>) -> Result<String, Error> {
        (**self).acquire_token(resource_hint).await
    }
}
