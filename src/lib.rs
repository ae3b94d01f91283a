//! OAuth2 client-credentials token provider for the I.PaC APIs.

pub mod auth;
pub mod config;

pub use auth::bearer::{AllowedHosts, BearerAuthenticator};
pub use auth::client_credentials::ClientCredentials;
pub use auth::token_manager::TokenManager;
pub use auth::{AccessTokenProvider, Error};
pub use config::{ConfigError, ProviderConfig};

/// The provider most callers want: client credentials behind a cache.
pub type IpacTokenProvider = TokenManager<ClientCredentials>;
