//! Attach bearer tokens to outgoing requests.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use tracing::{debug, warn};
use url::Url;

use super::{AccessTokenProvider, Error};

/// Hosts allowed to receive a token. An empty list allows every host,
/// including hosts other than the token endpoint's.
#[derive(Debug, Clone, Default)]
pub struct AllowedHosts {
    hosts: Vec<String>,
}

impl AllowedHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|host| host.as_ref().trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn is_allowed(&self, url: &Url) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        match url.host_str() {
            Some(host) => self.hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)),
            None => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("auth: {0}")]
    Auth(#[from] Error),
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
}

pub struct BearerAuthenticator<Provider> {
    provider: Provider,
    allowed_hosts: AllowedHosts,
}

impl<Provider> BearerAuthenticator<Provider>
where
    Provider: AccessTokenProvider,
{
    pub fn new(provider: Provider, allowed_hosts: AllowedHosts) -> Self {
        if allowed_hosts.is_unrestricted() {
            warn!(message = "No allowed hosts configured, the bearer token is sent to every host");
        }
        Self {
            provider,
            allowed_hosts,
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Add `Authorization: Bearer <token>` unless the host is not allowed or
    /// the request already carries credentials.
    pub async fn authenticate(&self, request: &mut reqwest::Request) -> Result<(), Error> {
        if !self.allowed_hosts.is_allowed(request.url()) {
            debug!(message = "Host not allowed to receive the token", host = ?request.url().host_str());
            return Ok(());
        }
        if request.headers().contains_key(AUTHORIZATION) {
            debug!(message = "Request already has an Authorization header", url = %request.url());
            return Ok(());
        }

        let token = self
            .provider
            .acquire_token(Some(request.url().as_str()))
            .await?;
        let mut value =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| Error::TokenMissing)?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    pub async fn send(
        &self,
        client: &reqwest::Client,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response, SendError> {
        self.authenticate(&mut request).await?;
        let res = client.execute(request).await?;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::Method;

    use super::*;

    #[derive(Default)]
    struct Fixed {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AccessTokenProvider for Fixed {
        async fn acquire_token(&self, resource_hint: Option<&str>) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(resource_hint.is_some());
            Ok("tok-123".into())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl AccessTokenProvider for Failing {
        async fn acquire_token(&self, _: Option<&str>) -> Result<String, Error> {
            Err(Error::TokenMissing)
        }
    }

    fn request(url: &str) -> reqwest::Request {
        reqwest::Request::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn allowed_hosts_matching() {
        let url = Url::parse("https://API.example.org/v1").unwrap();
        assert!(AllowedHosts::default().is_unrestricted());
        assert!(AllowedHosts::new(["", "  "]).is_unrestricted());
        assert!(!AllowedHosts::new(["api.example.org"]).is_unrestricted());
        assert!(AllowedHosts::default().is_allowed(&url));
        assert!(AllowedHosts::new(["api.example.org"]).is_allowed(&url));
        assert!(!AllowedHosts::new(["other.example.org"]).is_allowed(&url));
    }

    #[tokio::test]
    async fn sets_bearer_header() {
        let auth = BearerAuthenticator::new(Fixed::default(), AllowedHosts::default());
        let mut req = request("https://api.example.org/v1/collections");

        auth.authenticate(&mut req).await.unwrap();

        let header = req.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer tok-123");
        assert!(header.is_sensitive());
    }

    #[tokio::test]
    async fn skips_disallowed_host() {
        let auth = BearerAuthenticator::new(
            Fixed::default(),
            AllowedHosts::new(["api.example.org"]),
        );
        let mut req = request("https://elsewhere.example.com/");

        auth.authenticate(&mut req).await.unwrap();

        assert!(req.headers().get(AUTHORIZATION).is_none());
        assert_eq!(auth.provider().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn keeps_existing_header() {
        let auth = BearerAuthenticator::new(Fixed::default(), AllowedHosts::default());
        let mut req = request("https://api.example.org/");
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));

        auth.authenticate(&mut req).await.unwrap();

        assert_eq!(req.headers()[AUTHORIZATION], "Basic Zm9vOmJhcg==");
        assert_eq!(auth.provider().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn propagates_provider_error() {
        let auth = BearerAuthenticator::new(Failing, AllowedHosts::default());
        let mut req = request("https://api.example.org/");

        let err = auth.authenticate(&mut req).await.unwrap_err();
        assert!(matches!(err, Error::TokenMissing));
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }
}
