//! Token endpoint -> provider -> bearer authenticator -> downstream API.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use ipac_auth::{AllowedHosts, BearerAuthenticator, IpacTokenProvider, ProviderConfig};
use url::Url;

fn token_json(token: &str, expires_in: u64) -> String {
    format!(r#"{{"access_token":"{token}","expires_in":{expires_in},"token_type":"Bearer"}}"#)
}

#[tokio::test]
async fn api_calls_carry_the_cached_token() {
    let oauth_server = MockServer::start();
    let token_mock = oauth_server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200)
            .header("content-type", "application/json")
            .body(token_json("integration-tok", 3600));
    });

    let api_server = MockServer::start();
    let api_mock = api_server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/gpa/collezioni")
            .header("authorization", "Bearer integration-tok");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"status":"ok"}"#);
    });

    let config = ProviderConfig::new(
        "int-test-client",
        "int-test-secret",
        Url::parse(&format!("http://localhost:{}/token", oauth_server.port())).unwrap(),
    )
    .with_timeout(Duration::from_secs(5));
    let provider = Arc::new(IpacTokenProvider::from_config(&config).unwrap());
    let authenticator = BearerAuthenticator::new(Arc::clone(&provider), AllowedHosts::default());
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let request = client
            .get(format!(
                "http://localhost:{}/api/v1/gpa/collezioni",
                api_server.port()
            ))
            .build()
            .unwrap();
        let resp = authenticator
            .send(&client, request)
            .await
            .unwrap()
            .error_for_status()
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    token_mock.assert_calls(1);
    api_mock.assert_calls(3);
}

#[tokio::test]
async fn disallowed_host_gets_no_token() {
    let oauth_server = MockServer::start();
    let token_mock = oauth_server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200).body(token_json("never-sent", 3600));
    });

    let api_server = MockServer::start();
    let api_mock = api_server.mock(|when, then| {
        when.method(GET).path("/public").header_missing("authorization");
        then.status(204);
    });

    let config = ProviderConfig::new(
        "int-test-client",
        "int-test-secret",
        Url::parse(&format!("http://localhost:{}/token", oauth_server.port())).unwrap(),
    );
    let provider = IpacTokenProvider::from_config(&config).unwrap();
    let authenticator =
        BearerAuthenticator::new(provider, AllowedHosts::new(["api.example.org"]));
    let client = reqwest::Client::new();

    let request = client
        .get(format!("http://localhost:{}/public", api_server.port()))
        .build()
        .unwrap();
    let resp = authenticator.send(&client, request).await.unwrap();

    assert_eq!(resp.status(), 204);
    token_mock.assert_calls(0);
    api_mock.assert_calls(1);
}
