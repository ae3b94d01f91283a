use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::Parser;
use ipac_auth::{
    config, AllowedHosts, BearerAuthenticator, IpacTokenProvider, ProviderConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Fetch an I.PaC access token, and optionally call an API with it.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[arg(long, env = config::ENV_CLIENT_ID)]
    client_id: String,

    #[arg(long, env = config::ENV_CLIENT_SECRET, hide_env_values = true)]
    client_secret: String,

    #[arg(long, env = config::ENV_TOKEN_ENDPOINT)]
    token_endpoint: Url,

    /// Skip TLS certificate verification for the token endpoint and the API.
    #[arg(
        long,
        env = config::ENV_INSECURE_SKIP_VERIFY,
        value_parser = BoolishValueParser::new()
    )]
    insecure: bool,

    #[arg(long, env = config::ENV_TOKEN_TIMEOUT_SECS, default_value_t = 30)]
    timeout_secs: u64,

    /// Only send the token to these hosts; may be repeated.
    #[arg(long = "allowed-host", env = config::ENV_ALLOWED_HOSTS, value_delimiter = ',')]
    allowed_hosts: Vec<String>,

    /// API URL to GET with the bearer token.
    url: Option<Url>,
}

impl Args {
    fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(
            self.client_id.clone(),
            self.client_secret.clone(),
            self.token_endpoint.clone(),
        )
        .with_insecure_skip_verify(self.insecure)
        .with_timeout(Duration::from_secs(self.timeout_secs))
        .with_allowed_hosts(self.allowed_hosts.iter().cloned())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.provider_config();
    let provider = Arc::new(
        IpacTokenProvider::from_config(&config).context("building the token provider")?,
    );

    let Some(url) = args.url else {
        let token = provider
            .acquire_token(None)
            .await
            .context("acquiring a token")?;
        let remaining = provider
            .cached_expiry()
            .await
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()));
        let preview: String = token.chars().take(15).collect();
        println!("token: {preview}...");
        if let Some(remaining) = remaining {
            println!("cached for: {}s", remaining.as_secs());
        }
        return Ok(());
    };

    let api_client = config
        .build_http_client()
        .context("building the API client")?;
    let authenticator = BearerAuthenticator::new(
        Arc::clone(&provider),
        AllowedHosts::new(&config.allowed_hosts),
    );

    info!(message = "Calling API", url = %url);
    let request = api_client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .build()?;
    let res = authenticator
        .send(&api_client, request)
        .await
        .context("calling the API")?;

    println!("status: {}", res.status());
    let body = res.text().await?;
    println!("{body}");
    Ok(())
}
