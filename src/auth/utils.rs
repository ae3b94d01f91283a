use serde::Deserialize;

/// A non-2xx answer from the token endpoint.
///
/// `error` and `error_description` are filled in when the body follows the
/// OAuth2 error response format.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status_code} status code{}", oauth_error_suffix(.error, .error_description))]
pub struct ServerError {
    pub status_code: u16,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

fn oauth_error_suffix(error: &Option<String>, description: &Option<String>) -> String {
    match (error, description) {
        (Some(error), Some(description)) => format!(" ({error}: {description})"),
        (Some(error), None) => format!(" ({error})"),
        (None, _) => String::new(),
    }
}

impl ServerError {
    pub fn from_body(status_code: u16, body: &[u8]) -> Self {
        let (error, error_description) = match serde_json::from_slice::<OAuthErrorBody>(body) {
            Ok(parsed) => (parsed.error, parsed.error_description),
            Err(_) => (None, None),
        };
        Self {
            status_code,
            error,
            error_description,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code)
    }
}

/// Passes 2xx responses through; turns anything else into a [`ServerError`],
/// consuming the body to pick up the OAuth2 error fields.
pub async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ServerError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.bytes().await.unwrap_or_default();
    Err(ServerError::from_body(status.as_u16(), &body))
}
