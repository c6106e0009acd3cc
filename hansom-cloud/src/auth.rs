//! REST auth/TOTP service client.

use reqwest::Client as HttpClient;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned error status {status}: {message}")]
    ServerError { status: u16, message: String },
}

/// Client for the meter auth service.
///
/// Authentication exchanges the device's raw token for a bearer token;
/// the TOTP seed for a meter is then fetched by license plate.
#[derive(Clone)]
pub struct AuthClient {
    http: HttpClient,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Use a custom reqwest client, e.g. to configure timeouts or TLS.
    pub fn with_http_client(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `POST /auth` with the raw device token as a text/plain body.
    /// Returns the bearer token for subsequent calls.
    pub async fn authenticate(&self, raw_token: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .post(format!("{}/auth", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(raw_token.to_owned())
            .send()
            .await?;

        Self::text_or_error(response).await
    }

    /// `GET /meters/{licensePlate}/security/TOTP`, bearer-authenticated.
    /// Returns the TOTP seed registered for the meter.
    pub async fn fetch_totp_seed(
        &self,
        license_plate: &str,
        bearer: &str,
    ) -> Result<String, AuthError> {
        let response = self
            .http
            .get(format!(
                "{}/meters/{}/security/TOTP",
                self.base_url, license_plate
            ))
            .bearer_auth(bearer)
            .send()
            .await?;

        Self::text_or_error(response).await
    }

    async fn text_or_error(response: reqwest::Response) -> Result<String, AuthError> {
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ServerError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.text().await?.trim().to_owned())
    }
}
