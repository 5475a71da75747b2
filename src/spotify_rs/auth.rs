use std::time::Duration;

use crate::ports::source::AuthMode;
use crate::spotify_rs::types::SpotifyTokenResponse;

const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Application credentials plus an optional user refresh token.
#[derive(Debug, Clone)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: Option<String>,
}

impl SpotifyCredentials {
    pub fn auth_mode(&self) -> AuthMode {
        if self.refresh_token.is_some() {
            AuthMode::User
        } else {
            AuthMode::ClientCredentials
        }
    }

    /// Form body for the token endpoint.
    fn token_params(&self) -> Vec<(&'static str, &str)> {
        match &self.refresh_token {
            Some(refresh_token) => vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ],
            None => vec![("grant_type", "client_credentials")],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Missing Spotify {0}; set it in the config file or environment")]
    MissingCredential(&'static str),
    #[error("Token request rejected: {reason}")]
    Rejected { reason: String },
    #[error("Failed to send http request: {0}")]
    FailedToSendRequest(reqwest::Error),
    #[error("Failed to parse response: {0}")]
    FailedToParseResponse(reqwest::Error),
}

/// Exchange the credentials for an access token, using the refresh-token
/// grant when a user token is configured and client credentials otherwise.
/// https://developer.spotify.com/documentation/web-api/tutorials/refreshing-tokens
pub async fn request_access_token(
    client: &reqwest::Client,
    credentials: &SpotifyCredentials,
) -> Result<SpotifyTokenResponse, TokenError> {
    if credentials.client_id.is_empty() {
        return Err(TokenError::MissingCredential("client_id"));
    }
    if credentials.client_secret.is_empty() {
        return Err(TokenError::MissingCredential("client_secret"));
    }

    let response = client
        .post(SPOTIFY_TOKEN_URL)
        // serialized as x-www-form-urlencoded, as required by spotify
        .form(&credentials.token_params())
        .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(TokenError::FailedToSendRequest)?;

    if !response.status().is_success() {
        let status = response.status();
        let reason = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to get error text".to_string());
        return Err(TokenError::Rejected {
            reason: format!("{status}: {reason}"),
        });
    }

    response
        .json()
        .await
        .map_err(TokenError::FailedToParseResponse)
}
