//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (initial login completion)
//! 2. Token refresh (every ~8 hours thereafter)
//!
//! Both operations POST to the same token endpoint with different grant
//! types. Neither is ever retried: the server rejects a replayed
//! code/verifier pair, and a refresh that timed out may still have rotated
//! the refresh token server-side.

use serde::Deserialize;

use crate::constants::{
    AUTH_BASE, DEFAULT_TOKEN_TTL_SECS, REDIRECT_URI, SCOPES, TESLA_CLIENT_ID, TOKEN_PATH,
};
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The session
/// converts it to an absolute deadline when caching the access token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// The refresh grant may omit this; the caller keeps its previous one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Access-token lifetime in seconds, falling back to the vendor's
    /// documented 8-hour window when the server does not report one.
    pub fn ttl_secs(&self) -> u64 {
        self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS)
    }
}

/// Client for the fixed authorization server.
///
/// `base` defaults to the production server; tests point it at a local
/// stand-in.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base: String,
}

impl AuthClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, AUTH_BASE)
    }

    pub fn with_base(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into(),
        }
    }

    fn token_url(&self) -> String {
        format!("{}{}", self.base, TOKEN_PATH)
    }

    /// Exchange an authorization code for tokens (initial login).
    ///
    /// The verifier proves we are the party that built the authorization
    /// URL: the server hashes it and compares against the challenge it saw.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.token_url())
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", TESLA_CLIENT_ID),
                ("code", code),
                ("code_verifier", verifier),
                ("redirect_uri", REDIRECT_URI),
            ])
            .send()
            .await
            .map_err(|e| Error::Network(format!("token exchange request failed: {e}")))?;

        read_token_response(response, "token exchange").await
    }

    /// Trade a refresh token for a new access token.
    ///
    /// The response may carry a rotated refresh token; when it does not,
    /// the previous one stays valid and the caller keeps using it.
    pub async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.token_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", TESLA_CLIENT_ID),
                ("refresh_token", refresh_token),
                ("scope", SCOPES),
            ])
            .send()
            .await
            .map_err(|e| Error::Network(format!("token refresh request failed: {e}")))?;

        read_token_response(response, "token refresh").await
    }
}

async fn read_token_response(response: reqwest::Response, op: &str) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::AuthServer {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Network(format!("invalid {op} response: {e}")))
}
