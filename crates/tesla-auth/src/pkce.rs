//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the OAuth
//! authorization flow, plus the `state` value echoed back in the callback.
//! The verifier is held locally and sent during token exchange; the
//! challenge is included in the authorization URL so the authorization
//! server can verify the exchange request came from the same party that
//! initiated the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::constants::{AUTHORIZE_ENDPOINT, REDIRECT_URI, SCOPES, TESLA_CLIENT_ID};

/// Verifier length the vendor's login flow expects.
/// RFC 7636 allows 43-128 characters; 64 random bytes encode to exactly 86.
const VERIFIER_LEN: usize = 86;

/// One authorization attempt's secrets. Lives from URL construction until
/// the matching token exchange.
#[derive(Debug, Clone)]
pub struct PkceTransaction {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

/// Generate a verifier/challenge pair and an independent CSRF state.
pub fn generate() -> PkceTransaction {
    let verifier = generate_verifier();
    let challenge = compute_challenge(&verifier);
    let state = generate_state();
    PkceTransaction {
        verifier,
        challenge,
        state,
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// Produces 64 random bytes encoded as URL-safe base64 (no padding) and
/// pinned to 86 characters.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    let mut verifier = URL_SAFE_NO_PAD.encode(bytes);
    verifier.truncate(VERIFIER_LEN);
    verifier
}

/// Generate the CSRF `state` value: 32 random bytes, URL-safe base64.
///
/// Opaque to the authorization server; it is returned unchanged in the
/// callback and compared against the value embedded in the URL we showed.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
///
/// The authorization server compares this against the challenge sent in
/// the authorization URL to verify the token exchange request is legitimate.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the full authorization URL with all required OAuth parameters.
///
/// The operator opens this in a browser; after login the server redirects
/// to the (dead) callback page carrying `code` and the same `state`.
pub fn build_authorization_url(challenge: &str, state: &str) -> String {
    format!(
        "{}?client_id={}&code_challenge={}&code_challenge_method=S256&redirect_uri={}&response_type=code&scope={}&state={}",
        AUTHORIZE_ENDPOINT,
        TESLA_CLIENT_ID,
        challenge,
        urlencoded(REDIRECT_URI),
        urlencoded(SCOPES),
        state,
    )
}

/// Minimal URL encoding for parameter values.
/// Only encodes characters that would break URL parameter parsing.
fn urlencoded(s: &str) -> String {
    s.replace(' ', "%20")
        .replace(':', "%3A")
        .replace('/', "%2F")
}
