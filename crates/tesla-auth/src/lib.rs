//! Tesla OAuth session library
//!
//! Obtains, caches, and refreshes access tokens for the Tesla owner API.
//! This crate is a standalone library with no dependency on the gateway
//! binary — it can be tested and used independently.
//!
//! Token flow:
//! 1. `pkce::generate()` builds a verifier/challenge/state transaction
//! 2. The operator authorizes via `pkce::build_authorization_url()`
//! 3. `interactive::complete()` (or the gateway's login endpoints) yields
//!    the authorization code
//! 4. `AuthClient::exchange_code()` trades it for an access/refresh pair
//! 5. `Session::get_valid_token()` serves cached tokens and refreshes via
//!    `AuthClient::exchange_refresh()` when they expire
//! 6. Rotated refresh tokens land in `RefreshTokenStore`

pub mod constants;
pub mod error;
pub mod interactive;
pub mod pkce;
pub mod session;
pub mod store;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use interactive::{DeniedPrompt, Prompt, StdinPrompt};
pub use pkce::{PkceTransaction, build_authorization_url, compute_challenge, generate};
pub use session::{LoginChallenge, Session};
pub use store::RefreshTokenStore;
pub use token::{AuthClient, TokenResponse};
