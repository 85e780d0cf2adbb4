//! Tesla OAuth constants
//!
//! Public OAuth client configuration for the vendor's owner API. These
//! values are not secrets — they identify the public client application
//! every official app uses. The actual secrets (access/refresh tokens) are
//! held by the session and the refresh token store.

/// Tesla's public OAuth client ID (same as the official apps)
pub const TESLA_CLIENT_ID: &str = "ownerapi";

/// OAuth redirect URI. Deliberately a dead page on the auth host — the
/// operator copies the callback URL out of the browser by hand.
pub const REDIRECT_URI: &str = "https://auth.tesla.com/void/callback";

/// Authorization server base URL (token endpoint lives under it)
pub const AUTH_BASE: &str = "https://auth.tesla.com";

/// Token endpoint path for code exchange and token refresh
pub const TOKEN_PATH: &str = "/oauth2/v3/token";

/// Authorization endpoint the operator visits in a browser
pub const AUTHORIZE_ENDPOINT: &str = "https://auth.tesla.com/oauth2/v3/authorize";

/// OAuth scopes. `offline_access` is what makes the server issue a
/// refresh token; without it every expiry would need a fresh browser login.
pub const SCOPES: &str = "openid email offline_access";

/// Access-token lifetime assumed when the server omits `expires_in`.
/// Matches the vendor's documented 8-hour token window.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 28_800;

/// Default refresh-token file, relative to the working directory
pub const DEFAULT_TOKEN_FILE: &str = ".tesla_refresh_token";
