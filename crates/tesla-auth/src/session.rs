//! Token cache and session orchestration
//!
//! The one entry point everything else depends on: `get_valid_token`.
//! Layered fallback: cached access token → refresh grant → interactive
//! login. All mutation is serialized behind a write lock so concurrent
//! callers share one refresh or one login instead of racing the token
//! endpoint.
//!
//! One session per process. The refresh token store is the durable side;
//! access tokens live only in memory and die with the process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::interactive::{self, Prompt};
use crate::pkce;
use crate::store::RefreshTokenStore;
use crate::token::{AuthClient, TokenResponse};

/// Refresh this long before nominal expiry so callers never receive a
/// token that lapses mid-request.
const RENEWAL_BUFFER: Duration = Duration::from_secs(60);

/// Pending login transactions expire after this long; the authorization
/// server rejects stale codes anyway.
const LOGIN_EXPIRY: Duration = Duration::from_secs(600);

#[derive(Default)]
struct SessionState {
    access_token: Option<String>,
    expires_at: Option<Instant>,
    refresh_token: Option<String>,
    pending_login: Option<PendingLogin>,
}

/// Verifier held between `begin_login` and `finish_login`.
struct PendingLogin {
    verifier: String,
    state: String,
    created_at: Instant,
}

/// A login transaction handed to a caller that cannot prompt inline
/// (the gateway's login endpoints).
#[derive(Debug, Clone)]
pub struct LoginChallenge {
    pub authorization_url: String,
    pub state: String,
}

/// Outcome of one refresh attempt. `Rejected` covers the error kinds the
/// orchestration recovers from by falling back to interactive login.
enum RefreshAttempt {
    Refreshed(String),
    NoRefreshToken,
    Rejected(Error),
}

pub struct Session {
    auth: AuthClient,
    store: RefreshTokenStore,
    prompt: Arc<dyn Prompt>,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(auth: AuthClient, store: RefreshTokenStore, prompt: Arc<dyn Prompt>) -> Self {
        Self {
            auth,
            store,
            prompt,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Return a currently valid access token, renewing or re-authorizing
    /// as needed.
    ///
    /// Fast path: cached unexpired token, zero I/O. Slow path: refresh
    /// grant with the stored refresh token; if that is absent or rejected,
    /// one interactive login. Terminal failures (no operator, exchange
    /// rejection) propagate — this never returns a placeholder token.
    pub async fn get_valid_token(&self) -> Result<String> {
        {
            let state = self.state.read().await;
            if let Some(token) = cached_token(&state) {
                return Ok(token);
            }
        }

        let mut state = self.state.write().await;
        // Re-check under the write lock: a concurrent caller may have
        // renewed the token while we waited.
        if let Some(token) = cached_token(&state) {
            return Ok(token);
        }

        match self.try_refresh(&mut state).await? {
            RefreshAttempt::Refreshed(token) => return Ok(token),
            RefreshAttempt::NoRefreshToken => {
                debug!("no refresh token available, interactive login required");
            }
            RefreshAttempt::Rejected(e) => {
                warn!(error = %e, "token refresh failed, falling back to interactive login");
            }
        }

        self.interactive_login(&mut state).await
    }

    /// Whether the session currently holds an unexpired access token.
    pub async fn is_authenticated(&self) -> bool {
        cached_token(&*self.state.read().await).is_some()
    }

    /// Drop the cached access token. The next caller re-enters the
    /// refresh path.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.access_token = None;
        state.expires_at = None;
    }

    /// Seed the durable slot from configuration when it is empty
    /// (`TESLA_REFRESH_TOKEN` deployments). An existing token wins.
    pub async fn seed_refresh_token(&self, token: &str) -> Result<()> {
        if self.store.load().await?.is_none() {
            self.store.save(token).await?;
            info!("seeded refresh token from environment");
        }
        Ok(())
    }

    /// Start a login transaction for a caller that will deliver the code
    /// out of band. The verifier is held until `finish_login` or expiry.
    pub async fn begin_login(&self) -> LoginChallenge {
        let txn = pkce::generate();
        let authorization_url = pkce::build_authorization_url(&txn.challenge, &txn.state);

        let mut state = self.state.write().await;
        state.pending_login = Some(PendingLogin {
            verifier: txn.verifier,
            state: txn.state.clone(),
            created_at: Instant::now(),
        });
        info!("login transaction started");

        LoginChallenge {
            authorization_url,
            state: txn.state,
        }
    }

    /// Complete a login transaction started by `begin_login`.
    ///
    /// The pending verifier is consumed whether or not the exchange
    /// succeeds; a failed attempt requires a fresh `begin_login`. When the
    /// caller supplies the callback `state` it must match the pending
    /// transaction.
    pub async fn finish_login(&self, code: &str, callback_state: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let pending = state
            .pending_login
            .take()
            .ok_or_else(|| Error::Login("no login in progress, initiate one first".into()))?;

        if pending.created_at.elapsed() > LOGIN_EXPIRY {
            return Err(Error::Login(
                "login attempt expired (>10 minutes), initiate a new one".into(),
            ));
        }

        if let Some(callback_state) = callback_state {
            if callback_state != pending.state {
                warn!("callback state does not match the pending login");
                return Err(Error::Login(
                    "callback state does not match the pending login".into(),
                ));
            }
        }

        // The authorization code may carry a '#state' suffix when pasted
        // from the callback URL.
        let code = code.split('#').next().unwrap_or(code);

        let tokens = self.auth.exchange_code(code, &pending.verifier).await?;
        self.apply_tokens(&mut state, tokens, None).await;
        info!("login complete");
        Ok(())
    }

    /// One refresh-grant attempt with whatever refresh token is at hand.
    ///
    /// Only a server rejection or a transport failure makes interactive
    /// login the right next step; any other error kind propagates.
    async fn try_refresh(&self, state: &mut SessionState) -> Result<RefreshAttempt> {
        let refresh_token = match &state.refresh_token {
            Some(token) => token.clone(),
            None => match self.store.load().await {
                Ok(Some(token)) => token,
                Ok(None) => return Ok(RefreshAttempt::NoRefreshToken),
                Err(e) => {
                    warn!(error = %e, "refresh token load failed, treating as absent");
                    return Ok(RefreshAttempt::NoRefreshToken);
                }
            },
        };

        match self.auth.exchange_refresh(&refresh_token).await {
            Ok(tokens) => {
                let access = self.apply_tokens(state, tokens, Some(refresh_token)).await;
                debug!("access token renewed via refresh grant");
                Ok(RefreshAttempt::Refreshed(access))
            }
            Err(e @ (Error::AuthServer { .. } | Error::Network(_))) => {
                Ok(RefreshAttempt::Rejected(e))
            }
            Err(other) => Err(other),
        }
    }

    /// Full interactive authorization: PKCE transaction, browser URL,
    /// blocking prompt, code exchange. Runs under the write lock so
    /// concurrent callers wait for this login instead of starting another.
    /// The prompt blocks on operator input for an unbounded time, so it
    /// runs on the blocking pool; the executor keeps serving other tasks
    /// while the operator works through the browser step.
    async fn interactive_login(&self, state: &mut SessionState) -> Result<String> {
        let txn = pkce::generate();
        let url = pkce::build_authorization_url(&txn.challenge, &txn.state);

        info!("starting interactive authorization");
        let prompt = self.prompt.clone();
        let code = tokio::task::spawn_blocking(move || interactive::complete(&url, prompt.as_ref()))
            .await
            .map_err(|e| Error::Interaction(format!("authorization task failed: {e}")))??;
        let tokens = self.auth.exchange_code(&code, &txn.verifier).await?;
        let access = self.apply_tokens(state, tokens, None).await;
        info!("interactive authorization complete");
        Ok(access)
    }

    /// Cache the access token and carry the refresh token forward.
    ///
    /// A newly issued refresh token replaces the previous one and is
    /// persisted; an omitted one means the previous token is still valid.
    /// Persistence failures are logged, not fatal — the in-memory session
    /// keeps working and the next rotation retries the write.
    async fn apply_tokens(
        &self,
        state: &mut SessionState,
        tokens: TokenResponse,
        previous_refresh: Option<String>,
    ) -> String {
        let expires_at = Instant::now() + Duration::from_secs(tokens.ttl_secs());

        let new_refresh = tokens.refresh_token.filter(|t| !t.is_empty());
        if let Some(ref token) = new_refresh {
            if let Err(e) = self.store.save(token).await {
                warn!(error = %e, "failed to persist refresh token");
            }
        }
        state.refresh_token = new_refresh.or(previous_refresh);
        state.access_token = Some(tokens.access_token.clone());
        state.expires_at = Some(expires_at);

        tokens.access_token
    }
}

fn cached_token(state: &SessionState) -> Option<String> {
    match (&state.access_token, state.expires_at) {
        (Some(token), Some(expires_at)) if Instant::now() + RENEWAL_BUFFER < expires_at => {
            Some(token.clone())
        }
        _ => None,
    }
}
