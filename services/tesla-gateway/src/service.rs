//! Service state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! Caller (main.rs) executes the I/O implied by each action.
//!
//! Warmup semantics: the gateway tries to turn the stored refresh token
//! into a live session before serving. Transport failures retry with
//! exponential backoff; a rejection from the authorization server does
//! NOT abort startup — the gateway comes up in login-required mode and
//! the /login endpoints repair it at runtime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

/// Runtime metrics tracked while the gateway is running
#[derive(Debug, Clone)]
pub struct GatewayMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being processed. Used for drain coordination:
    /// on shutdown the service waits until this reaches 0 (or the drain
    /// deadline expires) before exiting.
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Gateway lifecycle states.
#[derive(Debug)]
pub enum GatewayState {
    /// Loading config, setting up resources
    Initializing,
    /// Turning the stored refresh token into a live session
    WarmingSession {
        retries: u32,
        listen_addr: SocketAddr,
    },
    /// Transport failure during warmup, waiting out the backoff
    Backoff {
        error: String,
        retries: u32,
        listen_addr: SocketAddr,
    },
    /// Binding the HTTP listener
    Starting {
        listen_addr: SocketAddr,
        authenticated: bool,
    },
    /// Accepting requests. `authenticated` is the state at startup; the
    /// live truth is always the session itself.
    Running { authenticated: bool },
    /// Graceful shutdown, finishing in-flight requests
    Draining { deadline: Instant },
    /// Terminal state
    Stopped { exit_code: i32 },
}

/// Events that drive state transitions.
#[derive(Debug)]
pub enum GatewayEvent {
    /// Configuration parsed successfully
    ConfigLoaded { listen_addr: SocketAddr },
    /// Session holds a valid access token
    SessionReady,
    /// The authorization server rejected the stored refresh token, or
    /// there is none: serve anyway, login required
    SessionLoginRequired,
    /// Transport failure reaching the authorization server
    SessionNetworkError(String),
    /// Retry backoff expired
    RetryTimer,
    /// HTTP listener bound and ready
    ListenerReady,
    /// SIGTERM/SIGINT received
    ShutdownSignal,
    /// All in-flight requests finished before the drain deadline
    DrainComplete,
    /// Drain deadline exceeded
    DrainTimeout,
}

/// Actions the caller should execute after a state transition
#[derive(Debug)]
pub enum GatewayAction {
    /// Attempt a session warmup from the stored refresh token
    WarmSession,
    /// Bind the HTTP listener on the given address
    StartListener { addr: SocketAddr },
    /// Set a retry timer
    ScheduleRetry { delay: Duration },
    /// Exit the process
    Shutdown { exit_code: i32 },
    /// No-op
    None,
}

/// Maximum warmup retries on transport failure before giving up
const MAX_WARMUP_RETRIES: u32 = 5;

/// Drain timeout duration for graceful shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: GatewayState, event: GatewayEvent) -> (GatewayState, GatewayAction) {
    match (state, event) {
        // --- Initializing ---
        (GatewayState::Initializing, GatewayEvent::ConfigLoaded { listen_addr }) => (
            GatewayState::WarmingSession {
                retries: 0,
                listen_addr,
            },
            GatewayAction::WarmSession,
        ),

        // --- WarmingSession ---
        (GatewayState::WarmingSession { listen_addr, .. }, GatewayEvent::SessionReady) => (
            GatewayState::Starting {
                listen_addr,
                authenticated: true,
            },
            GatewayAction::StartListener { addr: listen_addr },
        ),

        // Auth rejection is not fatal: the /login endpoints can repair a
        // revoked refresh token while the gateway serves.
        (GatewayState::WarmingSession { listen_addr, .. }, GatewayEvent::SessionLoginRequired) => (
            GatewayState::Starting {
                listen_addr,
                authenticated: false,
            },
            GatewayAction::StartListener { addr: listen_addr },
        ),

        (
            GatewayState::WarmingSession {
                retries,
                listen_addr,
            },
            GatewayEvent::SessionNetworkError(e),
        ) if retries < MAX_WARMUP_RETRIES => {
            let delay = Duration::from_secs(2u64.pow(retries));
            (
                GatewayState::Backoff {
                    error: e,
                    retries,
                    listen_addr,
                },
                GatewayAction::ScheduleRetry { delay },
            )
        }

        (GatewayState::WarmingSession { .. }, GatewayEvent::SessionNetworkError(_)) => (
            GatewayState::Stopped { exit_code: 1 },
            GatewayAction::Shutdown { exit_code: 1 },
        ),

        // --- Backoff ---
        (
            GatewayState::Backoff {
                retries,
                listen_addr,
                ..
            },
            GatewayEvent::RetryTimer,
        ) => (
            GatewayState::WarmingSession {
                retries: retries + 1,
                listen_addr,
            },
            GatewayAction::WarmSession,
        ),

        // --- Starting ---
        (GatewayState::Starting { authenticated, .. }, GatewayEvent::ListenerReady) => {
            (GatewayState::Running { authenticated }, GatewayAction::None)
        }

        // --- Running ---
        (GatewayState::Running { .. }, GatewayEvent::ShutdownSignal) => (
            GatewayState::Draining {
                deadline: Instant::now() + DRAIN_TIMEOUT,
            },
            GatewayAction::None,
        ),

        // --- Draining ---
        (
            GatewayState::Draining { .. },
            GatewayEvent::DrainComplete | GatewayEvent::DrainTimeout,
        ) => (
            GatewayState::Stopped { exit_code: 0 },
            GatewayAction::Shutdown { exit_code: 0 },
        ),

        // --- Any state + shutdown = stop ---
        (_, GatewayEvent::ShutdownSignal) => (
            GatewayState::Stopped { exit_code: 0 },
            GatewayAction::Shutdown { exit_code: 0 },
        ),

        // --- Invalid/unhandled transition: stay in current state ---
        (state, _event) => (state, GatewayAction::None),
    }
}
