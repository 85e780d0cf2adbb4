//! HTTP surface of the gateway
//!
//! Thin handlers over the session and the vendor API client. Every
//! handler gets its bearer token from `Session::get_valid_token`; the
//! session decides whether that is a cache hit, a refresh, or a login
//! demand. Errors come back as a JSON envelope
//! `{"error":{"type","message","request_id"}}` with a fresh request id.
//!
//! Inbound command contract: the body nests parameters under
//! `"parameters"`; the vendor call posts them flat. The unwrap happens
//! here and nowhere else.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use tesla_api::{ApiClient, TelemetryQuery, Vehicle, energy, vehicles};
use tesla_auth::Session;

use crate::metrics as gateway_metrics;
use crate::service::GatewayMetrics;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub api: ApiClient,
    pub metrics: GatewayMetrics,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/vehicles", get(list_vehicles))
        .route("/vehicles/{id}", get(get_vehicle))
        .route("/vehicles/{id}/wake", post(wake_vehicle))
        .route("/vehicles/{id}/commands", post(send_command))
        .route("/solar", get(list_solar))
        .route("/solar/{site_id}", get(solar_live_status))
        .route("/solar/{site_id}/commands", post(send_site_command))
        .route("/solar/{site_id}/history", get(solar_history))
        .route("/solar/{site_id}/telemetry", get(solar_telemetry))
        .route("/login/init", post(login_init))
        .route("/login/complete", post(login_complete))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Per-request accounting: counters, in-flight gauge, duration histogram.
async fn track_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let started = Instant::now();

    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.in_flight.fetch_add(1, Ordering::Relaxed);

    let response = next.run(request).await;

    state.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
    let status = response.status();
    if status.is_server_error() {
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    gateway_metrics::record_request(&method, status.as_u16(), started.elapsed().as_secs_f64());

    response
}

/// JSON error envelope with a fresh request id.
fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let body = json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn auth_error(e: tesla_auth::Error) -> Response {
    match e {
        tesla_auth::Error::Network(ref msg) => {
            warn!(error = msg, "auth server unreachable");
            error_response(StatusCode::BAD_GATEWAY, "auth_error", &e.to_string())
        }
        tesla_auth::Error::Login(_) => {
            error_response(StatusCode::BAD_REQUEST, "login_error", &e.to_string())
        }
        tesla_auth::Error::Config(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "config_error",
            &e.to_string(),
        ),
        // AuthServer rejection, denied prompt, store IO: the caller needs
        // to run the login flow.
        _ => error_response(StatusCode::UNAUTHORIZED, "auth_error", &e.to_string()),
    }
}

fn api_error(e: tesla_api::Error) -> Response {
    match e {
        tesla_api::Error::Api { status, ref body } => {
            // The vendor's verdict passes through as-is.
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(status, "vendor_error", body)
        }
        tesla_api::Error::Discovery(_) => {
            error_response(StatusCode::BAD_GATEWAY, "discovery_error", &e.to_string())
        }
        tesla_api::Error::Network(_) => {
            error_response(StatusCode::BAD_GATEWAY, "network_error", &e.to_string())
        }
        tesla_api::Error::InvalidParam(_) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_param", &e.to_string())
        }
    }
}

/// Fetch a bearer token or produce the error response to return.
async fn bearer(state: &AppState) -> Result<String, Response> {
    state.session.get_valid_token().await.map_err(auth_error)
}

fn json_ok(body: Value) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

// --- Health and metrics ---

async fn health(State(state): State<AppState>) -> Response {
    json_ok(json!({
        "status": "ok",
        "authenticated": state.session.is_authenticated().await,
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
    }))
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
        .into_response()
}

// --- Vehicles ---

fn vehicle_summary(v: &Vehicle, battery_level: Option<f64>) -> Value {
    json!({
        "id": v.id,
        "vin": v.vin,
        "display_name": v.display_name,
        "state": v.state,
        "battery_level": battery_level,
    })
}

async fn list_vehicles(State(state): State<AppState>) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match vehicles::list_vehicles(&state.api, &token).await {
        Ok(list) => {
            let summaries: Vec<Value> =
                list.iter().map(|v| vehicle_summary(v, None)).collect();
            json_ok(Value::Array(summaries))
        }
        Err(e) => api_error(e),
    }
}

async fn get_vehicle(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match vehicles::vehicle_data(&state.api, &token, id).await {
        Ok(data) => {
            let battery_level = data.charge_state.as_ref().and_then(|c| c.battery_level);
            json_ok(json!({
                "id": data.id,
                "vin": data.vin,
                "display_name": data.display_name,
                "state": data.state,
                "battery_level": battery_level,
            }))
        }
        Err(e) => api_error(e),
    }
}

async fn wake_vehicle(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match vehicles::wake(&state.api, &token, id).await {
        Ok(v) => json_ok(vehicle_summary(&v, None)),
        Err(e) => api_error(e),
    }
}

/// Inbound command envelope. `parameters` is unwrapped before the vendor
/// call — the vendor body is the parameter object itself.
#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: String,
    #[serde(default)]
    parameters: Option<Value>,
}

async fn send_command(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    axum::Json(req): axum::Json<CommandRequest>,
) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match vehicles::command(&state.api, &token, id, &req.command, req.parameters).await {
        Ok(outcome) => json_ok(json!({
            "result": outcome.result,
            "reason": outcome.reason,
        })),
        Err(e) => api_error(e),
    }
}

// --- Energy ---

async fn list_solar(State(state): State<AppState>) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match energy::list_energy_sites(&state.api, &token).await {
        Ok(sites) => {
            let summaries: Vec<Value> = sites
                .iter()
                .map(|s| {
                    json!({
                        "site_id": s.energy_site_id,
                        "site_name": s.site_name,
                        "resource_type": s.resource_type,
                    })
                })
                .collect();
            json_ok(Value::Array(summaries))
        }
        Err(e) => api_error(e),
    }
}

async fn solar_live_status(State(state): State<AppState>, Path(site_id): Path<u64>) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match energy::live_status(&state.api, &token, site_id).await {
        Ok(status) => json_ok(json!({
            "site_id": site_id,
            "solar_power": status.solar_power,
            "grid_power": status.grid_power,
            "battery_power": status.battery_power,
            "load_power": status.load_power,
            "percentage_charged": status.percentage_charged,
        })),
        Err(e) => api_error(e),
    }
}

async fn send_site_command(
    State(state): State<AppState>,
    Path(site_id): Path<u64>,
    axum::Json(req): axum::Json<CommandRequest>,
) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match energy::command(&state.api, &token, site_id, &req.command, req.parameters).await {
        Ok(outcome) => json_ok(json!({
            "result": outcome.result,
            "reason": outcome.reason,
        })),
        Err(e) => api_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_period")]
    period: String,
}

fn default_period() -> String {
    "day".into()
}

async fn solar_history(
    State(state): State<AppState>,
    Path(site_id): Path<u64>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match energy::history(&state.api, &token, site_id, &params.period).await {
        Ok(value) => json_ok(value),
        Err(e) => api_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct TelemetryParams {
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default = "default_time_zone")]
    time_zone: String,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

fn default_kind() -> String {
    "charge".into()
}

fn default_time_zone() -> String {
    "UTC".into()
}

async fn solar_telemetry(
    State(state): State<AppState>,
    Path(site_id): Path<u64>,
    Query(params): Query<TelemetryParams>,
) -> Response {
    let token = match bearer(&state).await {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let query = TelemetryQuery {
        kind: params.kind,
        time_zone: params.time_zone,
        start_date: params.start_date,
        end_date: params.end_date,
    };
    match energy::telemetry_history(&state.api, &token, site_id, &query).await {
        Ok(value) => json_ok(value),
        Err(e) => api_error(e),
    }
}

// --- Login ---

async fn login_init(State(state): State<AppState>) -> Response {
    let challenge = state.session.begin_login().await;
    json_ok(json!({
        "authorization_url": challenge.authorization_url,
        "state": challenge.state,
    }))
}

#[derive(Debug, Deserialize)]
struct LoginCompleteRequest {
    code: String,
    #[serde(default)]
    state: Option<String>,
}

async fn login_complete(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<LoginCompleteRequest>,
) -> Response {
    match state
        .session
        .finish_login(&req.code, req.state.as_deref())
        .await
    {
        Ok(()) => json_ok(json!({"status": "ok"})),
        Err(e) => auth_error(e),
    }
}
