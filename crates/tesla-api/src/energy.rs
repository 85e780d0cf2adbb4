//! Energy site queries
//!
//! Sites come from the same products endpoint the vehicle fallback uses,
//! discriminated the other way: an `energy_site_id` marks an energy
//! product. History and telemetry responses vary by installation, so
//! those come back as raw JSON for the caller to shape.

use serde::Deserialize;
use serde_json::Value;

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::vehicles::CommandOutcome;

/// History buckets the vendor accepts.
const PERIODS: &[&str] = &["day", "week", "month", "year"];

/// Energy product entry from the products list.
#[derive(Debug, Clone, Deserialize)]
pub struct EnergySite {
    pub energy_site_id: u64,
    #[serde(default)]
    pub site_name: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Instantaneous power flows for one site. All power values in watts.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteLiveStatus {
    #[serde(default)]
    pub solar_power: Option<f64>,
    #[serde(default)]
    pub grid_power: Option<f64>,
    #[serde(default)]
    pub battery_power: Option<f64>,
    #[serde(default)]
    pub load_power: Option<f64>,
    #[serde(default)]
    pub percentage_charged: Option<f64>,
    #[serde(default)]
    pub energy_left: Option<f64>,
    #[serde(default)]
    pub total_pack_energy: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Query parameters for the telemetry history endpoint.
#[derive(Debug, Clone)]
pub struct TelemetryQuery {
    pub kind: String,
    pub time_zone: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Default for TelemetryQuery {
    fn default() -> Self {
        Self {
            kind: "charge".into(),
            time_zone: "UTC".into(),
            start_date: None,
            end_date: None,
        }
    }
}

/// List energy sites: products entries carrying an `energy_site_id`.
pub async fn list_energy_sites(client: &ApiClient, token: &str) -> Result<Vec<EnergySite>> {
    let payload = client.get(token, "/api/1/products").await?;
    let Value::Array(entries) = payload else {
        return Err(Error::Network("products response is not a list".into()));
    };

    let mut sites = Vec::new();
    for entry in entries {
        if entry.get("energy_site_id").is_none() {
            continue;
        }
        let site: EnergySite = serde_json::from_value(entry)
            .map_err(|e| Error::Network(format!("invalid energy site entry: {e}")))?;
        sites.push(site);
    }
    Ok(sites)
}

/// Live power flows for one site.
pub async fn live_status(client: &ApiClient, token: &str, site_id: u64) -> Result<SiteLiveStatus> {
    let payload = client
        .get(token, &format!("/api/1/energy_sites/{site_id}/live_status"))
        .await?;
    serde_json::from_value(payload)
        .map_err(|e| Error::Network(format!("invalid live_status response: {e}")))
}

/// Energy history in calendar buckets. `period` must be one of
/// day/week/month/year; anything else is rejected before the call.
pub async fn history(client: &ApiClient, token: &str, site_id: u64, period: &str) -> Result<Value> {
    if !PERIODS.contains(&period) {
        return Err(Error::InvalidParam(format!(
            "period must be one of {}, got: {period}",
            PERIODS.join("/")
        )));
    }

    client
        .get(
            token,
            &format!("/api/1/energy_sites/{site_id}/history?kind=energy&period={period}"),
        )
        .await
}

/// Send a named command to an energy site (backup reserve, operation
/// mode, grid charging and the like) with its parameter object as the
/// flat JSON body.
pub async fn command(
    client: &ApiClient,
    token: &str,
    site_id: u64,
    name: &str,
    params: Option<Value>,
) -> Result<CommandOutcome> {
    let body = params.unwrap_or_else(|| Value::Object(Default::default()));
    let payload = client
        .post(
            token,
            &format!("/api/1/energy_sites/{site_id}/command/{name}"),
            &body,
        )
        .await?;
    serde_json::from_value(payload)
        .map_err(|e| Error::Network(format!("invalid command response: {e}")))
}

/// Raw telemetry series for one site.
pub async fn telemetry_history(
    client: &ApiClient,
    token: &str,
    site_id: u64,
    query: &TelemetryQuery,
) -> Result<Value> {
    let mut qs = format!(
        "kind={}&time_zone={}",
        urlencoding::encode(&query.kind),
        urlencoding::encode(&query.time_zone)
    );
    if let Some(ref start) = query.start_date {
        qs.push_str(&format!("&start_date={}", urlencoding::encode(start)));
    }
    if let Some(ref end) = query.end_date {
        qs.push_str(&format!("&end_date={}", urlencoding::encode(end)));
    }

    client
        .get(
            token,
            &format!("/api/1/energy_sites/{site_id}/telemetry_history?{qs}"),
        )
        .await
}
