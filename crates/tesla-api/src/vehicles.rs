//! Vehicle discovery and commands
//!
//! The vehicles endpoint is the primary listing source, but it fails for
//! some account/region combinations where the generic products endpoint
//! still works. Discovery tries vehicles first and falls back to products
//! filtered down to entries that carry a VIN — the products list mixes
//! vehicles with energy sites and a VIN is what marks a vehicle.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::client::ApiClient;
use crate::error::{Error, Result};

/// Normalized vehicle record from either discovery endpoint.
///
/// The two endpoints return different field sets; everything beyond the
/// common core is kept in `extra` for callers that need it.
#[derive(Debug, Clone, Deserialize)]
pub struct Vehicle {
    pub id: u64,
    pub vin: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Full vehicle state snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleData {
    pub id: u64,
    pub vin: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub charge_state: Option<ChargeState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeState {
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Vendor's verdict on a vehicle command.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandOutcome {
    pub result: bool,
    #[serde(default)]
    pub reason: String,
}

/// List vehicles, falling back from `/vehicles` to `/products`.
///
/// A successful primary response wins even when empty. On a primary
/// failure the products list is filtered to VIN-bearing entries in their
/// original order; if that fails too, the secondary error surfaces and
/// the primary one stays in the log.
pub async fn list_vehicles(client: &ApiClient, token: &str) -> Result<Vec<Vehicle>> {
    match client.get(token, "/api/1/vehicles").await {
        Ok(payload) => parse_vehicles(payload),
        Err(primary) => {
            warn!(error = %primary, "vehicles endpoint failed, falling back to products");
            metrics::counter!("tesla_api_discovery_fallbacks_total").increment(1);

            let products = client
                .get(token, "/api/1/products")
                .await
                .map_err(|e| Error::Discovery(e.to_string()))?;
            parse_products_as_vehicles(products)
        }
    }
}

/// Full state for one vehicle.
pub async fn vehicle_data(client: &ApiClient, token: &str, id: u64) -> Result<VehicleData> {
    let payload = client
        .get(token, &format!("/api/1/vehicles/{id}/vehicle_data"))
        .await?;
    serde_json::from_value(payload)
        .map_err(|e| Error::Network(format!("invalid vehicle_data response: {e}")))
}

/// Wake a sleeping vehicle. The returned record usually still reads
/// "asleep"; the wake is asynchronous on the vendor side.
pub async fn wake(client: &ApiClient, token: &str, id: u64) -> Result<Vehicle> {
    let payload = client
        .post(token, &format!("/api/1/vehicles/{id}/wake_up"), &Value::Object(Default::default()))
        .await?;
    serde_json::from_value(payload)
        .map_err(|e| Error::Network(format!("invalid wake_up response: {e}")))
}

/// Send a named command with its parameter object as the flat JSON body.
pub async fn command(
    client: &ApiClient,
    token: &str,
    id: u64,
    name: &str,
    params: Option<Value>,
) -> Result<CommandOutcome> {
    let body = params.unwrap_or_else(|| Value::Object(Default::default()));
    let payload = client
        .post(token, &format!("/api/1/vehicles/{id}/command/{name}"), &body)
        .await?;
    serde_json::from_value(payload)
        .map_err(|e| Error::Network(format!("invalid command response: {e}")))
}

fn parse_vehicles(payload: Value) -> Result<Vec<Vehicle>> {
    serde_json::from_value(payload)
        .map_err(|e| Error::Network(format!("invalid vehicles response: {e}")))
}

/// Keep only products that carry a non-empty VIN, in products order.
fn parse_products_as_vehicles(payload: Value) -> Result<Vec<Vehicle>> {
    let Value::Array(entries) = payload else {
        return Err(Error::Discovery("products response is not a list".into()));
    };

    let mut vehicles = Vec::new();
    for entry in entries {
        let has_vin = entry
            .get("vin")
            .and_then(Value::as_str)
            .is_some_and(|vin| !vin.is_empty());
        if !has_vin {
            continue;
        }
        let vehicle: Vehicle = serde_json::from_value(entry)
            .map_err(|e| Error::Discovery(format!("invalid product entry: {e}")))?;
        vehicles.push(vehicle);
    }
    Ok(vehicles)
}
