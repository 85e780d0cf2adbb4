//! Tesla vendor API client
//!
//! Typed, bearer-authenticated access to the fleet/owner API: vehicle
//! discovery with the products fallback, vehicle state and commands, and
//! the energy site surface. Token acquisition lives in `tesla-auth`; this
//! crate only spends tokens.

pub mod client;
pub mod energy;
pub mod error;
pub mod vehicles;

pub use client::{ApiClient, DEFAULT_API_BASE};
pub use energy::{EnergySite, SiteLiveStatus, TelemetryQuery};
pub use error::{Error, Result};
pub use vehicles::{CommandOutcome, Vehicle, VehicleData};
