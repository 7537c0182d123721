// CLASSIFICATION: COMMUNITY
// Filename: tesla.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-03-02

//! Thin vehicle API client.
//!
//! The vehicle handle is resolved lazily: a background task retries the
//! vehicle list with exponential backoff until the VIN shows up, and the
//! HTTP handler awaits readiness. Upstream concurrency is capped per
//! vehicle.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::value_task::ValueTask;

/// Upstream request cap per vehicle.
pub const MAX_CONCURRENCY: usize = 3;

const API_BASE: &str = "https://owner-api.vn.cloud.tesla.cn/api/1";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeslaApiConfig {
    pub oauth_token: String,
    pub vin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub vin: String,
    #[serde(default)]
    pub display_name: String,
}

pub struct VehicleApi {
    pub vin: String,
    /// Guards upstream calls; over-admission maps to 429.
    pub sem: Arc<Semaphore>,
    vehicle: ValueTask<Vehicle>,
    token: String,
}

impl VehicleApi {
    pub fn new(cfg: &TeslaApiConfig) -> Self {
        let vehicle = ValueTask::spawn(fetch_vehicle(cfg.oauth_token.clone(), cfg.vin.clone()));
        Self {
            vin: cfg.vin.clone(),
            sem: Arc::new(Semaphore::new(MAX_CONCURRENCY)),
            vehicle,
            token: cfg.oauth_token.clone(),
        }
    }

    pub fn vehicle(&self) -> &ValueTask<Vehicle> {
        &self.vehicle
    }

    /// Fetch live vehicle data. The caller holds a semaphore permit.
    pub async fn vehicle_data(&self, vehicle: &Vehicle) -> anyhow::Result<serde_json::Value> {
        let token = self.token.clone();
        let id = vehicle.id;
        tokio::task::spawn_blocking(move || {
            let resp = ureq::get(&format!("{API_BASE}/vehicles/{id}/vehicle_data"))
                .set("Authorization", &format!("Bearer {token}"))
                .call()?;
            let body: serde_json::Value = resp.into_json()?;
            Ok(body
                .get("response")
                .cloned()
                .unwrap_or(serde_json::Value::Null))
        })
        .await?
    }
}

/// Retry the vehicle list until the configured VIN appears.
async fn fetch_vehicle(token: String, vin: String) -> Option<Vehicle> {
    let mut delay = Duration::from_secs(1);
    loop {
        log::info!("attempting to load vehicle list, vin={vin}");
        let token = token.clone();
        match tokio::task::spawn_blocking(move || list_vehicles(&token)).await {
            Ok(Ok(vehicles)) => {
                if let Some(vehicle) = vehicles.into_iter().find(|v| v.vin == vin) {
                    log::info!("selected vehicle {} (id {})", vehicle.vin, vehicle.id);
                    return Some(vehicle);
                }
                log::error!("vehicle with VIN {vin} not found");
            }
            Ok(Err(err)) => log::error!("failed to fetch vehicles: {err}"),
            Err(err) => {
                log::error!("vehicle fetch task failed: {err}");
                return None;
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(60));
    }
}

fn list_vehicles(token: &str) -> anyhow::Result<Vec<Vehicle>> {
    let resp = ureq::get(&format!("{API_BASE}/vehicles"))
        .set("Authorization", &format!("Bearer {token}"))
        .call()?;
    let body: serde_json::Value = resp.into_json()?;
    let vehicles = serde_json::from_value(
        body.get("response")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new())),
    )?;
    Ok(vehicles)
}
