use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Geocoder request failed: {0}")]
    Transport(String),

    #[error("Geocoder returned {0}")]
    Status(u16),

    #[error("No address for ({lat}, {lng})")]
    NoResult { lat: f64, lng: f64 },
}

/// Reverse geocoding: coordinates to a human-readable address.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<String, GeocodeError>;
}

/// Nominatim-compatible `/reverse` endpoint.
pub struct NominatimGeocoder {
    base_url: String,
    http: reqwest::Client,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct ReverseResult {
    display_name: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<String, GeocodeError> {
        let resp = self
            .http
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lng.to_string()),
                ("format", "json".to_string()),
            ])
            .header("User-Agent", "townsense/1.0")
            .timeout(GEOCODE_TIMEOUT)
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GeocodeError::Status(resp.status().as_u16()));
        }

        let result: ReverseResult = resp
            .json()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        match (result.display_name, result.error) {
            (Some(name), None) if !name.trim().is_empty() => Ok(name.trim().to_string()),
            _ => Err(GeocodeError::NoResult { lat, lng }),
        }
    }
}
