//! Field weather lookups, used as context for plant health questions.

pub mod smhi;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::base::{config::Config, error::DiagnosisError, types::WeatherReport};

/// Known field locations and their coordinates (latitude, longitude).
const LOCATION_COORDS: [(&str, (f64, f64)); 13] = [
    ("uppsala", (59.86, 17.64)),
    ("stockholm", (59.33, 18.06)),
    ("malmö", (55.60, 13.00)),
    ("malmo", (55.60, 13.00)),
    ("göteborg", (57.71, 11.97)),
    ("goteborg", (57.71, 11.97)),
    ("örebro", (59.27, 15.21)),
    ("orebro", (59.27, 15.21)),
    ("linköping", (58.41, 15.62)),
    ("linkoping", (58.41, 15.62)),
    ("västerås", (59.61, 16.55)),
    ("vasteras", (59.61, 16.55)),
    ("lund", (55.70, 13.19)),
];

/// Coordinates used when neither the location nor the default resolves.
const FALLBACK_COORDS: (f64, f64) = (59.86, 17.64);

// Traits.

/// Generic weather client trait that clients must implement.
#[async_trait]
pub trait GenericWeatherClient: Send + Sync + 'static {
    /// Current weather at the given coordinates, labeled with `location`.
    async fn current_weather(&self, location: &str, latitude: f64, longitude: f64) -> Result<WeatherReport, DiagnosisError>;
}

// Structs.

/// Weather client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct WeatherClient {
    inner: Arc<dyn GenericWeatherClient>,
    default_location: String,
}

impl Deref for WeatherClient {
    type Target = dyn GenericWeatherClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl WeatherClient {
    pub fn new(inner: Arc<dyn GenericWeatherClient>, config: &Config) -> Self {
        Self {
            inner,
            default_location: config.default_location.clone(),
        }
    }

    /// Weather for a named location, falling back to the default location.
    pub async fn weather_for(&self, location: Option<&str>) -> Result<WeatherReport, DiagnosisError> {
        let (name, (latitude, longitude)) = resolve_location(location, &self.default_location);
        self.current_weather(&name, latitude, longitude).await
    }
}

/// Look up coordinates for a location name (case-insensitive).
pub fn coordinates(location: &str) -> Option<(f64, f64)> {
    let location = location.trim().to_lowercase();
    LOCATION_COORDS.iter().find(|(name, _)| *name == location).map(|(_, coords)| *coords)
}

/// Resolve a location to a name and coordinates, falling back to `default_location`.
pub fn resolve_location(location: Option<&str>, default_location: &str) -> (String, (f64, f64)) {
    let Some(location) = location.filter(|l| !l.trim().is_empty()) else {
        warn!("No location provided, using default `{default_location}`.");
        return (default_location.to_string(), coordinates(default_location).unwrap_or(FALLBACK_COORDS));
    };

    match coordinates(location) {
        Some(coords) => {
            info!("Found coordinates for `{location}`: {coords:?}");
            (location.to_string(), coords)
        }
        None => {
            warn!("Coordinates not found for `{location}`, using default `{default_location}`.");
            (default_location.to_string(), coordinates(default_location).unwrap_or(FALLBACK_COORDS))
        }
    }
}

/// Names of all known locations, for display.
pub fn known_locations() -> impl Iterator<Item = &'static str> {
    LOCATION_COORDS.iter().map(|(name, _)| *name)
}
