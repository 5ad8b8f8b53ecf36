//! SMHI open-data point forecast implementation of the weather client.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::base::{config::Config, error::DiagnosisError, types::WeatherReport};

use super::{GenericWeatherClient, WeatherClient};

const USER_AGENT: &str = concat!("potato-health/", env!("CARGO_PKG_VERSION"));

// Extra methods on `WeatherClient` applied by the smhi implementation.

impl WeatherClient {
    /// Creates a weather client backed by the SMHI forecast API.
    pub fn smhi(config: &Config) -> Result<Self, DiagnosisError> {
        let client = SmhiWeatherClient::new(config)?;
        Ok(Self::new(Arc::new(client), config))
    }
}

// Wire types.

#[derive(Debug, Deserialize)]
struct Forecast {
    #[serde(rename = "timeSeries", default)]
    time_series: Vec<ForecastStep>,
}

#[derive(Debug, Deserialize)]
struct ForecastStep {
    parameters: Vec<ForecastParameter>,
}

#[derive(Debug, Deserialize)]
struct ForecastParameter {
    name: String,
    values: Vec<f64>,
}

// Specific implementations.

/// SMHI weather client implementation.
#[derive(Clone)]
pub struct SmhiWeatherClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SmhiWeatherClient {
    /// Create a new SMHI weather client.
    pub fn new(config: &Config) -> Result<Self, DiagnosisError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.weather_timeout())
            .build()
            .map_err(|err| DiagnosisError::Weather { message: format!("Failed to build HTTP client: {err}") })?;

        Ok(Self {
            client,
            endpoint: config.weather_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, latitude: f64, longitude: f64) -> String {
        format!("{}/lon/{longitude:.2}/lat/{latitude:.2}/data.json", self.endpoint)
    }
}

#[async_trait]
impl GenericWeatherClient for SmhiWeatherClient {
    #[instrument(name = "SmhiWeatherClient::current_weather", skip(self))]
    async fn current_weather(&self, location: &str, latitude: f64, longitude: f64) -> Result<WeatherReport, DiagnosisError> {
        let url = self.url(latitude, longitude);

        info!("Fetching weather from {url}");

        let forecast: Forecast = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| DiagnosisError::Weather { message: format!("Could not reach weather service: {err}") })?
            .json()
            .await
            .map_err(|err| DiagnosisError::Weather { message: format!("Error reading weather data: {err}") })?;

        parse_forecast(location, forecast)
    }
}

/// Take the first forecast step: temperature (`t`), humidity (`r`), mean precipitation (`pmean`).
fn parse_forecast(location: &str, forecast: Forecast) -> Result<WeatherReport, DiagnosisError> {
    let step = forecast.time_series.into_iter().next().ok_or_else(|| DiagnosisError::Weather {
        message: "Weather response is missing `timeSeries`.".to_string(),
    })?;

    let value = |name: &str| step.parameters.iter().find(|p| p.name == name).and_then(|p| p.values.first().copied());

    Ok(WeatherReport {
        location: location.to_string(),
        temperature: value("t"),
        humidity: value("r"),
        precipitation: value("pmean"),
    })
}
