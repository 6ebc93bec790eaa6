// sunset_exporter - Prometheus metrics exporter for sunset quality estimates
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::error;
use std::fmt;

const AUTO_TIMEZONE: &str = "auto";
const FORECAST_DAYS: &str = "2";
const FORECAST_HOURLY: &str = "cloudcover_low,cloudcover_mid,cloudcover_high,precipitation_probability";
const FORECAST_DAILY: &str = "sunset";
const AIR_QUALITY_HOURLY: &str = "pm2_5,aerosol_optical_depth";

/// Which of the three upstream APIs a request was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Current,
    Forecast,
    AirQuality,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Forecast => write!(f, "forecast"),
            Self::AirQuality => write!(f, "air-quality"),
        }
    }
}

/// Transport level failure talking to one of the upstream APIs.
///
/// Request URLs are never included since the current observation URL carries
/// the API key as a query parameter.
#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidUrl(String),
    InvalidCity(String),
    Unexpected(StatusCode, Endpoint),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(u) => write!(f, "invalid base URL {}", u),
            Self::InvalidCity(c) => write!(f, "invalid city {}", c),
            Self::Unexpected(status, endpoint) => write!(f, "unexpected status {} from {} API", status, endpoint),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Internal(e.without_url())
    }
}

/// Base URLs for each of the upstream APIs.
#[derive(Debug, Clone)]
pub struct ApiUrls {
    pub current: String,
    pub forecast: String,
    pub air_quality: String,
}

pub struct SunsetClient {
    client: Client,
    api_key: String,
    current_url: Url,
    forecast_url: Url,
    air_quality_url: Url,
}

impl SunsetClient {
    const USER_AGENT: &'static str = "Sunset Prometheus Exporter (https://github.com/56quarters/sunset_exporter)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, api_key: &str, urls: &ApiUrls) -> Result<Self, ClientError> {
        Ok(SunsetClient {
            client,
            api_key: api_key.to_owned(),
            current_url: endpoint_url(&urls.current, &["v1", "current.json"])?,
            forecast_url: endpoint_url(&urls.forecast, &["v1", "forecast"])?,
            air_quality_url: endpoint_url(&urls.air_quality, &["v1", "air-quality"])?,
        })
    }

    /// Fetch current conditions for a city by name.
    pub async fn current(&self, city: &str) -> Result<CurrentResponse, ClientError> {
        tracing::debug!(message = "making current observation request", city = %city);

        let query = [("key", self.api_key.as_str()), ("q", city), ("aqi", "no")];
        let res = self.make_request(Endpoint::Current, &self.current_url, &query).await?;
        match res.status() {
            // weatherapi.com answers with a 400 when no location matches the query
            StatusCode::BAD_REQUEST => Err(ClientError::InvalidCity(city.to_owned())),
            _ => Self::decode(Endpoint::Current, res).await,
        }
    }

    /// Fetch hourly cloud and precipitation forecasts plus daily sunset times for a location.
    pub async fn forecast(&self, lat: f64, lon: f64, timezone: Option<&str>) -> Result<ForecastResponse, ClientError> {
        tracing::debug!(message = "making forecast request", lat = lat, lon = lon);

        let (lat, lon) = (lat.to_string(), lon.to_string());
        let query = [
            ("latitude", lat.as_str()),
            ("longitude", lon.as_str()),
            ("hourly", FORECAST_HOURLY),
            ("daily", FORECAST_DAILY),
            ("timezone", timezone.unwrap_or(AUTO_TIMEZONE)),
            ("forecast_days", FORECAST_DAYS),
        ];

        let res = self.make_request(Endpoint::Forecast, &self.forecast_url, &query).await?;
        Self::decode(Endpoint::Forecast, res).await
    }

    /// Fetch hourly particulate and aerosol forecasts for a location.
    pub async fn air_quality(
        &self,
        lat: f64,
        lon: f64,
        timezone: Option<&str>,
    ) -> Result<AirQualityResponse, ClientError> {
        tracing::debug!(message = "making air quality request", lat = lat, lon = lon);

        let (lat, lon) = (lat.to_string(), lon.to_string());
        let query = [
            ("latitude", lat.as_str()),
            ("longitude", lon.as_str()),
            ("hourly", AIR_QUALITY_HOURLY),
            ("timezone", timezone.unwrap_or(AUTO_TIMEZONE)),
            ("forecast_days", FORECAST_DAYS),
        ];

        let res = self.make_request(Endpoint::AirQuality, &self.air_quality_url, &query).await?;
        Self::decode(Endpoint::AirQuality, res).await
    }

    async fn make_request(&self, endpoint: Endpoint, url: &Url, query: &[(&str, &str)]) -> Result<Response, ClientError> {
        let res = self
            .client
            .get(url.clone())
            .query(query)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() || (endpoint == Endpoint::Current && status == StatusCode::BAD_REQUEST) {
            Ok(res)
        } else {
            Err(ClientError::Unexpected(status, endpoint))
        }
    }

    async fn decode<T: DeserializeOwned>(endpoint: Endpoint, res: Response) -> Result<T, ClientError> {
        let status = res.status();
        if !status.is_success() {
            return Err(ClientError::Unexpected(status, endpoint));
        }

        Ok(res.json::<T>().await?)
    }
}

fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = Url::parse(base).map_err(|_| ClientError::InvalidUrl(base.to_owned()))?;
    url.path_segments_mut()
        .map(|mut p| {
            p.pop_if_empty().extend(segments);
        })
        .map_err(|_| ClientError::InvalidUrl(base.to_owned()))?;

    Ok(url)
}

/// Response from the weatherapi.com `current.json` endpoint.
///
/// Only the fields consumed by the exporter are modeled. Any of them may be
/// missing, a missing field becomes `None` rather than a decode failure.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CurrentResponse {
    #[serde(default)]
    pub location: Option<CurrentLocation>,
    #[serde(default)]
    pub current: Option<CurrentConditions>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CurrentLocation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub tz_id: Option<String>,
    #[serde(default)]
    pub localtime: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CurrentConditions {
    #[serde(default)]
    pub temp_c: Option<f64>,
    #[serde(default)]
    pub cloud: Option<f64>,
    #[serde(default)]
    pub vis_km: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

/// Response from the open-meteo forecast endpoint.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ForecastResponse {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub hourly: Option<ForecastHourly>,
    #[serde(default)]
    pub daily: Option<ForecastDaily>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ForecastHourly {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default, alias = "cloud_cover_low")]
    pub cloudcover_low: Vec<Option<f64>>,
    #[serde(default, alias = "cloud_cover_mid")]
    pub cloudcover_mid: Vec<Option<f64>>,
    #[serde(default, alias = "cloud_cover_high")]
    pub cloudcover_high: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_probability: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ForecastDaily {
    #[serde(default)]
    pub sunset: Vec<String>,
}

/// Response from the open-meteo air quality endpoint.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AirQualityResponse {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub hourly: Option<AirQualityHourly>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AirQualityHourly {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub pm2_5: Vec<Option<f64>>,
    #[serde(default)]
    pub aerosol_optical_depth: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::{endpoint_url, CurrentResponse, ForecastResponse};

    #[test]
    fn test_endpoint_url_trailing_slash() {
        let url = endpoint_url("https://api.open-meteo.com/", &["v1", "forecast"]).unwrap();
        assert_eq!("https://api.open-meteo.com/v1/forecast", url.as_str());
    }

    #[test]
    fn test_endpoint_url_with_prefix() {
        let url = endpoint_url("http://127.0.0.1:8080/weather", &["v1", "current.json"]).unwrap();
        assert_eq!("http://127.0.0.1:8080/weather/v1/current.json", url.as_str());
    }

    #[test]
    fn test_endpoint_url_invalid() {
        assert!(endpoint_url("not a url", &["v1"]).is_err());
    }

    #[test]
    fn test_current_response_missing_fields() {
        let res: CurrentResponse = serde_json::from_str(r#"{"location": {"name": "London"}}"#).unwrap();
        let location = res.location.unwrap();
        assert_eq!(Some("London".to_owned()), location.name);
        assert_eq!(None, location.lat);
        assert!(res.current.is_none());
    }

    #[test]
    fn test_forecast_response_nulls() {
        let res: ForecastResponse = serde_json::from_str(
            r#"{
                "timezone": "Europe/London",
                "hourly": {
                    "time": ["2025-11-29T14:00", "2025-11-29T15:00"],
                    "cloudcover_low": [10, null],
                    "precipitation_probability": [20, 30]
                }
            }"#,
        )
        .unwrap();

        let hourly = res.hourly.unwrap();
        assert_eq!(vec![Some(10.0), None], hourly.cloudcover_low);
        assert!(hourly.cloudcover_mid.is_empty());
        assert!(res.daily.is_none());
    }
}
