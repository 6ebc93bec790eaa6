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

use crate::client::{AirQualityResponse, CurrentResponse, ForecastResponse};
use chrono::NaiveDateTime;
use std::error;
use std::fmt;

const OBSERVATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const SERIES_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
const SERIES_TIME_FORMAT_SECS: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub enum MergeError {
    MissingLocation(String),
    InvalidLocation(f64, f64),
    InvalidTimestamp(String),
    UnorderedTimestamp(String),
    TimeBaseMismatch(String, String),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLocation(c) => write!(f, "no coordinates in observation for {}", c),
            Self::InvalidLocation(lat, lon) => write!(f, "coordinates out of range: lat {} lon {}", lat, lon),
            Self::InvalidTimestamp(v) => write!(f, "malformed timestamp {:?}", v),
            Self::UnorderedTimestamp(v) => write!(f, "timestamp {:?} is not after the one before it", v),
            Self::TimeBaseMismatch(a, b) => write!(f, "timezone {} does not match timezone {}", a, b),
        }
    }
}

impl error::Error for MergeError {}

/// Coordinates and timezone of a city as reported by the current observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub timezone: Option<String>,
}

/// Extract the coordinates used to query the hourly series for a city.
///
/// Coordinates always come from the observation so that all three sources
/// describe the same place.
pub fn locate(city: &str, current: &CurrentResponse) -> Result<Location, MergeError> {
    let location = current
        .location
        .as_ref()
        .ok_or_else(|| MergeError::MissingLocation(city.to_owned()))?;

    let (lat, lon) = match (location.lat, location.lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(MergeError::MissingLocation(city.to_owned())),
    };

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(MergeError::InvalidLocation(lat, lon));
    }

    Ok(Location {
        lat,
        lon,
        timezone: location.tz_id.clone(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    pub localtime: Option<NaiveDateTime>,
    pub temp_c: Option<f64>,
    pub cloud_overall_pct: Option<f64>,
    pub visibility_km: Option<f64>,
    pub humidity_pct: Option<f64>,
}

/// Hourly forecast values, each vector parallel to `timestamps`.
///
/// Vectors may be shorter than `timestamps` when the source omitted values,
/// use [`value_at`] to read them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastSeries {
    pub timezone: Option<String>,
    pub timestamps: Vec<NaiveDateTime>,
    pub cloud_low_pct: Vec<Option<f64>>,
    pub cloud_mid_pct: Vec<Option<f64>>,
    pub cloud_high_pct: Vec<Option<f64>>,
    pub precip_prob_pct: Vec<Option<f64>>,
    pub sunsets: Vec<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AirQualitySeries {
    pub timezone: Option<String>,
    pub timestamps: Vec<NaiveDateTime>,
    pub pm2_5: Vec<Option<f64>>,
    pub aerosol_optical_depth: Vec<Option<f64>>,
}

/// Everything known about a single city for one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub city: String,
    pub observation: Observation,
    pub forecast: ForecastSeries,
    pub air_quality: AirQualitySeries,
}

/// Combine the three decoded payloads for a city into a single typed record.
///
/// Missing scalar fields become `None` and missing arrays become empty. Missing
/// coordinates, malformed or out of order timestamps, or sources reporting
/// different timezones are errors.
pub fn merge(
    city: &str,
    current: &CurrentResponse,
    forecast: &ForecastResponse,
    air_quality: &AirQualityResponse,
) -> Result<MergedRecord, MergeError> {
    let location = locate(city, current)?;
    let timezones = [&location.timezone, &forecast.timezone, &air_quality.timezone];
    let mut reported = timezones.iter().filter_map(|tz| tz.as_ref());
    if let Some(first) = reported.next() {
        if let Some(other) = reported.find(|tz| *tz != first) {
            return Err(MergeError::TimeBaseMismatch(first.clone(), other.clone()));
        }
    }

    let localtime = current
        .location
        .as_ref()
        .and_then(|l| l.localtime.as_deref())
        .map(parse_observation_time)
        .transpose()?;

    let conditions = current.current.clone().unwrap_or_default();
    let observation = Observation {
        city: city.to_owned(),
        lat: location.lat,
        lon: location.lon,
        localtime,
        temp_c: conditions.temp_c,
        cloud_overall_pct: conditions.cloud,
        visibility_km: conditions.vis_km,
        humidity_pct: conditions.humidity,
    };

    let hourly = forecast.hourly.clone().unwrap_or_default();
    let daily = forecast.daily.clone().unwrap_or_default();
    let forecast = ForecastSeries {
        timezone: forecast.timezone.clone(),
        timestamps: parse_series_times(&hourly.time)?,
        cloud_low_pct: hourly.cloudcover_low,
        cloud_mid_pct: hourly.cloudcover_mid,
        cloud_high_pct: hourly.cloudcover_high,
        precip_prob_pct: hourly.precipitation_probability,
        sunsets: parse_series_times(&daily.sunset)?,
    };

    let hourly = air_quality.hourly.clone().unwrap_or_default();
    let air_quality = AirQualitySeries {
        timezone: air_quality.timezone.clone(),
        timestamps: parse_series_times(&hourly.time)?,
        pm2_5: hourly.pm2_5,
        aerosol_optical_depth: hourly.aerosol_optical_depth,
    };

    Ok(MergedRecord {
        city: city.to_owned(),
        observation,
        forecast,
        air_quality,
    })
}

/// Read a value from a parallel array, treating short arrays and nulls as absent.
pub fn value_at(values: &[Option<f64>], idx: Option<usize>) -> Option<f64> {
    idx.and_then(|i| values.get(i).copied().flatten())
}

fn parse_observation_time(raw: &str) -> Result<NaiveDateTime, MergeError> {
    NaiveDateTime::parse_from_str(raw.trim(), OBSERVATION_TIME_FORMAT)
        .map_err(|_| MergeError::InvalidTimestamp(raw.to_owned()))
}

pub(crate) fn parse_series_time(raw: &str) -> Result<NaiveDateTime, MergeError> {
    let raw_trimmed = raw.trim();
    NaiveDateTime::parse_from_str(raw_trimmed, SERIES_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw_trimmed, SERIES_TIME_FORMAT_SECS))
        .map_err(|_| MergeError::InvalidTimestamp(raw.to_owned()))
}

/// Parse a series of timestamps, which must be strictly increasing.
fn parse_series_times(raw: &[String]) -> Result<Vec<NaiveDateTime>, MergeError> {
    let mut out: Vec<NaiveDateTime> = Vec::with_capacity(raw.len());
    for s in raw {
        let ts = parse_series_time(s)?;
        if out.last().map_or(false, |prev| *prev >= ts) {
            return Err(MergeError::UnorderedTimestamp(s.clone()));
        }

        out.push(ts);
    }

    Ok(out)
}
