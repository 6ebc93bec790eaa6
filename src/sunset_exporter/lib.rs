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

//! Prometheus metrics exporter for sunset quality estimates
//!
//! ## Features
//!
//! `sunset_exporter` estimates, for each of a list of cities, how likely the next sunset is to
//! be a good one and emits the estimate along with the weather it was based on as Prometheus
//! metrics. Three sources are combined:
//!
//! * Current conditions from [weatherapi.com], looked up by city name. The coordinates and
//!   timezone of the result are used for the other two sources.
//! * Hourly cloud layer and precipitation forecasts plus daily sunset times from [open-meteo].
//! * Hourly PM2.5 and aerosol optical depth forecasts from the [open-meteo air quality API].
//!
//! The forecast hour closest to sunset is scored for cloud layers, precipitation, and air
//! quality, the current time is scored for how close it is to sunset, and the four scores
//! are combined with fixed weights into a single value between 0 and 1.
//!
//! The following metrics are emitted, each with a `city` label. Quantities that aren't
//! available for a city in a particular poll are removed rather than left at an old value.
//!
//! * `sunset_temperature_celsius` - Current temperature, in degrees celsius.
//! * `sunset_cloud_overall_percent` - Current overall cloud cover (0-100).
//! * `sunset_visibility_kilometers` - Current visibility, in kilometers.
//! * `sunset_humidity_percent` - Current relative humidity (0-100).
//! * `sunset_cloud_low_percent`, `sunset_cloud_mid_percent`, `sunset_cloud_high_percent` -
//!   Cloud cover by layer at the sunset hour (0-100).
//! * `sunset_precipitation_probability_percent` - Chance of precipitation at the sunset hour.
//! * `sunset_pm2_5_micrograms` - PM2.5 at the sunset hour, in µg/m³.
//! * `sunset_aerosol_optical_depth` - Aerosol optical depth at the sunset hour.
//! * `sunset_minutes_from_sunset` - Minutes from sunset, negative before sunset.
//! * `sunset_window` - 1 when within 45 minutes of sunset, 0 otherwise.
//! * `sunset_cloud_score`, `sunset_precipitation_score`, `sunset_air_quality_score`,
//!   `sunset_time_score` - Sub-scores (0-1).
//! * `sunset_probability` - Weighted combination of the sub-scores (0-1).
//!
//! [weatherapi.com]: https://www.weatherapi.com/docs/
//! [open-meteo]: https://open-meteo.com/en/docs
//! [open-meteo air quality API]: https://open-meteo.com/en/docs/air-quality-api
//!
//! ## Build
//!
//! `sunset_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/sunset_exporter.git && cd sunset_exporter
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! A weatherapi.com API key is required. It can be passed with `--api-key` or the `API_KEY`
//! environment variable. Cities are given with one or more `--city` flags.
//!
//! ```text
//! API_KEY=... ./sunset_exporter --city London --city Berlin
//! ```
//!
//! The weights used to combine sub-scores can be changed with the `--weight-*` flags but
//! must always sum to 1.0, otherwise `sunset_exporter` will refuse to start.
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9783` at `/metrics`. Add the host running
//! `sunset_exporter` as a target under the Prometheus `scrape_configs` section.
//!
//! ```yaml
//! scrape_configs:
//! - job_name: sunset_exporter
//!   static_configs:
//!   - targets: ['example:9783']
//! ```
//!

pub mod align;
pub mod client;
pub mod http;
pub mod merge;
pub mod metrics;
pub mod poll;
pub mod score;
