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

use crate::score::Evaluation;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

const PREFIX: &str = "sunset";

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CityLabels {
    city: String,
}

impl CityLabels {
    fn new(city: &str) -> Self {
        CityLabels { city: city.to_owned() }
    }
}

type CityGauge = Family<CityLabels, Gauge<f64, AtomicU64>>;

/// Holder for metrics that can be set from an `Evaluation` of a city.
///
/// All metrics are created and registered upon call to `SunsetMetrics::new()`. Metrics
/// all share the prefix "sunset_" and have a "city" label that will be set to the name
/// of the city as configured (e.g. `{city="London"}`).
///
/// Each series for a city holds the value computed by the most recent cycle for that city
/// or doesn't exist at all. A quantity that could not be computed has its series removed
/// rather than keeping a value from an earlier cycle.
#[derive(Debug)]
pub struct SunsetMetrics {
    temperature: CityGauge,
    cloud_overall: CityGauge,
    visibility: CityGauge,
    humidity: CityGauge,
    cloud_low: CityGauge,
    cloud_mid: CityGauge,
    cloud_high: CityGauge,
    precipitation_probability: CityGauge,
    pm2_5: CityGauge,
    aerosol_optical_depth: CityGauge,
    minutes_from_sunset: CityGauge,
    window: CityGauge,
    cloud_score: CityGauge,
    precipitation_score: CityGauge,
    air_quality_score: CityGauge,
    time_score: CityGauge,
    probability: CityGauge,
}

impl SunsetMetrics {
    /// Create a new `SunsetMetrics` and register each metric with the provided `Registry`.
    pub fn new(reg: &mut Registry) -> Self {
        let reg = reg.sub_registry_with_prefix(PREFIX);
        let mut gauge = |name: &str, help: &str| {
            let family = CityGauge::default();
            reg.register(name, help, family.clone());
            family
        };

        Self {
            temperature: gauge("temperature_celsius", "Temperature in celsius"),
            cloud_overall: gauge("cloud_overall_percent", "Overall cloud cover (0-100)"),
            visibility: gauge("visibility_kilometers", "Visibility in kilometers"),
            humidity: gauge("humidity_percent", "Relative humidity (0-100)"),
            cloud_low: gauge("cloud_low_percent", "Low cloud cover at the sunset hour (0-100)"),
            cloud_mid: gauge("cloud_mid_percent", "Mid cloud cover at the sunset hour (0-100)"),
            cloud_high: gauge("cloud_high_percent", "High cloud cover at the sunset hour (0-100)"),
            precipitation_probability: gauge(
                "precipitation_probability_percent",
                "Probability of precipitation at the sunset hour (0-100)",
            ),
            pm2_5: gauge("pm2_5_micrograms", "PM2.5 at the sunset hour in micrograms per cubic meter"),
            aerosol_optical_depth: gauge("aerosol_optical_depth", "Aerosol optical depth at the sunset hour"),
            minutes_from_sunset: gauge(
                "minutes_from_sunset",
                "Minutes between local time and sunset, negative before sunset",
            ),
            window: gauge("window", "1 if local time is within the sunset window, 0 otherwise"),
            cloud_score: gauge("cloud_score", "Cloud layer sub-score (0-1)"),
            precipitation_score: gauge("precipitation_score", "Precipitation sub-score (0-1)"),
            air_quality_score: gauge("air_quality_score", "Air quality sub-score (0-1)"),
            time_score: gauge("time_score", "Time proximity to sunset sub-score (0-1)"),
            probability: gauge("probability", "Estimated likelihood of a good sunset (0-1)"),
        }
    }

    /// Set every metric for a city from the provided evaluation.
    ///
    /// Metrics for quantities that are absent in the evaluation are removed for the city.
    pub fn publish(&self, city: &str, eval: &Evaluation) {
        let labels = CityLabels::new(city);
        let obs = &eval.observation;
        let sample = &eval.sample;

        Self::set_or_remove(&self.temperature, &labels, obs.temp_c);
        Self::set_or_remove(&self.cloud_overall, &labels, obs.cloud_overall_pct);
        Self::set_or_remove(&self.visibility, &labels, obs.visibility_km);
        Self::set_or_remove(&self.humidity, &labels, obs.humidity_pct);
        Self::set_or_remove(&self.cloud_low, &labels, sample.cloud_low_pct);
        Self::set_or_remove(&self.cloud_mid, &labels, sample.cloud_mid_pct);
        Self::set_or_remove(&self.cloud_high, &labels, sample.cloud_high_pct);
        Self::set_or_remove(&self.precipitation_probability, &labels, sample.precip_prob_pct);
        Self::set_or_remove(&self.pm2_5, &labels, sample.pm2_5);
        Self::set_or_remove(&self.aerosol_optical_depth, &labels, sample.aerosol_optical_depth);
        Self::set_or_remove(&self.minutes_from_sunset, &labels, eval.minutes_from_sunset);
        Self::set_or_remove(&self.window, &labels, eval.in_sunset_window.map(|w| if w { 1.0 } else { 0.0 }));
        Self::set_or_remove(&self.cloud_score, &labels, Some(eval.scores.cloud));
        Self::set_or_remove(&self.precipitation_score, &labels, Some(eval.scores.precip));
        Self::set_or_remove(&self.air_quality_score, &labels, Some(eval.scores.air));
        Self::set_or_remove(&self.time_score, &labels, Some(eval.scores.time));
        Self::set_or_remove(&self.probability, &labels, Some(eval.probability));
    }

    /// Remove every metric for a city, used when a cycle for the city fails.
    pub fn clear(&self, city: &str) {
        let labels = CityLabels::new(city);
        for family in self.families() {
            family.remove(&labels);
        }
    }

    fn families(&self) -> [&CityGauge; 17] {
        [
            &self.temperature,
            &self.cloud_overall,
            &self.visibility,
            &self.humidity,
            &self.cloud_low,
            &self.cloud_mid,
            &self.cloud_high,
            &self.precipitation_probability,
            &self.pm2_5,
            &self.aerosol_optical_depth,
            &self.minutes_from_sunset,
            &self.window,
            &self.cloud_score,
            &self.precipitation_score,
            &self.air_quality_score,
            &self.time_score,
            &self.probability,
        ]
    }

    fn set_or_remove(family: &CityGauge, labels: &CityLabels, value: Option<f64>) {
        match value {
            Some(v) if !v.is_nan() => {
                family.get_or_create(labels).set(v);
            }
            _ => {
                family.remove(labels);
            }
        }
    }
}
