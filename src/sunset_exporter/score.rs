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

use crate::align::{select_sunset, AlignedSample};
use crate::merge::{MergedRecord, Observation};
use chrono::NaiveDateTime;
use std::error;
use std::fmt;

/// Score used in place of any sub-score whose inputs are missing.
pub const NEUTRAL_SCORE: f64 = 0.5;

pub const DEFAULT_HALF_WINDOW_MINS: f64 = 60.0;
pub const DEFAULT_SUNSET_WINDOW_MINS: f64 = 45.0;

const PM2_5_CEILING: f64 = 150.0;
const AOD_CEILING: f64 = 1.0;
const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    InvalidWeight(&'static str, f64),
    WeightSum(f64),
    InvalidWindow(&'static str, f64),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWeight(name, v) => write!(f, "{} weight must be between 0 and 1, got {}", name, v),
            Self::WeightSum(sum) => write!(f, "weights must sum to 1.0, got {}", sum),
            Self::InvalidWindow(name, v) => write!(f, "{} must be a positive number of minutes, got {}", name, v),
        }
    }
}

impl error::Error for SettingsError {}

/// Relative importance of each sub-score in the composite score.
///
/// Can only be constructed with weights that sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    cloud: f64,
    precip: f64,
    air: f64,
    time: f64,
}

impl Weights {
    pub const DEFAULT: Weights = Weights {
        cloud: 0.45,
        precip: 0.20,
        air: 0.20,
        time: 0.15,
    };

    pub fn new(cloud: f64, precip: f64, air: f64, time: f64) -> Result<Self, SettingsError> {
        for (name, w) in [("cloud", cloud), ("precip", precip), ("air", air), ("time", time)] {
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(SettingsError::InvalidWeight(name, w));
            }
        }

        let weights = Weights {
            cloud,
            precip,
            air,
            time,
        };

        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SettingsError::WeightSum(sum));
        }

        Ok(weights)
    }

    pub fn sum(&self) -> f64 {
        self.cloud + self.precip + self.air + self.time
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Tunables for turning a merged record into a score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSettings {
    pub weights: Weights,
    /// Minutes from sunset at which the time proximity score reaches zero.
    pub half_window_mins: f64,
    /// Minutes either side of sunset considered "in the window".
    pub sunset_window_mins: f64,
}

impl ScoreSettings {
    pub fn new(weights: Weights, half_window_mins: f64, sunset_window_mins: f64) -> Result<Self, SettingsError> {
        for (name, v) in [
            ("half window", half_window_mins),
            ("sunset window", sunset_window_mins),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(SettingsError::InvalidWindow(name, v));
            }
        }

        Ok(ScoreSettings {
            weights,
            half_window_mins,
            sunset_window_mins,
        })
    }
}

impl Default for ScoreSettings {
    fn default() -> Self {
        ScoreSettings {
            weights: Weights::DEFAULT,
            half_window_mins: DEFAULT_HALF_WINDOW_MINS,
            sunset_window_mins: DEFAULT_SUNSET_WINDOW_MINS,
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn known(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan())
}

/// Favor mid and high cloud (which catch color) and penalize low cloud (which blocks it).
pub fn cloud_layer_score(low: Option<f64>, mid: Option<f64>, high: Option<f64>) -> f64 {
    match (known(low), known(mid), known(high)) {
        (Some(low), Some(mid), Some(high)) => {
            clamp_unit(0.3 * (1.0 - low / 100.0) + 0.3 * (mid / 100.0) + 0.4 * (high / 100.0))
        }
        _ => NEUTRAL_SCORE,
    }
}

pub fn precipitation_score(precip_prob_pct: Option<f64>) -> f64 {
    match known(precip_prob_pct) {
        Some(p) => clamp_unit(1.0 - p / 100.0),
        None => NEUTRAL_SCORE,
    }
}

/// Average of PM2.5 against a 150 µg/m³ ceiling and aerosol optical depth against a ceiling of 1.
pub fn air_quality_score(pm2_5: Option<f64>, aod: Option<f64>) -> f64 {
    match (known(pm2_5), known(aod)) {
        (Some(pm), Some(aod)) => {
            let pm_score = clamp_unit(1.0 - pm.min(PM2_5_CEILING) / PM2_5_CEILING);
            let aod_score = clamp_unit(1.0 - aod.min(AOD_CEILING) / AOD_CEILING);
            clamp_unit((pm_score + aod_score) / 2.0)
        }
        _ => NEUTRAL_SCORE,
    }
}

/// Linear decay from 1 at the event to 0 at `half_window_mins` either side.
pub fn time_proximity_score(minutes_from_event: Option<f64>, half_window_mins: f64) -> f64 {
    match known(minutes_from_event) {
        Some(m) => clamp_unit(1.0 - m.abs() / half_window_mins),
        None => NEUTRAL_SCORE,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubScores {
    pub cloud: f64,
    pub precip: f64,
    pub air: f64,
    pub time: f64,
}

impl SubScores {
    pub fn new(sample: &AlignedSample, minutes_from_sunset: Option<f64>, half_window_mins: f64) -> Self {
        SubScores {
            cloud: cloud_layer_score(sample.cloud_low_pct, sample.cloud_mid_pct, sample.cloud_high_pct),
            precip: precipitation_score(sample.precip_prob_pct),
            air: air_quality_score(sample.pm2_5, sample.aerosol_optical_depth),
            time: time_proximity_score(minutes_from_sunset, half_window_mins),
        }
    }
}

/// Weighted sum of sub-scores, clamped to `[0, 1]`.
pub fn composite_score(scores: &SubScores, weights: &Weights) -> f64 {
    clamp_unit(
        scores.cloud * weights.cloud
            + scores.precip * weights.precip
            + scores.air * weights.air
            + scores.time * weights.time,
    )
}

/// Everything computed for a city in a single cycle, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub observation: Observation,
    pub sample: AlignedSample,
    pub minutes_from_sunset: Option<f64>,
    pub in_sunset_window: Option<bool>,
    pub scores: SubScores,
    pub probability: f64,
}

impl Evaluation {
    /// Score the conditions of a record at an already aligned sunset.
    pub fn new(record: &MergedRecord, sunset: NaiveDateTime, sample: AlignedSample, settings: &ScoreSettings) -> Self {
        let minutes_from_sunset = record
            .observation
            .localtime
            .map(|now| (now - sunset).num_seconds() as f64 / 60.0);
        let in_sunset_window = minutes_from_sunset.map(|m| m.abs() <= settings.sunset_window_mins);

        let scores = SubScores::new(&sample, minutes_from_sunset, settings.half_window_mins);
        let probability = composite_score(&scores, &settings.weights);

        Evaluation {
            observation: record.observation.clone(),
            sample,
            minutes_from_sunset,
            in_sunset_window,
            scores,
            probability,
        }
    }
}

/// Locate the sunset for a record and score the conditions at that time.
///
/// Returns `None` if the record has no sunset time to align against.
pub fn evaluate(record: &MergedRecord, settings: &ScoreSettings) -> Option<Evaluation> {
    let sunset = select_sunset(record)?;
    let sample = AlignedSample::at(record, sunset);
    Some(Evaluation::new(record, sunset, sample, settings))
}

#[cfg(test)]
mod tests {
    use super::{
        air_quality_score, cloud_layer_score, composite_score, evaluate, precipitation_score, time_proximity_score,
        ScoreSettings, SettingsError, SubScores, Weights, NEUTRAL_SCORE,
    };
    use crate::merge::{parse_series_time, AirQualitySeries, ForecastSeries, MergedRecord, Observation};

    const EPSILON: f64 = 1e-9;

    fn assert_close(expected: f64, actual: f64) {
        assert!((expected - actual).abs() < EPSILON, "expected {} got {}", expected, actual);
    }

    fn in_unit(v: f64) -> bool {
        (0.0..=1.0).contains(&v)
    }

    #[test]
    fn test_cloud_layer_score() {
        assert_close(0.63, cloud_layer_score(Some(10.0), Some(40.0), Some(60.0)));
        assert_close(0.3, cloud_layer_score(Some(0.0), Some(0.0), Some(0.0)));
        assert_close(1.0, cloud_layer_score(Some(0.0), Some(100.0), Some(100.0)));
    }

    #[test]
    fn test_precipitation_score() {
        assert_close(0.8, precipitation_score(Some(20.0)));
        assert_close(0.0, precipitation_score(Some(150.0)));
        assert_close(1.0, precipitation_score(Some(-10.0)));
    }

    #[test]
    fn test_air_quality_score() {
        assert_close(0.5, air_quality_score(Some(75.0), Some(0.5)));
        assert_close(0.0, air_quality_score(Some(500.0), Some(3.0)));
        assert_close(1.0, air_quality_score(Some(0.0), Some(0.0)));
    }

    #[test]
    fn test_time_proximity_score() {
        assert_close(0.5, time_proximity_score(Some(30.0), 60.0));
        assert_close(0.5, time_proximity_score(Some(-30.0), 60.0));
        assert_close(1.0, time_proximity_score(Some(0.0), 60.0));
        assert_close(0.0, time_proximity_score(Some(240.0), 60.0));
    }

    #[test]
    fn test_missing_inputs_are_neutral() {
        assert_eq!(NEUTRAL_SCORE, cloud_layer_score(None, Some(40.0), Some(60.0)));
        assert_eq!(NEUTRAL_SCORE, cloud_layer_score(Some(10.0), Some(f64::NAN), Some(60.0)));
        assert_eq!(NEUTRAL_SCORE, precipitation_score(None));
        assert_eq!(NEUTRAL_SCORE, air_quality_score(Some(75.0), None));
        assert_eq!(NEUTRAL_SCORE, time_proximity_score(None, 60.0));
    }

    #[test]
    fn test_sub_scores_bounded() {
        let inputs = [
            -1e9,
            -500.0,
            -1.0,
            0.0,
            0.5,
            1.0,
            50.0,
            100.0,
            150.0,
            1e9,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];

        for a in inputs {
            assert!(in_unit(precipitation_score(Some(a))));
            assert!(in_unit(time_proximity_score(Some(a), 60.0)));
            for b in inputs {
                assert!(in_unit(air_quality_score(Some(a), Some(b))));
                for c in inputs {
                    assert!(in_unit(cloud_layer_score(Some(a), Some(b), Some(c))));
                }
            }
        }
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert_close(1.0, Weights::DEFAULT.sum());
        assert_eq!(Ok(Weights::DEFAULT), Weights::new(0.45, 0.20, 0.20, 0.15));
    }

    #[test]
    fn test_weights_validation() {
        assert_eq!(Err(SettingsError::InvalidWeight("air", -0.1)), Weights::new(0.6, 0.3, -0.1, 0.2));
        assert_eq!(
            Err(SettingsError::InvalidWeight("time", f64::INFINITY)),
            Weights::new(0.25, 0.25, 0.25, f64::INFINITY)
        );
        assert!(matches!(Weights::new(0.5, 0.2, 0.2, 0.2), Err(SettingsError::WeightSum(_))));
    }

    #[test]
    fn test_settings_validation() {
        assert!(ScoreSettings::new(Weights::DEFAULT, 60.0, 45.0).is_ok());
        assert_eq!(
            Err(SettingsError::InvalidWindow("half window", 0.0)),
            ScoreSettings::new(Weights::DEFAULT, 0.0, 45.0)
        );
        assert!(ScoreSettings::new(Weights::DEFAULT, 60.0, f64::NAN).is_err());
    }

    #[test]
    fn test_composite_score() {
        let scores = SubScores {
            cloud: 0.63,
            precip: 0.8,
            air: 0.5,
            time: 0.5,
        };

        // 0.45 * 0.63 + 0.2 * 0.8 + 0.2 * 0.5 + 0.15 * 0.5
        assert_close(0.6185, composite_score(&scores, &Weights::DEFAULT));
    }

    #[test]
    fn test_composite_score_monotonic() {
        let steps: Vec<f64> = (0..=10).map(|i| i as f64 / 10.0).collect();
        let base = SubScores {
            cloud: 0.4,
            precip: 0.6,
            air: 0.2,
            time: 0.9,
        };

        let setters: [fn(&mut SubScores, f64); 4] = [
            |s, v| s.cloud = v,
            |s, v| s.precip = v,
            |s, v| s.air = v,
            |s, v| s.time = v,
        ];

        for set in setters {
            let mut previous = f64::MIN;
            for v in &steps {
                let mut scores = base;
                set(&mut scores, *v);
                let score = composite_score(&scores, &Weights::DEFAULT);
                assert!(score >= previous);
                assert!(in_unit(score));
                previous = score;
            }
        }
    }

    fn record(localtime: Option<&str>, sunsets: Vec<&str>) -> MergedRecord {
        let ts = |s: &str| parse_series_time(s).unwrap();
        MergedRecord {
            city: "Berlin".to_owned(),
            observation: Observation {
                city: "Berlin".to_owned(),
                lat: 52.52,
                lon: 13.41,
                localtime: localtime.map(ts),
                temp_c: Some(4.0),
                cloud_overall_pct: Some(50.0),
                visibility_km: Some(10.0),
                humidity_pct: Some(80.0),
            },
            forecast: ForecastSeries {
                timezone: Some("Europe/Berlin".to_owned()),
                timestamps: vec![ts("2025-11-29T14:00"), ts("2025-11-29T15:00"), ts("2025-11-29T16:00")],
                cloud_low_pct: vec![Some(80.0), Some(50.0), Some(10.0)],
                cloud_mid_pct: vec![Some(0.0), Some(20.0), Some(40.0)],
                cloud_high_pct: vec![Some(0.0), Some(30.0), Some(60.0)],
                precip_prob_pct: vec![Some(90.0), Some(50.0), Some(20.0)],
                sunsets: sunsets.into_iter().map(ts).collect(),
            },
            air_quality: AirQualitySeries {
                timezone: Some("Europe/Berlin".to_owned()),
                timestamps: vec![ts("2025-11-29T15:00"), ts("2025-11-29T16:00")],
                pm2_5: vec![Some(10.0), Some(75.0)],
                aerosol_optical_depth: vec![Some(0.1), Some(0.5)],
            },
        }
    }

    #[test]
    fn test_evaluate() {
        let rec = record(Some("2025-11-29T15:26"), vec!["2025-11-29T15:56"]);
        let eval = evaluate(&rec, &ScoreSettings::default()).unwrap();

        assert_eq!(Some(2), eval.sample.forecast_idx);
        assert_eq!(Some(1), eval.sample.air_quality_idx);
        assert_eq!(Some(-30.0), eval.minutes_from_sunset);
        assert_eq!(Some(true), eval.in_sunset_window);
        assert_close(0.63, eval.scores.cloud);
        assert_close(0.8, eval.scores.precip);
        assert_close(0.5, eval.scores.air);
        assert_close(0.5, eval.scores.time);
        assert_close(0.6185, eval.probability);
    }

    #[test]
    fn test_evaluate_outside_window() {
        let rec = record(Some("2025-11-29T12:00"), vec!["2025-11-29T15:56"]);
        let eval = evaluate(&rec, &ScoreSettings::default()).unwrap();

        assert_eq!(Some(-236.0), eval.minutes_from_sunset);
        assert_eq!(Some(false), eval.in_sunset_window);
        assert_close(0.0, eval.scores.time);
    }

    #[test]
    fn test_evaluate_without_localtime() {
        let rec = record(None, vec!["2025-11-29T15:56"]);
        let eval = evaluate(&rec, &ScoreSettings::default()).unwrap();

        assert_eq!(None, eval.minutes_from_sunset);
        assert_eq!(None, eval.in_sunset_window);
        assert_eq!(NEUTRAL_SCORE, eval.scores.time);
    }

    #[test]
    fn test_evaluate_without_sunset() {
        let rec = record(Some("2025-11-29T15:26"), vec![]);
        assert_eq!(None, evaluate(&rec, &ScoreSettings::default()));
    }
}
