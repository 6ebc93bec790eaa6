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

use crate::merge::{value_at, MergedRecord};
use chrono::NaiveDateTime;

/// Return the index of the timestamp closest to `target`.
///
/// Equidistant timestamps resolve to the lower index. Targets outside the
/// range of the series resolve to the nearest end. `None` is returned only
/// when `timestamps` is empty.
pub fn align(target: NaiveDateTime, timestamps: &[NaiveDateTime]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;

    for (i, ts) in timestamps.iter().enumerate() {
        let distance = (*ts - target).num_seconds().abs();
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((i, distance)),
        }
    }

    best.map(|(i, _)| i)
}

/// Pick the sunset to score against: the daily sunset nearest to the local
/// time of the observation, or the first one listed (today) if the local time
/// is unknown.
pub fn select_sunset(record: &MergedRecord) -> Option<NaiveDateTime> {
    let sunsets = &record.forecast.sunsets;
    let idx = match record.observation.localtime {
        Some(now) => align(now, sunsets),
        None if sunsets.is_empty() => None,
        None => Some(0),
    };

    idx.map(|i| sunsets[i])
}

/// Forecast and air quality values at the hours nearest to an event.
///
/// Each index is `None` when its series was empty. Values are `None` when
/// their series had no index or no value at the index.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignedSample {
    pub forecast_idx: Option<usize>,
    pub air_quality_idx: Option<usize>,
    pub cloud_low_pct: Option<f64>,
    pub cloud_mid_pct: Option<f64>,
    pub cloud_high_pct: Option<f64>,
    pub precip_prob_pct: Option<f64>,
    pub pm2_5: Option<f64>,
    pub aerosol_optical_depth: Option<f64>,
}

impl AlignedSample {
    /// Align `event` against both hourly series of the record and snapshot the values there.
    pub fn at(record: &MergedRecord, event: NaiveDateTime) -> Self {
        let forecast = &record.forecast;
        let air_quality = &record.air_quality;
        let forecast_idx = align(event, &forecast.timestamps);
        let air_quality_idx = align(event, &air_quality.timestamps);

        AlignedSample {
            forecast_idx,
            air_quality_idx,
            cloud_low_pct: value_at(&forecast.cloud_low_pct, forecast_idx),
            cloud_mid_pct: value_at(&forecast.cloud_mid_pct, forecast_idx),
            cloud_high_pct: value_at(&forecast.cloud_high_pct, forecast_idx),
            precip_prob_pct: value_at(&forecast.precip_prob_pct, forecast_idx),
            pm2_5: value_at(&air_quality.pm2_5, air_quality_idx),
            aerosol_optical_depth: value_at(&air_quality.aerosol_optical_depth, air_quality_idx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{align, select_sunset, AlignedSample};
    use crate::merge::{parse_series_time, AirQualitySeries, ForecastSeries, MergedRecord, Observation};
    use chrono::NaiveDateTime;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_series_time(raw).unwrap()
    }

    fn hours() -> Vec<NaiveDateTime> {
        vec![ts("2025-11-29T14:00"), ts("2025-11-29T15:00"), ts("2025-11-29T16:00")]
    }

    fn record(localtime: Option<&str>, sunsets: &[&str]) -> MergedRecord {
        MergedRecord {
            city: "London".to_owned(),
            observation: Observation {
                city: "London".to_owned(),
                lat: 51.52,
                lon: -0.11,
                localtime: localtime.map(ts),
                temp_c: None,
                cloud_overall_pct: None,
                visibility_km: None,
                humidity_pct: None,
            },
            forecast: ForecastSeries {
                timezone: None,
                timestamps: hours(),
                cloud_low_pct: vec![Some(5.0), Some(10.0), Some(15.0)],
                cloud_mid_pct: vec![Some(40.0), Some(45.0), Some(50.0)],
                cloud_high_pct: vec![Some(60.0), Some(65.0)],
                precip_prob_pct: vec![Some(0.0), Some(10.0), None],
                sunsets: sunsets.iter().map(|s| ts(s)).collect(),
            },
            air_quality: AirQualitySeries::default(),
        }
    }

    #[test]
    fn test_align_nearest_sunset_hour() {
        assert_eq!(Some(2), align(ts("2025-11-29T15:56"), &hours()));
    }

    #[test]
    fn test_align_exact_match() {
        assert_eq!(Some(1), align(ts("2025-11-29T15:00"), &hours()));
    }

    #[test]
    fn test_align_tie_prefers_earlier() {
        assert_eq!(Some(0), align(ts("2025-11-29T14:30"), &hours()));
        assert_eq!(Some(1), align(ts("2025-11-29T15:30"), &hours()));
    }

    #[test]
    fn test_align_out_of_range() {
        assert_eq!(Some(0), align(ts("2025-11-28T23:00"), &hours()));
        assert_eq!(Some(2), align(ts("2025-11-30T09:00"), &hours()));
    }

    #[test]
    fn test_align_empty() {
        assert_eq!(None, align(ts("2025-11-29T15:56"), &[]));
    }

    #[test]
    fn test_align_minimal_distance_property() {
        let series = vec![
            ts("2025-11-29T00:00"),
            ts("2025-11-29T03:00"),
            ts("2025-11-29T04:00"),
            ts("2025-11-29T09:00"),
        ];

        for minute in (-120..=720).step_by(7) {
            let target = ts("2025-11-29T00:00") + chrono::Duration::minutes(minute);
            let idx = align(target, &series).unwrap();
            let best = (series[idx] - target).num_seconds().abs();

            for (j, other) in series.iter().enumerate() {
                let d = (*other - target).num_seconds().abs();
                assert!(d >= best, "index {} is nearer than {} for {}", j, idx, target);
                if d == best {
                    assert!(idx <= j);
                }
            }
        }
    }

    #[test]
    fn test_select_sunset_nearest_to_localtime() {
        let rec = record(
            Some("2025-11-30T12:00"),
            &["2025-11-29T15:56", "2025-11-30T15:55"],
        );
        assert_eq!(Some(ts("2025-11-30T15:55")), select_sunset(&rec));
    }

    #[test]
    fn test_select_sunset_without_localtime() {
        let rec = record(None, &["2025-11-29T15:56", "2025-11-30T15:55"]);
        assert_eq!(Some(ts("2025-11-29T15:56")), select_sunset(&rec));
    }

    #[test]
    fn test_select_sunset_none() {
        let rec = record(Some("2025-11-29T15:00"), &[]);
        assert_eq!(None, select_sunset(&rec));
    }

    #[test]
    fn test_aligned_sample() {
        let rec = record(Some("2025-11-29T15:26"), &["2025-11-29T15:56"]);
        let sample = AlignedSample::at(&rec, ts("2025-11-29T15:56"));

        assert_eq!(Some(2), sample.forecast_idx);
        assert_eq!(Some(15.0), sample.cloud_low_pct);
        assert_eq!(Some(50.0), sample.cloud_mid_pct);
        // shorter array than the timestamps
        assert_eq!(None, sample.cloud_high_pct);
        assert_eq!(None, sample.precip_prob_pct);
        assert_eq!(None, sample.air_quality_idx);
        assert_eq!(None, sample.pm2_5);
    }
}
