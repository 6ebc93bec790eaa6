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

use crate::align::{self, AlignedSample};
use crate::client::{ClientError, SunsetClient};
use crate::merge::{self, MergeError};
use crate::metrics::SunsetMetrics;
use crate::score::{Evaluation, ScoreSettings};
use std::collections::HashSet;
use std::error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, Level};

/// Stages of the pipeline run for each city every cycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Aligning,
    Scoring,
    Publishing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching => write!(f, "fetching"),
            Self::Aligning => write!(f, "aligning"),
            Self::Scoring => write!(f, "scoring"),
            Self::Publishing => write!(f, "publishing"),
        }
    }
}

#[derive(Debug)]
pub enum CycleError {
    Fetch(ClientError),
    Merge(MergeError),
    NoSunset,
}

impl CycleError {
    /// The stage of the pipeline that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch(_) | Self::Merge(_) => Stage::Fetching,
            Self::NoSunset => Stage::Aligning,
        }
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "{}", e),
            Self::Merge(e) => write!(f, "{}", e),
            Self::NoSunset => write!(f, "no sunset time in forecast"),
        }
    }
}

impl error::Error for CycleError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Merge(e) => Some(e),
            Self::NoSunset => None,
        }
    }
}

impl From<ClientError> for CycleError {
    fn from(e: ClientError) -> Self {
        CycleError::Fetch(e)
    }
}

impl From<MergeError> for CycleError {
    fn from(e: MergeError) -> Self {
        CycleError::Merge(e)
    }
}

/// Outcome of a single cycle over all cities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Periodically computes and publishes sunset scores for a list of cities.
///
/// Each cycle runs every city concurrently and waits for all of them to finish
/// before the next cycle may start. Ticks missed because a cycle ran long are
/// skipped, so a city never has more than one cycle in flight. Cities given
/// more than once are only polled once.
#[derive(Clone)]
pub struct Poller {
    client: Arc<SunsetClient>,
    metrics: Arc<SunsetMetrics>,
    settings: ScoreSettings,
    cities: Vec<String>,
}

impl Poller {
    pub fn new(
        client: SunsetClient,
        metrics: Arc<SunsetMetrics>,
        settings: ScoreSettings,
        mut cities: Vec<String>,
    ) -> Self {
        let mut seen = HashSet::new();
        cities.retain(|c| seen.insert(c.clone()));

        Self {
            client: Arc::new(client),
            metrics,
            settings,
            cities,
        }
    }

    /// Cities polled each cycle, in the order given and without duplicates.
    pub fn cities(&self) -> &[String] {
        &self.cities
    }

    /// Run a cycle for every city at a fixed interval, forever.
    ///
    /// Returns immediately without polling if the interval is zero.
    pub async fn run(self, interval: Duration) {
        if interval.is_zero() {
            tracing::error!(message = "poll interval must be greater than zero");
            return;
        }

        let startup = Instant::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let _ = ticker.tick().await;
            let summary = self.run_cycle().await;
            tracing::info!(
                message = "poll cycle complete",
                succeeded = summary.succeeded,
                failed = summary.failed,
                runtime_secs = startup.elapsed().as_secs(),
            );
        }
    }

    /// Fetch, score, and publish every city once.
    ///
    /// A failure for one city has no effect on any other city. Metrics for a
    /// city that fails are removed instead of being left at their previous values.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut tasks = JoinSet::new();

        for city in &self.cities {
            let client = self.client.clone();
            let metrics = self.metrics.clone();
            let settings = self.settings;
            let city = city.clone();
            let span = tracing::span!(Level::DEBUG, "sunset_city", city = %city);

            tasks.spawn(
                async move {
                    // A panic in the pipeline comes back as a JoinError while the city is still known.
                    let pipeline = {
                        let (metrics, city) = (metrics.clone(), city.clone());
                        tokio::spawn(
                            async move { poll_city(&client, &metrics, &settings, &city).await }.in_current_span(),
                        )
                    };

                    finish_city(&metrics, &city, pipeline.await)
                }
                .instrument(span),
            );
        }

        let mut summary = CycleSummary::default();
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(message = "city task did not complete", error = %e);
                }
            }
        }

        summary
    }
}

/// Record the outcome of a city's pipeline, clearing its metrics on any failure.
///
/// Returns `true` if the city was scored and published.
fn finish_city(metrics: &SunsetMetrics, city: &str, res: Result<Result<(), CycleError>, JoinError>) -> bool {
    match res {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            metrics.clear(city);
            tracing::error!(
                message = "failed to compute sunset score",
                city = %city,
                stage = %e.stage(),
                error = %e,
            );
            false
        }
        Err(e) => {
            metrics.clear(city);
            tracing::error!(message = "sunset score task did not complete", city = %city, error = %e);
            false
        }
    }
}

async fn poll_city(
    client: &SunsetClient,
    metrics: &SunsetMetrics,
    settings: &ScoreSettings,
    city: &str,
) -> Result<(), CycleError> {
    tracing::debug!(message = "pipeline stage", stage = %Stage::Fetching);
    let current = client.current(city).await?;
    let location = merge::locate(city, &current)?;
    let tz = location.timezone.as_deref();
    let (forecast, air_quality) = tokio::try_join!(
        client.forecast(location.lat, location.lon, tz),
        client.air_quality(location.lat, location.lon, tz),
    )?;
    let record = merge::merge(city, &current, &forecast, &air_quality)?;

    tracing::debug!(message = "pipeline stage", stage = %Stage::Aligning);
    let sunset = align::select_sunset(&record).ok_or(CycleError::NoSunset)?;
    let sample = AlignedSample::at(&record, sunset);

    tracing::debug!(message = "pipeline stage", stage = %Stage::Scoring);
    let eval = Evaluation::new(&record, sunset, sample, settings);

    tracing::debug!(message = "pipeline stage", stage = %Stage::Publishing);
    metrics.publish(city, &eval);

    tracing::info!(
        message = "computed sunset score",
        city = %city,
        probability = eval.probability,
        minutes_from_sunset = ?eval.minutes_from_sunset,
    );

    Ok(())
}
