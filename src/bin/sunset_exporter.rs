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

use clap::Parser;
use prometheus_client::registry::Registry;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use sunset_exporter::client::{ApiUrls, SunsetClient};
use sunset_exporter::http::RequestContext;
use sunset_exporter::metrics::SunsetMetrics;
use sunset_exporter::poll::Poller;
use sunset_exporter::score::{ScoreSettings, Weights, DEFAULT_HALF_WINDOW_MINS, DEFAULT_SUNSET_WINDOW_MINS};
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9783);
const DEFAULT_REFRESH_SECS: u64 = 15;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_CURRENT_API_URL: &str = "https://api.weatherapi.com/";
const DEFAULT_FORECAST_API_URL: &str = "https://api.open-meteo.com/";
const DEFAULT_AIR_QUALITY_API_URL: &str = "https://air-quality-api.open-meteo.com/";
const DEFAULT_WEIGHT_CLOUD: f64 = 0.45;
const DEFAULT_WEIGHT_PRECIP: f64 = 0.20;
const DEFAULT_WEIGHT_AIR: f64 = 0.20;
const DEFAULT_WEIGHT_TIME: f64 = 0.15;

#[derive(Debug, Parser)]
#[clap(name = "sunset_exporter", version = clap::crate_version!())]
struct SunsetExporterApplication {
    /// City to estimate sunset quality for. May be given multiple times.
    #[clap(long = "city", required = true)]
    cities: Vec<String>,

    /// API key for weatherapi.com
    #[clap(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    /// Base URL for the weatherapi.com current conditions API
    #[clap(long, default_value_t = DEFAULT_CURRENT_API_URL.into())]
    current_api_url: String,

    /// Base URL for the open-meteo forecast API
    #[clap(long, default_value_t = DEFAULT_FORECAST_API_URL.into())]
    forecast_api_url: String,

    /// Base URL for the open-meteo air quality API
    #[clap(long, default_value_t = DEFAULT_AIR_QUALITY_API_URL.into())]
    air_quality_api_url: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Compute sunset scores for every city at this interval, in seconds. Must be at least 1.
    #[clap(long, default_value_t = DEFAULT_REFRESH_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    refresh_secs: u64,

    /// Timeout for each request to the weather APIs, in milliseconds. Must be at least 1.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_millis: u64,

    /// Weight of the cloud layer score. All weights must sum to 1.0.
    #[clap(long, default_value_t = DEFAULT_WEIGHT_CLOUD)]
    weight_cloud: f64,

    /// Weight of the precipitation score. All weights must sum to 1.0.
    #[clap(long, default_value_t = DEFAULT_WEIGHT_PRECIP)]
    weight_precip: f64,

    /// Weight of the air quality score. All weights must sum to 1.0.
    #[clap(long, default_value_t = DEFAULT_WEIGHT_AIR)]
    weight_air: f64,

    /// Weight of the time to sunset score. All weights must sum to 1.0.
    #[clap(long, default_value_t = DEFAULT_WEIGHT_TIME)]
    weight_time: f64,

    /// Minutes from sunset at which the time to sunset score drops to zero.
    #[clap(long, default_value_t = DEFAULT_HALF_WINDOW_MINS)]
    half_window_mins: f64,

    /// Minutes either side of sunset that count as being within the sunset window.
    #[clap(long, default_value_t = DEFAULT_SUNSET_WINDOW_MINS)]
    sunset_window_mins: f64,

    /// Address to bind to. By default, sunset_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = SunsetExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let settings = Weights::new(opts.weight_cloud, opts.weight_precip, opts.weight_air, opts.weight_time)
        .and_then(|w| ScoreSettings::new(w, opts.half_window_mins, opts.sunset_window_mins))
        .unwrap_or_else(|e| {
            tracing::error!(message = "invalid scoring configuration", error = %e);
            process::exit(1)
        });

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let urls = ApiUrls {
        current: opts.current_api_url.clone(),
        forecast: opts.forecast_api_url.clone(),
        air_quality: opts.air_quality_api_url.clone(),
    };
    let client = SunsetClient::new(http_client, &opts.api_key, &urls).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize API client", error = %e);
        process::exit(1)
    });

    let mut registry = Registry::default();
    let metrics = Arc::new(SunsetMetrics::new(&mut registry));
    let poller = Poller::new(client, metrics, settings, opts.cities.clone());
    let cities = poller.cities().to_vec();
    let interval = Duration::from_secs(opts.refresh_secs);

    tokio::spawn(async move {
        tracing::info!(message = "sunset polling started", cities = ?cities, interval_secs = interval.as_secs());
        poller.run(interval).await;
    });

    let context = Arc::new(RequestContext::new(registry));
    let app = sunset_exporter::http::text_metrics(context);
    let server = axum::Server::try_bind(&opts.bind)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr());
    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
