//! Address geocoding against the OpenStreetMap Nominatim API.
//!
//! Lookups are rate limited through a shared next-slot gate and retried with
//! capped exponential backoff. Every attempted facility is flagged in the
//! store whatever the outcome, so repeated batch invocations make monotonic
//! progress and never re-query known failures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::store::{GeocodeCandidate, Store};

pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = "FindMyCure-Italia/1.0";

#[derive(Debug, Clone)]
pub struct GeocodeOptions {
    pub base_url: String,
    /// Global request start rate. Nominatim's usage policy allows at most
    /// one request per second.
    pub requests_per_second: u32,
    pub max_retries: u32,
}

impl Default for GeocodeOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            requests_per_second: 1,
            max_retries: 3,
        }
    }
}

pub struct Geocoder {
    client: Client,
    base_url: String,
    min_interval: Duration,
    next_slot: Arc<Mutex<Instant>>,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl Geocoder {
    pub fn new(client: Client, opts: GeocodeOptions) -> Self {
        let min_interval = if opts.requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / opts.requests_per_second as f64)
        };
        Self {
            client,
            base_url: opts.base_url,
            min_interval,
            next_slot: Arc::new(Mutex::new(Instant::now())),
            max_retries: opts.max_retries.max(1),
        }
    }

    /// Resolve free text to (lat, lon). Ok(None) means the service answered
    /// but found nothing.
    pub async fn lookup(&self, query: &str) -> Result<Option<(f64, f64)>> {
        wait_for_rate_slot(&self.next_slot, self.min_interval).await;

        let attempts = self.max_retries;
        let mut backoff = Duration::from_secs(1);

        for attempt in 1..=attempts {
            let response = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("q", query),
                    ("format", "json"),
                    ("limit", "1"),
                    ("countrycodes", "it"),
                ])
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .header(reqwest::header::ACCEPT_LANGUAGE, "it")
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let places: Vec<NominatimPlace> = resp
                            .json()
                            .await
                            .with_context(|| format!("invalid geocoding JSON for {query:?}"))?;
                        let Some(place) = places.into_iter().next() else {
                            return Ok(None);
                        };
                        let lat: f64 = place.lat.parse().context("parse lat")?;
                        let lon: f64 = place.lon.parse().context("parse lon")?;
                        return Ok(Some((lat, lon)));
                    }

                    let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER));
                    if is_retryable_status(status) {
                        if attempt == attempts {
                            return Err(anyhow!(
                                "geocoding status {status} for {query:?} after {attempts} attempts"
                            ));
                        }
                        sleep(retry_after.unwrap_or(backoff)).await;
                        backoff = (backoff + backoff).min(Duration::from_secs(60));
                        continue;
                    }
                    return Err(anyhow!("geocoding status {status} for {query:?}"));
                }
                Err(err) => {
                    if attempt == attempts {
                        return Err(anyhow!("geocoding request failed for {query:?}: {err}"));
                    }
                    sleep(backoff).await;
                    backoff = (backoff + backoff).min(Duration::from_secs(60));
                }
            }
        }

        Err(anyhow!("unexpected geocoding flow for {query:?}"))
    }
}

pub async fn run(args: crate::cli::GeocodeArgs) -> Result<()> {
    let paths = crate::storage::StoragePaths::new(&args.data_dir);
    let store = Mutex::new(Store::open(&paths.db_path)?);

    let geocoder = Geocoder::new(
        Client::new(),
        GeocodeOptions {
            base_url: args.base_url.clone(),
            requests_per_second: args.requests_per_second,
            max_retries: args.max_retries,
        },
    );

    let report = geocode_pending(&store, &geocoder, args.count, args.concurrency, true).await?;
    println!(
        "geocoded={} failed={} remaining={}",
        report.geocoded, report.failed, report.remaining
    );
    Ok(())
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct GeocodeReport {
    pub geocoded: u64,
    pub failed: u64,
    pub remaining: u64,
}

fn build_query(c: &GeocodeCandidate) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(addr) = c.address.as_deref().filter(|s| !s.is_empty()) {
        parts.push(addr);
    } else {
        parts.push(&c.name);
    }
    if !c.city.is_empty() {
        parts.push(&c.city);
    }
    parts.push("Italy");
    parts.join(", ")
}

/// Geocode up to `limit` facilities that have never been attempted. Each
/// facility is attempted at most once per invocation; lookups run with
/// bounded concurrency while results are written back serially.
pub async fn geocode_pending(
    store: &Mutex<Store>,
    geocoder: &Geocoder,
    limit: usize,
    concurrency: usize,
    show_progress: bool,
) -> Result<GeocodeReport> {
    let candidates = store.lock().await.pending_geocode(limit)?;
    let total = candidates.len();
    if total == 0 {
        return Ok(GeocodeReport::default());
    }

    let progress = if show_progress {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [geocode {elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        Some(bar)
    } else {
        None
    };

    let mut queue = candidates.into_iter();
    let mut in_flight = FuturesUnordered::new();
    for _ in 0..concurrency.max(1) {
        if let Some(c) = queue.next() {
            in_flight.push(attempt(geocoder, c));
        }
    }

    let mut report = GeocodeReport::default();
    while let Some((id, query, result)) = in_flight.next().await {
        {
            let st = store.lock().await;
            match result {
                Ok(Some((lat, lon))) => {
                    st.mark_geocoded(id, lat, lon)?;
                    report.geocoded += 1;
                    tracing::debug!("geocoded facility {id}: {query} -> ({lat}, {lon})");
                }
                Ok(None) => {
                    st.mark_geocode_failed(id)?;
                    report.failed += 1;
                    tracing::debug!("no geocoding match for facility {id}: {query}");
                }
                Err(e) => {
                    st.mark_geocode_failed(id)?;
                    report.failed += 1;
                    tracing::warn!("geocoding failed for facility {id}: {e:#}");
                }
            }
        }

        if let Some(bar) = &progress {
            bar.inc(1);
            bar.set_message(format!("ok={} failed={}", report.geocoded, report.failed));
        }
        if let Some(c) = queue.next() {
            in_flight.push(attempt(geocoder, c));
        }
    }

    if let Some(bar) = progress {
        bar.finish_with_message(format!(
            "done: ok={} failed={}",
            report.geocoded, report.failed
        ));
    }

    let stats = store.lock().await.stats()?;
    report.remaining = stats.facilities.saturating_sub(stats.geocode_attempted);
    Ok(report)
}

async fn attempt(
    geocoder: &Geocoder,
    candidate: GeocodeCandidate,
) -> (i64, String, Result<Option<(f64, f64)>>) {
    let query = build_query(&candidate);
    let result = geocoder.lookup(&query).await;
    (candidate.id, query, result)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    let value = value?.to_str().ok()?.trim();
    let secs = value.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

async fn wait_for_rate_slot(next_slot: &Arc<Mutex<Instant>>, min_interval: Duration) {
    if min_interval.is_zero() {
        return;
    }
    let mut guard = next_slot.lock().await;
    let now = Instant::now();
    if *guard > now {
        sleep(*guard - now).await;
    }
    *guard = Instant::now() + min_interval;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(address: Option<&str>, city: &str, name: &str) -> GeocodeCandidate {
        GeocodeCandidate {
            id: 1,
            name: name.to_string(),
            address: address.map(str::to_string),
            city: city.to_string(),
        }
    }

    #[test]
    fn query_prefers_address_over_name() {
        let q = build_query(&candidate(Some("Via Roma 1"), "Bari", "Ospedale"));
        assert_eq!(q, "Via Roma 1, Bari, Italy");
        let q = build_query(&candidate(None, "Bari", "Ospedale San Paolo"));
        assert_eq!(q, "Ospedale San Paolo, Bari, Italy");
        let q = build_query(&candidate(None, "", "Ospedale San Paolo"));
        assert_eq!(q, "Ospedale San Paolo, Italy");
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
