use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::cli::ServeArgs;
use crate::geocoder::{self, GeocodeOptions, Geocoder};
use crate::loader;
use crate::search::{self, SearchRequest, SortBy};
use crate::sources;
use crate::storage::StoragePaths;
use crate::store::Store;
use crate::views;

#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<Store>>,
    geocoder: Arc<Geocoder>,
    http: reqwest::Client,
    paths: StoragePaths,
}

pub async fn run(opts: ServeArgs) -> Result<()> {
    let paths = StoragePaths::new(&opts.data_dir);
    paths.ensure_dirs().context("create data directories")?;

    let store = Store::open(&paths.db_path)?;
    let http = reqwest::Client::new();
    let geocoder = Geocoder::new(http.clone(), GeocodeOptions::default());

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
        geocoder: Arc::new(geocoder),
        http,
        paths,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(index))
        .route("/search", get(search_page))
        .route("/heatmap", get(heatmap))
        .route("/methodology", get(methodology))
        .route("/api/search", get(api_search))
        .route("/api/facilities", get(api_facilities))
        .route("/api/stats", get(api_stats))
        .route("/load-data", get(load_data_first))
        .route("/load-data/:batch", get(load_data))
        .route("/geocode/:count", get(geocode))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("{e:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn index(State(st): State<AppState>) -> impl IntoResponse {
    let store = st.store.lock().await;
    let regions = match store.list_regions() {
        Ok(v) => v,
        Err(e) => return internal(e).into_response(),
    };
    let specialties = match store.list_specialties() {
        Ok(v) => v,
        Err(e) => return internal(e).into_response(),
    };
    Html(views::index_page(&regions, &specialties)).into_response()
}

/// All fields arrive as strings so that empty form submissions (e.g.
/// `min_quality=`) degrade to "no filter" instead of a 400.
#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    specialty: Option<String>,
    region: Option<String>,
    min_quality: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    radius_km: Option<String>,
    sort: Option<String>,
    limit: Option<String>,
}

fn lenient_f64(v: &Option<String>) -> Option<f64> {
    v.as_deref()?.trim().replace(',', ".").parse().ok()
}

fn lenient_usize(v: &Option<String>) -> Option<usize> {
    v.as_deref()?.trim().parse().ok()
}

impl SearchParams {
    fn into_request(self) -> SearchRequest {
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        SearchRequest {
            min_quality: lenient_f64(&self.min_quality),
            latitude: lenient_f64(&self.latitude),
            longitude: lenient_f64(&self.longitude),
            radius_km: lenient_f64(&self.radius_km),
            limit: lenient_usize(&self.limit),
            sort_by: SortBy::parse(self.sort.as_deref()),
            query_text: clean(self.q),
            specialty: clean(self.specialty),
            region: clean(self.region),
        }
    }
}

async fn search_page(
    State(st): State<AppState>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let req = params.into_request();
    let location = search::resolve_location(&req, Some(&st.geocoder)).await;

    let store = st.store.lock().await;
    match search::execute(&store, &req, &location) {
        Ok(outcome) => Html(views::results_page(&req, &outcome)).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

async fn api_search(
    State(st): State<AppState>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let req = params.into_request();
    let location = search::resolve_location(&req, Some(&st.geocoder)).await;

    let store = st.store.lock().await;
    match search::execute(&store, &req, &location) {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct FacilitiesParams {
    specialty: Option<String>,
}

#[derive(Debug, Serialize)]
struct FacilitiesResponse {
    facilities: Vec<crate::store::HeatmapPoint>,
}

async fn api_facilities(
    State(st): State<AppState>,
    Query(params): Query<FacilitiesParams>,
) -> impl IntoResponse {
    let specialty = params
        .specialty
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let store = st.store.lock().await;
    match store.heatmap_points(specialty) {
        Ok(facilities) => Json(FacilitiesResponse { facilities }).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

async fn heatmap() -> impl IntoResponse {
    Html(views::heatmap_page())
}

async fn methodology(State(st): State<AppState>) -> impl IntoResponse {
    let store = st.store.lock().await;
    match store.stats() {
        Ok(stats) => Html(views::methodology_page(&stats)).into_response(),
        Err(e) => internal(e).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: crate::store::StoreStats,
    loaded_sources: Vec<String>,
}

async fn api_stats(State(st): State<AppState>) -> impl IntoResponse {
    let store = st.store.lock().await;
    let stats = match store.stats() {
        Ok(v) => v,
        Err(e) => return internal(e).into_response(),
    };
    let loaded_sources = store.loaded_sources().unwrap_or_default();
    Json(StatsResponse {
        stats,
        loaded_sources,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct LoadResponse {
    #[serde(flatten)]
    report: loader::LoadReport,
    next_batch: Option<usize>,
}

async fn load_data_first(state: State<AppState>) -> impl IntoResponse {
    load_data(state, AxumPath(0)).await
}

/// Load one batch of region sources. Row-level problems land in the counts;
/// this never answers with a 5xx for a bad input row.
async fn load_data(
    State(st): State<AppState>,
    AxumPath(batch): AxumPath<usize>,
) -> impl IntoResponse {
    if batch >= sources::batch_count() {
        return (
            StatusCode::NOT_FOUND,
            format!("batch {batch} out of range (have {})", sources::batch_count()),
        )
            .into_response();
    }

    let mut store = st.store.lock().await;
    let report = loader::load_batch(&mut store, &st.paths, &st.http, batch, false).await;

    let next_batch = if batch + 1 < sources::batch_count() {
        Some(batch + 1)
    } else {
        None
    };
    Json(LoadResponse { report, next_batch }).into_response()
}

async fn geocode(
    State(st): State<AppState>,
    AxumPath(count): AxumPath<usize>,
) -> impl IntoResponse {
    let count = count.clamp(1, 100);
    match geocoder::geocode_pending(&st.store, &st.geocoder, count, 2, false).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal(e).into_response(),
    }
}
