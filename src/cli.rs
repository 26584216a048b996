use clap::{Parser, Subcommand};

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

#[derive(Parser, Debug)]
#[command(name = "findmycure-backend")]
#[command(about = "FindMyCure Italia backend (SQLite + Axum)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the search pages and the HTTP API.
    Serve(ServeArgs),
    /// Load regional facility registries into the store, one batch at a time.
    Load(LoadArgs),
    /// Geocode facilities that still lack coordinates.
    Geocode(GeocodeArgs),
    /// Import a wide-format ratings CSV (facility rows, specialty columns).
    ImportRatings(RatingsArgs),
    /// Compare a wide-format ratings CSV against the store without writing.
    CompareRatings(RatingsArgs),
    /// Export current ratings to a wide-format CSV.
    ExportRatings(RatingsArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Backend data directory (SQLite database and source CSVs).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,
}

#[derive(clap::Args, Debug, Clone)]
pub struct LoadArgs {
    /// Backend data directory (SQLite database and source CSVs).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Batch of region sources to load (0-based). Defaults to batch 0.
    #[arg(long)]
    pub batch: Option<usize>,

    /// Load every batch in sequence instead of a single one.
    #[arg(long)]
    pub all: bool,

    /// Do not download missing source files; error instead.
    #[arg(long)]
    pub offline: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GeocodeArgs {
    /// Backend data directory (SQLite database and source CSVs).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Facilities to attempt in this run.
    #[arg(long, default_value_t = 25)]
    pub count: usize,

    /// Global request start rate against the geocoding API.
    ///
    /// Nominatim usage policy:
    /// https://operations.osmfoundation.org/policies/nominatim/
    #[arg(long, default_value_t = 1)]
    pub requests_per_second: u32,

    /// Max retry attempts for transient API failures.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Max concurrent in-flight lookups.
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,

    /// Geocoding API base URL.
    #[arg(long, default_value = crate::geocoder::DEFAULT_BASE_URL)]
    pub base_url: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RatingsArgs {
    /// Backend data directory (SQLite database and source CSVs).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Ratings CSV path.
    pub csv: std::path::PathBuf,
}
