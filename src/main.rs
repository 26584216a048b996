mod cli;
mod compare;
mod geo;
mod geocoder;
mod loader;
mod locations;
mod ratings;
mod search;
mod server;
mod sources;
mod specialty;
mod storage;
mod store;
mod views;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = cli::Args::parse();

    match args.cmd {
        cli::Command::Serve(cmd) => server::run(cmd).await.context("serve failed"),
        cli::Command::Load(cmd) => loader::run(cmd).await.context("load failed"),
        cli::Command::Geocode(cmd) => geocoder::run(cmd).await.context("geocode failed"),
        cli::Command::ImportRatings(cmd) => {
            ratings::run_import(cmd).context("import-ratings failed")
        }
        cli::Command::CompareRatings(cmd) => {
            compare::run(cmd).context("compare-ratings failed")
        }
        cli::Command::ExportRatings(cmd) => {
            ratings::run_export(cmd).context("export-ratings failed")
        }
    }
}
