//! Batch ingestion of regional facility registries into the store.
//!
//! One invocation loads one batch of region sources (see `sources::batch`),
//! so callers can chunk the full load across repeated requests. Malformed
//! rows are skipped and counted; nothing a single row does can abort the
//! surrounding batch.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::ratings::parse_rating_cell;
use crate::sources::{self, RegionSource};
use crate::specialty;
use crate::storage::{StoragePaths, file_present_nonempty};
use crate::store::{NewFacility, RatingUpsert, Store};

#[derive(Debug, Default, Clone, Serialize)]
pub struct RegionReport {
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub ratings_created: u64,
    pub ratings_updated: u64,
}

impl RegionReport {
    fn absorb(&mut self, other: &RegionReport) {
        self.added += other.added;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.ratings_created += other.ratings_created;
        self.ratings_updated += other.ratings_updated;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub region: String,
    #[serde(flatten)]
    pub report: RegionReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub batch: usize,
    pub batches_total: usize,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub sources: Vec<SourceOutcome>,
}

pub async fn run(args: crate::cli::LoadArgs) -> Result<()> {
    let paths = StoragePaths::new(&args.data_dir);
    let mut store = Store::open(&paths.db_path)?;
    let client = reqwest::Client::new();

    let batches: Vec<usize> = if args.all {
        (0..sources::batch_count()).collect()
    } else {
        vec![args.batch.unwrap_or(0)]
    };

    let mut reports = Vec::new();
    for batch_index in batches {
        let report = load_batch(&mut store, &paths, &client, batch_index, args.offline).await;
        println!(
            "batch {}/{}: added={} updated={} skipped={} errors={}",
            report.batch + 1,
            report.batches_total,
            report.added,
            report.updated,
            report.skipped,
            report.errors
        );
        reports.push(report);
    }

    let summary_path = paths.data_dir.join("load_report.json");
    let json = serde_json::to_string_pretty(&reports).context("serialize load report")?;
    std::fs::write(&summary_path, json)
        .with_context(|| format!("write {}", summary_path.display()))?;
    tracing::info!("wrote {}", summary_path.display());
    Ok(())
}

/// Load one batch of region sources. Source-level failures (missing file,
/// unreadable CSV) are reported in the counts, never raised.
pub async fn load_batch(
    store: &mut Store,
    paths: &StoragePaths,
    client: &reqwest::Client,
    batch_index: usize,
    offline: bool,
) -> LoadReport {
    let mut report = LoadReport {
        batch: batch_index,
        batches_total: sources::batch_count(),
        added: 0,
        updated: 0,
        skipped: 0,
        errors: 0,
        sources: Vec::new(),
    };

    for source in sources::batch(batch_index) {
        let outcome = match load_source(store, paths, client, source, offline).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("loading {} failed: {e:#}", source.key);
                RegionReport {
                    errors: 1,
                    ..Default::default()
                }
            }
        };
        report.added += outcome.added;
        report.updated += outcome.updated;
        report.skipped += outcome.skipped;
        report.errors += outcome.errors;
        report.sources.push(SourceOutcome {
            source: source.key.to_string(),
            region: source.region_name.to_string(),
            report: outcome,
        });
    }

    report
}

async fn load_source(
    store: &mut Store,
    paths: &StoragePaths,
    client: &reqwest::Client,
    source: &RegionSource,
    offline: bool,
) -> Result<RegionReport> {
    let path = ensure_source_file(client, paths, source, offline).await?;
    let file = std::fs::File::open(&path).with_context(|| format!("open {}", path.display()))?;
    let reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let report = load_region(store, source, reader)?;
    store.record_load(source.key, report.added, report.updated, report.skipped)?;
    tracing::info!(
        "{}: added={} updated={} skipped={} errors={}",
        source.key,
        report.added,
        report.updated,
        report.skipped,
        report.errors
    );
    Ok(report)
}

/// Make the source CSV available in the data dir: reuse an existing file,
/// download it when the portal offers a direct URL, or seed the bundled
/// sample as a last resort.
pub async fn ensure_source_file(
    client: &reqwest::Client,
    paths: &StoragePaths,
    source: &RegionSource,
    offline: bool,
) -> Result<PathBuf> {
    paths.ensure_dirs().context("create data directories")?;
    let dest = paths.source_csv(source.file_name);
    if file_present_nonempty(&dest) {
        return Ok(dest);
    }

    if let Some(url) = source.url {
        if offline {
            return Err(anyhow!(
                "missing input at {} (run without --offline to download from {url})",
                dest.display()
            ));
        }
        download_csv(client, url, &dest).await?;
        return Ok(dest);
    }

    tracing::info!(
        "no download configured for {}; seeding bundled sample to {}",
        source.key,
        dest.display()
    );
    std::fs::write(&dest, source.sample).with_context(|| format!("write {}", dest.display()))?;
    Ok(dest)
}

async fn download_csv(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let tmp = dest.with_file_name(format!(
        "{}.part",
        dest.file_name().and_then(|s| s.to_str()).unwrap_or("download")
    ));

    tracing::info!("Downloading {} -> {}", url, dest.display());
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;
    if !resp.status().is_success() {
        return Err(anyhow!("download failed ({}): {}", resp.status(), url));
    }

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;
    let mut stream = resp.bytes_stream();
    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("read body chunk from {url}"))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))?;
    Ok(())
}

/// Apply one region's rows to the store inside a single transaction.
///
/// Beyond the mapped columns, any header the specialty table recognizes is
/// treated as a rating column (the merged registry + ratings layout used by
/// correction files), and its numeric cells become rating upserts.
pub fn load_region<R: Read>(
    store: &mut Store,
    source: &RegionSource,
    mut reader: csv::Reader<R>,
) -> Result<RegionReport> {
    let headers = reader.headers().context("read CSV header")?.clone();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, h) in headers.iter().enumerate() {
        index.insert(h.trim().to_string(), i);
    }

    let cols = &source.columns;
    let mapped: Vec<&str> = [
        Some(cols.name),
        cols.facility_type,
        cols.address,
        cols.city,
        cols.telephone,
        cols.email,
        cols.website,
        cols.specialties,
    ]
    .into_iter()
    .flatten()
    .collect();

    // Unmapped headers that normalize to a known specialty carry ratings.
    let mut rating_columns: Vec<(usize, String)> = Vec::new();
    for (h, i) in &index {
        if mapped.contains(&h.as_str()) {
            continue;
        }
        if let Some(canonical) = specialty::canonical_if_known(h) {
            rating_columns.push((*i, canonical));
        }
    }
    rating_columns.sort_by_key(|(i, _)| *i);

    let mut records: Vec<csv::StringRecord> = Vec::new();
    let mut report = RegionReport::default();
    for record in reader.records() {
        match record {
            Ok(r) => records.push(r),
            Err(e) => {
                tracing::warn!("{}: unreadable row skipped: {e}", source.key);
                report.skipped += 1;
            }
        }
    }

    let tx_report = store.with_tx(|s| {
        let mut rep = RegionReport::default();
        for record in &records {
            match load_row(s, source, &index, &rating_columns, record) {
                Ok(RowOutcome::Added(r)) => {
                    rep.added += 1;
                    rep.absorb(&r);
                }
                Ok(RowOutcome::Updated(r)) => {
                    rep.updated += 1;
                    rep.absorb(&r);
                }
                Ok(RowOutcome::Skipped) => rep.skipped += 1,
                Err(e) => {
                    tracing::warn!("{}: row failed: {e:#}", source.key);
                    rep.errors += 1;
                }
            }
        }
        Ok(rep)
    })?;

    report.absorb(&tx_report);
    Ok(report)
}

enum RowOutcome {
    Added(RegionReport),
    Updated(RegionReport),
    Skipped,
}

fn load_row(
    store: &Store,
    source: &RegionSource,
    index: &HashMap<String, usize>,
    rating_columns: &[(usize, String)],
    record: &csv::StringRecord,
) -> Result<RowOutcome> {
    let get = |col: Option<&str>| -> Option<String> {
        col.and_then(|c| index.get(c))
            .and_then(|i| record.get(*i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let cols = &source.columns;
    let Some(name) = get(Some(cols.name)) else {
        return Ok(RowOutcome::Skipped);
    };
    let city = get(cols.city).unwrap_or_default();

    let facility = NewFacility {
        name,
        city,
        region: Some(source.region_name.to_string()),
        facility_type: get(cols.facility_type)
            .or_else(|| cols.default_type.map(str::to_string)),
        address: get(cols.address),
        telephone: get(cols.telephone),
        email: get(cols.email),
        website: get(cols.website),
        data_source: Some(source.data_source.to_string()),
        attribution: Some(source.attribution.to_string()),
    };

    let (facility_id, created) = store.upsert_facility(&facility)?;

    // Grow the specialty dictionary from the offered-specialties cell; these
    // carry no rating of their own.
    if let Some(cell) = get(cols.specialties) {
        for specialty_name in specialty::split_cell(&cell) {
            store.get_or_create_specialty(&specialty_name)?;
        }
    }

    let mut rep = RegionReport::default();
    let mut touched = false;
    for (col_idx, canonical) in rating_columns {
        let Some(raw) = record.get(*col_idx).map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        let Some(rating) = parse_rating_cell(raw) else {
            tracing::warn!(
                "{}: ignoring non-numeric rating {raw:?} for {canonical}",
                source.key
            );
            rep.skipped += 1;
            continue;
        };
        let specialty_id = store.get_or_create_specialty(canonical)?;
        match store.upsert_rating(facility_id, specialty_id, rating)? {
            RatingUpsert::Created => rep.ratings_created += 1,
            RatingUpsert::Updated => rep.ratings_updated += 1,
            RatingUpsert::Unchanged => {}
        }
        touched = true;
    }
    if touched {
        store.refresh_quality_score(facility_id)?;
    }

    Ok(if created {
        RowOutcome::Added(rep)
    } else {
        RowOutcome::Updated(rep)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SOURCES;
    use crate::store::FacilityFilter;

    fn puglia() -> &'static RegionSource {
        SOURCES.iter().find(|s| s.key == "puglia").unwrap()
    }

    fn reader(csv_text: &str) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(csv_text.as_bytes())
    }

    #[test]
    fn sample_data_loads_with_counts() {
        let mut store = Store::open_in_memory().unwrap();
        let report = load_region(&mut store, puglia(), reader(puglia().sample)).unwrap();
        assert_eq!(report.added, 9);
        assert_eq!(report.updated, 0);
        assert_eq!(report.errors, 0);

        // specialties were collected from the BRANCHEAUTORIZZATE cells
        let specialties = store.list_specialties().unwrap();
        assert!(specialties.contains(&"Cardiologia".to_string()));
        assert!(specialties.contains(&"Analisi Cliniche".to_string()));
    }

    #[test]
    fn reload_updates_rather_than_duplicating() {
        let mut store = Store::open_in_memory().unwrap();
        load_region(&mut store, puglia(), reader(puglia().sample)).unwrap();

        let corrected = "\
DENOMSTRUTTURA,TIPOLOGIASTRUTTURA,INDIRIZZO,COMUNE,TELEFONO,BRANCHEAUTORIZZATE
Ospedale San Paolo,Ospedale,Via Corretta 99,Bari,080 5555123,Cardiologia
";
        let report = load_region(&mut store, puglia(), reader(corrected)).unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.updated, 1);

        let rows = store
            .facilities_matching(&FacilityFilter {
                name_contains: Some("San Paolo".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address.as_deref(), Some("Via Corretta 99"));
    }

    #[test]
    fn rows_without_a_name_are_skipped() {
        let mut store = Store::open_in_memory().unwrap();
        let text = "\
DENOMSTRUTTURA,TIPOLOGIASTRUTTURA,INDIRIZZO,COMUNE,TELEFONO,BRANCHEAUTORIZZATE
,Ospedale,Via X 1,Bari,080 1,Cardiologia
Ospedale Valido,Ospedale,Via Y 2,Bari,080 2,Pediatria
";
        let report = load_region(&mut store, puglia(), reader(text)).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn rating_columns_upsert_and_duplicate_headers_do_not_abort() {
        let mut store = Store::open_in_memory().unwrap();
        // "Cardiologia" and "Cardio" both normalize to Cardiologia: the same
        // (facility, specialty) key is written twice per row and the batch
        // must still succeed with the later column winning.
        let text = "\
DENOMSTRUTTURA,COMUNE,Cardiologia,Cardio,Pediatria
Ospedale Uno,Bari,\"3,5\",4.2,4.0
Ospedale Due,Taranto,2.0,,\"4,8\"
Ospedale Tre,Brindisi,9.9,,abc
Ospedale Quattro,Lecce,4.4,,
Ospedale Cinque,Foggia,3.3,,3.1
";
        let report = load_region(&mut store, puglia(), reader(text)).unwrap();
        assert_eq!(report.added, 5);
        assert_eq!(report.errors, 0);
        // the non-numeric "abc" cell was skipped, not stored
        assert_eq!(report.skipped, 1);

        let cardio = store.specialty_id_by_name("Cardiologia").unwrap().unwrap();
        let uno = store.find_facility("Ospedale Uno", Some("Bari")).unwrap().unwrap();
        // later duplicate column wins
        assert_eq!(store.rating_for(uno, cardio).unwrap(), Some(4.2));

        // 9.9 was clamped into range, never stored verbatim
        let tre = store.find_facility("Ospedale Tre", Some("Brindisi")).unwrap().unwrap();
        assert_eq!(store.rating_for(tre, cardio).unwrap(), Some(5.0));
    }
}
