//! Wide-format ratings CSV handling.
//!
//! The format: first column `Name of the facility`, an optional `City`
//! column, then one column per specialty; cells are ratings in [1.0, 5.0]
//! written with either `.` or `,` as the decimal separator. Blank and
//! non-numeric cells are ignored; numeric values outside the range are
//! clamped, never stored raw.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::specialty::fold;
use crate::store::{RatingUpsert, Store};

pub const NAME_HEADER: &str = "Name of the facility";
pub const CITY_HEADER: &str = "City";

pub const RATING_MIN: f64 = 1.0;
pub const RATING_MAX: f64 = 5.0;

/// Parse one rating cell. `None` for non-numeric content; numeric values are
/// clamped into [RATING_MIN, RATING_MAX].
pub fn parse_rating_cell(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".");
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(RATING_MIN, RATING_MAX))
}

#[derive(Debug, Clone)]
pub struct RatingsRow {
    pub facility_name: String,
    pub city: Option<String>,
    /// (specialty column index into `RatingsFile::specialties`, rating)
    pub ratings: Vec<(usize, f64)>,
    /// Cells that held non-numeric content.
    pub ignored_cells: u64,
}

#[derive(Debug, Clone)]
pub struct RatingsFile {
    /// Specialty column headers, as written in the file.
    pub specialties: Vec<String>,
    pub rows: Vec<RatingsRow>,
}

pub fn parse_ratings_csv<R: Read>(reader: R) -> Result<RatingsFile> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers().context("read ratings CSV header")?.clone();

    let mut name_idx: Option<usize> = None;
    let mut city_idx: Option<usize> = None;
    let mut specialty_cols: Vec<(usize, String)> = Vec::new();
    for (i, h) in headers.iter().enumerate() {
        let h = h.trim();
        if fold(h) == fold(NAME_HEADER) {
            name_idx = Some(i);
        } else if fold(h) == fold(CITY_HEADER) {
            city_idx = Some(i);
        } else if !h.is_empty() {
            specialty_cols.push((i, h.to_string()));
        }
    }
    let name_idx = name_idx.ok_or_else(|| {
        anyhow!("ratings CSV must have a '{NAME_HEADER}' column, got: {headers:?}")
    })?;

    let specialties: Vec<String> = specialty_cols.iter().map(|(_, h)| h.clone()).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.context("read ratings CSV row")?;
        let Some(facility_name) = record
            .get(name_idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let city = city_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let mut ratings = Vec::new();
        let mut ignored_cells = 0u64;
        for (pos, (col_idx, _)) in specialty_cols.iter().enumerate() {
            let Some(raw) = record.get(*col_idx).map(str::trim).filter(|s| !s.is_empty())
            else {
                continue;
            };
            match parse_rating_cell(raw) {
                Some(v) => ratings.push((pos, v)),
                None => ignored_cells += 1,
            }
        }

        rows.push(RatingsRow {
            facility_name,
            city,
            ratings,
            ignored_cells,
        });
    }

    Ok(RatingsFile { specialties, rows })
}

pub fn run_import(args: crate::cli::RatingsArgs) -> Result<()> {
    let paths = crate::storage::StoragePaths::new(&args.data_dir);
    let mut store = Store::open(&paths.db_path)?;

    let file = std::fs::File::open(&args.csv)
        .with_context(|| format!("open {}", args.csv.display()))?;
    let parsed = parse_ratings_csv(file)?;
    tracing::info!(
        "importing ratings for {} facilities across {} specialty columns",
        parsed.rows.len(),
        parsed.specialties.len()
    );

    let report = import_ratings(&mut store, &parsed)?;
    println!(
        "processed={} created={} updated={} unchanged={} skipped_cells={} \
         facilities_not_found={} specialties_not_found={}",
        report.processed,
        report.created,
        report.updated,
        report.unchanged,
        report.skipped_cells,
        report.facilities_not_found,
        report.specialties_not_found
    );
    Ok(())
}

pub fn run_export(args: crate::cli::RatingsArgs) -> Result<()> {
    let paths = crate::storage::StoragePaths::new(&args.data_dir);
    let store = Store::open(&paths.db_path)?;
    let rows = export_ratings(&store, &args.csv)?;
    println!("exported {rows} facility rows to {}", args.csv.display());
    Ok(())
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportReport {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped_cells: u64,
    pub facilities_not_found: u64,
    pub specialties_not_found: u64,
}

/// Apply a ratings file to the store in one transaction. Rows naming unknown
/// facilities and columns naming unknown specialties are counted, not fatal.
/// Aggregate scores are refreshed for every touched facility.
pub fn import_ratings(store: &mut Store, file: &RatingsFile) -> Result<ImportReport> {
    // Resolve specialty columns against the stored dictionary once.
    let mut specialty_ids: Vec<Option<i64>> = Vec::with_capacity(file.specialties.len());
    for header in &file.specialties {
        specialty_ids.push(store.specialty_id_by_name(header)?);
    }

    store.with_tx(|s| {
        let mut report = ImportReport::default();
        for row in &file.rows {
            report.processed += 1;
            report.skipped_cells += row.ignored_cells;

            let Some(facility_id) = s.find_facility(&row.facility_name, row.city.as_deref())?
            else {
                tracing::warn!("facility not found: {} ({:?})", row.facility_name, row.city);
                report.facilities_not_found += 1;
                continue;
            };

            let mut touched = false;
            for (pos, rating) in &row.ratings {
                let Some(specialty_id) = specialty_ids[*pos] else {
                    report.specialties_not_found += 1;
                    continue;
                };
                match s.upsert_rating(facility_id, specialty_id, *rating)? {
                    RatingUpsert::Created => report.created += 1,
                    RatingUpsert::Updated => report.updated += 1,
                    RatingUpsert::Unchanged => report.unchanged += 1,
                }
                touched = true;
            }
            if touched {
                s.refresh_quality_score(facility_id)?;
            }
        }
        Ok(report)
    })
}

/// Write the store's ratings back out in the same wide format, via a temp
/// file swapped into place.
pub fn export_ratings(store: &Store, output_path: &Path) -> Result<u64> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let file_name = output_path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("ratings.csv");
    let tmp_path = output_path.with_file_name(format!("{file_name}.tmp"));

    let snapshot = store.ratings_snapshot()?;
    let mut specialties: Vec<String> = Vec::new();
    for (_, _, specialty, _) in &snapshot {
        if !specialties.contains(specialty) {
            specialties.push(specialty.clone());
        }
    }
    specialties.sort();

    let mut writer = csv::Writer::from_path(&tmp_path)
        .with_context(|| format!("create {}", tmp_path.display()))?;
    let mut header = vec![NAME_HEADER.to_string(), CITY_HEADER.to_string()];
    header.extend(specialties.iter().cloned());
    writer.write_record(&header).context("write header")?;

    // snapshot is ordered by (facility, city, specialty); emit one row per
    // facility with its ratings spread across the specialty columns.
    let mut rows = 0u64;
    let mut current: Option<(String, String, Vec<String>)> = None;
    for (facility, city, specialty, rating) in snapshot {
        let needs_flush = current
            .as_ref()
            .map(|(f, c, _)| *f != facility || *c != city)
            .unwrap_or(false);
        if needs_flush {
            if let Some((f, c, cells)) = current.take() {
                write_row(&mut writer, &f, &c, &cells)?;
                rows += 1;
            }
        }
        let entry = current.get_or_insert_with(|| {
            (facility.clone(), city.clone(), vec![String::new(); specialties.len()])
        });
        if let Some(pos) = specialties.iter().position(|s| *s == specialty) {
            entry.2[pos] = format!("{rating:.1}");
        }
    }
    if let Some((f, c, cells)) = current.take() {
        write_row(&mut writer, &f, &c, &cells)?;
        rows += 1;
    }
    writer.flush().context("flush ratings CSV")?;
    drop(writer);

    std::fs::rename(&tmp_path, output_path).with_context(|| {
        format!("move {} to {}", tmp_path.display(), output_path.display())
    })?;
    Ok(rows)
}

fn write_row<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    facility: &str,
    city: &str,
    cells: &[String],
) -> Result<()> {
    let mut record = vec![facility.to_string(), city.to_string()];
    record.extend(cells.iter().cloned());
    writer.write_record(&record).context("write ratings row")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_cells_accept_both_decimal_separators() {
        assert_eq!(parse_rating_cell("3.7"), Some(3.7));
        assert_eq!(parse_rating_cell("3,7"), Some(3.7));
        assert_eq!(parse_rating_cell(" 4 "), Some(4.0));
        assert_eq!(parse_rating_cell("n/a"), None);
        assert_eq!(parse_rating_cell(""), None);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(parse_rating_cell("0.2"), Some(1.0));
        assert_eq!(parse_rating_cell("7,5"), Some(5.0));
        assert_eq!(parse_rating_cell("-3"), Some(1.0));
    }

    #[test]
    fn parse_wide_csv() {
        let text = "\
Name of the facility,City,Cardiologia,Ortopedia
Ospedale San Paolo,Bari,\"4,5\",3.0
Policlinico di Bari,Bari,,4.8
Sconosciuto,Altrove,x,
";
        let file = parse_ratings_csv(text.as_bytes()).unwrap();
        assert_eq!(file.specialties, vec!["Cardiologia", "Ortopedia"]);
        assert_eq!(file.rows.len(), 3);
        assert_eq!(file.rows[0].ratings, vec![(0, 4.5), (1, 3.0)]);
        assert_eq!(file.rows[1].ratings, vec![(1, 4.8)]);
        assert_eq!(file.rows[2].ratings, vec![]);
        assert_eq!(file.rows[2].ignored_cells, 1);
    }

    #[test]
    fn header_without_name_column_is_rejected() {
        let text = "Facility,Cardiologia\nA,4.0\n";
        assert!(parse_ratings_csv(text.as_bytes()).is_err());
    }

    #[test]
    fn export_round_trips_through_compare() {
        use crate::compare::compare_ratings;
        use crate::store::NewFacility;

        let mut store = Store::open_in_memory().unwrap();
        for (name, city) in [("Ospedale San Paolo", "Bari"), ("Policlinico di Bari", "Bari")] {
            store
                .upsert_facility(&NewFacility {
                    name: name.to_string(),
                    city: city.to_string(),
                    region: Some("Puglia".to_string()),
                    ..Default::default()
                })
                .unwrap();
        }
        store.get_or_create_specialty("Cardiologia").unwrap();
        store.get_or_create_specialty("Ortopedia").unwrap();

        let csv = "\
Name of the facility,City,Cardiologia,Ortopedia
Ospedale San Paolo,Bari,4.5,3.0
Policlinico di Bari,Bari,4.8,
";
        let parsed = parse_ratings_csv(csv.as_bytes()).unwrap();
        import_ratings(&mut store, &parsed).unwrap();

        let out = std::env::temp_dir().join(format!("ratings-export-{}.csv", std::process::id()));
        let rows = export_ratings(&store, &out).unwrap();
        assert_eq!(rows, 2);

        let exported = std::fs::File::open(&out).unwrap();
        let reparsed = parse_ratings_csv(exported).unwrap();
        let report = compare_ratings(&store, &reparsed).unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.matching, 3);

        let _ = std::fs::remove_file(&out);
    }
}
