//! Read-only reconciliation of a ratings CSV against the store, used to
//! validate a correction file before importing it. Nothing here mutates.

use anyhow::Result;
use serde::Serialize;

use crate::ratings::RatingsFile;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    pub facility: String,
    pub city: Option<String>,
    pub specialty: String,
    pub csv_value: f64,
    /// None when the pair is missing from the store entirely.
    pub stored_value: Option<f64>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CompareReport {
    pub rows_checked: u64,
    pub ratings_checked: u64,
    pub matching: u64,
    pub facilities_not_found: Vec<String>,
    pub specialties_not_found: Vec<String>,
    pub discrepancies: Vec<Discrepancy>,
}

impl CompareReport {
    pub fn is_clean(&self) -> bool {
        self.facilities_not_found.is_empty()
            && self.specialties_not_found.is_empty()
            && self.discrepancies.is_empty()
    }
}

pub fn run(args: crate::cli::RatingsArgs) -> Result<()> {
    use anyhow::Context;

    let paths = crate::storage::StoragePaths::new(&args.data_dir);
    let store = Store::open(&paths.db_path)?;

    let file = std::fs::File::open(&args.csv)
        .with_context(|| format!("open {}", args.csv.display()))?;
    let parsed = crate::ratings::parse_ratings_csv(file)?;
    let report = compare_ratings(&store, &parsed)?;

    println!(
        "rows={} ratings={} matching={} discrepancies={} facilities_not_found={} specialties_not_found={}",
        report.rows_checked,
        report.ratings_checked,
        report.matching,
        report.discrepancies.len(),
        report.facilities_not_found.len(),
        report.specialties_not_found.len()
    );
    for d in report.discrepancies.iter().take(50) {
        println!(
            "  {} ({}) / {}: csv={} db={}",
            d.facility,
            d.city.as_deref().unwrap_or("-"),
            d.specialty,
            d.csv_value,
            d.stored_value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "missing".to_string())
        );
    }
    if report.discrepancies.len() > 50 {
        println!("  ... and {} more", report.discrepancies.len() - 50);
    }
    if report.is_clean() {
        println!("database matches the CSV");
    }
    Ok(())
}

pub fn compare_ratings(store: &Store, file: &RatingsFile) -> Result<CompareReport> {
    let mut report = CompareReport::default();

    let mut specialty_ids: Vec<Option<i64>> = Vec::with_capacity(file.specialties.len());
    for header in &file.specialties {
        let id = store.specialty_id_by_name(header)?;
        if id.is_none() && !report.specialties_not_found.contains(header) {
            report.specialties_not_found.push(header.clone());
        }
        specialty_ids.push(id);
    }

    for row in &file.rows {
        report.rows_checked += 1;
        let Some(facility_id) = store.find_facility(&row.facility_name, row.city.as_deref())?
        else {
            report.facilities_not_found.push(row.facility_name.clone());
            continue;
        };

        for (pos, csv_value) in &row.ratings {
            let Some(specialty_id) = specialty_ids[*pos] else {
                continue;
            };
            report.ratings_checked += 1;
            let stored = store.rating_for(facility_id, specialty_id)?;
            match stored {
                Some(v) if (v - csv_value).abs() < 1e-6 => report.matching += 1,
                other => report.discrepancies.push(Discrepancy {
                    facility: row.facility_name.clone(),
                    city: row.city.clone(),
                    specialty: file.specialties[*pos].clone(),
                    csv_value: *csv_value,
                    stored_value: other,
                }),
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::{import_ratings, parse_ratings_csv};
    use crate::store::NewFacility;

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_facility(&NewFacility {
                name: "Ospedale San Paolo".into(),
                city: "Bari".into(),
                region: Some("Puglia".into()),
                ..Default::default()
            })
            .unwrap();
        store.get_or_create_specialty("Cardiologia").unwrap();
        store.get_or_create_specialty("Ortopedia").unwrap();
        store
    }

    #[test]
    fn import_then_compare_reports_no_discrepancies() {
        let mut store = seeded_store();
        let csv = "\
Name of the facility,City,Cardiologia,Ortopedia
Ospedale San Paolo,Bari,\"4,5\",3.0
";
        let file = parse_ratings_csv(csv.as_bytes()).unwrap();
        let report = import_ratings(&mut store, &file).unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.facilities_not_found, 0);

        let cmp = compare_ratings(&store, &file).unwrap();
        assert!(cmp.is_clean(), "{cmp:?}");
        assert_eq!(cmp.matching, 2);
    }

    #[test]
    fn out_of_band_change_is_reported() {
        let mut store = seeded_store();
        let csv = "\
Name of the facility,City,Cardiologia
Ospedale San Paolo,Bari,4.5
";
        let file = parse_ratings_csv(csv.as_bytes()).unwrap();
        import_ratings(&mut store, &file).unwrap();

        let fid = store.find_facility("Ospedale San Paolo", Some("Bari")).unwrap().unwrap();
        let sid = store.specialty_id_by_name("Cardiologia").unwrap().unwrap();
        store.upsert_rating(fid, sid, 2.0).unwrap();

        let cmp = compare_ratings(&store, &file).unwrap();
        assert_eq!(cmp.discrepancies.len(), 1);
        assert_eq!(cmp.discrepancies[0].stored_value, Some(2.0));
        assert_eq!(cmp.discrepancies[0].csv_value, 4.5);
    }

    #[test]
    fn unknown_facility_and_specialty_are_listed_not_fatal() {
        let store = seeded_store();
        let csv = "\
Name of the facility,City,Cardiologia,Astrologia
Ospedale Fantasma,Nessuno,4.0,3.0
";
        let file = parse_ratings_csv(csv.as_bytes()).unwrap();
        let cmp = compare_ratings(&store, &file).unwrap();
        assert_eq!(cmp.facilities_not_found, vec!["Ospedale Fantasma"]);
        assert_eq!(cmp.specialties_not_found, vec!["Astrologia"]);
        assert!(!cmp.is_clean());
    }
}
