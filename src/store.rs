//! Facility store: an embedded SQLite database holding regions, facilities,
//! specialties and the per-specialty quality ratings.
//!
//! Every write path that can hit a unique constraint goes through an
//! `ON CONFLICT ... DO UPDATE` upsert, so re-running a loader batch or
//! importing a corrected ratings file can never abort on a duplicate key.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value};
use serde::Serialize;

use crate::specialty::fold;

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS region (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS specialty (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS facility (
    id             INTEGER PRIMARY KEY,
    name           TEXT NOT NULL,
    address        TEXT,
    city           TEXT NOT NULL DEFAULT '',
    region_id      INTEGER REFERENCES region(id),
    facility_type  TEXT,
    telephone      TEXT,
    email          TEXT,
    website        TEXT,
    latitude       REAL,
    longitude      REAL,
    geocoded       INTEGER NOT NULL DEFAULT 0,
    geocode_failed INTEGER NOT NULL DEFAULT 0,
    quality_score  REAL,
    data_source    TEXT,
    attribution    TEXT,
    UNIQUE (name, city)
);

CREATE INDEX IF NOT EXISTS idx_facility_region ON facility(region_id);
CREATE INDEX IF NOT EXISTS idx_facility_geocoded ON facility(geocoded);

CREATE TABLE IF NOT EXISTS facility_specialty (
    facility_id    INTEGER NOT NULL REFERENCES facility(id),
    specialty_id   INTEGER NOT NULL REFERENCES specialty(id),
    quality_rating REAL NOT NULL,
    PRIMARY KEY (facility_id, specialty_id)
);

CREATE TABLE IF NOT EXISTS load_progress (
    source_key     TEXT PRIMARY KEY,
    loaded_at_unix INTEGER NOT NULL,
    added          INTEGER NOT NULL,
    updated        INTEGER NOT NULL,
    skipped        INTEGER NOT NULL
);
"#;

#[derive(Debug, Default, Clone)]
pub struct NewFacility {
    pub name: String,
    pub city: String,
    pub region: Option<String>,
    pub facility_type: Option<String>,
    pub address: Option<String>,
    pub telephone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub data_source: Option<String>,
    pub attribution: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacilityRow {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub facility_type: Option<String>,
    pub telephone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Default, Clone)]
pub struct FacilityFilter {
    pub name_contains: Option<String>,
    pub region: Option<String>,
    pub min_quality: Option<f64>,
    /// Canonical specialty names; a facility matches when it has a rating in
    /// any of them.
    pub specialties: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingUpsert {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapPoint {
    pub name: String,
    pub address: Option<String>,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub quality_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub facilities: u64,
    pub regions: u64,
    pub specialties: u64,
    pub ratings: u64,
    pub geocode_attempted: u64,
    pub with_coordinates: u64,
    pub geocode_failed: u64,
}

#[derive(Debug, Clone)]
pub struct GeocodeCandidate {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub city: String,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("initialize schema")?;
        Ok(())
    }

    /// Run `f` inside a single transaction; rolls back on error.
    pub fn with_tx<T>(&mut self, f: impl FnOnce(&Store) -> Result<T>) -> Result<T> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .context("begin transaction")?;
        match f(self) {
            Ok(v) => {
                self.conn.execute_batch("COMMIT").context("commit")?;
                Ok(v)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub fn get_or_create_region(&self, name: &str) -> Result<i64> {
        let id = self
            .conn
            .query_row(
                "INSERT INTO region (name) VALUES (?1)
                 ON CONFLICT(name) DO UPDATE SET name = excluded.name
                 RETURNING id",
                params![name],
                |row| row.get(0),
            )
            .with_context(|| format!("get or create region {name}"))?;
        Ok(id)
    }

    /// `name` must already be canonical (see `specialty::canonicalize`).
    pub fn get_or_create_specialty(&self, name: &str) -> Result<i64> {
        let id = self
            .conn
            .query_row(
                "INSERT INTO specialty (name) VALUES (?1)
                 ON CONFLICT(name) DO UPDATE SET name = excluded.name
                 RETURNING id",
                params![name],
                |row| row.get(0),
            )
            .with_context(|| format!("get or create specialty {name}"))?;
        Ok(id)
    }

    /// Insert or refresh a facility keyed on (name, city). Returns the row id
    /// and whether the row was newly created. Coordinates and the quality
    /// cache are never clobbered by a re-load.
    pub fn upsert_facility(&self, f: &NewFacility) -> Result<(i64, bool)> {
        let region_id = match f.region.as_deref() {
            Some(r) => Some(self.get_or_create_region(r)?),
            None => None,
        };

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM facility WHERE name = ?1 AND city = ?2",
                params![f.name, f.city],
                |row| row.get(0),
            )
            .optional()
            .context("look up facility by (name, city)")?;

        let id: i64 = self
            .conn
            .query_row(
                r#"
                INSERT INTO facility
                  (name, address, city, region_id, facility_type,
                   telephone, email, website, data_source, attribution)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(name, city) DO UPDATE SET
                  address       = excluded.address,
                  region_id     = excluded.region_id,
                  facility_type = excluded.facility_type,
                  telephone     = excluded.telephone,
                  email         = excluded.email,
                  website       = excluded.website,
                  data_source   = excluded.data_source,
                  attribution   = excluded.attribution
                RETURNING id
                "#,
                params![
                    f.name,
                    f.address,
                    f.city,
                    region_id,
                    f.facility_type,
                    f.telephone,
                    f.email,
                    f.website,
                    f.data_source,
                    f.attribution
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("upsert facility {} ({})", f.name, f.city))?;

        Ok((id, existing.is_none()))
    }

    /// Upsert one (facility, specialty) rating; the caller is responsible for
    /// clamping the value into [1.0, 5.0] first.
    pub fn upsert_rating(
        &self,
        facility_id: i64,
        specialty_id: i64,
        rating: f64,
    ) -> Result<RatingUpsert> {
        let existing: Option<f64> = self
            .conn
            .query_row(
                "SELECT quality_rating FROM facility_specialty
                 WHERE facility_id = ?1 AND specialty_id = ?2",
                params![facility_id, specialty_id],
                |row| row.get(0),
            )
            .optional()
            .context("look up existing rating")?;

        self.conn
            .execute(
                "INSERT INTO facility_specialty (facility_id, specialty_id, quality_rating)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(facility_id, specialty_id) DO UPDATE SET
                   quality_rating = excluded.quality_rating",
                params![facility_id, specialty_id, rating],
            )
            .with_context(|| format!("upsert rating for facility {facility_id}"))?;

        Ok(match existing {
            None => RatingUpsert::Created,
            Some(v) if (v - rating).abs() < 1e-9 => RatingUpsert::Unchanged,
            Some(_) => RatingUpsert::Updated,
        })
    }

    pub fn rating_for(&self, facility_id: i64, specialty_id: i64) -> Result<Option<f64>> {
        let v = self
            .conn
            .query_row(
                "SELECT quality_rating FROM facility_specialty
                 WHERE facility_id = ?1 AND specialty_id = ?2",
                params![facility_id, specialty_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v)
    }

    /// Recompute the cached aggregate score from current rating rows.
    /// The aggregation rule lives here and nowhere else.
    pub fn refresh_quality_score(&self, facility_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE facility SET quality_score =
                   (SELECT AVG(quality_rating) FROM facility_specialty
                    WHERE facility_id = ?1)
                 WHERE id = ?1",
                params![facility_id],
            )
            .context("refresh quality score")?;
        Ok(())
    }

    /// Locate a facility for a ratings row. Exact (name, city) match first,
    /// then a contains-match on the name; a name that matches more than one
    /// facility without a city to disambiguate resolves to None.
    pub fn find_facility(&self, name: &str, city: Option<&str>) -> Result<Option<i64>> {
        let (sql, values): (&str, Vec<Value>) = match city {
            Some(c) => (
                "SELECT id FROM facility
                 WHERE name = ?1 COLLATE NOCASE AND city = ?2 COLLATE NOCASE
                 LIMIT 2",
                vec![Value::from(name.to_string()), Value::from(c.to_string())],
            ),
            None => (
                "SELECT id FROM facility WHERE name = ?1 COLLATE NOCASE LIMIT 2",
                vec![Value::from(name.to_string())],
            ),
        };
        let ids = self.query_ids(sql, &values)?;
        if ids.len() == 1 {
            return Ok(Some(ids[0]));
        }
        if !ids.is_empty() {
            return Ok(None); // ambiguous
        }

        // Fall back to substring match on the name.
        let (sql, values): (&str, Vec<Value>) = match city {
            Some(c) => (
                "SELECT id FROM facility
                 WHERE name LIKE '%' || ?1 || '%' AND city = ?2 COLLATE NOCASE
                 LIMIT 2",
                vec![Value::from(name.to_string()), Value::from(c.to_string())],
            ),
            None => (
                "SELECT id FROM facility WHERE name LIKE '%' || ?1 || '%' LIMIT 2",
                vec![Value::from(name.to_string())],
            ),
        };
        let ids = self.query_ids(sql, &values)?;
        Ok(if ids.len() == 1 { Some(ids[0]) } else { None })
    }

    fn query_ids(&self, sql: &str, values: &[Value]) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<usize, i64>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn list_regions(&self) -> Result<Vec<String>> {
        self.query_strings("SELECT name FROM region ORDER BY name ASC")
    }

    pub fn list_specialties(&self) -> Result<Vec<String>> {
        self.query_strings("SELECT name FROM specialty ORDER BY name ASC")
    }

    fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<usize, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Specialty id for a stored name, compared in folded space so e.g. a CSV
    /// header "cardiologia" finds "Cardiologia".
    pub fn specialty_id_by_name(&self, name: &str) -> Result<Option<i64>> {
        let folded = fold(name);
        let mut stmt = self.conn.prepare("SELECT id, name FROM specialty")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<usize, i64>(0)?, row.get::<usize, String>(1)?))
        })?;
        for r in rows {
            let (id, stored) = r?;
            if fold(&stored) == folded {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// The Search Service's sole read path: relational predicates only;
    /// distance filtering and ordering happen on the returned rows.
    pub fn facilities_matching(&self, filter: &FacilityFilter) -> Result<Vec<FacilityRow>> {
        let mut where_sql = String::from("WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(text) = filter.name_contains.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            values.push(Value::from(text.to_string()));
            where_sql.push_str(&format!(" AND f.name LIKE '%' || ?{} || '%'", values.len()));
        }
        if let Some(region) = filter.region.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            values.push(Value::from(region.to_string()));
            where_sql.push_str(&format!(" AND r.name = ?{} COLLATE NOCASE", values.len()));
        }
        if let Some(min_quality) = filter.min_quality {
            values.push(Value::from(min_quality));
            where_sql.push_str(&format!(" AND f.quality_score >= ?{}", values.len()));
        }
        if let Some(specialties) = filter.specialties.as_ref().filter(|s| !s.is_empty()) {
            let mut placeholders = Vec::new();
            for name in specialties {
                values.push(Value::from(name.clone()));
                placeholders.push(format!("?{}", values.len()));
            }
            where_sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM facility_specialty fs
                              JOIN specialty s ON s.id = fs.specialty_id
                              WHERE fs.facility_id = f.id AND s.name IN ({}))",
                placeholders.join(",")
            ));
        }

        let sql = format!(
            r#"
            SELECT
              f.id, f.name, f.address, f.city, r.name, f.facility_type,
              f.telephone, f.email, f.website, f.latitude, f.longitude,
              f.quality_score
            FROM facility f
            LEFT JOIN region r ON r.id = f.region_id
            {where_sql}
            ORDER BY f.name ASC
            "#
        );

        let mut stmt = self.conn.prepare(&sql).context("prepare facility query")?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(FacilityRow {
                id: row.get(0)?,
                name: row.get(1)?,
                address: row.get(2)?,
                city: row.get(3)?,
                region: row.get(4)?,
                facility_type: row.get(5)?,
                telephone: row.get(6)?,
                email: row.get(7)?,
                website: row.get(8)?,
                latitude: row.get(9)?,
                longitude: row.get(10)?,
                quality_score: row.get(11)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Rows for the density heatmap: facilities with coordinates, optionally
    /// annotated with their rating in one specialty.
    pub fn heatmap_points(&self, specialty: Option<&str>) -> Result<Vec<HeatmapPoint>> {
        let specialty_id = match specialty {
            Some(name) => self.specialty_id_by_name(name)?,
            None => None,
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.name, f.address, f.city, f.latitude, f.longitude,
                   f.quality_score, fs.quality_rating
            FROM facility f
            LEFT JOIN facility_specialty fs
              ON fs.facility_id = f.id AND fs.specialty_id = ?1
            WHERE f.latitude IS NOT NULL AND f.longitude IS NOT NULL
            ORDER BY f.name ASC
            "#,
        )?;
        let rows = stmt.query_map(params![specialty_id], |row| {
            Ok(HeatmapPoint {
                name: row.get(0)?,
                address: row.get(1)?,
                city: row.get(2)?,
                latitude: row.get(3)?,
                longitude: row.get(4)?,
                quality_rating: row.get(5)?,
                specialty_rating: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            facilities: self.count("SELECT COUNT(*) FROM facility")?,
            regions: self.count("SELECT COUNT(*) FROM region")?,
            specialties: self.count("SELECT COUNT(*) FROM specialty")?,
            ratings: self.count("SELECT COUNT(*) FROM facility_specialty")?,
            geocode_attempted: self.count("SELECT COUNT(*) FROM facility WHERE geocoded = 1")?,
            with_coordinates: self.count(
                "SELECT COUNT(*) FROM facility
                 WHERE latitude IS NOT NULL AND longitude IS NOT NULL",
            )?,
            geocode_failed: self.count("SELECT COUNT(*) FROM facility WHERE geocode_failed = 1")?,
        })
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let v: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(v.max(0) as u64)
    }

    pub fn pending_geocode(&self, limit: usize) -> Result<Vec<GeocodeCandidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, address, city FROM facility
             WHERE geocoded = 0
             ORDER BY id ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(GeocodeCandidate {
                id: row.get(0)?,
                name: row.get(1)?,
                address: row.get(2)?,
                city: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn mark_geocoded(&self, facility_id: i64, lat: f64, lon: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE facility SET latitude = ?2, longitude = ?3,
             geocoded = 1, geocode_failed = 0 WHERE id = ?1",
            params![facility_id, lat, lon],
        )?;
        Ok(())
    }

    pub fn mark_geocode_failed(&self, facility_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE facility SET geocoded = 1, geocode_failed = 1 WHERE id = ?1",
            params![facility_id],
        )?;
        Ok(())
    }

    pub fn record_load(&self, source_key: &str, added: u64, updated: u64, skipped: u64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO load_progress (source_key, loaded_at_unix, added, updated, skipped)
                 VALUES (?1, strftime('%s', 'now'), ?2, ?3, ?4)
                 ON CONFLICT(source_key) DO UPDATE SET
                   loaded_at_unix = excluded.loaded_at_unix,
                   added = excluded.added,
                   updated = excluded.updated,
                   skipped = excluded.skipped",
                params![source_key, added as i64, updated as i64, skipped as i64],
            )
            .context("record load progress")?;
        Ok(())
    }

    pub fn loaded_sources(&self) -> Result<Vec<String>> {
        self.query_strings("SELECT source_key FROM load_progress ORDER BY source_key ASC")
    }

    /// All ratings joined with facility and specialty names, ordered for a
    /// stable export.
    pub fn ratings_snapshot(&self) -> Result<Vec<(String, String, String, f64)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.name, f.city, s.name, fs.quality_rating
            FROM facility_specialty fs
            JOIN facility f ON f.id = fs.facility_id
            JOIN specialty s ON s.id = fs.specialty_id
            ORDER BY f.name ASC, f.city ASC, s.name ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<usize, String>(0)?,
                row.get::<usize, String>(1)?,
                row.get::<usize, String>(2)?,
                row.get::<usize, f64>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facility(name: &str, city: &str, address: &str) -> NewFacility {
        NewFacility {
            name: name.to_string(),
            city: city.to_string(),
            address: Some(address.to_string()),
            region: Some("Puglia".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_facility_updates_in_place() {
        let store = Store::open_in_memory().unwrap();

        let (id1, created) = store
            .upsert_facility(&facility("Ospedale San Paolo", "Bari", "Via Vecchia 1"))
            .unwrap();
        assert!(created);

        let (id2, created) = store
            .upsert_facility(&facility("Ospedale San Paolo", "Bari", "Via Nuova 2"))
            .unwrap();
        assert!(!created);
        assert_eq!(id1, id2);

        let rows = store.facilities_matching(&FacilityFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address.as_deref(), Some("Via Nuova 2"));
    }

    #[test]
    fn same_name_different_city_stays_distinct() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_facility(&facility("Ospedale San Giovanni", "Roma", "A"))
            .unwrap();
        store
            .upsert_facility(&facility("Ospedale San Giovanni", "Torino", "B"))
            .unwrap();
        let rows = store.facilities_matching(&FacilityFilter::default()).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn duplicate_rating_pair_in_one_batch_keeps_last_value() {
        let mut store = Store::open_in_memory().unwrap();
        let (fid, _) = store
            .upsert_facility(&facility("Policlinico", "Bari", "Piazza Giulio Cesare 11"))
            .unwrap();

        let result = store.with_tx(|s| {
            let sid = s.get_or_create_specialty("Cardiologia")?;
            s.upsert_rating(fid, sid, 3.2)?;
            let outcome = s.upsert_rating(fid, sid, 4.1)?;
            s.refresh_quality_score(fid)?;
            Ok(outcome)
        });
        assert_eq!(result.unwrap(), RatingUpsert::Updated);

        let sid = store.specialty_id_by_name("Cardiologia").unwrap().unwrap();
        assert_eq!(store.rating_for(fid, sid).unwrap(), Some(4.1));
        assert_eq!(store.stats().unwrap().ratings, 1);
    }

    #[test]
    fn quality_score_is_mean_of_ratings() {
        let store = Store::open_in_memory().unwrap();
        let (fid, _) = store.upsert_facility(&facility("Clinica", "Lecce", "Via Roma 1")).unwrap();
        let cardio = store.get_or_create_specialty("Cardiologia").unwrap();
        let orto = store.get_or_create_specialty("Ortopedia").unwrap();
        store.upsert_rating(fid, cardio, 4.0).unwrap();
        store.upsert_rating(fid, orto, 3.0).unwrap();
        store.refresh_quality_score(fid).unwrap();

        let rows = store.facilities_matching(&FacilityFilter::default()).unwrap();
        assert!((rows[0].quality_score.unwrap() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn min_quality_excludes_unscored_facilities() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_facility(&facility("Senza Punteggio", "Bari", "X")).unwrap();
        let (fid, _) = store.upsert_facility(&facility("Con Punteggio", "Bari", "Y")).unwrap();
        let sid = store.get_or_create_specialty("Cardiologia").unwrap();
        store.upsert_rating(fid, sid, 4.5).unwrap();
        store.refresh_quality_score(fid).unwrap();

        let filter = FacilityFilter {
            min_quality: Some(4.0),
            ..Default::default()
        };
        let rows = store.facilities_matching(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Con Punteggio");
    }

    #[test]
    fn specialty_filter_requires_a_rating_row() {
        let store = Store::open_in_memory().unwrap();
        let (with, _) = store.upsert_facility(&facility("Con Cardiologia", "Bari", "A")).unwrap();
        store.upsert_facility(&facility("Senza Cardiologia", "Bari", "B")).unwrap();
        let sid = store.get_or_create_specialty("Cardiologia").unwrap();
        store.upsert_rating(with, sid, 4.0).unwrap();

        let filter = FacilityFilter {
            specialties: Some(vec!["Cardiologia".to_string()]),
            ..Default::default()
        };
        let rows = store.facilities_matching(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Con Cardiologia");
    }

    #[test]
    fn get_or_create_specialty_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store.get_or_create_specialty("Cardiologia").unwrap();
        let b = store.get_or_create_specialty("Cardiologia").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stats().unwrap().specialties, 1);
    }

    #[test]
    fn geocode_progress_is_monotonic() {
        let store = Store::open_in_memory().unwrap();
        let (a, _) = store.upsert_facility(&facility("A", "Bari", "X")).unwrap();
        let (b, _) = store.upsert_facility(&facility("B", "Bari", "Y")).unwrap();

        assert_eq!(store.pending_geocode(10).unwrap().len(), 2);
        store.mark_geocoded(a, 41.1, 16.8).unwrap();
        store.mark_geocode_failed(b).unwrap();
        // both attempted: neither comes back as pending
        assert!(store.pending_geocode(10).unwrap().is_empty());

        let stats = store.stats().unwrap();
        assert_eq!(stats.geocode_attempted, 2);
        assert_eq!(stats.with_coordinates, 1);
        assert_eq!(stats.geocode_failed, 1);
    }
}
