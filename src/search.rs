//! Search execution: translate request parameters into store predicates, a
//! great-circle distance post-filter, and a deterministic ordering.

use anyhow::Result;
use serde::Serialize;

use crate::geo;
use crate::geocoder::Geocoder;
use crate::locations;
use crate::specialty::{self, SpecialtyMatch};
use crate::store::{FacilityFilter, FacilityRow, Store};

pub const DEFAULT_LIMIT: usize = 200;
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    QualityDesc,
    QualityAsc,
    NameAsc,
    NameDesc,
    CityAsc,
    CityDesc,
}

impl SortBy {
    pub fn parse(s: Option<&str>) -> SortBy {
        match s.unwrap_or("quality_desc").to_ascii_lowercase().as_str() {
            "quality_asc" => SortBy::QualityAsc,
            "name_asc" => SortBy::NameAsc,
            "name_desc" => SortBy::NameDesc,
            "city_asc" => SortBy::CityAsc,
            "city_desc" => SortBy::CityDesc,
            _ => SortBy::QualityDesc,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SearchRequest {
    pub query_text: Option<String>,
    pub specialty: Option<String>,
    pub region: Option<String>,
    pub min_quality: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,
    pub sort_by: SortBy,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacilityHit {
    #[serde(flatten)]
    pub facility: FacilityRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SearchOutcome {
    pub facilities: Vec<FacilityHit>,
    /// Matches before the result cap was applied.
    pub total_matching: usize,
    /// None when no specialty filter was given; Some(false) means the term
    /// matched no canonical specialty (distinct from zero facilities).
    pub specialty_matched: Option<bool>,
    pub matched_specialties: Vec<String>,
    /// None when the request implied no location at all.
    pub location_resolved: Option<bool>,
    pub origin_latitude: Option<f64>,
    pub origin_longitude: Option<f64>,
    pub radius_km: Option<f64>,
    /// Geo filter active and empty, while the non-geo predicates do match
    /// facilities elsewhere.
    pub no_results_in_range: bool,
}

/// What the request's free text and coordinates resolved to. Produced before
/// the store is touched so the geocoding round trip happens outside any lock.
#[derive(Debug, Default, Clone)]
pub struct LocationResolution {
    pub origin: Option<(f64, f64)>,
    pub inferred_region: Option<String>,
    /// None: the request implied no location. Some(false): it did, and
    /// resolution failed — the search silently degrades to non-geo filters.
    pub resolved: Option<bool>,
    /// Free text to match against facility names instead.
    pub name_filter: Option<String>,
}

pub async fn resolve_location(
    req: &SearchRequest,
    geocoder: Option<&Geocoder>,
) -> LocationResolution {
    if let (Some(lat), Some(lon)) = (req.latitude, req.longitude) {
        return LocationResolution {
            origin: Some((lat, lon)),
            resolved: Some(true),
            ..Default::default()
        };
    }

    let Some(text) = req.query_text.as_deref().map(str::trim).filter(|s| !s.is_empty())
    else {
        return LocationResolution::default();
    };

    let looks_geographic = locations::is_address_query(text) || locations::is_known_city(text);
    if !looks_geographic {
        return LocationResolution {
            name_filter: Some(text.to_string()),
            ..Default::default()
        };
    }

    let inferred_region = locations::region_for_city(text).map(str::to_string);
    let origin = match geocoder {
        Some(g) => match g.lookup(&format!("{text}, Italy")).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("location resolution failed for {text:?}: {e:#}");
                None
            }
        },
        None => None,
    };

    LocationResolution {
        resolved: Some(origin.is_some()),
        origin,
        inferred_region,
        name_filter: None,
    }
}

/// Run the search against the store. `loc` comes from `resolve_location`.
pub fn execute(store: &Store, req: &SearchRequest, loc: &LocationResolution) -> Result<SearchOutcome> {
    let mut outcome = SearchOutcome {
        location_resolved: loc.resolved,
        ..Default::default()
    };

    // Specialty term -> set of canonical names. A term that matches nothing
    // short-circuits: that is a different answer than "no facilities".
    let mut specialties: Option<Vec<String>> = None;
    if let Some(term) = req.specialty.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let known = store.list_specialties()?;
        match specialty::resolve_term(term, &known) {
            SpecialtyMatch::Names(names) => {
                outcome.specialty_matched = Some(true);
                outcome.matched_specialties = names.clone();
                specialties = Some(names);
            }
            SpecialtyMatch::None => {
                outcome.specialty_matched = Some(false);
                return Ok(outcome);
            }
        }
    }

    // An explicit geo origin supersedes the region inferred from free text.
    let region = req
        .region
        .clone()
        .or_else(|| {
            if loc.origin.is_none() {
                loc.inferred_region.clone()
            } else {
                None
            }
        });

    let filter = FacilityFilter {
        name_contains: loc.name_filter.clone(),
        region,
        min_quality: req.min_quality.filter(|q| *q > 0.0),
        specialties,
    };
    let candidates = store.facilities_matching(&filter)?;
    let candidates_exist = !candidates.is_empty();

    let mut hits: Vec<FacilityHit> = match loc.origin {
        Some((olat, olon)) => {
            let radius = geo::clamp_radius_km(req.radius_km);
            outcome.origin_latitude = Some(olat);
            outcome.origin_longitude = Some(olon);
            outcome.radius_km = Some(radius);
            candidates
                .into_iter()
                .filter_map(|f| {
                    let (lat, lon) = match (f.latitude, f.longitude) {
                        (Some(lat), Some(lon)) => (lat, lon),
                        _ => return None, // no coordinates: out of scope for radius search
                    };
                    let d = geo::haversine_km(olat, olon, lat, lon);
                    if d <= radius {
                        Some(FacilityHit {
                            facility: f,
                            distance_km: Some(d),
                        })
                    } else {
                        None
                    }
                })
                .collect()
        }
        None => candidates
            .into_iter()
            .map(|f| FacilityHit {
                facility: f,
                distance_km: None,
            })
            .collect(),
    };

    let geo_active = loc.origin.is_some();
    outcome.no_results_in_range = geo_active && hits.is_empty() && candidates_exist;

    sort_hits(&mut hits, req.sort_by, geo_active);

    outcome.total_matching = hits.len();
    let limit = req.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    hits.truncate(limit);
    outcome.facilities = hits;
    Ok(outcome)
}

/// Distance ascending is the implicit primary key when a geo filter is
/// active; the requested order applies within equal distances. Facilities
/// without an aggregate score sort last regardless of direction, and name
/// ascending breaks every remaining tie.
fn sort_hits(hits: &mut [FacilityHit], sort_by: SortBy, geo_active: bool) {
    hits.sort_by(|a, b| {
        use std::cmp::Ordering;

        if geo_active {
            let da = a.distance_km.unwrap_or(f64::MAX);
            let db = b.distance_km.unwrap_or(f64::MAX);
            match da.partial_cmp(&db).unwrap_or(Ordering::Equal) {
                Ordering::Equal => {}
                other => return other,
            }
        }

        let ordered = match sort_by {
            SortBy::QualityDesc => cmp_quality(a, b, true),
            SortBy::QualityAsc => cmp_quality(a, b, false),
            SortBy::NameAsc => cmp_text(&a.facility.name, &b.facility.name),
            SortBy::NameDesc => cmp_text(&b.facility.name, &a.facility.name),
            SortBy::CityAsc => cmp_text(&a.facility.city, &b.facility.city),
            SortBy::CityDesc => cmp_text(&b.facility.city, &a.facility.city),
        };
        ordered.then_with(|| cmp_text(&a.facility.name, &b.facility.name))
    });
}

fn cmp_quality(a: &FacilityHit, b: &FacilityHit, descending: bool) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.facility.quality_score, b.facility.quality_score) {
        (Some(qa), Some(qb)) => {
            let ord = qa.partial_cmp(&qb).unwrap_or(Ordering::Equal);
            if descending { ord.reverse() } else { ord }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_text(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewFacility;

    // Bari city centre and two points at known offsets.
    const BARI: (f64, f64) = (41.1171, 16.8719);
    const TARANTO: (f64, f64) = (40.4686, 17.2403);
    const MILANO: (f64, f64) = (45.4642, 9.19);

    fn add_facility(
        store: &Store,
        name: &str,
        city: &str,
        region: &str,
        coords: Option<(f64, f64)>,
        ratings: &[(&str, f64)],
    ) -> i64 {
        let (id, _) = store
            .upsert_facility(&NewFacility {
                name: name.to_string(),
                city: city.to_string(),
                region: Some(region.to_string()),
                ..Default::default()
            })
            .unwrap();
        if let Some((lat, lon)) = coords {
            store.mark_geocoded(id, lat, lon).unwrap();
        }
        for (specialty, rating) in ratings {
            let sid = store.get_or_create_specialty(specialty).unwrap();
            store.upsert_rating(id, sid, *rating).unwrap();
        }
        store.refresh_quality_score(id).unwrap();
        id
    }

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        add_facility(
            &store,
            "Policlinico di Bari",
            "Bari",
            "Puglia",
            Some(BARI),
            &[("Cardiologia", 4.5), ("Neurologia", 4.1)],
        );
        add_facility(
            &store,
            "Ospedale Santa Maria",
            "Taranto",
            "Puglia",
            Some(TARANTO),
            &[("Cardiologia", 3.2)],
        );
        add_facility(
            &store,
            "Centro Senza Dati",
            "Bari",
            "Puglia",
            Some((41.12, 16.87)),
            &[],
        );
        add_facility(
            &store,
            "Ospedale Niguarda",
            "Milano",
            "Lombardia",
            Some(MILANO),
            &[("Cardiologia", 4.8)],
        );
        add_facility(
            &store,
            "Clinica Senza Coordinate",
            "Bari",
            "Puglia",
            None,
            &[("Cardiologia", 4.9)],
        );
        store
    }

    fn run(store: &Store, req: &SearchRequest) -> SearchOutcome {
        let loc = block_on(resolve_location(req, None));
        execute(store, req, &loc).unwrap()
    }

    // resolve_location without a geocoder never awaits anything real.
    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn quality_desc_sorts_unscored_last() {
        let store = seeded();
        let outcome = run(&store, &SearchRequest::default());
        let names: Vec<&str> = outcome
            .facilities
            .iter()
            .map(|h| h.facility.name.as_str())
            .collect();
        assert_eq!(names.last(), Some(&"Centro Senza Dati"));
        let scores: Vec<Option<f64>> = outcome
            .facilities
            .iter()
            .map(|h| h.facility.quality_score)
            .collect();
        for pair in scores.windows(2) {
            if let (Some(a), Some(b)) = (pair[0], pair[1]) {
                assert!(a >= b);
            }
        }
    }

    #[test]
    fn unscored_sorts_last_for_ascending_too() {
        let store = seeded();
        let outcome = run(
            &store,
            &SearchRequest {
                sort_by: SortBy::QualityAsc,
                ..Default::default()
            },
        );
        let names: Vec<&str> = outcome
            .facilities
            .iter()
            .map(|h| h.facility.name.as_str())
            .collect();
        assert_eq!(names.last(), Some(&"Centro Senza Dati"));
    }

    #[test]
    fn specialty_with_min_quality_excludes_unrated() {
        let store = seeded();
        let outcome = run(
            &store,
            &SearchRequest {
                specialty: Some("Cardiologia".to_string()),
                min_quality: Some(4.0),
                ..Default::default()
            },
        );
        assert_eq!(outcome.specialty_matched, Some(true));
        let names: Vec<&str> = outcome
            .facilities
            .iter()
            .map(|h| h.facility.name.as_str())
            .collect();
        // aggregate >= 4.0 AND a Cardiologia rating; the unrated facility and
        // the 3.2 facility are out
        assert!(names.contains(&"Policlinico di Bari"));
        assert!(names.contains(&"Ospedale Niguarda"));
        assert!(names.contains(&"Clinica Senza Coordinate"));
        assert!(!names.contains(&"Centro Senza Dati"));
        assert!(!names.contains(&"Ospedale Santa Maria"));
    }

    #[test]
    fn unknown_specialty_is_distinct_from_zero_results() {
        let store = seeded();
        let outcome = run(
            &store,
            &SearchRequest {
                specialty: Some("Pasticceria".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(outcome.specialty_matched, Some(false));
        assert!(outcome.facilities.is_empty());
        assert!(!outcome.no_results_in_range);
    }

    #[test]
    fn radius_filter_is_inclusive_at_the_boundary() {
        let store = seeded();
        let exact = geo::haversine_km(BARI.0, BARI.1, TARANTO.0, TARANTO.1);
        let outcome = run(
            &store,
            &SearchRequest {
                latitude: Some(BARI.0),
                longitude: Some(BARI.1),
                radius_km: Some(exact),
                ..Default::default()
            },
        );
        let names: Vec<&str> = outcome
            .facilities
            .iter()
            .map(|h| h.facility.name.as_str())
            .collect();
        assert!(names.contains(&"Ospedale Santa Maria"), "{names:?}");
        // everything returned is inside the radius
        for hit in &outcome.facilities {
            assert!(hit.distance_km.unwrap() <= exact + 1e-9);
        }
        // facilities without coordinates are excluded from radius search
        assert!(!names.contains(&"Clinica Senza Coordinate"));
    }

    #[test]
    fn distance_is_the_primary_sort_under_a_geo_filter() {
        let store = seeded();
        let outcome = run(
            &store,
            &SearchRequest {
                latitude: Some(BARI.0),
                longitude: Some(BARI.1),
                radius_km: Some(300.0),
                sort_by: SortBy::QualityDesc,
                ..Default::default()
            },
        );
        let dists: Vec<f64> = outcome
            .facilities
            .iter()
            .map(|h| h.distance_km.unwrap())
            .collect();
        for pair in dists.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn empty_radius_sets_the_no_results_in_range_flag() {
        let store = seeded();
        let outcome = run(
            &store,
            &SearchRequest {
                specialty: Some("Cardiologia".to_string()),
                latitude: Some(MILANO.0),
                longitude: Some(MILANO.1),
                radius_km: Some(10.0),
                ..Default::default()
            },
        );
        // Niguarda is in range, so narrow the search to Puglia to empty it
        let outcome_empty = run(
            &store,
            &SearchRequest {
                specialty: Some("Cardiologia".to_string()),
                region: Some("Puglia".to_string()),
                latitude: Some(MILANO.0),
                longitude: Some(MILANO.1),
                radius_km: Some(10.0),
                ..Default::default()
            },
        );
        assert!(!outcome.facilities.is_empty());
        assert!(outcome_empty.facilities.is_empty());
        assert!(outcome_empty.no_results_in_range);
    }

    #[test]
    fn city_text_infers_region_when_geocoding_is_unavailable() {
        let store = seeded();
        let req = SearchRequest {
            query_text: Some("Milano".to_string()),
            ..Default::default()
        };
        let loc = block_on(resolve_location(&req, None));
        assert_eq!(loc.resolved, Some(false));
        assert_eq!(loc.inferred_region.as_deref(), Some("Lombardia"));

        let outcome = execute(&store, &req, &loc).unwrap();
        assert_eq!(outcome.location_resolved, Some(false));
        let names: Vec<&str> = outcome
            .facilities
            .iter()
            .map(|h| h.facility.name.as_str())
            .collect();
        assert_eq!(names, vec!["Ospedale Niguarda"]);
    }

    #[test]
    fn plain_text_matches_facility_names() {
        let store = seeded();
        let outcome = run(
            &store,
            &SearchRequest {
                query_text: Some("Policlinico".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(outcome.facilities.len(), 1);
        assert_eq!(outcome.facilities[0].facility.name, "Policlinico di Bari");
        assert_eq!(outcome.location_resolved, None);
    }

    #[test]
    fn result_cap_is_applied() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            add_facility(&store, &format!("Ospedale {i:02}"), "Bari", "Puglia", None, &[]);
        }
        let outcome = run(
            &store,
            &SearchRequest {
                limit: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(outcome.facilities.len(), 3);
        assert_eq!(outcome.total_matching, 10);
    }
}
