const EARTH_RADIUS_KM: f64 = 6371.0;

pub const DEFAULT_RADIUS_KM: f64 = 30.0;
pub const MIN_RADIUS_KM: f64 = 5.0;
pub const MAX_RADIUS_KM: f64 = 300.0;

/// Great-circle distance between two (lat, lon) points in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn clamp_radius_km(radius: Option<f64>) -> f64 {
    match radius {
        Some(r) if r.is_finite() => r.clamp(MIN_RADIUS_KM, MAX_RADIUS_KM),
        _ => DEFAULT_RADIUS_KM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_same_point() {
        let d = haversine_km(45.4642, 9.19, 45.4642, 9.19);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn milan_to_rome_is_about_477_km() {
        // Duomo di Milano -> Colosseo
        let d = haversine_km(45.4642, 9.19, 41.8902, 12.4922);
        assert!((d - 477.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn radius_clamping() {
        assert_eq!(clamp_radius_km(None), DEFAULT_RADIUS_KM);
        assert_eq!(clamp_radius_km(Some(1.0)), MIN_RADIUS_KM);
        assert_eq!(clamp_radius_km(Some(1000.0)), MAX_RADIUS_KM);
        assert_eq!(clamp_radius_km(Some(42.5)), 42.5);
        assert_eq!(clamp_radius_km(Some(f64::NAN)), DEFAULT_RADIUS_KM);
    }
}
