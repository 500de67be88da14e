//! Range checks for collection-point readings supplied by the device
//! location provider. Readings are validated once, at batch creation.

use crate::model::GeoPoint;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("accuracy {0} must be non-negative")]
    NegativeAccuracy(f64),
}

/// Accepts any finite reading within WGS84 bounds. Accuracy has no upper
/// bound; a coarse fix is still a valid fix.
pub fn validate(geo: &GeoPoint) -> Result<(), GeoError> {
    if !geo.latitude.is_finite() || !(-90.0..=90.0).contains(&geo.latitude) {
        return Err(GeoError::LatitudeOutOfRange(geo.latitude));
    }
    if !geo.longitude.is_finite() || !(-180.0..=180.0).contains(&geo.longitude) {
        return Err(GeoError::LongitudeOutOfRange(geo.longitude));
    }
    if !geo.accuracy_m.is_finite() || geo.accuracy_m < 0.0 {
        return Err(GeoError::NegativeAccuracy(geo.accuracy_m));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo(latitude: f64, longitude: f64, accuracy_m: f64) -> GeoPoint {
        GeoPoint {
            latitude,
            longitude,
            accuracy_m,
        }
    }

    #[test]
    fn accepts_in_range_readings() {
        assert_eq!(validate(&geo(26.92, 75.79, 5.0)), Ok(()));
        assert_eq!(validate(&geo(-90.0, 180.0, 0.0)), Ok(()));
        // Coarse fixes are fine
        assert_eq!(validate(&geo(0.0, 0.0, 12_000.0)), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        assert_eq!(
            validate(&geo(95.0, 75.79, 3.0)),
            Err(GeoError::LatitudeOutOfRange(95.0))
        );
        assert_eq!(
            validate(&geo(-90.01, 0.0, 3.0)),
            Err(GeoError::LatitudeOutOfRange(-90.01))
        );
    }

    #[test]
    fn rejects_out_of_range_longitude() {
        assert_eq!(
            validate(&geo(0.0, 180.5, 3.0)),
            Err(GeoError::LongitudeOutOfRange(180.5))
        );
    }

    #[test]
    fn rejects_negative_accuracy() {
        assert_eq!(
            validate(&geo(0.0, 0.0, -1.0)),
            Err(GeoError::NegativeAccuracy(-1.0))
        );
    }

    #[test]
    fn rejects_non_finite_values() {
        assert!(validate(&geo(f64::NAN, 0.0, 1.0)).is_err());
        assert!(validate(&geo(0.0, f64::INFINITY, 1.0)).is_err());
        assert!(validate(&geo(0.0, 0.0, f64::NAN)).is_err());
    }
}
