//! Core types for the location subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting values outside [-90,90] / [-180,180].
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
            Some(Self { latitude, longitude })
        } else {
            None
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// How a location was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationSource {
    Sensor,
    Cache,
    Home,
    Default,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor => write!(f, "Sensor"),
            Self::Cache => write!(f, "Cache"),
            Self::Home => write!(f, "Home"),
            Self::Default => write!(f, "Default"),
        }
    }
}

/// Advisory precision of a geocoded result. Never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Accuracy {
    High,
    Medium,
    Corrected,
    #[default]
    Unknown,
}

/// An immutable snapshot of a resolved place.
///
/// The `with_*` helpers return a new value instead of mutating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub coordinate: Coordinate,
    pub formatted_address: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub source: LocationSource,
    pub accuracy: Accuracy,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedLocation {
    /// A location that only knows its coordinate.
    pub fn bare(coordinate: Coordinate, source: LocationSource) -> Self {
        Self {
            coordinate,
            formatted_address: coordinate.to_string(),
            city: None,
            region: None,
            country: None,
            postal_code: None,
            source,
            accuracy: Accuracy::Unknown,
            resolved_at: Utc::now(),
        }
    }

    pub fn with_source(&self, source: LocationSource) -> Self {
        Self { source, ..self.clone() }
    }

    pub fn with_city(&self, city: &str, accuracy: Accuracy) -> Self {
        Self {
            city: Some(city.to_string()),
            accuracy,
            ..self.clone()
        }
    }

    /// Short human label: city when known, otherwise the address.
    pub fn label(&self) -> &str {
        self.city.as_deref().unwrap_or(&self.formatted_address)
    }
}

/// A pickup/return station. Reference data, read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub address: String,
    pub coordinate: Coordinate,
}

/// A station annotated with its distance from some origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStation {
    #[serde(flatten)]
    pub station: Station,
    pub distance_km: f64,
    pub estimated_travel_minutes: f64,
}

/// Radius and count limits for station ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankOptions {
    pub max_distance_km: f64,
    pub limit: usize,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            max_distance_km: 100.0,
            limit: 5,
        }
    }
}

/// Why a resolution is less than a full live fix.
///
/// Sensor failures mean the default location was used. `GeocoderFailed`
/// accompanies a live fix whose address lookup degraded to coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    SensorUnavailable,
    PermissionDenied,
    Timeout,
    GeocoderFailed,
}

impl From<&LocationError> for FallbackReason {
    fn from(err: &LocationError) -> Self {
        match err {
            LocationError::Unavailable => Self::SensorUnavailable,
            LocationError::PermissionDenied => Self::PermissionDenied,
            LocationError::Timeout => Self::Timeout,
            LocationError::Provider(_) => Self::GeocoderFailed,
        }
    }
}

/// The result handed to callers: a location plus the stations around it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub location: ResolvedLocation,
    pub nearby_stations: Vec<RankedStation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FallbackReason>,
}

/// Location acquisition and geocoding errors.
///
/// These never reach callers of the resolver; they select the fallback path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location sensor unavailable")]
    Unavailable,
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location request timed out")]
    Timeout,
    #[error("geocoding provider error: {0}")]
    Provider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_range_checked() {
        assert!(Coordinate::new(49.4875, 8.4660).is_some());
        assert!(Coordinate::new(90.0, -180.0).is_some());
        assert!(Coordinate::new(90.1, 0.0).is_none());
        assert!(Coordinate::new(0.0, 180.5).is_none());
    }

    #[test]
    fn test_coordinate_display_rounds_to_four_places() {
        let c = Coordinate::new(52.520008, 13.404954).unwrap();
        assert_eq!(c.to_string(), "52.5200, 13.4050");
    }

    #[test]
    fn test_with_helpers_do_not_touch_original() {
        let c = Coordinate::new(49.0, 8.0).unwrap();
        let loc = ResolvedLocation::bare(c, LocationSource::Sensor);
        let renamed = loc.with_city("Mannheim", Accuracy::Corrected);
        assert_eq!(loc.city, None);
        assert_eq!(renamed.city.as_deref(), Some("Mannheim"));
        assert_eq!(renamed.accuracy, Accuracy::Corrected);
        assert_eq!(renamed.with_source(LocationSource::Home).source, LocationSource::Home);
    }

    #[test]
    fn test_fallback_reason_from_error() {
        assert_eq!(FallbackReason::from(&LocationError::Timeout), FallbackReason::Timeout);
        assert_eq!(
            FallbackReason::from(&LocationError::Provider("x".into())),
            FallbackReason::GeocoderFailed
        );
    }
}
