//! Smart location resolver: orchestrates the fallback chain.
//!
//! Flow:  current (7-day cache) → home → sensor + reverse geocode → default
//!
//! The first tier that yields a location wins; nothing is retried within a
//! call. Whatever the outcome, the result carries the nearest stations.

use super::cache::{LocationCache, Slot};
use super::providers::ReverseGeocoder;
use super::ranking;
use super::sensor::{acquire_with_timeout, PositionAcquirer, SensorOptions};
use super::types::{
    Accuracy, Coordinate, FallbackReason, LocationSource, RankOptions, RankedStation, Resolution,
    ResolvedLocation, Station,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// The hardcoded location used when no real fix is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultLocation {
    pub city: String,
    pub address: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for DefaultLocation {
    fn default() -> Self {
        Self {
            city: "Mannheim".into(),
            address: "Paradeplatz, 68161 Mannheim, Germany".into(),
            region: Some("Baden-Württemberg".into()),
            country: Some("Germany".into()),
            postal_code: Some("68161".into()),
            latitude: 49.4875,
            longitude: 8.4660,
        }
    }
}

impl DefaultLocation {
    fn to_resolved(&self) -> ResolvedLocation {
        ResolvedLocation {
            coordinate: Coordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            formatted_address: self.address.clone(),
            city: Some(self.city.clone()),
            region: self.region.clone(),
            country: self.country.clone(),
            postal_code: self.postal_code.clone(),
            source: LocationSource::Default,
            accuracy: Accuracy::Unknown,
            resolved_at: Utc::now(),
        }
    }
}

/// The location resolver with its fallback pipeline.
pub struct SmartLocationResolver {
    cache: LocationCache,
    sensor: Arc<dyn PositionAcquirer>,
    geocoder: ReverseGeocoder,
    stations: Vec<Station>,
    fallback: DefaultLocation,
    sensor_opts: SensorOptions,
    rank_opts: RankOptions,
    last: Mutex<Option<ResolvedLocation>>,
}

impl SmartLocationResolver {
    pub fn new(
        cache: LocationCache,
        sensor: Arc<dyn PositionAcquirer>,
        geocoder: ReverseGeocoder,
        stations: Vec<Station>,
        fallback: DefaultLocation,
    ) -> Self {
        Self {
            cache,
            sensor,
            geocoder,
            stations,
            fallback,
            sensor_opts: SensorOptions::default(),
            rank_opts: RankOptions::default(),
            last: Mutex::new(None),
        }
    }

    pub fn with_sensor_options(mut self, opts: SensorOptions) -> Self {
        self.sensor_opts = opts;
        self
    }

    pub fn with_rank_options(mut self, opts: RankOptions) -> Self {
        self.rank_opts = opts;
        self
    }

    /// Resolve with the default ranking limits.
    pub async fn resolve(&self, force: bool) -> Resolution {
        self.resolve_with(force, self.rank_opts).await
    }

    /// Resolve through the full chain. `force` skips the cached tiers.
    pub async fn resolve_with(&self, force: bool, opts: RankOptions) -> Resolution {
        if !force {
            if let Some(loc) = self.cache.get(Slot::Current) {
                debug!(city = ?loc.city, "using cached current location");
                return self.finish(loc, None, opts);
            }
            if let Some(loc) = self.cache.get(Slot::Home) {
                debug!(city = ?loc.city, "using home location");
                return self.finish(loc, None, opts);
            }
        }

        match acquire_with_timeout(self.sensor.as_ref(), &self.sensor_opts).await {
            Ok(c) => {
                let (loc, reason) = match self.geocoder.try_resolve(c).await {
                    Ok(loc) => (loc, None),
                    Err(e) => {
                        warn!(provider = self.geocoder.provider_name(), "reverse geocoding failed: {}", e);
                        (
                            ResolvedLocation::bare(c, LocationSource::Sensor),
                            Some(FallbackReason::GeocoderFailed),
                        )
                    }
                };
                self.cache.set(Slot::Current, &loc);
                info!(city = ?loc.city, source = %loc.source, "resolved live location");
                self.finish(loc, reason, opts)
            }
            Err(e) => {
                let reason = FallbackReason::from(&e);
                warn!(?reason, "live location failed: {}; using default", e);
                self.finish(self.fallback.to_resolved(), Some(reason), opts)
            }
        }
    }

    /// Reverse-geocode an arbitrary coordinate without touching the cache.
    pub async fn geocode(&self, c: Coordinate) -> ResolvedLocation {
        self.geocoder.resolve(c).await
    }

    /// Persist a caller-chosen location as the current one.
    pub fn update(&self, loc: ResolvedLocation) -> Resolution {
        self.cache.set(Slot::Current, &loc);
        self.finish(loc, None, self.rank_opts)
    }

    /// A manual pick: becomes current and is recorded in the history.
    pub fn select(&self, loc: ResolvedLocation) -> Resolution {
        self.cache.append_history(&loc);
        self.update(loc)
    }

    /// Copy the most recent location into the home slot.
    ///
    /// Uses the last location this resolver returned, or else the cached
    /// current location. Returns what was promoted. The default location is
    /// never promoted.
    pub fn promote_to_home(&self) -> Option<ResolvedLocation> {
        let last = self.last.lock().ok().and_then(|l| l.clone());
        let loc = last.or_else(|| self.cache.get(Slot::Current))?;
        if loc.source == LocationSource::Default {
            debug!("refusing to promote the default location");
            return None;
        }
        self.cache.promote_to_home(&loc);
        info!(city = ?loc.city, "promoted location to home");
        Some(loc)
    }

    /// Manual selections, most recent first.
    pub fn history(&self) -> Vec<ResolvedLocation> {
        self.cache.history()
    }

    /// Rank the station table around any origin.
    pub fn rank(&self, origin: Coordinate, opts: RankOptions) -> Vec<RankedStation> {
        ranking::rank(origin, &self.stations, opts)
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn rank_options(&self) -> RankOptions {
        self.rank_opts
    }

    fn finish(
        &self,
        loc: ResolvedLocation,
        reason: Option<FallbackReason>,
        opts: RankOptions,
    ) -> Resolution {
        let nearby_stations = self.rank(loc.coordinate, opts);
        if loc.source != LocationSource::Default {
            if let Ok(mut last) = self.last.lock() {
                *last = Some(loc.clone());
            }
        }
        Resolution {
            location: loc,
            nearby_stations,
            reason,
        }
    }
}
