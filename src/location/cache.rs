//! Durable location cache under ~/.pickup/ with one JSON file per slot.
//!
//! Slots: `current` (7-day TTL), `home` (no expiry), `history` (10 most
//! recent manual selections, unique by city). Every write replaces the whole
//! slot file, so concurrent writers resolve as last-write-wins.
//!
//! All operations are gated by the functional-storage consent flag. When
//! consent is withheld, reads come back empty and writes are dropped.

use super::types::{Accuracy, Coordinate, LocationSource, ResolvedLocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const CURRENT_TTL_MS: i64 = 7 * 24 * 3600 * 1000; // 7 days in ms
pub const HISTORY_LIMIT: usize = 10;

/// Answers whether functional-category storage is permitted right now.
pub trait ConsentFlag: Send + Sync {
    fn functional_storage_permitted(&self) -> bool;
}

impl ConsentFlag for bool {
    fn functional_storage_permitted(&self) -> bool {
        *self
    }
}

/// A consent flag that can be flipped at runtime by the preference layer.
#[derive(Debug, Clone, Default)]
pub struct SharedConsent(Arc<AtomicBool>);

impl SharedConsent {
    pub fn new(granted: bool) -> Self {
        Self(Arc::new(AtomicBool::new(granted)))
    }

    pub fn set(&self, granted: bool) {
        self.0.store(granted, Ordering::SeqCst);
    }
}

impl ConsentFlag for SharedConsent {
    fn functional_storage_permitted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The single-location slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Current,
    Home,
}

impl Slot {
    fn file_name(self) -> &'static str {
        match self {
            Self::Current => "current.json",
            Self::Home => "home.json",
        }
    }
}

const HISTORY_FILE: &str = "history.json";

/// On-disk record. Field names are part of the storage contract.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    latitude: f64,
    longitude: f64,
    address: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
    source: LocationSource,
    #[serde(default)]
    accuracy: Accuracy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    visited_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_home: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolved_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    fn from_location(loc: &ResolvedLocation) -> Self {
        Self {
            latitude: loc.coordinate.latitude,
            longitude: loc.coordinate.longitude,
            address: loc.formatted_address.clone(),
            city: loc.city.clone(),
            region: loc.region.clone(),
            country: loc.country.clone(),
            postal_code: loc.postal_code.clone(),
            source: loc.source,
            accuracy: loc.accuracy,
            saved_at: None,
            visited_at: None,
            is_home: None,
            resolved_at: Some(loc.resolved_at),
        }
    }

    fn to_location(&self, source: LocationSource) -> ResolvedLocation {
        let stamp = self.saved_at.or(self.visited_at).unwrap_or(0);
        ResolvedLocation {
            coordinate: Coordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            formatted_address: self.address.clone(),
            city: self.city.clone(),
            region: self.region.clone(),
            country: self.country.clone(),
            postal_code: self.postal_code.clone(),
            source,
            accuracy: self.accuracy,
            resolved_at: self
                .resolved_at
                .or_else(|| DateTime::from_timestamp_millis(stamp))
                .unwrap_or_else(Utc::now),
        }
    }
}

fn storable(loc: &ResolvedLocation) -> bool {
    let ok = loc.source != LocationSource::Default;
    if !ok {
        debug!("default location is not cached");
    }
    ok
}

/// Case-insensitive city key used for history de-duplication.
/// Entries without a city are keyed by their address.
fn history_key(city: Option<&str>, address: &str) -> String {
    city.unwrap_or(address).to_lowercase()
}

/// The location cache.
pub struct LocationCache {
    dir: PathBuf,
    consent: Arc<dyn ConsentFlag>,
}

impl LocationCache {
    /// Open the cache in the default directory (~/.pickup).
    pub fn open(consent: Arc<dyn ConsentFlag>) -> Self {
        Self::open_in(Self::default_dir(), consent)
    }

    /// Open the cache in a specific directory (for testing or custom storage).
    pub fn open_in(dir: PathBuf, consent: Arc<dyn ConsentFlag>) -> Self {
        Self { dir, consent }
    }

    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pickup")
    }

    fn permitted(&self, op: &str) -> bool {
        let ok = self.consent.functional_storage_permitted();
        if !ok {
            debug!(op, "functional storage not permitted; skipping cache access");
        }
        ok
    }

    /// Look up a slot. `Current` entries older than 7 days read as absent
    /// but are left on disk.
    pub fn get(&self, slot: Slot) -> Option<ResolvedLocation> {
        if !self.permitted("get") {
            return None;
        }
        let record: StoredRecord = read_json(&self.dir.join(slot.file_name()))?;

        match slot {
            Slot::Current => {
                let now = Utc::now().timestamp_millis();
                let saved_at = record.saved_at.unwrap_or(0);
                if now - saved_at > CURRENT_TTL_MS {
                    debug!("current location expired");
                    return None;
                }
                Some(record.to_location(LocationSource::Cache))
            }
            Slot::Home => Some(record.to_location(LocationSource::Home)),
        }
    }

    /// Replace a slot with `loc`.
    /// Write `loc` into a slot. The default location is never stored.
    pub fn set(&self, slot: Slot, loc: &ResolvedLocation) {
        if !self.permitted("set") || !storable(loc) {
            return;
        }
        let mut record = StoredRecord::from_location(loc);
        record.saved_at = Some(Utc::now().timestamp_millis());
        if slot == Slot::Home {
            record.is_home = Some(true);
        }
        self.persist(slot.file_name(), &record);
    }

    /// Make `loc` the home location.
    pub fn promote_to_home(&self, loc: &ResolvedLocation) {
        self.set(Slot::Home, loc);
    }

    /// Remove a slot's file.
    pub fn clear(&self, slot: Slot) {
        if !self.permitted("clear") {
            return;
        }
        let path = self.dir.join(slot.file_name());
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), "cannot clear cache slot: {}", e);
            }
        }
    }

    /// Record a manual selection at the front of the history.
    pub fn append_history(&self, loc: &ResolvedLocation) {
        if !self.permitted("append_history") || !storable(loc) {
            return;
        }
        let mut entries = self.read_history();
        let key = history_key(loc.city.as_deref(), &loc.formatted_address);
        entries.retain(|e| history_key(e.city.as_deref(), &e.address) != key);

        let mut record = StoredRecord::from_location(loc);
        record.visited_at = Some(Utc::now().timestamp_millis());
        entries.insert(0, record);
        entries.truncate(HISTORY_LIMIT);

        self.persist(HISTORY_FILE, &entries);
    }

    /// Manual selections, most recent first.
    pub fn history(&self) -> Vec<ResolvedLocation> {
        if !self.permitted("history") {
            return Vec::new();
        }
        self.read_history()
            .iter()
            .map(|r| r.to_location(r.source))
            .collect()
    }

    fn read_history(&self) -> Vec<StoredRecord> {
        read_json(&self.dir.join(HISTORY_FILE)).unwrap_or_default()
    }

    fn persist<T: Serialize>(&self, file: &str, value: &T) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), "cannot create cache directory: {}", e);
            return;
        }
        let path = self.dir.join(file);
        match serde_json::to_string_pretty(value) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    warn!(path = %path.display(), "cannot write cache slot: {}", e);
                }
            }
            Err(e) => warn!("cannot serialize cache slot: {}", e),
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let data = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), "ignoring unreadable cache file: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache() -> (LocationCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let cache = LocationCache::open_in(dir.path().to_path_buf(), Arc::new(true));
        (cache, dir)
    }

    fn sample(city: &str, lat: f64, lon: f64) -> ResolvedLocation {
        ResolvedLocation {
            coordinate: Coordinate::new(lat, lon).unwrap(),
            formatted_address: format!("Marktplatz 1, {}", city),
            city: Some(city.to_string()),
            region: Some("Baden-Württemberg".into()),
            country: Some("Germany".into()),
            postal_code: Some("68159".into()),
            source: LocationSource::Sensor,
            accuracy: Accuracy::High,
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_cache_set_get_current() {
        let (cache, _dir) = test_cache();
        let loc = sample("Mannheim", 49.4875, 8.4660);
        cache.set(Slot::Current, &loc);

        let result = cache.get(Slot::Current).unwrap();
        assert_eq!(result.source, LocationSource::Cache);
        assert_eq!(result, loc.with_source(LocationSource::Cache));
    }

    #[test]
    fn test_cache_miss() {
        let (cache, _dir) = test_cache();
        assert!(cache.get(Slot::Current).is_none());
        assert!(cache.get(Slot::Home).is_none());
        assert!(cache.history().is_empty());
    }

    #[test]
    fn test_current_expired_but_kept_on_disk() {
        let (cache, dir) = test_cache();
        let path = dir.path().join("current.json");
        let stale = r#"{
            "latitude": 49.4875,
            "longitude": 8.466,
            "address": "Mannheim",
            "city": "Mannheim",
            "source": "Sensor",
            "accuracy": "Medium",
            "savedAt": 1000
        }"#;
        fs::write(&path, stale).unwrap();

        assert!(cache.get(Slot::Current).is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_home_never_expires() {
        let (cache, dir) = test_cache();
        let old_home = r#"{
            "latitude": 49.3988,
            "longitude": 8.6724,
            "address": "Heidelberg",
            "city": "Heidelberg",
            "source": "Sensor",
            "savedAt": 1000,
            "isHome": true
        }"#;
        fs::write(dir.path().join("home.json"), old_home).unwrap();

        let home = cache.get(Slot::Home).unwrap();
        assert_eq!(home.source, LocationSource::Home);
        assert_eq!(home.city.as_deref(), Some("Heidelberg"));
        assert_eq!(home.accuracy, Accuracy::Unknown);
    }

    #[test]
    fn test_promote_to_home_marks_record() {
        let (cache, dir) = test_cache();
        cache.promote_to_home(&sample("Speyer", 49.317, 8.4412));

        let raw = fs::read_to_string(dir.path().join("home.json")).unwrap();
        assert!(raw.contains("\"isHome\": true"));
        assert!(raw.contains("\"postalCode\""));
        assert_eq!(cache.get(Slot::Home).unwrap().city.as_deref(), Some("Speyer"));
    }

    #[test]
    fn test_history_dedup_and_order() {
        let (cache, _dir) = test_cache();
        cache.append_history(&sample("Mannheim", 49.4875, 8.466));
        cache.append_history(&sample("Heidelberg", 49.3988, 8.6724));
        cache.append_history(&sample("mannheim", 49.48, 8.47));

        let history = cache.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].city.as_deref(), Some("mannheim"));
        assert_eq!(history[1].city.as_deref(), Some("Heidelberg"));
    }

    #[test]
    fn test_history_capped_and_unique() {
        let (cache, _dir) = test_cache();
        for i in 0..25 {
            let city = format!("City{}", i % 13);
            cache.append_history(&sample(&city, 49.0 + i as f64 * 0.01, 8.0));
        }

        let history = cache.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        let mut cities: Vec<_> = history.iter().filter_map(|l| l.city.clone()).collect();
        assert_eq!(cities[0], "City11");
        cities.sort();
        cities.dedup();
        assert_eq!(cities.len(), HISTORY_LIMIT);
    }

    #[test]
    fn test_consent_denied_reads_empty_and_skips_writes() {
        let dir = TempDir::new().unwrap();
        let consent = SharedConsent::new(false);
        let cache = LocationCache::open_in(dir.path().to_path_buf(), Arc::new(consent.clone()));

        cache.set(Slot::Current, &sample("Worms", 49.6341, 8.3507));
        cache.append_history(&sample("Worms", 49.6341, 8.3507));
        assert!(!dir.path().join("current.json").exists());
        assert!(!dir.path().join("history.json").exists());

        consent.set(true);
        cache.set(Slot::Current, &sample("Worms", 49.6341, 8.3507));
        assert!(cache.get(Slot::Current).is_some());

        consent.set(false);
        assert!(cache.get(Slot::Current).is_none());
    }

    #[test]
    fn test_clear_slot() {
        let (cache, _dir) = test_cache();
        cache.promote_to_home(&sample("Worms", 49.6341, 8.3507));
        cache.clear(Slot::Home);
        assert!(cache.get(Slot::Home).is_none());
        // clearing an empty slot is fine
        cache.clear(Slot::Home);
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let cache = LocationCache::open_in(dir.path().to_path_buf(), Arc::new(true));
            cache.set(Slot::Current, &sample("Weinheim", 49.545, 8.668));
        }
        let cache2 = LocationCache::open_in(dir.path().to_path_buf(), Arc::new(true));
        assert_eq!(cache2.get(Slot::Current).unwrap().city.as_deref(), Some("Weinheim"));
    }

    #[test]
    fn test_default_location_never_written() {
        let (cache, dir) = test_cache();
        let fallback = sample("Mannheim", 49.4875, 8.4660).with_source(LocationSource::Default);
        cache.set(Slot::Current, &fallback);
        cache.promote_to_home(&fallback);
        cache.append_history(&fallback);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
