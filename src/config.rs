//! Application configuration from ~/.pickup/config.toml.
//!
//! Every section is optional; missing keys take their defaults.

use crate::location::{
    ranking, ConsentFlag, DefaultLocation, GeocodeProvider, LocationCache, NominatimProvider,
    PositionAcquirer, RankOptions, ReverseGeocoder, SensorOptions, SmartLocationResolver,
    StructuredProvider,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fallback: DefaultLocation,
    pub sensor: SensorConfig,
    pub geocoder: GeocoderConfig,
    pub ranking: RankOptions,
    pub storage: StorageConfig,
    pub stations: StationsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub timeout_secs: u64,
    pub max_age_secs: u64,
    pub high_accuracy: bool,
    pub ip_lookup_url: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_age_secs: 60,
            high_accuracy: true,
            ip_lookup_url: "https://ipapi.co/json/".into(),
        }
    }
}

impl SensorConfig {
    pub fn options(&self) -> SensorOptions {
        SensorOptions {
            max_age: Duration::from_secs(self.max_age_secs),
            high_accuracy: self.high_accuracy,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Per-call budget for the provider's network round trip.
    pub budget_ms: u64,
    pub user_agent: String,
    pub nominatim_url: String,
    pub structured_url: String,
    /// Enables the structured provider when set.
    pub structured_api_key: Option<String>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            budget_ms: 8000,
            user_agent: "PickupLocator/0.3 (station-finder)".into(),
            nominatim_url: "https://nominatim.openstreetmap.org".into(),
            structured_url: "https://maps.googleapis.com/maps/api/geocode".into(),
            structured_api_key: None,
        }
    }
}

impl GeocoderConfig {
    pub fn build(&self) -> ReverseGeocoder {
        let structured = self
            .structured_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(|key| {
                Box::new(StructuredProvider::new(&self.structured_url, key, &self.user_agent))
                    as Box<dyn GeocodeProvider>
            });
        let free_text = Box::new(NominatimProvider::new(&self.nominatim_url, &self.user_agent));
        ReverseGeocoder::new(structured, free_text, Duration::from_millis(self.budget_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: Option<PathBuf>,
    /// Initial state of the functional-storage consent flag.
    pub functional_consent: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            functional_consent: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationsConfig {
    /// JSON array of stations; the built-in table is used when unset.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        LocationCache::default_dir().join("config.toml")
    }

    /// Load from the default path, or defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if !path.exists() {
            info!("no config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Wire a resolver from this configuration.
    pub fn build_resolver(
        &self,
        sensor: Arc<dyn PositionAcquirer>,
        consent: Arc<dyn ConsentFlag>,
    ) -> SmartLocationResolver {
        let dir = self.storage.dir.clone().unwrap_or_else(LocationCache::default_dir);
        let cache = LocationCache::open_in(dir, consent);
        let stations = ranking::load_stations(self.stations.file.as_deref());

        SmartLocationResolver::new(cache, sensor, self.geocoder.build(), stations, self.fallback.clone())
            .with_sensor_options(self.sensor.options())
            .with_rank_options(self.ranking)
    }
}
