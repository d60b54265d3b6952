use pickup_locator::config::AppConfig;
use pickup_locator::location::{
    Coordinate, FallbackReason, FixedSensor, LocationSource, NullSensor, SharedConsent,
};
use std::sync::Arc;
use tempfile::TempDir;

fn offline_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.dir = Some(dir.path().to_path_buf());
    // Nothing listens on the discard port; every lookup degrades.
    config.geocoder.nominatim_url = "http://127.0.0.1:9".into();
    config.geocoder.budget_ms = 2000;
    config
}

#[tokio::test]
async fn sensor_fix_is_cached_and_reused() {
    let dir = TempDir::new().unwrap();
    let berlin = Coordinate::new(52.5200, 13.4050).unwrap();
    let resolver = offline_config(&dir).build_resolver(Arc::new(FixedSensor(berlin)), Arc::new(true));

    let live = resolver.resolve(false).await;
    assert_eq!(live.location.source, LocationSource::Sensor);
    assert_eq!(live.location.formatted_address, "52.5200, 13.4050");
    assert_eq!(live.reason, Some(FallbackReason::GeocoderFailed));
    assert_eq!(live.nearby_stations[0].station.id, "ber-mitte");
    assert!((live.nearby_stations[0].distance_km - 1.1).abs() < 0.1);

    let cached = resolver.resolve(false).await;
    assert_eq!(cached.location.source, LocationSource::Cache);
    assert_eq!(cached.location.coordinate, berlin);

    let home = resolver.promote_to_home().unwrap();
    assert_eq!(home.coordinate, berlin);
    assert!(dir.path().join("home.json").exists());
}

#[tokio::test]
async fn no_sensor_and_no_consent_falls_back_to_default() {
    let dir = TempDir::new().unwrap();
    let consent = SharedConsent::new(false);
    let resolver = offline_config(&dir).build_resolver(Arc::new(NullSensor), Arc::new(consent));

    let r = resolver.resolve(false).await;
    assert_eq!(r.location.source, LocationSource::Default);
    assert_eq!(r.reason, Some(FallbackReason::SensorUnavailable));
    assert!(!r.nearby_stations.is_empty());

    assert!(resolver.promote_to_home().is_none());
    resolver.select(r.location.clone());
    assert!(resolver.history().is_empty());
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}
