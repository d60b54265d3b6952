use clap::{Args, Parser, Subcommand};
use pickup_locator::config::AppConfig;
use pickup_locator::location::{
    Coordinate, FallbackReason, FixedSensor, IpSensor, NullSensor, PositionAcquirer, RankOptions,
    RankedStation, Resolution, ResolvedLocation, SharedConsent, SmartLocationResolver,
};
use pickup_locator::{logging, server};
use std::path::PathBuf;
use std::sync::Arc;

/// Pickup Locator: find where you are and the nearest rental stations.
///
/// Examples:
///   pickup resolve
///   pickup resolve --force --lat 49.4875 --lon 8.4660
///   pickup select --lat 49.3988 --lon 8.6724 --city Heidelberg
///   pickup nearby --lat 52.52 --lon 13.405 --limit 3
///   pickup serve --port 8080 --ip
#[derive(Parser)]
#[command(name = "pickup", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.pickup/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Withhold functional-storage consent: nothing is read from or written to the cache.
    #[arg(long, global = true)]
    no_storage: bool,

    #[command(flatten)]
    sensor: SensorArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SensorArgs {
    /// Device latitude. With --lon, acts as the position sensor.
    #[arg(long, global = true, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Device longitude.
    #[arg(long, global = true, allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Use IP geolocation as the position sensor.
    #[arg(long, global = true)]
    ip: bool,
}

#[derive(Args)]
struct PlaceArgs {
    /// Display address.
    #[arg(long)]
    address: Option<String>,

    /// City name.
    #[arg(long)]
    city: Option<String>,

    /// Country name.
    #[arg(long)]
    country: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the current location and list nearby stations.
    Resolve {
        /// Skip cached and home locations.
        #[arg(long)]
        force: bool,

        /// Search radius in km.
        #[arg(long)]
        max_distance_km: Option<f64>,

        /// Maximum number of stations.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Store --lat/--lon as the current location.
    Set(PlaceArgs),
    /// Store --lat/--lon as the current location and record it in the history.
    Select(PlaceArgs),
    /// Promote the last resolved location to home.
    Home,
    /// Show manually selected locations, most recent first.
    History,
    /// Rank stations around --lat/--lon.
    Nearby {
        #[arg(long)]
        max_distance_km: Option<f64>,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Serve the JSON API.
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let fix = manual_fix(&cli.sensor);
    let sensor: Arc<dyn PositionAcquirer> = match (fix, cli.sensor.ip) {
        (Some(c), _) => Arc::new(FixedSensor(c)),
        (None, true) => Arc::new(IpSensor::new(
            config.sensor.ip_lookup_url.clone(),
            config.geocoder.user_agent.clone(),
        )),
        (None, false) => Arc::new(NullSensor),
    };

    let consent = SharedConsent::new(config.storage.functional_consent && !cli.no_storage);
    let resolver = config.build_resolver(sensor, Arc::new(consent.clone()));

    match cli.command {
        Command::Resolve { force, max_distance_km, limit } => {
            let defaults = resolver.rank_options();
            let opts = RankOptions {
                max_distance_km: max_distance_km.unwrap_or(defaults.max_distance_km),
                limit: limit.unwrap_or(defaults.limit),
            };
            let resolution = resolver.resolve_with(force, opts).await;
            print_resolution(&resolution);
        }
        Command::Set(place) => {
            let loc = place_location(&resolver, fix, place).await;
            print_resolution(&resolver.update(loc));
        }
        Command::Select(place) => {
            let loc = place_location(&resolver, fix, place).await;
            print_resolution(&resolver.select(loc));
        }
        Command::Home => {
            // A fresh process has no last result; seed it from the chain.
            resolver.resolve(false).await;
            match resolver.promote_to_home() {
                Some(loc) => print_json(&loc),
                None => {
                    eprintln!("Error: no live or saved location to promote.");
                    std::process::exit(1);
                }
            }
        }
        Command::History => print_json(&resolver.history()),
        Command::Nearby { max_distance_km, limit } => {
            let origin = fix.unwrap_or_else(|| {
                eprintln!("Error: nearby requires --lat and --lon.");
                std::process::exit(1);
            });
            let defaults = resolver.rank_options();
            let opts = RankOptions {
                max_distance_km: max_distance_km.unwrap_or(defaults.max_distance_km),
                limit: limit.unwrap_or(defaults.limit),
            };
            let ranked = resolver.rank(origin, opts);
            eprint!("{}", render_stations(&ranked));
            print_json(&ranked);
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            if let Err(e) = server::start(&host, port, Arc::new(resolver), consent).await {
                eprintln!("Server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn manual_fix(args: &SensorArgs) -> Option<Coordinate> {
    match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon).unwrap_or_else(|| {
            eprintln!("Error: Invalid coordinates. Lat: -90..90, Lon: -180..180");
            std::process::exit(1);
        })),
        (None, None) => None,
        _ => {
            eprintln!("Error: --lat and --lon must be given together.");
            std::process::exit(1);
        }
    }
}

/// Build a location for set/select: geocode the fix, then apply any
/// explicit place fields on top.
async fn place_location(
    resolver: &SmartLocationResolver,
    fix: Option<Coordinate>,
    place: PlaceArgs,
) -> ResolvedLocation {
    let Some(c) = fix else {
        eprintln!("Error: --lat and --lon are required.");
        std::process::exit(1);
    };
    let geocoded = resolver.geocode(c).await;
    ResolvedLocation {
        formatted_address: place.address.unwrap_or(geocoded.formatted_address),
        city: place.city.or(geocoded.city),
        country: place.country.or(geocoded.country),
        ..geocoded
    }
}

fn render_stations(ranked: &[RankedStation]) -> String {
    if ranked.is_empty() {
        return "  No stations within range.\n".to_string();
    }
    ranked
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "  {}. {} ({:.1} km, ~{:.0} min)\n     {}\n",
                i + 1,
                r.station.name,
                r.distance_km,
                r.estimated_travel_minutes,
                r.station.address,
            )
        })
        .collect()
}

fn print_resolution(resolution: &Resolution) {
    let loc = &resolution.location;
    eprintln!("  \u{1F4CD} {} [{}]", loc.label(), loc.source);
    match resolution.reason {
        Some(FallbackReason::GeocoderFailed) => {
            eprintln!("  \u{26A0}\u{FE0F}  Address lookup failed; showing coordinates")
        }
        Some(reason) => eprintln!("  \u{26A0}\u{FE0F}  Using default location ({:?})", reason),
        None => {}
    }
    eprint!("{}", render_stations(&resolution.nearby_stations));
    print_json(resolution);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: {}", e),
    }
}
