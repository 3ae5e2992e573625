//! Estimate ground and air risk for an aerial route over a population
//! grid dataset, printing route totals and a per-segment breakdown.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use geo_types::Point;
use serde::{Deserialize, Serialize};
use skyrisk_core::{PopulationGrid, RiskEngine, RiskParams, RouteReport, SegmentReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Estimate flight risk along a waypoint route
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Population grid dataset (GeoJSON FeatureCollection)
    #[arg(long)]
    dataset: PathBuf,

    /// Route file: JSON array of {"lon", "lat", "altitude_m"?, "smooth"?}
    #[arg(long)]
    route: PathBuf,

    /// Altitude for waypoints that do not specify one, meters
    #[arg(long, default_value_t = 200.0)]
    altitude: f64,

    /// NMAC collision radius, meters
    #[arg(long, default_value_t = 50.0)]
    collision_radius: f64,

    /// Extend each segment past its destination by this many meters
    #[arg(long)]
    extension: Option<f64>,

    /// Vehicle cruise speed, m/s
    #[arg(long, default_value_t = 8.34)]
    speed: f64,

    /// Average number of own fleet vehicles airborne
    #[arg(long, default_value_t = 1.0)]
    traffic_density: f64,

    /// Probability that a ground impact is fatal
    #[arg(long, default_value_t = 0.1)]
    fatality_probability: f64,

    /// Mean time between failures, flight hours
    #[arg(long, default_value_t = 1000.0)]
    mtbf: f64,

    /// Vehicle footprint diameter, meters
    #[arg(long, default_value_t = 1.0)]
    diameter: f64,

    /// Emit the full report as JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Deserialize)]
struct RouteWaypoint {
    lon: f64,
    lat: f64,
    #[serde(default)]
    altitude_m: Option<f64>,
    #[serde(default = "default_smooth")]
    smooth: bool,
}

fn default_smooth() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct FullReport<'a> {
    route: &'a RouteReport,
    segments: &'a [SegmentReport],
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("skyrisk_core=info".parse()?)
                .add_directive("skyrisk_cli=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let grid = PopulationGrid::load(&args.dataset)
        .with_context(|| format!("loading dataset {}", args.dataset.display()))?;
    let has_drone_density = grid.has_drone_density;
    tracing::info!(
        dataset = %args.dataset.display(),
        tiles = grid.len(),
        has_drone_density,
        "dataset loaded"
    );

    let params = RiskParams {
        collision_radius_m: args.collision_radius,
        extension_enabled: args.extension.is_some(),
        extension_m: args.extension.unwrap_or(100.0),
        vehicle_speed_mps: args.speed,
        traffic_density: args.traffic_density,
        fatality_probability: args.fatality_probability,
        mtbf_flight_hours: args.mtbf,
        vehicle_diameter_m: args.diameter,
        default_altitude_m: args.altitude,
    };

    let raw = std::fs::read_to_string(&args.route)
        .with_context(|| format!("reading route {}", args.route.display()))?;
    let waypoints: Vec<RouteWaypoint> =
        serde_json::from_str(&raw).context("parsing route file")?;
    anyhow::ensure!(waypoints.len() >= 2, "a route needs at least two waypoints");

    let mut engine = RiskEngine::new(grid, params);
    for waypoint in &waypoints {
        let id = engine.append_waypoint(Point::new(waypoint.lon, waypoint.lat), waypoint.altitude_m);
        if !waypoint.smooth {
            engine.set_waypoint_smooth(id, false)?;
        }
    }
    engine.recompute_all().await?;
    tracing::info!(
        waypoints = waypoints.len(),
        segments = engine.path().segments().len(),
        "route risk computed"
    );

    let segments = engine.segment_reports();
    let route = engine.route_report();

    if args.json {
        let report = FullReport {
            route,
            segments: &segments,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_route(route, has_drone_density);
    println!();
    print_segments(&segments, has_drone_density);
    Ok(())
}

fn kmh(mps: f64) -> f64 {
    mps * 3.6
}

fn print_route(route: &RouteReport, has_drone_density: bool) {
    println!("Route");
    println!(
        "  length {:.2} km, duration {:.1} min at {:.1} km/h",
        route.length_m / 1000.0,
        route.duration_s / 60.0,
        kmh(if route.duration_s > 0.0 {
            route.length_m / route.duration_s
        } else {
            0.0
        }),
    );
    println!(
        "  exposed population {} over {:.3} km2 (mean {:.2e} /m2, peak {:.2e} /m2)",
        route.population.ceil() as u64,
        route.ground_area_m2 / 1.0e6,
        route.population_density_per_m2,
        route.peak_density_per_m2,
    );
    let verdict = if route.efr_within_threshold {
        "within"
    } else {
        "exceeds"
    };
    println!(
        "  EFR {:.2e} per flight hour ({verdict} 1e-9)",
        route.efr
    );
    println!(
        "  third-party NMAC {:.4} per 1e6 flight hours, {:.2e} expected on this route",
        route.third_party_rate_per_million_h, route.expected_third_party_nmac,
    );
    if has_drone_density {
        println!(
            "  first-party NMAC {:.4} per 1e6 flight hours, {:.2e} expected on this route",
            route.first_party_rate_per_million_h, route.expected_first_party_nmac,
        );
    } else {
        println!("  first-party NMAC n/a (dataset has no drone density)");
    }
}

fn print_segments(segments: &[SegmentReport], has_drone_density: bool) {
    println!(
        "{:>3}  {:>8}  {:>8}  {:>10}  {:>10}  {:>10}  {:>10}",
        "seg", "alt m", "len m", "population", "EFR", "3rd-party", "1st-party"
    );
    for segment in segments {
        let first_party = if has_drone_density {
            format!("{:.4}", segment.first_party_rate_per_million_h)
        } else {
            "n/a".to_string()
        };
        println!(
            "{:>3}  {:>8.0}  {:>8.0}  {:>10}  {:>10.2e}  {:>10.4}  {:>10}",
            segment.index,
            segment.altitude_m,
            segment.length_m,
            segment.population.ceil() as u64,
            segment.efr,
            segment.third_party_rate_per_million_h,
            first_party,
        );
    }
}
