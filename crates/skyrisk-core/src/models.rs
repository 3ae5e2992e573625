//! Core data models for the path risk engine.

use geo::Point;
use geo_types::Polygon;
use serde::{Deserialize, Serialize};

use crate::geometry::{self, SegmentGeometry};

/// Route totals with an EFR below this value are considered acceptable.
pub const EFR_THRESHOLD: f64 = 1e-9;

/// Global parameters shared by all segments of a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    /// NMAC collision radius around the vehicle in meters
    pub collision_radius_m: f64,
    /// Whether segments are extended past their destination waypoint
    pub extension_enabled: bool,
    /// Extension distance in meters (applied when enabled)
    pub extension_m: f64,
    /// Own vehicle cruise speed in m/s
    pub vehicle_speed_mps: f64,
    /// Average number of fleet vehicles airborne at any moment
    pub traffic_density: f64,
    /// Probability that a ground impact is fatal
    pub fatality_probability: f64,
    /// Mean time between failures in flight hours
    pub mtbf_flight_hours: f64,
    /// Vehicle footprint diameter in meters
    pub vehicle_diameter_m: f64,
    /// Altitude assigned to the first waypoint of a new route
    pub default_altitude_m: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            collision_radius_m: 50.0,
            extension_enabled: false,
            extension_m: 100.0,
            vehicle_speed_mps: 8.34,
            traffic_density: 1.0,
            fatality_probability: 0.1,
            mtbf_flight_hours: 1000.0,
            vehicle_diameter_m: 1.0,
            default_altitude_m: 200.0,
        }
    }
}

impl RiskParams {
    /// Ground footprint area of the vehicle in m².
    pub fn vehicle_footprint_area_m2(&self) -> f64 {
        let radius = self.vehicle_diameter_m / 2.0;
        std::f64::consts::PI * radius * radius
    }

    /// Extension applied to newly created segments, honoring the enable flag.
    pub fn effective_extension_m(&self) -> f64 {
        if self.extension_enabled {
            self.extension_m
        } else {
            0.0
        }
    }
}

/// A route waypoint with its derived coverage circle.
#[derive(Debug, Clone)]
pub struct Waypoint {
    /// Sequence index, kept contiguous from 0
    pub index: usize,
    /// Position as (lon, lat)
    pub position: Point<f64>,
    pub altitude_m: f64,
    /// Smooth altitude transition on the outgoing segment
    pub smooth: bool,
    /// Disc of radius altitude/2 centered at the position
    pub circle: Polygon<f64>,
    /// Analytic circle area, π·(altitude/2)²
    pub circle_area_m2: f64,
}

impl Waypoint {
    pub fn new(index: usize, position: Point<f64>, altitude_m: f64) -> Self {
        let radius = altitude_m / 2.0;
        Self {
            index,
            position,
            altitude_m,
            smooth: true,
            circle: geometry::coverage_circle(position, radius),
            circle_area_m2: geometry::circle_area(radius),
        }
    }

    /// Re-derive the coverage circle after a move or altitude change.
    pub fn refresh_circle(&mut self) {
        let radius = self.altitude_m / 2.0;
        self.circle = geometry::coverage_circle(self.position, radius);
        self.circle_area_m2 = geometry::circle_area(radius);
    }
}

/// Statistics accumulated for one segment by the population intersector
/// and the risk aggregator.
#[derive(Debug, Clone, Default)]
pub struct SegmentStats {
    /// Population intersected by the ground buffer
    pub population: f64,
    /// Highest local population density among intersected tiles, per m²
    pub peak_density_per_m2: f64,
    /// Total ambient dwell time inside the air buffer, seconds
    pub dwell_time_s: f64,
    /// Ambient speed samples from tiles contributing dwell time
    pub speed_samples: Vec<f64>,
    /// Population covered by the source waypoint circle
    pub source_circle_population: f64,
    /// Population covered by the destination waypoint circle
    pub destination_circle_population: f64,
    /// Drone-density sum normalized by the dataset-wide sum, in [0, 1]
    pub drone_density_fraction: f64,
    pub third_party_rate_per_million_h: f64,
    pub expected_third_party_nmac: f64,
    pub first_party_rate_per_million_h: f64,
    pub expected_first_party_nmac: f64,
}

/// A directed path segment between two waypoints of the arena.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Sequence index, kept contiguous from 0
    pub index: usize,
    /// Arena index of the source waypoint
    pub source: usize,
    /// Arena index of the destination waypoint
    pub destination: usize,
    /// Nominal altitude; follows the source waypoint unless overridden
    pub altitude_m: f64,
    /// Set once the altitude was changed manually, which exempts the
    /// segment from global altitude updates
    pub altitude_overridden: bool,
    pub collision_radius_m: f64,
    /// Extra length past the destination waypoint, meters
    pub extension_m: f64,
    pub geometry: SegmentGeometry,
    pub stats: SegmentStats,
}

/// Per-segment statistics record exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentReport {
    pub index: usize,
    pub altitude_m: f64,
    pub length_m: f64,
    /// Time to fly the segment at the vehicle speed, seconds
    pub duration_s: f64,
    pub population: f64,
    pub ground_area_m2: f64,
    pub efr: f64,
    pub population_density_per_m2: f64,
    pub peak_density_per_m2: f64,
    pub third_party_rate_per_million_h: f64,
    pub expected_third_party_nmac: f64,
    pub first_party_rate_per_million_h: f64,
    pub expected_first_party_nmac: f64,
}

/// Route-level totals with double-count correction applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteReport {
    pub length_m: f64,
    pub duration_s: f64,
    /// Exposed population, corrected for shared-waypoint overlap
    pub population: f64,
    /// Ground buffer area, corrected for shared-waypoint overlap
    pub ground_area_m2: f64,
    pub efr: f64,
    pub efr_within_threshold: bool,
    pub population_density_per_m2: f64,
    pub peak_density_per_m2: f64,
    pub third_party_rate_per_million_h: f64,
    pub expected_third_party_nmac: f64,
    pub first_party_rate_per_million_h: f64,
    pub expected_first_party_nmac: f64,
}
