//! Derived segment geometry: coverage circles, ground/air buffers and the
//! altitude-transition trapezoid.
//!
//! Buffers are densely discretized polygons built from geodesic
//! destination points, not exact offsets. Areas are geodesic (m²).

use geo::{unary_union, Bearing, Destination, Distance, GeodesicArea, Haversine, Point};
use geo_types::{LineString, MultiPolygon, Polygon};

use crate::models::Waypoint;

/// Climb ratio used for smooth altitude transitions: 90 m of altitude
/// change per 1 km of horizontal distance.
pub const ALTITUDE_CHANGE_M_PER_KM: f64 = 90.0;

/// Vertex count of a discretized coverage circle.
const CIRCLE_STEPS: usize = 64;

/// Vertex count of each semicircular capsule end cap.
const CAP_STEPS: usize = 32;

/// Geometry derived for one segment. Invalidated and rebuilt whenever an
/// endpoint moves, an altitude changes or a buffer parameter changes.
#[derive(Debug, Clone)]
pub struct SegmentGeometry {
    /// Source to (possibly extended) far endpoint
    pub center_line: LineString<f64>,
    pub ground_buffer: MultiPolygon<f64>,
    pub ground_area_m2: f64,
    pub air_buffer: MultiPolygon<f64>,
    pub air_area_m2: f64,
    /// Geodesic length including the extension
    pub length_m: f64,
}

/// Disc of the given radius around a point, as a closed polygon ring.
pub fn coverage_circle(center: Point<f64>, radius_m: f64) -> Polygon<f64> {
    let mut ring = Vec::with_capacity(CIRCLE_STEPS + 1);
    for i in 0..CIRCLE_STEPS {
        let bearing = 360.0 * i as f64 / CIRCLE_STEPS as f64;
        ring.push(Haversine.destination(center, bearing, radius_m).0);
    }
    ring.push(ring[0]);
    Polygon::new(LineString::new(ring), vec![])
}

/// Analytic circle area, π·r².
pub fn circle_area(radius_m: f64) -> f64 {
    std::f64::consts::PI * radius_m * radius_m
}

/// Buffer of the line from `start` to `end` by `radius_m`: two offset
/// sides joined by semicircular caps.
pub fn line_buffer(start: Point<f64>, end: Point<f64>, radius_m: f64) -> Polygon<f64> {
    if Haversine.distance(start, end) < 1e-9 {
        return coverage_circle(start, radius_m);
    }
    let bearing = Haversine.bearing(start, end);

    let mut ring = Vec::with_capacity(2 * CAP_STEPS + 3);
    // Cap around the far end, sweeping left side -> nose -> right side.
    for i in 0..=CAP_STEPS {
        let angle = bearing - 90.0 + 180.0 * i as f64 / CAP_STEPS as f64;
        ring.push(Haversine.destination(end, angle, radius_m).0);
    }
    // Cap around the start, sweeping right side -> tail -> left side.
    for i in 0..=CAP_STEPS {
        let angle = bearing + 90.0 + 180.0 * i as f64 / CAP_STEPS as f64;
        ring.push(Haversine.destination(start, angle, radius_m).0);
    }
    ring.push(ring[0]);
    Polygon::new(LineString::new(ring), vec![])
}

/// Cross-section endpoints perpendicular to `bearing` at `at`, offset by
/// ±width/2. Returns (left, right).
fn cross_section(at: Point<f64>, bearing: f64, width_m: f64) -> (Point<f64>, Point<f64>) {
    let half = width_m / 2.0;
    (
        Haversine.destination(at, bearing + 90.0, half),
        Haversine.destination(at, bearing - 90.0, half),
    )
}

/// Trapezoid connecting a full-width cross-section held from the source
/// until `offset` (fraction of the base length) to the destination
/// cross-section, optionally extended past the destination.
fn transition_trapezoid(
    source: &Waypoint,
    destination: &Waypoint,
    bearing: f64,
    offset: f64,
    base_length_m: f64,
    extension_m: f64,
) -> Polygon<f64> {
    let (src_left, src_right) = cross_section(source.position, bearing, source.altitude_m);
    let (dst_left, dst_right) = cross_section(destination.position, bearing, destination.altitude_m);

    let along = base_length_m * offset;
    let offset_left = Haversine.destination(src_left, bearing, along);
    let offset_right = Haversine.destination(src_right, bearing, along);

    let mut ring = vec![src_left, offset_left, dst_left];
    if extension_m > 0.0 {
        ring.push(Haversine.destination(dst_left, bearing, extension_m));
        ring.push(Haversine.destination(dst_right, bearing, extension_m));
    }
    ring.extend([dst_right, offset_right, src_right, src_left]);

    Polygon::new(LineString::new(ring.into_iter().map(|p| p.0).collect()), vec![])
}

/// Derive the full geometry of a segment from its endpoint waypoints.
///
/// `altitude_m` is the segment's nominal altitude (it may differ from the
/// source waypoint when manually overridden) and controls the flat ground
/// buffer width. The smooth trapezoid uses the endpoint altitudes.
pub fn derive_segment_geometry(
    source: &Waypoint,
    destination: &Waypoint,
    altitude_m: f64,
    collision_radius_m: f64,
    extension_m: f64,
) -> SegmentGeometry {
    let base_length = Haversine.distance(source.position, destination.position);
    let bearing = Haversine.bearing(source.position, destination.position);

    let far_end = if extension_m > 0.0 {
        Haversine.destination(destination.position, bearing, extension_m)
    } else {
        destination.position
    };

    let center_line = LineString::new(vec![source.position.0, far_end.0]);

    let air_buffer = MultiPolygon::new(vec![line_buffer(
        source.position,
        far_end,
        collision_radius_m,
    )]);
    let air_area_m2 = air_buffer.geodesic_area_unsigned();

    let climb_m = (destination.altitude_m - source.altitude_m).abs();
    let climb_distance_m = climb_m / ALTITUDE_CHANGE_M_PER_KM * 1000.0;
    let long_edge = base_length >= climb_distance_m && climb_m != 0.0;

    let ground_buffer = if source.smooth && long_edge {
        let offset = (base_length - climb_distance_m) / base_length;
        let trapezoid = transition_trapezoid(
            source,
            destination,
            bearing,
            offset,
            base_length,
            extension_m,
        );
        let far_circle = if extension_m > 0.0 {
            coverage_circle(far_end, destination.altitude_m / 2.0)
        } else {
            destination.circle.clone()
        };
        let parts = [source.circle.clone(), trapezoid, far_circle];
        unary_union(parts.iter())
    } else {
        MultiPolygon::new(vec![line_buffer(source.position, far_end, altitude_m / 2.0)])
    };
    let ground_area_m2 = ground_buffer.geodesic_area_unsigned();

    SegmentGeometry {
        center_line,
        ground_buffer,
        ground_area_m2,
        air_buffer,
        air_area_m2,
        length_m: base_length + extension_m,
    }
}
