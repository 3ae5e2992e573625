//! Gas-model NMAC rates and the expected fatality rate.

/// Converts a per-second rate to events per million flight hours.
pub const RATE_DISPLAY_SCALE: f64 = 3600.0 * 1e6;

/// A near mid-air collision rate plus the count expected while flying
/// the associated stretch of route.
#[derive(Debug, Clone, Copy, Default)]
pub struct NmacOutcome {
    pub rate_per_million_h: f64,
    pub expected_count: f64,
}

/// Mean of the ambient speed samples, zero when there are none.
pub fn mean_speed(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Third-party NMAC against ambient traffic inside the air buffer.
///
/// The gas model gives a horizontal conflict probability per second of
/// `2 r² T sqrt(v² + v̄²) / (r A)`, scaled by the vertical-overlap base
/// probability `p` of the dataset.
pub fn third_party_nmac(
    collision_radius_m: f64,
    air_area_m2: f64,
    dwell_time_s: f64,
    ambient_speed_mps: f64,
    vehicle_speed_mps: f64,
    length_m: f64,
    base_probability: f64,
) -> NmacOutcome {
    if collision_radius_m <= 0.0 || air_area_m2 <= 0.0 || vehicle_speed_mps <= 0.0 {
        return NmacOutcome::default();
    }
    let closing_speed =
        (vehicle_speed_mps * vehicle_speed_mps + ambient_speed_mps * ambient_speed_mps).sqrt();
    let horizontal_conflict = 2.0 * collision_radius_m * collision_radius_m * dwell_time_s
        * closing_speed
        / (collision_radius_m * air_area_m2);
    let rate = horizontal_conflict * base_probability;
    NmacOutcome {
        rate_per_million_h: rate * RATE_DISPLAY_SCALE,
        expected_count: length_m / vehicle_speed_mps * rate,
    }
}

/// First-party NMAC against the operator's own fleet.
///
/// `ambient_density` is the expected number of fleet vehicles inside the
/// air buffer (normalized drone density times the traffic density).
/// Both vehicles cruise at the same speed, so the mean closing speed is
/// `sqrt(2) v`.
pub fn first_party_nmac(
    collision_radius_m: f64,
    air_area_m2: f64,
    ambient_density: f64,
    vehicle_speed_mps: f64,
    length_m: f64,
    base_probability: f64,
) -> NmacOutcome {
    if collision_radius_m <= 0.0 || air_area_m2 <= 0.0 || vehicle_speed_mps <= 0.0 {
        return NmacOutcome::default();
    }
    let closing_speed = (2.0 * vehicle_speed_mps * vehicle_speed_mps).sqrt();
    let horizontal_conflict = 2.0 * collision_radius_m * collision_radius_m * ambient_density
        * closing_speed
        / (collision_radius_m * air_area_m2);
    let rate = horizontal_conflict * base_probability;
    NmacOutcome {
        rate_per_million_h: rate * RATE_DISPLAY_SCALE,
        expected_count: length_m / vehicle_speed_mps * rate,
    }
}

/// Expected fatality rate per flight hour from a ground impact after a
/// vehicle failure.
pub fn expected_fatality_rate(
    fatality_probability: f64,
    mtbf_flight_hours: f64,
    population: f64,
    footprint_area_m2: f64,
    ground_area_m2: f64,
) -> f64 {
    if mtbf_flight_hours <= 0.0 || ground_area_m2 <= 0.0 {
        return 0.0;
    }
    fatality_probability / mtbf_flight_hours * population * footprint_area_m2 / ground_area_m2
}
