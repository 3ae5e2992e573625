//! The risk engine: owns the path arena, the loaded dataset and the
//! scan pipeline, and keeps per-segment and route-level statistics
//! current as the path is edited.
//!
//! Recomputations are generation-tagged. Every dispatch bumps the
//! engine's generation, and a collected result whose generation no
//! longer matches is discarded, so overlapping scans always resolve to
//! the most recently issued one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use geo::Point;
use geo_types::MultiPolygon;
use tokio::task;

use crate::debounce::Debouncer;
use crate::error::{Result, RiskError};
use crate::grid::PopulationGrid;
use crate::intersect::{self, SegmentAccumulator, SegmentJob};
use crate::models::{RiskParams, RouteReport, SegmentReport, EFR_THRESHOLD};
use crate::path::PathModel;
use crate::risk;
use crate::spatial::{self, TileIndex};

/// Decrements the engine's in-flight counter when the invocation is
/// collected or dropped uncollected.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to one in-flight scan. Collecting it applies the result only
/// if no newer scan was dispatched in the meantime; dropping it without
/// collecting abandons the result.
pub struct Invocation {
    generation: u64,
    targets: Vec<usize>,
    handle: task::JoinHandle<Result<Vec<SegmentAccumulator>>>,
    _guard: InFlightGuard,
}

impl Invocation {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct RiskEngine {
    path: PathModel,
    params: RiskParams,
    grid: Arc<PopulationGrid>,
    index: Option<TileIndex>,
    generation: u64,
    in_flight: Arc<AtomicUsize>,
    debounce: Debouncer<Vec<usize>>,
    queued: Vec<usize>,
    totals: RouteReport,
}

impl RiskEngine {
    pub fn new(grid: PopulationGrid, params: RiskParams) -> Self {
        let index = TileIndex::build(&grid);
        Self {
            path: PathModel::new(),
            params,
            grid: Arc::new(grid),
            index,
            generation: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            debounce: Debouncer::default(),
            queued: Vec::new(),
            totals: RouteReport::default(),
        }
    }

    /// Override the interactive debounce delay.
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.debounce = Debouncer::new(delay);
        self
    }

    pub fn path(&self) -> &PathModel {
        &self.path
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    pub fn grid(&self) -> &PopulationGrid {
        &self.grid
    }

    /// Whether any scan is currently in flight.
    pub fn is_computing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Replace the dataset and recompute everything against it.
    pub async fn reload_grid(&mut self, grid: PopulationGrid) -> Result<bool> {
        self.index = TileIndex::build(&grid);
        self.grid = Arc::new(grid);
        self.recompute_all().await
    }

    // ---- path mutations -------------------------------------------------

    /// Append a waypoint; a missing altitude takes the configured default.
    pub fn append_waypoint(&mut self, position: Point<f64>, altitude_m: Option<f64>) -> usize {
        let altitude = altitude_m.unwrap_or(self.params.default_altitude_m);
        let id = self.path.append_waypoint(position, altitude, &self.params);
        if id > 0 {
            self.request_recompute(vec![id - 1]);
        }
        id
    }

    pub fn move_waypoint(&mut self, id: usize, position: Point<f64>) -> Result<()> {
        let affected = self.path.move_waypoint(id, position)?;
        self.request_recompute(affected);
        Ok(())
    }

    pub fn set_waypoint_altitude(&mut self, id: usize, altitude_m: f64) -> Result<()> {
        let affected = self.path.set_altitude(id, altitude_m, true)?;
        self.request_recompute(affected);
        Ok(())
    }

    pub fn set_waypoint_smooth(&mut self, id: usize, smooth: bool) -> Result<()> {
        let affected = self.path.set_smooth(id, smooth)?;
        self.request_recompute(affected);
        Ok(())
    }

    pub fn split_segment(&mut self, id: usize) -> Result<usize> {
        let (waypoint, new_segment) = self.path.split_segment(id)?;
        self.request_recompute(vec![id, new_segment]);
        Ok(waypoint)
    }

    pub fn remove_waypoint(&mut self, id: usize) -> Result<()> {
        let affected = self.path.remove_waypoint(id)?;
        // Renumbering invalidates queued ids wholesale.
        self.queued.clear();
        self.request_recompute(if affected.is_empty() {
            self.path.all_segment_ids()
        } else {
            affected
        });
        Ok(())
    }

    // ---- parameter updates ----------------------------------------------

    /// Parameters that only feed the closed-form risk math; no rescan.
    pub fn set_fatality_probability(&mut self, value: f64) {
        self.params.fatality_probability = value;
        self.refresh_totals();
    }

    pub fn set_mtbf_flight_hours(&mut self, value: f64) {
        self.params.mtbf_flight_hours = value;
        self.refresh_totals();
    }

    pub fn set_vehicle_diameter(&mut self, value: f64) {
        self.params.vehicle_diameter_m = value;
        self.refresh_totals();
    }

    pub fn set_vehicle_speed(&mut self, value: f64) {
        self.params.vehicle_speed_mps = value;
        self.refresh_rates();
        self.refresh_totals();
    }

    pub fn set_traffic_density(&mut self, value: f64) {
        self.params.traffic_density = value;
        self.refresh_rates();
        self.refresh_totals();
    }

    /// Parameters that change buffer geometry need a rescan. These are
    /// driven by sliders, so the rescan goes through the debouncer and
    /// only the last change in the window dispatches.
    pub fn set_collision_radius(&mut self, radius_m: f64) {
        self.params.collision_radius_m = radius_m;
        let affected = self.path.set_collision_radius(radius_m);
        self.request_recompute(affected);
    }

    pub fn set_extension(&mut self, enabled: bool, extension_m: f64) {
        self.params.extension_enabled = enabled;
        self.params.extension_m = extension_m;
        let affected = self.path.set_extension(self.params.effective_extension_m());
        self.request_recompute(affected);
    }

    pub fn set_global_altitude(&mut self, altitude_m: f64) {
        self.params.default_altitude_m = altitude_m;
        let affected = self.path.set_global_altitude(altitude_m);
        self.request_recompute(affected);
    }

    // ---- recomputation --------------------------------------------------

    /// Start a scan of the given segments. The workers begin immediately;
    /// the returned invocation is collected separately.
    pub fn dispatch(&mut self, targets: Vec<usize>) -> Invocation {
        self.generation += 1;
        let generation = self.generation;

        let mut jobs = Vec::with_capacity(targets.len());
        let mut scanned = Vec::with_capacity(targets.len());
        let mut buffers: Vec<&MultiPolygon<f64>> = Vec::with_capacity(targets.len() * 2);
        for &id in &targets {
            let Some(segment) = self.path.segment(id) else {
                continue;
            };
            buffers.push(&segment.geometry.ground_buffer);
            buffers.push(&segment.geometry.air_buffer);
            jobs.push(SegmentJob {
                slot: scanned.len(),
                segment: id,
                ground_buffer: segment.geometry.ground_buffer.clone(),
                air_buffer: segment.geometry.air_buffer.clone(),
                source_circle: self.path.waypoints()[segment.source].circle.clone(),
                destination_circle: self.path.waypoints()[segment.destination].circle.clone(),
            });
            scanned.push(id);
        }
        let tile_ids = spatial::select_tiles(self.index.as_ref(), &self.grid, &buffers);
        tracing::debug!(
            generation,
            segments = jobs.len(),
            candidate_tiles = tile_ids.len(),
            "dispatching scan"
        );

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let handle = task::spawn(intersect::dispatch(
            Arc::clone(&self.grid),
            tile_ids,
            Arc::new(jobs),
        ));
        Invocation {
            generation,
            targets: scanned,
            handle,
            _guard: InFlightGuard(Arc::clone(&self.in_flight)),
        }
    }

    /// Await a scan and apply its result. Returns false when the result
    /// was stale and discarded.
    pub async fn collect(&mut self, invocation: Invocation) -> Result<bool> {
        let joined = invocation.handle.await;
        let accumulators = joined.map_err(|_| RiskError::WorkerChannelClosed)??;

        if invocation.generation != self.generation {
            tracing::debug!(
                generation = invocation.generation,
                current = self.generation,
                "discarding stale scan result"
            );
            return Ok(false);
        }
        self.apply(&invocation.targets, &accumulators);
        self.refresh_rates();
        self.refresh_totals();
        Ok(true)
    }

    /// Scan the given segments and wait for the result.
    pub async fn recompute(&mut self, targets: Vec<usize>) -> Result<bool> {
        if targets.is_empty() {
            self.refresh_totals();
            return Ok(true);
        }
        let invocation = self.dispatch(targets);
        self.collect(invocation).await
    }

    /// Scan every segment, superseding anything queued behind the
    /// debouncer.
    pub async fn recompute_all(&mut self) -> Result<bool> {
        self.queued.clear();
        self.debounce.clear();
        let targets = self.path.all_segment_ids();
        self.recompute(targets).await
    }

    /// Queue a debounced recompute, merging with anything already queued.
    pub fn request_recompute(&mut self, targets: Vec<usize>) {
        self.queued.extend(targets);
        self.queued.sort_unstable();
        self.queued.dedup();
        self.debounce.submit(self.queued.clone());
    }

    /// Wait out the debounce delay and run the queued recompute, if any.
    pub async fn flush_pending(&mut self) -> Result<bool> {
        let Some(deadline) = self.debounce.deadline() else {
            return Ok(false);
        };
        tokio::time::sleep(deadline.saturating_duration_since(Instant::now())).await;
        match self.debounce.poll() {
            Some(targets) => {
                self.queued.clear();
                self.recompute(targets).await
            }
            None => Ok(false),
        }
    }

    // ---- statistics -----------------------------------------------------

    fn apply(&mut self, targets: &[usize], accumulators: &[SegmentAccumulator]) {
        let total_drone_density = self.grid.total_drone_density;
        for (slot, &id) in targets.iter().enumerate() {
            let Some(acc) = accumulators.get(slot) else {
                continue;
            };
            let Some(segment) = self.path.segment_mut(id) else {
                continue;
            };
            let stats = &mut segment.stats;
            stats.population = acc.population;
            stats.peak_density_per_m2 = acc.peak_density_per_m2;
            stats.dwell_time_s = acc.dwell_time_s;
            stats.speed_samples = acc.speed_samples.clone();
            stats.source_circle_population = acc.source_circle_population;
            stats.destination_circle_population = acc.destination_circle_population;
            stats.drone_density_fraction = if total_drone_density > 0.0 {
                acc.drone_density_sum / total_drone_density
            } else {
                0.0
            };
        }
    }

    /// Re-run the closed-form NMAC math from the stored scan statistics.
    fn refresh_rates(&mut self) {
        let base_probability = self.grid.base_probability;
        let speed = self.params.vehicle_speed_mps;
        let traffic = self.params.traffic_density;

        for id in 0..self.path.segments().len() {
            let Some(segment) = self.path.segment_mut(id) else {
                continue;
            };
            let third = risk::third_party_nmac(
                segment.collision_radius_m,
                segment.geometry.air_area_m2,
                segment.stats.dwell_time_s,
                risk::mean_speed(&segment.stats.speed_samples),
                speed,
                segment.geometry.length_m,
                base_probability,
            );
            let first = risk::first_party_nmac(
                segment.collision_radius_m,
                segment.geometry.air_area_m2,
                segment.stats.drone_density_fraction * traffic,
                speed,
                segment.geometry.length_m,
                base_probability,
            );
            segment.stats.third_party_rate_per_million_h = third.rate_per_million_h;
            segment.stats.expected_third_party_nmac = third.expected_count;
            segment.stats.first_party_rate_per_million_h = first.rate_per_million_h;
            segment.stats.expected_first_party_nmac = first.expected_count;
        }
    }

    /// Recompute route totals from per-segment statistics, correcting
    /// population and ground area for the overlap at shared waypoints.
    fn refresh_totals(&mut self) {
        let segments = self.path.segments();
        let waypoints = self.path.waypoints();

        let mut totals = RouteReport::default();
        let mut dwell_time = 0.0;
        let mut air_area = 0.0;
        let mut speed_samples: Vec<f64> = Vec::new();
        let mut drone_density_fraction = 0.0;

        for segment in segments {
            totals.length_m += segment.geometry.length_m;
            totals.population += segment.stats.population;
            totals.ground_area_m2 += segment.geometry.ground_area_m2;
            totals.peak_density_per_m2 =
                totals.peak_density_per_m2.max(segment.stats.peak_density_per_m2);
            dwell_time += segment.stats.dwell_time_s;
            air_area += segment.geometry.air_area_m2;
            speed_samples.extend_from_slice(&segment.stats.speed_samples);
            drone_density_fraction += segment.stats.drone_density_fraction;
        }

        // Consecutive segments both cover the circle around their shared
        // waypoint; subtract one copy of that overlap.
        for pair in segments.windows(2) {
            let shared = pair[0].destination;
            totals.population -= pair[0]
                .stats
                .destination_circle_population
                .min(pair[1].stats.source_circle_population);
            totals.ground_area_m2 -= waypoints[shared].circle_area_m2;
        }
        totals.population = totals.population.max(0.0);
        totals.ground_area_m2 = totals.ground_area_m2.max(0.0);

        if self.params.vehicle_speed_mps > 0.0 {
            totals.duration_s = totals.length_m / self.params.vehicle_speed_mps;
        }
        totals.efr = risk::expected_fatality_rate(
            self.params.fatality_probability,
            self.params.mtbf_flight_hours,
            totals.population,
            self.params.vehicle_footprint_area_m2(),
            totals.ground_area_m2,
        );
        totals.efr_within_threshold = totals.efr < EFR_THRESHOLD;
        if totals.ground_area_m2 > 0.0 {
            totals.population_density_per_m2 = totals.population / totals.ground_area_m2;
        }

        let third = risk::third_party_nmac(
            self.params.collision_radius_m,
            air_area,
            dwell_time,
            risk::mean_speed(&speed_samples),
            self.params.vehicle_speed_mps,
            totals.length_m,
            self.grid.base_probability,
        );
        totals.third_party_rate_per_million_h = third.rate_per_million_h;
        totals.expected_third_party_nmac = third.expected_count;

        let first = risk::first_party_nmac(
            self.params.collision_radius_m,
            air_area,
            drone_density_fraction * self.params.traffic_density,
            self.params.vehicle_speed_mps,
            totals.length_m,
            self.grid.base_probability,
        );
        totals.first_party_rate_per_million_h = first.rate_per_million_h;
        totals.expected_first_party_nmac = first.expected_count;

        self.totals = totals;
    }

    pub fn route_report(&self) -> &RouteReport {
        &self.totals
    }

    pub fn segment_reports(&self) -> Vec<SegmentReport> {
        let speed = self.params.vehicle_speed_mps;
        self.path
            .segments()
            .iter()
            .map(|segment| {
                let area = segment.geometry.ground_area_m2;
                SegmentReport {
                    index: segment.index,
                    altitude_m: segment.altitude_m,
                    length_m: segment.geometry.length_m,
                    duration_s: if speed > 0.0 {
                        segment.geometry.length_m / speed
                    } else {
                        0.0
                    },
                    population: segment.stats.population,
                    ground_area_m2: area,
                    efr: risk::expected_fatality_rate(
                        self.params.fatality_probability,
                        self.params.mtbf_flight_hours,
                        segment.stats.population,
                        self.params.vehicle_footprint_area_m2(),
                        area,
                    ),
                    population_density_per_m2: if area > 0.0 {
                        segment.stats.population / area
                    } else {
                        0.0
                    },
                    peak_density_per_m2: segment.stats.peak_density_per_m2,
                    third_party_rate_per_million_h: segment.stats.third_party_rate_per_million_h,
                    expected_third_party_nmac: segment.stats.expected_third_party_nmac,
                    first_party_rate_per_million_h: segment.stats.first_party_rate_per_million_h,
                    expected_first_party_nmac: segment.stats.expected_first_party_nmac,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Destination, Haversine};
    use geo_types::{LineString, Polygon};

    use crate::grid::GridTile;

    fn big_tile(population: f64, dwell: f64, speed: f64, dn: Option<f64>) -> GridTile {
        // One tile large enough to contain every buffer in these tests.
        GridTile {
            polygon: Polygon::new(
                LineString::from(vec![
                    (16.0, 58.4),
                    (16.4, 58.4),
                    (16.4, 58.8),
                    (16.0, 58.8),
                    (16.0, 58.4),
                ]),
                vec![],
            ),
            population,
            dwell_time_s: dwell,
            mean_speed_mps: speed,
            drone_density: dn,
        }
    }

    fn test_grid(dn: Option<f64>) -> PopulationGrid {
        let mut grid = PopulationGrid::empty();
        grid.tiles.push(big_tile(100.0, 0.5, 40.0, dn));
        grid.base_probability = 1e-4;
        grid.total_drone_density = dn.unwrap_or(0.0);
        grid.has_drone_density = dn.is_some();
        grid
    }

    fn engine_with_route(dn: Option<f64>, waypoints: usize) -> RiskEngine {
        let mut engine = RiskEngine::new(test_grid(dn), RiskParams::default())
            .with_debounce(Duration::from_millis(10));
        let origin = Point::new(16.19, 58.59);
        for i in 0..waypoints {
            let position = Haversine.destination(origin, 90.0, 1000.0 * i as f64);
            engine.append_waypoint(position, None);
        }
        engine
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_route_scan_produces_positive_statistics() {
        let mut engine = engine_with_route(Some(0.5), 2);
        assert!(engine.recompute_all().await.unwrap());

        let segment = &engine.path().segments()[0];
        // Buffer fully inside the tile: population follows the buffer
        // area over the reference tile area.
        let expected =
            100.0 * segment.geometry.ground_area_m2 / intersect::REFERENCE_TILE_AREA_M2;
        assert!((segment.stats.population - expected).abs() / expected < 1e-6);
        assert!(segment.stats.dwell_time_s > 0.0);
        assert!(segment.stats.third_party_rate_per_million_h > 0.0);
        assert!(segment.stats.first_party_rate_per_million_h > 0.0);
        // With one tile holding all density, the normalized fraction is
        // the air buffer's share of the reference tile area.
        let expected_fraction =
            segment.geometry.air_area_m2 / intersect::REFERENCE_TILE_AREA_M2;
        assert!(
            (segment.stats.drone_density_fraction - expected_fraction).abs() / expected_fraction
                < 1e-6
        );

        let totals = engine.route_report();
        assert!((totals.length_m - 1000.0).abs() < 1.0);
        assert!(totals.efr > 0.0);
        assert!(totals.population > 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shared_waypoint_overlap_is_subtracted_once() {
        let mut engine = engine_with_route(None, 3);
        assert!(engine.recompute_all().await.unwrap());

        let summed: f64 = engine
            .path()
            .segments()
            .iter()
            .map(|s| s.stats.population)
            .sum();
        let totals = engine.route_report();
        assert!(totals.population < summed);
        assert!(totals.population > 0.0);

        let summed_area: f64 = engine
            .path()
            .segments()
            .iter()
            .map(|s| s.geometry.ground_area_m2)
            .sum();
        assert!(totals.ground_area_m2 < summed_area);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_scan_result_is_discarded() {
        let mut engine = engine_with_route(None, 2);
        let older = engine.dispatch(vec![0]);
        let newer = engine.dispatch(vec![0]);

        assert!(!engine.collect(older).await.unwrap());
        assert!(engine.collect(newer).await.unwrap());
        assert!(!engine.is_computing());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_drone_density_zeroes_first_party_risk() {
        let mut engine = engine_with_route(None, 2);
        assert!(engine.recompute_all().await.unwrap());

        let segment = &engine.path().segments()[0];
        assert_eq!(segment.stats.first_party_rate_per_million_h, 0.0);
        assert!(segment.stats.third_party_rate_per_million_h > 0.0);
        assert_eq!(engine.route_report().first_party_rate_per_million_h, 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn debounced_edits_collapse_into_one_recompute() {
        let mut engine = engine_with_route(None, 3);
        let shifted = Haversine.destination(
            engine.path().waypoint(1).unwrap().position,
            0.0,
            100.0,
        );
        engine.move_waypoint(1, shifted).unwrap();
        engine.set_waypoint_altitude(1, 250.0).unwrap();

        assert!(engine.flush_pending().await.unwrap());
        // Nothing left queued after the flush.
        assert!(!engine.flush_pending().await.unwrap());
        assert!(engine.path().segments()[0].stats.population > 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn buffer_parameter_changes_wait_for_the_debounce() {
        let mut engine = engine_with_route(None, 2);
        assert!(engine.recompute_all().await.unwrap());

        let before = engine.route_report().third_party_rate_per_million_h;
        engine.set_collision_radius(100.0);
        engine.set_collision_radius(150.0);
        // Slider ticks only queue; no scan is launched yet.
        assert!(!engine.is_computing());
        assert_eq!(
            engine.route_report().third_party_rate_per_million_h,
            before
        );

        assert!(engine.flush_pending().await.unwrap());
        let after = engine.route_report().third_party_rate_per_million_h;
        assert_eq!(engine.params().collision_radius_m, 150.0);
        assert!(after > before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_recompute_supersedes_queued_requests() {
        let mut engine = engine_with_route(None, 2);
        engine.set_collision_radius(75.0);
        assert!(engine.recompute_all().await.unwrap());
        // The queued slider request was absorbed by the full scan.
        assert!(!engine.flush_pending().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn uncollected_invocation_releases_the_computing_flag() {
        let mut engine = engine_with_route(None, 2);
        let invocation = engine.dispatch(vec![0]);
        assert!(engine.is_computing());
        drop(invocation);
        assert!(!engine.is_computing());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mtbf_change_updates_efr_without_rescanning() {
        let mut engine = engine_with_route(None, 2);
        assert!(engine.recompute_all().await.unwrap());

        let before = engine.route_report().efr;
        engine.set_mtbf_flight_hours(2000.0);
        let after = engine.route_report().efr;
        assert!((before / after - 2.0).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn vehicle_speed_change_refreshes_rates_in_place() {
        let mut engine = engine_with_route(None, 2);
        assert!(engine.recompute_all().await.unwrap());

        let before = engine.route_report().expected_third_party_nmac;
        engine.set_vehicle_speed(16.68);
        let after = engine.route_report().expected_third_party_nmac;
        // Faster transit means less exposure time on the same route.
        assert!(after < before);
    }
}
