//! Population and traffic intersection: clipping segment buffers against
//! grid tiles and accumulating per-segment statistics, fanned out over
//! blocking workers for large tile sets.

use std::sync::Arc;

use geo::{BooleanOps, GeodesicArea};
use geo_types::{MultiPolygon, Polygon};
use tokio::sync::mpsc;
use tokio::task;

use crate::error::{Result, RiskError};
use crate::grid::{GridTile, PopulationGrid};

/// Nominal tile area the dataset's per-tile attributes refer to, m².
pub const REFERENCE_TILE_AREA_M2: f64 = 10_000.0;

/// Tile count above which the scan is split across this many workers.
const PARTITION_THRESHOLD: usize = 1000;
const WORKER_COUNT: usize = 4;

/// Everything a scan worker needs to process one segment, detached from
/// the path arena so it can cross the thread boundary.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    /// Position of this segment's accumulator in the result vector
    pub slot: usize,
    pub segment: usize,
    pub ground_buffer: MultiPolygon<f64>,
    pub air_buffer: MultiPolygon<f64>,
    pub source_circle: Polygon<f64>,
    pub destination_circle: Polygon<f64>,
}

/// Raw per-segment sums produced by the tile scan, before any risk math.
#[derive(Debug, Clone, Default)]
pub struct SegmentAccumulator {
    pub population: f64,
    pub peak_density_per_m2: f64,
    pub dwell_time_s: f64,
    pub speed_samples: Vec<f64>,
    pub source_circle_population: f64,
    pub destination_circle_population: f64,
    pub drone_density_sum: f64,
}

impl SegmentAccumulator {
    fn merge(&mut self, other: &SegmentAccumulator) {
        self.population += other.population;
        self.peak_density_per_m2 = self.peak_density_per_m2.max(other.peak_density_per_m2);
        self.dwell_time_s += other.dwell_time_s;
        self.speed_samples.extend_from_slice(&other.speed_samples);
        self.source_circle_population += other.source_circle_population;
        self.destination_circle_population += other.destination_circle_population;
        self.drone_density_sum += other.drone_density_sum;
    }
}

/// Number of scan partitions for a tile set of this size.
pub fn partition_count(tiles: usize) -> usize {
    if tiles > PARTITION_THRESHOLD {
        WORKER_COUNT
    } else {
        1
    }
}

fn area_fraction(intersection: &MultiPolygon<f64>) -> Option<f64> {
    if intersection.0.is_empty() {
        return None;
    }
    Some(intersection.geodesic_area_unsigned() / REFERENCE_TILE_AREA_M2)
}

/// Scan one slice of tiles against all jobs, producing one accumulator
/// per job. Pure and deterministic, so partition results merge freely.
pub fn scan_tiles(tiles: &[&GridTile], jobs: &[SegmentJob]) -> Vec<SegmentAccumulator> {
    let mut out = vec![SegmentAccumulator::default(); jobs.len()];

    for tile in tiles {
        for job in jobs {
            let acc = &mut out[job.slot];

            if let Some(fraction) = area_fraction(&job.ground_buffer.intersection(&tile.polygon)) {
                acc.population += fraction * tile.population;
                acc.peak_density_per_m2 = acc
                    .peak_density_per_m2
                    .max(tile.population / REFERENCE_TILE_AREA_M2);
            }

            if let Some(fraction) = area_fraction(&job.air_buffer.intersection(&tile.polygon)) {
                let dwell = tile.dwell_time_s * fraction;
                acc.dwell_time_s += dwell;
                // Only positive speeds count toward the ambient mean.
                if dwell > 0.0 && tile.mean_speed_mps > 0.0 {
                    acc.speed_samples.push(tile.mean_speed_mps);
                }
                if let Some(dn) = tile.drone_density {
                    acc.drone_density_sum += dn * fraction;
                }
            }

            if let Some(fraction) = area_fraction(&job.source_circle.intersection(&tile.polygon)) {
                acc.source_circle_population += fraction * tile.population;
            }
            if let Some(fraction) =
                area_fraction(&job.destination_circle.intersection(&tile.polygon))
            {
                acc.destination_circle_population += fraction * tile.population;
            }
        }
    }
    out
}

/// Merge per-partition accumulator vectors element-wise.
pub fn reduce(chunks: &[Vec<SegmentAccumulator>], jobs: usize) -> Vec<SegmentAccumulator> {
    let mut out = vec![SegmentAccumulator::default(); jobs];
    for chunk in chunks {
        for (slot, acc) in chunk.iter().enumerate() {
            out[slot].merge(acc);
        }
    }
    out
}

/// Fan the scan out over blocking workers and reduce the partial results.
///
/// `tile_ids` is the prefiltered candidate set; the full grid travels as
/// a shared handle so workers only clone indices.
pub async fn dispatch(
    grid: Arc<PopulationGrid>,
    tile_ids: Vec<usize>,
    jobs: Arc<Vec<SegmentJob>>,
) -> Result<Vec<SegmentAccumulator>> {
    let workers = partition_count(tile_ids.len());
    let chunk_size = tile_ids.len().div_ceil(workers).max(1);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut spawned = 0usize;
    for chunk in tile_ids.chunks(chunk_size) {
        let grid = Arc::clone(&grid);
        let jobs = Arc::clone(&jobs);
        let chunk = chunk.to_vec();
        let tx = tx.clone();
        task::spawn_blocking(move || {
            let tiles: Vec<&GridTile> = chunk.iter().map(|&id| &grid.tiles[id]).collect();
            let partial = scan_tiles(&tiles, &jobs);
            let _ = tx.send(partial);
        });
        spawned += 1;
    }
    drop(tx);

    let mut partials = Vec::with_capacity(spawned);
    while let Some(partial) = rx.recv().await {
        partials.push(partial);
    }
    if partials.len() != spawned {
        return Err(RiskError::WorkerChannelClosed);
    }
    Ok(reduce(&partials, jobs.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{LineString, Polygon};

    fn square(lon: f64, lat: f64, size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (lon, lat),
                (lon + size, lat),
                (lon + size, lat + size),
                (lon, lat + size),
                (lon, lat),
            ]),
            vec![],
        )
    }

    fn tile(lon: f64, lat: f64, population: f64, dwell: f64, speed: f64) -> GridTile {
        GridTile {
            polygon: square(lon, lat, 0.001),
            population,
            dwell_time_s: dwell,
            mean_speed_mps: speed,
            drone_density: Some(0.5),
        }
    }

    fn covering_job() -> SegmentJob {
        // A buffer so large every test tile is fully inside it.
        let huge = MultiPolygon::new(vec![square(15.9, 57.9, 0.2)]);
        SegmentJob {
            slot: 0,
            segment: 0,
            ground_buffer: huge.clone(),
            air_buffer: huge,
            source_circle: square(15.9, 57.9, 0.2),
            destination_circle: square(15.9, 57.9, 0.2),
        }
    }

    #[test]
    fn fully_covered_tile_contributes_its_area_fraction() {
        let tiles = [tile(16.0, 58.0, 100.0, 0.5, 40.0)];
        let refs: Vec<&GridTile> = tiles.iter().collect();
        let jobs = [covering_job()];
        let out = scan_tiles(&refs, &jobs);

        let fraction = tiles[0].polygon.geodesic_area_unsigned() / REFERENCE_TILE_AREA_M2;
        assert!((out[0].population - 100.0 * fraction).abs() < 1e-6);
        assert!((out[0].dwell_time_s - 0.5 * fraction).abs() < 1e-9);
        assert_eq!(out[0].speed_samples, vec![40.0]);
        assert!((out[0].drone_density_sum - 0.5 * fraction).abs() < 1e-9);
        assert!((out[0].peak_density_per_m2 - 100.0 / REFERENCE_TILE_AREA_M2).abs() < 1e-12);
    }

    #[test]
    fn disjoint_buffer_accumulates_nothing() {
        let tiles = [tile(16.0, 58.0, 100.0, 0.5, 40.0)];
        let refs: Vec<&GridTile> = tiles.iter().collect();
        let far = MultiPolygon::new(vec![square(10.0, 50.0, 0.001)]);
        let jobs = [SegmentJob {
            slot: 0,
            segment: 0,
            ground_buffer: far.clone(),
            air_buffer: far,
            source_circle: square(10.0, 50.0, 0.001),
            destination_circle: square(10.0, 50.0, 0.001),
        }];
        let out = scan_tiles(&refs, &jobs);
        assert_eq!(out[0].population, 0.0);
        assert_eq!(out[0].dwell_time_s, 0.0);
        assert!(out[0].speed_samples.is_empty());
    }

    #[test]
    fn partition_count_splits_only_large_scans() {
        assert_eq!(partition_count(10), 1);
        assert_eq!(partition_count(1000), 1);
        assert_eq!(partition_count(1001), 4);
    }

    #[test]
    fn reduce_matches_single_pass_scan() {
        let tiles: Vec<GridTile> = (0..6)
            .map(|i| tile(16.0 + i as f64 * 0.001, 58.0, 10.0 * (i + 1) as f64, 0.1, 30.0))
            .collect();
        let refs: Vec<&GridTile> = tiles.iter().collect();
        let jobs = [covering_job()];

        let whole = scan_tiles(&refs, &jobs);

        let chunks: Vec<Vec<SegmentAccumulator>> = refs
            .chunks(2)
            .map(|chunk| scan_tiles(chunk, &jobs))
            .collect();
        let merged = reduce(&chunks, 1);

        assert!((whole[0].population - merged[0].population).abs() < 1e-9);
        assert!((whole[0].dwell_time_s - merged[0].dwell_time_s).abs() < 1e-12);
        assert_eq!(whole[0].speed_samples.len(), merged[0].speed_samples.len());
        assert!(
            (whole[0].peak_density_per_m2 - merged[0].peak_density_per_m2).abs() < 1e-12
        );
    }

    #[tokio::test]
    async fn dispatch_reduces_all_partitions() {
        let mut grid = PopulationGrid::empty();
        for i in 0..8 {
            grid.tiles.push(tile(16.0 + i as f64 * 0.001, 58.0, 10.0, 0.1, 30.0));
        }
        let tile_ids: Vec<usize> = (0..grid.len()).collect();
        let grid = Arc::new(grid);
        let jobs = Arc::new(vec![covering_job()]);

        let refs: Vec<&GridTile> = grid.tiles.iter().collect();
        let expected = scan_tiles(&refs, &jobs);

        let out = dispatch(Arc::clone(&grid), tile_ids, jobs).await.unwrap();
        assert!((out[0].population - expected[0].population).abs() < 1e-9);
    }
}
