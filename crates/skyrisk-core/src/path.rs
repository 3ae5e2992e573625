//! The waypoint/segment arena and its editing operations.
//!
//! Waypoints and segments are addressed by their position in the arena,
//! and segment `i` always connects waypoint `i` to waypoint `i + 1`.
//! Every mutation re-derives the affected segments' geometry and returns
//! their ids so the caller can schedule a risk recomputation.

use geo::{Bearing, Destination, Distance, Haversine, Point};

use crate::error::{Result, RiskError};
use crate::geometry;
use crate::models::{RiskParams, Segment, SegmentStats, Waypoint};

#[derive(Debug, Default)]
pub struct PathModel {
    waypoints: Vec<Waypoint>,
    segments: Vec<Segment>,
}

impl PathModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn waypoint(&self, id: usize) -> Option<&Waypoint> {
        self.waypoints.get(id)
    }

    pub fn segment(&self, id: usize) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn segment_mut(&mut self, id: usize) -> Option<&mut Segment> {
        self.segments.get_mut(id)
    }

    pub fn all_segment_ids(&self) -> Vec<usize> {
        (0..self.segments.len()).collect()
    }

    /// Append a waypoint at the end of the path. When a predecessor
    /// exists, a segment from it to the new waypoint is created with the
    /// predecessor's altitude and the current global buffer parameters.
    pub fn append_waypoint(
        &mut self,
        position: Point<f64>,
        altitude_m: f64,
        params: &RiskParams,
    ) -> usize {
        let id = self.waypoints.len();
        self.waypoints.push(Waypoint::new(id, position, altitude_m));

        if id > 0 {
            let source = id - 1;
            let segment_id = self.segments.len();
            self.segments.push(Segment {
                index: segment_id,
                source,
                destination: id,
                altitude_m: self.waypoints[source].altitude_m,
                altitude_overridden: false,
                collision_radius_m: params.collision_radius_m,
                extension_m: params.effective_extension_m(),
                geometry: geometry::derive_segment_geometry(
                    &self.waypoints[source],
                    &self.waypoints[id],
                    self.waypoints[source].altitude_m,
                    params.collision_radius_m,
                    params.effective_extension_m(),
                ),
                stats: SegmentStats::default(),
            });
        }
        id
    }

    /// Move a waypoint, re-deriving its circle and both adjoining
    /// segments. Returns the affected segment ids.
    pub fn move_waypoint(&mut self, id: usize, position: Point<f64>) -> Result<Vec<usize>> {
        let waypoint = self
            .waypoints
            .get_mut(id)
            .ok_or(RiskError::UnknownWaypoint(id))?;
        waypoint.position = position;
        waypoint.refresh_circle();

        let affected = self.adjoining_segments(id);
        for &segment in &affected {
            self.rederive_segment(segment);
        }
        Ok(affected)
    }

    /// Change a waypoint's altitude. The outgoing segment follows the new
    /// altitude (and is marked manually overridden when `manual`); the
    /// incoming segment is re-derived only when its source is smooth,
    /// since only then does its trapezoid depend on this altitude.
    pub fn set_altitude(&mut self, id: usize, altitude_m: f64, manual: bool) -> Result<Vec<usize>> {
        let waypoint = self
            .waypoints
            .get_mut(id)
            .ok_or(RiskError::UnknownWaypoint(id))?;
        waypoint.altitude_m = altitude_m;
        waypoint.refresh_circle();

        let mut affected = Vec::new();
        if let Some(outgoing) = self.outgoing_segment(id) {
            let segment = &mut self.segments[outgoing];
            segment.altitude_m = altitude_m;
            if manual {
                segment.altitude_overridden = true;
            }
            affected.push(outgoing);
        }
        if let Some(incoming) = self.incoming_segment(id) {
            if self.waypoints[self.segments[incoming].source].smooth {
                affected.push(incoming);
            }
        }
        for &segment in &affected {
            self.rederive_segment(segment);
        }
        Ok(affected)
    }

    /// Toggle smooth altitude transition on a waypoint's outgoing segment.
    pub fn set_smooth(&mut self, id: usize, smooth: bool) -> Result<Vec<usize>> {
        let waypoint = self
            .waypoints
            .get_mut(id)
            .ok_or(RiskError::UnknownWaypoint(id))?;
        waypoint.smooth = smooth;

        let affected: Vec<usize> = self.outgoing_segment(id).into_iter().collect();
        for &segment in &affected {
            self.rederive_segment(segment);
        }
        Ok(affected)
    }

    /// Split a segment at its midpoint. The original segment is shortened
    /// to end at the inserted waypoint and a new segment continues to the
    /// original destination. Returns (new waypoint id, new segment id).
    pub fn split_segment(&mut self, segment_id: usize) -> Result<(usize, usize)> {
        let segment = self
            .segments
            .get(segment_id)
            .ok_or(RiskError::UnknownSegment(segment_id))?;
        let source = &self.waypoints[segment.source];
        let destination = &self.waypoints[segment.destination];

        let span = Haversine.distance(source.position, destination.position);
        if span < 1e-9 {
            return Err(RiskError::DegenerateSplit(segment_id));
        }
        let bearing = Haversine.bearing(source.position, destination.position);
        let midpoint = Haversine.destination(source.position, bearing, span / 2.0);

        let new_waypoint = segment.source + 1;
        let altitude = source.altitude_m;
        let collision_radius = segment.collision_radius_m;
        let extension = segment.extension_m;

        self.waypoints
            .insert(new_waypoint, Waypoint::new(new_waypoint, midpoint, altitude));

        // Shift endpoint references past the insertion point.
        for segment in &mut self.segments {
            if segment.source >= new_waypoint {
                segment.source += 1;
            }
            if segment.destination >= new_waypoint {
                segment.destination += 1;
            }
        }
        self.segments[segment_id].destination = new_waypoint;

        let new_segment = segment_id + 1;
        self.segments.insert(
            new_segment,
            Segment {
                index: new_segment,
                source: new_waypoint,
                destination: new_waypoint + 1,
                altitude_m: altitude,
                altitude_overridden: false,
                collision_radius_m: collision_radius,
                extension_m: extension,
                geometry: geometry::derive_segment_geometry(
                    &self.waypoints[new_waypoint],
                    &self.waypoints[new_waypoint + 1],
                    altitude,
                    collision_radius,
                    extension,
                ),
                stats: SegmentStats::default(),
            },
        );

        self.renumber();
        self.rederive_segment(segment_id);
        Ok((new_waypoint, new_segment))
    }

    /// Remove a waypoint. Removing the first or last waypoint drops its
    /// only adjoining segment; removing an interior waypoint merges the
    /// incoming and outgoing segments into one. Returns the segment ids
    /// (after renumbering) that need recomputation.
    pub fn remove_waypoint(&mut self, id: usize) -> Result<Vec<usize>> {
        if id >= self.waypoints.len() {
            return Err(RiskError::UnknownWaypoint(id));
        }
        let last = self.waypoints.len() - 1;

        let affected = if self.segments.is_empty() {
            // Lone waypoint, nothing else to fix up.
            self.waypoints.remove(id);
            Vec::new()
        } else if id == 0 {
            self.waypoints.remove(0);
            self.segments.remove(0);
            self.shift_waypoint_refs_above(0);
            Vec::new()
        } else if id == last {
            self.waypoints.remove(last);
            self.segments.remove(self.segments.len() - 1);
            Vec::new()
        } else {
            // Interior: segment id-1 ends here, segment id starts here.
            let merged = id - 1;
            let former_destination = self.segments[id].destination;
            self.segments[merged].destination = former_destination;
            self.segments.remove(id);
            self.waypoints.remove(id);
            self.shift_waypoint_refs_above(id);
            vec![merged]
        };

        self.renumber();
        for &segment in &affected {
            self.rederive_segment(segment);
        }
        Ok(affected)
    }

    /// Apply a new collision radius to every segment.
    pub fn set_collision_radius(&mut self, radius_m: f64) -> Vec<usize> {
        for segment in &mut self.segments {
            segment.collision_radius_m = radius_m;
        }
        let affected = self.all_segment_ids();
        for &segment in &affected {
            self.rederive_segment(segment);
        }
        affected
    }

    /// Apply a new extension length to every segment (0 disables).
    pub fn set_extension(&mut self, extension_m: f64) -> Vec<usize> {
        for segment in &mut self.segments {
            segment.extension_m = extension_m;
        }
        let affected = self.all_segment_ids();
        for &segment in &affected {
            self.rederive_segment(segment);
        }
        affected
    }

    /// Apply a global altitude to every segment not manually overridden,
    /// updating the source waypoints (and the final destination) to match.
    pub fn set_global_altitude(&mut self, altitude_m: f64) -> Vec<usize> {
        let mut affected = Vec::new();
        for id in 0..self.segments.len() {
            if self.segments[id].altitude_overridden {
                continue;
            }
            self.segments[id].altitude_m = altitude_m;
            let source = self.segments[id].source;
            self.waypoints[source].altitude_m = altitude_m;
            self.waypoints[source].refresh_circle();
            affected.push(id);
        }
        if let Some(last) = self.segments.last() {
            if !last.altitude_overridden {
                let destination = last.destination;
                self.waypoints[destination].altitude_m = altitude_m;
                self.waypoints[destination].refresh_circle();
            }
        }
        for &segment in &affected {
            self.rederive_segment(segment);
        }
        affected
    }

    fn outgoing_segment(&self, waypoint: usize) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| s.source == waypoint)
    }

    fn incoming_segment(&self, waypoint: usize) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| s.destination == waypoint)
    }

    fn adjoining_segments(&self, waypoint: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(2);
        out.extend(self.incoming_segment(waypoint));
        out.extend(self.outgoing_segment(waypoint));
        out
    }

    fn shift_waypoint_refs_above(&mut self, removed: usize) {
        for segment in &mut self.segments {
            if segment.source > removed {
                segment.source -= 1;
            }
            if segment.destination > removed {
                segment.destination -= 1;
            }
        }
    }

    fn renumber(&mut self) {
        for (index, waypoint) in self.waypoints.iter_mut().enumerate() {
            waypoint.index = index;
        }
        for (index, segment) in self.segments.iter_mut().enumerate() {
            segment.index = index;
        }
    }

    fn rederive_segment(&mut self, id: usize) {
        let segment = &self.segments[id];
        let geometry = geometry::derive_segment_geometry(
            &self.waypoints[segment.source],
            &self.waypoints[segment.destination],
            segment.altitude_m,
            segment.collision_radius_m,
            segment.extension_m,
        );
        self.segments[id].geometry = geometry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_path(count: usize) -> PathModel {
        let params = RiskParams::default();
        let mut path = PathModel::new();
        let origin = Point::new(16.19, 58.59);
        for i in 0..count {
            let position = Haversine.destination(origin, 90.0, 1000.0 * i as f64);
            path.append_waypoint(position, 200.0, &params);
        }
        path
    }

    fn assert_contiguous(path: &PathModel) {
        for (i, waypoint) in path.waypoints().iter().enumerate() {
            assert_eq!(waypoint.index, i);
        }
        for (i, segment) in path.segments().iter().enumerate() {
            assert_eq!(segment.index, i);
            assert_eq!(segment.source, i);
            assert_eq!(segment.destination, i + 1);
        }
    }

    #[test]
    fn append_builds_contiguous_chain() {
        let path = build_path(4);
        assert_eq!(path.waypoints().len(), 4);
        assert_eq!(path.segments().len(), 3);
        assert_contiguous(&path);
    }

    #[test]
    fn split_inserts_midpoint_and_renumbers() {
        let mut path = build_path(3);
        let (new_waypoint, new_segment) = path.split_segment(0).unwrap();
        assert_eq!((new_waypoint, new_segment), (1, 1));
        assert_eq!(path.waypoints().len(), 4);
        assert_eq!(path.segments().len(), 3);
        assert_contiguous(&path);

        // Both halves are ~500 m.
        assert!((path.segment(0).unwrap().geometry.length_m - 500.0).abs() < 1.0);
        assert!((path.segment(1).unwrap().geometry.length_m - 500.0).abs() < 1.0);
        // The downstream segment kept its span.
        assert!((path.segment(2).unwrap().geometry.length_m - 1000.0).abs() < 1.0);
    }

    #[test]
    fn remove_interior_waypoint_merges_segments() {
        let mut path = build_path(3);
        let affected = path.remove_waypoint(1).unwrap();
        assert_eq!(affected, vec![0]);
        assert_eq!(path.waypoints().len(), 2);
        assert_eq!(path.segments().len(), 1);
        assert_contiguous(&path);
        // Merged segment spans the original first and third waypoints.
        assert!((path.segment(0).unwrap().geometry.length_m - 2000.0).abs() < 1.0);
    }

    #[test]
    fn remove_first_waypoint_shifts_indices_down() {
        let mut path = build_path(3);
        path.remove_waypoint(0).unwrap();
        assert_eq!(path.waypoints().len(), 2);
        assert_eq!(path.segments().len(), 1);
        assert_contiguous(&path);
    }

    #[test]
    fn remove_last_waypoint_drops_incoming_segment() {
        let mut path = build_path(3);
        path.remove_waypoint(2).unwrap();
        assert_eq!(path.waypoints().len(), 2);
        assert_eq!(path.segments().len(), 1);
        assert_contiguous(&path);
    }

    #[test]
    fn global_altitude_skips_overridden_segments() {
        let mut path = build_path(3);
        path.set_altitude(1, 400.0, true).unwrap();
        assert!(path.segment(1).unwrap().altitude_overridden);

        let affected = path.set_global_altitude(120.0);
        assert_eq!(affected, vec![0]);
        assert_eq!(path.segment(0).unwrap().altitude_m, 120.0);
        assert_eq!(path.segment(1).unwrap().altitude_m, 400.0);
        assert_eq!(path.waypoint(0).unwrap().altitude_m, 120.0);
        // Overridden segment's source keeps its manual altitude.
        assert_eq!(path.waypoint(1).unwrap().altitude_m, 400.0);
    }

    #[test]
    fn move_waypoint_rederives_both_neighbors() {
        let mut path = build_path(3);
        let shifted = Haversine.destination(path.waypoint(1).unwrap().position, 0.0, 500.0);
        let affected = path.move_waypoint(1, shifted).unwrap();
        assert_eq!(affected, vec![0, 1]);
        assert!(path.segment(0).unwrap().geometry.length_m > 1000.0);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut path = build_path(2);
        assert!(matches!(
            path.move_waypoint(9, Point::new(0.0, 0.0)),
            Err(RiskError::UnknownWaypoint(9))
        ));
        assert!(matches!(
            path.split_segment(5),
            Err(RiskError::UnknownSegment(5))
        ));
    }
}
