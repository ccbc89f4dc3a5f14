use ec_core::{ground, heading, Chunk, IntersectionId, RoadGraph};
use ec_worldgen_core::{GenConfig, GridLayout};
use glam::{IVec2, Vec2, Vec3};
use smallvec::SmallVec;

/// The heading of a road going north (toward -Z).
const NORTH: f32 = 90.0;
/// The heading of a road going west (toward -X).
const WEST: f32 = 180.0;

/// A rectangular grid of streets.
///
/// Intersections sit where a vertical and a horizontal grid line cross. Every intersection is
/// joined to the closest intersection to its north and to its west, which were produced before
/// it because sub-cells are visited with X as the outer axis.
#[derive(Debug, Clone)]
pub struct ManhattanGridLayout {
    spacing: Vec2,
    tolerance: f32,
    candidates: usize,
    angle_tolerance: f32,
    segment_clearance: f32,
    road_clearance: f32,
}

impl ManhattanGridLayout {
    /// Creates a new [`ManhattanGridLayout`] from the provided configuration.
    pub fn new(config: &GenConfig) -> Self {
        Self {
            spacing: Vec2::new(config.grid_spacing_x, config.grid_spacing_z),
            tolerance: config.grid_tolerance,
            candidates: config.neighbor_candidates,
            angle_tolerance: config.angle_tolerance,
            segment_clearance: config.segment_clearance,
            road_clearance: config.road_clearance,
        }
    }

    /// Returns whether a road between `a` and `b` keeps its distance from the rest of the
    /// network.
    fn is_clear(
        &self,
        chunk: &Chunk,
        graph: &RoadGraph,
        a: (IntersectionId, Vec2),
        b: (IntersectionId, Vec2),
    ) -> bool {
        let seg2 = self.segment_clearance * self.segment_clearance;
        let crowded = chunk
            .intersections()
            .iter()
            .filter(|&&id| id != a.0 && id != b.0)
            .filter_map(|&id| graph.position(id))
            .any(|p| distance_to_segment_squared(ground(p), a.1, b.1) < seg2);
        if crowded {
            return false;
        }

        let mid = (a.1 + b.1) * 0.5;
        let road2 = self.road_clearance * self.road_clearance;
        !chunk
            .roads()
            .iter()
            .filter_map(|&id| graph.road(id))
            .any(|r| ground(r.position()).distance_squared(mid) < road2)
    }
}

impl GridLayout for ManhattanGridLayout {
    fn intersection_position(&self, cell: IVec2) -> Option<Vec3> {
        let off = |c: i32, spacing: f32| {
            let r = (c as f32).rem_euclid(spacing);
            r.min(spacing - r)
        };

        if off(cell.x, self.spacing.x) <= self.tolerance
            && off(cell.y, self.spacing.y) <= self.tolerance
        {
            Some(Vec3::new(cell.x as f32, 0.0, cell.y as f32))
        } else {
            None
        }
    }

    fn generate_roads(
        &self,
        chunk: &mut Chunk,
        graph: &mut RoadGraph,
        new: IntersectionId,
    ) -> usize {
        let Some(origin) = graph.position(new).map(ground) else {
            return 0;
        };

        let mut nearest: SmallVec<[(IntersectionId, Vec2, f32); 16]> = chunk
            .intersections()
            .iter()
            .filter(|&&id| id != new)
            .filter_map(|&id| {
                let p = ground(graph.position(id)?);
                Some((id, p, p.distance_squared(origin)))
            })
            .collect();
        nearest.sort_unstable_by(|a, b| a.2.total_cmp(&b.2));
        nearest.truncate(self.candidates);

        let mut claimed = 0;
        for target in [NORTH, WEST] {
            let Some(&(other, p, _)) = nearest.iter().find(|(_, p, _)| {
                angle_between(heading(*p - origin), target) <= self.angle_tolerance
            }) else {
                continue;
            };

            // Roads created by a neighbor are claimed as they are.
            let exists = graph.road_between(new, other).is_some();
            if !exists && !self.is_clear(chunk, graph, (new, origin), (other, p)) {
                ec_log::trace!("rejected a crowded road at {origin} toward {p}");
                continue;
            }

            if chunk.connect(graph, new, other).is_some() {
                claimed += 1;
            }
        }
        claimed
    }
}

/// The absolute difference between two headings, in `[0, 180]`.
fn angle_between(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// The squared distance between `p` and the segment `[a, b]`.
fn distance_to_segment_squared(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 == 0.0 {
        return p.distance_squared(a);
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    p.distance_squared(a + ab * t)
}
