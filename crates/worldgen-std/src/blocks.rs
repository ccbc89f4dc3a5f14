//! Discovery of the city blocks enclosed by the roads of a chunk.

use std::hash::BuildHasherDefault;

use ec_core::{ground, heading, point_in_polygon, BlockVertices, Chunk, IntersectionId, RoadGraph};
use glam::Vec2;
use hashbrown::HashMap;
use rustc_hash::FxHasher;

/// The closed outline found by a walk.
#[derive(Debug, Clone)]
pub struct Outline {
    /// The intersections at the corners, in walk order.
    pub vertices: BlockVertices,
    /// The ground-plane position of each corner.
    pub points: Vec<Vec2>,
}

impl Outline {
    /// The average of the corners.
    pub fn centroid(&self) -> Vec2 {
        self.points.iter().copied().sum::<Vec2>() / self.points.len() as f32
    }

    /// Twice the signed area of the outline. Blocks walked by taking the sharpest right turn
    /// are positive, the boundary around the whole network is negative.
    fn signed_area2(&self) -> f32 {
        let n = self.points.len();
        (0..n)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum()
    }
}

/// The ground-plane positions of the intersections claimed by a chunk.
type Positions = HashMap<IntersectionId, Vec2, BuildHasherDefault<FxHasher>>;

/// Walks the road network of a chunk looking for the block whose boundary starts at `start`.
pub struct BlockWalker<'a> {
    graph: &'a RoadGraph,
    known: Positions,
    max_steps: usize,
}

impl<'a> BlockWalker<'a> {
    /// Creates a new [`BlockWalker`] for the intersections of `chunk`.
    pub fn new(graph: &'a RoadGraph, chunk: &Chunk, max_steps: usize) -> Self {
        let known = chunk
            .intersections()
            .iter()
            .filter_map(|&id| Some((id, ground(graph.position(id)?))))
            .collect();

        Self {
            graph,
            known,
            max_steps,
        }
    }

    fn position(&self, id: IntersectionId) -> Option<Vec2> {
        self.known
            .get(&id)
            .copied()
            .or_else(|| self.graph.position(id).map(ground))
    }

    /// Walks from `start` and returns the enclosed outline, if the walk closes.
    ///
    /// The first edge is the one pointing closest to +X. From there, every step takes the
    /// sharpest right turn. A step that would leave another intersection of the chunk inside
    /// the triangle it sweeps with the start goes to the closest such intersection instead.
    #[profiling::function]
    pub fn walk(&self, start: IntersectionId) -> Option<Outline> {
        let start_pos = self.position(start)?;

        let first = self
            .graph
            .intersection(start)?
            .roads()
            .iter()
            .filter_map(|&road| self.graph.other_end(road, start))
            .filter_map(|other| {
                let h = heading(self.position(other)? - start_pos);
                Some((other, h.min(360.0 - h)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))?
            .0;

        let mut outline = Outline {
            vertices: BlockVertices::new(),
            points: Vec::new(),
        };
        outline.vertices.push(start);
        outline.points.push(start_pos);

        let mut prev = (start, start_pos);
        let mut current = (first, self.position(first)?);

        for _ in 0..self.max_steps {
            if current.0 == start {
                return (outline.vertices.len() >= 3 && outline.signed_area2() > 0.0)
                    .then_some(outline);
            }
            if outline.vertices.contains(&current.0) {
                return None;
            }
            outline.vertices.push(current.0);
            outline.points.push(current.1);

            let next = self.sharpest_right(prev, current)?;
            let next = self.closest_inside(start_pos, current, next);
            prev = current;
            current = next;
        }

        None
    }

    /// Among the roads leaving `current`, the one with the smallest counter-clockwise rotation
    /// from the way back to `prev`.
    fn sharpest_right(
        &self,
        prev: (IntersectionId, Vec2),
        current: (IntersectionId, Vec2),
    ) -> Option<(IntersectionId, Vec2)> {
        let back = heading(prev.1 - current.1);

        self.graph
            .intersection(current.0)?
            .roads()
            .iter()
            .filter_map(|&road| self.graph.other_end(road, current.0))
            .filter_map(|other| {
                let p = self.position(other)?;
                let turn = (heading(p - current.1) - back).rem_euclid(360.0);
                (turn > f32::EPSILON).then_some((other, p, turn))
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(id, p, _)| (id, p))
    }

    /// Replaces `candidate` by the known intersection closest to `current` lying strictly
    /// inside the triangle `(start, current, candidate)`, if any.
    fn closest_inside(
        &self,
        start: Vec2,
        current: (IntersectionId, Vec2),
        candidate: (IntersectionId, Vec2),
    ) -> (IntersectionId, Vec2) {
        self.known
            .iter()
            .filter(|&(&id, _)| id != current.0 && id != candidate.0)
            .filter(|&(_, &p)| strictly_inside(p, start, current.1, candidate.1))
            .min_by(|a, b| {
                a.1.distance_squared(current.1)
                    .total_cmp(&b.1.distance_squared(current.1))
            })
            .map_or(candidate, |(&id, &p)| (id, p))
    }

    /// Returns whether one of the known intersections that are not corners of `outline` lies
    /// inside of it.
    pub fn encloses_other(&self, outline: &Outline) -> bool {
        self.known
            .iter()
            .filter(|&(id, _)| !outline.vertices.contains(id))
            .any(|(_, &p)| point_in_polygon(&outline.points, p))
    }
}

/// Returns whether `p` lies strictly inside the triangle `(a, b, c)`, whatever its winding.
fn strictly_inside(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    const EPS: f32 = 1e-3;
    let cross = |o: Vec2, u: Vec2, v: Vec2| (u - o).perp_dot(v - o);

    let area = cross(a, b, c);
    if area.abs() <= EPS {
        return false;
    }

    let s = area.signum();
    cross(a, b, p) * s > EPS && cross(b, c, p) * s > EPS && cross(c, a, p) * s > EPS
}
