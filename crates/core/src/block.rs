use glam::{Vec2, Vec3};
use smallvec::SmallVec;

use crate::graph::IntersectionId;

/// The vertices of a [`CityBlock`], in walk order.
pub type BlockVertices = SmallVec<[IntersectionId; 8]>;

/// A closed polygon of intersections bounding an area where buildings can be placed.
#[derive(Debug, Clone)]
pub struct CityBlock {
    vertices: BlockVertices,
    outline: Vec<Vec2>,
    centroid: Vec3,
    density: f32,
    buildings: Vec<Building>,
}

impl CityBlock {
    /// Creates a new [`CityBlock`].
    ///
    /// `outline` holds the ground-plane positions of `vertices`, in the same order. The centroid
    /// is the average of the outline.
    ///
    /// # Panics
    ///
    /// Panics if fewer than three vertices are provided, or if the two lists differ in length.
    #[track_caller]
    pub fn new(vertices: BlockVertices, outline: Vec<Vec2>, density: f32) -> Self {
        assert!(vertices.len() >= 3, "a city block needs at least three vertices");
        assert_eq!(vertices.len(), outline.len());

        let sum = outline.iter().copied().sum::<Vec2>();
        let c = sum / outline.len() as f32;

        Self {
            vertices,
            outline,
            centroid: Vec3::new(c.x, 0.0, c.y),
            density,
            buildings: Vec::new(),
        }
    }

    /// The intersections at the corners of the block.
    #[inline]
    pub fn vertices(&self) -> &[IntersectionId] {
        &self.vertices
    }

    /// The ground-plane positions of the corners, in the same order as
    /// [`vertices`](Self::vertices).
    #[inline]
    pub fn outline(&self) -> &[Vec2] {
        &self.outline
    }

    /// The average of the corners.
    #[inline]
    pub fn centroid(&self) -> Vec3 {
        self.centroid
    }

    /// How built-up the block is, in `[0, 1]`.
    #[inline]
    pub fn density(&self) -> f32 {
        self.density
    }

    /// The buildings that were placed on the block.
    #[inline]
    pub fn buildings(&self) -> &[Building] {
        &self.buildings
    }

    /// Adds a building to the block.
    #[inline]
    pub fn push_building(&mut self, building: Building) {
        self.buildings.push(building);
    }

    /// Returns whether `p` lies strictly inside the outline of the block.
    pub fn contains(&self, p: Vec2) -> bool {
        point_in_polygon(&self.outline, p)
    }
}

/// A building standing on a lot of a [`CityBlock`].
///
/// The footprint is what a mesh builder extrudes up to `height`.
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    /// The ground-plane outline of the lot.
    pub footprint: Vec<Vec2>,
    /// The height of the building, in world units.
    pub height: f32,
}

/// Even-odd test of `p` against a closed polygon. Points exactly on an edge may go either way.
pub fn point_in_polygon(polygon: &[Vec2], p: Vec2) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);
    for (i, &a) in polygon.iter().enumerate() {
        let b = polygon[j];
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RoadGraph;

    #[test]
    fn centroid_is_the_average_of_corners() {
        let mut g = RoadGraph::default();
        let outline = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(200.0, 0.0),
            Vec2::new(200.0, 100.0),
            Vec2::new(0.0, 100.0),
        ];
        let vertices = outline
            .iter()
            .map(|p| g.add_intersection(Vec3::new(p.x, 0.0, p.y)))
            .collect();

        let block = CityBlock::new(vertices, outline, 0.5);
        assert_eq!(block.centroid(), Vec3::new(100.0, 0.0, 50.0));
        assert!(block.contains(Vec2::new(100.0, 50.0)));
        assert!(!block.contains(Vec2::new(250.0, 50.0)));
    }

    #[test]
    #[should_panic(expected = "at least three")]
    fn degenerate_blocks_are_refused() {
        let mut g = RoadGraph::default();
        let a = g.add_intersection(Vec3::ZERO);
        let b = g.add_intersection(Vec3::X);
        let _ = CityBlock::new(
            [a, b].into_iter().collect(),
            vec![Vec2::ZERO, Vec2::X],
            0.0,
        );
    }
}
