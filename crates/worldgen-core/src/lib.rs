//! This crate defines the pieces shared by city generators: the [`GridLayout`] strategy, the
//! [`ChunkArchive`] existence check and the tunable [`GenConfig`].

use ec_core::{Chunk, ChunkPos, IntersectionId, RoadGraph};
use glam::{IVec2, Vec3};
use serde::{Deserialize, Serialize};

/// Decides where intersections go and how they are joined by roads.
///
/// A layout is consulted once per sub-cell of the chunk being generated.
pub trait GridLayout: Send {
    /// Returns a candidate position for a new intersection inside the sub-cell whose origin is
    /// `cell`, or [`None`] if no intersection belongs there.
    fn intersection_position(&self, cell: IVec2) -> Option<Vec3>;

    /// Joins `new`, which was just placed (or reused) in `chunk`, to the intersections the chunk
    /// already knows about.
    ///
    /// Returns the number of roads the chunk claimed.
    fn generate_roads(&self, chunk: &mut Chunk, graph: &mut RoadGraph, new: IntersectionId)
        -> usize;
}

/// Something that knows which chunks were persisted.
///
/// Generators consult it to avoid generating a chunk that should be loaded instead.
pub trait ChunkArchive: Send + Sync {
    /// Returns whether a persisted representation of the chunk at `pos` exists.
    fn chunk_exists(&self, pos: ChunkPos) -> bool;
}

/// The available [`GridLayout`] implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayoutKind {
    /// Rectangular blocks, twice as long on X as on Z.
    #[default]
    Manhattan,
}

/// The knobs of city generation.
///
/// All distances are in world units, all angles in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenConfig {
    /// The layout used to place intersections and roads.
    pub layout: LayoutKind,

    /// Two intersections of the same chunk are never closer than this. The same distance is used
    /// to decide whether a neighbor's intersection should be reused instead of placing a new one.
    pub min_intersection_distance: f32,

    /// The distance between two grid lines of the Manhattan layout, along X.
    pub grid_spacing_x: f32,
    /// The distance between two grid lines of the Manhattan layout, along Z.
    pub grid_spacing_z: f32,
    /// How far from a grid line a sub-cell may be and still receive an intersection.
    pub grid_tolerance: f32,

    /// How many of the nearest intersections are considered when connecting a new one.
    pub neighbor_candidates: usize,
    /// How far from the ideal direction a road may point.
    pub angle_tolerance: f32,
    /// No other intersection may lie closer than this to a new road.
    pub segment_clearance: f32,
    /// No existing road may have its midpoint closer than this to the midpoint of a new road.
    pub road_clearance: f32,

    /// The number of steps after which a city block walk gives up.
    pub max_walk_steps: usize,
    /// Two city blocks never have their centroids closer than this.
    pub block_separation: f32,

    /// The seed of the density noise.
    pub seed: i32,
    /// The frequency of the density noise.
    pub density_frequency: f32,

    /// How much of a block is left around its building, as a fraction of the distance from the
    /// centroid to the corners.
    pub building_setback: f32,
    /// The height of a building on an empty block.
    pub min_building_height: f32,
    /// The height of a building on the densest block.
    pub max_building_height: f32,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            layout: LayoutKind::Manhattan,
            min_intersection_distance: 40.0,
            grid_spacing_x: 200.0,
            grid_spacing_z: 100.0,
            grid_tolerance: 10.0,
            neighbor_candidates: 8,
            angle_tolerance: 20.0,
            segment_clearance: 15.0,
            road_clearance: 15.0,
            max_walk_steps: 32,
            block_separation: 20.0,
            seed: 1337,
            density_frequency: 0.002,
            building_setback: 0.2,
            min_building_height: 8.0,
            max_building_height: 120.0,
        }
    }
}
