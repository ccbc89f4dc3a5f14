use std::fmt;

use glam::{IVec2, Vec2, Vec3};

/// The side-length of a chunk, in world units.
pub const CHUNK_SIZE: i32 = 1000;

/// The side-length of a sub-cell, in world units.
///
/// Generation walks a chunk one sub-cell at a time to decide where intersections go.
pub const SUBCELL_SIZE: i32 = 10;

/// The number of sub-cells along one side of a chunk.
pub const SUBCELLS_PER_SIDE: i32 = CHUNK_SIZE / SUBCELL_SIZE;

/// The position of a chunk in the world.
///
/// # Representation
///
/// The coordinates are the world-space origin of the chunk on the ground plane (X and Z, with Y
/// pointing up). A *valid* chunk position has both coordinates a multiple of [`CHUNK_SIZE`]; use
/// [`ChunkPos::is_aligned`] to check a position that comes from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkPos {
    /// The X coordinate of the chunk origin.
    pub x: i32,
    /// The Z coordinate of the chunk origin.
    pub z: i32,
}

impl ChunkPos {
    /// Creates a new [`ChunkPos`] from the provided origin.
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns the position of the chunk that contains the provided world-space position.
    ///
    /// The returned position is always aligned.
    #[inline]
    pub fn containing(pos: Vec3) -> Self {
        let x = pos.x.floor() as i32;
        let z = pos.z.floor() as i32;
        Self {
            x: x.div_euclid(CHUNK_SIZE) * CHUNK_SIZE,
            z: z.div_euclid(CHUNK_SIZE) * CHUNK_SIZE,
        }
    }

    /// Returns whether both coordinates are a multiple of [`CHUNK_SIZE`].
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.x.rem_euclid(CHUNK_SIZE) == 0 && self.z.rem_euclid(CHUNK_SIZE) == 0
    }

    /// Returns the origin of the chunk as an [`IVec2`] (X, Z).
    #[inline]
    pub const fn origin(self) -> IVec2 {
        IVec2::new(self.x, self.z)
    }

    /// Returns the world-space center of the chunk, on the ground plane.
    #[inline]
    pub fn center(self) -> Vec3 {
        let half = CHUNK_SIZE as f32 * 0.5;
        Vec3::new(self.x as f32 + half, 0.0, self.z as f32 + half)
    }

    /// Returns whether the provided world-space position lies within the bounds of this chunk.
    ///
    /// The bounds are half-open: the minimum edges are included, the maximum edges are not.
    #[inline]
    pub fn contains(self, pos: Vec3) -> bool {
        self.contains_xz(Vec2::new(pos.x, pos.z))
    }

    /// Like [`ChunkPos::contains`], but for a point of the ground plane.
    #[inline]
    pub fn contains_xz(self, p: Vec2) -> bool {
        let min = self.origin().as_vec2();
        let max = min + CHUNK_SIZE as f32;
        p.x >= min.x && p.y >= min.y && p.x < max.x && p.y < max.y
    }

    /// Returns the position offset by the provided number of chunks along each axis.
    #[inline]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx * CHUNK_SIZE,
            z: self.z + dz * CHUNK_SIZE,
        }
    }

    /// Returns the eight chunks that share an edge or a corner with this one.
    pub fn neighbors(self) -> [ChunkPos; 8] {
        [
            self.offset(-1, -1),
            self.offset(0, -1),
            self.offset(1, -1),
            self.offset(-1, 0),
            self.offset(1, 0),
            self.offset(-1, 1),
            self.offset(0, 1),
            self.offset(1, 1),
        ]
    }

    /// Returns the world-space origins of every sub-cell of the chunk.
    ///
    /// Sub-cells are produced column by column: X is the outer axis, Z the inner one.
    pub fn subcells(self) -> impl Iterator<Item = IVec2> {
        let origin = self.origin();
        (0..SUBCELLS_PER_SIDE).flat_map(move |i| {
            (0..SUBCELLS_PER_SIDE)
                .map(move |j| origin + IVec2::new(i * SUBCELL_SIZE, j * SUBCELL_SIZE))
        })
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Projects a world-space position on the ground plane.
#[inline]
pub fn ground(pos: Vec3) -> Vec2 {
    Vec2::new(pos.x, pos.z)
}

/// Returns the angle of `dir` in degrees, in `[0, 360)`.
///
/// Angles are measured counter-clockwise from +X, "north" being -Z.
#[inline]
pub fn heading(dir: Vec2) -> f32 {
    (-dir.y).atan2(dir.x).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containing_rounds_toward_negative_infinity() {
        assert_eq!(
            ChunkPos::containing(Vec3::new(10.0, 0.0, 999.0)),
            ChunkPos::new(0, 0)
        );
        assert_eq!(
            ChunkPos::containing(Vec3::new(-0.5, 0.0, 1000.0)),
            ChunkPos::new(-1000, 1000)
        );
    }

    #[test]
    fn alignment() {
        assert!(ChunkPos::new(-3000, 2000).is_aligned());
        assert!(!ChunkPos::new(1, 0).is_aligned());
        assert!(!ChunkPos::new(0, -999).is_aligned());
    }

    #[test]
    fn bounds_are_half_open() {
        let pos = ChunkPos::new(1000, 0);
        assert!(pos.contains(Vec3::new(1000.0, 0.0, 0.0)));
        assert!(!pos.contains(Vec3::new(2000.0, 0.0, 10.0)));
        assert!(!pos.contains(Vec3::new(999.9, 0.0, 10.0)));
    }

    #[test]
    fn neighbors_are_distinct_and_adjacent() {
        let pos = ChunkPos::new(0, 0);
        let n = pos.neighbors();
        for (i, a) in n.iter().enumerate() {
            assert_ne!(*a, pos);
            assert!((a.x - pos.x).abs() <= CHUNK_SIZE && (a.z - pos.z).abs() <= CHUNK_SIZE);
            for b in &n[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn subcells_cover_the_chunk() {
        let cells: Vec<_> = ChunkPos::new(1000, -1000).subcells().collect();
        assert_eq!(cells.len(), (SUBCELLS_PER_SIDE * SUBCELLS_PER_SIDE) as usize);
        assert_eq!(cells[0], IVec2::new(1000, -1000));
        assert_eq!(cells[1], IVec2::new(1000, -990));
        assert_eq!(*cells.last().unwrap(), IVec2::new(1990, -10));
    }

    #[test]
    fn heading_quadrants() {
        assert!((heading(Vec2::new(1.0, 0.0)) - 0.0).abs() < 1e-4);
        assert!((heading(Vec2::new(0.0, -1.0)) - 90.0).abs() < 1e-4);
        assert!((heading(Vec2::new(-1.0, 0.0)) - 180.0).abs() < 1e-4);
        assert!((heading(Vec2::new(0.0, 1.0)) - 270.0).abs() < 1e-4);
    }
}
