use std::hash::BuildHasherDefault;
use std::sync::Arc;

use glam::Vec3;
use hashbrown::HashMap;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::chunk::{Chunk, Teardown};
use crate::graph::RoadGraph;
use crate::lifecycle::ChunkState;
use crate::pos::ChunkPos;

/// A collection of chunks.
type Chunks = HashMap<ChunkPos, Arc<Chunk>, BuildHasherDefault<FxHasher>>;

/// The chunks sharing an edge or a corner with another chunk.
pub type Neighbors = SmallVec<[Arc<Chunk>; 8]>;

/// The state protected by the lock of a [`City`].
#[derive(Default)]
struct CityState {
    /// The chunks that are currently loaded.
    chunks: Chunks,
    /// The road network of every loaded chunk.
    graph: RoadGraph,
}

/// The collection of loaded chunks, along with the road network they share.
///
/// # Locking
///
/// Everything is behind a single exclusive lock. It is taken by both the per-frame driver and the
/// worker thread, so it is only ever held for one lookup or one mutation, never across the
/// generation of a whole chunk.
#[derive(Default)]
pub struct City {
    state: Mutex<CityState>,
}

impl City {
    /// Creates a new empty [`City`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the road network.
    #[inline]
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut RoadGraph) -> R) -> R {
        f(&mut self.state.lock().graph)
    }

    /// Registers a populated chunk.
    ///
    /// If a chunk was already registered at the same position, the new one is discarded (see
    /// [`City::discard_chunk`]) and the existing one is returned.
    #[profiling::function]
    pub fn add_chunk(&self, chunk: Chunk) -> Arc<Chunk> {
        let mut state = self.state.lock();

        if let Some(existing) = state.chunks.get(&chunk.pos()).cloned() {
            ec_log::warning!("chunk {} registered twice", chunk.pos());
            discard(&mut state.graph, &chunk);
            return existing;
        }

        chunk
            .lifecycle()
            .transition(&[ChunkState::Populated], ChunkState::Registered);
        let chunk = Arc::new(chunk);
        state.chunks.insert(chunk.pos(), Arc::clone(&chunk));
        chunk
    }

    /// Gives back everything a chunk that will never be registered claims from the road network.
    ///
    /// Generating or loading a chunk already creates its intersections and roads, and claims the
    /// border intersections of its neighbors. A chunk that is dropped instead of being handed to
    /// [`City::add_chunk`] must go through this function, or those claims outlive it.
    #[profiling::function]
    pub fn discard_chunk(&self, chunk: Chunk) -> Teardown {
        discard(&mut self.state.lock().graph, &chunk)
    }

    /// Removes a chunk from the city, without touching the road network.
    ///
    /// The chunk stays alive for whoever holds a reference to it; see [`City::destroy_chunk`].
    pub fn remove_chunk(&self, pos: ChunkPos) -> Option<Arc<Chunk>> {
        self.state.lock().chunks.remove(&pos)
    }

    /// Returns whether a chunk is registered at `pos`.
    #[inline]
    pub fn is_chunk_loaded(&self, pos: ChunkPos) -> bool {
        self.state.lock().chunks.contains_key(&pos)
    }

    /// Returns the chunk registered at `pos`, if any.
    #[inline]
    pub fn get_chunk_at(&self, pos: ChunkPos) -> Option<Arc<Chunk>> {
        self.state.lock().chunks.get(&pos).cloned()
    }

    /// Returns the chunk that contains the provided world-space position, if it is loaded.
    #[inline]
    pub fn get_chunk_containing(&self, pos: Vec3) -> Option<Arc<Chunk>> {
        self.get_chunk_at(ChunkPos::containing(pos))
    }

    /// Returns the loaded chunks whose bounds touch the bounds of the chunk at `pos`.
    pub fn get_neighbor_chunks(&self, pos: ChunkPos) -> Neighbors {
        let state = self.state.lock();
        pos.neighbors()
            .iter()
            .filter_map(|n| state.chunks.get(n).cloned())
            .collect()
    }

    /// Returns every loaded chunk.
    pub fn loaded_chunks(&self) -> Vec<Arc<Chunk>> {
        self.state.lock().chunks.values().cloned().collect()
    }

    /// Returns the number of loaded chunks.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Returns whether a city block of any loaded chunk (or of `extra`) has its centroid within
    /// `distance` of `centroid`.
    pub fn has_block_near(&self, centroid: Vec3, distance: f32, extra: Option<&Chunk>) -> bool {
        let d2 = distance * distance;
        let near = |chunk: &Chunk| {
            chunk
                .blocks()
                .iter()
                .any(|b| b.centroid().distance_squared(centroid) < d2)
        };

        if extra.is_some_and(near) {
            return true;
        }

        let state = self.state.lock();
        let home = ChunkPos::containing(centroid);
        std::iter::once(home)
            .chain(home.neighbors())
            .filter_map(|p| state.chunks.get(&p))
            .any(|c| near(&**c))
    }

    /// Releases the graph elements of a chunk that was removed from the city.
    ///
    /// The chunk must have gone through its unload (see [`Chunk::begin_unload`]). Returns
    /// [`None`] if it was registered, or if it was already destroyed.
    #[profiling::function]
    pub fn destroy_chunk(&self, chunk: &Chunk) -> Option<Teardown> {
        let destroyed = chunk.lifecycle().transition(
            &[ChunkState::PendingUnload, ChunkState::ResourcesReleased],
            ChunkState::Destroyed,
        );
        if !destroyed {
            return None;
        }

        let mut state = self.state.lock();
        Some(chunk.release_graph(&mut state.graph))
    }
}

/// Releases the graph elements of a chunk that never made it into the city.
fn discard(graph: &mut RoadGraph, chunk: &Chunk) -> Teardown {
    chunk.lifecycle().transition(
        &[ChunkState::Empty, ChunkState::Populated],
        ChunkState::Destroyed,
    );
    chunk.release_graph(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated(pos: ChunkPos) -> Chunk {
        let chunk = Chunk::new(pos);
        chunk.mark_populated();
        chunk
    }

    #[test]
    fn add_and_query() {
        let city = City::new();
        let pos = ChunkPos::new(1000, -2000);
        assert!(!city.is_chunk_loaded(pos));

        let chunk = city.add_chunk(populated(pos));
        assert!(city.is_chunk_loaded(pos));
        assert!(chunk.is_drawable());
        assert!(Arc::ptr_eq(&chunk, &city.get_chunk_at(pos).unwrap()));
        assert!(Arc::ptr_eq(
            &chunk,
            &city.get_chunk_containing(Vec3::new(1500.0, 0.0, -1001.0)).unwrap()
        ));
        assert_eq!(city.chunk_count(), 1);
    }

    #[test]
    fn registering_twice_keeps_the_first() {
        let city = City::new();
        let pos = ChunkPos::new(0, 0);
        let first = city.add_chunk(populated(pos));
        let second = city.add_chunk(populated(pos));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn duplicate_registration_gives_its_claims_back() {
        let city = City::new();
        let pos = ChunkPos::new(0, 0);

        let mut first = Chunk::new(pos);
        let shared = city.with_graph(|g| first.add_intersection(g, Vec3::new(990.0, 0.0, 10.0)));
        first.mark_populated();
        let first = city.add_chunk(first);

        let mut second = Chunk::new(pos);
        city.with_graph(|g| {
            assert!(second.adopt_intersection(g, shared));
            second.add_intersection(g, Vec3::new(500.0, 0.0, 500.0));
        });
        second.mark_populated();
        assert!(Arc::ptr_eq(&first, &city.add_chunk(second)));

        city.with_graph(|g| {
            assert_eq!(g.intersection(shared).unwrap().sharing_count(), 1);
            assert_eq!(g.intersection_count(), 1);
        });
    }

    #[test]
    fn discarded_chunk_releases_its_neighbor_claims() {
        let city = City::new();

        let mut left = Chunk::new(ChunkPos::new(0, 0));
        let border = city.with_graph(|g| left.add_intersection(g, Vec3::new(990.0, 0.0, 10.0)));
        left.mark_populated();
        city.add_chunk(left);

        let mut right = Chunk::new(ChunkPos::new(1000, 0));
        city.with_graph(|g| {
            assert!(right.adopt_intersection(g, border));
            let inner = right.add_intersection(g, Vec3::new(1200.0, 0.0, 10.0));
            right.connect(g, border, inner);
        });
        right.mark_populated();

        let out = city.discard_chunk(right);
        assert_eq!(out.intersections_destroyed, 1);
        assert_eq!(out.intersections_kept, 1);

        let left = city.remove_chunk(ChunkPos::new(0, 0)).unwrap();
        left.begin_unload();
        left.release_resources();
        city.destroy_chunk(&left).unwrap();
        city.with_graph(|g| {
            assert!(g.intersection(border).is_none());
            assert_eq!(g.intersection_count(), 0);
            assert_eq!(g.road_count(), 0);
        });
    }

    #[test]
    fn neighbors_by_coordinate() {
        let city = City::new();
        let center = ChunkPos::new(0, 0);
        city.add_chunk(populated(center));
        city.add_chunk(populated(center.offset(1, 1)));
        city.add_chunk(populated(center.offset(-1, 0)));
        city.add_chunk(populated(center.offset(2, 0)));

        let mut found: Vec<_> = city
            .get_neighbor_chunks(center)
            .iter()
            .map(|c| c.pos())
            .collect();
        found.sort();
        assert_eq!(found, [center.offset(-1, 0), center.offset(1, 1)]);
    }

    #[test]
    fn destroy_requires_an_unload() {
        let city = City::new();
        let pos = ChunkPos::new(0, 0);
        let mut chunk = Chunk::new(pos);
        city.with_graph(|g| {
            chunk.add_intersection(g, Vec3::new(10.0, 0.0, 10.0));
        });
        chunk.mark_populated();
        let chunk = city.add_chunk(chunk);

        assert_eq!(city.destroy_chunk(&chunk), None);

        let removed = city.remove_chunk(pos).unwrap();
        assert!(removed.begin_unload());
        assert!(removed.release_resources());
        let out = city.destroy_chunk(&removed).unwrap();
        assert_eq!(out.intersections_destroyed, 1);
        assert_eq!(city.destroy_chunk(&removed), None);
        assert_eq!(removed.state(), ChunkState::Destroyed);
        assert_eq!(city.with_graph(|g| g.intersection_count()), 0);
    }

    #[test]
    fn sharing_is_conserved_across_any_unload_order() {
        // Four chunks around the origin all claim the same corner intersection.
        let corners = [
            ChunkPos::new(-1000, -1000),
            ChunkPos::new(0, -1000),
            ChunkPos::new(-1000, 0),
            ChunkPos::new(0, 0),
        ];

        for order in [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2]] {
            let city = City::new();
            let mut shared = None;
            for pos in corners {
                let mut chunk = Chunk::new(pos);
                city.with_graph(|g| match shared {
                    None => shared = Some(chunk.add_intersection(g, Vec3::ZERO)),
                    Some(id) => assert!(chunk.adopt_intersection(g, id)),
                });
                chunk.mark_populated();
                city.add_chunk(chunk);
            }
            let shared = shared.unwrap();

            for (i, &k) in order.iter().enumerate() {
                let chunk = city.remove_chunk(corners[k]).unwrap();
                chunk.begin_unload();
                chunk.release_resources();
                city.destroy_chunk(&chunk).unwrap();

                let alive = city.with_graph(|g| g.intersection(shared).map(|n| n.sharing_count()));
                if i + 1 < corners.len() {
                    assert_eq!(alive, Some((corners.len() - i - 1) as u32));
                } else {
                    assert_eq!(alive, None);
                }
            }
        }
    }
}
