use glam::Vec3;

use crate::block::CityBlock;
use crate::graph::{IntersectionId, RoadGraph, RoadId};
use crate::lifecycle::{ChunkState, Lifecycle};
use crate::pos::ChunkPos;

/// A fixed-size piece of the city.
///
/// A chunk lists the intersections, roads and city blocks it claims. Intersections and roads on
/// the border are usually claimed by two (or more) chunks at once, which is tracked by their
/// sharing counts in the [`RoadGraph`].
///
/// # Remarks
///
/// The content of a chunk is only mutated while it is being populated. Once it is registered
/// in a [`City`](crate::City) it is shared between threads and only its [`ChunkState`] changes.
pub struct Chunk {
    pos: ChunkPos,
    intersections: Vec<IntersectionId>,
    roads: Vec<RoadId>,
    blocks: Vec<CityBlock>,
    lifecycle: Lifecycle,
}

/// What happened to the graph when a chunk was torn down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    /// Intersections that were destroyed.
    pub intersections_destroyed: usize,
    /// Intersections that survived because another chunk still claims them.
    pub intersections_kept: usize,
    /// Roads that were destroyed, including the ones that went away with an intersection.
    pub roads_destroyed: usize,
}

impl Chunk {
    /// Creates a new empty chunk.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            intersections: Vec::new(),
            roads: Vec::new(),
            blocks: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    /// The position of the chunk.
    #[inline]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// The intersections claimed by the chunk, in insertion order.
    #[inline]
    pub fn intersections(&self) -> &[IntersectionId] {
        &self.intersections
    }

    /// The roads claimed by the chunk, in insertion order.
    #[inline]
    pub fn roads(&self) -> &[RoadId] {
        &self.roads
    }

    /// The city blocks of the chunk.
    #[inline]
    pub fn blocks(&self) -> &[CityBlock] {
        &self.blocks
    }

    /// Returns whether the chunk claims `road`.
    #[inline]
    pub fn claims_road(&self, road: RoadId) -> bool {
        self.roads.contains(&road)
    }

    /// Returns whether the chunk claims `point`.
    #[inline]
    pub fn claims_intersection(&self, point: IntersectionId) -> bool {
        self.intersections.contains(&point)
    }

    /// Creates a new intersection owned by this chunk.
    pub fn add_intersection(&mut self, graph: &mut RoadGraph, position: Vec3) -> IntersectionId {
        let id = graph.add_intersection(position);
        self.intersections.push(id);
        id
    }

    /// Claims an intersection that already belongs to another chunk.
    ///
    /// Returns `false` if the intersection is dead or already claimed by this chunk.
    pub fn adopt_intersection(&mut self, graph: &mut RoadGraph, id: IntersectionId) -> bool {
        if self.claims_intersection(id) || graph.intersection(id).is_none() {
            return false;
        }
        graph.retain_intersection(id);
        self.intersections.push(id);
        true
    }

    /// Joins two intersections with a road claimed by this chunk.
    ///
    /// If a road already joins them (created by a neighbor), the chunk claims that road instead
    /// of creating a second one. Returns [`None`] when nothing new was claimed.
    pub fn connect(
        &mut self,
        graph: &mut RoadGraph,
        a: IntersectionId,
        b: IntersectionId,
    ) -> Option<RoadId> {
        if let Some(road) = graph.connect(a, b) {
            self.roads.push(road);
            return Some(road);
        }

        let road = graph.road_between(a, b)?;
        if self.claims_road(road) {
            return None;
        }
        graph.retain_road(road);
        self.roads.push(road);
        Some(road)
    }

    /// Adds a city block to the chunk.
    #[inline]
    pub fn push_block(&mut self, block: CityBlock) {
        self.blocks.push(block);
    }

    /// Releases everything the chunk claims from the graph.
    ///
    /// Roads whose endpoints are both claimed only by this chunk are destroyed; the others lose
    /// this chunk's claim and stay attached to the intersections still in use. Intersections
    /// claimed only by this chunk are destroyed (with any road still reaching them); the others
    /// have their sharing count decremented.
    pub(crate) fn release_graph(&self, graph: &mut RoadGraph) -> Teardown {
        let mut out = Teardown::default();
        let count = |graph: &RoadGraph, id| graph.intersection(id).map(|n| n.sharing_count());

        for &id in &self.roads {
            let Some(road) = graph.road(id) else {
                continue;
            };
            let (a, b) = (road.point_a(), road.point_b());

            if count(graph, a) == Some(1) && count(graph, b) == Some(1) {
                graph.remove_road(id);
                out.roads_destroyed += 1;
            } else {
                graph.release_road(id);
            }
        }

        for &id in &self.intersections {
            match count(graph, id) {
                None => (),
                Some(1) => {
                    out.roads_destroyed += graph.remove_intersection(id);
                    out.intersections_destroyed += 1;
                }
                Some(_) => {
                    graph.release_intersection(id);
                    out.intersections_kept += 1;
                }
            }
        }

        out
    }

    /// The current lifecycle state of the chunk.
    #[inline]
    pub fn state(&self) -> ChunkState {
        self.lifecycle.state()
    }

    /// The lifecycle state machine of the chunk.
    #[inline]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Marks the chunk as generated or deserialized.
    #[inline]
    pub fn mark_populated(&self) -> bool {
        self.lifecycle
            .transition(&[ChunkState::Empty], ChunkState::Populated)
    }

    /// Returns whether the chunk may be drawn.
    ///
    /// Drawing stops as soon as the unload begins, and never resumes.
    #[inline]
    pub fn is_drawable(&self) -> bool {
        self.state() == ChunkState::Registered
    }

    /// Starts the unload of the chunk. Called by the worker thread.
    #[inline]
    pub fn begin_unload(&self) -> bool {
        self.lifecycle
            .transition(&[ChunkState::Registered], ChunkState::PendingUnload)
    }

    /// Signals that the render thread released every resource it created for the chunk.
    #[inline]
    pub fn release_resources(&self) -> bool {
        self.lifecycle
            .transition(&[ChunkState::PendingUnload], ChunkState::ResourcesReleased)
    }

    /// Returns whether the render thread is done with the chunk.
    #[inline]
    pub fn is_safe_to_delete(&self) -> bool {
        self.state() >= ChunkState::ResourcesReleased
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("pos", &self.pos)
            .field("state", &self.state())
            .field("intersections", &self.intersections.len())
            .field("roads", &self.roads.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, z: f32) -> Vec3 {
        Vec3::new(x, 0.0, z)
    }

    #[test]
    fn connect_claims_existing_roads() {
        let mut graph = RoadGraph::default();
        let mut left = Chunk::new(ChunkPos::new(0, 0));
        let mut right = Chunk::new(ChunkPos::new(1000, 0));

        let a = left.add_intersection(&mut graph, p(990.0, 10.0));
        let b = left.add_intersection(&mut graph, p(990.0, 110.0));
        let road = left.connect(&mut graph, a, b).unwrap();

        assert!(right.adopt_intersection(&mut graph, a));
        assert!(right.adopt_intersection(&mut graph, b));
        assert!(!right.adopt_intersection(&mut graph, b));
        assert_eq!(right.connect(&mut graph, b, a), Some(road));
        assert_eq!(right.connect(&mut graph, b, a), None);
        assert_eq!(graph.road(road).unwrap().sharing_count(), 2);
        assert_eq!(graph.road_count(), 1);
    }

    #[test]
    fn teardown_keeps_shared_elements() {
        let mut graph = RoadGraph::default();
        let mut left = Chunk::new(ChunkPos::new(0, 0));
        let mut right = Chunk::new(ChunkPos::new(1000, 0));

        let inner = left.add_intersection(&mut graph, p(790.0, 10.0));
        let border = left.add_intersection(&mut graph, p(990.0, 10.0));
        left.connect(&mut graph, inner, border).unwrap();

        right.adopt_intersection(&mut graph, border);
        let far = right.add_intersection(&mut graph, p(1190.0, 10.0));
        right.connect(&mut graph, border, far).unwrap();

        let out = left.release_graph(&mut graph);
        assert_eq!(out.intersections_destroyed, 1);
        assert_eq!(out.intersections_kept, 1);
        assert_eq!(out.roads_destroyed, 1);
        assert_eq!(graph.intersection(border).unwrap().sharing_count(), 1);
        assert_eq!(graph.intersection(border).unwrap().roads().len(), 1);

        let out = right.release_graph(&mut graph);
        assert_eq!(out.intersections_destroyed, 2);
        assert_eq!(graph.intersection_count(), 0);
        assert_eq!(graph.road_count(), 0);
    }

    #[test]
    fn surviving_roads_die_with_their_last_endpoint() {
        let mut graph = RoadGraph::default();
        let mut left = Chunk::new(ChunkPos::new(0, 0));
        let mut right = Chunk::new(ChunkPos::new(1000, 0));

        let a = left.add_intersection(&mut graph, p(990.0, 10.0));
        let b = left.add_intersection(&mut graph, p(990.0, 110.0));
        left.connect(&mut graph, a, b).unwrap();
        right.adopt_intersection(&mut graph, a);
        right.adopt_intersection(&mut graph, b);

        // Both endpoints are shared: the road outlives the chunk that created it.
        let out = left.release_graph(&mut graph);
        assert_eq!(out.roads_destroyed, 0);
        assert_eq!(graph.road_count(), 1);

        let out = right.release_graph(&mut graph);
        assert_eq!(out.roads_destroyed, 1);
        assert_eq!(graph.road_count(), 0);
        assert_eq!(graph.intersection_count(), 0);
    }

    #[test]
    fn lifecycle_gates_drawing() {
        let chunk = Chunk::new(ChunkPos::new(0, 0));
        assert!(!chunk.begin_unload());
        assert!(chunk.mark_populated());
        assert!(!chunk.is_drawable());
        assert!(chunk
            .lifecycle()
            .transition(&[ChunkState::Populated], ChunkState::Registered));
        assert!(chunk.is_drawable());
        assert!(!chunk.release_resources());
        assert!(chunk.begin_unload());
        assert!(!chunk.is_drawable());
        assert!(!chunk.is_safe_to_delete());
        assert!(chunk.release_resources());
        assert!(chunk.is_safe_to_delete());
    }
}
