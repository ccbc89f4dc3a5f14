//! The road network: intersections (nodes) joined by roads (edges).
//!
//! Both live in slabs owned by a [`RoadGraph`] and are addressed by generation-checked handles,
//! which lets two chunks refer to the same border intersection without either of them owning it.
//! Each element carries a *sharing count*: the number of chunks that currently claim it.

use glam::Vec3;
use smallvec::SmallVec;

use crate::slab::{Handle, Slab};

/// A handle to an [`Intersection`] of a [`RoadGraph`].
pub type IntersectionId = Handle<Intersection>;

/// A handle to a [`Road`] of a [`RoadGraph`].
pub type RoadId = Handle<Road>;

/// The list of roads incident to an intersection.
pub type RoadList = SmallVec<[RoadId; 4]>;

/// A road junction.
#[derive(Debug, Clone)]
pub struct Intersection {
    position: Vec3,
    roads: RoadList,
    sharing_count: u32,
}

impl Intersection {
    /// The world-space position of the intersection.
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// The roads that start or end at this intersection.
    #[inline]
    pub fn roads(&self) -> &[RoadId] {
        &self.roads
    }

    /// The number of chunks that currently claim this intersection.
    #[inline]
    pub fn sharing_count(&self) -> u32 {
        self.sharing_count
    }
}

/// A road between two intersections.
///
/// The transform of the road (midpoint, yaw and half-length) is computed once when the road is
/// created, from the position of its endpoints.
#[derive(Debug, Clone)]
pub struct Road {
    point_a: IntersectionId,
    point_b: IntersectionId,
    position: Vec3,
    yaw: f32,
    half_length: f32,
    sharing_count: u32,
}

impl Road {
    fn new(point_a: IntersectionId, a: Vec3, point_b: IntersectionId, b: Vec3) -> Self {
        let delta = b - a;
        Self {
            point_a,
            point_b,
            position: (a + b) * 0.5,
            yaw: delta.x.atan2(delta.z),
            half_length: delta.length() * 0.5,
            sharing_count: 1,
        }
    }

    /// The first endpoint of the road.
    #[inline]
    pub fn point_a(&self) -> IntersectionId {
        self.point_a
    }

    /// The second endpoint of the road.
    #[inline]
    pub fn point_b(&self) -> IntersectionId {
        self.point_b
    }

    /// The midpoint of the road.
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// The rotation of the road around the Y axis, in radians.
    #[inline]
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Half of the length of the road. This is the scale applied to a unit road mesh.
    #[inline]
    pub fn half_length(&self) -> f32 {
        self.half_length
    }

    /// The number of chunks that currently claim this road.
    #[inline]
    pub fn sharing_count(&self) -> u32 {
        self.sharing_count
    }

    /// Returns the endpoint that is not `point`.
    ///
    /// # Remarks
    ///
    /// If `point` is not one of the endpoints, [`None`] is returned. This is not meant to be used
    /// as a generic lookup.
    #[inline]
    pub fn other_end(&self, point: IntersectionId) -> Option<IntersectionId> {
        if point == self.point_a {
            Some(self.point_b)
        } else if point == self.point_b {
            Some(self.point_a)
        } else {
            None
        }
    }

    /// Returns whether this road joins `a` and `b` (in any order).
    #[inline]
    pub fn joins(&self, a: IntersectionId, b: IntersectionId) -> bool {
        (self.point_a == a && self.point_b == b) || (self.point_a == b && self.point_b == a)
    }
}

/// The intersections and roads of every loaded chunk.
#[derive(Default)]
pub struct RoadGraph {
    intersections: Slab<Intersection>,
    roads: Slab<Road>,
}

impl RoadGraph {
    /// Creates a new intersection, claimed by a single chunk.
    pub fn add_intersection(&mut self, position: Vec3) -> IntersectionId {
        self.intersections.insert(Intersection {
            position,
            roads: RoadList::new(),
            sharing_count: 1,
        })
    }

    /// Returns the intersection referenced by `id`, if it is still alive.
    #[inline]
    pub fn intersection(&self, id: IntersectionId) -> Option<&Intersection> {
        self.intersections.get(id)
    }

    /// Returns the road referenced by `id`, if it is still alive.
    #[inline]
    pub fn road(&self, id: RoadId) -> Option<&Road> {
        self.roads.get(id)
    }

    /// Returns the position of an intersection, if it is still alive.
    #[inline]
    pub fn position(&self, id: IntersectionId) -> Option<Vec3> {
        self.intersections.get(id).map(Intersection::position)
    }

    /// The number of live intersections.
    #[inline]
    pub fn intersection_count(&self) -> usize {
        self.intersections.len()
    }

    /// The number of live roads.
    #[inline]
    pub fn road_count(&self) -> usize {
        self.roads.len()
    }

    /// Iterates over the live intersections.
    pub fn intersections(&self) -> impl Iterator<Item = (IntersectionId, &Intersection)> + '_ {
        self.intersections.iter()
    }

    /// Iterates over the live roads.
    pub fn roads(&self) -> impl Iterator<Item = (RoadId, &Road)> + '_ {
        self.roads.iter()
    }

    /// Returns the road joining `a` and `b`, if there is one.
    pub fn road_between(&self, a: IntersectionId, b: IntersectionId) -> Option<RoadId> {
        let node = self.intersections.get(a)?;
        node.roads
            .iter()
            .copied()
            .find(|&r| self.roads.get(r).is_some_and(|road| road.joins(a, b)))
    }

    /// Creates a road between `a` and `b`.
    ///
    /// Returns [`None`] without touching the graph if a road already joins them, if `a` and `b`
    /// are the same intersection, or if either of them is dead.
    pub fn connect(&mut self, a: IntersectionId, b: IntersectionId) -> Option<RoadId> {
        if a == b || self.road_between(a, b).is_some() {
            return None;
        }

        let pa = self.position(a)?;
        let pb = self.position(b)?;
        let road = self.roads.insert(Road::new(a, pa, b, pb));

        if let Some(n) = self.intersections.get_mut(a) {
            n.roads.push(road);
        }
        if let Some(n) = self.intersections.get_mut(b) {
            n.roads.push(road);
        }

        Some(road)
    }

    /// Removes `road` from the adjacency list of `point`.
    ///
    /// The road itself is not destroyed, and the other endpoint is not touched.
    pub fn disconnect(&mut self, point: IntersectionId, road: RoadId) -> bool {
        let Some(node) = self.intersections.get_mut(point) else {
            return false;
        };
        match node.roads.iter().position(|&r| r == road) {
            Some(i) => {
                node.roads.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Detaches every road incident to `point`, from both of their endpoints.
    ///
    /// The roads stay alive; they are returned so that the caller can decide what to do with
    /// them.
    pub fn disconnect_all(&mut self, point: IntersectionId) -> RoadList {
        let Some(node) = self.intersections.get_mut(point) else {
            return RoadList::new();
        };
        let roads = std::mem::take(&mut node.roads);

        for &road in &roads {
            if let Some(other) = self.other_end(road, point) {
                self.disconnect(other, road);
            }
        }

        roads
    }

    /// Returns the endpoint of `road` that is not `point`.
    #[inline]
    pub fn other_end(&self, road: RoadId, point: IntersectionId) -> Option<IntersectionId> {
        self.roads.get(road)?.other_end(point)
    }

    /// Records that one more chunk claims `id`.
    pub fn retain_intersection(&mut self, id: IntersectionId) {
        if let Some(n) = self.intersections.get_mut(id) {
            n.sharing_count += 1;
        }
    }

    /// Records that one chunk stopped claiming `id`, and returns the remaining count.
    ///
    /// The intersection is not destroyed when the count reaches zero; see
    /// [`RoadGraph::remove_intersection`].
    pub fn release_intersection(&mut self, id: IntersectionId) -> u32 {
        match self.intersections.get_mut(id) {
            Some(n) => {
                n.sharing_count = release(n.sharing_count, "intersection");
                n.sharing_count
            }
            None => 0,
        }
    }

    /// Records that one more chunk claims `id`.
    pub fn retain_road(&mut self, id: RoadId) {
        if let Some(r) = self.roads.get_mut(id) {
            r.sharing_count += 1;
        }
    }

    /// Records that one chunk stopped claiming `id`, and returns the remaining count.
    pub fn release_road(&mut self, id: RoadId) -> u32 {
        match self.roads.get_mut(id) {
            Some(r) => {
                r.sharing_count = release(r.sharing_count, "road");
                r.sharing_count
            }
            None => 0,
        }
    }

    /// Destroys a road, detaching it from both endpoints.
    pub fn remove_road(&mut self, id: RoadId) -> bool {
        let Some(road) = self.roads.remove(id) else {
            return false;
        };
        self.disconnect(road.point_a, id);
        self.disconnect(road.point_b, id);
        true
    }

    /// Destroys an intersection along with every road that still reaches it.
    ///
    /// Returns the number of roads that were destroyed with it.
    pub fn remove_intersection(&mut self, id: IntersectionId) -> usize {
        if !self.intersections.contains(id) {
            return 0;
        }
        let roads = self.disconnect_all(id);
        for &road in &roads {
            self.roads.remove(road);
        }
        self.intersections.remove(id);
        roads.len()
    }
}

/// Decrements a sharing count.
///
/// Going below zero means some chunk released something it never claimed.
#[track_caller]
fn release(count: u32, what: &str) -> u32 {
    if count == 0 {
        ec_log::error!("sharing count of a {what} went negative");
        debug_assert!(false, "sharing count of a {what} went negative");
    }
    count.saturating_sub(1)
}
