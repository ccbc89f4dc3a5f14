use std::sync::Arc;

use ec_core::{Chunk, ChunkPos, City, CityBlock, IntersectionId, Neighbors, RoadGraph};
use ec_worldgen_core::{ChunkArchive, GenConfig, GridLayout};
use glam::Vec3;

use crate::blocks::BlockWalker;
use crate::buildings::place_building;
use crate::density::DensityField;
use crate::make_layout;

/// Generates the content of new chunks.
///
/// The generator does not keep the city locked while it runs: every intersection it places and
/// every block it walks takes the lock of the [`City`] on its own, so the per-frame driver is
/// never stalled for the duration of a whole chunk.
pub struct ChunkGenerator {
    config: GenConfig,
    layout: Box<dyn GridLayout>,
    density: DensityField,
    archive: Option<Arc<dyn ChunkArchive>>,
}

impl ChunkGenerator {
    /// Creates a new [`ChunkGenerator`] using the layout selected by `config`.
    pub fn new(config: GenConfig) -> Self {
        let layout = make_layout(&config);
        Self::with_layout(config, layout)
    }

    /// Creates a new [`ChunkGenerator`] with a custom layout.
    pub fn with_layout(config: GenConfig, layout: Box<dyn GridLayout>) -> Self {
        Self {
            density: DensityField::new(&config),
            config,
            layout,
            archive: None,
        }
    }

    /// Makes the generator refuse to generate the chunks persisted in `archive`.
    pub fn with_archive(mut self, archive: Arc<dyn ChunkArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// The configuration of the generator.
    #[inline]
    pub fn config(&self) -> &GenConfig {
        &self.config
    }

    /// Generates the chunk at `pos`.
    ///
    /// Intersections on the border of a loaded neighbor are reused rather than duplicated, which
    /// makes both chunks claim them. The returned chunk is populated but not registered: its
    /// intersections and roads already live in the road network of `city`. The caller hands it to
    /// [`City::add_chunk`], or to [`City::discard_chunk`] if it is not wanted anymore.
    ///
    /// Returns [`None`] if `pos` is not aligned on the chunk grid, if the chunk is already
    /// loaded, or if it was persisted and should be loaded instead.
    #[profiling::function]
    pub fn generate_chunk(&self, city: &City, pos: ChunkPos) -> Option<Chunk> {
        if !pos.is_aligned() {
            ec_log::warning!("refusing to generate the misaligned chunk {pos}");
            return None;
        }
        if city.is_chunk_loaded(pos) {
            ec_log::trace!("chunk {pos} is already loaded");
            return None;
        }
        if self.archive.as_ref().is_some_and(|a| a.chunk_exists(pos)) {
            ec_log::trace!("chunk {pos} was persisted, it will not be generated");
            return None;
        }

        let mut chunk = Chunk::new(pos);
        let neighbors = city.get_neighbor_chunks(pos);

        for cell in pos.subcells() {
            let Some(candidate) = self.layout.intersection_position(cell) else {
                continue;
            };
            city.with_graph(|graph| {
                self.place_intersection(&mut chunk, graph, &neighbors, candidate);
            });
        }

        let ids = chunk.intersections().to_vec();
        for id in ids {
            if let Some(block) = self.discover_block(city, &chunk, id) {
                chunk.push_block(block);
            }
        }

        ec_log::trace!(
            "generated chunk {pos}: {} intersections, {} roads, {} blocks",
            chunk.intersections().len(),
            chunk.roads().len(),
            chunk.blocks().len(),
        );

        chunk.mark_populated();
        Some(chunk)
    }

    /// Adds `candidate` to `chunk`, or reuses a neighbor's intersection close to it, then joins
    /// it to the rest of the chunk.
    fn place_intersection(
        &self,
        chunk: &mut Chunk,
        graph: &mut RoadGraph,
        neighbors: &Neighbors,
        candidate: Vec3,
    ) {
        let min2 = self.config.min_intersection_distance * self.config.min_intersection_distance;
        let close = |id: IntersectionId| {
            let d2 = graph.position(id)?.distance_squared(candidate);
            (d2 < min2).then_some((id, d2))
        };

        if chunk.intersections().iter().any(|&id| close(id).is_some()) {
            return;
        }

        let reused = neighbors
            .iter()
            .flat_map(|n| n.intersections())
            .filter_map(|&id| close(id))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id);

        let id = match reused {
            Some(id) => {
                if !chunk.adopt_intersection(graph, id) {
                    return;
                }
                id
            }
            None => chunk.add_intersection(graph, candidate),
        };

        self.layout.generate_roads(chunk, graph, id);
    }

    /// Walks the block starting at `start` and keeps it if it belongs to this chunk.
    fn discover_block(
        &self,
        city: &City,
        chunk: &Chunk,
        start: IntersectionId,
    ) -> Option<CityBlock> {
        let outline = city.with_graph(|graph| {
            let walker = BlockWalker::new(graph, chunk, self.config.max_walk_steps);
            let outline = walker.walk(start)?;
            (!walker.encloses_other(&outline)).then_some(outline)
        })?;

        let c = outline.centroid();
        if !chunk.pos().contains_xz(c) {
            return None;
        }

        let centroid = Vec3::new(c.x, 0.0, c.y);
        if city.has_block_near(centroid, self.config.block_separation, Some(chunk)) {
            return None;
        }

        let density = self.density.sample(centroid);
        let mut block = CityBlock::new(outline.vertices, outline.points, density);
        place_building(&mut block, &self.config);
        Some(block)
    }
}
