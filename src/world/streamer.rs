use std::sync::Arc;

use ec_core::{ground, ChunkPos, City, CHUNK_SIZE};
use glam::Vec3;

use super::ChunkLoader;
use crate::config::StreamingConfig;

/// What a [`Streamer`] requested during a frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamRequests {
    /// The chunk that was requested to load, if any.
    pub loaded: Option<ChunkPos>,
    /// The chunks that were requested to unload.
    pub unloaded: Vec<ChunkPos>,
}

/// Decides every frame which chunks should be loaded around the camera.
///
/// Chunks closer than the load radius are loaded one per frame, nearest first. Chunks farther
/// than the unload radius are unloaded, and queued loads that ended up that far are cancelled
/// before the worker gets to them. Chunks in between are left alone, so a camera moving back and
/// forth on the edge of the load radius does not reload the same chunk over and over.
pub struct Streamer {
    config: StreamingConfig,
}

impl Streamer {
    /// Creates a new [`Streamer`].
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    /// Queues the loads and unloads needed for a camera at `camera`.
    #[profiling::function]
    pub fn update(&self, camera: Vec3, city: &Arc<City>, loader: &ChunkLoader) -> StreamRequests {
        let eye = ground(camera);
        let distance = |pos: ChunkPos| ground(pos.center()).distance(eye);

        let mut requests = StreamRequests::default();

        for chunk in city.loaded_chunks() {
            if distance(chunk.pos()) > self.config.unload_radius
                && loader.unload_chunk(&chunk, city)
            {
                requests.unloaded.push(chunk.pos());
            }
        }

        for pos in loader.pending_loads() {
            if distance(pos) > self.config.unload_radius && loader.unload_chunk_at(pos, city) {
                requests.unloaded.push(pos);
            }
        }

        let reach = (self.config.load_radius / CHUNK_SIZE as f32).ceil() as i32 + 1;
        let home = ChunkPos::containing(camera);
        let nearest = (-reach..=reach)
            .flat_map(|dx| (-reach..=reach).map(move |dz| home.offset(dx, dz)))
            .map(|pos| (pos, distance(pos)))
            .filter(|&(_, d)| d <= self.config.load_radius)
            .filter(|&(pos, _)| !city.is_chunk_loaded(pos) && !loader.is_queued(pos))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((pos, _)) = nearest {
            if loader.load_chunk(pos, city) {
                requests.loaded = Some(pos);
            }
        }

        requests
    }
}
