//! The render side of chunk streaming.
//!
//! No window is opened: the proxy stands in for the renderer by "uploading" a vertex count for
//! every drawable chunk. It owns those resources the way a GPU renderer would own its buffers,
//! which makes it responsible for the release half of the unload handshake.

use std::hash::BuildHasherDefault;

use ec_core::{ChunkPos, ChunkState, City};
use hashbrown::HashMap;
use rustc_hash::FxHasher;

use crate::world::{ChunkLoader, ChunkOperation, OperationKind};

/// The stand-in for the GPU buffers of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResources {
    /// Two vertices per road, and four per building wall.
    pub vertex_count: usize,
}

/// Counters of what happened during the lifetime of a [`RenderProxy`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    /// The number of chunk draws.
    pub draws: u64,
    /// The number of chunks whose resources were created.
    pub uploads: u64,
    /// The number of chunks whose resources were released.
    pub releases: u64,
}

/// Draws the loaded chunks of a city, and releases their resources when they are unloaded.
#[derive(Default)]
pub struct RenderProxy {
    resources: HashMap<ChunkPos, ChunkResources, BuildHasherDefault<FxHasher>>,
    stats: RenderStats,
}

impl RenderProxy {
    /// The counters of the proxy.
    #[inline]
    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// The number of chunks that currently own resources.
    #[inline]
    pub fn resident_chunks(&self) -> usize {
        self.resources.len()
    }

    /// The number of vertices held by the resident chunks.
    pub fn resident_vertices(&self) -> usize {
        self.resources.values().map(|r| r.vertex_count).sum()
    }

    /// Renders a frame.
    ///
    /// The resources of the chunk the loader is unloading are released first, then every
    /// drawable chunk is drawn, creating its resources if needed.
    #[profiling::function]
    pub fn render_frame(&mut self, city: &City, loader: &ChunkLoader) {
        if let Some(ChunkOperation {
            kind: OperationKind::Unload,
            chunk: Some(chunk),
            ..
        }) = loader.first_in_queue()
        {
            if chunk.state() == ChunkState::PendingUnload {
                if self.resources.remove(&chunk.pos()).is_some() {
                    self.stats.releases += 1;
                }
                chunk.release_resources();
            }
        }

        for chunk in city.loaded_chunks() {
            if !chunk.is_drawable() {
                continue;
            }

            self.resources.entry(chunk.pos()).or_insert_with(|| {
                self.stats.uploads += 1;
                let walls: usize = chunk
                    .blocks()
                    .iter()
                    .flat_map(|b| b.buildings())
                    .map(|b| b.footprint.len() * 4)
                    .sum();
                ChunkResources {
                    vertex_count: chunk.roads().len() * 2 + walls,
                }
            });
            self.stats.draws += 1;
        }
    }
}
