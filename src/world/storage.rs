use std::fmt;
use std::fs;
use std::hash::BuildHasherDefault;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ec_core::{
    ground, Building, Chunk, ChunkPos, City, CityBlock, IntersectionId, Neighbors, RoadGraph,
};
use ec_worldgen_core::ChunkArchive;
use glam::{Vec2, Vec3};
use hashbrown::HashSet;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;

/// The first bytes of every chunk file.
const MAGIC: [u8; 4] = *b"ECCK";
/// The version of the chunk file format.
const VERSION: u32 = 1;

/// The header of a chunk file, written before the body so that a stray file is rejected before
/// its body is decoded.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkHeader {
    magic: [u8; 4],
    version: u32,
    x: i32,
    z: i32,
}

/// A city block as written on disk. Vertices are indices into [`ChunkBody::intersections`].
#[derive(Debug, Serialize, Deserialize)]
struct SavedBlock {
    vertices: Vec<u32>,
    density: f32,
    buildings: Vec<SavedBuilding>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedBuilding {
    footprint: Vec<[f32; 2]>,
    height: f32,
}

/// The content of a chunk file.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkBody {
    intersections: Vec<[f32; 3]>,
    /// Endpoints of every road, as indices into `intersections`.
    roads: Vec<(u32, u32)>,
    blocks: Vec<SavedBlock>,
}

impl ChunkBody {
    /// Captures the content of `chunk`.
    fn snapshot(chunk: &Chunk, graph: &RoadGraph) -> Self {
        let index_of = |id: IntersectionId| {
            chunk
                .intersections()
                .iter()
                .position(|&i| i == id)
                .map(|i| i as u32)
        };

        let intersections = chunk
            .intersections()
            .iter()
            .map(|&id| graph.position(id).unwrap_or(Vec3::ZERO).to_array())
            .collect();

        let roads = chunk
            .roads()
            .iter()
            .filter_map(|&id| graph.road(id))
            .filter_map(|road| Some((index_of(road.point_a())?, index_of(road.point_b())?)))
            .collect();

        let blocks = chunk
            .blocks()
            .iter()
            .filter_map(|block| {
                let vertices = block
                    .vertices()
                    .iter()
                    .map(|&id| index_of(id))
                    .collect::<Option<Vec<u32>>>()?;
                let buildings = block
                    .buildings()
                    .iter()
                    .map(|b| SavedBuilding {
                        footprint: b.footprint.iter().map(|p| p.to_array()).collect(),
                        height: b.height,
                    })
                    .collect();
                Some(SavedBlock {
                    vertices,
                    density: block.density(),
                    buildings,
                })
            })
            .collect();

        Self {
            intersections,
            roads,
            blocks,
        }
    }

    /// Checks every index of the body before anything is added to the road network.
    fn validate(&self) -> Result<(), StoreError> {
        let n = self.intersections.len() as u32;

        if self
            .intersections
            .iter()
            .flatten()
            .any(|c| !c.is_finite())
        {
            return Err(StoreError::Corrupt("non-finite intersection position"));
        }
        if self.roads.iter().any(|&(a, b)| a >= n || b >= n) {
            return Err(StoreError::Corrupt("road endpoint out of range"));
        }
        for block in &self.blocks {
            if block.vertices.len() < 3 {
                return Err(StoreError::Corrupt("city block with less than three corners"));
            }
            if block.vertices.iter().any(|&v| v >= n) {
                return Err(StoreError::Corrupt("city block corner out of range"));
            }
        }
        Ok(())
    }
}

/// An error that might occur while reading or writing a chunk file.
#[derive(Debug)]
pub enum StoreError {
    /// The file could not be read or written.
    Io(std::io::Error),
    /// The content of the file could not be encoded or decoded.
    Encoding(bincode::Error),
    /// The file does not start with the expected magic bytes.
    InvalidMagic,
    /// The file was written by an incompatible version of the program.
    UnsupportedVersion(u32),
    /// The file describes another chunk than the one it is named after.
    WrongChunk(ChunkPos),
    /// The file decoded properly but its content is inconsistent.
    Corrupt(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "i/o error: {err}"),
            Self::Encoding(err) => write!(f, "malformed chunk file: {err}"),
            Self::InvalidMagic => f.write_str("not a chunk file"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported chunk file version {v}"),
            Self::WrongChunk(pos) => write!(f, "the file describes the chunk {pos}"),
            Self::Corrupt(reason) => write!(f, "corrupt chunk file: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Encoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        Self::Encoding(err)
    }
}

/// Persists chunks in a directory, one file per chunk.
pub struct ChunkStore {
    directory: PathBuf,
    save_on_unload: bool,
    reuse_distance: f32,
    /// Chunks whose file is unreadable and could not be moved away.
    ignored: Mutex<HashSet<ChunkPos, BuildHasherDefault<FxHasher>>>,
}

impl ChunkStore {
    /// Creates a new [`ChunkStore`].
    ///
    /// `reuse_distance` is the distance under which a loaded intersection is merged with the
    /// intersection of a loaded neighbor, like the generator does.
    pub fn new(config: &StorageConfig, reuse_distance: f32) -> Self {
        Self {
            directory: config.directory.clone(),
            save_on_unload: config.save_on_unload,
            reuse_distance,
            ignored: Mutex::default(),
        }
    }

    /// The directory holding the chunk files.
    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Whether chunks should be saved right before they are torn down.
    #[inline]
    pub fn save_on_unload(&self) -> bool {
        self.save_on_unload
    }

    /// Returns the path of the file describing the chunk at `pos`.
    pub fn path_of(&self, pos: ChunkPos) -> PathBuf {
        self.directory.join(format!("{}_{}.chunk", pos.x, pos.z))
    }

    /// Returns whether a file exists for the chunk at `pos`.
    ///
    /// Files of ignored chunks do not count (see [`ChunkStore::ignore`]).
    pub fn chunk_exists(&self, pos: ChunkPos) -> bool {
        !self.ignored.lock().contains(&pos) && self.path_of(pos).is_file()
    }

    /// Makes the store behave as if the chunk at `pos` had no file, until it is saved again.
    ///
    /// Used for a corrupt file that [`ChunkStore::quarantine`] failed to move away, so that the
    /// chunk is generated instead of being read again on every request.
    pub fn ignore(&self, pos: ChunkPos) {
        self.ignored.lock().insert(pos);
    }

    /// Writes the content of `chunk` to its file, replacing any previous version.
    ///
    /// The graph is read under the lock of the city, the file is written after it was released.
    #[profiling::function]
    pub fn save_chunk(&self, city: &City, chunk: &Chunk) -> Result<PathBuf, StoreError> {
        let pos = chunk.pos();
        let header = ChunkHeader {
            magic: MAGIC,
            version: VERSION,
            x: pos.x,
            z: pos.z,
        };
        let body = city.with_graph(|graph| ChunkBody::snapshot(chunk, graph));

        fs::create_dir_all(&self.directory)?;
        let path = self.path_of(pos);
        let tmp = path.with_extension("chunk.tmp");

        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        bincode::serialize_into(&mut writer, &header)?;
        bincode::serialize_into(&mut writer, &body)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, &path)?;
        self.ignored.lock().remove(&pos);
        ec_log::trace!("saved chunk {pos} to `{}`", path.display());
        Ok(path)
    }

    /// Reads the chunk at `pos` back from its file.
    ///
    /// Intersections close to one of a loaded neighbor are merged with it, so that the border
    /// stays shared. The returned chunk is populated but not registered.
    #[profiling::function]
    pub fn load_chunk(&self, city: &City, pos: ChunkPos) -> Result<Chunk, StoreError> {
        let bytes = fs::read(self.path_of(pos))?;
        let mut reader = &bytes[..];

        let header: ChunkHeader = bincode::deserialize_from(&mut reader)?;
        if header.magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }
        if header.version != VERSION {
            return Err(StoreError::UnsupportedVersion(header.version));
        }
        let found = ChunkPos::new(header.x, header.z);
        if found != pos {
            return Err(StoreError::WrongChunk(found));
        }

        let body: ChunkBody = bincode::deserialize_from(&mut reader)?;
        body.validate()?;

        let neighbors = city.get_neighbor_chunks(pos);
        let mut chunk = Chunk::new(pos);
        city.with_graph(|graph| self.restore(&mut chunk, graph, &neighbors, body));
        chunk.mark_populated();

        ec_log::trace!("loaded chunk {pos} from disk");
        Ok(chunk)
    }

    fn restore(
        &self,
        chunk: &mut Chunk,
        graph: &mut RoadGraph,
        neighbors: &Neighbors,
        body: ChunkBody,
    ) {
        let reuse2 = self.reuse_distance * self.reuse_distance;

        let ids: Vec<IntersectionId> = body
            .intersections
            .iter()
            .map(|&p| {
                let p = Vec3::from_array(p);
                let reused = neighbors
                    .iter()
                    .flat_map(|n| n.intersections())
                    .filter_map(|&id| Some((id, graph.position(id)?.distance_squared(p))))
                    .filter(|&(_, d2)| d2 < reuse2)
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(id, _)| id);

                match reused {
                    Some(id) => {
                        chunk.adopt_intersection(graph, id);
                        id
                    }
                    None => chunk.add_intersection(graph, p),
                }
            })
            .collect();

        for &(a, b) in &body.roads {
            chunk.connect(graph, ids[a as usize], ids[b as usize]);
        }

        for saved in body.blocks {
            let vertices = saved
                .vertices
                .iter()
                .map(|&v| ids[v as usize])
                .collect::<ec_core::BlockVertices>();
            let outline = vertices
                .iter()
                .map(|&id| graph.position(id).map_or(Vec2::ZERO, ground))
                .collect();

            let mut block = CityBlock::new(vertices, outline, saved.density);
            for b in saved.buildings {
                block.push_building(Building {
                    footprint: b.footprint.into_iter().map(Vec2::from_array).collect(),
                    height: b.height,
                });
            }
            chunk.push_block(block);
        }
    }

    /// Moves the file of the chunk at `pos` out of the way, so that the chunk gets regenerated.
    ///
    /// The file is kept next to the others with a `.bad` extension.
    pub fn quarantine(&self, pos: ChunkPos) -> Result<PathBuf, StoreError> {
        let path = self.path_of(pos);
        let bad = path.with_extension("chunk.bad");
        fs::rename(&path, &bad)?;
        Ok(bad)
    }
}

impl ChunkArchive for ChunkStore {
    #[inline]
    fn chunk_exists(&self, pos: ChunkPos) -> bool {
        ChunkStore::chunk_exists(self, pos)
    }
}

/// A directory under the temporary directory, removed on drop.
#[cfg(test)]
pub(crate) struct TempDir(pub PathBuf);

#[cfg(test)]
impl TempDir {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU32, Ordering};

        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "endless_city-store-{}-{n}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&path);
        Self(path)
    }

    /// A store saving on unload into this directory.
    pub fn store(&self) -> ChunkStore {
        let config = StorageConfig {
            directory: self.0.clone(),
            save_on_unload: true,
        };
        ChunkStore::new(
            &config,
            ec_worldgen_core::GenConfig::default().min_intersection_distance,
        )
    }
}

#[cfg(test)]
impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}
