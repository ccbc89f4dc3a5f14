use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ec_core::{Chunk, ChunkPos, City};
use ec_worldgen_std::ChunkGenerator;
use parking_lot::{Condvar, Mutex};

use super::ChunkStore;

/// What a [`ChunkOperation`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Load the chunk from disk, or generate it, and register it in the city.
    Load,
    /// Remove the chunk from the city and tear it down once the render thread released it.
    Unload,
}

/// A request waiting in the queue of a [`ChunkLoader`].
#[derive(Clone)]
pub struct ChunkOperation {
    /// The position of the chunk.
    pub pos: ChunkPos,
    /// The city the chunk belongs to.
    pub city: Arc<City>,
    /// What should happen to the chunk.
    pub kind: OperationKind,
    /// The chunk being unloaded, once the worker removed it from the city.
    pub chunk: Option<Arc<Chunk>>,
    /// Whether the worker started executing the operation. An operation in flight is never
    /// coalesced with a new request.
    pub in_flight: bool,
}

impl std::fmt::Debug for ChunkOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkOperation")
            .field("pos", &self.pos)
            .field("kind", &self.kind)
            .field("chunk", &self.chunk)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// The state protected by the lock of the loader.
struct Queue {
    /// The pending operations. The front one is the one being executed.
    operations: VecDeque<ChunkOperation>,
    /// Whether the worker should keep running.
    executing: bool,
}

impl Queue {
    fn position(&self, pos: ChunkPos) -> impl Iterator<Item = &ChunkOperation> + '_ {
        self.operations.iter().filter(move |op| op.pos == pos)
    }

    /// Queues a load of `pos`, unless the position is already queued.
    fn request_load(&mut self, pos: ChunkPos, city: &Arc<City>) -> bool {
        if self.position(pos).next().is_some() {
            return false;
        }

        self.operations.push_back(ChunkOperation {
            pos,
            city: Arc::clone(city),
            kind: OperationKind::Load,
            chunk: None,
            in_flight: false,
        });
        true
    }

    /// Queues an unload of `pos`.
    ///
    /// A load of the same position that did not start yet is turned into the unload instead.
    fn request_unload(&mut self, pos: ChunkPos, city: &Arc<City>) -> bool {
        if self
            .position(pos)
            .any(|op| op.kind == OperationKind::Unload)
        {
            return false;
        }

        if let Some(op) = self
            .operations
            .iter_mut()
            .find(|op| op.pos == pos && !op.in_flight)
        {
            ec_log::trace!("chunk {pos} is out of range before being loaded");
            op.kind = OperationKind::Unload;
            return true;
        }

        self.operations.push_back(ChunkOperation {
            pos,
            city: Arc::clone(city),
            kind: OperationKind::Unload,
            chunk: None,
            in_flight: false,
        });
        true
    }
}

/// The state shared between the loader and its worker thread.
struct Shared {
    queue: Mutex<Queue>,
    /// Signaled when an operation is queued or completed, and when the loader stops.
    condvar: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                operations: VecDeque::new(),
                executing: true,
            }),
            condvar: Condvar::new(),
        }
    }

    #[inline]
    fn is_executing(&self) -> bool {
        self.queue.lock().executing
    }

    /// Blocks until an operation is available and marks it in flight.
    ///
    /// Returns [`None`] when the loader was asked to stop.
    fn next_operation(&self) -> Option<ChunkOperation> {
        let mut queue = self.queue.lock();
        loop {
            if !queue.executing {
                return None;
            }
            if let Some(front) = queue.operations.front_mut() {
                front.in_flight = true;
                return Some(front.clone());
            }
            self.condvar.wait(&mut queue);
        }
    }

    /// Makes the chunk being unloaded visible to the render thread.
    fn attach(&self, chunk: &Arc<Chunk>) {
        if let Some(front) = self.queue.lock().operations.front_mut() {
            front.chunk = Some(Arc::clone(chunk));
        }
    }

    /// Removes the front operation, which just completed.
    fn finish(&self, pos: ChunkPos) {
        let mut queue = self.queue.lock();
        let done = queue.operations.pop_front();
        debug_assert!(done.is_some_and(|op| op.pos == pos));
        self.condvar.notify_all();
    }

    fn stop(&self) {
        self.queue.lock().executing = false;
        self.condvar.notify_all();
    }
}

/// The part of the loader that lives on the worker thread.
struct LoaderWorker {
    generator: ChunkGenerator,
    store: Option<Arc<ChunkStore>>,
    release_poll: Duration,
}

impl LoaderWorker {
    #[profiling::function]
    fn load(&self, op: &ChunkOperation) {
        let city = &op.city;
        if city.is_chunk_loaded(op.pos) {
            ec_log::trace!("chunk {} is already loaded", op.pos);
            return;
        }

        let chunk = match &self.store {
            Some(store) if store.chunk_exists(op.pos) => match store.load_chunk(city, op.pos) {
                Ok(chunk) => Some(chunk),
                Err(err) => {
                    ec_log::warning!("failed to load chunk {}: {err}", op.pos);
                    if let Err(err) = store.quarantine(op.pos) {
                        ec_log::warning!("failed to move the file of chunk {} away: {err}", op.pos);
                        store.ignore(op.pos);
                    }
                    self.generator.generate_chunk(city, op.pos)
                }
            },
            _ => self.generator.generate_chunk(city, op.pos),
        };

        if let Some(chunk) = chunk {
            city.add_chunk(chunk);
            ec_log::trace!("chunk {} is loaded", op.pos);
        }
    }

    #[profiling::function]
    fn unload(&self, shared: &Shared, op: &ChunkOperation) {
        let city = &op.city;
        let Some(chunk) = city.remove_chunk(op.pos) else {
            ec_log::trace!("chunk {} was never loaded", op.pos);
            return;
        };

        if chunk.begin_unload() {
            shared.attach(&chunk);
            while !chunk.lifecycle().wait_until_released(self.release_poll) {
                if !shared.is_executing() {
                    ec_log::info!("abandoning the release of chunk {}", op.pos);
                    break;
                }
            }
        } else {
            ec_log::error!("chunk {} was removed while {:?}", op.pos, chunk.state());
        }

        if let Some(store) = self.store.as_ref().filter(|s| s.save_on_unload()) {
            if let Err(err) = store.save_chunk(city, &chunk) {
                ec_log::warning!("failed to save chunk {}: {err}", op.pos);
            }
        }

        if let Some(teardown) = city.destroy_chunk(&chunk) {
            ec_log::trace!("chunk {} is unloaded: {teardown:?}", op.pos);
        }
    }
}

/// Runs the worker thread until the loader stops.
fn worker_thread(shared: Arc<Shared>, worker: LoaderWorker) {
    while let Some(op) = shared.next_operation() {
        match op.kind {
            OperationKind::Load => worker.load(&op),
            OperationKind::Unload => worker.unload(&shared, &op),
        }
        shared.finish(op.pos);
    }
    ec_log::trace!("chunk loader stopped");
}

/// Loads and unloads chunks on a dedicated thread.
///
/// Requests are processed one at a time, in the order they were made. The driver thread never
/// blocks on them: it queues requests and observes their effect on the [`City`].
///
/// # Unloading
///
/// An unload is a handshake with the render thread. The worker removes the chunk from the city,
/// which stops it from being drawn, then waits for the render thread to release the resources it
/// created for the chunk (see [`ChunkLoader::first_in_queue`]). Only then is the chunk torn down.
pub struct ChunkLoader {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ChunkLoader {
    /// Starts a new [`ChunkLoader`].
    ///
    /// Chunks found in `store` are loaded from disk, the others are generated.
    pub fn new(
        generator: ChunkGenerator,
        store: Option<Arc<ChunkStore>>,
        release_poll: Duration,
    ) -> std::io::Result<Self> {
        let mut loader = Self::idle();
        loader.start(generator, store, release_poll)?;
        Ok(loader)
    }

    /// A loader whose worker thread is not running yet. Requests pile up until
    /// [`ChunkLoader::start`] is called.
    pub(super) fn idle() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            thread: None,
        }
    }

    pub(super) fn start(
        &mut self,
        generator: ChunkGenerator,
        store: Option<Arc<ChunkStore>>,
        release_poll: Duration,
    ) -> std::io::Result<()> {
        let worker = LoaderWorker {
            generator,
            store,
            release_poll,
        };
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("chunk-loader".into())
            .spawn(move || worker_thread(shared, worker))?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Requests the chunk at `pos` to be loaded in `city`.
    ///
    /// Returns `false` if an operation on that position is already queued.
    pub fn load_chunk(&self, pos: ChunkPos, city: &Arc<City>) -> bool {
        let queued = self.shared.queue.lock().request_load(pos, city);
        if queued {
            self.shared.condvar.notify_all();
        }
        queued
    }

    /// Requests `chunk` to be unloaded from `city`.
    ///
    /// Returns `false` if an unload of that position is already queued.
    #[inline]
    pub fn unload_chunk(&self, chunk: &Chunk, city: &Arc<City>) -> bool {
        self.unload_chunk_at(chunk.pos(), city)
    }

    /// Requests the chunk at `pos` to be unloaded from `city`, whether it is loaded yet or not.
    ///
    /// If a load of `pos` is queued and did not start, it is replaced by the unload and the chunk
    /// is never loaded.
    pub fn unload_chunk_at(&self, pos: ChunkPos, city: &Arc<City>) -> bool {
        let queued = self.shared.queue.lock().request_unload(pos, city);
        if queued {
            self.shared.condvar.notify_all();
        }
        queued
    }

    /// Returns the operation the worker is executing (or is about to execute).
    ///
    /// The render thread calls this every frame to know whether it owes a chunk the release of
    /// its resources.
    pub fn first_in_queue(&self) -> Option<ChunkOperation> {
        self.shared.queue.lock().operations.front().cloned()
    }

    /// Returns the positions of the queued loads the worker did not start yet.
    ///
    /// Those can still be cancelled with [`ChunkLoader::unload_chunk_at`].
    pub fn pending_loads(&self) -> Vec<ChunkPos> {
        self.shared
            .queue
            .lock()
            .operations
            .iter()
            .filter(|op| op.kind == OperationKind::Load && !op.in_flight)
            .map(|op| op.pos)
            .collect()
    }

    /// Returns whether an operation on `pos` is queued.
    pub fn is_queued(&self, pos: ChunkPos) -> bool {
        self.shared.queue.lock().position(pos).next().is_some()
    }

    /// The number of queued operations, including the one being executed.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().operations.len()
    }

    /// Blocks until the queue is empty, or until `timeout` elapsed.
    ///
    /// Returns whether the queue is empty.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        while !queue.operations.is_empty() {
            if self.shared.condvar.wait_until(&mut queue, deadline).timed_out() {
                return queue.operations.is_empty();
            }
        }
        true
    }

    /// Stops the worker thread and waits for it to finish its current operation.
    ///
    /// Queued operations that did not start are dropped. An unload waiting for the render
    /// thread proceeds without it.
    pub fn shutdown(&mut self) {
        self.shared.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                ec_log::error!("the chunk loader thread panicked");
            }
        }
    }
}

impl Drop for ChunkLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_core::ChunkState;
    use ec_worldgen_core::GenConfig;

    use crate::world::TempDir;

    fn generator() -> ChunkGenerator {
        ChunkGenerator::new(GenConfig::default())
    }

    fn wait_for_state(chunk: &Chunk, state: ChunkState) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while chunk.state() != state && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(chunk.state(), state);
    }

    /// A loader reading and saving chunks in `dir`, the way the demo sets it up.
    fn persistent_loader(dir: &TempDir) -> (ChunkLoader, Arc<ChunkStore>) {
        let store = Arc::new(dir.store());
        let loader = ChunkLoader::new(
            generator().with_archive(store.clone()),
            Some(store.clone()),
            Duration::from_millis(5),
        )
        .unwrap();
        (loader, store)
    }

    /// Unloads `chunk`, playing the render thread until it is destroyed.
    fn unload_and_release(loader: &ChunkLoader, city: &Arc<City>, chunk: &Chunk) {
        assert!(loader.unload_chunk(chunk, city));
        let deadline = Instant::now() + Duration::from_secs(10);
        while chunk.state() != ChunkState::Destroyed && Instant::now() < deadline {
            release_front(loader);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(chunk.state(), ChunkState::Destroyed);
        assert!(loader.wait_idle(Duration::from_secs(10)));
    }

    /// Plays the render thread: releases the chunk of the front unload, if any.
    fn release_front(loader: &ChunkLoader) {
        if let Some(ChunkOperation {
            kind: OperationKind::Unload,
            chunk: Some(chunk),
            ..
        }) = loader.first_in_queue()
        {
            chunk.release_resources();
        }
    }

    #[test]
    fn requests_are_deduplicated_by_position() {
        let loader = ChunkLoader::idle();
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        assert!(loader.load_chunk(pos, &city));
        assert!(!loader.load_chunk(pos, &city));
        assert!(loader.load_chunk(ChunkPos::new(1000, 0), &city));
        assert_eq!(loader.queue_len(), 2);
    }

    #[test]
    fn unload_coalesces_with_a_pending_load() {
        let loader = ChunkLoader::idle();
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        loader.load_chunk(pos, &city);
        assert!(loader.unload_chunk_at(pos, &city));
        assert!(!loader.unload_chunk_at(pos, &city));

        assert_eq!(loader.queue_len(), 1);
        assert_eq!(loader.first_in_queue().unwrap().kind, OperationKind::Unload);
    }

    #[test]
    fn load_in_flight_is_not_coalesced() {
        let loader = ChunkLoader::idle();
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        loader.load_chunk(pos, &city);
        let op = loader.shared.next_operation().unwrap();
        assert_eq!(op.kind, OperationKind::Load);

        assert!(loader.unload_chunk_at(pos, &city));
        assert_eq!(loader.queue_len(), 2);
        assert_eq!(loader.first_in_queue().unwrap().kind, OperationKind::Load);
    }

    #[test]
    fn coalesced_chunk_is_never_loaded() {
        let mut loader = ChunkLoader::idle();
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        loader.load_chunk(pos, &city);
        loader.unload_chunk_at(pos, &city);
        loader
            .start(generator(), None, Duration::from_millis(5))
            .unwrap();

        assert!(loader.wait_idle(Duration::from_secs(10)));
        assert!(!city.is_chunk_loaded(pos));
        assert_eq!(city.with_graph(|g| g.intersection_count()), 0);
    }

    #[test]
    fn operations_run_in_order() {
        let loader = ChunkLoader::new(
            ChunkGenerator::new(GenConfig::default()),
            None,
            Duration::from_millis(5),
        )
        .unwrap();
        let city = Arc::new(City::new());

        loader.load_chunk(ChunkPos::new(0, 0), &city);
        loader.load_chunk(ChunkPos::new(1000, 0), &city);
        assert!(loader.wait_idle(Duration::from_secs(10)));

        let left = city.get_chunk_at(ChunkPos::new(0, 0)).unwrap();
        let right = city.get_chunk_at(ChunkPos::new(1000, 0)).unwrap();
        assert!(right
            .intersections()
            .iter()
            .any(|&id| left.claims_intersection(id)));
    }

    #[test]
    fn unload_waits_for_the_render_thread() {
        let loader = ChunkLoader::new(
            ChunkGenerator::new(GenConfig::default()),
            None,
            Duration::from_millis(5),
        )
        .unwrap();
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        loader.load_chunk(pos, &city);
        assert!(loader.wait_idle(Duration::from_secs(10)));
        let chunk = city.get_chunk_at(pos).unwrap();
        assert!(chunk.is_drawable());

        loader.unload_chunk(&chunk, &city);
        wait_for_state(&chunk, ChunkState::PendingUnload);
        std::thread::sleep(Duration::from_millis(20));

        // Nothing released the chunk yet.
        assert!(!city.is_chunk_loaded(pos));
        assert_eq!(chunk.state(), ChunkState::PendingUnload);
        assert!(city.with_graph(|g| g.intersection_count()) > 0);
        assert_eq!(loader.queue_len(), 1);

        release_front(&loader);
        assert!(loader.wait_idle(Duration::from_secs(10)));
        assert_eq!(chunk.state(), ChunkState::Destroyed);
        assert_eq!(city.with_graph(|g| g.intersection_count()), 0);
        assert_eq!(city.with_graph(|g| g.road_count()), 0);
    }

    #[test]
    fn shutdown_abandons_a_pending_release() {
        let mut loader = ChunkLoader::new(
            ChunkGenerator::new(GenConfig::default()),
            None,
            Duration::from_millis(5),
        )
        .unwrap();
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        loader.load_chunk(pos, &city);
        assert!(loader.wait_idle(Duration::from_secs(10)));
        let chunk = city.get_chunk_at(pos).unwrap();
        loader.unload_chunk(&chunk, &city);
        wait_for_state(&chunk, ChunkState::PendingUnload);
        loader.shutdown();

        assert_eq!(chunk.state(), ChunkState::Destroyed);
    }

    #[test]
    fn pending_loads_skip_the_operation_in_flight() {
        let loader = ChunkLoader::idle();
        let city = Arc::new(City::new());
        let (a, b) = (ChunkPos::new(0, 0), ChunkPos::new(1000, 0));

        loader.load_chunk(a, &city);
        loader.load_chunk(b, &city);
        assert_eq!(loader.pending_loads(), [a, b]);

        loader.shared.next_operation().unwrap();
        assert_eq!(loader.pending_loads(), [b]);

        loader.unload_chunk_at(b, &city);
        assert!(loader.pending_loads().is_empty());
    }

    #[test]
    fn corrupt_file_is_quarantined_and_regenerated() {
        let dir = TempDir::new();
        let (loader, store) = persistent_loader(&dir);
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        std::fs::create_dir_all(&dir.0).unwrap();
        std::fs::write(store.path_of(pos), b"definitely not a chunk").unwrap();

        loader.load_chunk(pos, &city);
        assert!(loader.wait_idle(Duration::from_secs(10)));

        let chunk = city.get_chunk_at(pos).unwrap();
        assert!(!chunk.blocks().is_empty());
        assert!(dir.0.join("0_0.chunk.bad").is_file());
        assert!(!store.chunk_exists(pos));
    }

    #[test]
    fn corrupt_file_that_cannot_be_moved_is_ignored() {
        let dir = TempDir::new();
        let (loader, store) = persistent_loader(&dir);
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(0, 0);

        // A directory in the way of the quarantine rename.
        std::fs::create_dir_all(dir.0.join("0_0.chunk.bad").join("occupied")).unwrap();
        std::fs::write(store.path_of(pos), b"definitely not a chunk").unwrap();

        loader.load_chunk(pos, &city);
        assert!(loader.wait_idle(Duration::from_secs(10)));

        assert!(city.is_chunk_loaded(pos));
        assert!(store.path_of(pos).is_file());
        assert!(!store.chunk_exists(pos));
    }

    #[test]
    fn unloaded_chunk_is_read_back_from_disk() {
        let dir = TempDir::new();
        let (loader, store) = persistent_loader(&dir);
        let city = Arc::new(City::new());
        let pos = ChunkPos::new(1000, -1000);

        loader.load_chunk(pos, &city);
        assert!(loader.wait_idle(Duration::from_secs(10)));
        let chunk = city.get_chunk_at(pos).unwrap();
        let outlines: Vec<_> = chunk.blocks().iter().map(|b| b.outline().to_vec()).collect();
        assert!(!outlines.is_empty());

        unload_and_release(&loader, &city, &chunk);
        assert!(store.chunk_exists(pos));
        assert_eq!(city.with_graph(|g| g.intersection_count()), 0);

        loader.load_chunk(pos, &city);
        assert!(loader.wait_idle(Duration::from_secs(10)));
        let reloaded = city.get_chunk_at(pos).unwrap();
        let reloaded_outlines: Vec<_> = reloaded
            .blocks()
            .iter()
            .map(|b| b.outline().to_vec())
            .collect();

        assert!(!Arc::ptr_eq(&chunk, &reloaded));
        assert_eq!(outlines, reloaded_outlines);
        assert_eq!(reloaded.roads().len(), chunk.roads().len());
    }
}
