mod config;
mod panic;
mod render;
mod world;

use std::sync::Arc;
use std::time::Duration;

use ec_core::City;
use ec_worldgen_std::ChunkGenerator;
use glam::Vec3;

use self::config::Config;
use self::render::RenderProxy;
use self::world::{ChunkLoader, ChunkStore, Streamer};

/// The file the configuration is read from, in the working directory.
const CONFIG_FILE: &str = "city.ron";

/// Flies a camera through the city without opening a window, streaming chunks as it goes.
fn main() {
    panic::install_custom_panic_hook();

    let config = match Config::load_or_default(CONFIG_FILE) {
        Ok(config) => config,
        Err(err) => {
            ec_log::error!("{err}");
            std::process::exit(1);
        }
    };
    ec_log::set_max_verbosity(config.log_level);

    let store = Arc::new(ChunkStore::new(
        &config.storage,
        config.generation.min_intersection_distance,
    ));
    let generator = ChunkGenerator::new(config.generation.clone()).with_archive(store.clone());
    let release_poll = Duration::from_millis(config.streaming.release_poll_ms);
    let mut loader = match ChunkLoader::new(generator, Some(store.clone()), release_poll) {
        Ok(loader) => loader,
        Err(err) => {
            ec_log::error!("failed to start the chunk loader: {err}");
            std::process::exit(1);
        }
    };

    let city = Arc::new(City::new());
    let streamer = Streamer::new(config.streaming.clone());
    let mut proxy = RenderProxy::default();

    let demo = &config.demo;
    let mut camera = Vec3::from_array(demo.start);
    let velocity = Vec3::new(demo.velocity[0], 0.0, demo.velocity[1]);
    let frame_time = Duration::from_millis(demo.frame_ms);

    ec_log::info!(
        "flying from {camera} for {} frames, chunks are saved in `{}`",
        demo.frames,
        store.directory().display()
    );

    for frame in 0..demo.frames {
        let requests = streamer.update(camera, &city, &loader);
        if let Some(pos) = requests.loaded {
            ec_log::trace!("requested chunk {pos}");
        }
        for pos in requests.unloaded {
            ec_log::trace!("released chunk {pos}");
        }
        proxy.render_frame(&city, &loader);
        profiling::finish_frame!();

        if frame % 60 == 0 {
            let (intersections, roads) =
                city.with_graph(|g| (g.intersection_count(), g.road_count()));
            ec_log::info!(
                "frame {frame}: camera at {camera}, {} chunks loaded, {} queued, {intersections} intersections, {roads} roads",
                city.chunk_count(),
                loader.queue_len(),
            );
        }

        camera += velocity;
        std::thread::sleep(frame_time);
    }

    // Unload everything so that the chunks get saved, then let the render side release them.
    loop {
        let loaded = city.loaded_chunks();
        if loaded.is_empty() && loader.queue_len() == 0 {
            break;
        }
        for chunk in loaded {
            loader.unload_chunk(&chunk, &city);
        }
        if !loader.wait_idle(frame_time) {
            proxy.render_frame(&city, &loader);
        }
    }
    loader.shutdown();

    let stats = proxy.stats();
    ec_log::info!(
        "done: {} draws, {} uploads, {} releases, {} chunks still resident ({} vertices)",
        stats.draws,
        stats.uploads,
        stats.releases,
        proxy.resident_chunks(),
        proxy.resident_vertices(),
    );
}
