use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ec_core::{ChunkPos, City};
use ec_worldgen_core::GenConfig;
use ec_worldgen_std::ChunkGenerator;

fn generate_alone(c: &mut Criterion) {
    let generator = ChunkGenerator::new(GenConfig::default());
    c.bench_function("generate_chunk", |b| {
        b.iter(|| {
            let city = City::new();
            black_box(generator.generate_chunk(&city, black_box(ChunkPos::new(0, 0))))
        })
    });
}

fn generate_next_to_neighbors(c: &mut Criterion) {
    let generator = ChunkGenerator::new(GenConfig::default());
    let city = City::new();
    for pos in ChunkPos::new(0, 0).neighbors() {
        if let Some(chunk) = generator.generate_chunk(&city, pos) {
            city.add_chunk(chunk);
        }
    }

    // The chunk is torn down after every run so that the neighbors keep the same graph.
    let center = ChunkPos::new(0, 0);
    c.bench_function("generate_chunk_with_neighbors", |b| {
        b.iter(|| {
            let Some(chunk) = generator.generate_chunk(&city, black_box(center)) else {
                return;
            };
            let chunk = city.add_chunk(chunk);
            city.remove_chunk(center);
            chunk.begin_unload();
            black_box(city.destroy_chunk(&chunk));
        })
    });
}

criterion_group!(benches, generate_alone, generate_next_to_neighbors);
criterion_main!(benches);
