use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec3};
use gpubatch_arena::{HostMemoryBlock, HostUploadTarget, VariableBlockAllocator};
use gpubatch_batch::{
    BatchConfig, BatchRenderer, DrawBatchCompiler, DrawUnit, GeometryBatchStore, MeshData,
    RecordingSink,
};
use gpubatch_common::{GeometryId, InstanceSlot, MaterialId};

fn quad() -> MeshData {
    let vertices = [[0.0f32; 6]; 4];
    MeshData::from_vertices(&vertices, &[0, 1, 2, 2, 3, 0])
}

fn make_units(count: u32, geometries: u64, materials: u64) -> Vec<DrawUnit> {
    (0..count)
        .map(|i| DrawUnit {
            geometry: GeometryId(u64::from(i) * 7 % geometries),
            material: MaterialId(u64::from(i) * 13 % materials),
            instance_slot: InstanceSlot(i),
            visible: i % 10 != 0,
            odd_negative_scale: false,
        })
        .collect()
}

fn bench_compile(count: u32, geometries: u64, materials: u64, iterations: usize) {
    let config = BatchConfig::default();
    let mut store = GeometryBatchStore::new(&config, HostUploadTarget::new(), HostUploadTarget::new());
    let mesh = Arc::new(quad());
    for g in 0..geometries {
        store.stage(GeometryId(g), mesh.clone()).unwrap();
    }
    store.commit().unwrap();
    let mut compiler =
        DrawBatchCompiler::new(&config, HostUploadTarget::new(), HostUploadTarget::new()).unwrap();
    let units = make_units(count, geometries, materials);

    let start = Instant::now();
    for _ in 0..iterations {
        let mut frame_units = units.clone();
        let frame = compiler.compile(black_box(&mut frame_units), &store).unwrap();
        black_box(frame.commands.len());
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  compile ({count} units, {geometries} geometries, {materials} materials, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_frame(items: u32, iterations: usize) {
    let mut renderer = BatchRenderer::new(BatchConfig::default(), |_| HostUploadTarget::new()).unwrap();
    let mesh = Arc::new(quad());
    let slots: Vec<_> = (0..items)
        .map(|i| {
            renderer
                .bind(
                    GeometryId(u64::from(i % 32)),
                    mesh.clone(),
                    MaterialId(u64::from(i % 8)),
                    Mat4::from_translation(Vec3::X * i as f32),
                )
                .unwrap()
        })
        .collect();
    let mut sink = RecordingSink::new();

    let start = Instant::now();
    for frame in 0..iterations {
        let moved = slots[frame % slots.len()];
        renderer
            .update_transform(moved, Mat4::from_translation(Vec3::Y * frame as f32))
            .unwrap();
        let stats = renderer.execute(black_box(&mut sink)).unwrap();
        black_box(stats.submit.commands);
        sink.clear();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  frame ({items} items, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_compaction(allocations: u32, iterations: usize) {
    let start = Instant::now();
    for _ in 0..iterations {
        let mut arena = VariableBlockAllocator::new(HostMemoryBlock::new(4096));
        let keys: Vec<_> = (0..allocations)
            .map(|i| arena.alloc(16 + i % 64).unwrap())
            .collect();
        for key in keys.iter().step_by(2) {
            arena.remove(*key).unwrap();
        }
        black_box(arena.compaction().unwrap());
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  compaction ({allocations} allocations, half removed, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== gpubatch compile benchmarks ===");
    bench_compile(1_000, 16, 4, 200);
    bench_compile(10_000, 64, 16, 50);
    bench_compile(100_000, 256, 32, 10);

    println!("=== frame benchmarks ===");
    bench_frame(1_000, 100);
    bench_frame(10_000, 20);

    println!("=== compaction benchmarks ===");
    bench_compaction(1_000, 100);
    bench_compaction(10_000, 10);
}
